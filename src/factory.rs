// Factory Functions
// Explicit constructors returning fully wired store bundles. There are no
// preset singletons; every bundle is a value the caller owns.

use std::sync::Arc;

use crate::backend::{DocumentBackend, RelationalBackend};
use crate::categorization::{CategorizationConfig, CategorizationEngine};
use crate::contracts::{BeliefStore, GraphQuery, RelationshipStore};
use crate::document_store::DocumentBeliefStore;
use crate::extraction::HeuristicExtractionService;
use crate::graph_query::GraphQueryService;
use crate::memory_backend::{InMemoryDocumentBackend, InMemoryRelationalBackend};
use crate::operations::StoreConfig;
use crate::pipeline::{IngestionPipeline, PipelineConfig};
use crate::relational_store::RelationalBeliefStore;
use crate::relationship_store::{DocumentRelationshipStore, RelationalRelationshipStore};
use crate::wrappers::{TracedBeliefStore, TracedRelationshipStore};

/// One coherent strategy over one backend: belief store, relationship
/// store and the graph read surface composed over them.
pub struct StoreBundle {
    pub beliefs: Arc<dyn BeliefStore>,
    pub relationships: Arc<dyn RelationshipStore>,
    pub graph: Arc<dyn GraphQuery>,
}

/// Document-strategy bundle over the given search engine.
pub fn create_document_stores(
    backend: Arc<dyn DocumentBackend>,
    config: StoreConfig,
) -> StoreBundle {
    let beliefs: Arc<dyn BeliefStore> = Arc::new(DocumentBeliefStore::new(
        Arc::clone(&backend),
        config.clone(),
    ));
    let relationships: Arc<dyn RelationshipStore> = Arc::new(DocumentRelationshipStore::new(
        backend,
        Arc::clone(&beliefs),
        config,
    ));
    let graph: Arc<dyn GraphQuery> = Arc::new(GraphQueryService::new(
        Arc::clone(&beliefs),
        Arc::clone(&relationships),
    ));
    StoreBundle {
        beliefs,
        relationships,
        graph,
    }
}

/// Relational-strategy bundle over the given relational engine.
pub fn create_relational_stores(
    backend: Arc<dyn RelationalBackend>,
    config: StoreConfig,
) -> StoreBundle {
    let beliefs: Arc<dyn BeliefStore> = Arc::new(RelationalBeliefStore::new(
        Arc::clone(&backend),
        config.clone(),
    ));
    let relationships: Arc<dyn RelationshipStore> = Arc::new(RelationalRelationshipStore::new(
        backend,
        Arc::clone(&beliefs),
        config,
    ));
    let graph: Arc<dyn GraphQuery> = Arc::new(GraphQueryService::new(
        Arc::clone(&beliefs),
        Arc::clone(&relationships),
    ));
    StoreBundle {
        beliefs,
        relationships,
        graph,
    }
}

/// Document-strategy bundle over the in-memory reference engine.
pub fn create_in_memory_document_stores(config: StoreConfig) -> StoreBundle {
    create_document_stores(Arc::new(InMemoryDocumentBackend::new()), config)
}

/// Relational-strategy bundle over the in-memory reference engine.
pub fn create_in_memory_relational_stores(config: StoreConfig) -> StoreBundle {
    create_relational_stores(Arc::new(InMemoryRelationalBackend::new()), config)
}

/// Wrap a bundle's stores with tracing decorators. The graph surface is
/// rebuilt over the wrapped stores so its reads are counted too.
pub fn create_traced_bundle(bundle: StoreBundle) -> StoreBundle {
    let beliefs: Arc<dyn BeliefStore> = Arc::new(TracedBeliefStore::new(bundle.beliefs));
    let relationships: Arc<dyn RelationshipStore> =
        Arc::new(TracedRelationshipStore::new(bundle.relationships));
    let graph: Arc<dyn GraphQuery> = Arc::new(GraphQueryService::new(
        Arc::clone(&beliefs),
        Arc::clone(&relationships),
    ));
    StoreBundle {
        beliefs,
        relationships,
        graph,
    }
}

/// Categorization engine backed by the shipped deterministic heuristics.
pub fn create_heuristic_engine(config: CategorizationConfig) -> CategorizationEngine {
    CategorizationEngine::heuristic(config)
}

/// Ingestion pipeline over a bundle, using the heuristic extractor.
pub fn create_pipeline(
    bundle: &StoreBundle,
    engine: CategorizationEngine,
    config: PipelineConfig,
) -> IngestionPipeline {
    IngestionPipeline::new(
        Arc::clone(&bundle.beliefs),
        Arc::clone(&bundle.relationships),
        Arc::new(engine),
        Arc::new(HeuristicExtractionService::new()),
        config,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::Belief;
    use crate::types::{AgentId, BeliefId};

    #[tokio::test]
    async fn in_memory_bundles_are_healthy_and_empty() {
        for bundle in [
            create_in_memory_document_stores(StoreConfig::default()),
            create_in_memory_relational_stores(StoreConfig::default()),
        ] {
            assert!(bundle.beliefs.healthy().await);
            assert!(bundle.relationships.healthy().await);
            let agent = AgentId::new("fresh").unwrap();
            assert!(bundle.beliefs.for_agent(&agent, true).await.unwrap().is_empty());
            assert_eq!(bundle.beliefs.count(Some(&agent), true).await.unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn traced_wrapper_counts_operations() {
        let inner = create_in_memory_document_stores(StoreConfig::default());
        let traced = TracedBeliefStore::new(Arc::clone(&inner.beliefs));
        assert_eq!(traced.operation_count(), 0);

        let agent = AgentId::new("a1").unwrap();
        let stored = traced
            .put(Belief::new(BeliefId::generate(), agent.clone(), "traced write", 0.5).unwrap())
            .await
            .unwrap();
        assert!(traced.get(&stored.id).await.unwrap().is_some());
        assert_eq!(traced.for_agent(&agent, true).await.unwrap().len(), 1);
        assert_eq!(traced.operation_count(), 3);

        // Health probes pass through without counting as operations.
        assert!(traced.healthy().await);
        assert_eq!(traced.operation_count(), 3);
    }

    #[tokio::test]
    async fn traced_bundle_preserves_store_semantics() {
        let bundle = create_traced_bundle(create_in_memory_document_stores(StoreConfig::default()));
        let agent = AgentId::new("a1").unwrap();
        let stored = bundle
            .beliefs
            .put(Belief::new(BeliefId::generate(), agent.clone(), "through the bundle", 0.5).unwrap())
            .await
            .unwrap();
        assert_eq!(bundle.beliefs.count(Some(&agent), true).await.unwrap(), 1);
        assert_eq!(
            bundle.beliefs.get(&stored.id).await.unwrap().unwrap().statement,
            "through the bundle"
        );
    }
}
