// HeadKey - A Belief Graph Storage Engine for AI Agents
// Root library module

pub mod backend;
pub mod builders;
pub mod categorization;
pub mod contracts;
pub mod document_store;
pub mod errors;
pub mod extraction;
pub mod factory;
pub mod graph_query;
pub mod memory_backend;
pub mod observability;
pub mod operations;
pub mod pipeline;
pub mod relational_store;
pub mod relationship_store;
pub mod types;
pub mod validation;
pub mod wrappers;

// Re-export key types
pub use errors::{ErrorKind, StorageError, StoreResult};

pub use types::{
    clamp_unit, AgentId, BeliefId, ConflictId, Direction, RelationshipId, RelationshipType,
};

pub use contracts::{
    Belief, BeliefConflict, BeliefRelationship, BeliefStore, CategoryLabel, GraphQuery,
    GraphStatistics, KnowledgeGraphSnapshot, RelationshipSpec, RelationshipStore, StructureReport,
    UNKNOWN_CATEGORY,
};

// Re-export backend ports
pub use backend::{
    BatchUpdate, BulkOutcome, DocumentBackend, FieldMapping, FieldType, IndexMapping, QueryNode,
    RangeBucket, RefreshPolicy, RelationalBackend, RelationalTransaction, Row, RowQuery,
    SearchRequest, SearchResponse, SortOrder, SortSpec,
};

// Re-export storage strategies and reference engines
pub use document_store::DocumentBeliefStore;
pub use memory_backend::{InMemoryDocumentBackend, InMemoryRelationalBackend};
pub use relational_store::RelationalBeliefStore;
pub use relationship_store::{DocumentRelationshipStore, RelationalRelationshipStore};

// Re-export the graph read surface
pub use graph_query::{GraphQueryService, JsonSnapshotExporter, SnapshotExporter};

// Re-export extraction ports and the deterministic fallbacks
pub use extraction::{
    BeliefExtractor, CategoryExtraction, CategoryExtractor, Categorizer, ConfidenceScorer,
    ConflictDetector, ExtractedBelief, HeuristicExtractionService, SimilarityScorer,
    TagExtraction, TagExtractor,
};

pub use categorization::{
    pattern_extraction, CategorizationConfig, CategorizationEngine, DEFAULT_CATEGORIES,
};

pub use pipeline::{IngestionOutcome, IngestionPipeline, IngestionRequest, PipelineConfig};

// Re-export builders and factories
pub use builders::{
    BeliefBuilder, CategorizationConfigBuilder, RelationshipBuilder, StoreConfigBuilder,
};
pub use factory::{
    create_document_stores, create_heuristic_engine, create_in_memory_document_stores,
    create_in_memory_relational_stores, create_pipeline, create_relational_stores,
    create_traced_bundle, StoreBundle,
};

// Re-export wrappers
pub use wrappers::{TracedBeliefStore, TracedRelationshipStore};

// Re-export observability entry points
pub use observability::{
    get_metrics, init_logging, record_metric, with_trace_id, HealthTracker, LogLevel, MetricType,
};

pub use operations::{ExistenceCache, StoreConfig};
