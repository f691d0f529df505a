// Ingestion Pipeline
// Wires categorization, belief extraction, similarity lookup, conflict
// detection and persistence. Single-threaded per request; an extraction
// failure surfaces as a domain error with nothing persisted for that
// record.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::categorization::CategorizationEngine;
use crate::contracts::{
    Belief, BeliefConflict, BeliefStore, CategoryLabel, RelationshipStore,
};
use crate::errors::StoreResult;
use crate::extraction::{BeliefExtractor, ExtractedBelief};
use crate::types::{AgentId, BeliefId, ConflictId, RelationshipId, RelationshipType};

/// Tunables for one pipeline instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Similarity at or above this treats a candidate as a restatement of
    /// an existing belief.
    pub similarity_threshold: f64,
    /// Link a conflicting newer belief to the one it updates with an
    /// UPDATES edge.
    pub link_superseding: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            link_superseding: true,
        }
    }
}

/// One ingestion request: content attributed to an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionRequest {
    pub agent_id: AgentId,
    pub content: String,
    pub category_hint: Option<String>,
    pub source: Option<String>,
}

impl IngestionRequest {
    pub fn new(agent_id: AgentId, content: impl Into<String>) -> Self {
        Self {
            agent_id,
            content: content.into(),
            category_hint: None,
            source: None,
        }
    }

    pub fn with_category_hint(mut self, hint: impl Into<String>) -> Self {
        self.category_hint = Some(hint.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// What one ingestion run did.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionOutcome {
    pub agent_id: AgentId,
    pub category: CategoryLabel,
    pub created: Vec<BeliefId>,
    pub reinforced: Vec<BeliefId>,
    pub conflicts: Vec<ConflictId>,
    pub relationships: Vec<RelationshipId>,
}

/// Orchestrates ingestion over one store bundle and one extraction stack.
pub struct IngestionPipeline {
    beliefs: Arc<dyn BeliefStore>,
    relationships: Arc<dyn RelationshipStore>,
    engine: Arc<CategorizationEngine>,
    extractor: Arc<dyn BeliefExtractor>,
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(
        beliefs: Arc<dyn BeliefStore>,
        relationships: Arc<dyn RelationshipStore>,
        engine: Arc<CategorizationEngine>,
        extractor: Arc<dyn BeliefExtractor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            beliefs,
            relationships,
            engine,
            extractor,
            config,
        }
    }

    fn candidate_to_belief(
        candidate: &ExtractedBelief,
        label: &CategoryLabel,
        source: Option<&str>,
    ) -> StoreResult<Belief> {
        let mut belief = Belief::new(
            BeliefId::generate(),
            candidate.agent_id.clone(),
            candidate.statement.clone(),
            candidate.confidence,
        )?;
        belief.category = Some(candidate.category.clone());
        belief.secondary_category = label.secondary.clone();
        belief.category_confidence = Some(label.confidence);
        belief.tags = candidate.tags.clone();
        belief.source = source.map(str::to_string);
        Ok(belief)
    }

    /// Run one request through the full chain.
    ///
    /// Categorize, extract, then per candidate: look up similar existing
    /// beliefs, decide conflicts, persist, and optionally link a
    /// superseding belief to its predecessor.
    pub async fn ingest(&self, request: IngestionRequest) -> StoreResult<IngestionOutcome> {
        let mut context = serde_json::Map::new();
        if let Some(hint) = &request.category_hint {
            context.insert("category_hint".to_string(), hint.clone().into());
        }
        if let Some(source) = &request.source {
            context.insert("source".to_string(), source.clone().into());
        }

        let label = self
            .engine
            .categorize_content(&request.content, &context)
            .await?;

        // Extraction failures abort the record before anything persists.
        let candidates = self
            .extractor
            .extract_beliefs(
                &request.content,
                request.agent_id.as_str(),
                Some(&label.primary),
            )
            .await?;
        debug!(
            agent_id = %request.agent_id,
            count = candidates.len(),
            category = %label.primary,
            "extracted belief candidates"
        );

        let mut outcome = IngestionOutcome {
            agent_id: request.agent_id.clone(),
            category: label.clone(),
            created: Vec::new(),
            reinforced: Vec::new(),
            conflicts: Vec::new(),
            relationships: Vec::new(),
        };

        for candidate in candidates {
            let similar = self
                .beliefs
                .find_similar(
                    &candidate.statement,
                    Some(&request.agent_id),
                    self.config.similarity_threshold,
                    5,
                )
                .await?;

            let Some((existing, score)) = similar.into_iter().next() else {
                let belief =
                    Self::candidate_to_belief(&candidate, &label, request.source.as_deref())?;
                let stored = self.beliefs.put(belief).await?;
                outcome.created.push(stored.id);
                continue;
            };

            let conflicting = self
                .engine
                .are_conflicting(
                    &candidate.statement,
                    &existing.statement,
                    Some(&candidate.category),
                    existing.category.as_deref(),
                )
                .await;

            if conflicting {
                let belief =
                    Self::candidate_to_belief(&candidate, &label, request.source.as_deref())?;
                let stored = self.beliefs.put(belief).await?;

                let members: BTreeSet<BeliefId> =
                    [existing.id.clone(), stored.id.clone()].into_iter().collect();
                let conflict = BeliefConflict::new(
                    request.agent_id.clone(),
                    members,
                    format!(
                        "'{}' conflicts with '{}'",
                        candidate.statement, existing.statement
                    ),
                )?;
                let conflict = self.beliefs.put_conflict(conflict).await?;
                outcome.conflicts.push(conflict.id);

                // The newer, at-least-as-confident belief supersedes.
                if self.config.link_superseding && candidate.confidence >= existing.confidence {
                    match self
                        .relationships
                        .create(
                            &existing.id,
                            &stored.id,
                            RelationshipType::Updates,
                            1.0,
                            &request.agent_id,
                            None,
                        )
                        .await
                    {
                        Ok(edge) => outcome.relationships.push(edge.id),
                        Err(e) => {
                            // The belief is already persisted; the link is
                            // retryable by the caller.
                            warn!(error = %e, "superseding link failed");
                        }
                    }
                }
                outcome.created.push(stored.id);
            } else {
                debug!(
                    existing = %existing.id,
                    score,
                    "reinforcing existing belief"
                );
                let mut reinforced = existing;
                reinforced.confidence = reinforced.confidence.max(candidate.confidence);
                reinforced.tags.extend(candidate.tags.iter().cloned());
                let stored = self.beliefs.put(reinforced).await?;
                outcome.reinforced.push(stored.id);
            }
        }

        Ok(outcome)
    }
}
