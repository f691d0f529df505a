// Contract-First Design
// This module defines the domain records and the storage contracts every
// strategy must satisfy. The trait documentation states preconditions,
// postconditions and invariants; runtime enforcement lives in the
// strategies and in the validation module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::errors::{StorageError, StoreResult};
use crate::types::{
    clamp_unit, now_micros, AgentId, BeliefId, ConflictId, Direction, RelationshipId,
    RelationshipType,
};

/// Sentinel primary category for content the categorization layer could not
/// place inside the configured schema.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// A single confidence-weighted proposition attributed to one agent.
///
/// # Invariants
/// - `id` is globally unique and permanent for this belief
/// - `confidence` is clamped to `[0, 1]` on construction and on every write
/// - `version` strictly increases across in-place updates
/// - deactivation preserves the record; deprecation is expressed through
///   relationships, never deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Belief {
    pub id: BeliefId,
    pub agent_id: AgentId,
    pub statement: String,
    pub category: Option<String>,
    pub secondary_category: Option<String>,
    pub confidence: f64,
    /// Confidence the categorization layer assigned to `category`, when the
    /// belief went through the pipeline.
    pub category_confidence: Option<f64>,
    pub active: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub evidence_memory_ids: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub source: Option<String>,
    pub importance_score: Option<f64>,
    pub relevance_score: Option<f64>,
    pub access_count: u64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub content_embedding: Option<Vec<f64>>,
}

impl Belief {
    /// Construct a new active belief at version 1.
    ///
    /// The statement must be non-blank; confidence is clamped.
    pub fn new(
        id: BeliefId,
        agent_id: AgentId,
        statement: impl Into<String>,
        confidence: f64,
    ) -> StoreResult<Self> {
        let statement = statement.into();
        if statement.trim().is_empty() {
            return Err(StorageError::invalid_input(
                "statement",
                "must not be blank",
            ));
        }
        let now = now_micros();
        Ok(Self {
            id,
            agent_id,
            statement,
            category: None,
            secondary_category: None,
            confidence: clamp_unit(confidence),
            category_confidence: None,
            active: true,
            version: 1,
            created_at: now,
            last_updated: now,
            last_accessed: None,
            evidence_memory_ids: BTreeSet::new(),
            tags: BTreeSet::new(),
            source: None,
            importance_score: None,
            relevance_score: None,
            access_count: 0,
            metadata: serde_json::Map::new(),
            content_embedding: None,
        })
    }
}

/// Specification of a relationship to create, used by batch creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSpec {
    pub source_belief_id: BeliefId,
    pub target_belief_id: BeliefId,
    pub relationship_type: RelationshipType,
    pub strength: f64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A directed, typed, weighted, optionally time-bounded edge between two
/// beliefs of the same agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefRelationship {
    pub id: RelationshipId,
    pub agent_id: AgentId,
    pub source_belief_id: BeliefId,
    pub target_belief_id: BeliefId,
    pub relationship_type: RelationshipType,
    pub strength: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_until: Option<DateTime<Utc>>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub deprecation_reason: Option<String>,
}

impl BeliefRelationship {
    /// An edge is currently effective iff it is active and `now` falls
    /// inside its effective window. Unset bounds are open.
    pub fn is_effective_at(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        if let Some(from) = self.effective_from {
            if from > now {
                return false;
            }
        }
        if let Some(until) = self.effective_until {
            if until <= now {
                return false;
            }
        }
        true
    }

    /// Whether this edge's type denotes supersession.
    pub fn is_deprecating(&self) -> bool {
        self.relationship_type.is_deprecating()
    }
}

/// A recorded tension between two or more beliefs of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefConflict {
    pub id: ConflictId,
    pub agent_id: AgentId,
    pub conflicting_belief_ids: BTreeSet<BeliefId>,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub description: String,
}

impl BeliefConflict {
    /// Record a new unresolved conflict. At least two beliefs must be
    /// referenced.
    pub fn new(
        agent_id: AgentId,
        conflicting_belief_ids: BTreeSet<BeliefId>,
        description: impl Into<String>,
    ) -> StoreResult<Self> {
        if conflicting_belief_ids.len() < 2 {
            return Err(StorageError::invalid_input(
                "conflicting_belief_ids",
                "a conflict references at least two beliefs",
            ));
        }
        Ok(Self {
            id: ConflictId::generate(),
            agent_id,
            conflicting_belief_ids,
            detected_at: now_micros(),
            resolved: false,
            resolved_at: None,
            resolution: None,
            description: description.into(),
        })
    }

    /// Mark the conflict resolved, stamping the resolution time.
    pub fn resolve(&mut self, resolution: impl Into<String>) {
        self.resolved = true;
        self.resolved_at = Some(now_micros());
        self.resolution = Some(resolution.into());
    }
}

/// Category assignment produced by the categorization layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryLabel {
    pub primary: String,
    pub secondary: Option<String>,
    pub tags: BTreeSet<String>,
    pub confidence: f64,
}

impl CategoryLabel {
    pub fn new(primary: impl Into<String>, confidence: f64) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
            tags: BTreeSet::new(),
            confidence: clamp_unit(confidence),
        }
    }

    /// The sentinel label for unclassifiable content.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_CATEGORY, 0.0)
    }

    pub fn is_unknown(&self) -> bool {
        self.primary == UNKNOWN_CATEGORY
    }
}

/// A materialized value-graph of one agent's beliefs and relationships.
///
/// Snapshots own their contents; they never observe later store mutations.
/// Every relationship in a snapshot references beliefs present in the same
/// snapshot (closure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraphSnapshot {
    pub agent_id: AgentId,
    pub generated_at: DateTime<Utc>,
    pub beliefs: Vec<Belief>,
    pub relationships: Vec<BeliefRelationship>,
}

impl KnowledgeGraphSnapshot {
    /// Assemble a snapshot, dropping any relationship whose endpoints are
    /// not both present so the closure invariant holds by construction.
    pub fn closed(
        agent_id: AgentId,
        beliefs: Vec<Belief>,
        relationships: Vec<BeliefRelationship>,
    ) -> Self {
        let ids: BTreeSet<&BeliefId> = beliefs.iter().map(|b| &b.id).collect();
        let relationships = relationships
            .into_iter()
            .filter(|r| ids.contains(&r.source_belief_id) && ids.contains(&r.target_belief_id))
            .collect();
        Self {
            agent_id,
            generated_at: now_micros(),
            beliefs,
            relationships,
        }
    }

    pub fn belief_ids(&self) -> BTreeSet<&BeliefId> {
        self.beliefs.iter().map(|b| &b.id).collect()
    }
}

/// Aggregate graph totals for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub total_beliefs: u64,
    pub active_beliefs: u64,
    pub total_relationships: u64,
    pub active_relationships: u64,
    pub deprecated_beliefs: u64,
    /// `total_relationships / total_beliefs`, rounded to two places.
    pub density: f64,
}

/// Referential and temporal integrity findings for one agent's graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StructureReport {
    /// Relationships referencing a belief that no longer exists.
    pub orphaned: Vec<RelationshipId>,
    /// Relationships whose source and target are the same belief.
    pub self_referential: Vec<RelationshipId>,
    /// Relationships with `effective_from` after `effective_until`.
    pub temporally_invalid: Vec<RelationshipId>,
}

impl StructureReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty()
            && self.self_referential.is_empty()
            && self.temporally_invalid.is_empty()
    }
}

/// Storage contract for beliefs and conflicts.
///
/// Implemented once per backend strategy. All operations are scoped by
/// agent where an agent parameter is present; `None` means global.
#[async_trait]
pub trait BeliefStore: Send + Sync {
    /// Upsert a belief.
    ///
    /// # Postconditions
    /// - `created_at` of an existing record is preserved
    /// - `version` strictly increases across updates of the same id
    /// - `confidence` is stored clamped to `[0, 1]`
    /// - `last_updated` reflects this write
    async fn put(&self, belief: Belief) -> StoreResult<Belief>;

    /// Upsert a batch. Not atomic: items that fail are logged and skipped,
    /// and the successfully stored beliefs are returned.
    async fn put_many(&self, beliefs: Vec<Belief>) -> StoreResult<Vec<Belief>>;

    /// Fetch one belief by id, across all agents.
    async fn get(&self, id: &BeliefId) -> StoreResult<Option<Belief>>;

    /// Fetch many beliefs by id. Only found records are returned; presence
    /// is derived by id-set membership on the result.
    async fn get_many(&self, ids: &[BeliefId]) -> StoreResult<Vec<Belief>>;

    /// Hard-delete a belief. Returns false when the id was not stored.
    async fn delete(&self, id: &BeliefId) -> StoreResult<bool>;

    /// All beliefs of one agent, ordered by `last_updated` descending.
    /// A never-used agent yields an empty list.
    async fn for_agent(&self, agent: &AgentId, include_inactive: bool)
        -> StoreResult<Vec<Belief>>;

    /// One page of an agent's beliefs in `last_updated` descending order.
    /// Backs the streaming read path.
    async fn for_agent_page(
        &self,
        agent: &AgentId,
        include_inactive: bool,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Belief>>;

    /// Beliefs in one category, optionally scoped to an agent.
    async fn in_category(
        &self,
        category: &str,
        agent: Option<&AgentId>,
        include_inactive: bool,
    ) -> StoreResult<Vec<Belief>>;

    /// Active beliefs with confidence strictly below `threshold`.
    ///
    /// # Preconditions
    /// - `threshold` lies in `[0, 1]`
    async fn low_confidence(
        &self,
        threshold: f64,
        agent: Option<&AgentId>,
    ) -> StoreResult<Vec<Belief>>;

    /// Substring search over statements, ranked by confidence descending
    /// and capped at `limit`.
    async fn search_text(
        &self,
        query: &str,
        agent: Option<&AgentId>,
        limit: usize,
    ) -> StoreResult<Vec<Belief>>;

    /// Beliefs whose statements are similar to `statement`, paired with a
    /// similarity score in `[0, 1]`, highest first. A threshold of 1.0
    /// returns only exact matches after normalization.
    async fn find_similar(
        &self,
        statement: &str,
        agent: Option<&AgentId>,
        threshold: f64,
        limit: usize,
    ) -> StoreResult<Vec<(Belief, f64)>>;

    /// Record or replace a conflict.
    async fn put_conflict(&self, conflict: BeliefConflict) -> StoreResult<BeliefConflict>;

    async fn get_conflict(&self, id: &ConflictId) -> StoreResult<Option<BeliefConflict>>;

    /// Unresolved conflicts, optionally scoped to an agent.
    async fn unresolved_conflicts(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<Vec<BeliefConflict>>;

    /// Remove a conflict record. Returns false when absent.
    async fn remove_conflict(&self, id: &ConflictId) -> StoreResult<bool>;

    /// Number of stored beliefs. With `include_inactive` false, counts only
    /// active records; the inclusive count is always >= the active count.
    async fn count(&self, agent: Option<&AgentId>, include_inactive: bool) -> StoreResult<u64>;

    /// Belief counts per category.
    async fn distribution_by_category(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<HashMap<String, u64>>;

    /// Belief counts per confidence bucket: `high` (>= 0.8), `medium`
    /// (>= 0.5), `low` otherwise.
    async fn distribution_by_confidence_bucket(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<HashMap<String, u64>>;

    /// Every agent with at least one stored belief.
    async fn distinct_agents(&self) -> StoreResult<Vec<AgentId>>;

    /// Backend reachability combined with the store's own error rate.
    async fn healthy(&self) -> bool;
}

/// Storage contract for directed, typed edges between beliefs.
///
/// Endpoint existence is validated through the paired `BeliefStore`; a
/// create with an unknown endpoint fails with `BeliefMissing`.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Create an edge between two existing beliefs of `agent`.
    ///
    /// # Postconditions
    /// - `strength` is stored clamped to `[0, 1]`
    /// - `created_at` and `last_updated` are stamped
    async fn create(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        relationship_type: RelationshipType,
        strength: f64,
        agent: &AgentId,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> StoreResult<BeliefRelationship>;

    /// Create a time-bounded edge. `effective_from` must not exceed
    /// `effective_until`; equal bounds are accepted (empty effective set).
    #[allow(clippy::too_many_arguments)]
    async fn create_temporal(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        relationship_type: RelationshipType,
        strength: f64,
        agent: &AgentId,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
        effective_from: DateTime<Utc>,
        effective_until: Option<DateTime<Utc>>,
    ) -> StoreResult<BeliefRelationship>;

    /// Record that `old` is superseded by `new`: a DEPRECATES edge from
    /// `old` to `new` with strength 1.0 and the given reason.
    async fn deprecate(
        &self,
        old: &BeliefId,
        new: &BeliefId,
        reason: &str,
        agent: &AgentId,
    ) -> StoreResult<BeliefRelationship>;

    async fn get(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
    ) -> StoreResult<Option<BeliefRelationship>>;

    /// Update the strength of an edge, clamping and bumping `last_updated`.
    async fn update_strength(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
        strength: f64,
    ) -> StoreResult<BeliefRelationship>;

    /// Update strength and/or metadata in one write.
    async fn update(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
        strength: Option<f64>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> StoreResult<BeliefRelationship>;

    /// Flip the edge inactive. Idempotent; false when the id is unknown.
    async fn deactivate(&self, id: &RelationshipId, agent: &AgentId) -> StoreResult<bool>;

    /// Restore an inactive edge. Idempotent; false when the id is unknown.
    async fn reactivate(&self, id: &RelationshipId, agent: &AgentId) -> StoreResult<bool>;

    /// Edges where the belief is source or target.
    async fn for_belief(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>>;

    /// Edges whose source is the belief.
    async fn outgoing(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>>;

    /// Edges whose target is the belief.
    async fn incoming(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>>;

    /// Directed: edges from `source` to `target` only.
    async fn between(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>>;

    async fn by_type(
        &self,
        relationship_type: RelationshipType,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>>;

    async fn by_strength_gte(
        &self,
        threshold: f64,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>>;

    /// Edges currently effective at instant `at`.
    async fn effective_at(
        &self,
        at: DateTime<Utc>,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>>;

    /// Edges whose effective window closed before instant `at`.
    async fn expired_before(
        &self,
        at: DateTime<Utc>,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>>;

    async fn all(&self, agent: &AgentId) -> StoreResult<Vec<BeliefRelationship>>;

    async fn count(&self, agent: &AgentId) -> StoreResult<u64>;

    /// Edge counts per relationship-type code.
    async fn type_distribution(&self, agent: &AgentId) -> StoreResult<HashMap<String, u64>>;

    /// Mean strength per relationship-type code.
    async fn avg_strength_by_type(&self, agent: &AgentId) -> StoreResult<HashMap<String, f64>>;

    /// Edges referencing a belief the paired belief store no longer knows.
    async fn orphans(&self, agent: &AgentId) -> StoreResult<Vec<RelationshipId>>;

    /// Edges whose source equals their target.
    async fn self_refs(&self, agent: &AgentId) -> StoreResult<Vec<RelationshipId>>;

    /// Edges whose effective window is inverted.
    async fn temporally_invalid(&self, agent: &AgentId) -> StoreResult<Vec<RelationshipId>>;

    /// Create a batch of edges. Endpoints are validated collectively; the
    /// batch is not atomic and successfully created edges are returned.
    async fn bulk_create(
        &self,
        specs: Vec<RelationshipSpec>,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>>;

    /// Set the strength of many edges. Returns the number updated.
    async fn set_strength_many(
        &self,
        ids: &[RelationshipId],
        agent: &AgentId,
        strength: f64,
    ) -> StoreResult<u64>;

    async fn deactivate_many(&self, ids: &[RelationshipId], agent: &AgentId) -> StoreResult<u64>;

    async fn reactivate_many(&self, ids: &[RelationshipId], agent: &AgentId) -> StoreResult<u64>;

    async fn delete_many(&self, ids: &[RelationshipId], agent: &AgentId) -> StoreResult<u64>;

    /// Hard-delete inactive edges last touched more than `older_than_days`
    /// days ago. Returns the number removed.
    async fn delete_old_inactive(&self, agent: &AgentId, older_than_days: i64) -> StoreResult<u64>;

    async fn healthy(&self) -> bool;
}

/// Read-only graph operations composed over a belief store and a
/// relationship store. Implementations never issue writes.
#[async_trait]
pub trait GraphQuery: Send + Sync {
    async fn statistics(&self, agent: &AgentId) -> StoreResult<GraphStatistics>;

    async fn type_distribution(&self, agent: &AgentId) -> StoreResult<HashMap<String, u64>>;

    /// Lazy, finite sequence of an agent's beliefs in `last_updated`
    /// descending order, fetched page by page.
    async fn stream_beliefs(
        &self,
        agent: &AgentId,
        include_inactive: bool,
        page_size: usize,
    ) -> StoreResult<BoxStream<'static, StoreResult<Belief>>>;

    /// Beliefs adjacent to `belief`, deduplicated preserving first-seen
    /// order and capped at `limit`.
    async fn connected(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
        direction: Direction,
        types: Option<&[RelationshipType]>,
        limit: usize,
    ) -> StoreResult<Vec<Belief>>;

    /// Number of edges incident to `belief` in the given direction.
    async fn degree(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
        direction: Direction,
    ) -> StoreResult<u64>;

    /// Whether an edge connects `a` and `b` in either direction.
    async fn directly_connected(
        &self,
        a: &BeliefId,
        b: &BeliefId,
        agent: &AgentId,
        types: Option<&[RelationshipType]>,
    ) -> StoreResult<bool>;

    /// Distinct targets of DEPRECATES edges, capped at `limit`.
    async fn deprecated_belief_ids(
        &self,
        agent: &AgentId,
        limit: usize,
    ) -> StoreResult<Vec<BeliefId>>;

    /// Sources of deprecating edges targeting `belief`, resolved.
    async fn superseding_belief_ids(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<Belief>>;

    /// Breadth-first walk over outgoing deprecating edges starting at
    /// `belief`, including the start. `max_depth` 0 means unbounded.
    async fn deprecation_chain(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
        max_depth: usize,
    ) -> StoreResult<Vec<Belief>>;

    /// Belief ids reachable from `start` within `max_depth` hops. With no
    /// direction the projection is undirected; a type filter restricts
    /// which edges are admitted. The start itself is excluded.
    async fn reachable(
        &self,
        start: &BeliefId,
        agent: &AgentId,
        max_depth: usize,
        types: Option<&[RelationshipType]>,
        direction: Option<Direction>,
    ) -> StoreResult<BTreeSet<BeliefId>>;

    /// Edges composing the shortest directed path from `src` to `dst`, or
    /// empty when no path exists within `max_depth` (0 = unbounded) or when
    /// `src == dst`.
    async fn shortest_path(
        &self,
        src: &BeliefId,
        dst: &BeliefId,
        agent: &AgentId,
        max_depth: usize,
    ) -> StoreResult<Vec<BeliefRelationship>>;

    async fn validate_structure(&self, agent: &AgentId) -> StoreResult<StructureReport>;

    /// Rough resident-size estimate: 1024 bytes per belief plus 512 per
    /// relationship.
    async fn memory_usage_estimate(&self, agent: &AgentId) -> StoreResult<u64>;

    async fn average_relationship_strength(
        &self,
        agent: &AgentId,
        include_inactive: bool,
    ) -> StoreResult<f64>;

    async fn snapshot(
        &self,
        agent: &AgentId,
        include_inactive: bool,
    ) -> StoreResult<KnowledgeGraphSnapshot>;

    /// Snapshot restricted to the given belief ids and/or edge types,
    /// capped at `max_beliefs` beliefs.
    async fn filtered_snapshot(
        &self,
        agent: &AgentId,
        belief_ids: Option<&[BeliefId]>,
        types: Option<&[RelationshipType]>,
        max_beliefs: usize,
    ) -> StoreResult<KnowledgeGraphSnapshot>;

    /// Materialize a snapshot and hand it to the configured exporter with
    /// the opaque `format` tag.
    async fn export_snapshot(&self, agent: &AgentId, format: &str) -> StoreResult<Vec<u8>>;
}
