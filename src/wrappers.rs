// Wrapper Components
// Decorators that add tracing and operation counting around the store
// contracts without changing their semantics. Production bundles are
// assembled with these through the factory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::contracts::{
    Belief, BeliefConflict, BeliefRelationship, BeliefStore, RelationshipSpec, RelationshipStore,
};
use crate::errors::StoreResult;
use crate::types::{AgentId, BeliefId, ConflictId, RelationshipId, RelationshipType};

/// Belief store wrapper that logs every operation under one trace id and
/// counts operations performed.
pub struct TracedBeliefStore {
    inner: Arc<dyn BeliefStore>,
    trace_id: Uuid,
    operations: AtomicU64,
}

impl TracedBeliefStore {
    pub fn new(inner: Arc<dyn BeliefStore>) -> Self {
        Self {
            inner,
            trace_id: Uuid::new_v4(),
            operations: AtomicU64::new(0),
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    fn observe(&self, operation: &str) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        debug!(trace_id = %self.trace_id, operation, "belief store call");
    }
}

#[async_trait]
impl BeliefStore for TracedBeliefStore {
    async fn put(&self, belief: Belief) -> StoreResult<Belief> {
        self.observe("put");
        self.inner.put(belief).await
    }

    async fn put_many(&self, beliefs: Vec<Belief>) -> StoreResult<Vec<Belief>> {
        self.observe("put_many");
        self.inner.put_many(beliefs).await
    }

    async fn get(&self, id: &BeliefId) -> StoreResult<Option<Belief>> {
        self.observe("get");
        self.inner.get(id).await
    }

    async fn get_many(&self, ids: &[BeliefId]) -> StoreResult<Vec<Belief>> {
        self.observe("get_many");
        self.inner.get_many(ids).await
    }

    async fn delete(&self, id: &BeliefId) -> StoreResult<bool> {
        self.observe("delete");
        self.inner.delete(id).await
    }

    async fn for_agent(
        &self,
        agent: &AgentId,
        include_inactive: bool,
    ) -> StoreResult<Vec<Belief>> {
        self.observe("for_agent");
        self.inner.for_agent(agent, include_inactive).await
    }

    async fn for_agent_page(
        &self,
        agent: &AgentId,
        include_inactive: bool,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Belief>> {
        self.observe("for_agent_page");
        self.inner
            .for_agent_page(agent, include_inactive, offset, limit)
            .await
    }

    async fn in_category(
        &self,
        category: &str,
        agent: Option<&AgentId>,
        include_inactive: bool,
    ) -> StoreResult<Vec<Belief>> {
        self.observe("in_category");
        self.inner.in_category(category, agent, include_inactive).await
    }

    async fn low_confidence(
        &self,
        threshold: f64,
        agent: Option<&AgentId>,
    ) -> StoreResult<Vec<Belief>> {
        self.observe("low_confidence");
        self.inner.low_confidence(threshold, agent).await
    }

    async fn search_text(
        &self,
        query: &str,
        agent: Option<&AgentId>,
        limit: usize,
    ) -> StoreResult<Vec<Belief>> {
        self.observe("search_text");
        self.inner.search_text(query, agent, limit).await
    }

    async fn find_similar(
        &self,
        statement: &str,
        agent: Option<&AgentId>,
        threshold: f64,
        limit: usize,
    ) -> StoreResult<Vec<(Belief, f64)>> {
        self.observe("find_similar");
        self.inner
            .find_similar(statement, agent, threshold, limit)
            .await
    }

    async fn put_conflict(&self, conflict: BeliefConflict) -> StoreResult<BeliefConflict> {
        self.observe("put_conflict");
        self.inner.put_conflict(conflict).await
    }

    async fn get_conflict(&self, id: &ConflictId) -> StoreResult<Option<BeliefConflict>> {
        self.observe("get_conflict");
        self.inner.get_conflict(id).await
    }

    async fn unresolved_conflicts(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<Vec<BeliefConflict>> {
        self.observe("unresolved_conflicts");
        self.inner.unresolved_conflicts(agent).await
    }

    async fn remove_conflict(&self, id: &ConflictId) -> StoreResult<bool> {
        self.observe("remove_conflict");
        self.inner.remove_conflict(id).await
    }

    async fn count(&self, agent: Option<&AgentId>, include_inactive: bool) -> StoreResult<u64> {
        self.observe("count");
        self.inner.count(agent, include_inactive).await
    }

    async fn distribution_by_category(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<HashMap<String, u64>> {
        self.observe("distribution_by_category");
        self.inner.distribution_by_category(agent).await
    }

    async fn distribution_by_confidence_bucket(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<HashMap<String, u64>> {
        self.observe("distribution_by_confidence_bucket");
        self.inner.distribution_by_confidence_bucket(agent).await
    }

    async fn distinct_agents(&self) -> StoreResult<Vec<AgentId>> {
        self.observe("distinct_agents");
        self.inner.distinct_agents().await
    }

    async fn healthy(&self) -> bool {
        self.inner.healthy().await
    }
}

/// Relationship store wrapper mirroring `TracedBeliefStore`.
pub struct TracedRelationshipStore {
    inner: Arc<dyn RelationshipStore>,
    trace_id: Uuid,
    operations: AtomicU64,
}

impl TracedRelationshipStore {
    pub fn new(inner: Arc<dyn RelationshipStore>) -> Self {
        Self {
            inner,
            trace_id: Uuid::new_v4(),
            operations: AtomicU64::new(0),
        }
    }

    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    fn observe(&self, operation: &str) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        debug!(trace_id = %self.trace_id, operation, "relationship store call");
    }
}

#[async_trait]
impl RelationshipStore for TracedRelationshipStore {
    async fn create(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        relationship_type: RelationshipType,
        strength: f64,
        agent: &AgentId,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> StoreResult<BeliefRelationship> {
        self.observe("create");
        self.inner
            .create(source, target, relationship_type, strength, agent, metadata)
            .await
    }

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
    ) -> StoreResult<BeliefRelationship> {
        self.observe("create_temporal");
        self.inner
            .create_temporal(
                source,
                target,
                relationship_type,
                strength,
                agent,
                metadata,
                effective_from,
                effective_until,
            )
            .await
    }

    async fn deprecate(
        &self,
        old: &BeliefId,
        new: &BeliefId,
        reason: &str,
        agent: &AgentId,
    ) -> StoreResult<BeliefRelationship> {
        self.observe("deprecate");
        self.inner.deprecate(old, new, reason, agent).await
    }

    async fn get(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
    ) -> StoreResult<Option<BeliefRelationship>> {
        self.observe("get");
        self.inner.get(id, agent).await
    }

    async fn update_strength(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
        strength: f64,
    ) -> StoreResult<BeliefRelationship> {
        self.observe("update_strength");
        self.inner.update_strength(id, agent, strength).await
    }

    async fn update(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
        strength: Option<f64>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> StoreResult<BeliefRelationship> {
        self.observe("update");
        self.inner.update(id, agent, strength, metadata).await
    }

    async fn deactivate(&self, id: &RelationshipId, agent: &AgentId) -> StoreResult<bool> {
        self.observe("deactivate");
        self.inner.deactivate(id, agent).await
    }

    async fn reactivate(&self, id: &RelationshipId, agent: &AgentId) -> StoreResult<bool> {
        self.observe("reactivate");
        self.inner.reactivate(id, agent).await
    }

    async fn for_belief(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        self.observe("for_belief");
        self.inner.for_belief(belief, agent).await
    }

    async fn outgoing(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        self.observe("outgoing");
        self.inner.outgoing(belief, agent).await
    }

    async fn incoming(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        self.observe("incoming");
        self.inner.incoming(belief, agent).await
    }

    async fn between(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        self.observe("between");
        self.inner.between(source, target, agent).await
    }

    async fn by_type(
        &self,
        relationship_type: RelationshipType,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        self.observe("by_type");
        self.inner.by_type(relationship_type, agent).await
    }

    async fn by_strength_gte(
        &self,
        threshold: f64,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        self.observe("by_strength_gte");
        self.inner.by_strength_gte(threshold, agent).await
    }

    async fn effective_at(
        &self,
        at: DateTime<Utc>,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        self.observe("effective_at");
        self.inner.effective_at(at, agent).await
    }

    async fn expired_before(
        &self,
        at: DateTime<Utc>,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        self.observe("expired_before");
        self.inner.expired_before(at, agent).await
    }

    async fn all(&self, agent: &AgentId) -> StoreResult<Vec<BeliefRelationship>> {
        self.observe("all");
        self.inner.all(agent).await
    }

    async fn count(&self, agent: &AgentId) -> StoreResult<u64> {
        self.observe("count");
        self.inner.count(agent).await
    }

    async fn type_distribution(&self, agent: &AgentId) -> StoreResult<HashMap<String, u64>> {
        self.observe("type_distribution");
        self.inner.type_distribution(agent).await
    }

    async fn avg_strength_by_type(&self, agent: &AgentId) -> StoreResult<HashMap<String, f64>> {
        self.observe("avg_strength_by_type");
        self.inner.avg_strength_by_type(agent).await
    }

    async fn orphans(&self, agent: &AgentId) -> StoreResult<Vec<RelationshipId>> {
        self.observe("orphans");
        self.inner.orphans(agent).await
    }

    async fn self_refs(&self, agent: &AgentId) -> StoreResult<Vec<RelationshipId>> {
        self.observe("self_refs");
        self.inner.self_refs(agent).await
    }

    async fn temporally_invalid(&self, agent: &AgentId) -> StoreResult<Vec<RelationshipId>> {
        self.observe("temporally_invalid");
        self.inner.temporally_invalid(agent).await
    }

    async fn bulk_create(
        &self,
        specs: Vec<RelationshipSpec>,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        self.observe("bulk_create");
        self.inner.bulk_create(specs, agent).await
    }

    async fn set_strength_many(
        &self,
        ids: &[RelationshipId],
        agent: &AgentId,
        strength: f64,
    ) -> StoreResult<u64> {
        self.observe("set_strength_many");
        self.inner.set_strength_many(ids, agent, strength).await
    }

    async fn deactivate_many(&self, ids: &[RelationshipId], agent: &AgentId) -> StoreResult<u64> {
        self.observe("deactivate_many");
        self.inner.deactivate_many(ids, agent).await
    }

    async fn reactivate_many(&self, ids: &[RelationshipId], agent: &AgentId) -> StoreResult<u64> {
        self.observe("reactivate_many");
        self.inner.reactivate_many(ids, agent).await
    }

    async fn delete_many(&self, ids: &[RelationshipId], agent: &AgentId) -> StoreResult<u64> {
        self.observe("delete_many");
        self.inner.delete_many(ids, agent).await
    }

    async fn delete_old_inactive(&self, agent: &AgentId, older_than_days: i64) -> StoreResult<u64> {
        self.observe("delete_old_inactive");
        self.inner.delete_old_inactive(agent, older_than_days).await
    }

    async fn healthy(&self) -> bool {
        self.inner.healthy().await
    }
}
