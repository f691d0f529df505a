// Relationship Stores
// Directed, typed, weighted edges between beliefs, one strategy per
// backend. Both strategies validate endpoints through the paired belief
// store, so BeliefMissing semantics are identical across backends.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::{
    BatchUpdate, DocumentBackend, FieldMapping, FieldType, IndexMapping, QueryNode, RefreshPolicy,
    RelationalBackend, RelationalTransaction, Row, RowQuery, SortSpec,
};
use crate::contracts::{BeliefRelationship, BeliefStore, RelationshipSpec, RelationshipStore};
use crate::document_store::{format_ts, parse_ts};
use crate::errors::{StorageError, StoreResult};
use crate::observability::HealthTracker;
use crate::operations::{base_search, index_name, queries, ExistenceCache, StoreConfig};
use crate::relational_store::run_in_txn;
use crate::types::{clamp_unit, now_micros, AgentId, BeliefId, RelationshipId, RelationshipType};
use crate::validation;

pub(crate) const TABLE_RELATIONSHIP: &str = "belief_relationship";

/// Check both endpoints exist and belong to `agent`.
///
/// Both strategies reuse this check, so `get_many` is the single source of
/// endpoint truth.
async fn validate_endpoints(
    beliefs: &dyn BeliefStore,
    agent: &AgentId,
    ids: &[&BeliefId],
) -> StoreResult<()> {
    let unique: Vec<BeliefId> = ids
        .iter()
        .map(|id| (*id).clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let found = beliefs.get_many(&unique).await?;
    let known: BTreeSet<&BeliefId> = found
        .iter()
        .filter(|b| &b.agent_id == agent)
        .map(|b| &b.id)
        .collect();
    for id in &unique {
        if !known.contains(id) {
            return Err(StorageError::belief_missing(id.as_str(), agent.as_str()));
        }
    }
    Ok(())
}

fn check_temporal_order(
    effective_from: DateTime<Utc>,
    effective_until: Option<DateTime<Utc>>,
) -> StoreResult<()> {
    if let Some(until) = effective_until {
        if effective_from > until {
            return Err(StorageError::TemporalInvalid {
                effective_from,
                effective_until: until,
            });
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_relationship(
    source: &BeliefId,
    target: &BeliefId,
    relationship_type: RelationshipType,
    strength: f64,
    agent: &AgentId,
    metadata: Option<serde_json::Map<String, Value>>,
    effective_from: Option<DateTime<Utc>>,
    effective_until: Option<DateTime<Utc>>,
    deprecation_reason: Option<String>,
) -> BeliefRelationship {
    let now = now_micros();
    BeliefRelationship {
        id: RelationshipId::generate(),
        agent_id: agent.clone(),
        source_belief_id: source.clone(),
        target_belief_id: target.clone(),
        relationship_type,
        strength: clamp_unit(strength),
        active: true,
        created_at: now,
        last_updated: now,
        effective_from: effective_from.map(|t| t.trunc_subsecs(6)),
        effective_until: effective_until.map(|t| t.trunc_subsecs(6)),
        metadata: metadata.unwrap_or_default(),
        deprecation_reason,
    }
}

/// Explicit relationship -> document mapper. The same shape doubles as the
/// relational row, with metadata held in an opaque JSON column.
fn relationship_to_document(rel: &BeliefRelationship) -> Value {
    json!({
        "id": rel.id.as_str(),
        "agent_id": rel.agent_id.as_str(),
        "source_belief_id": rel.source_belief_id.as_str(),
        "target_belief_id": rel.target_belief_id.as_str(),
        "relationship_type": rel.relationship_type.code(),
        "strength": rel.strength,
        "active": rel.active,
        "created_at": format_ts(rel.created_at),
        "last_updated": format_ts(rel.last_updated),
        "effective_from": rel.effective_from.map(format_ts),
        "effective_until": rel.effective_until.map(format_ts),
        "metadata": Value::Object(rel.metadata.clone()),
        "deprecation_reason": rel.deprecation_reason,
    })
}

fn document_to_relationship(doc: &Value) -> StoreResult<BeliefRelationship> {
    let fields = doc
        .as_object()
        .ok_or_else(|| StorageError::serialization("relationship document is not an object"))?;
    let field_str = |name: &str| -> StoreResult<&str> {
        fields
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| StorageError::serialization(format!("missing field '{name}'")))
    };

    let code = field_str("relationship_type")?;
    let relationship_type = RelationshipType::from_code(code).ok_or_else(|| {
        StorageError::serialization(format!("unknown relationship type code '{code}'"))
    })?;

    Ok(BeliefRelationship {
        id: RelationshipId::new(field_str("id")?)?,
        agent_id: AgentId::new(field_str("agent_id")?)?,
        source_belief_id: BeliefId::new(field_str("source_belief_id")?)?,
        target_belief_id: BeliefId::new(field_str("target_belief_id")?)?,
        relationship_type,
        strength: clamp_unit(
            fields
                .get("strength")
                .and_then(Value::as_f64)
                .ok_or_else(|| StorageError::serialization("missing field 'strength'"))?,
        ),
        active: fields
            .get("active")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        created_at: parse_ts(field_str("created_at")?)?,
        last_updated: parse_ts(field_str("last_updated")?)?,
        effective_from: match fields.get("effective_from").and_then(Value::as_str) {
            Some(raw) => Some(parse_ts(raw)?),
            None => None,
        },
        effective_until: match fields.get("effective_until").and_then(Value::as_str) {
            Some(raw) => Some(parse_ts(raw)?),
            None => None,
        },
        metadata: fields
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        deprecation_reason: fields
            .get("deprecation_reason")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn relationship_mapping() -> IndexMapping {
    IndexMapping {
        fields: vec![
            FieldMapping::new("id", FieldType::Keyword),
            FieldMapping::new("agent_id", FieldType::Keyword),
            FieldMapping::new("source_belief_id", FieldType::Keyword),
            FieldMapping::new("target_belief_id", FieldType::Keyword),
            FieldMapping::new("relationship_type", FieldType::Keyword),
            FieldMapping::new("strength", FieldType::Double),
            FieldMapping::new("active", FieldType::Boolean),
            FieldMapping::new("created_at", FieldType::Date),
            FieldMapping::new("last_updated", FieldType::Date),
            FieldMapping::new("effective_from", FieldType::Date),
            FieldMapping::new("effective_until", FieldType::Date),
            FieldMapping::unindexed("metadata", FieldType::Object),
            FieldMapping::new("deprecation_reason", FieldType::Text),
        ],
    }
}

mod rel_queries {
    use super::*;

    pub fn for_belief(belief: &BeliefId) -> QueryNode {
        queries::any_of(vec![
            queries::term("source_belief_id", belief.as_str()),
            queries::term("target_belief_id", belief.as_str()),
        ])
    }

    pub fn effective_at(at: DateTime<Utc>) -> QueryNode {
        let at = format_ts(at);
        queries::all_of(vec![
            queries::active_only(),
            queries::any_of(vec![
                queries::negate(queries::exists("effective_from")),
                QueryNode::Range {
                    field: "effective_from".into(),
                    gte: None,
                    gt: None,
                    lte: Some(at.clone().into()),
                    lt: None,
                },
            ]),
            queries::any_of(vec![
                queries::negate(queries::exists("effective_until")),
                QueryNode::Range {
                    field: "effective_until".into(),
                    gte: None,
                    gt: Some(at.into()),
                    lte: None,
                    lt: None,
                },
            ]),
        ])
    }

    pub fn expired_before(at: DateTime<Utc>) -> QueryNode {
        queries::all_of(vec![
            queries::exists("effective_until"),
            QueryNode::Range {
                field: "effective_until".into(),
                gte: None,
                gt: None,
                lte: Some(format_ts(at).into()),
                lt: None,
            },
        ])
    }

    pub fn strength_gte(threshold: f64) -> QueryNode {
        QueryNode::Range {
            field: "strength".into(),
            gte: Some(threshold.into()),
            gt: None,
            lte: None,
            lt: None,
        }
    }

    pub fn inactive_older_than(cutoff: DateTime<Utc>) -> QueryNode {
        queries::all_of(vec![
            queries::term("active", false),
            QueryNode::Range {
                field: "last_updated".into(),
                gte: None,
                gt: None,
                lte: None,
                lt: Some(format_ts(cutoff).into()),
            },
        ])
    }

    pub fn ids(ids: &[RelationshipId]) -> QueryNode {
        queries::terms(
            "id",
            ids.iter().map(|id| Value::from(id.as_str())).collect(),
        )
    }
}

/// Client-side validation shared by both strategies.
async fn find_orphans(
    beliefs: &dyn BeliefStore,
    edges: &[BeliefRelationship],
) -> StoreResult<Vec<RelationshipId>> {
    let referenced: BTreeSet<BeliefId> = edges
        .iter()
        .flat_map(|r| {
            [
                r.source_belief_id.clone(),
                r.target_belief_id.clone(),
            ]
        })
        .collect();
    if referenced.is_empty() {
        return Ok(Vec::new());
    }
    let referenced: Vec<BeliefId> = referenced.into_iter().collect();
    let found = beliefs.get_many(&referenced).await?;
    let known: BTreeSet<&BeliefId> = found.iter().map(|b| &b.id).collect();
    Ok(edges
        .iter()
        .filter(|r| {
            !known.contains(&r.source_belief_id) || !known.contains(&r.target_belief_id)
        })
        .map(|r| r.id.clone())
        .collect())
}

fn find_self_refs(edges: &[BeliefRelationship]) -> Vec<RelationshipId> {
    edges
        .iter()
        .filter(|r| r.source_belief_id == r.target_belief_id)
        .map(|r| r.id.clone())
        .collect()
}

fn find_temporally_invalid(edges: &[BeliefRelationship]) -> Vec<RelationshipId> {
    edges
        .iter()
        .filter(|r| match (r.effective_from, r.effective_until) {
            (Some(from), Some(until)) => from > until,
            _ => false,
        })
        .map(|r| r.id.clone())
        .collect()
}

/// `RelationshipStore` strategy over the document/search engine. Edges of
/// one agent live in that agent's relationship index.
pub struct DocumentRelationshipStore {
    backend: Arc<dyn DocumentBackend>,
    beliefs: Arc<dyn BeliefStore>,
    config: StoreConfig,
    cache: Arc<ExistenceCache>,
    health: HealthTracker,
}

impl DocumentRelationshipStore {
    pub fn new(
        backend: Arc<dyn DocumentBackend>,
        beliefs: Arc<dyn BeliefStore>,
        config: StoreConfig,
    ) -> Self {
        Self {
            backend,
            beliefs,
            config,
            cache: Arc::new(ExistenceCache::new()),
            health: HealthTracker::new(),
        }
    }

    fn rel_index(&self, agent: &AgentId) -> String {
        index_name(
            &self.config.relationship_index_prefix,
            agent,
            &self.config.index_version_suffix,
        )
    }

    async fn ensure_index(&self, name: &str) -> StoreResult<()> {
        if !self.config.auto_create_indices {
            return Ok(());
        }
        let backend = Arc::clone(&self.backend);
        let exists = self
            .cache
            .check_or_probe(name, || {
                let backend = Arc::clone(&backend);
                let name = name.to_string();
                async move { backend.index_exists(&name).await }
            })
            .await?;
        if exists {
            return Ok(());
        }
        match self.backend.create_index(name, &relationship_mapping()).await {
            Ok(()) => {
                debug!(index = name, "created relationship index");
                self.cache.mark_exists(name);
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                self.cache.mark_exists(name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn index_ready(&self, agent: &AgentId) -> StoreResult<Option<String>> {
        let name = self.rel_index(agent);
        let backend = Arc::clone(&self.backend);
        let exists = self
            .cache
            .check_or_probe(&name, || {
                let backend = Arc::clone(&backend);
                let name = name.clone();
                async move { backend.index_exists(&name).await }
            })
            .await?;
        Ok(exists.then_some(name))
    }

    async fn search_rels(
        &self,
        agent: &AgentId,
        query: QueryNode,
        sort: Vec<SortSpec>,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let Some(index) = self.index_ready(agent).await? else {
            return Ok(Vec::new());
        };
        let mut request = base_search(&self.config, index, query);
        request.sort = sort;
        crate::observability::record_query();
        let response = self.backend.search(&request).await?;
        response
            .hits
            .iter()
            .map(|hit| document_to_relationship(&hit.source))
            .collect()
    }

    async fn persist(&self, rel: &BeliefRelationship) -> StoreResult<()> {
        let index = self.rel_index(&rel.agent_id);
        self.ensure_index(&index).await?;
        self.backend
            .put_document(
                &index,
                rel.id.as_str(),
                relationship_to_document(rel),
                RefreshPolicy::WaitFor,
            )
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_impl(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        relationship_type: RelationshipType,
        strength: f64,
        agent: &AgentId,
        metadata: Option<serde_json::Map<String, Value>>,
        effective_from: Option<DateTime<Utc>>,
        effective_until: Option<DateTime<Utc>>,
        deprecation_reason: Option<String>,
    ) -> StoreResult<BeliefRelationship> {
        validate_endpoints(self.beliefs.as_ref(), agent, &[source, target]).await?;
        let rel = build_relationship(
            source,
            target,
            relationship_type,
            strength,
            agent,
            metadata,
            effective_from,
            effective_until,
            deprecation_reason,
        );
        self.persist(&rel).await?;
        Ok(rel)
    }

    async fn get_impl(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
    ) -> StoreResult<Option<BeliefRelationship>> {
        let Some(index) = self.index_ready(agent).await? else {
            return Ok(None);
        };
        let doc = self.backend.get_document(&index, id.as_str()).await?;
        doc.as_ref().map(document_to_relationship).transpose()
    }

    async fn mutate(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
        apply: impl FnOnce(&mut BeliefRelationship),
    ) -> StoreResult<Option<BeliefRelationship>> {
        let Some(mut rel) = self.get_impl(id, agent).await? else {
            return Ok(None);
        };
        apply(&mut rel);
        rel.strength = clamp_unit(rel.strength);
        rel.last_updated = now_micros();
        self.persist(&rel).await?;
        Ok(Some(rel))
    }
}

#[async_trait]
impl RelationshipStore for DocumentRelationshipStore {
    async fn create(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        relationship_type: RelationshipType,
        strength: f64,
        agent: &AgentId,
        metadata: Option<serde_json::Map<String, Value>>,
    ) -> StoreResult<BeliefRelationship> {
        self.health.track(
            self.create_impl(
                source,
                target,
                relationship_type,
                strength,
                agent,
                metadata,
                None,
                None,
                None,
            )
            .await,
        )
    }

    async fn create_temporal(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        relationship_type: RelationshipType,
        strength: f64,
        agent: &AgentId,
        metadata: Option<serde_json::Map<String, Value>>,
        effective_from: DateTime<Utc>,
        effective_until: Option<DateTime<Utc>>,
    ) -> StoreResult<BeliefRelationship> {
        let result = async {
            check_temporal_order(effective_from, effective_until)?;
            self.create_impl(
                source,
                target,
                relationship_type,
                strength,
                agent,
                metadata,
                Some(effective_from),
                effective_until,
                None,
            )
            .await
        }
        .await;
        self.health.track(result)
    }

    async fn deprecate(
        &self,
        old: &BeliefId,
        new: &BeliefId,
        reason: &str,
        agent: &AgentId,
    ) -> StoreResult<BeliefRelationship> {
        let result = async {
            validation::non_blank("reason", reason)?;
            self.create_impl(
                old,
                new,
                RelationshipType::Deprecates,
                1.0,
                agent,
                None,
                None,
                None,
                Some(reason.to_string()),
            )
            .await
        }
        .await;
        self.health.track(result)
    }

    async fn get(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
    ) -> StoreResult<Option<BeliefRelationship>> {
        self.health.track(self.get_impl(id, agent).await)
    }

    async fn update_strength(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
        strength: f64,
    ) -> StoreResult<BeliefRelationship> {
        let result = async {
            self.mutate(id, agent, |rel| rel.strength = strength)
                .await?
                .ok_or_else(|| StorageError::not_found("relationship", id.as_str()))
        }
        .await;
        self.health.track(result)
    }

    async fn update(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
        strength: Option<f64>,
        metadata: Option<serde_json::Map<String, Value>>,
    ) -> StoreResult<BeliefRelationship> {
        let result = async {
            self.mutate(id, agent, |rel| {
                if let Some(strength) = strength {
                    rel.strength = strength;
                }
                if let Some(metadata) = metadata {
                    rel.metadata = metadata;
                }
            })
            .await?
            .ok_or_else(|| StorageError::not_found("relationship", id.as_str()))
        }
        .await;
        self.health.track(result)
    }

    async fn deactivate(&self, id: &RelationshipId, agent: &AgentId) -> StoreResult<bool> {
        let result = self
            .mutate(id, agent, |rel| rel.active = false)
            .await
            .map(|updated| updated.is_some());
        self.health.track(result)
    }

    async fn reactivate(&self, id: &RelationshipId, agent: &AgentId) -> StoreResult<bool> {
        let result = self
            .mutate(id, agent, |rel| rel.active = true)
            .await
            .map(|updated| updated.is_some());
        self.health.track(result)
    }

    async fn for_belief(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .search_rels(
                agent,
                rel_queries::for_belief(belief),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn outgoing(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .search_rels(
                agent,
                queries::term("source_belief_id", belief.as_str()),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn incoming(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .search_rels(
                agent,
                queries::term("target_belief_id", belief.as_str()),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn between(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .search_rels(
                agent,
                queries::all_of(vec![
                    queries::term("source_belief_id", source.as_str()),
                    queries::term("target_belief_id", target.as_str()),
                ]),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn by_type(
        &self,
        relationship_type: RelationshipType,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .search_rels(
                agent,
                queries::term("relationship_type", relationship_type.code()),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn by_strength_gte(
        &self,
        threshold: f64,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = async {
            validation::unit_interval("threshold", threshold)?;
            self.search_rels(
                agent,
                rel_queries::strength_gte(threshold),
                vec![SortSpec::desc("strength")],
            )
            .await
        }
        .await;
        self.health.track(result)
    }

    async fn effective_at(
        &self,
        at: DateTime<Utc>,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .search_rels(
                agent,
                rel_queries::effective_at(at),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn expired_before(
        &self,
        at: DateTime<Utc>,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .search_rels(
                agent,
                rel_queries::expired_before(at),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn all(&self, agent: &AgentId) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .search_rels(
                agent,
                queries::match_all(),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn count(&self, agent: &AgentId) -> StoreResult<u64> {
        let result = async {
            let Some(index) = self.index_ready(agent).await? else {
                return Ok(0);
            };
            self.backend.count(&index, &queries::match_all()).await
        }
        .await;
        self.health.track(result)
    }

    async fn type_distribution(&self, agent: &AgentId) -> StoreResult<HashMap<String, u64>> {
        let result = async {
            let Some(index) = self.index_ready(agent).await? else {
                return Ok(HashMap::new());
            };
            self.backend
                .terms_aggregation(&index, "relationship_type", &queries::match_all())
                .await
        }
        .await;
        self.health.record(result.is_ok());
        match result {
            Ok(counts) => Ok(counts),
            Err(e) => {
                warn!(error = %e, "type aggregation failed");
                Ok(HashMap::new())
            }
        }
    }

    async fn avg_strength_by_type(&self, agent: &AgentId) -> StoreResult<HashMap<String, f64>> {
        let result = async {
            let Some(index) = self.index_ready(agent).await? else {
                return Ok(HashMap::new());
            };
            self.backend
                .avg_aggregation(&index, "relationship_type", "strength", &queries::match_all())
                .await
        }
        .await;
        self.health.record(result.is_ok());
        match result {
            Ok(avgs) => Ok(avgs),
            Err(e) => {
                warn!(error = %e, "strength aggregation failed");
                Ok(HashMap::new())
            }
        }
    }

    async fn orphans(&self, agent: &AgentId) -> StoreResult<Vec<RelationshipId>> {
        let result = async {
            let edges = self.all(agent).await?;
            find_orphans(self.beliefs.as_ref(), &edges).await
        }
        .await;
        self.health.track(result)
    }

    async fn self_refs(&self, agent: &AgentId) -> StoreResult<Vec<RelationshipId>> {
        let result = async { Ok(find_self_refs(&self.all(agent).await?)) }.await;
        self.health.track(result)
    }

    async fn temporally_invalid(&self, agent: &AgentId) -> StoreResult<Vec<RelationshipId>> {
        let result = async { Ok(find_temporally_invalid(&self.all(agent).await?)) }.await;
        self.health.track(result)
    }

    async fn bulk_create(
        &self,
        specs: Vec<RelationshipSpec>,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = async {
            if specs.is_empty() {
                return Ok(Vec::new());
            }
            let endpoint_refs: Vec<&BeliefId> = specs
                .iter()
                .flat_map(|s| [&s.source_belief_id, &s.target_belief_id])
                .collect();
            validate_endpoints(self.beliefs.as_ref(), agent, &endpoint_refs).await?;

            let index = self.rel_index(agent);
            self.ensure_index(&index).await?;

            let rels: Vec<BeliefRelationship> = specs
                .iter()
                .map(|spec| {
                    build_relationship(
                        &spec.source_belief_id,
                        &spec.target_belief_id,
                        spec.relationship_type,
                        spec.strength,
                        agent,
                        Some(spec.metadata.clone()),
                        None,
                        None,
                        None,
                    )
                })
                .collect();

            let documents = rels
                .iter()
                .map(|rel| (rel.id.as_str().to_string(), relationship_to_document(rel)))
                .collect();
            let outcome = self
                .backend
                .bulk_put(&index, documents, RefreshPolicy::WaitFor)
                .await?;
            for error in &outcome.errors {
                warn!(id = %error.id, reason = %error.reason, "bulk create item failed");
            }
            let failed: BTreeSet<&str> =
                outcome.errors.iter().map(|e| e.id.as_str()).collect();
            Ok(rels
                .into_iter()
                .filter(|rel| !failed.contains(rel.id.as_str()))
                .collect())
        }
        .await;
        self.health.track(result)
    }

    async fn set_strength_many(
        &self,
        ids: &[RelationshipId],
        agent: &AgentId,
        strength: f64,
    ) -> StoreResult<u64> {
        let result = async {
            let mut updated = 0;
            for id in ids {
                if self
                    .mutate(id, agent, |rel| rel.strength = strength)
                    .await?
                    .is_some()
                {
                    updated += 1;
                }
            }
            Ok(updated)
        }
        .await;
        self.health.track(result)
    }

    async fn deactivate_many(&self, ids: &[RelationshipId], agent: &AgentId) -> StoreResult<u64> {
        let result = async {
            let mut updated = 0;
            for id in ids {
                if self
                    .mutate(id, agent, |rel| rel.active = false)
                    .await?
                    .is_some()
                {
                    updated += 1;
                }
            }
            Ok(updated)
        }
        .await;
        self.health.track(result)
    }

    async fn reactivate_many(&self, ids: &[RelationshipId], agent: &AgentId) -> StoreResult<u64> {
        let result = async {
            let mut updated = 0;
            for id in ids {
                if self
                    .mutate(id, agent, |rel| rel.active = true)
                    .await?
                    .is_some()
                {
                    updated += 1;
                }
            }
            Ok(updated)
        }
        .await;
        self.health.track(result)
    }

    async fn delete_many(&self, ids: &[RelationshipId], agent: &AgentId) -> StoreResult<u64> {
        let result = async {
            let Some(index) = self.index_ready(agent).await? else {
                return Ok(0);
            };
            let mut removed = 0;
            for id in ids {
                if self
                    .backend
                    .delete_document(&index, id.as_str(), RefreshPolicy::WaitFor)
                    .await?
                {
                    removed += 1;
                }
            }
            Ok(removed)
        }
        .await;
        self.health.track(result)
    }

    async fn delete_old_inactive(&self, agent: &AgentId, older_than_days: i64) -> StoreResult<u64> {
        let result = async {
            let cutoff = Utc::now() - Duration::days(older_than_days.max(0));
            let doomed = self
                .search_rels(agent, rel_queries::inactive_older_than(cutoff), vec![])
                .await?;
            let ids: Vec<RelationshipId> = doomed.into_iter().map(|r| r.id).collect();
            self.delete_many(&ids, agent).await
        }
        .await;
        self.health.track(result)
    }

    async fn healthy(&self) -> bool {
        let reachable = self.backend.ping().await.unwrap_or(false);
        reachable && self.health.healthy()
    }
}

fn relationship_to_row(rel: &BeliefRelationship) -> Row {
    match relationship_to_document(rel) {
        Value::Object(map) => map,
        _ => unreachable!("relationship documents are objects"),
    }
}

fn row_to_relationship(row: &Row) -> StoreResult<BeliefRelationship> {
    document_to_relationship(&Value::Object(row.clone()))
}

/// `RelationshipStore` strategy over the relational port. Batch mutations
/// run as single DML statements; every operation owns one transaction.
pub struct RelationalRelationshipStore {
    backend: Arc<dyn RelationalBackend>,
    beliefs: Arc<dyn BeliefStore>,
    config: StoreConfig,
    health: HealthTracker,
}

impl RelationalRelationshipStore {
    pub fn new(
        backend: Arc<dyn RelationalBackend>,
        beliefs: Arc<dyn BeliefStore>,
        config: StoreConfig,
    ) -> Self {
        Self {
            backend,
            beliefs,
            config,
            health: HealthTracker::new(),
        }
    }

    async fn with_txn<T>(
        &self,
        work: impl for<'a> FnOnce(
            &'a mut (dyn RelationalTransaction + 'static),
        ) -> BoxFuture<'a, StoreResult<T>>,
    ) -> StoreResult<T> {
        run_in_txn(self.backend.as_ref(), work).await
    }

    fn agent_filter(agent: &AgentId, extra: QueryNode) -> QueryNode {
        queries::all_of(vec![queries::by_agent(agent), extra])
    }

    async fn select_rels(
        &self,
        agent: &AgentId,
        filter: QueryNode,
        sort: Vec<SortSpec>,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let mut query = RowQuery::new(TABLE_RELATIONSHIP, Self::agent_filter(agent, filter))
            .limit(self.config.max_results);
        query.order_by = sort;
        self.with_txn(move |txn| {
            Box::pin(async move {
                crate::observability::record_query();
                let rows = txn.select(&query).await?;
                rows.iter().map(row_to_relationship).collect()
            })
        })
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_impl(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        relationship_type: RelationshipType,
        strength: f64,
        agent: &AgentId,
        metadata: Option<serde_json::Map<String, Value>>,
        effective_from: Option<DateTime<Utc>>,
        effective_until: Option<DateTime<Utc>>,
        deprecation_reason: Option<String>,
    ) -> StoreResult<BeliefRelationship> {
        validate_endpoints(self.beliefs.as_ref(), agent, &[source, target]).await?;
        let rel = build_relationship(
            source,
            target,
            relationship_type,
            strength,
            agent,
            metadata,
            effective_from,
            effective_until,
            deprecation_reason,
        );
        let row = relationship_to_row(&rel);
        self.with_txn(move |txn| {
            Box::pin(async move { txn.insert(TABLE_RELATIONSHIP, row).await })
        })
        .await?;
        Ok(rel)
    }

    async fn get_impl(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
    ) -> StoreResult<Option<BeliefRelationship>> {
        let id = id.clone();
        let agent = agent.clone();
        self.with_txn(move |txn| {
            Box::pin(async move {
                let Some(row) = txn.get(TABLE_RELATIONSHIP, id.as_str()).await? else {
                    return Ok(None);
                };
                let rel = row_to_relationship(&row)?;
                Ok((rel.agent_id == agent).then_some(rel))
            })
        })
        .await
    }

    async fn mutate(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
        apply: impl FnOnce(&mut BeliefRelationship),
    ) -> StoreResult<Option<BeliefRelationship>> {
        let Some(mut rel) = self.get_impl(id, agent).await? else {
            return Ok(None);
        };
        apply(&mut rel);
        rel.strength = clamp_unit(rel.strength);
        rel.last_updated = now_micros();
        let row = relationship_to_row(&rel);
        let id = rel.id.as_str().to_string();
        self.with_txn(move |txn| {
            Box::pin(async move {
                txn.update(TABLE_RELATIONSHIP, &id, row).await?;
                Ok(())
            })
        })
        .await?;
        Ok(Some(rel))
    }

    /// Single-DML batch mutation over the given ids.
    async fn batch_set(
        &self,
        ids: &[RelationshipId],
        agent: &AgentId,
        set: serde_json::Map<String, Value>,
    ) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut set = set;
        set.insert("last_updated".into(), format_ts(now_micros()).into());
        let update = BatchUpdate {
            table: TABLE_RELATIONSHIP.into(),
            filter: Self::agent_filter(agent, rel_queries::ids(ids)),
            set,
        };
        self.with_txn(move |txn| Box::pin(async move { txn.execute_update(&update).await }))
            .await
    }
}

#[async_trait]
impl RelationshipStore for RelationalRelationshipStore {
    async fn create(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        relationship_type: RelationshipType,
        strength: f64,
        agent: &AgentId,
        metadata: Option<serde_json::Map<String, Value>>,
    ) -> StoreResult<BeliefRelationship> {
        self.health.track(
            self.create_impl(
                source,
                target,
                relationship_type,
                strength,
                agent,
                metadata,
                None,
                None,
                None,
            )
            .await,
        )
    }

    async fn create_temporal(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        relationship_type: RelationshipType,
        strength: f64,
        agent: &AgentId,
        metadata: Option<serde_json::Map<String, Value>>,
        effective_from: DateTime<Utc>,
        effective_until: Option<DateTime<Utc>>,
    ) -> StoreResult<BeliefRelationship> {
        let result = async {
            check_temporal_order(effective_from, effective_until)?;
            self.create_impl(
                source,
                target,
                relationship_type,
                strength,
                agent,
                metadata,
                Some(effective_from),
                effective_until,
                None,
            )
            .await
        }
        .await;
        self.health.track(result)
    }

    async fn deprecate(
        &self,
        old: &BeliefId,
        new: &BeliefId,
        reason: &str,
        agent: &AgentId,
    ) -> StoreResult<BeliefRelationship> {
        let result = async {
            validation::non_blank("reason", reason)?;
            self.create_impl(
                old,
                new,
                RelationshipType::Deprecates,
                1.0,
                agent,
                None,
                None,
                None,
                Some(reason.to_string()),
            )
            .await
        }
        .await;
        self.health.track(result)
    }

    async fn get(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
    ) -> StoreResult<Option<BeliefRelationship>> {
        self.health.track(self.get_impl(id, agent).await)
    }

    async fn update_strength(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
        strength: f64,
    ) -> StoreResult<BeliefRelationship> {
        let result = async {
            self.mutate(id, agent, |rel| rel.strength = strength)
                .await?
                .ok_or_else(|| StorageError::not_found("relationship", id.as_str()))
        }
        .await;
        self.health.track(result)
    }

    async fn update(
        &self,
        id: &RelationshipId,
        agent: &AgentId,
        strength: Option<f64>,
        metadata: Option<serde_json::Map<String, Value>>,
    ) -> StoreResult<BeliefRelationship> {
        let result = async {
            self.mutate(id, agent, |rel| {
                if let Some(strength) = strength {
                    rel.strength = strength;
                }
                if let Some(metadata) = metadata {
                    rel.metadata = metadata;
                }
            })
            .await?
            .ok_or_else(|| StorageError::not_found("relationship", id.as_str()))
        }
        .await;
        self.health.track(result)
    }

    async fn deactivate(&self, id: &RelationshipId, agent: &AgentId) -> StoreResult<bool> {
        let result = self
            .mutate(id, agent, |rel| rel.active = false)
            .await
            .map(|updated| updated.is_some());
        self.health.track(result)
    }

    async fn reactivate(&self, id: &RelationshipId, agent: &AgentId) -> StoreResult<bool> {
        let result = self
            .mutate(id, agent, |rel| rel.active = true)
            .await
            .map(|updated| updated.is_some());
        self.health.track(result)
    }

    async fn for_belief(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .select_rels(
                agent,
                rel_queries::for_belief(belief),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn outgoing(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .select_rels(
                agent,
                queries::term("source_belief_id", belief.as_str()),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn incoming(
        &self,
        belief: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .select_rels(
                agent,
                queries::term("target_belief_id", belief.as_str()),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn between(
        &self,
        source: &BeliefId,
        target: &BeliefId,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .select_rels(
                agent,
                queries::all_of(vec![
                    queries::term("source_belief_id", source.as_str()),
                    queries::term("target_belief_id", target.as_str()),
                ]),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn by_type(
        &self,
        relationship_type: RelationshipType,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .select_rels(
                agent,
                queries::term("relationship_type", relationship_type.code()),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn by_strength_gte(
        &self,
        threshold: f64,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = async {
            validation::unit_interval("threshold", threshold)?;
            self.select_rels(
                agent,
                rel_queries::strength_gte(threshold),
                vec![SortSpec::desc("strength")],
            )
            .await
        }
        .await;
        self.health.track(result)
    }

    async fn effective_at(
        &self,
        at: DateTime<Utc>,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .select_rels(
                agent,
                rel_queries::effective_at(at),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn expired_before(
        &self,
        at: DateTime<Utc>,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .select_rels(
                agent,
                rel_queries::expired_before(at),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn all(&self, agent: &AgentId) -> StoreResult<Vec<BeliefRelationship>> {
        let result = self
            .select_rels(
                agent,
                queries::match_all(),
                vec![SortSpec::desc("created_at")],
            )
            .await;
        self.health.track(result)
    }

    async fn count(&self, agent: &AgentId) -> StoreResult<u64> {
        let filter = Self::agent_filter(agent, queries::match_all());
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move { txn.count(TABLE_RELATIONSHIP, &filter).await })
            })
            .await;
        self.health.track(result)
    }

    async fn type_distribution(&self, agent: &AgentId) -> StoreResult<HashMap<String, u64>> {
        let filter = Self::agent_filter(agent, queries::match_all());
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move {
                    txn.group_count(TABLE_RELATIONSHIP, "relationship_type", &filter)
                        .await
                })
            })
            .await;
        self.health.record(result.is_ok());
        match result {
            Ok(counts) => Ok(counts),
            Err(e) => {
                warn!(error = %e, "type aggregation failed");
                Ok(HashMap::new())
            }
        }
    }

    async fn avg_strength_by_type(&self, agent: &AgentId) -> StoreResult<HashMap<String, f64>> {
        let filter = Self::agent_filter(agent, queries::match_all());
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move {
                    txn.group_avg(TABLE_RELATIONSHIP, "relationship_type", "strength", &filter)
                        .await
                })
            })
            .await;
        self.health.record(result.is_ok());
        match result {
            Ok(avgs) => Ok(avgs),
            Err(e) => {
                warn!(error = %e, "strength aggregation failed");
                Ok(HashMap::new())
            }
        }
    }

    async fn orphans(&self, agent: &AgentId) -> StoreResult<Vec<RelationshipId>> {
        let result = async {
            let edges = self.all(agent).await?;
            find_orphans(self.beliefs.as_ref(), &edges).await
        }
        .await;
        self.health.track(result)
    }

    async fn self_refs(&self, agent: &AgentId) -> StoreResult<Vec<RelationshipId>> {
        let result = async { Ok(find_self_refs(&self.all(agent).await?)) }.await;
        self.health.track(result)
    }

    async fn temporally_invalid(&self, agent: &AgentId) -> StoreResult<Vec<RelationshipId>> {
        let result = async { Ok(find_temporally_invalid(&self.all(agent).await?)) }.await;
        self.health.track(result)
    }

    async fn bulk_create(
        &self,
        specs: Vec<RelationshipSpec>,
        agent: &AgentId,
    ) -> StoreResult<Vec<BeliefRelationship>> {
        let result = async {
            if specs.is_empty() {
                return Ok(Vec::new());
            }
            let endpoint_refs: Vec<&BeliefId> = specs
                .iter()
                .flat_map(|s| [&s.source_belief_id, &s.target_belief_id])
                .collect();
            validate_endpoints(self.beliefs.as_ref(), agent, &endpoint_refs).await?;

            let rels: Vec<BeliefRelationship> = specs
                .iter()
                .map(|spec| {
                    build_relationship(
                        &spec.source_belief_id,
                        &spec.target_belief_id,
                        spec.relationship_type,
                        spec.strength,
                        agent,
                        Some(spec.metadata.clone()),
                        None,
                        None,
                        None,
                    )
                })
                .collect();

            // Chunked flushes bound the per-transaction working set.
            let mut stored = Vec::with_capacity(rels.len());
            for chunk in rels.chunks(self.config.batch_size.max(1)) {
                let chunk = chunk.to_vec();
                let ok = self
                    .with_txn(move |txn| {
                        Box::pin(async move {
                            let mut ok = Vec::new();
                            for rel in chunk {
                                match txn.insert(TABLE_RELATIONSHIP, relationship_to_row(&rel)).await
                                {
                                    Ok(()) => ok.push(rel),
                                    Err(e) => {
                                        warn!(id = %rel.id, error = %e, "bulk create item failed");
                                    }
                                }
                            }
                            Ok(ok)
                        })
                    })
                    .await?;
                stored.extend(ok);
            }
            Ok(stored)
        }
        .await;
        self.health.track(result)
    }

    async fn set_strength_many(
        &self,
        ids: &[RelationshipId],
        agent: &AgentId,
        strength: f64,
    ) -> StoreResult<u64> {
        let result = async {
            let mut set = serde_json::Map::new();
            set.insert("strength".into(), clamp_unit(strength).into());
            self.batch_set(ids, agent, set).await
        }
        .await;
        self.health.track(result)
    }

    async fn deactivate_many(&self, ids: &[RelationshipId], agent: &AgentId) -> StoreResult<u64> {
        let result = async {
            let mut set = serde_json::Map::new();
            set.insert("active".into(), false.into());
            self.batch_set(ids, agent, set).await
        }
        .await;
        self.health.track(result)
    }

    async fn reactivate_many(&self, ids: &[RelationshipId], agent: &AgentId) -> StoreResult<u64> {
        let result = async {
            let mut set = serde_json::Map::new();
            set.insert("active".into(), true.into());
            self.batch_set(ids, agent, set).await
        }
        .await;
        self.health.track(result)
    }

    async fn delete_many(&self, ids: &[RelationshipId], agent: &AgentId) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let filter = Self::agent_filter(agent, rel_queries::ids(ids));
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move { txn.delete_where(TABLE_RELATIONSHIP, &filter).await })
            })
            .await;
        self.health.track(result)
    }

    async fn delete_old_inactive(&self, agent: &AgentId, older_than_days: i64) -> StoreResult<u64> {
        let cutoff = Utc::now() - Duration::days(older_than_days.max(0));
        let filter = Self::agent_filter(agent, rel_queries::inactive_older_than(cutoff));
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move { txn.delete_where(TABLE_RELATIONSHIP, &filter).await })
            })
            .await;
        self.health.track(result)
    }

    async fn healthy(&self) -> bool {
        let reachable = self.backend.ping().await.unwrap_or(false);
        reachable && self.health.healthy()
    }
}
