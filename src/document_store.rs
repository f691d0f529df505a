// Document-Strategy Belief Store
// Beliefs and conflicts persisted in per-agent indices of a document/search
// engine. Index existence is cached process-wide; writes refresh so the
// next search observes them.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::{
    DocumentBackend, FieldMapping, FieldType, IndexMapping, QueryNode, RefreshPolicy, SortSpec,
};
use crate::contracts::{Belief, BeliefConflict, BeliefStore};
use crate::errors::{StorageError, StoreResult};
use crate::observability::HealthTracker;
use crate::operations::{
    self, base_search, index_name, index_pattern, queries, text, ExistenceCache, StoreConfig,
};
use crate::types::{clamp_unit, now_micros, AgentId, BeliefId, ConflictId};
use crate::validation;

/// Serialize a timestamp in the fixed-width form stored in documents.
/// Fixed width keeps lexicographic order equal to chronological order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::serialization(format!("bad timestamp '{raw}': {e}")))
}

fn string_set(value: Option<&Value>) -> BTreeSet<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn opt_string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

fn opt_f64(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

/// Explicit belief -> document mapper. Field names are the canonical
/// persisted layout shared with the relational schema.
pub(crate) fn belief_to_document(belief: &Belief) -> Value {
    json!({
        "id": belief.id.as_str(),
        "agent_id": belief.agent_id.as_str(),
        "content": belief.statement,
        "primary_category": belief.category,
        "secondary_category": belief.secondary_category,
        "confidence": belief.confidence,
        "category_confidence": belief.category_confidence,
        "tags": belief.tags.iter().collect::<Vec<_>>(),
        "evidence_memory_ids": belief.evidence_memory_ids.iter().collect::<Vec<_>>(),
        "relevance_score": belief.relevance_score,
        "version": belief.version,
        "active": belief.active,
        "created_at": format_ts(belief.created_at),
        "last_accessed": belief.last_accessed.map(format_ts),
        "last_updated": format_ts(belief.last_updated),
        "source": belief.source,
        "importance_score": belief.importance_score,
        "access_count": belief.access_count,
        "metadata": Value::Object(belief.metadata.clone()),
        "content_embedding": belief.content_embedding,
    })
}

/// Explicit document -> belief mapper. Malformed documents surface as
/// serialization errors rather than panics.
pub(crate) fn document_to_belief(doc: &Value) -> StoreResult<Belief> {
    let fields = doc
        .as_object()
        .ok_or_else(|| StorageError::serialization("belief document is not an object"))?;
    let field_str = |name: &str| -> StoreResult<&str> {
        fields
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| StorageError::serialization(format!("missing field '{name}'")))
    };

    let confidence = opt_f64(fields.get("confidence"))
        .or_else(|| opt_f64(fields.get("category_confidence")))
        .ok_or_else(|| StorageError::serialization("missing field 'confidence'"))?;

    Ok(Belief {
        id: BeliefId::new(field_str("id")?)?,
        agent_id: AgentId::new(field_str("agent_id")?)?,
        statement: field_str("content")?.to_string(),
        category: opt_string(fields.get("primary_category")),
        secondary_category: opt_string(fields.get("secondary_category")),
        confidence: clamp_unit(confidence),
        category_confidence: opt_f64(fields.get("category_confidence")),
        active: fields
            .get("active")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        version: fields
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(1),
        created_at: parse_ts(field_str("created_at")?)?,
        last_updated: parse_ts(field_str("last_updated")?)?,
        last_accessed: match fields.get("last_accessed").and_then(Value::as_str) {
            Some(raw) => Some(parse_ts(raw)?),
            None => None,
        },
        evidence_memory_ids: string_set(fields.get("evidence_memory_ids")),
        tags: string_set(fields.get("tags")),
        source: opt_string(fields.get("source")),
        importance_score: opt_f64(fields.get("importance_score")),
        relevance_score: opt_f64(fields.get("relevance_score")),
        access_count: fields
            .get("access_count")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        metadata: fields
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        content_embedding: fields
            .get("content_embedding")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_f64).collect()),
    })
}

fn conflict_to_document(conflict: &BeliefConflict) -> Value {
    json!({
        "id": conflict.id.as_str(),
        "agent_id": conflict.agent_id.as_str(),
        "conflicting_belief_ids": conflict
            .conflicting_belief_ids
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>(),
        "detected_at": format_ts(conflict.detected_at),
        "resolved": conflict.resolved,
        "resolved_at": conflict.resolved_at.map(format_ts),
        "resolution": conflict.resolution,
        "description": conflict.description,
    })
}

fn document_to_conflict(doc: &Value) -> StoreResult<BeliefConflict> {
    let fields = doc
        .as_object()
        .ok_or_else(|| StorageError::serialization("conflict document is not an object"))?;
    let field_str = |name: &str| -> StoreResult<&str> {
        fields
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| StorageError::serialization(format!("missing field '{name}'")))
    };

    let mut belief_ids = BTreeSet::new();
    for raw in string_set(fields.get("conflicting_belief_ids")) {
        belief_ids.insert(BeliefId::new(raw)?);
    }

    Ok(BeliefConflict {
        id: ConflictId::new(field_str("id")?)?,
        agent_id: AgentId::new(field_str("agent_id")?)?,
        conflicting_belief_ids: belief_ids,
        detected_at: parse_ts(field_str("detected_at")?)?,
        resolved: fields
            .get("resolved")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        resolved_at: match fields.get("resolved_at").and_then(Value::as_str) {
            Some(raw) => Some(parse_ts(raw)?),
            None => None,
        },
        resolution: opt_string(fields.get("resolution")),
        description: field_str("description").unwrap_or_default().to_string(),
    })
}

/// Mapping the core declares when it creates a belief index.
fn belief_mapping() -> IndexMapping {
    IndexMapping {
        fields: vec![
            FieldMapping::new("id", FieldType::Keyword),
            FieldMapping::new("agent_id", FieldType::Keyword),
            FieldMapping::new("content", FieldType::Text),
            FieldMapping::new("primary_category", FieldType::Keyword),
            FieldMapping::new("secondary_category", FieldType::Keyword),
            FieldMapping::new("confidence", FieldType::Double),
            FieldMapping::new("category_confidence", FieldType::Double),
            FieldMapping::new("tags", FieldType::Keyword),
            FieldMapping::new("evidence_memory_ids", FieldType::Keyword),
            FieldMapping::new("relevance_score", FieldType::Double),
            FieldMapping::new("version", FieldType::Long),
            FieldMapping::new("active", FieldType::Boolean),
            FieldMapping::new("created_at", FieldType::Date),
            FieldMapping::new("last_accessed", FieldType::Date),
            FieldMapping::new("last_updated", FieldType::Date),
            FieldMapping::new("source", FieldType::Keyword),
            FieldMapping::new("importance_score", FieldType::Double),
            FieldMapping::new("access_count", FieldType::Long),
            FieldMapping::unindexed("metadata", FieldType::Object),
            FieldMapping::new("content_embedding", FieldType::DenseVector),
        ],
    }
}

fn conflict_mapping() -> IndexMapping {
    IndexMapping {
        fields: vec![
            FieldMapping::new("id", FieldType::Keyword),
            FieldMapping::new("agent_id", FieldType::Keyword),
            FieldMapping::new("conflicting_belief_ids", FieldType::Keyword),
            FieldMapping::new("detected_at", FieldType::Date),
            FieldMapping::new("resolved", FieldType::Boolean),
            FieldMapping::new("resolved_at", FieldType::Date),
            FieldMapping::new("resolution", FieldType::Text),
            FieldMapping::new("description", FieldType::Text),
        ],
    }
}

/// `BeliefStore` strategy over a document/search engine.
pub struct DocumentBeliefStore {
    backend: Arc<dyn DocumentBackend>,
    config: StoreConfig,
    cache: Arc<ExistenceCache>,
    health: HealthTracker,
}

impl DocumentBeliefStore {
    pub fn new(backend: Arc<dyn DocumentBackend>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            cache: Arc::new(ExistenceCache::new()),
            health: HealthTracker::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn belief_index(&self, agent: &AgentId) -> String {
        index_name(
            &self.config.belief_index_prefix,
            agent,
            &self.config.index_version_suffix,
        )
    }

    fn conflict_index(&self, agent: &AgentId) -> String {
        index_name(
            &self.config.conflict_index_prefix,
            agent,
            &self.config.index_version_suffix,
        )
    }

    fn belief_scope(&self, agent: Option<&AgentId>) -> String {
        match agent {
            Some(agent) => self.belief_index(agent),
            None => index_pattern(&self.config.belief_index_prefix),
        }
    }

    /// Create the index if configured to and it is not there yet. An
    /// "already exists" rejection from a concurrent creator counts as
    /// success and updates the cache.
    async fn ensure_index(&self, name: &str, mapping: IndexMapping) -> StoreResult<()> {
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
        match self.backend.create_index(name, &mapping).await {
            Ok(()) => {
                debug!(index = name, "created index");
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

    /// Whether a concrete index exists; pattern scopes always pass. Reads
    /// on a never-used agent resolve to empty results through this check.
    async fn scope_exists(&self, scope: &str) -> StoreResult<bool> {
        if scope.ends_with('*') {
            return Ok(true);
        }
        let backend = Arc::clone(&self.backend);
        self.cache
            .check_or_probe(scope, || {
                let backend = Arc::clone(&backend);
                let scope = scope.to_string();
                async move { backend.index_exists(&scope).await }
            })
            .await
    }

    async fn search_beliefs(
        &self,
        scope: String,
        query: QueryNode,
        sort: Vec<SortSpec>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Belief>> {
        if !self.scope_exists(&scope).await? {
            return Ok(Vec::new());
        }
        let mut request = base_search(&self.config, scope, query);
        request.sort = sort;
        request.size = limit.min(self.config.max_results);
        request.from = offset;
        crate::observability::record_query();
        let response = self.backend.search(&request).await?;
        response
            .hits
            .iter()
            .map(|hit| document_to_belief(&hit.source))
            .collect()
    }

    async fn put_impl(&self, mut belief: Belief) -> StoreResult<Belief> {
        validation::non_blank("statement", &belief.statement)?;
        let index = self.belief_index(&belief.agent_id);
        self.ensure_index(&index, belief_mapping()).await?;

        if let Some(existing) = self.backend.get_document(&index, belief.id.as_str()).await? {
            let existing = document_to_belief(&existing)?;
            belief.created_at = existing.created_at;
            belief.version = existing.version.max(belief.version) + 1;
        } else {
            belief.version = belief.version.max(1);
        }
        belief.confidence = clamp_unit(belief.confidence);
        belief.created_at = belief.created_at.trunc_subsecs(6);
        belief.last_updated = now_micros();

        self.backend
            .put_document(
                &index,
                belief.id.as_str(),
                belief_to_document(&belief),
                RefreshPolicy::WaitFor,
            )
            .await?;
        Ok(belief)
    }

    async fn put_many_impl(&self, beliefs: Vec<Belief>) -> StoreResult<Vec<Belief>> {
        let mut stored = Vec::with_capacity(beliefs.len());
        for chunk in beliefs.chunks(self.config.batch_size.max(1)) {
            for belief in chunk {
                match self.put_impl(belief.clone()).await {
                    Ok(b) => stored.push(b),
                    Err(e) => {
                        warn!(belief_id = %belief.id, error = %e, "skipping belief in batch put");
                    }
                }
            }
        }
        Ok(stored)
    }

    async fn get_impl(&self, id: &BeliefId) -> StoreResult<Option<Belief>> {
        let scope = self.belief_scope(None);
        let found = self
            .search_beliefs(
                scope,
                queries::term("id", id.as_str()),
                vec![],
                1,
                0,
            )
            .await?;
        Ok(found.into_iter().next())
    }

    async fn get_many_impl(&self, ids: &[BeliefId]) -> StoreResult<Vec<Belief>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let values = ids.iter().map(|id| Value::from(id.as_str())).collect();
        self.search_beliefs(
            self.belief_scope(None),
            queries::terms("id", values),
            vec![],
            ids.len(),
            0,
        )
        .await
    }

    async fn delete_impl(&self, id: &BeliefId) -> StoreResult<bool> {
        let Some(belief) = self.get_impl(id).await? else {
            return Ok(false);
        };
        let index = self.belief_index(&belief.agent_id);
        self.backend
            .delete_document(&index, id.as_str(), RefreshPolicy::WaitFor)
            .await
    }

    async fn find_similar_impl(
        &self,
        statement: &str,
        agent: Option<&AgentId>,
        threshold: f64,
        limit: usize,
    ) -> StoreResult<Vec<(Belief, f64)>> {
        validation::non_blank("statement", statement)?;
        validation::unit_interval("threshold", threshold)?;
        let candidates = self
            .search_beliefs(
                self.belief_scope(agent),
                queries::scoped(agent, false),
                vec![SortSpec::desc("last_updated")],
                self.config.max_results,
                0,
            )
            .await?;

        let mut scored: Vec<(Belief, f64)> = candidates
            .into_iter()
            .map(|belief| {
                let score = text::statement_similarity(statement, &belief.statement);
                (belief, score)
            })
            .filter(|(_, score)| *score >= threshold)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Five-bucket confidence histogram over active beliefs.
    pub async fn confidence_histogram(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<HashMap<String, u64>> {
        let scope = self.belief_scope(agent);
        self.backend
            .range_aggregation(
                &scope,
                "confidence",
                &operations::histogram_ranges(),
                &queries::scoped(agent, false),
            )
            .await
    }
}

#[async_trait]
impl BeliefStore for DocumentBeliefStore {
    async fn put(&self, belief: Belief) -> StoreResult<Belief> {
        self.health.track(self.put_impl(belief).await)
    }

    async fn put_many(&self, beliefs: Vec<Belief>) -> StoreResult<Vec<Belief>> {
        self.health.track(self.put_many_impl(beliefs).await)
    }

    async fn get(&self, id: &BeliefId) -> StoreResult<Option<Belief>> {
        self.health.track(self.get_impl(id).await)
    }

    async fn get_many(&self, ids: &[BeliefId]) -> StoreResult<Vec<Belief>> {
        self.health.track(self.get_many_impl(ids).await)
    }

    async fn delete(&self, id: &BeliefId) -> StoreResult<bool> {
        self.health.track(self.delete_impl(id).await)
    }

    async fn for_agent(
        &self,
        agent: &AgentId,
        include_inactive: bool,
    ) -> StoreResult<Vec<Belief>> {
        let result = self
            .search_beliefs(
                self.belief_index(agent),
                queries::scoped(Some(agent), include_inactive),
                vec![SortSpec::desc("last_updated")],
                self.config.max_results,
                0,
            )
            .await;
        self.health.track(result)
    }

    async fn for_agent_page(
        &self,
        agent: &AgentId,
        include_inactive: bool,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<Belief>> {
        let result = self
            .search_beliefs(
                self.belief_index(agent),
                queries::scoped(Some(agent), include_inactive),
                vec![SortSpec::desc("last_updated")],
                limit,
                offset,
            )
            .await;
        self.health.track(result)
    }

    async fn in_category(
        &self,
        category: &str,
        agent: Option<&AgentId>,
        include_inactive: bool,
    ) -> StoreResult<Vec<Belief>> {
        let result = async {
            validation::non_blank("category", category)?;
            let query = queries::all_of(vec![
                queries::scoped(agent, include_inactive),
                queries::category(category),
            ]);
            self.search_beliefs(
                self.belief_scope(agent),
                query,
                vec![SortSpec::desc("last_updated")],
                self.config.max_results,
                0,
            )
            .await
        }
        .await;
        self.health.track(result)
    }

    async fn low_confidence(
        &self,
        threshold: f64,
        agent: Option<&AgentId>,
    ) -> StoreResult<Vec<Belief>> {
        let result = async {
            validation::unit_interval("threshold", threshold)?;
            let query = queries::all_of(vec![
                queries::scoped(agent, false),
                queries::confidence_lt(threshold),
            ]);
            self.search_beliefs(
                self.belief_scope(agent),
                query,
                vec![SortSpec::asc("confidence")],
                self.config.max_results,
                0,
            )
            .await
        }
        .await;
        self.health.track(result)
    }

    async fn search_text(
        &self,
        query: &str,
        agent: Option<&AgentId>,
        limit: usize,
    ) -> StoreResult<Vec<Belief>> {
        let result = async {
            validation::non_blank("query", query)?;
            validation::positive("limit", limit)?;
            let node = queries::all_of(vec![
                queries::scoped(agent, false),
                queries::substring("content", query),
            ]);
            self.search_beliefs(
                self.belief_scope(agent),
                node,
                vec![SortSpec::desc("confidence")],
                limit,
                0,
            )
            .await
        }
        .await;
        self.health.track(result)
    }

    async fn find_similar(
        &self,
        statement: &str,
        agent: Option<&AgentId>,
        threshold: f64,
        limit: usize,
    ) -> StoreResult<Vec<(Belief, f64)>> {
        self.health
            .track(self.find_similar_impl(statement, agent, threshold, limit).await)
    }

    async fn put_conflict(&self, conflict: BeliefConflict) -> StoreResult<BeliefConflict> {
        let result = async {
            let index = self.conflict_index(&conflict.agent_id);
            self.ensure_index(&index, conflict_mapping()).await?;
            self.backend
                .put_document(
                    &index,
                    conflict.id.as_str(),
                    conflict_to_document(&conflict),
                    RefreshPolicy::WaitFor,
                )
                .await?;
            Ok(conflict)
        }
        .await;
        self.health.track(result)
    }

    async fn get_conflict(&self, id: &ConflictId) -> StoreResult<Option<BeliefConflict>> {
        let result = async {
            let pattern = index_pattern(&self.config.conflict_index_prefix);
            let mut request = base_search(&self.config, pattern, queries::term("id", id.as_str()));
            request.size = 1;
            let response = self.backend.search(&request).await?;
            response
                .hits
                .first()
                .map(|hit| document_to_conflict(&hit.source))
                .transpose()
        }
        .await;
        self.health.track(result)
    }

    async fn unresolved_conflicts(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<Vec<BeliefConflict>> {
        let result = async {
            let scope = match agent {
                Some(agent) => {
                    let index = self.conflict_index(agent);
                    if !self.scope_exists(&index).await? {
                        return Ok(Vec::new());
                    }
                    index
                }
                None => index_pattern(&self.config.conflict_index_prefix),
            };
            let query = queries::all_of(vec![
                match agent {
                    Some(agent) => queries::by_agent(agent),
                    None => queries::match_all(),
                },
                queries::term("resolved", false),
            ]);
            let mut request = base_search(&self.config, scope, query);
            request.sort = vec![SortSpec::desc("detected_at")];
            let response = self.backend.search(&request).await?;
            response
                .hits
                .iter()
                .map(|hit| document_to_conflict(&hit.source))
                .collect()
        }
        .await;
        self.health.track(result)
    }

    async fn remove_conflict(&self, id: &ConflictId) -> StoreResult<bool> {
        let result = async {
            let Some(conflict) = self.get_conflict(id).await? else {
                return Ok(false);
            };
            let index = self.conflict_index(&conflict.agent_id);
            self.backend
                .delete_document(&index, id.as_str(), RefreshPolicy::WaitFor)
                .await
        }
        .await;
        self.health.track(result)
    }

    async fn count(&self, agent: Option<&AgentId>, include_inactive: bool) -> StoreResult<u64> {
        let result = self
            .backend
            .count(
                &self.belief_scope(agent),
                &queries::scoped(agent, include_inactive),
            )
            .await;
        self.health.track(result)
    }

    async fn distribution_by_category(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<HashMap<String, u64>> {
        // Aggregation paths tolerate partial failure: log and return empty.
        let result = self
            .backend
            .terms_aggregation(
                &self.belief_scope(agent),
                "primary_category",
                &queries::scoped(agent, false),
            )
            .await;
        self.health.record(result.is_ok());
        match result {
            Ok(counts) => Ok(counts),
            Err(e) => {
                warn!(error = %e, "category aggregation failed");
                Ok(HashMap::new())
            }
        }
    }

    async fn distribution_by_confidence_bucket(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<HashMap<String, u64>> {
        let result = self
            .backend
            .range_aggregation(
                &self.belief_scope(agent),
                "confidence",
                &operations::summary_ranges(),
                &queries::scoped(agent, false),
            )
            .await;
        self.health.record(result.is_ok());
        match result {
            Ok(counts) => Ok(counts),
            Err(e) => {
                warn!(error = %e, "confidence aggregation failed");
                Ok(HashMap::new())
            }
        }
    }

    async fn distinct_agents(&self) -> StoreResult<Vec<AgentId>> {
        let result = async {
            let counts = self
                .backend
                .terms_aggregation(
                    &self.belief_scope(None),
                    "agent_id",
                    &queries::match_all(),
                )
                .await?;
            let mut agents: Vec<AgentId> = counts
                .into_keys()
                .filter_map(|raw| AgentId::new(raw).ok())
                .collect();
            agents.sort();
            Ok(agents)
        }
        .await;
        self.health.track(result)
    }

    async fn healthy(&self) -> bool {
        let reachable = self.backend.ping().await.unwrap_or(false);
        reachable && self.health.healthy()
    }
}
