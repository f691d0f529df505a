// Relational-Strategy Belief Store
// Beliefs, conflicts and their element collections persisted over the
// relational port. Every top-level operation owns one transaction,
// committing on success and rolling back on any error. List queries never
// join collections; collections are batch-loaded after the page is cut.

use async_trait::async_trait;
use chrono::SubsecRound;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

use crate::backend::{
    QueryNode, RelationalBackend, RelationalTransaction, Row, RowQuery, SortSpec,
};
use crate::contracts::{Belief, BeliefConflict, BeliefStore};
use crate::document_store::{format_ts, parse_ts};
use crate::errors::{StorageError, StoreResult};
use crate::observability::HealthTracker;
use crate::operations::{self, queries, text, StoreConfig};
use crate::types::{clamp_unit, now_micros, AgentId, BeliefId, ConflictId};
use crate::validation;

pub(crate) const TABLE_BELIEF: &str = "belief";
pub(crate) const TABLE_BELIEF_TAGS: &str = "belief_tags";
pub(crate) const TABLE_BELIEF_EVIDENCE: &str = "belief_evidence";
pub(crate) const TABLE_CONFLICT: &str = "belief_conflict";
pub(crate) const TABLE_CONFLICT_BELIEFS: &str = "conflict_beliefs";

fn belief_to_row(belief: &Belief) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), belief.id.as_str().into());
    row.insert("agent_id".into(), belief.agent_id.as_str().into());
    row.insert("content".into(), belief.statement.clone().into());
    row.insert("primary_category".into(), opt_value(&belief.category));
    row.insert(
        "secondary_category".into(),
        opt_value(&belief.secondary_category),
    );
    row.insert("confidence".into(), belief.confidence.into());
    row.insert(
        "category_confidence".into(),
        belief.category_confidence.map(Value::from).unwrap_or(Value::Null),
    );
    row.insert("active".into(), belief.active.into());
    row.insert("version".into(), belief.version.into());
    row.insert("created_at".into(), format_ts(belief.created_at).into());
    row.insert(
        "last_accessed".into(),
        belief
            .last_accessed
            .map(|ts| Value::from(format_ts(ts)))
            .unwrap_or(Value::Null),
    );
    row.insert("last_updated".into(), format_ts(belief.last_updated).into());
    row.insert("source".into(), opt_value(&belief.source));
    row.insert(
        "importance_score".into(),
        belief.importance_score.map(Value::from).unwrap_or(Value::Null),
    );
    row.insert(
        "relevance_score".into(),
        belief.relevance_score.map(Value::from).unwrap_or(Value::Null),
    );
    row.insert("access_count".into(), belief.access_count.into());
    row.insert("metadata".into(), Value::Object(belief.metadata.clone()));
    row.insert(
        "content_embedding".into(),
        belief
            .content_embedding
            .as_ref()
            .map(|v| Value::from(v.clone()))
            .unwrap_or(Value::Null),
    );
    row
}

fn opt_value(value: &Option<String>) -> Value {
    value.as_deref().map(Value::from).unwrap_or(Value::Null)
}

fn row_str<'a>(row: &'a Row, column: &str) -> StoreResult<&'a str> {
    row.get(column)
        .and_then(Value::as_str)
        .ok_or_else(|| StorageError::serialization(format!("missing column '{column}'")))
}

fn row_opt_str(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(str::to_string)
}

fn row_to_belief(
    row: &Row,
    tags: BTreeSet<String>,
    evidence_memory_ids: BTreeSet<String>,
) -> StoreResult<Belief> {
    Ok(Belief {
        id: BeliefId::new(row_str(row, "id")?)?,
        agent_id: AgentId::new(row_str(row, "agent_id")?)?,
        statement: row_str(row, "content")?.to_string(),
        category: row_opt_str(row, "primary_category"),
        secondary_category: row_opt_str(row, "secondary_category"),
        confidence: clamp_unit(
            row.get("confidence")
                .and_then(Value::as_f64)
                .ok_or_else(|| StorageError::serialization("missing column 'confidence'"))?,
        ),
        category_confidence: row.get("category_confidence").and_then(Value::as_f64),
        active: row.get("active").and_then(Value::as_bool).unwrap_or(true),
        version: row.get("version").and_then(Value::as_u64).unwrap_or(1),
        created_at: parse_ts(row_str(row, "created_at")?)?,
        last_updated: parse_ts(row_str(row, "last_updated")?)?,
        last_accessed: match row.get("last_accessed").and_then(Value::as_str) {
            Some(raw) => Some(parse_ts(raw)?),
            None => None,
        },
        evidence_memory_ids,
        tags,
        source: row_opt_str(row, "source"),
        importance_score: row.get("importance_score").and_then(Value::as_f64),
        relevance_score: row.get("relevance_score").and_then(Value::as_f64),
        access_count: row.get("access_count").and_then(Value::as_u64).unwrap_or(0),
        metadata: row
            .get("metadata")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
        content_embedding: row
            .get("content_embedding")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_f64).collect()),
    })
}

fn element_row(owner_column: &str, owner: &str, value_column: &str, value: &str) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), format!("{owner}#{value}").into());
    row.insert(owner_column.into(), owner.into());
    row.insert(value_column.into(), value.into());
    row
}

/// Replace the element-collection rows belonging to one belief.
async fn store_collections(
    txn: &mut (dyn RelationalTransaction + '_),
    belief: &Belief,
) -> StoreResult<()> {
    let owner_filter = queries::term("belief_id", belief.id.as_str());
    txn.delete_where(TABLE_BELIEF_TAGS, &owner_filter).await?;
    txn.delete_where(TABLE_BELIEF_EVIDENCE, &owner_filter).await?;
    for tag in &belief.tags {
        txn.insert(
            TABLE_BELIEF_TAGS,
            element_row("belief_id", belief.id.as_str(), "tag", tag),
        )
        .await?;
    }
    for memory_id in &belief.evidence_memory_ids {
        txn.insert(
            TABLE_BELIEF_EVIDENCE,
            element_row("belief_id", belief.id.as_str(), "memory_id", memory_id),
        )
        .await?;
    }
    Ok(())
}

/// Batch-load tags and evidence for a page of belief rows, then assemble.
async fn hydrate_beliefs(
    txn: &mut (dyn RelationalTransaction + '_),
    rows: Vec<Row>,
) -> StoreResult<Vec<Belief>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Value> = rows
        .iter()
        .filter_map(|row| row.get("id").cloned())
        .collect();
    let owner_filter = queries::terms("belief_id", ids);

    let mut tags_by_owner: HashMap<String, BTreeSet<String>> = HashMap::new();
    for row in txn
        .select(&RowQuery::new(TABLE_BELIEF_TAGS, owner_filter.clone()))
        .await?
    {
        if let (Some(owner), Some(tag)) = (
            row.get("belief_id").and_then(Value::as_str),
            row.get("tag").and_then(Value::as_str),
        ) {
            tags_by_owner
                .entry(owner.to_string())
                .or_default()
                .insert(tag.to_string());
        }
    }

    let mut evidence_by_owner: HashMap<String, BTreeSet<String>> = HashMap::new();
    for row in txn
        .select(&RowQuery::new(TABLE_BELIEF_EVIDENCE, owner_filter))
        .await?
    {
        if let (Some(owner), Some(memory_id)) = (
            row.get("belief_id").and_then(Value::as_str),
            row.get("memory_id").and_then(Value::as_str),
        ) {
            evidence_by_owner
                .entry(owner.to_string())
                .or_default()
                .insert(memory_id.to_string());
        }
    }

    rows.iter()
        .map(|row| {
            let id = row_str(row, "id")?;
            let tags = tags_by_owner.remove(id).unwrap_or_default();
            let evidence = evidence_by_owner.remove(id).unwrap_or_default();
            row_to_belief(row, tags, evidence)
        })
        .collect()
}

/// Upsert one belief inside an open transaction, applying the version and
/// created-at merge rules.
async fn store_belief(
    txn: &mut (dyn RelationalTransaction + '_),
    mut belief: Belief,
) -> StoreResult<Belief> {
    validation::non_blank("statement", &belief.statement)?;
    let existing = txn.get(TABLE_BELIEF, belief.id.as_str()).await?;
    belief.confidence = clamp_unit(belief.confidence);
    belief.created_at = belief.created_at.trunc_subsecs(6);
    belief.last_updated = now_micros();

    match existing {
        Some(row) => {
            let stored_version = row.get("version").and_then(Value::as_u64).unwrap_or(1);
            belief.created_at = parse_ts(row_str(&row, "created_at")?)?;
            belief.version = stored_version.max(belief.version) + 1;
            let id = belief.id.as_str().to_string();
            txn.update(TABLE_BELIEF, &id, belief_to_row(&belief)).await?;
        }
        None => {
            belief.version = belief.version.max(1);
            txn.insert(TABLE_BELIEF, belief_to_row(&belief)).await?;
        }
    }
    store_collections(txn, &belief).await?;
    Ok(belief)
}

fn conflict_to_row(conflict: &BeliefConflict) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), conflict.id.as_str().into());
    row.insert("agent_id".into(), conflict.agent_id.as_str().into());
    row.insert("detected_at".into(), format_ts(conflict.detected_at).into());
    row.insert("resolved".into(), conflict.resolved.into());
    row.insert(
        "resolved_at".into(),
        conflict
            .resolved_at
            .map(|ts| Value::from(format_ts(ts)))
            .unwrap_or(Value::Null),
    );
    row.insert("resolution".into(), opt_value(&conflict.resolution));
    row.insert("description".into(), conflict.description.clone().into());
    row
}

async fn hydrate_conflicts(
    txn: &mut (dyn RelationalTransaction + '_),
    rows: Vec<Row>,
) -> StoreResult<Vec<BeliefConflict>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Value> = rows
        .iter()
        .filter_map(|row| row.get("id").cloned())
        .collect();
    let mut members_by_conflict: HashMap<String, BTreeSet<BeliefId>> = HashMap::new();
    for row in txn
        .select(&RowQuery::new(
            TABLE_CONFLICT_BELIEFS,
            queries::terms("conflict_id", ids),
        ))
        .await?
    {
        if let (Some(owner), Some(belief)) = (
            row.get("conflict_id").and_then(Value::as_str),
            row.get("belief_id").and_then(Value::as_str),
        ) {
            members_by_conflict
                .entry(owner.to_string())
                .or_default()
                .insert(BeliefId::new(belief)?);
        }
    }

    rows.iter()
        .map(|row| {
            let id = row_str(row, "id")?;
            Ok(BeliefConflict {
                id: ConflictId::new(id)?,
                agent_id: AgentId::new(row_str(row, "agent_id")?)?,
                conflicting_belief_ids: members_by_conflict.remove(id).unwrap_or_default(),
                detected_at: parse_ts(row_str(row, "detected_at")?)?,
                resolved: row.get("resolved").and_then(Value::as_bool).unwrap_or(false),
                resolved_at: match row.get("resolved_at").and_then(Value::as_str) {
                    Some(raw) => Some(parse_ts(raw)?),
                    None => None,
                },
                resolution: row_opt_str(row, "resolution"),
                description: row_opt_str(row, "description").unwrap_or_default(),
            })
        })
        .collect()
}

/// Run `work` in one transaction of `backend`: commit on success, roll
/// back on any error. Release is guaranteed on all exit paths.
pub(crate) async fn run_in_txn<T>(
    backend: &dyn RelationalBackend,
    work: impl for<'a> FnOnce(
        &'a mut (dyn RelationalTransaction + 'static),
    ) -> BoxFuture<'a, StoreResult<T>>,
) -> StoreResult<T> {
    let mut txn = backend.begin().await?;
    match work(txn.as_mut()).await {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}

/// `BeliefStore` strategy over the relational port.
pub struct RelationalBeliefStore {
    backend: Arc<dyn RelationalBackend>,
    config: StoreConfig,
    health: HealthTracker,
}

impl RelationalBeliefStore {
    pub fn new(backend: Arc<dyn RelationalBackend>, config: StoreConfig) -> Self {
        Self {
            backend,
            config,
            health: HealthTracker::new(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Each top-level operation runs in its own transaction scope.
    async fn with_txn<T>(
        &self,
        work: impl for<'a> FnOnce(
            &'a mut (dyn RelationalTransaction + 'static),
        ) -> BoxFuture<'a, StoreResult<T>>,
    ) -> StoreResult<T> {
        run_in_txn(self.backend.as_ref(), work).await
    }

    fn page_query(
        &self,
        filter: QueryNode,
        sort: SortSpec,
        limit: usize,
        offset: usize,
    ) -> RowQuery {
        RowQuery::new(TABLE_BELIEF, filter)
            .order_by(sort)
            .limit(limit.min(self.config.max_results))
            .offset(offset)
    }

    async fn select_page(
        &self,
        filter: QueryNode,
        sort: SortSpec,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<Belief>> {
        let query = self.page_query(filter, sort, limit, offset);
        self.with_txn(move |txn| {
            Box::pin(async move {
                crate::observability::record_query();
                let rows = txn.select(&query).await?;
                hydrate_beliefs(txn, rows).await
            })
        })
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

        // Keyword extraction narrows the scan; an uninformative statement
        // falls back to the full agent scope.
        let keywords = text::keyword_tokens(statement, 5);
        let base = queries::scoped(agent, false);
        let filter = if keywords.is_empty() {
            base
        } else {
            queries::all_of(vec![
                base,
                queries::any_of(
                    keywords
                        .iter()
                        .map(|kw| queries::substring("content", kw))
                        .collect(),
                ),
            ])
        };

        let candidates = self
            .select_page(
                filter,
                SortSpec::desc("last_updated"),
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

    /// Five-bucket confidence histogram over active beliefs, computed with
    /// the same boundaries as the document strategy.
    pub async fn confidence_histogram(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<HashMap<String, u64>> {
        let scoped = queries::scoped(agent, false);
        self.with_txn(move |txn| {
            Box::pin(async move {
                let mut counts = HashMap::new();
                for bucket in operations::histogram_ranges() {
                    let filter = queries::all_of(vec![
                        scoped.clone(),
                        QueryNode::Range {
                            field: "confidence".into(),
                            gte: bucket.from.map(Value::from),
                            gt: None,
                            lte: None,
                            lt: bucket.to.map(Value::from),
                        },
                    ]);
                    let count = txn.count(TABLE_BELIEF, &filter).await?;
                    counts.insert(bucket.key, count);
                }
                Ok(counts)
            })
        })
        .await
    }

    /// Conflicts referencing a belief id that is no longer stored.
    pub async fn verify_conflict_integrity(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<Vec<ConflictId>> {
        let scoped = queries::scoped(agent, true);
        self.with_txn(move |txn| {
            Box::pin(async move {
                let conflict_rows = txn
                    .select(&RowQuery::new(TABLE_CONFLICT, scoped))
                    .await?;
                let conflicts = hydrate_conflicts(&mut *txn, conflict_rows).await?;
                if conflicts.is_empty() {
                    return Ok(Vec::new());
                }

                let referenced: BTreeSet<&BeliefId> = conflicts
                    .iter()
                    .flat_map(|c| c.conflicting_belief_ids.iter())
                    .collect();
                let id_values: Vec<Value> = referenced
                    .iter()
                    .map(|id| Value::from(id.as_str()))
                    .collect();
                let known_rows = txn
                    .select(&RowQuery::new(TABLE_BELIEF, queries::terms("id", id_values)))
                    .await?;
                let known: BTreeSet<String> = known_rows
                    .iter()
                    .filter_map(|row| row.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();

                Ok(conflicts
                    .into_iter()
                    .filter(|c| {
                        c.conflicting_belief_ids
                            .iter()
                            .any(|id| !known.contains(id.as_str()))
                    })
                    .map(|c| c.id)
                    .collect())
            })
        })
        .await
    }
}

#[async_trait]
impl BeliefStore for RelationalBeliefStore {
    async fn put(&self, belief: Belief) -> StoreResult<Belief> {
        let result = self
            .with_txn(move |txn| Box::pin(store_belief(txn, belief)))
            .await;
        self.health.track(result)
    }

    async fn put_many(&self, beliefs: Vec<Belief>) -> StoreResult<Vec<Belief>> {
        // One transaction per chunk bounds the working set; the batch as a
        // whole is not atomic and failed items are skipped.
        let result = async {
            let mut stored = Vec::with_capacity(beliefs.len());
            for chunk in beliefs.chunks(self.config.batch_size.max(1)) {
                let chunk = chunk.to_vec();
                let outcome = self
                    .with_txn(move |txn| {
                        Box::pin(async move {
                            let mut ok = Vec::new();
                            for belief in chunk {
                                let id = belief.id.clone();
                                match store_belief(&mut *txn, belief).await {
                                    Ok(b) => ok.push(b),
                                    Err(e) => {
                                        warn!(belief_id = %id, error = %e, "skipping belief in batch put");
                                    }
                                }
                            }
                            Ok(ok)
                        })
                    })
                    .await?;
                stored.extend(outcome);
            }
            Ok(stored)
        }
        .await;
        self.health.track(result)
    }

    async fn get(&self, id: &BeliefId) -> StoreResult<Option<Belief>> {
        let id = id.clone();
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move {
                    let Some(row) = txn.get(TABLE_BELIEF, id.as_str()).await? else {
                        return Ok(None);
                    };
                    Ok(hydrate_beliefs(txn, vec![row]).await?.into_iter().next())
                })
            })
            .await;
        self.health.track(result)
    }

    async fn get_many(&self, ids: &[BeliefId]) -> StoreResult<Vec<Belief>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Value> = ids.iter().map(|id| Value::from(id.as_str())).collect();
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move {
                    let rows = txn
                        .select(&RowQuery::new(TABLE_BELIEF, queries::terms("id", values)))
                        .await?;
                    hydrate_beliefs(txn, rows).await
                })
            })
            .await;
        self.health.track(result)
    }

    async fn delete(&self, id: &BeliefId) -> StoreResult<bool> {
        let id = id.clone();
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move {
                    let removed = txn.delete(TABLE_BELIEF, id.as_str()).await?;
                    if removed {
                        let owner_filter = queries::term("belief_id", id.as_str());
                        txn.delete_where(TABLE_BELIEF_TAGS, &owner_filter).await?;
                        txn.delete_where(TABLE_BELIEF_EVIDENCE, &owner_filter).await?;
                    }
                    Ok(removed)
                })
            })
            .await;
        self.health.track(result)
    }

    async fn for_agent(
        &self,
        agent: &AgentId,
        include_inactive: bool,
    ) -> StoreResult<Vec<Belief>> {
        let result = self
            .select_page(
                queries::scoped(Some(agent), include_inactive),
                SortSpec::desc("last_updated"),
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
            .select_page(
                queries::scoped(Some(agent), include_inactive),
                SortSpec::desc("last_updated"),
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
            self.select_page(
                queries::all_of(vec![
                    queries::scoped(agent, include_inactive),
                    queries::category(category),
                ]),
                SortSpec::desc("last_updated"),
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
            self.select_page(
                queries::all_of(vec![
                    queries::scoped(agent, false),
                    queries::confidence_lt(threshold),
                ]),
                SortSpec::asc("confidence"),
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
            // Case-insensitive substring with ordering and limit in SQL.
            self.select_page(
                queries::all_of(vec![
                    queries::scoped(agent, false),
                    queries::substring("content", query),
                ]),
                SortSpec::desc("confidence"),
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
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move {
                    let row = conflict_to_row(&conflict);
                    if txn.get(TABLE_CONFLICT, conflict.id.as_str()).await?.is_some() {
                        txn.update(TABLE_CONFLICT, conflict.id.as_str(), row).await?;
                    } else {
                        txn.insert(TABLE_CONFLICT, row).await?;
                    }
                    let member_filter = queries::term("conflict_id", conflict.id.as_str());
                    txn.delete_where(TABLE_CONFLICT_BELIEFS, &member_filter).await?;
                    for belief_id in &conflict.conflicting_belief_ids {
                        let mut member = Row::new();
                        member.insert(
                            "id".into(),
                            format!("{}#{}", conflict.id.as_str(), belief_id.as_str()).into(),
                        );
                        member.insert("conflict_id".into(), conflict.id.as_str().into());
                        member.insert("belief_id".into(), belief_id.as_str().into());
                        txn.insert(TABLE_CONFLICT_BELIEFS, member).await?;
                    }
                    Ok(conflict)
                })
            })
            .await;
        self.health.track(result)
    }

    async fn get_conflict(&self, id: &ConflictId) -> StoreResult<Option<BeliefConflict>> {
        let id = id.clone();
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move {
                    let Some(row) = txn.get(TABLE_CONFLICT, id.as_str()).await? else {
                        return Ok(None);
                    };
                    Ok(hydrate_conflicts(txn, vec![row]).await?.into_iter().next())
                })
            })
            .await;
        self.health.track(result)
    }

    async fn unresolved_conflicts(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<Vec<BeliefConflict>> {
        let filter = queries::all_of(vec![
            queries::scoped(agent, true),
            queries::term("resolved", false),
        ]);
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move {
                    let rows = txn
                        .select(
                            &RowQuery::new(TABLE_CONFLICT, filter)
                                .order_by(SortSpec::desc("detected_at")),
                        )
                        .await?;
                    hydrate_conflicts(txn, rows).await
                })
            })
            .await;
        self.health.track(result)
    }

    async fn remove_conflict(&self, id: &ConflictId) -> StoreResult<bool> {
        let id = id.clone();
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move {
                    let removed = txn.delete(TABLE_CONFLICT, id.as_str()).await?;
                    if removed {
                        txn.delete_where(
                            TABLE_CONFLICT_BELIEFS,
                            &queries::term("conflict_id", id.as_str()),
                        )
                        .await?;
                    }
                    Ok(removed)
                })
            })
            .await;
        self.health.track(result)
    }

    async fn count(&self, agent: Option<&AgentId>, include_inactive: bool) -> StoreResult<u64> {
        let filter = queries::scoped(agent, include_inactive);
        let result = self
            .with_txn(move |txn| Box::pin(async move { txn.count(TABLE_BELIEF, &filter).await }))
            .await;
        self.health.track(result)
    }

    async fn distribution_by_category(
        &self,
        agent: Option<&AgentId>,
    ) -> StoreResult<HashMap<String, u64>> {
        let filter = queries::scoped(agent, false);
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move {
                    txn.group_count(TABLE_BELIEF, "primary_category", &filter).await
                })
            })
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
        let scoped = queries::scoped(agent, false);
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move {
                    let mut counts = HashMap::new();
                    for bucket in operations::summary_ranges() {
                        let filter = queries::all_of(vec![
                            scoped.clone(),
                            QueryNode::Range {
                                field: "confidence".into(),
                                gte: bucket.from.map(Value::from),
                                gt: None,
                                lte: None,
                                lt: bucket.to.map(Value::from),
                            },
                        ]);
                        let count = txn.count(TABLE_BELIEF, &filter).await?;
                        counts.insert(bucket.key, count);
                    }
                    Ok(counts)
                })
            })
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
        let result = self
            .with_txn(move |txn| {
                Box::pin(async move {
                    let counts = txn
                        .group_count(TABLE_BELIEF, "agent_id", &queries::match_all())
                        .await?;
                    let mut agents: Vec<AgentId> = counts
                        .into_keys()
                        .filter_map(|raw| AgentId::new(raw).ok())
                        .collect();
                    agents.sort();
                    Ok(agents)
                })
            })
            .await;
        self.health.track(result)
    }

    async fn healthy(&self) -> bool {
        let reachable = self.backend.ping().await.unwrap_or(false);
        reachable && self.health.healthy()
    }
}
