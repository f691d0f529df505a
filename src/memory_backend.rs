// In-Memory Reference Engines
// Full implementations of the document and relational ports over process
// memory. They back the test-suite and the in-memory store bundles; real
// search-engine or SQL drivers plug into the same ports.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::backend::{
    BatchUpdate, BulkItemError, BulkOutcome, DocumentBackend, IndexMapping, QueryNode,
    RefreshPolicy, RelationalBackend, RelationalTransaction, Row, RowQuery, RangeBucket,
    SearchHit, SearchRequest, SearchResponse, SortOrder, SortSpec,
};
use crate::errors::{StorageError, StoreResult};

/// Evaluate a query tree against one JSON object.
///
/// Term against an array field means containment, matching how keyword
/// arrays behave in search engines. Ranges compare numbers numerically and
/// strings lexicographically, which is order-correct for fixed-width
/// RFC 3339 timestamps.
pub fn eval_query(query: &QueryNode, doc: &serde_json::Map<String, Value>) -> bool {
    match query {
        QueryNode::MatchAll => true,
        QueryNode::Term { field, value } => match doc.get(field) {
            Some(Value::Array(items)) => items.contains(value),
            Some(actual) => values_equal(actual, value),
            None => false,
        },
        QueryNode::Terms { field, values } => match doc.get(field) {
            Some(Value::Array(items)) => values.iter().any(|v| items.contains(v)),
            Some(actual) => values.iter().any(|v| values_equal(actual, v)),
            None => false,
        },
        QueryNode::Prefix { field, value } => doc
            .get(field)
            .and_then(Value::as_str)
            .map(|s| s.to_lowercase().starts_with(&value.to_lowercase()))
            .unwrap_or(false),
        QueryNode::Substring { field, value } => doc
            .get(field)
            .and_then(Value::as_str)
            .map(|s| s.to_lowercase().contains(&value.to_lowercase()))
            .unwrap_or(false),
        QueryNode::Range {
            field,
            gte,
            gt,
            lte,
            lt,
        } => {
            let Some(actual) = doc.get(field) else {
                return false;
            };
            if actual.is_null() {
                return false;
            }
            let checks = [
                (gte, std::cmp::Ordering::Greater, true),
                (gt, std::cmp::Ordering::Greater, false),
            ];
            for (bound, wanted, or_equal) in checks {
                if let Some(bound) = bound {
                    match compare_values(actual, bound) {
                        Some(ord) if ord == wanted || (or_equal && ord.is_eq()) => {}
                        _ => return false,
                    }
                }
            }
            let checks = [
                (lte, std::cmp::Ordering::Less, true),
                (lt, std::cmp::Ordering::Less, false),
            ];
            for (bound, wanted, or_equal) in checks {
                if let Some(bound) = bound {
                    match compare_values(actual, bound) {
                        Some(ord) if ord == wanted || (or_equal && ord.is_eq()) => {}
                        _ => return false,
                    }
                }
            }
            true
        }
        QueryNode::Exists { field } => doc.get(field).map(|v| !v.is_null()).unwrap_or(false),
        QueryNode::And(clauses) => clauses.iter().all(|c| eval_query(c, doc)),
        QueryNode::Or(clauses) => clauses.iter().any(|c| eval_query(c, doc)),
        QueryNode::Not(clause) => !eval_query(clause, doc),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

fn compare_docs(a: &serde_json::Map<String, Value>, b: &serde_json::Map<String, Value>, sort: &[SortSpec]) -> std::cmp::Ordering {
    for spec in sort {
        if spec.field == "_score" {
            continue;
        }
        let va = a.get(&spec.field);
        let vb = b.get(&spec.field);
        let ord = match (va, vb) {
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        let ord = match spec.order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if !ord.is_eq() {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}

fn matches_pattern(name: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => name.starts_with(prefix),
        None => name == pattern,
    }
}

fn in_range(value: f64, bucket: &RangeBucket) -> bool {
    if let Some(from) = bucket.from {
        if value < from {
            return false;
        }
    }
    if let Some(to) = bucket.to {
        if value >= to {
            return false;
        }
    }
    true
}

#[derive(Debug, Default, Clone)]
struct IndexState {
    #[allow(dead_code)]
    mapping: IndexMapping,
    documents: BTreeMap<String, Value>,
}

/// Reference document/search engine held entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDocumentBackend {
    indices: RwLock<HashMap<String, IndexState>>,
}

impl InMemoryDocumentBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect_matching(
        &self,
        pattern: &str,
        query: &QueryNode,
    ) -> Vec<(String, String, serde_json::Map<String, Value>)> {
        let indices = self.indices.read();
        let mut matched = Vec::new();
        for (name, state) in indices.iter() {
            if !matches_pattern(name, pattern) {
                continue;
            }
            for (id, doc) in &state.documents {
                if let Value::Object(fields) = doc {
                    if eval_query(query, fields) {
                        matched.push((name.clone(), id.clone(), fields.clone()));
                    }
                }
            }
        }
        matched
    }
}

#[async_trait]
impl DocumentBackend for InMemoryDocumentBackend {
    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> StoreResult<()> {
        let mut indices = self.indices.write();
        if indices.contains_key(index) {
            return Err(StorageError::backend_conflict(format!(
                "index '{index}' already exists"
            )));
        }
        indices.insert(
            index.to_string(),
            IndexState {
                mapping: mapping.clone(),
                documents: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> StoreResult<bool> {
        Ok(self.indices.write().remove(index).is_some())
    }

    async fn index_exists(&self, index: &str) -> StoreResult<bool> {
        Ok(self.indices.read().contains_key(index))
    }

    async fn list_indices(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self
            .indices
            .read()
            .keys()
            .filter(|name| matches_pattern(name, pattern))
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }

    async fn put_document(
        &self,
        index: &str,
        id: &str,
        document: Value,
        _refresh: RefreshPolicy,
    ) -> StoreResult<()> {
        let mut indices = self.indices.write();
        // Writes to an absent index create it, mirroring engine defaults.
        let state = indices.entry(index.to_string()).or_default();
        state.documents.insert(id.to_string(), document);
        Ok(())
    }

    async fn get_document(&self, index: &str, id: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .indices
            .read()
            .get(index)
            .and_then(|state| state.documents.get(id))
            .cloned())
    }

    async fn delete_document(
        &self,
        index: &str,
        id: &str,
        _refresh: RefreshPolicy,
    ) -> StoreResult<bool> {
        let mut indices = self.indices.write();
        Ok(indices
            .get_mut(index)
            .map(|state| state.documents.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn bulk_put(
        &self,
        index: &str,
        documents: Vec<(String, Value)>,
        _refresh: RefreshPolicy,
    ) -> StoreResult<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        let mut indices = self.indices.write();
        let state = indices.entry(index.to_string()).or_default();
        for (id, doc) in documents {
            if doc.is_object() {
                state.documents.insert(id, doc);
                outcome.succeeded += 1;
            } else {
                outcome.errors.push(BulkItemError {
                    id,
                    reason: "document is not an object".to_string(),
                });
            }
        }
        Ok(outcome)
    }

    async fn search(&self, request: &SearchRequest) -> StoreResult<SearchResponse> {
        if !request.index.ends_with('*') && !self.indices.read().contains_key(&request.index) {
            return Err(StorageError::not_found("index", request.index.clone()));
        }
        let mut matched = self.collect_matching(&request.index, &request.query);
        matched.sort_by(|a, b| compare_docs(&a.2, &b.2, &request.sort).then(a.1.cmp(&b.1)));

        let total_hits = matched.len() as u64;
        let hits = matched
            .into_iter()
            .skip(request.from)
            .take(request.size)
            .map(|(index, id, fields)| SearchHit {
                id,
                index,
                source: Value::Object(fields),
                score: 1.0,
            })
            .collect();

        Ok(SearchResponse {
            hits,
            total_hits,
            timed_out: false,
        })
    }

    async fn count(&self, index: &str, query: &QueryNode) -> StoreResult<u64> {
        Ok(self.collect_matching(index, query).len() as u64)
    }

    async fn terms_aggregation(
        &self,
        index: &str,
        field: &str,
        query: &QueryNode,
    ) -> StoreResult<HashMap<String, u64>> {
        let mut counts = HashMap::new();
        for (_, _, doc) in self.collect_matching(index, query) {
            match doc.get(field) {
                Some(Value::String(value)) => {
                    *counts.entry(value.clone()).or_insert(0) += 1;
                }
                Some(Value::Array(items)) => {
                    for item in items {
                        if let Some(value) = item.as_str() {
                            *counts.entry(value.to_string()).or_insert(0) += 1;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn range_aggregation(
        &self,
        index: &str,
        field: &str,
        ranges: &[RangeBucket],
        query: &QueryNode,
    ) -> StoreResult<HashMap<String, u64>> {
        let mut counts: HashMap<String, u64> =
            ranges.iter().map(|r| (r.key.clone(), 0)).collect();
        for (_, _, doc) in self.collect_matching(index, query) {
            let Some(value) = doc.get(field).and_then(Value::as_f64) else {
                continue;
            };
            for bucket in ranges {
                if in_range(value, bucket) {
                    *counts.entry(bucket.key.clone()).or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn avg_aggregation(
        &self,
        index: &str,
        group_field: &str,
        value_field: &str,
        query: &QueryNode,
    ) -> StoreResult<HashMap<String, f64>> {
        let mut sums: HashMap<String, (f64, u64)> = HashMap::new();
        for (_, _, doc) in self.collect_matching(index, query) {
            let Some(group) = doc.get(group_field).and_then(Value::as_str) else {
                continue;
            };
            let Some(value) = doc.get(value_field).and_then(Value::as_f64) else {
                continue;
            };
            let entry = sums.entry(group.to_string()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
        Ok(sums
            .into_iter()
            .map(|(group, (sum, count))| (group, sum / count as f64))
            .collect())
    }

    async fn ping(&self) -> StoreResult<bool> {
        Ok(true)
    }
}

type Tables = HashMap<String, BTreeMap<String, Row>>;

/// Reference relational engine. A transaction works on a cloned table set
/// and swaps it in at commit; rollback simply drops the clone.
#[derive(Debug, Default)]
pub struct InMemoryRelationalBackend {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryRelationalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationalBackend for InMemoryRelationalBackend {
    async fn begin(&self) -> StoreResult<Box<dyn RelationalTransaction>> {
        let working = self.tables.read().clone();
        Ok(Box::new(InMemoryTransaction {
            shared: Arc::clone(&self.tables),
            working,
        }))
    }

    async fn table_exists(&self, table: &str) -> StoreResult<bool> {
        Ok(self.tables.read().contains_key(table))
    }

    async fn ping(&self) -> StoreResult<bool> {
        Ok(true)
    }
}

struct InMemoryTransaction {
    shared: Arc<RwLock<Tables>>,
    working: Tables,
}

impl InMemoryTransaction {
    fn rows_matching(&self, table: &str, filter: &QueryNode) -> Vec<Row> {
        self.working
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|row| eval_query(filter, row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn row_id(row: &Row) -> StoreResult<String> {
        row.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StorageError::serialization("row is missing its 'id' column"))
    }
}

#[async_trait]
impl RelationalTransaction for InMemoryTransaction {
    async fn insert(&mut self, table: &str, row: Row) -> StoreResult<()> {
        let id = Self::row_id(&row)?;
        let rows = self.working.entry(table.to_string()).or_default();
        if rows.contains_key(&id) {
            return Err(StorageError::backend_conflict(format!(
                "duplicate key '{id}' in table '{table}'"
            )));
        }
        rows.insert(id, row);
        Ok(())
    }

    async fn update(&mut self, table: &str, id: &str, row: Row) -> StoreResult<bool> {
        let Some(rows) = self.working.get_mut(table) else {
            return Ok(false);
        };
        if !rows.contains_key(id) {
            return Ok(false);
        }
        rows.insert(id.to_string(), row);
        Ok(true)
    }

    async fn delete(&mut self, table: &str, id: &str) -> StoreResult<bool> {
        Ok(self
            .working
            .get_mut(table)
            .map(|rows| rows.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn delete_where(&mut self, table: &str, filter: &QueryNode) -> StoreResult<u64> {
        let Some(rows) = self.working.get_mut(table) else {
            return Ok(0);
        };
        let doomed: Vec<String> = rows
            .iter()
            .filter(|(_, row)| eval_query(filter, row))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &doomed {
            rows.remove(id);
        }
        Ok(doomed.len() as u64)
    }

    async fn get(&mut self, table: &str, id: &str) -> StoreResult<Option<Row>> {
        Ok(self
            .working
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned())
    }

    async fn select(&mut self, query: &RowQuery) -> StoreResult<Vec<Row>> {
        let mut rows = self.rows_matching(&query.table, &query.filter);
        if !query.order_by.is_empty() {
            rows.sort_by(|a, b| compare_docs(a, b, &query.order_by));
        }
        let rows = rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();
        Ok(rows)
    }

    async fn count(&mut self, table: &str, filter: &QueryNode) -> StoreResult<u64> {
        Ok(self.rows_matching(table, filter).len() as u64)
    }

    async fn group_count(
        &mut self,
        table: &str,
        column: &str,
        filter: &QueryNode,
    ) -> StoreResult<HashMap<String, u64>> {
        let mut counts = HashMap::new();
        for row in self.rows_matching(table, filter) {
            if let Some(value) = row.get(column).and_then(Value::as_str) {
                *counts.entry(value.to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn group_avg(
        &mut self,
        table: &str,
        group_column: &str,
        avg_column: &str,
        filter: &QueryNode,
    ) -> StoreResult<HashMap<String, f64>> {
        let mut sums: HashMap<String, (f64, u64)> = HashMap::new();
        for row in self.rows_matching(table, filter) {
            let Some(group) = row.get(group_column).and_then(Value::as_str) else {
                continue;
            };
            let Some(value) = row.get(avg_column).and_then(Value::as_f64) else {
                continue;
            };
            let entry = sums.entry(group.to_string()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
        Ok(sums
            .into_iter()
            .map(|(group, (sum, count))| (group, sum / count as f64))
            .collect())
    }

    async fn execute_update(&mut self, update: &BatchUpdate) -> StoreResult<u64> {
        let Some(rows) = self.working.get_mut(&update.table) else {
            return Ok(0);
        };
        let mut affected = 0;
        for row in rows.values_mut() {
            if eval_query(&update.filter, row) {
                for (column, value) in &update.set {
                    row.insert(column.clone(), value.clone());
                }
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        *self.shared.write() = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn term_matches_scalars_and_arrays() {
        let fields = doc(json!({
            "agent_id": "a1",
            "active": true,
            "tags": ["coffee", "food"],
            "confidence": 0.8,
        }));

        assert!(eval_query(
            &QueryNode::Term {
                field: "agent_id".into(),
                value: json!("a1")
            },
            &fields
        ));
        assert!(eval_query(
            &QueryNode::Term {
                field: "tags".into(),
                value: json!("coffee")
            },
            &fields
        ));
        assert!(!eval_query(
            &QueryNode::Term {
                field: "tags".into(),
                value: json!("tea")
            },
            &fields
        ));
    }

    #[test]
    fn range_compares_numbers_and_strings() {
        let fields = doc(json!({
            "confidence": 0.75,
            "last_updated": "2026-01-02T00:00:00.000000Z",
        }));

        assert!(eval_query(
            &QueryNode::Range {
                field: "confidence".into(),
                gte: Some(json!(0.5)),
                gt: None,
                lte: None,
                lt: Some(json!(0.8)),
            },
            &fields
        ));
        assert!(eval_query(
            &QueryNode::Range {
                field: "last_updated".into(),
                gte: None,
                gt: Some(json!("2026-01-01T00:00:00.000000Z")),
                lte: None,
                lt: None,
            },
            &fields
        ));
        assert!(!eval_query(
            &QueryNode::Range {
                field: "confidence".into(),
                gte: Some(json!(0.8)),
                gt: None,
                lte: None,
                lt: None,
            },
            &fields
        ));
    }

    #[test]
    fn exists_ignores_nulls() {
        let fields = doc(json!({"effective_until": null, "effective_from": "2026-01-01"}));
        assert!(eval_query(
            &QueryNode::Exists {
                field: "effective_from".into()
            },
            &fields
        ));
        assert!(!eval_query(
            &QueryNode::Exists {
                field: "effective_until".into()
            },
            &fields
        ));
    }

    #[tokio::test]
    async fn document_backend_round_trip_and_pattern_search() {
        let backend = InMemoryDocumentBackend::new();
        backend
            .create_index("headkey-belief-a1-v1", &IndexMapping::default())
            .await
            .unwrap();

        let duplicate = backend
            .create_index("headkey-belief-a1-v1", &IndexMapping::default())
            .await;
        assert!(matches!(
            duplicate,
            Err(StorageError::BackendConflict { .. })
        ));

        backend
            .put_document(
                "headkey-belief-a1-v1",
                "b1",
                json!({"id": "b1", "agent_id": "a1", "confidence": 0.9}),
                RefreshPolicy::WaitFor,
            )
            .await
            .unwrap();
        backend
            .put_document(
                "headkey-belief-a2-v1",
                "b2",
                json!({"id": "b2", "agent_id": "a2", "confidence": 0.4}),
                RefreshPolicy::WaitFor,
            )
            .await
            .unwrap();

        let response = backend
            .search(&SearchRequest {
                index: "headkey-belief-*".into(),
                query: QueryNode::MatchAll,
                sort: vec![SortSpec::desc("confidence")],
                from: 0,
                size: 10,
                timeout_ms: 1000,
                track_total_hits: true,
            })
            .await
            .unwrap();
        assert_eq!(response.total_hits, 2);
        assert_eq!(response.hits[0].id, "b1");

        let missing = backend
            .search(&SearchRequest {
                index: "no-such-index".into(),
                query: QueryNode::MatchAll,
                sort: vec![],
                from: 0,
                size: 10,
                timeout_ms: 1000,
                track_total_hits: true,
            })
            .await;
        assert!(matches!(missing, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn relational_transactions_commit_and_rollback() {
        let backend = InMemoryRelationalBackend::new();

        let mut txn = backend.begin().await.unwrap();
        let mut row = Row::new();
        row.insert("id".into(), json!("b1"));
        row.insert("agent_id".into(), json!("a1"));
        txn.insert("belief", row.clone()).await.unwrap();
        assert!(matches!(
            txn.insert("belief", row).await,
            Err(StorageError::BackendConflict { .. })
        ));
        txn.commit().await.unwrap();
        assert!(backend.table_exists("belief").await.unwrap());

        // A rolled-back delete leaves the committed row in place.
        let mut txn = backend.begin().await.unwrap();
        assert!(txn.delete("belief", "b1").await.unwrap());
        txn.rollback().await.unwrap();

        let mut txn = backend.begin().await.unwrap();
        assert!(txn.get("belief", "b1").await.unwrap().is_some());
        txn.commit().await.unwrap();
    }

    #[tokio::test]
    async fn batch_update_is_single_statement() {
        let backend = InMemoryRelationalBackend::new();
        let mut txn = backend.begin().await.unwrap();
        for i in 0..3 {
            let mut row = Row::new();
            row.insert("id".into(), json!(format!("r{i}")));
            row.insert("active".into(), json!(true));
            txn.insert("belief_relationship", row).await.unwrap();
        }
        let mut set = serde_json::Map::new();
        set.insert("active".into(), json!(false));
        let affected = txn
            .execute_update(&BatchUpdate {
                table: "belief_relationship".into(),
                filter: QueryNode::Terms {
                    field: "id".into(),
                    values: vec![json!("r0"), json!("r2")],
                },
                set,
            })
            .await
            .unwrap();
        assert_eq!(affected, 2);
        txn.commit().await.unwrap();
    }
}
