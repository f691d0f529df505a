// Backend Ports
// Abstract capability sets the two storage strategies are written against.
// Concrete search-engine and SQL drivers live outside the crate; the
// reference in-memory engines implement these ports for tests and local use.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::errors::StoreResult;

/// A row is a flat column map. Collection-valued belief fields live in
/// element-collection side tables, not in row values.
pub type Row = serde_json::Map<String, Value>;

/// Query tree shared by both ports. The document engine evaluates it over
/// JSON documents, the relational engine over rows; the operations helper
/// builds the common shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryNode {
    MatchAll,
    /// Field equals value. For array-valued fields this is containment.
    Term { field: String, value: Value },
    /// Field equals any of the values.
    Terms { field: String, values: Vec<Value> },
    /// Case-insensitive prefix over a string field.
    Prefix { field: String, value: String },
    /// Case-insensitive substring over a string field.
    Substring { field: String, value: String },
    /// Range over numbers or RFC 3339 timestamps.
    Range {
        field: String,
        gte: Option<Value>,
        gt: Option<Value>,
        lte: Option<Value>,
        lt: Option<Value>,
    },
    /// Field is present and non-null.
    Exists { field: String },
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
    Not(Box<QueryNode>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A sort key. The reserved field `_score` sorts by relevance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Whether a write must be visible to the next search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RefreshPolicy {
    /// Visibility follows the engine's own refresh cadence.
    #[default]
    Eventual,
    /// Block until the write is searchable.
    WaitFor,
}

/// One search over an index or an index pattern (trailing `*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub index: String,
    pub query: QueryNode,
    pub sort: Vec<SortSpec>,
    pub from: usize,
    pub size: usize,
    pub timeout_ms: u64,
    pub track_total_hits: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub index: String,
    pub source: Value,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub total_hits: u64,
    pub timed_out: bool,
}

/// Field types the core declares in index mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Keyword,
    Text,
    Double,
    Long,
    Boolean,
    Date,
    Object,
    DenseVector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub name: String,
    pub field_type: FieldType,
    /// Opaque payloads (relationship metadata) disable indexing.
    pub indexed: bool,
}

impl FieldMapping {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            indexed: true,
        }
    }

    pub fn unindexed(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            indexed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexMapping {
    pub fields: Vec<FieldMapping>,
}

/// One numeric range bucket for aggregation requests. Bounds follow the
/// half-open convention `[from, to)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBucket {
    pub key: String,
    pub from: Option<f64>,
    pub to: Option<f64>,
}

impl RangeBucket {
    pub fn new(key: impl Into<String>, from: Option<f64>, to: Option<f64>) -> Self {
        Self {
            key: key.into(),
            from,
            to,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemError {
    pub id: String,
    pub reason: String,
}

/// Outcome of a bulk write. Bulk operations are not atomic; failed items
/// are reported alongside the success count.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub succeeded: u64,
    pub errors: Vec<BulkItemError>,
}

/// Document/search engine port.
///
/// Indices are named per agent; reads are eventually consistent unless the
/// writer requested `WaitFor`. Creating an index that already exists fails
/// with `BackendConflict`, which auto-create paths treat as success.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> StoreResult<()>;

    /// Returns false when the index did not exist.
    async fn delete_index(&self, index: &str) -> StoreResult<bool>;

    async fn index_exists(&self, index: &str) -> StoreResult<bool>;

    /// Concrete index names matching a `prefix*` pattern.
    async fn list_indices(&self, pattern: &str) -> StoreResult<Vec<String>>;

    async fn put_document(
        &self,
        index: &str,
        id: &str,
        document: Value,
        refresh: RefreshPolicy,
    ) -> StoreResult<()>;

    async fn get_document(&self, index: &str, id: &str) -> StoreResult<Option<Value>>;

    async fn delete_document(
        &self,
        index: &str,
        id: &str,
        refresh: RefreshPolicy,
    ) -> StoreResult<bool>;

    async fn bulk_put(
        &self,
        index: &str,
        documents: Vec<(String, Value)>,
        refresh: RefreshPolicy,
    ) -> StoreResult<BulkOutcome>;

    async fn search(&self, request: &SearchRequest) -> StoreResult<SearchResponse>;

    async fn count(&self, index: &str, query: &QueryNode) -> StoreResult<u64>;

    /// Distinct values of `field` with their document counts.
    async fn terms_aggregation(
        &self,
        index: &str,
        field: &str,
        query: &QueryNode,
    ) -> StoreResult<HashMap<String, u64>>;

    /// Document counts per numeric range bucket, keyed by bucket key.
    async fn range_aggregation(
        &self,
        index: &str,
        field: &str,
        ranges: &[RangeBucket],
        query: &QueryNode,
    ) -> StoreResult<HashMap<String, u64>>;

    /// Mean of `value_field` grouped by `group_field`.
    async fn avg_aggregation(
        &self,
        index: &str,
        group_field: &str,
        value_field: &str,
        query: &QueryNode,
    ) -> StoreResult<HashMap<String, f64>>;

    async fn ping(&self) -> StoreResult<bool>;
}

/// A row selection with ordering and paging pushed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowQuery {
    pub table: String,
    pub filter: QueryNode,
    pub order_by: Vec<SortSpec>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl RowQuery {
    pub fn new(table: impl Into<String>, filter: QueryNode) -> Self {
        Self {
            table: table.into(),
            filter,
            order_by: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    pub fn order_by(mut self, sort: SortSpec) -> Self {
        self.order_by.push(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// A single DML statement mutating every row matching the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub table: String,
    pub filter: QueryNode,
    pub set: serde_json::Map<String, Value>,
}

/// Relational engine port. Work happens inside explicit transactions.
#[async_trait]
pub trait RelationalBackend: Send + Sync {
    /// Open a transaction. Every store operation owns exactly one and
    /// finishes it with `commit` or `rollback`.
    async fn begin(&self) -> StoreResult<Box<dyn RelationalTransaction>>;

    async fn table_exists(&self, table: &str) -> StoreResult<bool>;

    async fn ping(&self) -> StoreResult<bool>;
}

/// Transaction capability of the relational port.
///
/// Rows are keyed by their `id` column. Inserting a duplicate key fails
/// with `BackendConflict`.
#[async_trait]
pub trait RelationalTransaction: Send {
    async fn insert(&mut self, table: &str, row: Row) -> StoreResult<()>;

    /// Replace the row with the given id. Returns false when absent.
    async fn update(&mut self, table: &str, id: &str, row: Row) -> StoreResult<bool>;

    async fn delete(&mut self, table: &str, id: &str) -> StoreResult<bool>;

    /// Delete every row matching the filter; returns the count removed.
    async fn delete_where(&mut self, table: &str, filter: &QueryNode) -> StoreResult<u64>;

    async fn get(&mut self, table: &str, id: &str) -> StoreResult<Option<Row>>;

    async fn select(&mut self, query: &RowQuery) -> StoreResult<Vec<Row>>;

    async fn count(&mut self, table: &str, filter: &QueryNode) -> StoreResult<u64>;

    /// `GROUP BY column` with `COUNT(*)`, keyed by the column's string value.
    async fn group_count(
        &mut self,
        table: &str,
        column: &str,
        filter: &QueryNode,
    ) -> StoreResult<HashMap<String, u64>>;

    /// `GROUP BY group_column` with `AVG(avg_column)`.
    async fn group_avg(
        &mut self,
        table: &str,
        group_column: &str,
        avg_column: &str,
        filter: &QueryNode,
    ) -> StoreResult<HashMap<String, f64>>;

    /// Apply a single-statement batch update; returns rows affected.
    async fn execute_update(&mut self, update: &BatchUpdate) -> StoreResult<u64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_query_builder_composes() {
        let q = RowQuery::new(
            "belief",
            QueryNode::Term {
                field: "agent_id".into(),
                value: Value::String("a1".into()),
            },
        )
        .order_by(SortSpec::desc("last_updated"))
        .limit(25)
        .offset(50);

        assert_eq!(q.table, "belief");
        assert_eq!(q.limit, Some(25));
        assert_eq!(q.offset, 50);
        assert_eq!(q.order_by.len(), 1);
        assert_eq!(q.order_by[0].order, SortOrder::Desc);
    }

    #[test]
    fn unindexed_mapping_flag() {
        let field = FieldMapping::unindexed("metadata", FieldType::Object);
        assert!(!field.indexed);
        let field = FieldMapping::new("strength", FieldType::Double);
        assert!(field.indexed);
    }
}
