// Shared Store Operations
// Query builders, the concurrent existence cache, base search settings and
// the text-scoring utilities both storage strategies lean on. The graph
// query layer composes stores and never reaches into this module.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use crate::backend::{QueryNode, RangeBucket, SearchRequest, SortSpec};
use crate::errors::StoreResult;
use crate::types::AgentId;

/// Lower bound applied to every search timeout.
pub const MIN_SEARCH_TIMEOUT_MS: u64 = 1000;

/// Confidence bucket boundaries: high >= 0.8, medium >= 0.5, low otherwise.
pub const HIGH_CONFIDENCE: f64 = 0.8;
pub const MEDIUM_CONFIDENCE: f64 = 0.5;

/// Runtime configuration for the storage strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub search_timeout_ms: u64,
    pub max_results: usize,
    pub batch_size: usize,
    pub auto_create_indices: bool,
    pub stream_page_size: usize,
    pub memory_index_prefix: String,
    pub belief_index_prefix: String,
    pub relationship_index_prefix: String,
    pub conflict_index_prefix: String,
    pub index_version_suffix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            search_timeout_ms: 30_000,
            max_results: 10_000,
            batch_size: 100,
            auto_create_indices: true,
            stream_page_size: 1000,
            memory_index_prefix: "headkey-memory".to_string(),
            belief_index_prefix: "headkey-belief".to_string(),
            relationship_index_prefix: "headkey-relationship".to_string(),
            conflict_index_prefix: "headkey-conflict".to_string(),
            index_version_suffix: "v1".to_string(),
        }
    }
}

impl StoreConfig {
    /// Timeout with the floor applied.
    pub fn effective_timeout_ms(&self) -> u64 {
        self.search_timeout_ms.max(MIN_SEARCH_TIMEOUT_MS)
    }
}

/// Build `<prefix>-<sanitized agent>-<suffix>`.
pub fn index_name(prefix: &str, agent: &AgentId, suffix: &str) -> String {
    format!("{}-{}-{}", prefix, agent.sanitized(), suffix)
}

/// Pattern matching every agent's index under a prefix.
pub fn index_pattern(prefix: &str) -> String {
    format!("{prefix}-*")
}

/// Base search request: capped size, floored timeout, total hits tracked,
/// relevance-descending sort until a caller overrides it.
pub fn base_search(config: &StoreConfig, index: impl Into<String>, query: QueryNode) -> SearchRequest {
    SearchRequest {
        index: index.into(),
        query,
        sort: vec![SortSpec::desc("_score")],
        from: 0,
        size: config.max_results,
        timeout_ms: config.effective_timeout_ms(),
        track_total_hits: true,
    }
}

/// Summary bucket name for a confidence value.
pub fn confidence_bucket(confidence: f64) -> &'static str {
    if confidence >= HIGH_CONFIDENCE {
        "high"
    } else if confidence >= MEDIUM_CONFIDENCE {
        "medium"
    } else {
        "low"
    }
}

/// The three summary ranges backing `distribution_by_confidence_bucket`.
pub fn summary_ranges() -> Vec<RangeBucket> {
    vec![
        RangeBucket::new("low", None, Some(MEDIUM_CONFIDENCE)),
        RangeBucket::new("medium", Some(MEDIUM_CONFIDENCE), Some(HIGH_CONFIDENCE)),
        RangeBucket::new("high", Some(HIGH_CONFIDENCE), None),
    ]
}

/// Five even ranges for the fine-grained confidence histogram.
pub fn histogram_ranges() -> Vec<RangeBucket> {
    vec![
        RangeBucket::new("0.0-0.2", Some(0.0), Some(0.2)),
        RangeBucket::new("0.2-0.4", Some(0.2), Some(0.4)),
        RangeBucket::new("0.4-0.6", Some(0.4), Some(0.6)),
        RangeBucket::new("0.6-0.8", Some(0.6), Some(0.8)),
        RangeBucket::new("0.8-1.0", Some(0.8), None),
    ]
}

/// Query builders for the shapes both strategies issue.
pub mod queries {
    use super::*;

    pub fn match_all() -> QueryNode {
        QueryNode::MatchAll
    }

    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> QueryNode {
        QueryNode::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms(field: impl Into<String>, values: Vec<Value>) -> QueryNode {
        QueryNode::Terms {
            field: field.into(),
            values,
        }
    }

    pub fn by_agent(agent: &AgentId) -> QueryNode {
        term("agent_id", agent.as_str())
    }

    pub fn active_only() -> QueryNode {
        term("active", true)
    }

    pub fn category(category: &str) -> QueryNode {
        term("primary_category", category)
    }

    pub fn substring(field: impl Into<String>, text: &str) -> QueryNode {
        QueryNode::Substring {
            field: field.into(),
            value: text.to_lowercase(),
        }
    }

    pub fn confidence_gte(threshold: f64) -> QueryNode {
        QueryNode::Range {
            field: "confidence".into(),
            gte: Some(threshold.into()),
            gt: None,
            lte: None,
            lt: None,
        }
    }

    pub fn confidence_lt(threshold: f64) -> QueryNode {
        QueryNode::Range {
            field: "confidence".into(),
            gte: None,
            gt: None,
            lte: None,
            lt: Some(threshold.into()),
        }
    }

    pub fn confidence_range(min: f64, max: f64) -> QueryNode {
        QueryNode::Range {
            field: "confidence".into(),
            gte: Some(min.into()),
            gt: None,
            lte: Some(max.into()),
            lt: None,
        }
    }

    pub fn exists(field: impl Into<String>) -> QueryNode {
        QueryNode::Exists {
            field: field.into(),
        }
    }

    pub fn all_of(clauses: Vec<QueryNode>) -> QueryNode {
        match clauses.len() {
            1 => clauses.into_iter().next().unwrap(),
            _ => QueryNode::And(clauses),
        }
    }

    pub fn any_of(clauses: Vec<QueryNode>) -> QueryNode {
        match clauses.len() {
            1 => clauses.into_iter().next().unwrap(),
            _ => QueryNode::Or(clauses),
        }
    }

    pub fn negate(clause: QueryNode) -> QueryNode {
        QueryNode::Not(Box::new(clause))
    }

    /// Agent scope plus optional active filter, the most common base.
    pub fn scoped(agent: Option<&AgentId>, include_inactive: bool) -> QueryNode {
        let mut clauses = Vec::new();
        if let Some(agent) = agent {
            clauses.push(by_agent(agent));
        }
        if !include_inactive {
            clauses.push(active_only());
        }
        if clauses.is_empty() {
            match_all()
        } else {
            all_of(clauses)
        }
    }
}

/// Process-wide concurrent existence cache for indices and tables.
///
/// `check_or_probe` has compute-if-absent semantics: a cached true short
/// circuits, anything else runs the probe once and caches a positive
/// result. Creation errors that mean "already exists" should be followed
/// by `mark_exists`; deletions must `invalidate`.
#[derive(Debug, Default)]
pub struct ExistenceCache {
    inner: DashMap<String, bool>,
}

impl ExistenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn check_or_probe<F, Fut>(&self, key: &str, probe: F) -> StoreResult<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<bool>>,
    {
        if let Some(entry) = self.inner.get(key) {
            if *entry {
                return Ok(true);
            }
        }
        let exists = probe().await?;
        if exists {
            self.inner.insert(key.to_string(), true);
        }
        Ok(exists)
    }

    pub fn mark_exists(&self, key: &str) {
        self.inner.insert(key.to_string(), true);
    }

    pub fn invalidate(&self, key: &str) {
        self.inner.remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.get(key).map(|v| *v).unwrap_or(false)
    }
}

/// Text utilities shared by similarity scoring and keyword search.
pub mod text {
    use super::*;

    /// Tokens carrying little signal, dropped before overlap scoring.
    pub static STOP_WORDS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
        [
            "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "had", "has",
            "have", "he", "her", "his", "i", "in", "is", "it", "its", "my", "of", "on", "or",
            "our", "she", "that", "the", "their", "them", "they", "this", "to", "was", "we",
            "were", "will", "with", "you", "your",
        ]
        .into_iter()
        .collect()
    });

    /// Lowercased whitespace tokens, punctuation trimmed.
    pub fn tokenize(text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|t| {
                t.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|t| !t.is_empty())
            .collect()
    }

    /// Token set for similarity scoring.
    pub fn token_set(text: &str) -> BTreeSet<String> {
        tokenize(text).into_iter().collect()
    }

    /// Jaccard similarity over whitespace token sets. Two empty inputs
    /// score zero; identical inputs score 1.0. Symmetric by construction.
    pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
        let set_a = token_set(a);
        let set_b = token_set(b);
        if set_a.is_empty() && set_b.is_empty() {
            return 0.0;
        }
        let intersection = set_a.intersection(&set_b).count() as f64;
        let union = set_a.union(&set_b).count() as f64;
        if union == 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    /// The most informative tokens of a statement: stop words and tokens
    /// of two characters or fewer dropped, ranked by frequency then first
    /// appearance, capped at `limit`.
    pub fn keyword_tokens(text: &str, limit: usize) -> Vec<String> {
        let tokens = tokenize(text);
        let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for (position, token) in tokens.into_iter().enumerate() {
            if token.len() <= 2 || STOP_WORDS.contains(token.as_str()) {
                continue;
            }
            let entry = counts.entry(token).or_insert((0, position));
            entry.0 += 1;
        }
        let mut ranked: Vec<(String, usize, usize)> = counts
            .into_iter()
            .map(|(token, (count, first))| (token, count, first))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked.into_iter().take(limit).map(|(t, _, _)| t).collect()
    }

    /// Canonical form for exact-match comparison: lowercased tokens with
    /// punctuation trimmed, joined by single spaces. Order and duplicates
    /// survive normalization.
    pub fn normalize(statement: &str) -> String {
        tokenize(statement).join(" ")
    }

    /// Overlap score used by `find_similar`: Jaccard over stop-word
    /// filtered tokens, falling back to plain Jaccard when filtering
    /// strips everything.
    ///
    /// A score of 1.0 means the statements are literally equal after
    /// normalization. Permuted or duplicated tokens produce an identical
    /// token set, so the set overlap alone cannot certify exactness; such
    /// statements are held strictly below 1.0.
    pub fn statement_similarity(a: &str, b: &str) -> f64 {
        if normalize(a) == normalize(b) {
            return 1.0;
        }
        let filter = |text: &str| -> BTreeSet<String> {
            token_set(text)
                .into_iter()
                .filter(|t| !STOP_WORDS.contains(t.as_str()))
                .collect()
        };
        let set_a = filter(a);
        let set_b = filter(b);
        let score = if set_a.is_empty() || set_b.is_empty() {
            jaccard_similarity(a, b)
        } else {
            let intersection = set_a.intersection(&set_b).count() as f64;
            let union = set_a.union(&set_b).count() as f64;
            intersection / union
        };
        score.min(0.99)
    }
}
