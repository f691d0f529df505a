// Extraction Ports
// Contracts for model-backed belief extraction, similarity, conflict
// detection, categorization, confidence scoring and tag extraction,
// together with the deterministic heuristics the crate ships. The
// heuristics are total functions used whenever a port is absent or fails.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::errors::{StorageError, StoreResult};
use crate::operations::text;
use crate::types::{clamp_unit, AgentId};

/// Reasoning string substituted when a port returns none.
pub const DEFAULT_REASONING: &str = "Derived by deterministic heuristics";

/// A candidate belief produced from unstructured content, before persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedBelief {
    pub statement: String,
    pub agent_id: AgentId,
    /// Never empty; extraction substitutes `general` when unset.
    pub category: String,
    pub confidence: f64,
    /// False when the statement is a negation.
    pub positive: bool,
    pub reasoning: String,
    pub tags: BTreeSet<String>,
}

/// Result of schema-aware category extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryExtraction {
    pub primary: String,
    pub secondary: Option<String>,
    pub confidence: f64,
    pub reasoning: String,
}

/// Result of tag extraction: free tags plus entities grouped by kind.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TagExtraction {
    pub tags: BTreeSet<String>,
    pub entities: HashMap<String, Vec<String>>,
}

/// Converts free text into candidate beliefs.
///
/// # Contract
/// - blank `agent_id` fails with `InvalidInput`
/// - blank content yields an empty list, never an error
#[async_trait]
pub trait BeliefExtractor: Send + Sync {
    async fn extract_beliefs(
        &self,
        content: &str,
        agent_id: &str,
        category: Option<&str>,
    ) -> StoreResult<Vec<ExtractedBelief>>;

    async fn healthy(&self) -> bool {
        true
    }
}

/// Scores semantic similarity of two statements into `[0, 1]`.
/// Missing inputs score zero; the score is symmetric.
#[async_trait]
pub trait SimilarityScorer: Send + Sync {
    async fn similarity(&self, a: Option<&str>, b: Option<&str>) -> StoreResult<f64>;

    async fn healthy(&self) -> bool {
        true
    }
}

/// Decides whether two statements are in conflict.
#[async_trait]
pub trait ConflictDetector: Send + Sync {
    async fn conflicts(
        &self,
        a: &str,
        b: &str,
        category_a: Option<&str>,
        category_b: Option<&str>,
    ) -> StoreResult<bool>;

    async fn healthy(&self) -> bool {
        true
    }
}

/// Assigns a coarse free-form category to one statement.
#[async_trait]
pub trait Categorizer: Send + Sync {
    async fn categorize(&self, statement: &str) -> StoreResult<String>;

    async fn healthy(&self) -> bool {
        true
    }
}

/// Scores how confident the system should be in a statement given the
/// content it came from.
#[async_trait]
pub trait ConfidenceScorer: Send + Sync {
    async fn confidence(
        &self,
        content: &str,
        statement: &str,
        context: Option<&str>,
    ) -> StoreResult<f64>;

    async fn healthy(&self) -> bool {
        true
    }
}

/// Schema-aware category extraction used by the categorization engine.
#[async_trait]
pub trait CategoryExtractor: Send + Sync {
    async fn extract_category_with_schema(
        &self,
        content: &str,
        available_categories: &BTreeSet<String>,
        context_metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> StoreResult<CategoryExtraction>;

    async fn healthy(&self) -> bool {
        true
    }
}

/// Tag and entity extraction used by the categorization engine.
#[async_trait]
pub trait TagExtractor: Send + Sync {
    async fn extract_tags(&self, content: &str, context: Option<&str>)
        -> StoreResult<TagExtraction>;

    async fn healthy(&self) -> bool {
        true
    }
}

/// Closed set of negation tokens the conflict fallback keys on.
pub static NEGATION_TOKENS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        "not", "no", "never", "none", "neither", "nor", "nothing", "cannot", "can't", "don't",
        "doesn't", "didn't", "won't", "isn't", "aren't", "wasn't", "weren't",
    ]
    .into_iter()
    .collect()
});

static CERTAINTY_MARKERS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        "definitely",
        "certainly",
        "absolutely",
        "clearly",
        "obviously",
        "undoubtedly",
        "always",
    ]
    .into_iter()
    .collect()
});

static HEDGING_MARKERS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        "maybe",
        "might",
        "possibly",
        "perhaps",
        "probably",
        "seems",
        "guess",
        "unsure",
        "apparently",
        "could",
    ]
    .into_iter()
    .collect()
});

/// Context token that marks content as coming from a trusted source.
pub const TRUSTED_CONTEXT: &str = "user_input";

fn contains_any(statement: &str, tokens: &BTreeSet<&'static str>) -> bool {
    text::tokenize(statement)
        .iter()
        .any(|t| tokens.contains(t.as_str()))
}

/// Whether the statement carries a token from the closed negation set.
pub fn has_negation(statement: &str) -> bool {
    contains_any(statement, &NEGATION_TOKENS)
}

/// Keyword-bucket category assignment, the categorize fallback.
pub fn keyword_category(statement: &str) -> String {
    let tokens: BTreeSet<String> = text::tokenize(statement).into_iter().collect();
    let has = |words: &[&str]| words.iter().any(|w| tokens.contains(*w));

    if has(&[
        "like", "love", "prefer", "favorite", "hate", "dislike", "enjoy", "want",
    ]) {
        "preference".to_string()
    } else if has(&[
        "friend", "friends", "family", "mother", "father", "brother", "sister", "wife",
        "husband", "colleague", "married",
    ]) {
        "relationship".to_string()
    } else if has(&[
        "live", "lives", "located", "location", "city", "country", "address", "near", "moved",
    ]) {
        "location".to_string()
    } else if has(&["think", "believe", "feel", "opinion", "seems", "suppose"]) {
        "opinion".to_string()
    } else if has(&["is", "are", "was", "were", "has", "have", "contains"]) {
        "fact".to_string()
    } else {
        "general".to_string()
    }
}

/// Marker-based confidence scoring, the confidence fallback.
///
/// Starts at 0.5; certainty markers add 0.2, hedging subtracts 0.2, a
/// trusted context adds 0.1. The result is clamped to `[0, 1]`.
pub fn heuristic_confidence(statement: &str, context: Option<&str>) -> f64 {
    let mut confidence = 0.5;
    if contains_any(statement, &CERTAINTY_MARKERS) {
        confidence += 0.2;
    }
    if contains_any(statement, &HEDGING_MARKERS) {
        confidence -= 0.2;
    }
    if context == Some(TRUSTED_CONTEXT) {
        confidence += 0.1;
    }
    clamp_unit(confidence)
}

/// The deterministic implementation of every extraction port.
#[derive(Debug, Clone, Default)]
pub struct HeuristicExtractionService;

impl HeuristicExtractionService {
    pub fn new() -> Self {
        Self
    }

    fn split_sentences(content: &str) -> Vec<&str> {
        content
            .split(['.', '!', '?', '\n'])
            .map(str::trim)
            .filter(|s| s.len() >= 3)
            .collect()
    }
}

#[async_trait]
impl BeliefExtractor for HeuristicExtractionService {
    async fn extract_beliefs(
        &self,
        content: &str,
        agent_id: &str,
        category: Option<&str>,
    ) -> StoreResult<Vec<ExtractedBelief>> {
        if agent_id.trim().is_empty() {
            return Err(StorageError::invalid_input(
                "agent_id",
                "must not be blank",
            ));
        }
        let agent = AgentId::new(agent_id)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let explicit = category.map(str::trim).filter(|c| !c.is_empty());
        Ok(Self::split_sentences(content)
            .into_iter()
            .map(|sentence| ExtractedBelief {
                statement: sentence.to_string(),
                agent_id: agent.clone(),
                category: explicit
                    .map(str::to_string)
                    .unwrap_or_else(|| keyword_category(sentence)),
                confidence: heuristic_confidence(sentence, None),
                positive: !has_negation(sentence),
                reasoning: DEFAULT_REASONING.to_string(),
                tags: text::keyword_tokens(sentence, 5).into_iter().collect(),
            })
            .collect())
    }
}

#[async_trait]
impl SimilarityScorer for HeuristicExtractionService {
    async fn similarity(&self, a: Option<&str>, b: Option<&str>) -> StoreResult<f64> {
        match (a, b) {
            (Some(a), Some(b)) => Ok(text::jaccard_similarity(a, b)),
            _ => Ok(0.0),
        }
    }
}

#[async_trait]
impl ConflictDetector for HeuristicExtractionService {
    async fn conflicts(
        &self,
        a: &str,
        b: &str,
        _category_a: Option<&str>,
        _category_b: Option<&str>,
    ) -> StoreResult<bool> {
        // Exactly one side negated, over otherwise similar statements.
        let negated = has_negation(a) ^ has_negation(b);
        Ok(negated && text::jaccard_similarity(a, b) > 0.6)
    }
}

#[async_trait]
impl Categorizer for HeuristicExtractionService {
    async fn categorize(&self, statement: &str) -> StoreResult<String> {
        Ok(keyword_category(statement))
    }
}

#[async_trait]
impl ConfidenceScorer for HeuristicExtractionService {
    async fn confidence(
        &self,
        _content: &str,
        statement: &str,
        context: Option<&str>,
    ) -> StoreResult<f64> {
        Ok(heuristic_confidence(statement, context))
    }
}

#[async_trait]
impl CategoryExtractor for HeuristicExtractionService {
    async fn extract_category_with_schema(
        &self,
        content: &str,
        available_categories: &BTreeSet<String>,
        _context_metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> StoreResult<CategoryExtraction> {
        let tokens: BTreeSet<String> = text::tokenize(content).into_iter().collect();
        let has = |words: &[&str]| words.iter().any(|w| tokens.contains(*w));

        let candidate = if has(&[
            "code", "software", "server", "database", "api", "algorithm", "deploy",
        ]) {
            "TechnicalKnowledge"
        } else if has(&["goal", "plan", "aim", "intend", "deadline"]) {
            "Goal"
        } else {
            match keyword_category(content).as_str() {
                "preference" => "Preference",
                "relationship" => "UserProfile",
                "location" => "PersonalData",
                "opinion" => "EmotionalState",
                "fact" => "WorldFact",
                _ => crate::contracts::UNKNOWN_CATEGORY,
            }
        };

        let (primary, confidence) = if available_categories.contains(candidate) {
            (candidate.to_string(), 0.6)
        } else {
            (crate::contracts::UNKNOWN_CATEGORY.to_string(), 0.3)
        };

        Ok(CategoryExtraction {
            primary,
            secondary: None,
            confidence,
            reasoning: DEFAULT_REASONING.to_string(),
        })
    }
}

#[async_trait]
impl TagExtractor for HeuristicExtractionService {
    async fn extract_tags(
        &self,
        content: &str,
        _context: Option<&str>,
    ) -> StoreResult<TagExtraction> {
        Ok(TagExtraction {
            tags: text::keyword_tokens(content, 8).into_iter().collect(),
            entities: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> HeuristicExtractionService {
        HeuristicExtractionService::new()
    }

    #[tokio::test]
    async fn similarity_identity_symmetry_and_nulls() {
        let s = service();
        assert_eq!(
            s.similarity(Some("I like coffee"), Some("I like coffee"))
                .await
                .unwrap(),
            1.0
        );
        let ab = s
            .similarity(Some("the sky is blue"), Some("the sky is not blue"))
            .await
            .unwrap();
        let ba = s
            .similarity(Some("the sky is not blue"), Some("the sky is blue"))
            .await
            .unwrap();
        assert_eq!(ab, ba);
        assert!(ab > 0.6);
        assert_eq!(s.similarity(None, Some("x")).await.unwrap(), 0.0);
        assert_eq!(s.similarity(Some("x"), None).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn negated_similar_statements_conflict() {
        let s = service();
        assert!(s
            .conflicts("The sky is blue", "The sky is not blue", None, None)
            .await
            .unwrap());
        // Both negated: no single-sided negation, no conflict.
        assert!(!s
            .conflicts("The sky is not blue", "The sky is not green", None, None)
            .await
            .unwrap());
        // Dissimilar statements do not conflict even with a negation.
        assert!(!s
            .conflicts("The sky is blue", "Pineapples do not belong on pizza", None, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn categorize_buckets() {
        let s = service();
        assert_eq!(s.categorize("I like coffee").await.unwrap(), "preference");
        assert_eq!(s.categorize("The sky is blue").await.unwrap(), "fact");
        assert_eq!(
            s.categorize("Marta is my colleague").await.unwrap(),
            "relationship"
        );
        assert_eq!(
            s.categorize("They moved near the city center").await.unwrap(),
            "location"
        );
        assert_eq!(
            s.categorize("I think it will rain").await.unwrap(),
            "opinion"
        );
        assert_eq!(s.categorize("qwerty asdf").await.unwrap(), "general");
    }

    #[tokio::test]
    async fn confidence_markers_move_the_score() {
        let s = service();
        let base = s.confidence("", "the cat sat", None).await.unwrap();
        assert_eq!(base, 0.5);

        let certain = s
            .confidence("", "the cat definitely sat", None)
            .await
            .unwrap();
        assert!((certain - 0.7).abs() < 1e-9);

        let hedged = s.confidence("", "the cat might sit", None).await.unwrap();
        assert!((hedged - 0.3).abs() < 1e-9);

        let trusted = s
            .confidence("", "the cat sat", Some(TRUSTED_CONTEXT))
            .await
            .unwrap();
        assert!((trusted - 0.6).abs() < 1e-9);

        // Certainty plus trust stays clamped inside the unit interval.
        let stacked = s
            .confidence(
                "",
                "the cat absolutely definitely always sat",
                Some(TRUSTED_CONTEXT),
            )
            .await
            .unwrap();
        assert!(stacked <= 1.0);
    }

    #[tokio::test]
    async fn extraction_contract_edges() {
        let s = service();
        let err = s.extract_beliefs("content", "  ", None).await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::InvalidInput);

        assert!(s.extract_beliefs("   ", "a1", None).await.unwrap().is_empty());

        let extracted = s
            .extract_beliefs("I like coffee. I don't like tea.", "a1", None)
            .await
            .unwrap();
        assert_eq!(extracted.len(), 2);
        assert_eq!(extracted[0].category, "preference");
        assert!(extracted[0].positive);
        assert!(!extracted[1].positive);
        assert!(!extracted[0].reasoning.is_empty());

        let hinted = s
            .extract_beliefs("I like coffee", "a1", Some("preference"))
            .await
            .unwrap();
        assert_eq!(hinted[0].category, "preference");
    }

    #[tokio::test]
    async fn schema_extraction_respects_available_set() {
        let s = service();
        let ctx = serde_json::Map::new();

        let schema: BTreeSet<String> = ["Preference", "WorldFact", "Unknown"]
            .into_iter()
            .map(String::from)
            .collect();
        let result = s
            .extract_category_with_schema("I love espresso", &schema, &ctx)
            .await
            .unwrap();
        assert_eq!(result.primary, "Preference");

        // A matching bucket outside the schema degrades to Unknown.
        let narrow: BTreeSet<String> = ["Unknown"].into_iter().map(String::from).collect();
        let result = s
            .extract_category_with_schema("I love espresso", &narrow, &ctx)
            .await
            .unwrap();
        assert_eq!(result.primary, "Unknown");
        assert!(result.confidence < 0.5);
    }
}
