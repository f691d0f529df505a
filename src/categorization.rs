// Categorization Engine
// Wraps the extraction ports with schema validation and deterministic
// fallbacks. Port failures never abort read paths: categorization degrades
// to Unknown, tag extraction degrades to the pattern extractors, and
// similarity/conflict checks degrade to the shipped heuristics.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::warn;

use crate::contracts::{CategoryLabel, UNKNOWN_CATEGORY};
use crate::errors::StoreResult;
use crate::extraction::{
    heuristic_confidence, keyword_category, has_negation, CategoryExtraction, CategoryExtractor,
    Categorizer, ConflictDetector, ConfidenceScorer, HeuristicExtractionService,
    SimilarityScorer, TagExtraction, TagExtractor, DEFAULT_REASONING,
};
use crate::operations::text;
use crate::types::clamp_unit;

/// The default 11-category schema.
pub const DEFAULT_CATEGORIES: [&str; 11] = [
    "UserProfile",
    "WorldFact",
    "PersonalData",
    "BusinessRule",
    "TechnicalKnowledge",
    "EmotionalState",
    "Preference",
    "Goal",
    "Memory",
    "Communication",
    "Unknown",
];

/// Configuration for the categorization engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizationConfig {
    /// Labels below this confidence are reported but flagged low-trust by
    /// callers; must lie in `[0, 1]`.
    pub confidence_threshold: f64,
    pub available_categories: BTreeSet<String>,
    /// Allowed subcategories per primary. A secondary outside its
    /// primary's set is dropped during validation.
    pub category_subcategories: HashMap<String, BTreeSet<String>>,
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            available_categories: DEFAULT_CATEGORIES.iter().map(|s| s.to_string()).collect(),
            category_subcategories: HashMap::new(),
        }
    }
}

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://[^\s<>()]+").unwrap());
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?[0-9][0-9 ().-]{6,}[0-9]").unwrap());
static DATE_ISO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").unwrap());
static DATE_SHORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,2}/\d{1,2}/\d{2,4}\b").unwrap());

/// Pattern-based tag extraction the engine always applies in addition to
/// whatever the tag port returns. Matches are prefixed by their kind.
pub fn pattern_extraction(content: &str) -> TagExtraction {
    let mut extraction = TagExtraction::default();
    let mut push = |kind: &str, value: &str| {
        let entry = extraction.entities.entry(kind.to_string()).or_default();
        if !entry.iter().any(|existing| existing == value) {
            entry.push(value.to_string());
        }
        extraction.tags.insert(format!("{kind}:{value}"));
    };

    for m in EMAIL_RE.find_iter(content) {
        push("email", m.as_str());
    }
    for m in URL_RE.find_iter(content) {
        push("url", m.as_str());
    }
    for m in DATE_ISO_RE.find_iter(content) {
        push("date", m.as_str());
    }
    for m in DATE_SHORT_RE.find_iter(content) {
        push("date", m.as_str());
    }
    for m in PHONE_RE.find_iter(content) {
        // A bare ISO date also matches the phone shape; skip those.
        if DATE_ISO_RE.is_match(m.as_str()) {
            continue;
        }
        push("phone", m.as_str());
    }
    extraction
}

/// Categorization facade over the extraction ports.
///
/// Healthy iff every wrapped port reports healthy.
pub struct CategorizationEngine {
    category_extractor: Arc<dyn CategoryExtractor>,
    tag_extractor: Arc<dyn TagExtractor>,
    categorizer: Arc<dyn Categorizer>,
    similarity: Arc<dyn SimilarityScorer>,
    conflicts: Arc<dyn ConflictDetector>,
    confidence: Arc<dyn ConfidenceScorer>,
    config: CategorizationConfig,
}

impl CategorizationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        category_extractor: Arc<dyn CategoryExtractor>,
        tag_extractor: Arc<dyn TagExtractor>,
        categorizer: Arc<dyn Categorizer>,
        similarity: Arc<dyn SimilarityScorer>,
        conflicts: Arc<dyn ConflictDetector>,
        confidence: Arc<dyn ConfidenceScorer>,
        config: CategorizationConfig,
    ) -> Self {
        Self {
            category_extractor,
            tag_extractor,
            categorizer,
            similarity,
            conflicts,
            confidence,
            config,
        }
    }

    /// Engine backed entirely by the shipped heuristics.
    pub fn heuristic(config: CategorizationConfig) -> Self {
        let service = Arc::new(HeuristicExtractionService::new());
        Self::new(
            Arc::clone(&service) as Arc<dyn CategoryExtractor>,
            Arc::clone(&service) as Arc<dyn TagExtractor>,
            Arc::clone(&service) as Arc<dyn Categorizer>,
            Arc::clone(&service) as Arc<dyn SimilarityScorer>,
            Arc::clone(&service) as Arc<dyn ConflictDetector>,
            service as Arc<dyn ConfidenceScorer>,
            config,
        )
    }

    pub fn config(&self) -> &CategorizationConfig {
        &self.config
    }

    /// Clamp, schema-check and default-fill one raw extraction.
    fn validate(&self, mut extraction: CategoryExtraction) -> CategoryExtraction {
        if !self
            .config
            .available_categories
            .contains(&extraction.primary)
        {
            extraction.primary = UNKNOWN_CATEGORY.to_string();
        }
        if let Some(secondary) = extraction.secondary.take() {
            let allowed = self
                .config
                .category_subcategories
                .get(&extraction.primary)
                .map(|subs| subs.contains(&secondary))
                .unwrap_or(false);
            if allowed {
                extraction.secondary = Some(secondary);
            }
        }
        extraction.confidence = clamp_unit(extraction.confidence);
        if extraction.reasoning.trim().is_empty() {
            extraction.reasoning = DEFAULT_REASONING.to_string();
        }
        extraction
    }

    /// Categorize content against the configured schema and collect tags.
    /// Pattern tags are always merged in, whatever the tag port returns.
    pub async fn categorize_content(
        &self,
        content: &str,
        context_metadata: &serde_json::Map<String, serde_json::Value>,
    ) -> StoreResult<CategoryLabel> {
        let extraction = match self
            .category_extractor
            .extract_category_with_schema(
                content,
                &self.config.available_categories,
                context_metadata,
            )
            .await
        {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!(error = %e, "category extraction failed, degrading to Unknown");
                CategoryExtraction {
                    primary: UNKNOWN_CATEGORY.to_string(),
                    secondary: None,
                    confidence: 0.1,
                    reasoning: DEFAULT_REASONING.to_string(),
                }
            }
        };
        let extraction = self.validate(extraction);

        let mut tags = match self.tag_extractor.extract_tags(content, None).await {
            Ok(extraction) => extraction.tags,
            Err(e) => {
                warn!(error = %e, "tag extraction failed, keeping pattern tags only");
                BTreeSet::new()
            }
        };
        tags.extend(pattern_extraction(content).tags);

        Ok(CategoryLabel {
            primary: extraction.primary,
            secondary: extraction.secondary,
            tags,
            confidence: extraction.confidence,
        })
    }

    /// Statement-level category, degrading to Unknown on port failure.
    pub async fn categorize_statement(&self, statement: &str) -> String {
        match self.categorizer.categorize(statement).await {
            Ok(category) => category,
            Err(e) => {
                warn!(error = %e, "categorize port failed");
                UNKNOWN_CATEGORY.to_string()
            }
        }
    }

    /// Similarity with heuristic fallback; missing inputs score zero.
    pub async fn similarity(&self, a: Option<&str>, b: Option<&str>) -> f64 {
        match self.similarity.similarity(a, b).await {
            Ok(score) => clamp_unit(score),
            Err(e) => {
                warn!(error = %e, "similarity port failed, using token overlap");
                match (a, b) {
                    (Some(a), Some(b)) => text::jaccard_similarity(a, b),
                    _ => 0.0,
                }
            }
        }
    }

    /// Conflict decision with heuristic fallback.
    pub async fn are_conflicting(
        &self,
        a: &str,
        b: &str,
        category_a: Option<&str>,
        category_b: Option<&str>,
    ) -> bool {
        match self.conflicts.conflicts(a, b, category_a, category_b).await {
            Ok(conflicting) => conflicting,
            Err(e) => {
                warn!(error = %e, "conflict port failed, using negation heuristic");
                (has_negation(a) ^ has_negation(b)) && text::jaccard_similarity(a, b) > 0.6
            }
        }
    }

    /// Confidence with heuristic fallback.
    pub async fn score_confidence(
        &self,
        content: &str,
        statement: &str,
        context: Option<&str>,
    ) -> f64 {
        match self.confidence.confidence(content, statement, context).await {
            Ok(score) => clamp_unit(score),
            Err(e) => {
                warn!(error = %e, "confidence port failed, using marker heuristic");
                heuristic_confidence(statement, context)
            }
        }
    }

    /// Free-form fallback category for a statement, bypassing the schema.
    pub fn fallback_category(statement: &str) -> String {
        keyword_category(statement)
    }

    /// Healthy iff every wrapped port probe reports healthy.
    pub async fn healthy(&self) -> bool {
        self.category_extractor.healthy().await
            && self.tag_extractor.healthy().await
            && self.categorizer.healthy().await
            && self.similarity.healthy().await
            && self.conflicts.healthy().await
            && self.confidence.healthy().await
    }
}
