// Builder Patterns
// Fluent builders for domain records and configuration values, with
// validation at each setter and sensible defaults at build time.

use std::collections::BTreeSet;

use crate::contracts::{Belief, RelationshipSpec};
use crate::errors::{StorageError, StoreResult};
use crate::categorization::CategorizationConfig;
use crate::operations::{StoreConfig, MIN_SEARCH_TIMEOUT_MS};
use crate::types::{AgentId, BeliefId, RelationshipType};
use crate::validation;

/// Fluent builder for beliefs.
pub struct BeliefBuilder {
    id: Option<BeliefId>,
    agent_id: Option<AgentId>,
    statement: Option<String>,
    category: Option<String>,
    confidence: f64,
    active: bool,
    tags: BTreeSet<String>,
    evidence_memory_ids: BTreeSet<String>,
    source: Option<String>,
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl BeliefBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            agent_id: None,
            statement: None,
            category: None,
            confidence: 0.5,
            active: true,
            tags: BTreeSet::new(),
            evidence_memory_ids: BTreeSet::new(),
            source: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Set the belief id. A fresh id is generated when not provided.
    pub fn id(mut self, id: impl Into<String>) -> StoreResult<Self> {
        self.id = Some(BeliefId::new(id)?);
        Ok(self)
    }

    pub fn agent(mut self, agent: impl Into<String>) -> StoreResult<Self> {
        self.agent_id = Some(AgentId::new(agent)?);
        Ok(self)
    }

    pub fn statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Confidence is clamped into `[0, 1]` at build time.
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn evidence(mut self, memory_id: impl Into<String>) -> Self {
        self.evidence_memory_ids.insert(memory_id.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn metadata_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> StoreResult<Belief> {
        let agent_id = self
            .agent_id
            .ok_or_else(|| StorageError::invalid_input("agent_id", "agent is required"))?;
        let statement = self
            .statement
            .ok_or_else(|| StorageError::invalid_input("statement", "statement is required"))?;

        let mut belief = Belief::new(
            self.id.unwrap_or_else(BeliefId::generate),
            agent_id,
            statement,
            self.confidence,
        )?;
        belief.category = self.category;
        belief.active = self.active;
        belief.tags = self.tags;
        belief.evidence_memory_ids = self.evidence_memory_ids;
        belief.source = self.source;
        belief.metadata = self.metadata;
        Ok(belief)
    }
}

impl Default for BeliefBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent builder for relationship specs used by batch creation.
pub struct RelationshipBuilder {
    source: Option<BeliefId>,
    target: Option<BeliefId>,
    relationship_type: RelationshipType,
    strength: f64,
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl RelationshipBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            target: None,
            relationship_type: RelationshipType::RelatesTo,
            strength: 1.0,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn source(mut self, id: impl Into<String>) -> StoreResult<Self> {
        self.source = Some(BeliefId::new(id)?);
        Ok(self)
    }

    pub fn target(mut self, id: impl Into<String>) -> StoreResult<Self> {
        self.target = Some(BeliefId::new(id)?);
        Ok(self)
    }

    pub fn relationship_type(mut self, relationship_type: RelationshipType) -> Self {
        self.relationship_type = relationship_type;
        self
    }

    pub fn strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn metadata_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> StoreResult<RelationshipSpec> {
        let source = self
            .source
            .ok_or_else(|| StorageError::invalid_input("source_belief_id", "source is required"))?;
        let target = self
            .target
            .ok_or_else(|| StorageError::invalid_input("target_belief_id", "target is required"))?;
        Ok(RelationshipSpec {
            source_belief_id: source,
            target_belief_id: target,
            relationship_type: self.relationship_type,
            strength: self.strength,
            metadata: self.metadata,
        })
    }
}

impl Default for RelationshipBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for store configuration. Floors are applied silently so a
/// too-small value degrades to the minimum instead of failing.
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    /// Floor: 1000 ms.
    pub fn search_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.search_timeout_ms = timeout_ms.max(MIN_SEARCH_TIMEOUT_MS);
        self
    }

    /// Floor: 1.
    pub fn max_results(mut self, max_results: usize) -> Self {
        self.config.max_results = max_results.max(1);
        self
    }

    /// Floor: 1.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size.max(1);
        self
    }

    /// Floor: 10.
    pub fn stream_page_size(mut self, page_size: usize) -> Self {
        self.config.stream_page_size = page_size.max(10);
        self
    }

    pub fn auto_create_indices(mut self, auto_create: bool) -> Self {
        self.config.auto_create_indices = auto_create;
        self
    }

    pub fn belief_index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.belief_index_prefix = prefix.into();
        self
    }

    pub fn relationship_index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.relationship_index_prefix = prefix.into();
        self
    }

    pub fn conflict_index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.conflict_index_prefix = prefix.into();
        self
    }

    pub fn memory_index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.memory_index_prefix = prefix.into();
        self
    }

    pub fn index_version_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.config.index_version_suffix = suffix.into();
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for categorization configuration.
pub struct CategorizationConfigBuilder {
    config: CategorizationConfig,
}

impl CategorizationConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CategorizationConfig::default(),
        }
    }

    /// Must lie in `[0, 1]`.
    pub fn confidence_threshold(mut self, threshold: f64) -> StoreResult<Self> {
        self.config.confidence_threshold =
            validation::unit_interval("confidence_threshold", threshold)?;
        Ok(self)
    }

    /// Replace the available-category schema.
    pub fn available_categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.available_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    /// Allow a set of subcategories under one primary.
    pub fn subcategories<I, S>(mut self, primary: impl Into<String>, subcategories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .category_subcategories
            .insert(primary.into(), subcategories.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> CategorizationConfig {
        self.config
    }
}

impl Default for CategorizationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn belief_builder_basic() -> anyhow::Result<()> {
        let belief = BeliefBuilder::new()
            .agent("a1")?
            .statement("I like coffee")
            .category("preference")
            .confidence(1.7)
            .tag("coffee")
            .evidence("mem-1")
            .build()?;

        assert_eq!(belief.statement, "I like coffee");
        assert_eq!(belief.category.as_deref(), Some("preference"));
        assert_eq!(belief.confidence, 1.0);
        assert_eq!(belief.version, 1);
        assert!(belief.tags.contains("coffee"));
        Ok(())
    }

    #[test]
    fn belief_builder_requires_agent_and_statement() {
        let result = BeliefBuilder::new().statement("x").build();
        assert!(result.is_err());

        let result = BeliefBuilder::new().agent("a1").unwrap().build();
        assert!(result.is_err());
    }

    #[test]
    fn relationship_builder_defaults() -> anyhow::Result<()> {
        let spec = RelationshipBuilder::new()
            .source("bel_1")?
            .target("bel_2")?
            .relationship_type(RelationshipType::Supports)
            .strength(0.8)
            .build()?;
        assert_eq!(spec.relationship_type, RelationshipType::Supports);
        assert_eq!(spec.strength, 0.8);
        Ok(())
    }

    #[test]
    fn store_config_builder_applies_floors() {
        let config = StoreConfigBuilder::new()
            .search_timeout_ms(5)
            .max_results(0)
            .batch_size(0)
            .stream_page_size(3)
            .auto_create_indices(false)
            .index_version_suffix("v2")
            .build();

        assert_eq!(config.search_timeout_ms, 1000);
        assert_eq!(config.max_results, 1);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.stream_page_size, 10);
        assert!(!config.auto_create_indices);
        assert_eq!(config.index_version_suffix, "v2");
        // Untouched values keep their defaults.
        assert_eq!(config.belief_index_prefix, "headkey-belief");
        assert_eq!(config.memory_index_prefix, "headkey-memory");
    }

    #[test]
    fn categorization_builder_validates_threshold() {
        assert!(CategorizationConfigBuilder::new()
            .confidence_threshold(1.5)
            .is_err());

        let config = CategorizationConfigBuilder::new()
            .confidence_threshold(0.9)
            .unwrap()
            .available_categories(["Preference", "Unknown"])
            .subcategories("Preference", ["food"])
            .build();
        assert_eq!(config.confidence_threshold, 0.9);
        assert_eq!(config.available_categories.len(), 2);
        assert!(config.category_subcategories["Preference"].contains("food"));
    }
}
