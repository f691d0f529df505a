// Validated Types
// Strongly-typed identifiers and the closed relationship-type vocabulary.
// Ids for beliefs, relationships, conflicts and agents are distinct newtypes
// so they cannot be mixed up at call sites.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::{StorageError, StoreResult};

/// Current time truncated to microseconds, the resolution the persisted
/// layouts carry. Stamping with this keeps round trips through either
/// backend exact.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Clamp a confidence or strength value into `[0.0, 1.0]`.
///
/// Total over all inputs: NaN maps to 0.0. Idempotent.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

fn validated_id(field: &'static str, raw: impl Into<String>) -> StoreResult<String> {
    let raw = raw.into();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StorageError::invalid_input(field, "must not be blank"));
    }
    Ok(trimmed.to_string())
}

/// Opaque, stable identifier of a single belief.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BeliefId(String);

impl BeliefId {
    /// Wrap an existing id. Must be non-blank.
    pub fn new(raw: impl Into<String>) -> StoreResult<Self> {
        Ok(Self(validated_id("belief_id", raw)?))
    }

    /// Generate a fresh url-safe id.
    pub fn generate() -> Self {
        Self(format!("bel_{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BeliefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier of a directed belief relationship.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(String);

impl RelationshipId {
    pub fn new(raw: impl Into<String>) -> StoreResult<Self> {
        Ok(Self(validated_id("relationship_id", raw)?))
    }

    /// Generate a fresh url-safe id with the stable `rel_` prefix.
    pub fn generate() -> Self {
        Self(format!("rel_{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier of a recorded belief conflict.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConflictId(String);

impl ConflictId {
    pub fn new(raw: impl Into<String>) -> StoreResult<Self> {
        Ok(Self(validated_id("conflict_id", raw)?))
    }

    pub fn generate() -> Self {
        Self(format!("conflict_{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The scoping principal. Beliefs, relationships and conflicts are
/// partitioned by agent; no cross-agent edges exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(raw: impl Into<String>) -> StoreResult<Self> {
        Ok(Self(validated_id("agent_id", raw)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Index-safe form of the agent id: lowercased, with every character
    /// outside `[a-z0-9-]` replaced by `-`.
    pub fn sanitized(&self) -> String {
        self.0
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Closed vocabulary of typed edges between beliefs.
///
/// Codes are stable upper-snake tokens; `from_code` accepts any casing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Supports,
    Contradicts,
    Extends,
    Specializes,
    Generalizes,
    Causes,
    Enables,
    DependsOn,
    Precedes,
    SimilarTo,
    RelatesTo,
    Deprecates,
    Updates,
    Replaces,
    Supersedes,
}

impl RelationshipType {
    /// Stable token used in persisted documents and rows.
    pub fn code(&self) -> &'static str {
        match self {
            RelationshipType::Supports => "SUPPORTS",
            RelationshipType::Contradicts => "CONTRADICTS",
            RelationshipType::Extends => "EXTENDS",
            RelationshipType::Specializes => "SPECIALIZES",
            RelationshipType::Generalizes => "GENERALIZES",
            RelationshipType::Causes => "CAUSES",
            RelationshipType::Enables => "ENABLES",
            RelationshipType::DependsOn => "DEPENDS_ON",
            RelationshipType::Precedes => "PRECEDES",
            RelationshipType::SimilarTo => "SIMILAR_TO",
            RelationshipType::RelatesTo => "RELATES_TO",
            RelationshipType::Deprecates => "DEPRECATES",
            RelationshipType::Updates => "UPDATES",
            RelationshipType::Replaces => "REPLACES",
            RelationshipType::Supersedes => "SUPERSEDES",
        }
    }

    /// Resolve a stored code back to its variant. Case-insensitive; `None`
    /// for tokens outside the defined set.
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim().to_uppercase();
        Self::all().iter().copied().find(|t| t.code() == code)
    }

    /// Whether this edge type denotes supersession of its source endpoint.
    pub fn is_deprecating(&self) -> bool {
        matches!(
            self,
            RelationshipType::Deprecates
                | RelationshipType::Updates
                | RelationshipType::Replaces
                | RelationshipType::Supersedes
        )
    }

    /// Every defined variant, in declaration order.
    pub fn all() -> &'static [RelationshipType] {
        &[
            RelationshipType::Supports,
            RelationshipType::Contradicts,
            RelationshipType::Extends,
            RelationshipType::Specializes,
            RelationshipType::Generalizes,
            RelationshipType::Causes,
            RelationshipType::Enables,
            RelationshipType::DependsOn,
            RelationshipType::Precedes,
            RelationshipType::SimilarTo,
            RelationshipType::RelatesTo,
            RelationshipType::Deprecates,
            RelationshipType::Updates,
            RelationshipType::Replaces,
            RelationshipType::Supersedes,
        ]
    }

    /// The subset of types that express supersession.
    pub fn deprecating_types() -> &'static [RelationshipType] {
        &[
            RelationshipType::Deprecates,
            RelationshipType::Updates,
            RelationshipType::Replaces,
            RelationshipType::Supersedes,
        ]
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Traversal direction for graph queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
    Both,
}

impl Direction {
    /// Parse a direction token. Accepts `incoming`, `outgoing`, `both` in
    /// any casing; anything else is rejected as invalid input.
    pub fn parse(token: &str) -> StoreResult<Self> {
        match token.trim().to_lowercase().as_str() {
            "incoming" => Ok(Direction::Incoming),
            "outgoing" => Ok(Direction::Outgoing),
            "both" => Ok(Direction::Both),
            other => Err(StorageError::invalid_input(
                "direction",
                format!("unknown direction token '{other}'"),
            )),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
            Direction::Both => "both",
        };
        f.write_str(token)
    }
}
