//! Core row type definitions for the storage facade.
//!
//! Defines [`Memory`], [`Claim`], [`ClaimAssertion`] (with its tagged
//! [`AssertedValue`] union), [`ClaimEdge`], [`SlotState`], and the recall
//! audit rows, matching the SQLite schema.

use serde::{Deserialize, Serialize};

/// Category of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Fact,
    Preference,
    Context,
    Note,
    Event,
    Trait,
}

impl MemoryKind {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Context => "context",
            Self::Note => "note",
            Self::Event => "event",
            Self::Trait => "trait",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fact" => Ok(Self::Fact),
            "preference" => Ok(Self::Preference),
            "context" => Ok(Self::Context),
            "note" => Ok(Self::Note),
            "event" => Ok(Self::Event),
            "trait" => Ok(Self::Trait),
            _ => Err(format!("unknown memory kind: {s}")),
        }
    }
}

/// Visibility of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Shared,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Shared => "shared",
            Self::Public => "public",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "shared" => Ok(Self::Shared),
            "public" => Ok(Self::Public),
            _ => Err(format!("unknown visibility: {s}")),
        }
    }
}

/// Lifecycle status of a memory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Active,
    Superseded,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
        }
    }
}

impl std::str::FromStr for MemoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "superseded" => Ok(Self::Superseded),
            _ => Err(format!("unknown memory status: {s}")),
        }
    }
}

/// A memory record, matching the `memories` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Time-sortable id prefixed `mem_`.
    pub id: String,
    pub project_id: String,
    pub subject_id: String,
    pub text: String,
    pub kind: MemoryKind,
    pub visibility: Visibility,
    /// Integer in `[0, 100]`.
    pub importance: i64,
    /// Score in `[0.0, 1.0]`.
    pub confidence: f64,
    pub is_temporal: bool,
    pub tags: Vec<String>,
    pub metadata: serde_json::Value,
    /// L2-normalized 1536-d vector; `None` when the embedder was unavailable.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub status: MemoryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    pub is_deleted: bool,
    pub source_type: String,
    pub created_at: String,
    pub updated_at: String,
    pub last_reinforced_at: String,
}

/// A memory enriched with retrieval scores.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub memory: Memory,
    /// Raw similarity: cosine ×100 against the query embedding, else 0.
    pub score: f64,
    /// Fused ranking signal (similarity + importance + confidence + lexical).
    pub effective_score: f64,
}

/// Lifecycle status of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Active,
    Retracted,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Retracted => "retracted",
        }
    }
}

impl std::str::FromStr for ClaimStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "retracted" => Ok(Self::Retracted),
            _ => Err(format!("unknown claim status: {s}")),
        }
    }
}

/// A structured (predicate, object_value) assertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    /// Id prefixed `clm_`.
    pub claim_id: String,
    pub project_id: String,
    pub subject_id: String,
    pub predicate: String,
    pub object_value: String,
    /// Semantic key holding at most one winner per subject. Defaults to the predicate.
    pub slot: String,
    /// Open set: fact, preference, goal, event, ...
    pub claim_type: String,
    pub confidence: f64,
    /// Fractional importance in `[0.0, 1.0]`.
    pub importance: f64,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_memory_id: Option<String>,
    pub subject_entity: String,
    pub status: ClaimStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retracted_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retract_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Typed value carried by a claim assertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "object_type", content = "value", rename_all = "snake_case")]
pub enum AssertedValue {
    String(String),
    Number(f64),
    Date(String),
    Json(serde_json::Value),
}

/// One evidence occurrence of a claim.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimAssertion {
    /// Id prefixed `asr_`.
    pub assertion_id: String,
    pub claim_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(flatten)]
    pub value: AssertedValue,
    pub confidence: f64,
    pub status: String,
    pub first_seen_at: String,
    pub last_seen_at: String,
}

/// Relation type between two claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Supersedes,
    Supports,
    Duplicates,
    Related,
    Retracts,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supersedes => "supersedes",
            Self::Supports => "supports",
            Self::Duplicates => "duplicates",
            Self::Related => "related",
            Self::Retracts => "retracts",
        }
    }
}

impl std::str::FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "supersedes" => Ok(Self::Supersedes),
            "supports" => Ok(Self::Supports),
            "duplicates" => Ok(Self::Duplicates),
            "related" => Ok(Self::Related),
            "retracts" => Ok(Self::Retracts),
            _ => Err(format!("unknown edge type: {s}")),
        }
    }
}

/// A typed directed relation between two claims.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimEdge {
    pub from_claim_id: String,
    pub to_claim_id: String,
    pub edge_type: EdgeType,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_text: Option<String>,
    pub created_at: String,
}

/// Status of a slot's current winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Active,
    Superseded,
    Retracted,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Retracted => "retracted",
        }
    }
}

impl std::str::FromStr for SlotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "superseded" => Ok(Self::Superseded),
            "retracted" => Ok(Self::Retracted),
            _ => Err(format!("unknown slot status: {s}")),
        }
    }
}

/// The current winner per (project, subject, slot) triple.
#[derive(Debug, Clone, Serialize)]
pub struct SlotState {
    pub project_id: String,
    pub subject_id: String,
    pub slot: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_claim_id: Option<String>,
    pub status: SlotStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced_by_claim_id: Option<String>,
    pub updated_at: String,
}

/// Audit row for a memory surfaced during recall.
#[derive(Debug, Clone, Serialize)]
pub struct RecallEvent {
    pub id: i64,
    pub memory_id: String,
    pub subject_id: String,
    pub chat_id: String,
    pub message_index: i64,
    pub similarity: f64,
    pub request_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub created_at: String,
}

/// Aggregate statistics over recall events.
#[derive(Debug, Clone, Serialize)]
pub struct RecallStats {
    pub count: i64,
    pub distinct_chats: i64,
    pub distinct_subjects: i64,
    pub avg_similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_at: Option<String>,
}
