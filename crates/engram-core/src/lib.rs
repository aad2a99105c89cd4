pub mod config;
pub mod normalize;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use config::StoreConfig;

/// Maximum accepted content length, in characters, after trimming.
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Default result-page size for list, search, and link queries.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ValidationError {
    #[error("content is empty after trimming")]
    EmptyContent,
    #[error("content exceeds {MAX_CONTENT_CHARS} characters ({0})")]
    ContentTooLong(usize),
    #[error("unknown value for {field}: {value}")]
    UnknownValue { field: &'static str, value: String },
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
    #[error("metadata filter key given without a value")]
    MetadataKeyWithoutValue,
    #[error("a memory cannot link to itself: {0}")]
    SelfLink(String),
    #[error("update for {0} carries no fields to change")]
    EmptyUpdate(String),
    #[error("export bundle digest does not match its rows")]
    DigestMismatch,
    #[error("tag must not be empty")]
    EmptyTag,
    #[error("project must not be empty")]
    EmptyProject,
    #[error("backup requires a file-backed store")]
    BackupNeedsFile,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Caused,
    References,
    Supersedes,
    #[default]
    Related,
}

impl Relation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Caused => "caused",
            Self::References => "references",
            Self::Supersedes => "supersedes",
            Self::Related => "related",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "caused" => Some(Self::Caused),
            "references" => Some(Self::References),
            "supersedes" => Some(Self::Supersedes),
            "related" => Some(Self::Related),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Any,
    All,
    Near,
}

impl SearchMode {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "any" => Some(Self::Any),
            "all" => Some(Self::All),
            "near" => Some(Self::Near),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    CreatedAtDesc,
    CreatedAtAsc,
    UpdatedAtDesc,
}

impl SortOrder {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreatedAtDesc => "created_at_desc",
            Self::CreatedAtAsc => "created_at_asc",
            Self::UpdatedAtDesc => "updated_at_desc",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created_at_desc" => Some(Self::CreatedAtDesc),
            "created_at_asc" => Some(Self::CreatedAtAsc),
            "updated_at_desc" => Some(Self::UpdatedAtDesc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    Insert,
    Upsert,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    #[default]
    Passive,
    Full,
    Restart,
    Truncate,
}

impl CheckpointMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Passive => "PASSIVE",
            Self::Full => "FULL",
            Self::Restart => "RESTART",
            Self::Truncate => "TRUNCATE",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    From,
    To,
    #[default]
    Both,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionReason {
    SharedTags,
    ContentSimilarity,
    TemporalProximity,
}

/// One stored memory. Timestamps carry the store's `datetime('now')` format
/// (`YYYY-MM-DD HH:MM:SS`, UTC).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
    pub project: String,
    pub created_at: String,
    pub updated_at: String,
    pub expires_at: Option<String>,
}

/// A directed typed edge between two memories, unique per `(from_id, to_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub from_id: String,
    pub to_id: String,
    pub relation: Relation,
    pub weight: f64,
    pub auto_generated: bool,
    pub created_at: String,
}

/// One audit-trail row: the post-image of a create/update, or the pre-image
/// of a delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub history_id: i64,
    pub memory_id: String,
    pub operation: Operation,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
    pub project: String,
    pub expires_at: Option<String>,
    pub changed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMemory {
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub expires_at: Option<String>,
    #[serde(default = "default_true")]
    pub auto_link: bool,
    #[serde(default)]
    pub dedup: bool,
}

fn default_true() -> bool {
    true
}

impl CreateMemory {
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            category: None,
            tags: Vec::new(),
            metadata: None,
            project: None,
            expires_at: None,
            auto_link: true,
            dedup: false,
        }
    }
}

/// Tri-state change for `expires_at`: keep the stored value, clear it, or
/// set a new one.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryChange {
    #[default]
    Keep,
    Clear,
    At(String),
}

/// A partial update: `None` fields keep their stored values; `tags` and
/// `metadata` replace wholesale when provided. The project namespace is not
/// updatable here; memories move between projects through
/// `migrate_to_project` only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMemory {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub expires_at: ExpiryChange,
}

impl UpdateMemory {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.category.is_none()
            && self.tags.is_none()
            && self.metadata.is_none()
            && self.expires_at == ExpiryChange::Keep
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBatchItem {
    pub id: String,
    #[serde(flatten)]
    pub changes: UpdateMemory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryFilter {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub metadata_key: Option<String>,
    #[serde(default)]
    pub metadata_value: Option<String>,
    #[serde(default)]
    pub created_after: Option<String>,
    #[serde(default)]
    pub created_before: Option<String>,
    #[serde(default)]
    pub updated_after: Option<String>,
    #[serde(default)]
    pub updated_before: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRequest {
    #[serde(flatten)]
    pub filter: MemoryFilter,
    #[serde(default)]
    pub sort: SortOrder,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResult {
    pub memories: Vec<Memory>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub mode: SearchMode,
    /// Token distance for [`SearchMode::Near`]; 1–100, default 10.
    #[serde(default)]
    pub near_distance: Option<u32>,
    #[serde(flatten)]
    pub filter: MemoryFilter,
    /// `None` keeps the full-text rank ordering.
    #[serde(default)]
    pub sort: Option<SortOrder>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: u32,
}

impl SearchRequest {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: SearchMode::Any,
            near_distance: None,
            filter: MemoryFilter::default(),
            sort: None,
            limit: None,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOutcome {
    pub memory: Memory,
    /// True when dedup matched an existing live memory and no row was written.
    pub deduplicated: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateBatchResult {
    pub updated: Vec<String>,
    pub not_found: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteBatchResult {
    pub deleted: Vec<String>,
    pub not_found: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    pub exported_at: String,
    pub count: usize,
    /// SHA-256 hex over the serialized rows; verified on import when present.
    pub digest: String,
    pub memories: Vec<Memory>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedQuery {
    pub id: String,
    #[serde(default)]
    pub relation: Option<Relation>,
    #[serde(default)]
    pub direction: LinkDirection,
}

/// One neighbor of a queried node: the peer memory plus the edge attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedMemory {
    pub memory: Memory,
    pub relation: Relation,
    pub direction: LinkDirection,
    pub weight: f64,
    pub auto_generated: bool,
    pub linked_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepQuery {
    pub id: String,
    #[serde(default)]
    pub relation: Option<Relation>,
    /// Traversal bound, 1–5; default 3.
    #[serde(default)]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepRelated {
    pub memory: Memory,
    /// Minimum hop count from the origin.
    pub depth: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkQuery {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub relation: Option<Relation>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkPage {
    pub links: Vec<Link>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestOptions {
    /// Analyze this memory; when absent, up to five project orphans are
    /// analyzed instead.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedLink {
    pub from_id: String,
    pub to_id: String,
    pub preview: String,
    pub category: String,
    pub tags: Vec<String>,
    pub suggested_relation: Relation,
    pub weight: f64,
    pub reason: SuggestionReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub memory_id: String,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    pub total: u64,
    pub by_category: Vec<CategoryCount>,
    pub top_tags: Vec<TagCount>,
    pub oldest: Option<Memory>,
    pub newest: Option<Memory>,
    pub avg_content_length: i64,
    pub without_tags: u64,
    pub without_metadata: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotOptions {
    #[serde(default)]
    pub recent_per_category: Option<u32>,
    #[serde(default)]
    pub preview_len: Option<usize>,
    #[serde(default = "default_true")]
    pub include_tags_index: bool,
    #[serde(default)]
    pub project: Option<String>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self { recent_per_category: None, preview_len: None, include_tags_index: true, project: None }
    }
}

/// Slim projection used inside context snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub id: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub project: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySnapshot {
    pub category: String,
    pub total: u64,
    pub recent: Vec<SnapshotItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub categories: Vec<CategorySnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<TagCount>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphOptions {
    #[serde(default = "default_true")]
    pub include_orphans: bool,
    #[serde(default)]
    pub relation: Option<Relation>,
    #[serde(default)]
    pub project: Option<String>,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self { include_orphans: true, relation: None, project: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub preview: String,
    pub category: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<Link>,
    pub diagram: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalCheckpoint {
    pub busy: i64,
    pub log: i64,
    pub checkpointed: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub integrity_ok: bool,
    pub integrity_errors: Vec<String>,
    pub wal_checkpoint: WalCheckpoint,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurgeReport {
    pub purged: usize,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCount {
    pub project: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameReport {
    pub updated: usize,
    pub old_tag: String,
    pub new_tag: String,
}
