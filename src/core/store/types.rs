use serde_json::Value;

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkspaceRecord {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Member => "member",
        }
    }

    pub fn from_db(s: &str) -> Self {
        if s == "owner" { Role::Owner } else { Role::Member }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MembershipRecord {
    pub workspace_id: String,
    pub user_id: String,
    pub role: Role,
    pub created_at: String,
}

/// Head row of a versioned entity (App or Agent). `parent_id` is the owning
/// workspace for apps and the owning app for agents. The head mirrors the
/// draft until the first publish, then the latest published snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EntityHead {
    pub id: String,
    pub parent_id: String,
    pub kind: String,
    pub name: String,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

/// One row of a version chain. `version == 0` is the always-present draft;
/// published rows carry second-resolution publish timestamps and are
/// immutable once written.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EntityVersion {
    pub entity_id: String,
    pub version: i64,
    pub kind: String,
    pub name: String,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CategoryPreview {
    pub id: String,
    pub name: String,
    pub apps: Vec<AppPreview>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AppPreview {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DatasetRecord {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DocumentRecord {
    pub id: String,
    pub dataset_id: String,
    pub name: String,
    pub metadata: Value,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SegmentRecord {
    pub id: String,
    pub document_id: String,
    pub position: i64,
    pub content: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChunkRecord {
    pub id: String,
    pub segment_id: String,
    pub position: i64,
    pub content: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatRecord {
    pub id: String,
    pub app_id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MessageRecord {
    pub id: String,
    pub chat_id: String,
    pub role: String,
    pub content: Value,
    pub created_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VoteRecord {
    pub chat_id: String,
    pub message_id: String,
    pub user_id: String,
    pub is_upvoted: bool,
}

/// Artifact identity is the `(id, version)` pair; the "current" artifact is
/// the row with the greatest version for an id.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub version: i64,
    pub chat_id: String,
    pub user_id: String,
    pub title: String,
    pub kind: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SuggestionRecord {
    pub id: String,
    pub artifact_id: String,
    pub artifact_version: i64,
    pub original_text: String,
    pub suggested_text: String,
    pub is_resolved: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub created_at: String,
}
