mod agent;
mod app;
mod apikey;
mod artifact;
mod chat;
mod dataset;
pub mod error;
pub mod pagination;
pub mod types;
mod versioned;
mod workspace;

pub use versioned::{EntityFields, EntityPatch, VersionSelector, DRAFT_VERSION};

use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use error::StoreResult;

/// Relational store backing the platform. All multi-row writes go through a
/// single rusqlite transaction; there is no in-process shared mutable state
/// between requests beyond the connection itself.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open<P: AsRef<Path>>(data_dir: P) -> StoreResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).map_err(|e| {
                error::StoreError::Inconsistency(format!("cannot create data dir: {e}"))
            })?;
        }

        let db_path = data_dir.join("tavern.db");
        let db = Connection::open(&db_path)?;
        db.execute_batch("PRAGMA foreign_keys = ON;")?;
        init_schema(&db)?;
        info!("Store opened at {}", db_path.display());

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    pub(crate) fn db(&self) -> Arc<Mutex<Connection>> {
        self.db.clone()
    }
}

fn init_schema(db: &Connection) -> StoreResult<()> {
    db.execute_batch(
        "CREATE TABLE IF NOT EXISTS workspaces (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS memberships (
            workspace_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('owner', 'member')),
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (workspace_id, user_id)
        );
        CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(user_id);

        CREATE TABLE IF NOT EXISTS apps (
            id TEXT PRIMARY KEY,
            parent_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_apps_parent ON apps(parent_id, id);

        CREATE TABLE IF NOT EXISTS app_versions (
            app_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (app_id, version)
        );

        CREATE TABLE IF NOT EXISTS agents (
            id TEXT PRIMARY KEY,
            parent_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_agents_parent ON agents(parent_id, id);

        CREATE TABLE IF NOT EXISTS agent_versions (
            agent_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (agent_id, version)
        );

        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS tags (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS app_categories (
            app_id TEXT NOT NULL,
            category_id TEXT NOT NULL,
            PRIMARY KEY (app_id, category_id)
        );

        CREATE TABLE IF NOT EXISTS app_tags (
            app_id TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            PRIMARY KEY (app_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS datasets (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            name TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_datasets_workspace ON datasets(workspace_id, id);

        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            dataset_id TEXT NOT NULL,
            name TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_documents_dataset ON documents(dataset_id, id);

        CREATE TABLE IF NOT EXISTS segments (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            content TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_segments_document ON segments(document_id, position);

        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            segment_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            content TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_segment ON chunks(segment_id, position);

        CREATE TABLE IF NOT EXISTS chats (
            id TEXT PRIMARY KEY,
            app_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_chats_app_user ON chats(app_id, user_id, id);

        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            chat_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, id);

        CREATE TABLE IF NOT EXISTS message_votes (
            chat_id TEXT NOT NULL,
            message_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            is_upvoted INTEGER NOT NULL,
            PRIMARY KEY (chat_id, message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS artifacts (
            id TEXT NOT NULL,
            version INTEGER NOT NULL,
            chat_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            title TEXT NOT NULL,
            kind TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (id, version)
        );
        CREATE INDEX IF NOT EXISTS idx_artifacts_user ON artifacts(user_id, id);

        CREATE TABLE IF NOT EXISTS artifact_suggestions (
            id TEXT PRIMARY KEY,
            artifact_id TEXT NOT NULL,
            artifact_version INTEGER NOT NULL,
            original_text TEXT NOT NULL,
            suggested_text TEXT NOT NULL,
            is_resolved INTEGER NOT NULL DEFAULT 0,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_suggestions_artifact
            ON artifact_suggestions(artifact_id, artifact_version);

        CREATE TABLE IF NOT EXISTS api_keys (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            key_hash TEXT NOT NULL UNIQUE,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        CREATE INDEX IF NOT EXISTS idx_api_keys_user ON api_keys(user_id);",
    )?;
    Ok(())
}

/// Create a Store over a throwaway temp directory. Avoids filesystem
/// side-effects outside the test sandbox.
#[cfg(test)]
pub async fn test_store() -> Store {
    let tmpdir = tempfile::tempdir().expect("create temp dir");
    let db = Connection::open(tmpdir.path().join("tavern.db")).expect("open test db");
    db.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    init_schema(&db).expect("init test schema");
    // Leak the directory so the database file outlives this scope.
    let _ = tmpdir.keep();
    Store {
        db: Arc::new(Mutex::new(db)),
    }
}
