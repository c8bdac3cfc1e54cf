use rusqlite::{params, Connection, OptionalExtension, Row};

use super::error::{StoreError, StoreResult};
use super::pagination::{Page, PagePlan, PageRequest};
use super::types::{ArtifactRecord, SuggestionRecord};
use super::Store;

fn artifact_from_row(row: &Row<'_>) -> rusqlite::Result<ArtifactRecord> {
    Ok(ArtifactRecord {
        id: row.get(0)?,
        version: row.get(1)?,
        chat_id: row.get(2)?,
        user_id: row.get(3)?,
        title: row.get(4)?,
        kind: row.get(5)?,
        content: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn suggestion_from_row(row: &Row<'_>) -> rusqlite::Result<SuggestionRecord> {
    Ok(SuggestionRecord {
        id: row.get(0)?,
        artifact_id: row.get(1)?,
        artifact_version: row.get(2)?,
        original_text: row.get(3)?,
        suggested_text: row.get(4)?,
        is_resolved: row.get::<_, i64>(5)? != 0,
        created_at: row.get(6)?,
    })
}

const ARTIFACT_COLUMNS: &str =
    "id, version, chat_id, user_id, title, kind, content, created_at, updated_at";

/// Owner check for an artifact chain; also resolves the current max version.
fn artifact_owner_and_max(
    conn: &Connection,
    artifact_id: &str,
    user_id: &str,
) -> StoreResult<i64> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT user_id, MAX(version) FROM artifacts WHERE id = ?1 GROUP BY user_id",
            params![artifact_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        None => Err(StoreError::NotFound("artifact")),
        Some((owner, _)) if owner != user_id => {
            Err(StoreError::forbidden("caller does not own this artifact"))
        }
        Some((_, max)) => Ok(max),
    }
}

impl Store {
    /// Start a new artifact chain at version 1, owned by the chat's user.
    pub async fn create_artifact(
        &self,
        user_id: &str,
        chat_id: &str,
        title: &str,
        kind: &str,
        content: &str,
    ) -> StoreResult<ArtifactRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;

        let chat_owner: Option<String> = tx
            .query_row(
                "SELECT user_id FROM chats WHERE id = ?1",
                params![chat_id],
                |row| row.get(0),
            )
            .optional()?;
        match chat_owner {
            None => return Err(StoreError::NotFound("chat")),
            Some(owner) if owner != user_id => {
                return Err(StoreError::forbidden("caller does not own this chat"));
            }
            Some(_) => {}
        }

        let id = uuid::Uuid::now_v7().to_string();
        tx.execute(
            "INSERT INTO artifacts (id, version, chat_id, user_id, title, kind, content) \
             VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6)",
            params![id, chat_id, user_id, title, kind, content],
        )?;
        let record = tx.query_row(
            &format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id = ?1 AND version = 1"),
            params![id],
            artifact_from_row,
        )?;
        tx.commit()?;
        Ok(record)
    }

    /// Append the next version (`max + 1`) to a chain.
    pub async fn add_artifact_version(
        &self,
        user_id: &str,
        artifact_id: &str,
        title: Option<&str>,
        content: &str,
    ) -> StoreResult<ArtifactRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let max = artifact_owner_and_max(&tx, artifact_id, user_id)?;

        let current = tx.query_row(
            &format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id = ?1 AND version = ?2"),
            params![artifact_id, max],
            artifact_from_row,
        )?;
        let next = max + 1;
        tx.execute(
            "INSERT INTO artifacts (id, version, chat_id, user_id, title, kind, content) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                artifact_id,
                next,
                current.chat_id,
                current.user_id,
                title.unwrap_or(&current.title),
                current.kind,
                content
            ],
        )?;
        let record = tx.query_row(
            &format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id = ?1 AND version = ?2"),
            params![artifact_id, next],
            artifact_from_row,
        )?;
        tx.commit()?;
        Ok(record)
    }

    /// All versions of a chain, ascending.
    pub async fn get_artifact_versions(
        &self,
        user_id: &str,
        artifact_id: &str,
    ) -> StoreResult<Vec<ArtifactRecord>> {
        let db = self.db();
        let db = db.lock().await;
        artifact_owner_and_max(&db, artifact_id, user_id)?;
        let mut stmt = db.prepare(&format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id = ?1 ORDER BY version ASC"
        ))?;
        let rows = stmt.query_map(params![artifact_id], artifact_from_row)?;
        let mut versions = Vec::new();
        for row in rows {
            versions.push(row?);
        }
        Ok(versions)
    }

    /// The caller's artifacts, one row per chain (its current version),
    /// keyset-paginated by chain id.
    pub async fn list_artifacts(
        &self,
        user_id: &str,
        req: &PageRequest,
    ) -> StoreResult<Page<ArtifactRecord>> {
        let plan = PagePlan::from_request(req)?;
        let db = self.db();
        let db = db.lock().await;
        let sql = format!(
            "SELECT {ARTIFACT_COLUMNS} FROM artifacts a \
             WHERE user_id = ?1 \
               AND version = (SELECT MAX(version) FROM artifacts WHERE id = a.id){filter} \
             ORDER BY id {order} LIMIT {limit}",
            filter = plan.cursor_filter("a.id"),
            order = plan.order_sql(),
            limit = plan.fetch_limit(),
        );
        let mut stmt = db.prepare(&sql)?;
        let mut rows_out = Vec::new();
        if let Some(bound) = plan.bound() {
            let rows = stmt.query_map(params![user_id, bound], artifact_from_row)?;
            for row in rows {
                rows_out.push(row?);
            }
        } else {
            let rows = stmt.query_map(params![user_id], artifact_from_row)?;
            for row in rows {
                rows_out.push(row?);
            }
        }
        Ok(plan.into_page(rows_out, |a| a.id.clone()))
    }

    /// Trim trailing versions: delete every version greater than `after`,
    /// plus the suggestions pinned to the deleted versions. The remaining
    /// max version implicitly becomes the new current.
    pub async fn delete_artifact_versions_after(
        &self,
        user_id: &str,
        artifact_id: &str,
        after: i64,
    ) -> StoreResult<usize> {
        if after < 1 {
            return Err(StoreError::bad_request(
                "after must be at least 1; a chain always keeps its first version",
            ));
        }
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        artifact_owner_and_max(&tx, artifact_id, user_id)?;

        let deleted = tx.execute(
            "DELETE FROM artifacts WHERE id = ?1 AND version > ?2",
            params![artifact_id, after],
        )?;
        tx.execute(
            "DELETE FROM artifact_suggestions WHERE artifact_id = ?1 AND artifact_version > ?2",
            params![artifact_id, after],
        )?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Record a suggestion against a specific version (defaults to current).
    pub async fn add_suggestion(
        &self,
        user_id: &str,
        artifact_id: &str,
        artifact_version: Option<i64>,
        original_text: &str,
        suggested_text: &str,
    ) -> StoreResult<SuggestionRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let max = artifact_owner_and_max(&tx, artifact_id, user_id)?;
        let version = artifact_version.unwrap_or(max);
        if version < 1 || version > max {
            return Err(StoreError::NotFound("artifact version"));
        }

        let id = uuid::Uuid::now_v7().to_string();
        tx.execute(
            "INSERT INTO artifact_suggestions \
             (id, artifact_id, artifact_version, original_text, suggested_text) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, artifact_id, version, original_text, suggested_text],
        )?;
        let record = tx.query_row(
            "SELECT id, artifact_id, artifact_version, original_text, suggested_text, \
             is_resolved, created_at FROM artifact_suggestions WHERE id = ?1",
            params![id],
            suggestion_from_row,
        )?;
        tx.commit()?;
        Ok(record)
    }

    pub async fn list_suggestions(
        &self,
        user_id: &str,
        artifact_id: &str,
    ) -> StoreResult<Vec<SuggestionRecord>> {
        let db = self.db();
        let db = db.lock().await;
        artifact_owner_and_max(&db, artifact_id, user_id)?;
        let mut stmt = db.prepare(
            "SELECT id, artifact_id, artifact_version, original_text, suggested_text, \
             is_resolved, created_at FROM artifact_suggestions \
             WHERE artifact_id = ?1 ORDER BY artifact_version ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![artifact_id], suggestion_from_row)?;
        let mut suggestions = Vec::new();
        for row in rows {
            suggestions.push(row?);
        }
        Ok(suggestions)
    }

    pub async fn resolve_suggestion(
        &self,
        user_id: &str,
        suggestion_id: &str,
    ) -> StoreResult<SuggestionRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;

        let artifact_id: Option<String> = tx
            .query_row(
                "SELECT artifact_id FROM artifact_suggestions WHERE id = ?1",
                params![suggestion_id],
                |row| row.get(0),
            )
            .optional()?;
        let artifact_id = artifact_id.ok_or(StoreError::NotFound("suggestion"))?;
        artifact_owner_and_max(&tx, &artifact_id, user_id)?;

        tx.execute(
            "UPDATE artifact_suggestions SET is_resolved = 1 WHERE id = ?1",
            params![suggestion_id],
        )?;
        let record = tx.query_row(
            "SELECT id, artifact_id, artifact_version, original_text, suggested_text, \
             is_resolved, created_at FROM artifact_suggestions WHERE id = ?1",
            params![suggestion_id],
            suggestion_from_row,
        )?;
        tx.commit()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaLimits;
    use crate::core::guard::Guard;
    use crate::core::store::test_store;
    use crate::core::store::versioned::EntityFields;
    use serde_json::json;

    async fn seed_chat(store: &Store, user_id: &str) -> String {
        let g = Guard::new(QuotaLimits::default());
        let ws = store.create_workspace(&g, user_id, "Team").await.unwrap();
        let (app, _) = store
            .create_app(
                &g,
                user_id,
                &ws.id,
                EntityFields {
                    kind: "single-agent".to_string(),
                    name: "Helper".to_string(),
                    metadata: json!({}),
                },
            )
            .await
            .unwrap();
        store
            .create_chat(&g, user_id, &app.id, "scratch")
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn chain_versions_increment_from_one() {
        let store = test_store().await;
        let chat_id = seed_chat(&store, "alice").await;
        let first = store
            .create_artifact("alice", &chat_id, "Notes", "text", "v1 body")
            .await
            .unwrap();
        assert_eq!(first.version, 1);

        let second = store
            .add_artifact_version("alice", &first.id, None, "v2 body")
            .await
            .unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.title, "Notes");
        assert_eq!(second.chat_id, chat_id);

        let versions = store
            .get_artifact_versions("alice", &first.id)
            .await
            .unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn trim_deletes_trailing_versions_and_their_suggestions() {
        let store = test_store().await;
        let chat_id = seed_chat(&store, "alice").await;
        let artifact = store
            .create_artifact("alice", &chat_id, "Doc", "text", "v1")
            .await
            .unwrap();
        for i in 2..=5 {
            store
                .add_artifact_version("alice", &artifact.id, None, &format!("v{i}"))
                .await
                .unwrap();
        }
        store
            .add_suggestion("alice", &artifact.id, Some(3), "a", "b")
            .await
            .unwrap();
        store
            .add_suggestion("alice", &artifact.id, Some(5), "c", "d")
            .await
            .unwrap();

        let deleted = store
            .delete_artifact_versions_after("alice", &artifact.id, 3)
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let versions = store
            .get_artifact_versions("alice", &artifact.id)
            .await
            .unwrap();
        assert_eq!(
            versions.iter().map(|v| v.version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );

        let suggestions = store.list_suggestions("alice", &artifact.id).await.unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].artifact_version, 3);

        // New versions continue from the trimmed chain's max.
        let next = store
            .add_artifact_version("alice", &artifact.id, None, "v4 again")
            .await
            .unwrap();
        assert_eq!(next.version, 4);
    }

    #[tokio::test]
    async fn trim_rejects_zero_and_unknown_chains() {
        let store = test_store().await;
        let chat_id = seed_chat(&store, "alice").await;
        let artifact = store
            .create_artifact("alice", &chat_id, "Doc", "text", "v1")
            .await
            .unwrap();

        let err = store
            .delete_artifact_versions_after("alice", &artifact.id, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BadRequest(_)));

        let err = store
            .delete_artifact_versions_after("alice", "missing", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn artifacts_are_owner_scoped() {
        let store = test_store().await;
        let chat_id = seed_chat(&store, "alice").await;
        let artifact = store
            .create_artifact("alice", &chat_id, "Doc", "text", "v1")
            .await
            .unwrap();

        let err = store
            .add_artifact_version("bob", &artifact.id, None, "hijack")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));

        let err = store
            .create_artifact("bob", &chat_id, "Doc", "text", "v1")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn suggestion_version_must_exist() {
        let store = test_store().await;
        let chat_id = seed_chat(&store, "alice").await;
        let artifact = store
            .create_artifact("alice", &chat_id, "Doc", "text", "v1")
            .await
            .unwrap();
        let err = store
            .add_suggestion("alice", &artifact.id, Some(7), "a", "b")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn resolve_marks_suggestion() {
        let store = test_store().await;
        let chat_id = seed_chat(&store, "alice").await;
        let artifact = store
            .create_artifact("alice", &chat_id, "Doc", "text", "v1")
            .await
            .unwrap();
        let suggestion = store
            .add_suggestion("alice", &artifact.id, None, "a", "b")
            .await
            .unwrap();
        assert!(!suggestion.is_resolved);
        let resolved = store
            .resolve_suggestion("alice", &suggestion.id)
            .await
            .unwrap();
        assert!(resolved.is_resolved);
    }

    #[tokio::test]
    async fn list_artifacts_returns_only_current_versions() {
        let store = test_store().await;
        let chat_id = seed_chat(&store, "alice").await;
        for i in 0..3 {
            let artifact = store
                .create_artifact("alice", &chat_id, &format!("Doc {i}"), "text", "v1")
                .await
                .unwrap();
            store
                .add_artifact_version("alice", &artifact.id, None, "v2")
                .await
                .unwrap();
        }
        let page = store
            .list_artifacts("alice", &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.items.iter().all(|a| a.version == 2));
        assert!(!page.has_more);
    }
}
