use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::app::app_workspace;
use super::error::{StoreError, StoreResult};
use super::pagination::{Page, PagePlan, PageRequest};
use super::types::{ChatRecord, MessageRecord, VoteRecord};
use super::Store;
use crate::core::guard::Guard;

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRecord> {
    Ok(ChatRecord {
        id: row.get(0)?,
        app_id: row.get(1)?,
        user_id: row.get(2)?,
        title: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let raw: String = row.get(3)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role: row.get(2)?,
        content: serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        created_at: row.get(4)?,
    })
}

const CHAT_COLUMNS: &str = "id, app_id, user_id, title, created_at, updated_at";

/// Look up a chat and enforce that the caller owns it.
fn owned_chat(conn: &Connection, chat_id: &str, user_id: &str) -> StoreResult<ChatRecord> {
    let chat = conn
        .query_row(
            &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
            params![chat_id],
            chat_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound("chat"))?;
    if chat.user_id != user_id {
        return Err(StoreError::forbidden("caller does not own this chat"));
    }
    Ok(chat)
}

/// Remove a chat and everything hanging off it: messages, votes, and the
/// artifact chains (plus their suggestions) created from the chat.
pub(crate) fn delete_chat_tx(conn: &Connection, chat_id: &str) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM artifact_suggestions WHERE artifact_id IN \
         (SELECT DISTINCT id FROM artifacts WHERE chat_id = ?1)",
        params![chat_id],
    )?;
    conn.execute("DELETE FROM artifacts WHERE chat_id = ?1", params![chat_id])?;
    conn.execute(
        "DELETE FROM message_votes WHERE chat_id = ?1",
        params![chat_id],
    )?;
    conn.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id])?;
    conn.execute("DELETE FROM chats WHERE id = ?1", params![chat_id])?;
    Ok(())
}

impl Store {
    /// Open a chat against an app. The caller must be a member of the app's
    /// workspace; the chat itself stays private to its creator.
    pub async fn create_chat(
        &self,
        guard: &Guard,
        user_id: &str,
        app_id: &str,
        title: &str,
    ) -> StoreResult<ChatRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = app_workspace(&tx, app_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;

        let id = uuid::Uuid::now_v7().to_string();
        tx.execute(
            "INSERT INTO chats (id, app_id, user_id, title) VALUES (?1, ?2, ?3, ?4)",
            params![id, app_id, user_id, title],
        )?;
        let chat = tx.query_row(
            &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
            params![id],
            chat_from_row,
        )?;
        tx.commit()?;
        Ok(chat)
    }

    /// The caller's chats within one app, newest first.
    pub async fn list_chats(
        &self,
        guard: &Guard,
        user_id: &str,
        app_id: &str,
        req: &PageRequest,
    ) -> StoreResult<Page<ChatRecord>> {
        let plan = PagePlan::from_request(req)?;
        let db = self.db();
        let db = db.lock().await;
        let workspace_id = app_workspace(&db, app_id)?;
        guard.verify_membership(&db, &workspace_id, user_id)?;

        let sql = format!(
            "SELECT {CHAT_COLUMNS} FROM chats \
             WHERE app_id = ?1 AND user_id = ?2{filter} \
             ORDER BY id {order} LIMIT {limit}",
            filter = plan.cursor_filter("id"),
            order = plan.order_sql(),
            limit = plan.fetch_limit(),
        );
        let mut stmt = db.prepare(&sql)?;
        let mut chats = Vec::new();
        if let Some(bound) = plan.bound() {
            let rows = stmt.query_map(params![app_id, user_id, bound], chat_from_row)?;
            for row in rows {
                chats.push(row?);
            }
        } else {
            let rows = stmt.query_map(params![app_id, user_id], chat_from_row)?;
            for row in rows {
                chats.push(row?);
            }
        }
        Ok(plan.into_page(chats, |c| c.id.clone()))
    }

    /// A chat with its full message history, oldest message first.
    pub async fn get_chat(
        &self,
        user_id: &str,
        chat_id: &str,
    ) -> StoreResult<(ChatRecord, Vec<MessageRecord>)> {
        let db = self.db();
        let db = db.lock().await;
        let chat = owned_chat(&db, chat_id, user_id)?;
        let mut stmt = db.prepare(
            "SELECT id, chat_id, role, content, created_at FROM messages \
             WHERE chat_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![chat_id], message_from_row)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok((chat, messages))
    }

    pub async fn add_message(
        &self,
        user_id: &str,
        chat_id: &str,
        role: &str,
        content: &Value,
    ) -> StoreResult<MessageRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        owned_chat(&tx, chat_id, user_id)?;

        let id = uuid::Uuid::now_v7().to_string();
        tx.execute(
            "INSERT INTO messages (id, chat_id, role, content) VALUES (?1, ?2, ?3, ?4)",
            params![id, chat_id, role, content.to_string()],
        )?;
        tx.execute(
            "UPDATE chats SET updated_at = datetime('now') WHERE id = ?1",
            params![chat_id],
        )?;
        let message = tx.query_row(
            "SELECT id, chat_id, role, content, created_at FROM messages WHERE id = ?1",
            params![id],
            message_from_row,
        )?;
        tx.commit()?;
        Ok(message)
    }

    /// Record or flip a vote on a message. One vote per (message, user);
    /// voting again overwrites the previous direction.
    pub async fn vote_message(
        &self,
        user_id: &str,
        chat_id: &str,
        message_id: &str,
        is_upvoted: bool,
    ) -> StoreResult<VoteRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        owned_chat(&tx, chat_id, user_id)?;

        let belongs: Option<String> = tx
            .query_row(
                "SELECT id FROM messages WHERE id = ?1 AND chat_id = ?2",
                params![message_id, chat_id],
                |row| row.get(0),
            )
            .optional()?;
        if belongs.is_none() {
            return Err(StoreError::NotFound("message"));
        }

        tx.execute(
            "INSERT INTO message_votes (chat_id, message_id, user_id, is_upvoted) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(chat_id, message_id, user_id) DO UPDATE SET is_upvoted = excluded.is_upvoted",
            params![chat_id, message_id, user_id, is_upvoted as i64],
        )?;
        tx.commit()?;
        Ok(VoteRecord {
            chat_id: chat_id.to_string(),
            message_id: message_id.to_string(),
            user_id: user_id.to_string(),
            is_upvoted,
        })
    }

    pub async fn list_votes(&self, user_id: &str, chat_id: &str) -> StoreResult<Vec<VoteRecord>> {
        let db = self.db();
        let db = db.lock().await;
        owned_chat(&db, chat_id, user_id)?;
        let mut stmt = db.prepare(
            "SELECT chat_id, message_id, user_id, is_upvoted FROM message_votes \
             WHERE chat_id = ?1 ORDER BY message_id ASC",
        )?;
        let rows = stmt.query_map(params![chat_id], |row| {
            Ok(VoteRecord {
                chat_id: row.get(0)?,
                message_id: row.get(1)?,
                user_id: row.get(2)?,
                is_upvoted: row.get::<_, i64>(3)? != 0,
            })
        })?;
        let mut votes = Vec::new();
        for row in rows {
            votes.push(row?);
        }
        Ok(votes)
    }

    pub async fn delete_chat(&self, user_id: &str, chat_id: &str) -> StoreResult<()> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        owned_chat(&tx, chat_id, user_id)?;
        delete_chat_tx(&tx, chat_id)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaLimits;
    use crate::core::store::test_store;
    use crate::core::store::versioned::EntityFields;
    use serde_json::json;

    async fn seed_app(store: &Store, guard: &Guard, user_id: &str) -> String {
        let ws = store.create_workspace(guard, user_id, "Team").await.unwrap();
        let (app, _) = store
            .create_app(
                guard,
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
        app.id
    }

    #[tokio::test]
    async fn chat_history_keeps_message_order() {
        let store = test_store().await;
        let guard = Guard::new(QuotaLimits::default());
        let app_id = seed_app(&store, &guard, "alice").await;
        let chat = store
            .create_chat(&guard, "alice", &app_id, "hello")
            .await
            .unwrap();

        for i in 0..3 {
            store
                .add_message("alice", &chat.id, "user", &json!({"text": format!("m{i}")}))
                .await
                .unwrap();
        }
        let (fetched, messages) = store.get_chat("alice", &chat.id).await.unwrap();
        assert_eq!(fetched.id, chat.id);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content["text"], "m0");
        assert_eq!(messages[2].content["text"], "m2");
    }

    #[tokio::test]
    async fn chats_are_private_to_their_creator() {
        let store = test_store().await;
        let guard = Guard::new(QuotaLimits::default());
        let app_id = seed_app(&store, &guard, "alice").await;
        let chat = store
            .create_chat(&guard, "alice", &app_id, "private")
            .await
            .unwrap();

        let err = store.get_chat("mallory", &chat.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
        let err = store
            .add_message("mallory", &chat.id, "user", &json!("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn listing_excludes_other_users_chats() {
        let store = test_store().await;
        let guard = Guard::new(QuotaLimits::default());
        let app_id = seed_app(&store, &guard, "alice").await;
        let ws_id: String = {
            let db = store.db();
            let db = db.lock().await;
            app_workspace(&db, &app_id).unwrap()
        };
        store
            .add_member(&guard, "alice", &ws_id, "bob")
            .await
            .unwrap();

        store
            .create_chat(&guard, "alice", &app_id, "mine")
            .await
            .unwrap();
        store
            .create_chat(&guard, "bob", &app_id, "theirs")
            .await
            .unwrap();

        let page = store
            .list_chats(&guard, "alice", &app_id, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].title, "mine");
    }

    #[tokio::test]
    async fn vote_upsert_flips_direction() {
        let store = test_store().await;
        let guard = Guard::new(QuotaLimits::default());
        let app_id = seed_app(&store, &guard, "alice").await;
        let chat = store
            .create_chat(&guard, "alice", &app_id, "votes")
            .await
            .unwrap();
        let message = store
            .add_message("alice", &chat.id, "assistant", &json!("answer"))
            .await
            .unwrap();

        store
            .vote_message("alice", &chat.id, &message.id, true)
            .await
            .unwrap();
        store
            .vote_message("alice", &chat.id, &message.id, false)
            .await
            .unwrap();

        let votes = store.list_votes("alice", &chat.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert!(!votes[0].is_upvoted);
    }

    #[tokio::test]
    async fn vote_requires_message_in_chat() {
        let store = test_store().await;
        let guard = Guard::new(QuotaLimits::default());
        let app_id = seed_app(&store, &guard, "alice").await;
        let chat = store
            .create_chat(&guard, "alice", &app_id, "votes")
            .await
            .unwrap();
        let err = store
            .vote_message("alice", &chat.id, "no-such-message", true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_chat_removes_dependents() {
        let store = test_store().await;
        let guard = Guard::new(QuotaLimits::default());
        let app_id = seed_app(&store, &guard, "alice").await;
        let chat = store
            .create_chat(&guard, "alice", &app_id, "doomed")
            .await
            .unwrap();
        let message = store
            .add_message("alice", &chat.id, "user", &json!("hi"))
            .await
            .unwrap();
        store
            .vote_message("alice", &chat.id, &message.id, true)
            .await
            .unwrap();
        let artifact = store
            .create_artifact("alice", &chat.id, "Doc", "text", "body")
            .await
            .unwrap();
        store
            .add_suggestion("alice", &artifact.id, None, "a", "b")
            .await
            .unwrap();

        store.delete_chat("alice", &chat.id).await.unwrap();

        let db = store.db();
        let db = db.lock().await;
        for (table, column) in [
            ("chats", "id"),
            ("messages", "chat_id"),
            ("message_votes", "chat_id"),
            ("artifacts", "chat_id"),
        ] {
            let count: i64 = db
                .query_row(
                    &format!("SELECT COUNT(*) FROM {table} WHERE {column} = ?1"),
                    params![chat.id],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 0, "{table} not emptied");
        }
        let suggestions: i64 = db
            .query_row(
                "SELECT COUNT(*) FROM artifact_suggestions WHERE artifact_id = ?1",
                params![artifact.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(suggestions, 0);
    }
}
