use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

use super::error::{StoreError, StoreResult};
use super::types::ApiKeyRecord;
use super::Store;

fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_raw_key() -> String {
    let bytes: [u8; 16] = rand::random();
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("tvk_{}", hex)
}

impl Store {
    /// Mint a key for the caller. The raw key is returned exactly once;
    /// only its hash is stored.
    pub async fn create_api_key(
        &self,
        user_id: &str,
        name: &str,
    ) -> StoreResult<(String, ApiKeyRecord)> {
        let raw_key = generate_raw_key();
        let key_hash = hash_key(&raw_key);
        let id = uuid::Uuid::new_v4().to_string();

        let db = self.db();
        let db = db.lock().await;
        db.execute(
            "INSERT INTO api_keys (id, user_id, name, key_hash) VALUES (?1, ?2, ?3, ?4)",
            params![id, user_id, name, key_hash],
        )?;
        let created_at = db.query_row(
            "SELECT created_at FROM api_keys WHERE id = ?1",
            params![id],
            |row| row.get::<_, String>(0),
        )?;

        Ok((
            raw_key,
            ApiKeyRecord {
                id,
                user_id: user_id.to_string(),
                name: name.to_string(),
                created_at,
            },
        ))
    }

    pub async fn list_api_keys(&self, user_id: &str) -> StoreResult<Vec<ApiKeyRecord>> {
        let db = self.db();
        let db = db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, user_id, name, created_at FROM api_keys \
             WHERE user_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(ApiKeyRecord {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    pub async fn delete_api_key(&self, user_id: &str, key_id: &str) -> StoreResult<()> {
        let db = self.db();
        let db = db.lock().await;
        let rows = db.execute(
            "DELETE FROM api_keys WHERE id = ?1 AND user_id = ?2",
            params![key_id, user_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound("api key"));
        }
        Ok(())
    }

    /// Map a presented raw key back to the user it belongs to.
    pub async fn resolve_api_key(&self, raw_key: &str) -> StoreResult<Option<String>> {
        let key_hash = hash_key(raw_key);
        let db = self.db();
        let db = db.lock().await;
        let user_id = db
            .query_row(
                "SELECT user_id FROM api_keys WHERE key_hash = ?1",
                params![key_hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_store;

    #[tokio::test]
    async fn raw_key_resolves_to_owner() {
        let store = test_store().await;
        let (raw, record) = store.create_api_key("alice", "laptop").await.unwrap();
        assert!(raw.starts_with("tvk_"));
        assert_eq!(record.user_id, "alice");

        let resolved = store.resolve_api_key(&raw).await.unwrap();
        assert_eq!(resolved.as_deref(), Some("alice"));
        assert!(store.resolve_api_key("tvk_bogus").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_are_listed_and_deleted_per_user() {
        let store = test_store().await;
        let (_, mine) = store.create_api_key("alice", "laptop").await.unwrap();
        store.create_api_key("bob", "phone").await.unwrap();

        let keys = store.list_api_keys("alice").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].id, mine.id);

        // Deleting someone else's key is treated as not found.
        let err = store.delete_api_key("bob", &mine.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        store.delete_api_key("alice", &mine.id).await.unwrap();
        assert!(store.list_api_keys("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleted_key_no_longer_resolves() {
        let store = test_store().await;
        let (raw, record) = store.create_api_key("alice", "laptop").await.unwrap();
        store.delete_api_key("alice", &record.id).await.unwrap();
        assert!(store.resolve_api_key(&raw).await.unwrap().is_none());
    }
}
