use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::error::{StoreError, StoreResult};
use super::pagination::{Page, PagePlan, PageRequest};
use super::types::{ChunkRecord, DatasetRecord, DocumentRecord, SegmentRecord};
use super::versioned::decode_metadata;
use super::Store;
use crate::core::guard::Guard;

fn dataset_from_row(row: &Row<'_>) -> rusqlite::Result<DatasetRecord> {
    Ok(DatasetRecord {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        metadata: decode_metadata(row.get(3)?),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get(0)?,
        dataset_id: row.get(1)?,
        name: row.get(2)?,
        metadata: decode_metadata(row.get(3)?),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const DATASET_COLUMNS: &str = "id, workspace_id, name, metadata, created_at, updated_at";
const DOCUMENT_COLUMNS: &str = "id, dataset_id, name, metadata, created_at, updated_at";

fn dataset_workspace(conn: &Connection, dataset_id: &str) -> StoreResult<String> {
    conn.query_row(
        "SELECT workspace_id FROM datasets WHERE id = ?1",
        params![dataset_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(StoreError::NotFound("dataset"))
}

fn document_workspace(conn: &Connection, document_id: &str) -> StoreResult<String> {
    conn.query_row(
        "SELECT d.workspace_id FROM documents doc \
         JOIN datasets d ON d.id = doc.dataset_id WHERE doc.id = ?1",
        params![document_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(StoreError::NotFound("document"))
}

/// Drop a dataset and its full document/segment/chunk tree.
pub(crate) fn delete_dataset_tx(conn: &Connection, dataset_id: &str) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM chunks WHERE segment_id IN \
         (SELECT s.id FROM segments s \
          JOIN documents doc ON doc.id = s.document_id WHERE doc.dataset_id = ?1)",
        params![dataset_id],
    )?;
    conn.execute(
        "DELETE FROM segments WHERE document_id IN \
         (SELECT id FROM documents WHERE dataset_id = ?1)",
        params![dataset_id],
    )?;
    conn.execute(
        "DELETE FROM documents WHERE dataset_id = ?1",
        params![dataset_id],
    )?;
    conn.execute("DELETE FROM datasets WHERE id = ?1", params![dataset_id])?;
    Ok(())
}

impl Store {
    pub async fn create_dataset(
        &self,
        guard: &Guard,
        user_id: &str,
        workspace_id: &str,
        name: &str,
        metadata: Value,
    ) -> StoreResult<DatasetRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        guard.verify_membership(&tx, workspace_id, user_id)?;

        let id = uuid::Uuid::now_v7().to_string();
        tx.execute(
            "INSERT INTO datasets (id, workspace_id, name, metadata) VALUES (?1, ?2, ?3, ?4)",
            params![id, workspace_id, name, metadata.to_string()],
        )?;
        let dataset = tx.query_row(
            &format!("SELECT {DATASET_COLUMNS} FROM datasets WHERE id = ?1"),
            params![id],
            dataset_from_row,
        )?;
        tx.commit()?;
        Ok(dataset)
    }

    pub async fn list_datasets(
        &self,
        guard: &Guard,
        user_id: &str,
        workspace_id: &str,
        req: &PageRequest,
    ) -> StoreResult<Page<DatasetRecord>> {
        let plan = PagePlan::from_request(req)?;
        let db = self.db();
        let db = db.lock().await;
        guard.verify_membership(&db, workspace_id, user_id)?;

        let sql = format!(
            "SELECT {DATASET_COLUMNS} FROM datasets WHERE workspace_id = ?1{filter} \
             ORDER BY id {order} LIMIT {limit}",
            filter = plan.cursor_filter("id"),
            order = plan.order_sql(),
            limit = plan.fetch_limit(),
        );
        let mut stmt = db.prepare(&sql)?;
        let mut datasets = Vec::new();
        if let Some(bound) = plan.bound() {
            let rows = stmt.query_map(params![workspace_id, bound], dataset_from_row)?;
            for row in rows {
                datasets.push(row?);
            }
        } else {
            let rows = stmt.query_map(params![workspace_id], dataset_from_row)?;
            for row in rows {
                datasets.push(row?);
            }
        }
        Ok(plan.into_page(datasets, |d| d.id.clone()))
    }

    pub async fn get_dataset(
        &self,
        guard: &Guard,
        user_id: &str,
        dataset_id: &str,
    ) -> StoreResult<DatasetRecord> {
        let db = self.db();
        let db = db.lock().await;
        let workspace_id = dataset_workspace(&db, dataset_id)?;
        guard.verify_membership(&db, &workspace_id, user_id)?;
        Ok(db.query_row(
            &format!("SELECT {DATASET_COLUMNS} FROM datasets WHERE id = ?1"),
            params![dataset_id],
            dataset_from_row,
        )?)
    }

    pub async fn rename_dataset(
        &self,
        guard: &Guard,
        user_id: &str,
        dataset_id: &str,
        name: &str,
    ) -> StoreResult<DatasetRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = dataset_workspace(&tx, dataset_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;
        tx.execute(
            "UPDATE datasets SET name = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![name, dataset_id],
        )?;
        let dataset = tx.query_row(
            &format!("SELECT {DATASET_COLUMNS} FROM datasets WHERE id = ?1"),
            params![dataset_id],
            dataset_from_row,
        )?;
        tx.commit()?;
        Ok(dataset)
    }

    pub async fn delete_dataset(
        &self,
        guard: &Guard,
        user_id: &str,
        dataset_id: &str,
    ) -> StoreResult<()> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = dataset_workspace(&tx, dataset_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;
        delete_dataset_tx(&tx, dataset_id)?;
        tx.commit()?;
        Ok(())
    }

    pub async fn create_document(
        &self,
        guard: &Guard,
        user_id: &str,
        dataset_id: &str,
        name: &str,
        metadata: Value,
    ) -> StoreResult<DocumentRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = dataset_workspace(&tx, dataset_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;

        let id = uuid::Uuid::now_v7().to_string();
        tx.execute(
            "INSERT INTO documents (id, dataset_id, name, metadata) VALUES (?1, ?2, ?3, ?4)",
            params![id, dataset_id, name, metadata.to_string()],
        )?;
        let document = tx.query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
            params![id],
            document_from_row,
        )?;
        tx.commit()?;
        Ok(document)
    }

    pub async fn list_documents(
        &self,
        guard: &Guard,
        user_id: &str,
        dataset_id: &str,
        req: &PageRequest,
    ) -> StoreResult<Page<DocumentRecord>> {
        let plan = PagePlan::from_request(req)?;
        let db = self.db();
        let db = db.lock().await;
        let workspace_id = dataset_workspace(&db, dataset_id)?;
        guard.verify_membership(&db, &workspace_id, user_id)?;

        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE dataset_id = ?1{filter} \
             ORDER BY id {order} LIMIT {limit}",
            filter = plan.cursor_filter("id"),
            order = plan.order_sql(),
            limit = plan.fetch_limit(),
        );
        let mut stmt = db.prepare(&sql)?;
        let mut documents = Vec::new();
        if let Some(bound) = plan.bound() {
            let rows = stmt.query_map(params![dataset_id, bound], document_from_row)?;
            for row in rows {
                documents.push(row?);
            }
        } else {
            let rows = stmt.query_map(params![dataset_id], document_from_row)?;
            for row in rows {
                documents.push(row?);
            }
        }
        Ok(plan.into_page(documents, |d| d.id.clone()))
    }

    pub async fn delete_document(
        &self,
        guard: &Guard,
        user_id: &str,
        document_id: &str,
    ) -> StoreResult<()> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = document_workspace(&tx, document_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;
        tx.execute(
            "DELETE FROM chunks WHERE segment_id IN \
             (SELECT id FROM segments WHERE document_id = ?1)",
            params![document_id],
        )?;
        tx.execute(
            "DELETE FROM segments WHERE document_id = ?1",
            params![document_id],
        )?;
        tx.execute("DELETE FROM documents WHERE id = ?1", params![document_id])?;
        tx.commit()?;
        Ok(())
    }

    /// Replace a document's body with an ordered list of segments, each split
    /// into ordered chunks.
    pub async fn replace_segments(
        &self,
        guard: &Guard,
        user_id: &str,
        document_id: &str,
        segments: &[(String, Vec<String>)],
    ) -> StoreResult<Vec<SegmentRecord>> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = document_workspace(&tx, document_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;

        tx.execute(
            "DELETE FROM chunks WHERE segment_id IN \
             (SELECT id FROM segments WHERE document_id = ?1)",
            params![document_id],
        )?;
        tx.execute(
            "DELETE FROM segments WHERE document_id = ?1",
            params![document_id],
        )?;

        let mut created = Vec::with_capacity(segments.len());
        for (position, (content, chunks)) in segments.iter().enumerate() {
            let segment_id = uuid::Uuid::now_v7().to_string();
            tx.execute(
                "INSERT INTO segments (id, document_id, position, content) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![segment_id, document_id, position as i64, content],
            )?;
            for (chunk_position, chunk) in chunks.iter().enumerate() {
                tx.execute(
                    "INSERT INTO chunks (id, segment_id, position, content) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        uuid::Uuid::now_v7().to_string(),
                        segment_id,
                        chunk_position as i64,
                        chunk
                    ],
                )?;
            }
            created.push(SegmentRecord {
                id: segment_id,
                document_id: document_id.to_string(),
                position: position as i64,
                content: content.clone(),
            });
        }
        tx.commit()?;
        Ok(created)
    }

    pub async fn list_segments(
        &self,
        guard: &Guard,
        user_id: &str,
        document_id: &str,
    ) -> StoreResult<Vec<SegmentRecord>> {
        let db = self.db();
        let db = db.lock().await;
        let workspace_id = document_workspace(&db, document_id)?;
        guard.verify_membership(&db, &workspace_id, user_id)?;
        let mut stmt = db.prepare(
            "SELECT id, document_id, position, content FROM segments \
             WHERE document_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![document_id], |row| {
            Ok(SegmentRecord {
                id: row.get(0)?,
                document_id: row.get(1)?,
                position: row.get(2)?,
                content: row.get(3)?,
            })
        })?;
        let mut segments = Vec::new();
        for row in rows {
            segments.push(row?);
        }
        Ok(segments)
    }

    pub async fn list_chunks(
        &self,
        guard: &Guard,
        user_id: &str,
        segment_id: &str,
    ) -> StoreResult<Vec<ChunkRecord>> {
        let db = self.db();
        let db = db.lock().await;
        let workspace_id: String = db
            .query_row(
                "SELECT d.workspace_id FROM segments s \
                 JOIN documents doc ON doc.id = s.document_id \
                 JOIN datasets d ON d.id = doc.dataset_id WHERE s.id = ?1",
                params![segment_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound("segment"))?;
        guard.verify_membership(&db, &workspace_id, user_id)?;
        let mut stmt = db.prepare(
            "SELECT id, segment_id, position, content FROM chunks \
             WHERE segment_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![segment_id], |row| {
            Ok(ChunkRecord {
                id: row.get(0)?,
                segment_id: row.get(1)?,
                position: row.get(2)?,
                content: row.get(3)?,
            })
        })?;
        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaLimits;
    use crate::core::store::test_store;
    use serde_json::json;

    async fn seed_workspace(store: &Store, guard: &Guard, user_id: &str) -> String {
        store
            .create_workspace(guard, user_id, "Team")
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn dataset_lifecycle() {
        let store = test_store().await;
        let guard = Guard::new(QuotaLimits::default());
        let ws = seed_workspace(&store, &guard, "alice").await;

        let dataset = store
            .create_dataset(&guard, "alice", &ws, "KB", json!({"lang": "en"}))
            .await
            .unwrap();
        assert_eq!(dataset.metadata["lang"], "en");

        let renamed = store
            .rename_dataset(&guard, "alice", &dataset.id, "Knowledge Base")
            .await
            .unwrap();
        assert_eq!(renamed.name, "Knowledge Base");

        store
            .delete_dataset(&guard, "alice", &dataset.id)
            .await
            .unwrap();
        let err = store
            .get_dataset(&guard, "alice", &dataset.id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn datasets_require_membership() {
        let store = test_store().await;
        let guard = Guard::new(QuotaLimits::default());
        let ws = seed_workspace(&store, &guard, "alice").await;
        let err = store
            .create_dataset(&guard, "mallory", &ws, "KB", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn segments_replace_in_order() {
        let store = test_store().await;
        let guard = Guard::new(QuotaLimits::default());
        let ws = seed_workspace(&store, &guard, "alice").await;
        let dataset = store
            .create_dataset(&guard, "alice", &ws, "KB", json!({}))
            .await
            .unwrap();
        let document = store
            .create_document(&guard, "alice", &dataset.id, "guide.md", json!({}))
            .await
            .unwrap();

        let first = vec![("intro".to_string(), vec!["i1".to_string(), "i2".to_string()])];
        store
            .replace_segments(&guard, "alice", &document.id, &first)
            .await
            .unwrap();

        let second = vec![
            ("alpha".to_string(), vec!["a1".to_string()]),
            ("beta".to_string(), vec!["b1".to_string(), "b2".to_string()]),
        ];
        let created = store
            .replace_segments(&guard, "alice", &document.id, &second)
            .await
            .unwrap();
        assert_eq!(created.len(), 2);

        let segments = store
            .list_segments(&guard, "alice", &document.id)
            .await
            .unwrap();
        assert_eq!(
            segments.iter().map(|s| s.content.as_str()).collect::<Vec<_>>(),
            vec!["alpha", "beta"]
        );
        let chunks = store
            .list_chunks(&guard, "alice", &segments[1].id)
            .await
            .unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>(),
            vec!["b1", "b2"]
        );
    }

    #[tokio::test]
    async fn dataset_delete_cascades_to_chunks() {
        let store = test_store().await;
        let guard = Guard::new(QuotaLimits::default());
        let ws = seed_workspace(&store, &guard, "alice").await;
        let dataset = store
            .create_dataset(&guard, "alice", &ws, "KB", json!({}))
            .await
            .unwrap();
        let document = store
            .create_document(&guard, "alice", &dataset.id, "guide.md", json!({}))
            .await
            .unwrap();
        store
            .replace_segments(
                &guard,
                "alice",
                &document.id,
                &[("body".to_string(), vec!["c1".to_string()])],
            )
            .await
            .unwrap();

        store
            .delete_dataset(&guard, "alice", &dataset.id)
            .await
            .unwrap();

        let db = store.db();
        let db = db.lock().await;
        for table in ["documents", "segments", "chunks"] {
            let count: i64 = db
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert_eq!(count, 0, "{table} not emptied");
        }
    }

    #[tokio::test]
    async fn document_pagination_walks_pages() {
        let store = test_store().await;
        let guard = Guard::new(QuotaLimits::default());
        let ws = seed_workspace(&store, &guard, "alice").await;
        let dataset = store
            .create_dataset(&guard, "alice", &ws, "KB", json!({}))
            .await
            .unwrap();
        for i in 0..5 {
            store
                .create_document(&guard, "alice", &dataset.id, &format!("doc{i}"), json!({}))
                .await
                .unwrap();
        }

        let req = PageRequest {
            limit: Some(2),
            ..Default::default()
        };
        let page1 = store
            .list_documents(&guard, "alice", &dataset.id, &req)
            .await
            .unwrap();
        assert_eq!(page1.items.len(), 2);
        assert!(page1.has_more);

        let page2 = store
            .list_documents(
                &guard,
                "alice",
                &dataset.id,
                &PageRequest {
                    after: page1.last.clone(),
                    limit: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page2.items.len(), 2);
        assert!(page2.items[0].id < page1.items[1].id);
    }
}
