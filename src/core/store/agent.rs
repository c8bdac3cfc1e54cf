use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::app::app_workspace;
use super::error::{StoreError, StoreResult};
use super::pagination::{Page, PagePlan, PageRequest};
use super::types::{EntityHead, EntityVersion};
use super::versioned::{self, EntityFields, EntityPatch, VersionSelector, AGENT_KIND};
use super::Store;
use crate::core::guard::Guard;

/// Resolve an agent to its owning workspace through its app.
fn agent_workspace(conn: &Connection, agent_id: &str) -> StoreResult<String> {
    let app_id: Option<String> = conn
        .query_row(
            "SELECT parent_id FROM agents WHERE id = ?1",
            params![agent_id],
            |row| row.get(0),
        )
        .optional()?;
    match app_id {
        Some(app_id) => app_workspace(conn, &app_id),
        None => Err(StoreError::NotFound("agent")),
    }
}

impl Store {
    pub async fn create_agent(
        &self,
        guard: &Guard,
        user_id: &str,
        app_id: &str,
        fields: EntityFields,
    ) -> StoreResult<(EntityHead, EntityVersion)> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = app_workspace(&tx, app_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;

        let id = uuid::Uuid::now_v7().to_string();
        versioned::insert_with_draft(&tx, AGENT_KIND, &id, app_id, &fields)?;
        let head = versioned::get_head(&tx, AGENT_KIND, &id)?;
        let draft = versioned::get_version(&tx, AGENT_KIND, &id, &VersionSelector::Draft)?;
        tx.commit()?;
        Ok((head, draft))
    }

    pub async fn list_agents(
        &self,
        guard: &Guard,
        user_id: &str,
        app_id: &str,
        req: &PageRequest,
    ) -> StoreResult<Page<EntityHead>> {
        let plan = PagePlan::from_request(req)?;
        let db = self.db();
        let db = db.lock().await;
        let workspace_id = app_workspace(&db, app_id)?;
        guard.verify_membership(&db, &workspace_id, user_id)?;
        let rows = versioned::list_heads(&db, AGENT_KIND, app_id, &plan)?;
        Ok(plan.into_page(rows, |head| head.id.clone()))
    }

    pub async fn get_agent(
        &self,
        guard: &Guard,
        user_id: &str,
        agent_id: &str,
    ) -> StoreResult<EntityHead> {
        let db = self.db();
        let db = db.lock().await;
        let workspace_id = agent_workspace(&db, agent_id)?;
        guard.verify_membership(&db, &workspace_id, user_id)?;
        versioned::get_head(&db, AGENT_KIND, agent_id)
    }

    pub async fn get_agent_version(
        &self,
        guard: &Guard,
        user_id: &str,
        agent_id: &str,
        selector: &VersionSelector,
    ) -> StoreResult<EntityVersion> {
        let db = self.db();
        let db = db.lock().await;
        let workspace_id = agent_workspace(&db, agent_id)?;
        guard.verify_membership(&db, &workspace_id, user_id)?;
        versioned::get_version(&db, AGENT_KIND, agent_id, selector)
    }

    pub async fn update_agent(
        &self,
        guard: &Guard,
        user_id: &str,
        agent_id: &str,
        patch: EntityPatch,
    ) -> StoreResult<(EntityHead, EntityVersion)> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = agent_workspace(&tx, agent_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;
        let result = versioned::update_draft(&tx, AGENT_KIND, agent_id, &patch)?;
        tx.commit()?;
        Ok(result)
    }

    pub async fn publish_agent(
        &self,
        guard: &Guard,
        user_id: &str,
        agent_id: &str,
    ) -> StoreResult<(EntityHead, i64)> {
        self.publish_agent_at(guard, user_id, agent_id, chrono::Utc::now().timestamp())
            .await
    }

    /// Publish a single agent (no cascade, unlike app publish).
    pub async fn publish_agent_at(
        &self,
        guard: &Guard,
        user_id: &str,
        agent_id: &str,
        now_secs: i64,
    ) -> StoreResult<(EntityHead, i64)> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = agent_workspace(&tx, agent_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;

        let version = versioned::next_version_number(&tx, AGENT_KIND, agent_id, now_secs)?;
        versioned::publish_one(&tx, AGENT_KIND, agent_id, version)?;
        let head = versioned::get_head(&tx, AGENT_KIND, agent_id)?;
        tx.commit()?;
        info!("Published agent {} as version {}", agent_id, version);
        Ok((head, version))
    }

    pub async fn delete_agent(
        &self,
        guard: &Guard,
        user_id: &str,
        agent_id: &str,
    ) -> StoreResult<()> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = agent_workspace(&tx, agent_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;
        versioned::delete_entity(&tx, AGENT_KIND, agent_id)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuotaLimits;
    use crate::core::store::test_store;
    use serde_json::json;

    fn guard() -> Guard {
        Guard::new(QuotaLimits::default())
    }

    async fn seed_agent(store: &Store) -> (Guard, String, String) {
        let g = guard();
        let ws = store.create_workspace(&g, "alice", "Team").await.unwrap();
        let (app, _) = store
            .create_app(
                &g,
                "alice",
                &ws.id,
                EntityFields {
                    kind: "multiple-agents".to_string(),
                    name: "Crew".to_string(),
                    metadata: json!({}),
                },
            )
            .await
            .unwrap();
        let (agent, _) = store
            .create_agent(
                &g,
                "alice",
                &app.id,
                EntityFields {
                    kind: "agent".to_string(),
                    name: "Scout".to_string(),
                    metadata: json!({"model": "haiku"}),
                },
            )
            .await
            .unwrap();
        (g, app.id, agent.id)
    }

    #[tokio::test]
    async fn agent_draft_isolation_mirrors_apps() {
        let store = test_store().await;
        let (g, _, agent_id) = seed_agent(&store).await;

        // Live-edit before first publish.
        let (head, draft) = store
            .update_agent(
                &g,
                "alice",
                &agent_id,
                EntityPatch {
                    name: None,
                    metadata: Some(json!({"model": "opus"})),
                },
            )
            .await
            .unwrap();
        assert_eq!(head.metadata["model"], "opus");
        assert_eq!(draft.metadata["model"], "opus");

        store.publish_agent(&g, "alice", &agent_id).await.unwrap();
        let (head, draft) = store
            .update_agent(
                &g,
                "alice",
                &agent_id,
                EntityPatch {
                    name: None,
                    metadata: Some(json!({"model": "sonnet"})),
                },
            )
            .await
            .unwrap();
        assert_eq!(head.metadata["model"], "opus");
        assert_eq!(draft.metadata["model"], "sonnet");
    }

    #[tokio::test]
    async fn agent_publish_is_monotonic() {
        let store = test_store().await;
        let (g, _, agent_id) = seed_agent(&store).await;
        let (_, v1) = store
            .publish_agent_at(&g, "alice", &agent_id, 1_000)
            .await
            .unwrap();
        let (_, v2) = store
            .publish_agent_at(&g, "alice", &agent_id, 1_000)
            .await
            .unwrap();
        assert!(v2 > v1);
    }

    #[tokio::test]
    async fn version_selector_resolves_each_form() {
        let store = test_store().await;
        let (g, _, agent_id) = seed_agent(&store).await;
        let (_, published) = store
            .publish_agent_at(&g, "alice", &agent_id, 5_000)
            .await
            .unwrap();

        let draft = store
            .get_agent_version(&g, "alice", &agent_id, &VersionSelector::Draft)
            .await
            .unwrap();
        assert_eq!(draft.version, versioned::DRAFT_VERSION);

        let latest = store
            .get_agent_version(&g, "alice", &agent_id, &VersionSelector::Latest)
            .await
            .unwrap();
        assert_eq!(latest.version, published);

        let exact = store
            .get_agent_version(&g, "alice", &agent_id, &VersionSelector::Number(published))
            .await
            .unwrap();
        assert_eq!(exact.version, published);

        let err = store
            .get_agent_version(&g, "alice", &agent_id, &VersionSelector::Number(999))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn non_member_cannot_touch_agents() {
        let store = test_store().await;
        let (g, _, agent_id) = seed_agent(&store).await;
        let err = store.get_agent(&g, "mallory", &agent_id).await.unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
        let err = store
            .publish_agent(&g, "mallory", &agent_id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Forbidden(_)));
    }

    #[tokio::test]
    async fn list_agents_paginates_by_id() {
        let store = test_store().await;
        let (g, app_id, _) = seed_agent(&store).await;
        for i in 0..4 {
            store
                .create_agent(
                    &g,
                    "alice",
                    &app_id,
                    EntityFields {
                        kind: "agent".to_string(),
                        name: format!("Extra {i}"),
                        metadata: json!({}),
                    },
                )
                .await
                .unwrap();
        }
        let page = store
            .list_agents(
                &g,
                "alice",
                &app_id,
                &PageRequest {
                    after: None,
                    before: None,
                    limit: Some(3),
                },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.has_more);

        let rest = store
            .list_agents(
                &g,
                "alice",
                &app_id,
                &PageRequest {
                    after: page.last.clone(),
                    before: None,
                    limit: Some(3),
                },
            )
            .await
            .unwrap();
        assert_eq!(rest.items.len(), 2);
        assert!(!rest.has_more);
    }
}
