use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{error, info};

use super::error::{StoreError, StoreResult};
use super::pagination::{Page, PagePlan, PageRequest};
use super::types::{AppPreview, CategoryPreview, EntityHead, EntityVersion};
use super::versioned::{
    self, EntityFields, EntityPatch, VersionSelector, APP_KIND, DRAFT_VERSION,
};
use super::Store;
use crate::core::guard::Guard;

pub const APP_KINDS: &[&str] = &["single-agent", "multiple-agents"];

/// Resolve an app to its owning workspace for membership checks.
pub(crate) fn app_workspace(conn: &Connection, app_id: &str) -> StoreResult<String> {
    conn.query_row(
        "SELECT parent_id FROM apps WHERE id = ?1",
        params![app_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or(StoreError::NotFound("app"))
}

/// Cascade-delete one app: child agents with their version chains, the app's
/// own version chain, label links, and chats. Runs inside the caller's
/// transaction.
pub(crate) fn delete_app_tx(conn: &Connection, app_id: &str) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM agent_versions WHERE agent_id IN (SELECT id FROM agents WHERE parent_id = ?1)",
        params![app_id],
    )?;
    conn.execute("DELETE FROM agents WHERE parent_id = ?1", params![app_id])?;

    let chat_ids: Vec<String> = {
        let mut stmt = conn.prepare("SELECT id FROM chats WHERE app_id = ?1")?;
        let rows = stmt.query_map(params![app_id], |row| row.get(0))?;
        rows.collect::<Result<_, _>>()?
    };
    for chat_id in &chat_ids {
        super::chat::delete_chat_tx(conn, chat_id)?;
    }

    conn.execute("DELETE FROM app_categories WHERE app_id = ?1", params![app_id])?;
    conn.execute("DELETE FROM app_tags WHERE app_id = ?1", params![app_id])?;
    versioned::delete_entity(conn, APP_KIND, app_id)?;
    Ok(())
}

/// Version number shared by an app publish and its cascaded agent snapshots:
/// wall-clock seconds, bumped past every existing version in the subtree so
/// the chain stays strictly increasing even across same-second publishes.
fn next_cascade_version(conn: &Connection, app_id: &str, now_secs: i64) -> StoreResult<i64> {
    let app_max = versioned::next_version_number(conn, APP_KIND, app_id, now_secs)?;
    let agent_max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM agent_versions \
         WHERE agent_id IN (SELECT id FROM agents WHERE parent_id = ?1)",
        params![app_id],
        |row| row.get(0),
    )?;
    Ok(app_max.max(agent_max + 1))
}

impl Store {
    pub async fn create_app(
        &self,
        guard: &Guard,
        user_id: &str,
        workspace_id: &str,
        fields: EntityFields,
    ) -> StoreResult<(EntityHead, EntityVersion)> {
        if !APP_KINDS.contains(&fields.kind.as_str()) {
            return Err(StoreError::bad_request(format!(
                "app type must be one of {APP_KINDS:?}"
            )));
        }

        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        guard.verify_membership(&tx, workspace_id, user_id)?;
        guard.check_app_quota(&tx, workspace_id)?;

        let id = uuid::Uuid::now_v7().to_string();
        versioned::insert_with_draft(&tx, APP_KIND, &id, workspace_id, &fields)?;
        let head = versioned::get_head(&tx, APP_KIND, &id)?;
        let draft = versioned::get_version(&tx, APP_KIND, &id, &VersionSelector::Draft)?;
        tx.commit()?;
        Ok((head, draft))
    }

    pub async fn list_apps(
        &self,
        guard: &Guard,
        user_id: &str,
        workspace_id: &str,
        req: &PageRequest,
    ) -> StoreResult<Page<EntityHead>> {
        let plan = PagePlan::from_request(req)?;
        let db = self.db();
        let db = db.lock().await;
        guard.verify_membership(&db, workspace_id, user_id)?;
        let rows = versioned::list_heads(&db, APP_KIND, workspace_id, &plan)?;
        Ok(plan.into_page(rows, |head| head.id.clone()))
    }

    pub async fn get_app(
        &self,
        guard: &Guard,
        user_id: &str,
        app_id: &str,
    ) -> StoreResult<EntityHead> {
        let db = self.db();
        let db = db.lock().await;
        let workspace_id = app_workspace(&db, app_id)?;
        guard.verify_membership(&db, &workspace_id, user_id)?;
        versioned::get_head(&db, APP_KIND, app_id)
    }

    pub async fn get_app_version(
        &self,
        guard: &Guard,
        user_id: &str,
        app_id: &str,
        selector: &VersionSelector,
    ) -> StoreResult<EntityVersion> {
        let db = self.db();
        let db = db.lock().await;
        let workspace_id = app_workspace(&db, app_id)?;
        guard.verify_membership(&db, &workspace_id, user_id)?;
        versioned::get_version(&db, APP_KIND, app_id, selector)
    }

    /// Patch the app draft. Head follows the draft only while the app has
    /// never been published.
    pub async fn update_app(
        &self,
        guard: &Guard,
        user_id: &str,
        app_id: &str,
        patch: EntityPatch,
    ) -> StoreResult<(EntityHead, EntityVersion)> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = app_workspace(&tx, app_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;
        let result = versioned::update_draft(&tx, APP_KIND, app_id, &patch)?;
        tx.commit()?;
        Ok(result)
    }

    pub async fn publish_app(
        &self,
        guard: &Guard,
        user_id: &str,
        app_id: &str,
    ) -> StoreResult<(EntityHead, i64)> {
        self.publish_app_at(guard, user_id, app_id, chrono::Utc::now().timestamp())
            .await
    }

    /// Publish with an explicit clock. Snapshots the app draft, then cascades
    /// to every child agent in the same transaction: one multi-row insert for
    /// the agent version snapshots and one id-keyed CASE update syncing all
    /// agent heads.
    pub async fn publish_app_at(
        &self,
        guard: &Guard,
        user_id: &str,
        app_id: &str,
        now_secs: i64,
    ) -> StoreResult<(EntityHead, i64)> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = app_workspace(&tx, app_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;

        let version = next_cascade_version(&tx, app_id, now_secs)?;
        versioned::publish_one(&tx, APP_KIND, app_id, version)?;

        // Every child agent must still have its draft; a missing one means
        // the creation invariant was broken and the publish must abort.
        let missing: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT a.id FROM agents a \
                 LEFT JOIN agent_versions v ON v.agent_id = a.id AND v.version = ?1 \
                 WHERE a.parent_id = ?2 AND v.agent_id IS NULL",
            )?;
            let rows = stmt.query_map(params![DRAFT_VERSION, app_id], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        if !missing.is_empty() {
            let fault = StoreError::Inconsistency(format!(
                "agents {missing:?} of app {app_id} have no draft version at publish time"
            ));
            error!("{fault}");
            return Err(fault);
        }

        tx.execute(
            "INSERT INTO agent_versions (agent_id, version, kind, name, metadata) \
             SELECT agent_id, ?1, kind, name, metadata FROM agent_versions \
             WHERE version = ?2 AND agent_id IN (SELECT id FROM agents WHERE parent_id = ?3)",
            params![version, DRAFT_VERSION, app_id],
        )?;

        sync_agent_heads_from_drafts(&tx, app_id)?;

        let head = versioned::get_head(&tx, APP_KIND, app_id)?;
        tx.commit()?;
        info!("Published app {} as version {}", app_id, version);
        Ok((head, version))
    }

    pub async fn delete_app(&self, guard: &Guard, user_id: &str, app_id: &str) -> StoreResult<()> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = app_workspace(&tx, app_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;
        delete_app_tx(&tx, app_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Replace-all label update; missing tags are created on the fly.
    pub async fn set_app_tags(
        &self,
        guard: &Guard,
        user_id: &str,
        app_id: &str,
        names: &[String],
    ) -> StoreResult<Vec<String>> {
        self.replace_labels(guard, user_id, app_id, names, "tags", "app_tags", "tag_id")
            .await
    }

    pub async fn set_app_categories(
        &self,
        guard: &Guard,
        user_id: &str,
        app_id: &str,
        names: &[String],
    ) -> StoreResult<Vec<String>> {
        self.replace_labels(
            guard,
            user_id,
            app_id,
            names,
            "categories",
            "app_categories",
            "category_id",
        )
        .await
    }

    async fn replace_labels(
        &self,
        guard: &Guard,
        user_id: &str,
        app_id: &str,
        names: &[String],
        label_table: &str,
        link_table: &str,
        link_column: &str,
    ) -> StoreResult<Vec<String>> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        let workspace_id = app_workspace(&tx, app_id)?;
        guard.verify_membership(&tx, &workspace_id, user_id)?;

        tx.execute(
            &format!("DELETE FROM {link_table} WHERE app_id = ?1"),
            params![app_id],
        )?;
        let mut applied = Vec::new();
        for name in names {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            tx.execute(
                &format!("INSERT OR IGNORE INTO {label_table} (id, name) VALUES (?1, ?2)"),
                params![uuid::Uuid::now_v7().to_string(), name],
            )?;
            let label_id: String = tx.query_row(
                &format!("SELECT id FROM {label_table} WHERE name = ?1"),
                params![name],
                |row| row.get(0),
            )?;
            tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO {link_table} (app_id, {link_column}) VALUES (?1, ?2)"
                ),
                params![app_id, label_id],
            )?;
            applied.push(name.to_string());
        }
        tx.commit()?;
        Ok(applied)
    }

    /// Categories with up to three newest apps each, via a window function
    /// over the link table.
    pub async fn list_categories_with_previews(&self) -> StoreResult<Vec<CategoryPreview>> {
        let db = self.db();
        let db = db.lock().await;
        let mut stmt = db.prepare(
            "SELECT c.id, c.name, ranked.app_id, ranked.app_name FROM categories c \
             LEFT JOIN ( \
                 SELECT ac.category_id, ap.id AS app_id, ap.name AS app_name, \
                        ROW_NUMBER() OVER (PARTITION BY ac.category_id ORDER BY ap.id DESC) AS rn \
                 FROM app_categories ac JOIN apps ap ON ap.id = ac.app_id \
             ) ranked ON ranked.category_id = c.id AND ranked.rn <= 3 \
             ORDER BY c.name ASC, ranked.app_id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut previews: Vec<CategoryPreview> = Vec::new();
        for row in rows {
            let (id, name, app_id, app_name) = row?;
            if previews.last().map(|p| p.id.as_str()) != Some(id.as_str()) {
                previews.push(CategoryPreview {
                    id,
                    name,
                    apps: Vec::new(),
                });
            }
            if let (Some(app_id), Some(app_name)) = (app_id, app_name) {
                previews
                    .last_mut()
                    .expect("category row just pushed")
                    .apps
                    .push(AppPreview {
                        id: app_id,
                        name: app_name,
                    });
            }
        }
        Ok(previews)
    }
}

/// Sync every child agent head to its draft with a single conditional update
/// keyed by agent id, rather than one statement per agent.
fn sync_agent_heads_from_drafts(conn: &Connection, app_id: &str) -> StoreResult<()> {
    let drafts: Vec<(String, String, String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT agent_id, kind, name, metadata FROM agent_versions \
             WHERE version = ?1 AND agent_id IN (SELECT id FROM agents WHERE parent_id = ?2)",
        )?;
        let rows = stmt.query_map(params![DRAFT_VERSION, app_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        rows.collect::<Result<_, _>>()?
    };
    if drafts.is_empty() {
        return Ok(());
    }

    const ARM: &str = " WHEN ? THEN ?";
    let mut kind_case = String::from("CASE id");
    let mut name_case = String::from("CASE id");
    let mut metadata_case = String::from("CASE id");
    for _ in &drafts {
        kind_case.push_str(ARM);
        name_case.push_str(ARM);
        metadata_case.push_str(ARM);
    }
    kind_case.push_str(" END");
    name_case.push_str(" END");
    metadata_case.push_str(" END");

    let placeholders = vec!["?"; drafts.len()].join(", ");
    let sql = format!(
        "UPDATE agents SET kind = {kind_case}, name = {name_case}, metadata = {metadata_case}, \
         updated_at = datetime('now') WHERE id IN ({placeholders})"
    );

    let mut binds: Vec<&str> = Vec::with_capacity(drafts.len() * 7);
    for (id, kind, _, _) in &drafts {
        binds.push(id);
        binds.push(kind);
    }
    for (id, _, name, _) in &drafts {
        binds.push(id);
        binds.push(name);
    }
    for (id, _, _, metadata) in &drafts {
        binds.push(id);
        binds.push(metadata);
    }
    for (id, _, _, _) in &drafts {
        binds.push(id);
    }
    conn.execute(&sql, params_from_iter(binds))?;
    Ok(())
}
