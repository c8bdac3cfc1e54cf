use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

use super::error::{StoreError, StoreResult};
use super::types::{MembershipRecord, Role, WorkspaceRecord};
use super::Store;
use crate::core::guard::Guard;

fn workspace_from_row(row: &Row<'_>) -> rusqlite::Result<WorkspaceRecord> {
    Ok(WorkspaceRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<MembershipRecord> {
    Ok(MembershipRecord {
        workspace_id: row.get(0)?,
        user_id: row.get(1)?,
        role: Role::from_db(&row.get::<_, String>(2)?),
        created_at: row.get(3)?,
    })
}

/// Insert a workspace together with its owner membership. Creation always
/// pairs the two so the owner-always-present invariant holds from the start.
fn insert_workspace(conn: &Connection, name: &str, owner_id: &str) -> StoreResult<WorkspaceRecord> {
    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO workspaces (id, name) VALUES (?1, ?2)",
        params![id, name],
    )?;
    conn.execute(
        "INSERT INTO memberships (workspace_id, user_id, role) VALUES (?1, ?2, 'owner')",
        params![id, owner_id],
    )?;
    conn.query_row(
        "SELECT id, name, created_at, updated_at FROM workspaces WHERE id = ?1",
        params![id],
        workspace_from_row,
    )
    .map_err(Into::into)
}

impl Store {
    /// List the caller's workspaces. A user with none gets a personal
    /// workspace created on the spot, atomically with its owner membership.
    pub async fn list_workspaces(&self, user_id: &str) -> StoreResult<Vec<WorkspaceRecord>> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;

        let mut workspaces = {
            let mut stmt = tx.prepare(
                "SELECT w.id, w.name, w.created_at, w.updated_at FROM workspaces w \
                 JOIN memberships m ON m.workspace_id = w.id \
                 WHERE m.user_id = ?1 ORDER BY w.id DESC",
            )?;
            let rows = stmt.query_map(params![user_id], workspace_from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        if workspaces.is_empty() {
            info!("Creating personal workspace for user {}", user_id);
            workspaces.push(insert_workspace(&tx, "Personal Workspace", user_id)?);
        }

        tx.commit()?;
        Ok(workspaces)
    }

    pub async fn create_workspace(
        &self,
        guard: &Guard,
        user_id: &str,
        name: &str,
    ) -> StoreResult<WorkspaceRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        guard.check_workspace_quota(&tx, user_id)?;
        let workspace = insert_workspace(&tx, name, user_id)?;
        tx.commit()?;
        Ok(workspace)
    }

    pub async fn get_workspace(
        &self,
        guard: &Guard,
        user_id: &str,
        workspace_id: &str,
    ) -> StoreResult<WorkspaceRecord> {
        let db = self.db();
        let db = db.lock().await;
        guard.verify_membership(&db, workspace_id, user_id)?;
        db.query_row(
            "SELECT id, name, created_at, updated_at FROM workspaces WHERE id = ?1",
            params![workspace_id],
            workspace_from_row,
        )
        .optional()?
        .ok_or(StoreError::NotFound("workspace"))
    }

    pub async fn rename_workspace(
        &self,
        guard: &Guard,
        user_id: &str,
        workspace_id: &str,
        name: &str,
    ) -> StoreResult<WorkspaceRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        guard.verify_ownership(&tx, workspace_id, user_id)?;
        let rows = tx.execute(
            "UPDATE workspaces SET name = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![name, workspace_id],
        )?;
        if rows == 0 {
            return Err(StoreError::NotFound("workspace"));
        }
        let workspace = tx.query_row(
            "SELECT id, name, created_at, updated_at FROM workspaces WHERE id = ?1",
            params![workspace_id],
            workspace_from_row,
        )?;
        tx.commit()?;
        Ok(workspace)
    }

    /// Remove the workspace and everything under it: apps (with their agent
    /// and version chains and label links), datasets (with documents,
    /// segments, chunks), memberships, and the workspace row itself.
    pub async fn delete_workspace(
        &self,
        guard: &Guard,
        user_id: &str,
        workspace_id: &str,
    ) -> StoreResult<()> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        guard.verify_ownership(&tx, workspace_id, user_id)?;

        let app_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM apps WHERE parent_id = ?1")?;
            let rows = stmt.query_map(params![workspace_id], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for app_id in &app_ids {
            super::app::delete_app_tx(&tx, app_id)?;
        }

        let dataset_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM datasets WHERE workspace_id = ?1")?;
            let rows = stmt.query_map(params![workspace_id], |row| row.get(0))?;
            rows.collect::<Result<_, _>>()?
        };
        for dataset_id in &dataset_ids {
            super::dataset::delete_dataset_tx(&tx, dataset_id)?;
        }

        tx.execute(
            "DELETE FROM memberships WHERE workspace_id = ?1",
            params![workspace_id],
        )?;
        let rows = tx.execute("DELETE FROM workspaces WHERE id = ?1", params![workspace_id])?;
        if rows == 0 {
            return Err(StoreError::NotFound("workspace"));
        }
        tx.commit()?;
        info!("Deleted workspace {} ({} apps)", workspace_id, app_ids.len());
        Ok(())
    }

    pub async fn list_members(
        &self,
        guard: &Guard,
        user_id: &str,
        workspace_id: &str,
    ) -> StoreResult<Vec<MembershipRecord>> {
        let db = self.db();
        let db = db.lock().await;
        guard.verify_membership(&db, workspace_id, user_id)?;
        let mut stmt = db.prepare(
            "SELECT workspace_id, user_id, role, created_at FROM memberships \
             WHERE workspace_id = ?1 ORDER BY created_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![workspace_id], membership_from_row)?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    pub async fn add_member(
        &self,
        guard: &Guard,
        caller_id: &str,
        workspace_id: &str,
        new_user_id: &str,
    ) -> StoreResult<MembershipRecord> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        guard.verify_ownership(&tx, workspace_id, caller_id)?;
        guard.check_member_quota(&tx, workspace_id)?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT user_id FROM memberships WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace_id, new_user_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::bad_request("user is already a member"));
        }

        tx.execute(
            "INSERT INTO memberships (workspace_id, user_id, role) VALUES (?1, ?2, 'member')",
            params![workspace_id, new_user_id],
        )?;
        let membership = tx.query_row(
            "SELECT workspace_id, user_id, role, created_at FROM memberships \
             WHERE workspace_id = ?1 AND user_id = ?2",
            params![workspace_id, new_user_id],
            membership_from_row,
        )?;
        tx.commit()?;
        Ok(membership)
    }

    pub async fn remove_member(
        &self,
        guard: &Guard,
        caller_id: &str,
        workspace_id: &str,
        target_user_id: &str,
    ) -> StoreResult<()> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        guard.verify_ownership(&tx, workspace_id, caller_id)?;

        let role: Option<String> = tx
            .query_row(
                "SELECT role FROM memberships WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace_id, target_user_id],
                |row| row.get(0),
            )
            .optional()?;
        match role.as_deref() {
            None => return Err(StoreError::NotFound("membership")),
            Some("owner") => {
                return Err(StoreError::bad_request(
                    "the owner cannot be removed; transfer ownership first",
                ));
            }
            Some(_) => {}
        }

        tx.execute(
            "DELETE FROM memberships WHERE workspace_id = ?1 AND user_id = ?2",
            params![workspace_id, target_user_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Transfer ownership to an existing member. The workspace ends with
    /// exactly one owner; the previous owner is demoted to member in the same
    /// transaction. A non-member target is NotFound, not Forbidden.
    pub async fn transfer_owner(
        &self,
        guard: &Guard,
        caller_id: &str,
        workspace_id: &str,
        target_user_id: &str,
    ) -> StoreResult<()> {
        let db = self.db();
        let mut db = db.lock().await;
        let tx = db.transaction()?;
        guard.verify_ownership(&tx, workspace_id, caller_id)?;

        if caller_id == target_user_id {
            return Err(StoreError::bad_request("caller already owns this workspace"));
        }

        let target: Option<String> = tx
            .query_row(
                "SELECT user_id FROM memberships WHERE workspace_id = ?1 AND user_id = ?2",
                params![workspace_id, target_user_id],
                |row| row.get(0),
            )
            .optional()?;
        if target.is_none() {
            return Err(StoreError::NotFound("membership"));
        }

        tx.execute(
            "UPDATE memberships SET role = 'member' WHERE workspace_id = ?1 AND user_id = ?2",
            params![workspace_id, caller_id],
        )?;
        tx.execute(
            "UPDATE memberships SET role = 'owner' WHERE workspace_id = ?1 AND user_id = ?2",
            params![workspace_id, target_user_id],
        )?;
        tx.commit()?;
        info!(
            "Workspace {} ownership transferred {} -> {}",
            workspace_id, caller_id, target_user_id
        );
        Ok(())
    }
}
