use rusqlite::{params, Connection, OptionalExtension};

use crate::config::QuotaLimits;
use crate::core::store::error::{StoreError, StoreResult};
use crate::core::store::types::{MembershipRecord, Role};

/// Membership/ownership/quota checks gating every mutation. Read-only; the
/// store runs these inside the same transaction as the write they protect so
/// a revoked membership cannot slip in between check and write.
#[derive(Debug, Clone)]
pub struct Guard {
    limits: QuotaLimits,
}

impl Guard {
    pub fn new(limits: QuotaLimits) -> Self {
        Self { limits }
    }

    /// Fails with Forbidden unless the user belongs to the workspace.
    pub fn verify_membership(
        &self,
        conn: &Connection,
        workspace_id: &str,
        user_id: &str,
    ) -> StoreResult<MembershipRecord> {
        conn.query_row(
            "SELECT workspace_id, user_id, role, created_at FROM memberships \
             WHERE workspace_id = ?1 AND user_id = ?2",
            params![workspace_id, user_id],
            |row| {
                Ok(MembershipRecord {
                    workspace_id: row.get(0)?,
                    user_id: row.get(1)?,
                    role: Role::from_db(&row.get::<_, String>(2)?),
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| StoreError::forbidden("caller is not a member of this workspace"))
    }

    /// Fails with Forbidden unless the user is the workspace owner.
    pub fn verify_ownership(
        &self,
        conn: &Connection,
        workspace_id: &str,
        user_id: &str,
    ) -> StoreResult<MembershipRecord> {
        let membership = self.verify_membership(conn, workspace_id, user_id)?;
        if membership.role != Role::Owner {
            return Err(StoreError::forbidden(
                "caller is not the owner of this workspace",
            ));
        }
        Ok(membership)
    }

    /// Check-then-act inside the caller's transaction; best-effort under
    /// concurrent creation (accepted race, not a distributed limiter).
    pub fn check_workspace_quota(&self, conn: &Connection, user_id: &str) -> StoreResult<()> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memberships WHERE user_id = ?1 AND role = 'owner'",
            params![user_id],
            |row| row.get(0),
        )?;
        if count >= self.limits.max_workspaces_per_user {
            return Err(StoreError::forbidden(format!(
                "workspace limit reached ({} per user)",
                self.limits.max_workspaces_per_user
            )));
        }
        Ok(())
    }

    pub fn check_member_quota(&self, conn: &Connection, workspace_id: &str) -> StoreResult<()> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memberships WHERE workspace_id = ?1",
            params![workspace_id],
            |row| row.get(0),
        )?;
        if count >= self.limits.max_members_per_workspace {
            return Err(StoreError::forbidden(format!(
                "member limit reached ({} per workspace)",
                self.limits.max_members_per_workspace
            )));
        }
        Ok(())
    }

    pub fn check_app_quota(&self, conn: &Connection, workspace_id: &str) -> StoreResult<()> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM apps WHERE parent_id = ?1",
            params![workspace_id],
            |row| row.get(0),
        )?;
        if count >= self.limits.max_apps_per_workspace {
            return Err(StoreError::forbidden(format!(
                "app limit reached ({} per workspace)",
                self.limits.max_apps_per_workspace
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE memberships (
                workspace_id TEXT NOT NULL, user_id TEXT NOT NULL,
                role TEXT NOT NULL, created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (workspace_id, user_id)
            );
            CREATE TABLE apps (id TEXT PRIMARY KEY, parent_id TEXT NOT NULL);",
        )
        .unwrap();
        conn
    }

    fn guard_with(max_workspaces: i64, max_members: i64, max_apps: i64) -> Guard {
        Guard::new(QuotaLimits {
            max_workspaces_per_user: max_workspaces,
            max_members_per_workspace: max_members,
            max_apps_per_workspace: max_apps,
        })
    }

    #[test]
    fn membership_check_fails_for_outsiders() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO memberships (workspace_id, user_id, role) VALUES ('w1', 'alice', 'owner')",
            [],
        )
        .unwrap();
        let guard = guard_with(5, 5, 5);

        let member = guard.verify_membership(&conn, "w1", "alice").unwrap();
        assert_eq!(member.role, Role::Owner);
        assert!(matches!(
            guard.verify_membership(&conn, "w1", "mallory"),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn ownership_check_rejects_plain_members() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO memberships (workspace_id, user_id, role) VALUES ('w1', 'bob', 'member')",
            [],
        )
        .unwrap();
        let guard = guard_with(5, 5, 5);
        assert!(matches!(
            guard.verify_ownership(&conn, "w1", "bob"),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn quota_messages_name_the_limit() {
        let conn = test_conn();
        conn.execute(
            "INSERT INTO memberships (workspace_id, user_id, role) VALUES ('w1', 'alice', 'owner')",
            [],
        )
        .unwrap();
        let guard = guard_with(1, 5, 5);
        let err = guard.check_workspace_quota(&conn, "alice").unwrap_err();
        assert!(err.to_string().contains("1 per user"));
    }

    #[test]
    fn app_quota_counts_per_workspace() {
        let conn = test_conn();
        conn.execute("INSERT INTO apps (id, parent_id) VALUES ('a1', 'w1')", [])
            .unwrap();
        let guard = guard_with(5, 5, 1);
        assert!(guard.check_app_quota(&conn, "w2").is_ok());
        assert!(guard.check_app_quota(&conn, "w1").is_err());
    }
}
