use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::error::{StoreError, StoreResult};
use super::types::{EntityHead, EntityVersion};

/// Reserved version number for the always-present editable draft row. Sorts
/// below any real published version, which are second-resolution timestamps.
pub const DRAFT_VERSION: i64 = 0;

/// Table bindings for one instance of the draft/publish engine. Apps and
/// agents share the same structure; only the tables differ.
#[derive(Debug, Clone, Copy)]
pub struct VersionedKind {
    pub label: &'static str,
    pub head_table: &'static str,
    pub version_table: &'static str,
    pub fk_column: &'static str,
}

pub const APP_KIND: VersionedKind = VersionedKind {
    label: "app",
    head_table: "apps",
    version_table: "app_versions",
    fk_column: "app_id",
};

pub const AGENT_KIND: VersionedKind = VersionedKind {
    label: "agent",
    head_table: "agents",
    version_table: "agent_versions",
    fk_column: "agent_id",
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Draft,
    Latest,
    Number(i64),
}

impl VersionSelector {
    pub fn parse(raw: &str) -> StoreResult<Self> {
        match raw {
            "draft" => Ok(VersionSelector::Draft),
            "latest" => Ok(VersionSelector::Latest),
            other => other
                .parse::<i64>()
                .ok()
                .filter(|v| *v > DRAFT_VERSION)
                .map(VersionSelector::Number)
                .ok_or_else(|| {
                    StoreError::bad_request(format!(
                        "version selector must be 'draft', 'latest', or a published version number, got '{other}'"
                    ))
                }),
        }
    }
}

/// Whether an entity has ever been published. Kept as an explicit state so
/// the "update head only while unpublished" rule is visible in code rather
/// than hidden in a null-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    DraftOnly,
    Published,
}

#[derive(Debug, Clone)]
pub struct EntityFields {
    pub kind: String,
    pub name: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    pub name: Option<String>,
    pub metadata: Option<Value>,
}

pub(crate) fn decode_metadata(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or_else(|_| Value::Object(Default::default()))
}

fn head_from_row(row: &Row<'_>) -> rusqlite::Result<EntityHead> {
    Ok(EntityHead {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        kind: row.get(2)?,
        name: row.get(3)?,
        metadata: decode_metadata(row.get(4)?),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<EntityVersion> {
    Ok(EntityVersion {
        entity_id: row.get(0)?,
        version: row.get(1)?,
        kind: row.get(2)?,
        name: row.get(3)?,
        metadata: decode_metadata(row.get(4)?),
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Insert head and draft rows for a new entity. Must run inside the caller's
/// transaction so the exactly-one-draft invariant holds from birth.
pub fn insert_with_draft(
    conn: &Connection,
    k: VersionedKind,
    id: &str,
    parent_id: &str,
    fields: &EntityFields,
) -> StoreResult<()> {
    let metadata = fields.metadata.to_string();
    conn.execute(
        &format!(
            "INSERT INTO {} (id, parent_id, kind, name, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
            k.head_table
        ),
        params![id, parent_id, fields.kind, fields.name, metadata],
    )?;
    conn.execute(
        &format!(
            "INSERT INTO {} ({}, version, kind, name, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
            k.version_table, k.fk_column
        ),
        params![id, DRAFT_VERSION, fields.kind, fields.name, metadata],
    )?;
    Ok(())
}

pub fn get_head(conn: &Connection, k: VersionedKind, id: &str) -> StoreResult<EntityHead> {
    conn.query_row(
        &format!(
            "SELECT id, parent_id, kind, name, metadata, created_at, updated_at \
             FROM {} WHERE id = ?1",
            k.head_table
        ),
        params![id],
        head_from_row,
    )
    .optional()?
    .ok_or(StoreError::NotFound(k.label))
}

/// Fetch one keyset page of head rows for a parent, per the supplied plan.
pub fn list_heads(
    conn: &Connection,
    k: VersionedKind,
    parent_id: &str,
    plan: &super::pagination::PagePlan,
) -> StoreResult<Vec<EntityHead>> {
    let sql = format!(
        "SELECT id, parent_id, kind, name, metadata, created_at, updated_at \
         FROM {table} WHERE parent_id = ?1{filter} ORDER BY id {order} LIMIT {limit}",
        table = k.head_table,
        filter = plan.cursor_filter("id"),
        order = plan.order_sql(),
        limit = plan.fetch_limit(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut out = Vec::new();
    if let Some(bound) = plan.bound() {
        let rows = stmt.query_map(params![parent_id, bound], head_from_row)?;
        for row in rows {
            out.push(row?);
        }
    } else {
        let rows = stmt.query_map(params![parent_id], head_from_row)?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

pub fn get_version(
    conn: &Connection,
    k: VersionedKind,
    id: &str,
    selector: &VersionSelector,
) -> StoreResult<EntityVersion> {
    let base = format!(
        "SELECT {fk}, version, kind, name, metadata, created_at, updated_at FROM {table}",
        fk = k.fk_column,
        table = k.version_table
    );
    let row = match selector {
        VersionSelector::Draft => conn
            .query_row(
                &format!("{base} WHERE {} = ?1 AND version = ?2", k.fk_column),
                params![id, DRAFT_VERSION],
                version_from_row,
            )
            .optional()?,
        VersionSelector::Latest => conn
            .query_row(
                &format!(
                    "{base} WHERE {fk} = ?1 AND version > ?2 ORDER BY version DESC LIMIT 1",
                    fk = k.fk_column
                ),
                params![id, DRAFT_VERSION],
                version_from_row,
            )
            .optional()?,
        VersionSelector::Number(n) => conn
            .query_row(
                &format!("{base} WHERE {} = ?1 AND version = ?2", k.fk_column),
                params![id, n],
                version_from_row,
            )
            .optional()?,
    };
    row.ok_or(StoreError::NotFound(k.label))
}

pub fn publish_state(conn: &Connection, k: VersionedKind, id: &str) -> StoreResult<PublishState> {
    let published: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?1 AND version > ?2",
            k.version_table, k.fk_column
        ),
        params![id, DRAFT_VERSION],
        |row| row.get(0),
    )?;
    Ok(if published > 0 {
        PublishState::Published
    } else {
        PublishState::DraftOnly
    })
}

/// Shallow metadata merge: keys present in the patch overwrite, keys absent
/// are preserved, and explicit nulls in the patch are dropped rather than
/// written through.
pub fn merge_metadata(existing: &Value, patch: &Value) -> Value {
    let (Some(base), Some(delta)) = (existing.as_object(), patch.as_object()) else {
        return patch.clone();
    };
    let mut merged = base.clone();
    for (key, value) in delta {
        if value.is_null() {
            continue;
        }
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}

/// Apply a patch to the draft row. While the entity is `DraftOnly` the head
/// row is synced to the same merged fields (live-edit behavior before the
/// first publish).
pub fn update_draft(
    conn: &Connection,
    k: VersionedKind,
    id: &str,
    patch: &EntityPatch,
) -> StoreResult<(EntityHead, EntityVersion)> {
    let draft = get_version(conn, k, id, &VersionSelector::Draft)?;
    let name = patch.name.clone().unwrap_or(draft.name);
    let metadata = match &patch.metadata {
        Some(delta) => merge_metadata(&draft.metadata, delta),
        None => draft.metadata,
    };
    let metadata_raw = metadata.to_string();

    conn.execute(
        &format!(
            "UPDATE {} SET name = ?1, metadata = ?2, updated_at = datetime('now') \
             WHERE {} = ?3 AND version = ?4",
            k.version_table, k.fk_column
        ),
        params![name, metadata_raw, id, DRAFT_VERSION],
    )?;

    if publish_state(conn, k, id)? == PublishState::DraftOnly {
        conn.execute(
            &format!(
                "UPDATE {} SET name = ?1, metadata = ?2, updated_at = datetime('now') WHERE id = ?3",
                k.head_table
            ),
            params![name, metadata_raw, id],
        )?;
    }

    Ok((
        get_head(conn, k, id)?,
        get_version(conn, k, id, &VersionSelector::Draft)?,
    ))
}

/// Pick the next published version number. Wall-clock seconds, bumped past
/// the last published version so repeated publishes within one second (or a
/// clock regression) still yield a strictly increasing chain.
pub fn next_version_number(
    conn: &Connection,
    k: VersionedKind,
    id: &str,
    now_secs: i64,
) -> StoreResult<i64> {
    let max_published: i64 = conn.query_row(
        &format!(
            "SELECT COALESCE(MAX(version), 0) FROM {} WHERE {} = ?1",
            k.version_table, k.fk_column
        ),
        params![id],
        |row| row.get(0),
    )?;
    Ok(now_secs.max(max_published + 1))
}

/// Snapshot the draft into an immutable published row and sync the head to
/// the same content. The draft must exist; its absence means the creation
/// invariant was broken somewhere upstream.
pub fn publish_one(
    conn: &Connection,
    k: VersionedKind,
    id: &str,
    version: i64,
) -> StoreResult<EntityVersion> {
    let draft = match get_version(conn, k, id, &VersionSelector::Draft) {
        Ok(draft) => draft,
        Err(StoreError::NotFound(_)) => {
            return Err(StoreError::Inconsistency(format!(
                "{} {} has no draft version at publish time",
                k.label, id
            )));
        }
        Err(e) => return Err(e),
    };

    let metadata_raw = draft.metadata.to_string();
    conn.execute(
        &format!(
            "INSERT INTO {} ({}, version, kind, name, metadata) VALUES (?1, ?2, ?3, ?4, ?5)",
            k.version_table, k.fk_column
        ),
        params![id, version, draft.kind, draft.name, metadata_raw],
    )?;
    conn.execute(
        &format!(
            "UPDATE {} SET kind = ?1, name = ?2, metadata = ?3, updated_at = datetime('now') \
             WHERE id = ?4",
            k.head_table
        ),
        params![draft.kind, draft.name, metadata_raw, id],
    )?;

    get_version(conn, k, id, &VersionSelector::Number(version))
}

/// Delete the version chain and head row. Association rows (labels, children)
/// are the caller's responsibility, inside the same transaction.
pub fn delete_entity(conn: &Connection, k: VersionedKind, id: &str) -> StoreResult<()> {
    conn.execute(
        &format!("DELETE FROM {} WHERE {} = ?1", k.version_table, k.fk_column),
        params![id],
    )?;
    let rows = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", k.head_table),
        params![id],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound(k.label));
    }
    Ok(())
}
