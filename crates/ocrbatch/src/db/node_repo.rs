//! Node repository — the tracked filesystem tree in the `nodes` table.
//!
//! Paths are stored relative to the document root in normalized POSIX
//! form: `/`-separated, no leading `./` or `/`, no trailing `/`, no empty,
//! `.` or `..` segments, no backslashes.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::{record_repo, timestamp, Database, DatabaseError};

pub type NodeId = i64;

/// A raw node row from the database.
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: Option<i64>,
    pub mtime: Option<String>,
    pub checksum: Option<String>,
    pub mime: Option<String>,
    pub extra: Option<String>,
    pub tree_index: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl NodeRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            parent_id: row.get("parent_id")?,
            name: row.get("name")?,
            path: row.get("path")?,
            is_dir: row.get("is_dir")?,
            size: row.get("size")?,
            mtime: row.get("mtime")?,
            checksum: row.get("checksum")?,
            mime: row.get("mime")?,
            extra: row.get("extra")?,
            tree_index: row.get("tree_index")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Observed attributes of a file on disk.
#[derive(Debug, Clone)]
pub struct FileAttrs {
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    /// Hex-encoded SHA-256 of the file content.
    pub checksum: String,
    pub mime: Option<String>,
    pub extra: serde_json::Value,
}

/// What an upsert did to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeChange {
    Created,
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub node_id: NodeId,
    pub change: NodeChange,
}

/// Rejects paths that are not in normalized relative form.
pub fn validate_relative_path(path: &str) -> Result<(), DatabaseError> {
    let invalid = |reason| DatabaseError::InvalidPath {
        path: path.to_string(),
        reason,
    };
    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.contains('\\') {
        return Err(invalid("contains a backslash"));
    }
    if path.starts_with("./") {
        return Err(invalid("starts with './'"));
    }
    if path.starts_with('/') {
        return Err(invalid("is absolute"));
    }
    if path.ends_with('/') {
        return Err(invalid("ends with '/'"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("contains an empty segment")),
            "." | ".." => return Err(invalid("contains a '.' or '..' segment")),
            _ => {}
        }
    }
    Ok(())
}

/// Returns the directory part of a normalized relative path, if any.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind('/').map(|i| &path[..i])
}

/// Returns the last segment of a normalized relative path.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Finds a node by its relative path.
pub fn find_by_path(db: &Database, path: &str) -> Result<Option<NodeRow>, DatabaseError> {
    db.with_conn(|conn| find_by_path_in(conn, path))
}

/// Finds a node by its ID.
pub fn find_by_id(db: &Database, id: NodeId) -> Result<Option<NodeRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row("SELECT * FROM nodes WHERE id = ?1", params![id], NodeRow::from_row)
            .optional()?)
    })
}

fn find_by_path_in(conn: &Connection, path: &str) -> Result<Option<NodeRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM nodes WHERE path = ?1",
            params![path],
            NodeRow::from_row,
        )
        .optional()?)
}

/// Counts all nodes, directories included.
pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |r| r.get(0))?;
        Ok(n.max(0) as u64)
    })
}

/// Ensures a directory node exists for `rel_dir` and every ancestor.
/// Returns the id of the deepest directory. Idempotent.
pub fn ensure_directory_chain(
    db: &Database,
    rel_dir: &str,
    now: DateTime<Utc>,
) -> Result<NodeId, DatabaseError> {
    validate_relative_path(rel_dir)?;
    db.with_transaction(|tx| ensure_directory_chain_in(tx, rel_dir, now))
}

pub(crate) fn ensure_directory_chain_in(
    conn: &Connection,
    rel_dir: &str,
    now: DateTime<Utc>,
) -> Result<NodeId, DatabaseError> {
    let mut parent_id = None;
    let mut end = 0;
    let mut id = None;
    for segment in rel_dir.split('/') {
        end += segment.len();
        let prefix = &rel_dir[..end];
        let dir_id = insert_directory_if_absent(conn, prefix, segment, parent_id, now)?;
        parent_id = Some(dir_id);
        id = Some(dir_id);
        end += 1;
    }
    id.ok_or_else(|| DatabaseError::InvalidPath {
        path: rel_dir.to_string(),
        reason: "empty path",
    })
}

/// Reads the directory node at `path`, inserting it when absent. A unique
/// violation means another writer inserted it first, so the read is
/// retried once.
fn insert_directory_if_absent(
    conn: &Connection,
    path: &str,
    name: &str,
    parent_id: Option<NodeId>,
    now: DateTime<Utc>,
) -> Result<NodeId, DatabaseError> {
    let now = timestamp(now);
    for attempt in 0..2 {
        let existing: Option<(NodeId, bool)> = conn
            .query_row(
                "SELECT id, is_dir FROM nodes WHERE path = ?1",
                params![path],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        match existing {
            Some((id, true)) => return Ok(id),
            Some((_, false)) => return Err(DatabaseError::NotADirectory(path.to_string())),
            None => {}
        }

        let inserted = conn.execute(
            "INSERT INTO nodes (parent_id, name, path, is_dir, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)",
            params![parent_id, name, path, now],
        );
        match inserted {
            Ok(_) => return Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation && attempt == 0 =>
            {
                log::debug!("Directory node '{}' inserted concurrently, re-reading", path);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(DatabaseError::NotFound(format!("directory node '{}'", path)))
}

/// Creates or updates a file node.
///
/// An existing node whose checksum matches is left untouched. A mismatch
/// updates size, mtime, checksum, MIME type and `updated_at`.
pub fn upsert_node(
    db: &Database,
    rel_path: &str,
    parent_id: Option<NodeId>,
    attrs: &FileAttrs,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome, DatabaseError> {
    validate_relative_path(rel_path)?;
    db.with_transaction(|tx| upsert_node_in(tx, rel_path, parent_id, attrs, now))
}

/// Upserts a document node together with its processing record.
///
/// New nodes get a `pending` record and nodes whose content changed have
/// their record reset to `pending`. Unchanged nodes keep their record.
pub fn upsert_document(
    db: &Database,
    rel_path: &str,
    parent_id: Option<NodeId>,
    attrs: &FileAttrs,
    pages: Option<u32>,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome, DatabaseError> {
    validate_relative_path(rel_path)?;
    db.with_transaction(|tx| {
        let outcome = upsert_node_in(tx, rel_path, parent_id, attrs, now)?;
        match outcome.change {
            // An unchanged node keeps its record; one is only added if missing.
            NodeChange::Created | NodeChange::Unchanged => {
                record_repo::create_pending_in(tx, outcome.node_id, pages, now)?
            }
            NodeChange::Changed => {
                record_repo::reset_for_changed_content_in(tx, outcome.node_id, pages, now)?
            }
        }
        Ok(outcome)
    })
}

fn upsert_node_in(
    conn: &Connection,
    rel_path: &str,
    parent_id: Option<NodeId>,
    attrs: &FileAttrs,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome, DatabaseError> {
    check_parent(conn, rel_path, parent_id)?;

    let now = timestamp(now);
    let mtime = attrs.mtime.map(timestamp);
    let size = i64::try_from(attrs.size).unwrap_or(i64::MAX);

    if let Some(existing) = find_by_path_in(conn, rel_path)? {
        if existing.is_dir {
            return Err(DatabaseError::InvalidPath {
                path: rel_path.to_string(),
                reason: "already cataloged as a directory",
            });
        }
        if existing.checksum.as_deref() == Some(attrs.checksum.as_str()) {
            return Ok(UpsertOutcome {
                node_id: existing.id,
                change: NodeChange::Unchanged,
            });
        }
        conn.execute(
            "UPDATE nodes SET size = ?2, mtime = ?3, checksum = ?4, mime = ?5, updated_at = ?6
             WHERE id = ?1",
            params![existing.id, size, mtime, attrs.checksum, attrs.mime, now],
        )?;
        return Ok(UpsertOutcome {
            node_id: existing.id,
            change: NodeChange::Changed,
        });
    }

    conn.execute(
        "INSERT INTO nodes (parent_id, name, path, is_dir, size, mtime, checksum, mime, extra,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, 0, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            parent_id,
            base_name(rel_path),
            rel_path,
            size,
            mtime,
            attrs.checksum,
            attrs.mime,
            attrs.extra.to_string(),
            now,
        ],
    )?;
    Ok(UpsertOutcome {
        node_id: conn.last_insert_rowid(),
        change: NodeChange::Created,
    })
}

/// A nested path needs the directory node for its parent path; a root-level
/// path must have no parent.
fn check_parent(
    conn: &Connection,
    rel_path: &str,
    parent_id: Option<NodeId>,
) -> Result<(), DatabaseError> {
    match (parent_path(rel_path), parent_id) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(DatabaseError::InvalidPath {
            path: rel_path.to_string(),
            reason: "root-level path cannot have a parent",
        }),
        (Some(_), None) => Err(DatabaseError::InvalidPath {
            path: rel_path.to_string(),
            reason: "nested path requires a parent directory",
        }),
        (Some(expected), Some(id)) => {
            let parent: Option<(String, bool)> = conn
                .query_row(
                    "SELECT path, is_dir FROM nodes WHERE id = ?1",
                    params![id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            match parent {
                None => Err(DatabaseError::NotFound(format!("parent node {}", id))),
                Some((path, false)) => Err(DatabaseError::NotADirectory(path)),
                Some((path, true)) if path != expected => Err(DatabaseError::InvalidPath {
                    path: rel_path.to_string(),
                    reason: "parent node does not match the path",
                }),
                Some(_) => Ok(()),
            }
        }
    }
}

/// Reassigns `tree_index` to every node in ascending path order, starting
/// at 1. Only one reindex may run at a time. Returns the number of nodes.
pub fn reindex(db: &Database) -> Result<usize, DatabaseError> {
    let _guard = db.begin_reindex()?;
    let count = db.with_transaction(|tx| {
        let ids: Vec<NodeId> = {
            let mut stmt = tx.prepare("SELECT id FROM nodes ORDER BY path ASC")?;
            let rows = stmt.query_map([], |r| r.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        let mut update = tx.prepare("UPDATE nodes SET tree_index = ?1 WHERE id = ?2")?;
        for (idx, id) in ids.iter().enumerate() {
            update.execute(params![idx as i64 + 1, id])?;
        }
        Ok(ids.len())
    })?;
    log::info!("Reindexed {} nodes", count);
    Ok(count)
}

/// Links orphaned file nodes (nested path, null parent) to their directory
/// chain, creating missing directory nodes. Returns the number repaired.
pub fn repair_parent_links(db: &Database, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
    db.with_transaction(|tx| {
        let orphans: Vec<(NodeId, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, path FROM nodes
                 WHERE parent_id IS NULL AND instr(path, '/') > 0
                 ORDER BY path ASC",
            )?;
            let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut repaired = 0;
        for (id, path) in orphans {
            let Some(dir) = parent_path(&path) else {
                continue;
            };
            let parent_id = ensure_directory_chain_in(tx, dir, now)?;
            tx.execute(
                "UPDATE nodes SET parent_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, parent_id, timestamp(now)],
            )?;
            repaired += 1;
        }
        Ok(repaired)
    })
}
