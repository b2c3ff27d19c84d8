//! Row access for document snapshots and the update log.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::crdt::DocState;

/// One `document_snapshots` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub document_id: String,
    pub state: Vec<u8>,
    pub version_vector: Vec<u8>,
    pub applied_sequence: i64,
    pub content_updated_at_us: i64,
}

/// One `document_updates` row, payload still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRow {
    pub sequence: i64,
    pub payload: Vec<u8>,
}

/// One `document_content_history` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHistoryRow {
    pub fingerprint: Vec<u8>,
    pub recorded_at_us: i64,
}

/// Create the snapshot row for a brand-new, empty document.
///
/// # Errors
///
/// Returns an error if the row already exists or the insert fails.
pub fn create_document(conn: &Connection, document_id: &str, now_us: i64) -> Result<()> {
    let doc = DocState::new();
    conn.execute(
        "INSERT INTO document_snapshots
           (document_id, state, version_vector, applied_sequence, content_updated_at_us)
         VALUES (?1, ?2, ?3, 0, ?4)",
        params![document_id, doc.encode()?, doc.encode_version_vector()?, now_us],
    )
    .with_context(|| format!("create snapshot row for document {document_id}"))?;
    Ok(())
}

/// Load a document's snapshot row, if it exists.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn load_snapshot(conn: &Connection, document_id: &str) -> Result<Option<SnapshotRow>> {
    conn.query_row(
        "SELECT document_id, state, version_vector, applied_sequence, content_updated_at_us
         FROM document_snapshots WHERE document_id = ?1",
        params![document_id],
        |row| {
            Ok(SnapshotRow {
                document_id: row.get(0)?,
                state: row.get(1)?,
                version_vector: row.get(2)?,
                applied_sequence: row.get(3)?,
                content_updated_at_us: row.get(4)?,
            })
        },
    )
    .optional()
    .with_context(|| format!("load snapshot row for document {document_id}"))
}

/// Fetch log rows newer than `after_sequence`, newest first.
///
/// The order is irrelevant to correctness — the merge is commutative —
/// but a fixed order keeps behavior reproducible.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn updates_after(
    conn: &Connection,
    document_id: &str,
    after_sequence: i64,
) -> Result<Vec<UpdateRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT sequence, payload FROM document_updates
             WHERE document_id = ?1 AND sequence > ?2
             ORDER BY sequence DESC",
        )
        .context("prepare update-log query")?;

    let rows = stmt
        .query_map(params![document_id, after_sequence], |row| {
            Ok(UpdateRow {
                sequence: row.get(0)?,
                payload: row.get(1)?,
            })
        })
        .context("query update log")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("read update log for document {document_id}"))?;
    Ok(rows)
}

/// Append one update-log row. This is the edit writer's side of the
/// contract, provided here for ingestion code and tests.
///
/// # Errors
///
/// Returns an error if the sequence is already taken or the insert fails.
pub fn append_update(
    conn: &Connection,
    document_id: &str,
    sequence: i64,
    payload: &[u8],
    now_us: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO document_updates (document_id, sequence, payload, created_at_us)
         VALUES (?1, ?2, ?3, ?4)",
        params![document_id, sequence, payload, now_us],
    )
    .with_context(|| format!("append update {sequence} for document {document_id}"))?;
    Ok(())
}

/// Write back a compacted snapshot.
///
/// `content_updated_at_us` is only touched when a new value is given;
/// progress fields always advance.
///
/// # Errors
///
/// Returns an error if the row is missing or the write fails.
pub fn write_snapshot(
    conn: &Connection,
    document_id: &str,
    state: &[u8],
    version_vector: &[u8],
    applied_sequence: i64,
    content_updated_at_us: Option<i64>,
) -> Result<()> {
    let changed = conn
        .execute(
            "UPDATE document_snapshots
             SET state = ?2,
                 version_vector = ?3,
                 applied_sequence = ?4,
                 content_updated_at_us = COALESCE(?5, content_updated_at_us)
             WHERE document_id = ?1",
            params![
                document_id,
                state,
                version_vector,
                applied_sequence,
                content_updated_at_us
            ],
        )
        .with_context(|| format!("write snapshot row for document {document_id}"))?;
    anyhow::ensure!(
        changed == 1,
        "snapshot row for document {document_id} vanished mid-compaction"
    );
    Ok(())
}

/// Journal one semantic content change. Called by the compactor inside
/// its transaction, only when the visible fingerprint moved.
///
/// # Errors
///
/// Returns an error if the insert fails.
pub fn append_content_history(
    conn: &Connection,
    document_id: &str,
    fingerprint: &[u8],
    now_us: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO document_content_history (document_id, fingerprint, recorded_at_us)
         VALUES (?1, ?2, ?3)",
        params![document_id, fingerprint, now_us],
    )
    .with_context(|| format!("journal content change for document {document_id}"))?;
    Ok(())
}

/// A document's content-change journal, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn content_history(conn: &Connection, document_id: &str) -> Result<Vec<ContentHistoryRow>> {
    let mut stmt = conn
        .prepare(
            "SELECT fingerprint, recorded_at_us FROM document_content_history
             WHERE document_id = ?1 ORDER BY history_id ASC",
        )
        .context("prepare content-history query")?;

    let rows = stmt
        .query_map(params![document_id], |row| {
            Ok(ContentHistoryRow {
                fingerprint: row.get(0)?,
                recorded_at_us: row.get(1)?,
            })
        })
        .context("query content history")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("read content history for document {document_id}"))?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::{
        append_content_history, append_update, content_history, create_document, load_snapshot,
        updates_after, write_snapshot,
    };
    use rusqlite::Connection;

    fn test_conn() -> Connection {
        let mut conn = Connection::open_in_memory().expect("open in-memory db");
        crate::db::migrations::migrate(&mut conn).expect("migrate");
        conn
    }

    #[test]
    fn new_document_starts_at_sequence_zero() {
        let conn = test_conn();
        create_document(&conn, "doc-1", 1_000).expect("create");

        let row = load_snapshot(&conn, "doc-1")
            .expect("load")
            .expect("row exists");
        assert_eq!(row.applied_sequence, 0);
        assert_eq!(row.content_updated_at_us, 1_000);
    }

    #[test]
    fn missing_document_loads_as_none() {
        let conn = test_conn();
        assert!(load_snapshot(&conn, "ghost").expect("load").is_none());
    }

    #[test]
    fn updates_after_filters_and_orders_descending() {
        let conn = test_conn();
        create_document(&conn, "doc-1", 0).expect("create");
        for sequence in 1..=4 {
            append_update(&conn, "doc-1", sequence, b"payload", 0).expect("append");
        }

        let rows = updates_after(&conn, "doc-1", 2).expect("query");
        let sequences: Vec<i64> = rows.iter().map(|row| row.sequence).collect();
        assert_eq!(sequences, vec![4, 3]);
    }

    #[test]
    fn duplicate_sequence_is_rejected() {
        let conn = test_conn();
        create_document(&conn, "doc-1", 0).expect("create");
        append_update(&conn, "doc-1", 1, b"a", 0).expect("append");
        assert!(append_update(&conn, "doc-1", 1, b"b", 0).is_err());
    }

    #[test]
    fn write_snapshot_preserves_timestamp_unless_given() {
        let conn = test_conn();
        create_document(&conn, "doc-1", 500).expect("create");

        write_snapshot(&conn, "doc-1", b"s1", b"v1", 3, None).expect("write");
        let row = load_snapshot(&conn, "doc-1")
            .expect("load")
            .expect("row exists");
        assert_eq!(row.applied_sequence, 3);
        assert_eq!(row.content_updated_at_us, 500);

        write_snapshot(&conn, "doc-1", b"s2", b"v2", 5, Some(900)).expect("write");
        let row = load_snapshot(&conn, "doc-1")
            .expect("load")
            .expect("row exists");
        assert_eq!(row.applied_sequence, 5);
        assert_eq!(row.content_updated_at_us, 900);
    }

    #[test]
    fn write_snapshot_for_missing_row_is_an_error() {
        let conn = test_conn();
        assert!(write_snapshot(&conn, "ghost", b"s", b"v", 1, None).is_err());
    }

    #[test]
    fn content_history_keeps_insertion_order() {
        let conn = test_conn();
        create_document(&conn, "doc-1", 0).expect("create");
        append_content_history(&conn, "doc-1", b"fp-1", 100).expect("journal");
        append_content_history(&conn, "doc-1", b"fp-2", 200).expect("journal");

        let rows = content_history(&conn, "doc-1").expect("query");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fingerprint, b"fp-1");
        assert_eq!(rows[1].recorded_at_us, 200);
        assert!(content_history(&conn, "other").expect("query").is_empty());
    }
}
