//! Canonical SQLite schema for the document consistency store.
//!
//! Two tables:
//! - `document_snapshots` holds one row per document: the encoded CRDT
//!   state, its version vector, the highest log sequence folded in, and a
//!   content timestamp that moves only on semantic change. Mutated
//!   exclusively by the compactor.
//! - `document_updates` is the append-only update log, written by the
//!   edit ingestion path and consumed read-only here. Sequences are
//!   assigned by the writer, strictly increasing and gap-free per
//!   document.
//! - `document_content_history` journals one fingerprint per semantic
//!   content change, for downstream consumers (search indexing,
//!   notifications) that must not fire on pure no-ops.

/// Migration v1: snapshot and update-log tables.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS document_snapshots (
    document_id TEXT PRIMARY KEY,
    state BLOB NOT NULL,
    version_vector BLOB NOT NULL,
    applied_sequence INTEGER NOT NULL DEFAULT 0 CHECK (applied_sequence >= 0),
    content_updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS document_updates (
    document_id TEXT NOT NULL,
    sequence INTEGER NOT NULL CHECK (sequence > 0),
    payload BLOB NOT NULL,
    created_at_us INTEGER NOT NULL,
    PRIMARY KEY (document_id, sequence)
);

CREATE TABLE IF NOT EXISTS document_content_history (
    history_id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL,
    fingerprint BLOB NOT NULL,
    recorded_at_us INTEGER NOT NULL
);
";
