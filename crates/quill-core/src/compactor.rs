//! Update-log compaction into document snapshots.
//!
//! The compactor converges a document's durable snapshot with every log
//! row newer than the snapshot's `applied_sequence` — exactly once
//! logically, no matter how redundantly or concurrently the job fires.
//! Correctness comes from two layers:
//!
//! - the whole fold runs in one `BEGIN IMMEDIATE` transaction, so the
//!   database write lock serializes racing compactions (the storage-native
//!   guard; SQLite's coarser analog of a `SELECT ... FOR UPDATE` row lock)
//! - the CRDT merge is commutative and idempotent, so even a duplicated
//!   fold converges to the same logical state
//!
//! The lease lock on top only avoids wasted duplicate work. Progress
//! (`applied_sequence`) advances even when the merged content turns out
//! semantically unchanged, so the log tail is never re-scanned forever;
//! `content_updated_at_us` moves only on real change, which is what
//! downstream consumers (search indexing, notifications) key off.

use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::config::CoordinationConfig;
use crate::crdt::{DocState, Update};
use crate::db::query;
use crate::error::ErrorCode;
use crate::lock::{CancellationSignal, with_lease};
use crate::store::LeaseStore;

/// Result of one compaction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// The log held nothing newer than the snapshot; nothing was written.
    NoNewUpdates,
    /// The snapshot row was advanced.
    Compacted {
        /// New high-water mark of folded log sequences.
        applied_sequence: i64,
        /// Whether the visible content actually changed.
        content_changed: bool,
    },
}

/// Fold all pending update-log rows for `document_id` into its snapshot.
///
/// Runs inside a single immediate transaction; any error rolls the whole
/// step back with no partial writes. `signal` is polled before commit so
/// a lapsed lease aborts instead of committing under lost exclusivity.
///
/// # Errors
///
/// Fails with [`ErrorCode::DocumentNotFound`] when no snapshot row
/// exists, [`ErrorCode::LeaseLost`] when `signal` fired, and propagates
/// decode and database errors.
pub fn compact_document(
    conn: &mut Connection,
    document_id: &str,
    now_us: i64,
    signal: &CancellationSignal,
) -> Result<CompactionOutcome> {
    if signal.is_cancelled() {
        anyhow::bail!(
            "{}: exclusivity lost before compacting document {document_id}",
            ErrorCode::LeaseLost
        );
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("begin compaction transaction")?;

    let snapshot = query::load_snapshot(&tx, document_id)?.ok_or_else(|| {
        anyhow::anyhow!(
            "{}: document {document_id} has no snapshot row",
            ErrorCode::DocumentNotFound
        )
    })?;

    let pending = query::updates_after(&tx, document_id, snapshot.applied_sequence)?;
    if pending.is_empty() {
        // Dropping the transaction rolls it back; nothing was written.
        debug!(document = document_id, "no updates newer than snapshot");
        return Ok(CompactionOutcome::NoNewUpdates);
    }

    let applied_sequence = pending
        .iter()
        .map(|row| row.sequence)
        .max()
        .unwrap_or(snapshot.applied_sequence);

    let decoded = pending
        .iter()
        .map(|row| {
            Update::decode(&row.payload).with_context(|| {
                format!("document {document_id} update at sequence {}", row.sequence)
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let combined = Update::merge_all(decoded);

    let mut doc = DocState::decode(&snapshot.state)
        .with_context(|| format!("snapshot of document {document_id}"))?;
    let before = doc.fingerprint();
    doc.apply(&combined);
    let after = doc.fingerprint();
    let content_changed = before != after;

    query::write_snapshot(
        &tx,
        document_id,
        &doc.encode()?,
        &doc.encode_version_vector()?,
        applied_sequence,
        content_changed.then_some(now_us),
    )?;
    if content_changed {
        query::append_content_history(&tx, document_id, after.as_bytes(), now_us)?;
    }

    if signal.is_cancelled() {
        anyhow::bail!(
            "{}: exclusivity lost while compacting document {document_id}",
            ErrorCode::LeaseLost
        );
    }
    tx.commit().context("commit compaction transaction")?;

    info!(
        document = document_id,
        applied_sequence, content_changed, "compacted update log into snapshot"
    );
    Ok(CompactionOutcome::Compacted {
        applied_sequence,
        content_changed,
    })
}

/// Job entry point: compact `document_id` under its lease lock.
///
/// Safe to invoke redundantly, concurrently, or after a crash — every
/// path either converges the snapshot or changes nothing, and the
/// caller's at-least-once retry picks up from the last committed
/// `applied_sequence`.
///
/// # Errors
///
/// Fails with [`ErrorCode::LockContention`] when the lease cannot be
/// taken before the configured deadline, plus every error of
/// [`compact_document`].
pub fn run_compaction_job<S: LeaseStore>(
    store: &Arc<S>,
    config: &CoordinationConfig,
    conn: &mut Connection,
    document_id: &str,
) -> Result<CompactionOutcome> {
    let now_us = chrono::Utc::now().timestamp_micros();
    with_lease(
        store,
        config.lock_settings(),
        config.acquire_deadline(),
        document_id,
        |signal| compact_document(conn, document_id, now_us, signal),
    )
}
