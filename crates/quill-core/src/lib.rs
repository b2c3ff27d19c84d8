//! Consistency core for the Quill collaborative document platform.
//!
//! Two components, bottom-up:
//!
//! - [`lock`]: a lease-based distributed lock over a shared key-value
//!   store, with automatic background renewal and cooperative
//!   cancellation on lease loss.
//! - [`compactor`]: the per-document job that folds the append-only CRDT
//!   update log into the durable snapshot row, under the lease plus the
//!   database's own transactional guard.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` on orchestration paths, with
//!   machine-readable [`error::ErrorCode`] codes embedded in messages.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod compactor;
pub mod config;
pub mod crdt;
pub mod db;
pub mod error;
pub mod lock;
pub mod store;

pub use compactor::{CompactionOutcome, compact_document, run_compaction_job};
pub use config::CoordinationConfig;
pub use error::ErrorCode;
pub use lock::{CancellationSignal, LeaseLock, LockSettings, LockState, with_lease};
pub use store::{LeaseStore, MemoryLeaseStore, RedisLeaseStore, StoreError};
