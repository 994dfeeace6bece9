#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Core library for lock-guarded, reusable workspaces.
//!
//! A workspace is a working copy of a repository that at most one caller
//! uses at a time. This crate tracks known workspaces per repository, picks a
//! free one or creates a new one, guards each with a lock file, reclaims
//! abandoned locks and brings a reused workspace to a clean, synced state.
//! The CLI binary in `crates/berth` builds on top of this library.
//!
//! Unix only: lock ownership relies on parent pids and signal handling.

/// Coordinator facade over registry, locks and preparation.
mod berth;
/// Global and per-repository configuration files.
mod config;
/// Creation of brand-new workspaces.
mod creator;
/// Error type and exit codes.
mod error;
/// Helper routines for interacting with Git repositories.
mod git;
/// Lock files and staleness.
mod lock;
/// Sync and update commands for a locked workspace.
mod prepare;
/// Durable workspace registry.
mod registry;
/// Repository identity and naming.
mod repository;
/// Reusable workspace selection.
mod selector;
/// Lock release on termination signals.
mod signals;
/// Fixtures shared by unit tests.
#[cfg(test)]
mod testing;
/// Shared data types.
mod types;
/// Version control abstraction.
mod vcs;

pub use berth::{Berth, Lease, StatusListing, WorkspaceStatus, normalize_path};
pub use config::{CONFIG_FILE_NAME, Config, CreateMethod, REPO_CONFIG_FILE_NAME, expand_tilde};
pub use creator::{GitCreator, WorkspaceCreator};
pub use error::{BerthError, Result};
pub use git::find_root;
pub use lock::{
    DEFAULT_STALE_THRESHOLD, HeldLocks, Holder, LOCK_FILE_NAME, LOCK_SCHEMA_VERSION, LockHandle,
    LockManager, LockRecord, LockStatus, ProcessProbe, ReclaimMode, StaleLockPrompt, StaleReason,
    SystemProbe, lock_path,
};
pub use prepare::{
    CommandOutcome, CommandResult, PrepareOptions, PrepareReport, Preparer, UpdateCommand,
};
pub use registry::{
    JsonFileRegistry, MemoryRegistry, REGISTRY_FILE_NAME, Registry, RegistryData, RegistryStore,
};
pub use repository::{identify, normalize_remote_url};
pub use selector::{Selection, Selector};
pub use signals::{
    ForegroundChild, InterruptDeferral, defer_interrupts, release_on_termination, track_foreground,
};
pub use types::{LockSummary, MetadataPatch, RepositoryId, WorkspaceEntry};
pub use vcs::{Git, SyncTarget, Vcs};
