//! bugferry-core: moves bugs, their comment threads and attachments from a
//! Bugzilla-style tracker into GitLab-style issues without losing authorship.
//!
//! Leaf-first:
//!
//! - [`rewrite`]: ordered pure text transforms applied to every comment body.
//! - [`identity`]: source login → destination account, cached and persisted.
//! - [`attachment`]: upload and inline rendering of attachment payloads.
//! - [`elevation`]: scoped membership grants for attributed writes.
//! - [`taxonomy`]: labels and milestones.
//! - [`transform`]: issue and comment builders.
//! - [`orchestrator`]: the per-bug sequence and batch report.
//!
//! All I/O goes through the traits in [`store`].

pub mod attachment;
pub mod config;
pub mod elevation;
pub mod error;
pub mod identity;
pub mod lock;
pub mod model;
pub mod orchestrator;
pub mod rewrite;
pub mod store;
pub mod taxonomy;
pub mod transform;

/// # Conventions
///
/// - **Errors**: fallible operations return [`error::Result`]; collaborators
///   report [`store::StoreError`], which converts into
///   [`error::MigrationError`] with `?`.
/// - **Logging**: use `tracing` macros (`info!`, `warn!`, `debug!`) with
///   structured fields (`bug_id`, `container`, `account_id`).
pub use error::{MigrationError, Result};
pub use orchestrator::{BugOutcome, MigrationReport, Migrator};
