//! Store access for the coordination tables. All cross-instance state lives
//! in Postgres; these modules are the only place SQL is written.

pub mod audit;
pub mod cases;
pub mod follow_ups;
pub mod proposals;
pub mod runs;
pub mod signals;

/// Shared SQL fragment for the active-run status set. Must stay in sync with
/// the partial unique index predicate in the migrations.
pub const ACTIVE_RUN_STATUS_SQL: &str =
    "('created', 'queued', 'running', 'paused', 'waiting', 'gated')";
