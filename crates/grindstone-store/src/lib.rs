//! # Grindstone Store
//!
//! SQLite-backed persistence plus the task bookkeeping built on it: the
//! [`Db`] record store (applications, accounts, tasks, recognition states,
//! actions, settings, per-pair task status, activity log) and the
//! [`TaskStore`] that answers "what should this account run next" under
//! priority, dependency, retry, and budget rules.
//!
//! Opening or migrating the database is the one fatal failure in the
//! system: the scheduler never runs against a partially loaded catalog.

pub mod db;
pub mod tasks;

pub use db::Db;
pub use tasks::TaskStore;
