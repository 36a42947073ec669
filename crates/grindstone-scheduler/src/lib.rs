//! # Grindstone Scheduler
//!
//! The orchestration layer: one independent control loop per
//! (application, account) pair, deciding what to run next under priority,
//! dependency, retry, and budget rules, and driving execution through the
//! recognizer and the device collaborator.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine
//!   ├── loop (game-a, acct-1) ─┐
//!   ├── loop (game-a, acct-2) ─┼─ shared: CaptureCache / ResultCache
//!   └── loop (game-b, acct-3) ─┘           StateGraph (read-only)
//!                                          device mutex (capture-and-act)
//!   each attempt:
//!     Idle → Selecting (TaskStore::eligible_tasks)
//!          → Executing (handler under task.timeout)
//!          → Succeeded | Failed | TimedOut
//!          → record_outcome + activity log → Idle (same account re-selects)
//! ```
//!
//! Fairness is enforced across accounts, never within one account's queue:
//! a loop keeps re-selecting its own highest-priority work until budget,
//! retries, or the time slice stop it.

pub mod engine;
pub mod navigate;
pub mod registry;

pub use engine::{AttemptOutcome, SchedulerEngine};
pub use navigate::GraphNavigator;
pub use registry::{BehaviorRegistry, HandlerRegistry};
