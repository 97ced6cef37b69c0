//! Operation admission and credential-refresh coordination
//!
//! Gatekeeps when concurrent API operations may run against a session whose
//! bearer credential expires. Refresh operations must never race each other
//! (a second refresh can invalidate the first's result and tear down the
//! user's session), and ordinary operations admitted while a refresh is in
//! flight must wait for it. This crate controls admission order and mutual
//! exclusion only; it performs no network I/O and owns no retry policy.
//!
//! Operation lifecycle:
//! 1. Caller builds an `Operation` (ordinary or refresh) around async work
//! 2. `QueueManager::enqueue` wires dependency edges on every in-flight
//!    refresh, then hands the operation to the injected `Executor`
//! 3. The executor awaits `Operation::ready`, calls
//!    `RefreshCoordinator::begin`, runs the work, and reports the terminal
//!    outcome via `RefreshCoordinator::finish`
//! 4. `finish` releases dependents and notifies waiters exactly once
//!
//! `SerialExecutor` is a ready-made FIFO executor; alternative executors
//! (priority, bounded pool) implement the `Executor` trait.

pub mod error;
pub mod executor;
pub mod operation;
pub mod queue;
pub mod refresh;
pub mod serial;

pub use error::{Error, Result};
pub use executor::Executor;
pub use operation::{Operation, OperationId, OperationKind, Outcome, Work};
pub use queue::QueueManager;
pub use refresh::RefreshCoordinator;
pub use serial::SerialExecutor;
