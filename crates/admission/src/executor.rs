//! Executor port for admitted operations
//!
//! The queue manager decides *when* an operation may run; an executor decides
//! *how*. Concrete executors (FIFO serial, priority, bounded worker pool)
//! implement this trait and are injected at `QueueManager` construction.

use crate::operation::Operation;

/// Abstraction over the mechanism that actually runs admitted operations.
///
/// Contract for implementations:
/// - Operations are eventually started in an order consistent with their
///   resolved dependencies; `Operation::ready` awaits exactly that.
/// - `RefreshCoordinator::begin` is called exactly once immediately before
///   work begins. If it refuses (cancelled or dependencies pending), the
///   operation must not run; a cancelled operation is reported via
///   `RefreshCoordinator::finish` with `Outcome::Cancelled`.
/// - Cancellation flags are honored before starting, and running work is
///   unwound cooperatively.
/// - Every accepted operation reaches `RefreshCoordinator::finish` exactly
///   once. An operation that never finishes leaves its dependents waiting
///   forever — that is a liveness bug in the executor.
pub trait Executor: Send + Sync {
    /// Accept an admitted operation for eventual execution.
    ///
    /// Called by the queue manager outside the exclusive section; must not
    /// block.
    fn submit(&self, operation: Operation);
}
