//! Admission gateway over the refresh coordinator and the executor port
//!
//! Single entry point for submitting operations. The queue manager consults
//! the coordinator inside the exclusive section to decide dependency wiring,
//! then hands accepted operations to the injected executor with the section
//! already released. It never runs work itself, so every call here is fast
//! and non-blocking.

use std::sync::Arc;

use tracing::debug;

use crate::executor::Executor;
use crate::operation::Operation;
use crate::refresh::RefreshCoordinator;

/// Accepts operations, wires refresh dependencies, and hands admitted
/// operations to the executor.
pub struct QueueManager {
    coordinator: Arc<RefreshCoordinator>,
    executor: Arc<dyn Executor>,
}

impl QueueManager {
    /// Compose a queue manager from a coordinator and a run mechanism.
    ///
    /// The coordinator carries the credential-session handle; the executor is
    /// the abstract extension point that actually runs admitted operations.
    pub fn new(coordinator: Arc<RefreshCoordinator>, executor: Arc<dyn Executor>) -> Self {
        Self {
            coordinator,
            executor,
        }
    }

    /// The coordinator shared with executors.
    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Admit an operation for execution.
    ///
    /// Refresh variants are registered in the active refresh set; every
    /// operation gains a dependency edge on each refresh in flight at call
    /// time. Returns `false` only if the operation was already terminal or
    /// already enqueued — the executor never receives a dead operation.
    pub fn enqueue(&self, operation: &Operation) -> bool {
        match self.coordinator.admit(operation) {
            Ok(()) => {
                metrics::counter!(
                    "queue_operations_enqueued_total",
                    "kind" => operation.kind().label()
                )
                .increment(1);
                // Hand-off happens outside the exclusive section.
                self.executor.submit(operation.clone());
                true
            }
            Err(error) => {
                debug!(op = %operation.id(), error = %error, "enqueue rejected");
                metrics::counter!("queue_operations_rejected_total").increment(1);
                false
            }
        }
    }

    /// Attach `dependency` as a must-finish-before constraint on `operation`.
    ///
    /// Returns `false` when the target operation already began executing (the
    /// ordering guarantee could not be established after the fact) or is
    /// already terminal.
    pub fn add_dependency(&self, dependency: &Operation, operation: &Operation) -> bool {
        match self.coordinator.try_add_dependency(dependency, operation) {
            Ok(()) => true,
            Err(error) => {
                debug!(
                    op = %operation.id(),
                    dependency = %dependency.id(),
                    error = %error,
                    "dependency not attached"
                );
                false
            }
        }
    }

    /// Cancel every tracked operation and clear the bookkeeping.
    ///
    /// Cancellation is cooperative: flags are flipped and the graph is
    /// cleared; the executor refuses to start cancelled operations and
    /// unwinds already-running ones when their work observes the flag.
    pub fn cancel_all_operations(&self) {
        let drained = self.coordinator.drain_all();
        metrics::counter!("queue_operations_cancelled_total").increment(drained.len() as u64);
        debug!(count = drained.len(), "cancelled all tracked operations");
    }

    /// Queue state summary for introspection and health reporting.
    pub fn snapshot(&self) -> serde_json::Value {
        self.coordinator.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::operation::Outcome;
    use session::{Credential, CredentialSession};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Executor that runs every operation on its own tokio task, honoring the
    /// coordinator contract. Used to exercise the graph under real
    /// concurrency.
    struct PoolExecutor {
        coordinator: Arc<RefreshCoordinator>,
    }

    impl Executor for PoolExecutor {
        fn submit(&self, operation: Operation) {
            let coordinator = self.coordinator.clone();
            tokio::spawn(async move {
                loop {
                    operation.ready().await;
                    if operation.is_cancelled() || operation.is_finished() {
                        coordinator.finish(&operation, Outcome::Cancelled);
                        return;
                    }
                    if coordinator.begin(&operation) {
                        break;
                    }
                }
                let outcome = match operation.take_work() {
                    Some(work) => match work.await {
                        Ok(()) => Outcome::Completed,
                        Err(error) => Outcome::Failed(error.to_string()),
                    },
                    None => Outcome::Completed,
                };
                coordinator.finish(&operation, outcome);
            });
        }
    }

    fn queue() -> (Arc<CredentialSession>, QueueManager) {
        let session = Arc::new(CredentialSession::new(Credential {
            access: "at".into(),
            refresh: "rt".into(),
            expires: 4_102_444_800_000,
        }));
        let coordinator = Arc::new(RefreshCoordinator::new(Arc::downgrade(&session)));
        let executor = Arc::new(PoolExecutor {
            coordinator: coordinator.clone(),
        });
        (session, QueueManager::new(coordinator, executor))
    }

    /// A refresh operation that parks until released, so tests can hold it in
    /// flight deterministically.
    fn held_refresh() -> (Operation, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let released = gate.clone();
        let op = Operation::refresh(async move {
            released.notified().await;
            Ok(())
        });
        (op, gate)
    }

    #[tokio::test]
    async fn ordinary_ops_depend_on_in_flight_refresh() {
        let (_session, queue) = queue();
        let (r1, gate) = held_refresh();
        assert!(queue.enqueue(&r1));

        let a = Operation::ordinary(async { Ok(()) });
        let b = Operation::ordinary(async { Ok(()) });
        assert!(queue.enqueue(&a));
        assert!(queue.enqueue(&b));

        assert!(a.dependencies().contains(&r1.id()));
        assert!(b.dependencies().contains(&r1.id()));

        gate.notify_one();
        assert_eq!(r1.wait().await, Outcome::Completed);
        assert_eq!(a.wait().await, Outcome::Completed);
        assert_eq!(b.wait().await, Outcome::Completed);
    }

    #[tokio::test]
    async fn refresh_after_completion_carries_no_stale_dependency() {
        let (_session, queue) = queue();
        let (r1, gate) = held_refresh();
        assert!(queue.enqueue(&r1));
        gate.notify_one();
        assert_eq!(r1.wait().await, Outcome::Completed);

        let r2 = Operation::refresh(async { Ok(()) });
        assert!(queue.enqueue(&r2));
        assert!(r2.dependencies().is_empty());
        assert_eq!(r2.wait().await, Outcome::Completed);
    }

    #[tokio::test]
    async fn concurrent_refreshes_never_overlap() {
        let (_session, queue) = queue();
        let executing = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let mut ops = Vec::new();
        for _ in 0..8 {
            let executing = executing.clone();
            let overlap = overlap.clone();
            let op = Operation::refresh(async move {
                let now = executing.fetch_add(1, Ordering::SeqCst) + 1;
                if now > 1 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                executing.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
            assert!(queue.enqueue(&op));
            ops.push(op);
        }

        for op in &ops {
            assert_eq!(op.wait().await, Outcome::Completed);
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0, "two refreshes overlapped");
        assert_eq!(queue.coordinator().active_refresh_count(), 0);
    }

    #[tokio::test]
    async fn cancel_all_flips_flags_and_empties_refresh_set() {
        let (_session, queue) = queue();
        let (r1, gate) = held_refresh();
        let a = Operation::ordinary(async { Ok(()) });
        let b = Operation::ordinary(async { Ok(()) });
        assert!(queue.enqueue(&r1));
        assert!(queue.enqueue(&a));
        assert!(queue.enqueue(&b));

        queue.cancel_all_operations();

        assert!(r1.is_cancelled());
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert_eq!(queue.coordinator().active_refresh_count(), 0);
        assert_eq!(queue.snapshot()["tracked"], 0);

        // Never-started dependents are reported cancelled by the executor.
        assert_eq!(a.wait().await, Outcome::Cancelled);
        assert_eq!(b.wait().await, Outcome::Cancelled);

        // Unpark the running refresh so its task can unwind.
        gate.notify_one();
    }

    #[tokio::test]
    async fn enqueue_rejects_terminal_operations() {
        let (_session, queue) = queue();

        let cancelled = Operation::ordinary(async { Ok(()) });
        cancelled.cancel();
        assert!(!queue.enqueue(&cancelled));

        let op = Operation::ordinary(async { Ok(()) });
        assert!(queue.enqueue(&op));
        assert!(!queue.enqueue(&op));
        assert_eq!(op.wait().await, Outcome::Completed);
    }

    #[tokio::test]
    async fn failed_refresh_releases_dependents_with_failure_surfaced() {
        let (_session, queue) = queue();
        let r1 = Operation::refresh(async {
            Err(Error::RefreshFailed("token endpoint returned 401".into()))
        });
        assert!(queue.enqueue(&r1));

        let a = Operation::ordinary(async { Ok(()) });
        assert!(queue.enqueue(&a));

        let outcome = r1.wait().await;
        assert!(matches!(outcome, Outcome::Failed(_)), "got {outcome:?}");
        // Dependents are released, not cancelled: failure policy is the
        // caller's, so the ordinary operation still runs.
        assert_eq!(a.wait().await, Outcome::Completed);
    }

    #[tokio::test]
    async fn failed_ordinary_work_surfaces_failure() {
        let (_session, queue) = queue();
        let op = Operation::ordinary(async { Err(Error::Work("endpoint returned 500".into())) });
        assert!(queue.enqueue(&op));

        assert_eq!(
            op.wait().await,
            Outcome::Failed("operation failed: endpoint returned 500".into())
        );
        assert_eq!(queue.coordinator().tracked_count(), 0);
    }

    #[tokio::test]
    async fn add_dependency_races_executing_operation() {
        let (_session, queue) = queue();
        let gate = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let op = {
            let gate = gate.clone();
            let started = started.clone();
            Operation::ordinary(async move {
                started.notify_one();
                gate.notified().await;
                Ok(())
            })
        };
        assert!(queue.enqueue(&op));
        started.notified().await;
        assert!(op.is_executing());

        let dep = Operation::ordinary(async { Ok(()) });
        assert!(!queue.add_dependency(&dep, &op));

        gate.notify_one();
        assert_eq!(op.wait().await, Outcome::Completed);
    }

    #[tokio::test]
    async fn caller_wired_dependency_orders_ordinary_operations() {
        let (_session, queue) = queue();
        let (first, gate) = {
            let gate = Arc::new(Notify::new());
            let released = gate.clone();
            let op = Operation::ordinary(async move {
                released.notified().await;
                Ok(())
            });
            (op, gate)
        };
        let second = Operation::ordinary(async { Ok(()) });

        assert!(queue.enqueue(&first));
        assert!(queue.add_dependency(&first, &second));
        assert!(queue.enqueue(&second));
        assert!(!second.is_eligible());

        gate.notify_one();
        assert_eq!(first.wait().await, Outcome::Completed);
        assert_eq!(second.wait().await, Outcome::Completed);
    }
}
