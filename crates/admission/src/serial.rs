//! Serial FIFO executor
//!
//! Runs admitted operations one at a time in admission order on a single
//! tokio task. FIFO order is already consistent with the dependency graph:
//! edges only point at operations admitted earlier, so the head of the queue
//! never waits on something behind it. The task drains its channel and exits
//! when the executor handle is dropped.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::executor::Executor;
use crate::operation::{Operation, Outcome};
use crate::refresh::RefreshCoordinator;

/// One-at-a-time executor satisfying the `Executor` contract.
pub struct SerialExecutor {
    tx: mpsc::UnboundedSender<Operation>,
}

impl SerialExecutor {
    /// Spawn the run loop against the given coordinator.
    pub fn spawn(coordinator: Arc<RefreshCoordinator>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_loop(coordinator, rx));
        Self { tx }
    }
}

impl Executor for SerialExecutor {
    fn submit(&self, operation: Operation) {
        if self.tx.send(operation).is_err() {
            warn!("serial executor task is gone, dropping operation");
        }
    }
}

async fn run_loop(coordinator: Arc<RefreshCoordinator>, mut rx: mpsc::UnboundedReceiver<Operation>) {
    while let Some(operation) = rx.recv().await {
        run_one(&coordinator, operation).await;
    }
    debug!("serial executor drained, shutting down");
}

async fn run_one(coordinator: &Arc<RefreshCoordinator>, operation: Operation) {
    loop {
        operation.ready().await;
        if operation.is_cancelled() || operation.is_finished() {
            coordinator.finish(&operation, Outcome::Cancelled);
            return;
        }
        if coordinator.begin(&operation) {
            break;
        }
        // begin refused without cancellation: a dependency was attached
        // between eligibility and here. Wait for it to resolve.
    }

    let outcome = match operation.take_work() {
        Some(work) => match work.await {
            Ok(()) => Outcome::Completed,
            Err(error) => Outcome::Failed(error.to_string()),
        },
        None => Outcome::Completed,
    };
    coordinator.finish(&operation, outcome);
}
