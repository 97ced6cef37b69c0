//! Operation handles and lifecycle state
//!
//! An `Operation` is a cheaply cloneable handle to one unit of asynchronous
//! work. The caller, the queue manager, and the executor all hold clones for
//! the operation's lifetime. Lifecycle flags (`executing`, `eligible`) are
//! flipped only while the coordinator's exclusive section is held; the
//! atomics exist so readers outside the section see a coherent snapshot.
//!
//! State machine: Created → Enqueued → {DependencyPending}* → Eligible →
//! Executing → {Completed | Failed | Cancelled}. Cancellation is cooperative
//! and reachable from any non-terminal state.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use uuid::Uuid;

/// Opaque identity of an operation, unique per creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);

impl OperationId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Variant flag distinguishing credential-refresh work from ordinary requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Ordinary,
    Refresh,
}

impl OperationKind {
    /// Kind label for logging and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::Ordinary => "ordinary",
            OperationKind::Refresh => "refresh",
        }
    }
}

/// Terminal result of an operation, delivered to waiters exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// The async work an executor runs for an operation. Taken exactly once via
/// `Operation::take_work`.
pub type Work = Pin<Box<dyn Future<Output = crate::error::Result<()>> + Send + 'static>>;

struct Inner {
    id: OperationId,
    kind: OperationKind,
    cancelled: AtomicBool,
    executing: AtomicBool,
    eligible: AtomicBool,
    enqueued: AtomicBool,
    finished: AtomicBool,
    /// Every dependency ever attached, resolved or not. The coordinator owns
    /// the pending/unresolved view.
    dependencies: Mutex<HashSet<OperationId>>,
    work: Mutex<Option<Work>>,
    /// Fired exactly once with the terminal outcome.
    done: watch::Sender<Option<Outcome>>,
    /// Bumped whenever eligibility or cancellation changes.
    wake: watch::Sender<()>,
}

/// A unit of asynchronous work admitted through the `QueueManager`.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<Inner>,
}

impl Operation {
    fn new<F>(kind: OperationKind, work: F) -> Self
    where
        F: Future<Output = crate::error::Result<()>> + Send + 'static,
    {
        let (done, _) = watch::channel(None);
        let (wake, _) = watch::channel(());
        Self {
            inner: Arc::new(Inner {
                id: OperationId::new(),
                kind,
                cancelled: AtomicBool::new(false),
                executing: AtomicBool::new(false),
                eligible: AtomicBool::new(false),
                enqueued: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                dependencies: Mutex::new(HashSet::new()),
                work: Mutex::new(Some(Box::pin(work))),
                done,
                wake,
            }),
        }
    }

    /// Create an ordinary operation around async work.
    pub fn ordinary<F>(work: F) -> Self
    where
        F: Future<Output = crate::error::Result<()>> + Send + 'static,
    {
        Self::new(OperationKind::Ordinary, work)
    }

    /// Create a credential-refresh operation around async work.
    ///
    /// Refresh operations are serialized against each other by the
    /// coordinator; on failure the work should return
    /// [`crate::Error::RefreshFailed`].
    pub fn refresh<F>(work: F) -> Self
    where
        F: Future<Output = crate::error::Result<()>> + Send + 'static,
    {
        Self::new(OperationKind::Refresh, work)
    }

    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    pub fn kind(&self) -> OperationKind {
        self.inner.kind
    }

    pub fn is_refresh(&self) -> bool {
        self.inner.kind == OperationKind::Refresh
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_executing(&self) -> bool {
        self.inner.executing.load(Ordering::SeqCst)
    }

    pub fn is_eligible(&self) -> bool {
        self.inner.eligible.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Snapshot of every dependency attached so far (resolved or not).
    pub fn dependencies(&self) -> Vec<OperationId> {
        self.lock_dependencies().iter().copied().collect()
    }

    /// Terminal outcome, if the operation has finished.
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.done.borrow().clone()
    }

    /// Request cooperative cancellation.
    ///
    /// Flips the flag and wakes any executor waiting on `ready`. Running work
    /// is not preempted; it is expected to observe `is_cancelled` and unwind.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _ = self.inner.wake.send(());
    }

    /// Wait until the operation reaches a terminal state.
    pub async fn wait(&self) -> Outcome {
        let mut rx = self.inner.done.subscribe();
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome;
            }
            // Sender lives in `inner`, so `changed` cannot error while `self`
            // is alive.
            let _ = rx.changed().await;
        }
    }

    /// Wait until the operation may be started (all dependencies resolved) or
    /// has been cancelled.
    ///
    /// Executor-facing. Only meaningful for admitted operations: an operation
    /// that is never enqueued never becomes eligible.
    pub async fn ready(&self) {
        let mut rx = self.inner.wake.subscribe();
        loop {
            if self.is_eligible() || self.is_cancelled() || self.is_finished() {
                return;
            }
            let _ = rx.changed().await;
        }
    }

    /// Take the work for execution. Returns `None` if already taken.
    pub fn take_work(&self) -> Option<Work> {
        let mut slot = match self.inner.work.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    }

    // Lifecycle mutators below are crate-private: they are called only while
    // the coordinator's exclusive section is held (except `deliver`, which
    // runs after `mark_finished` has claimed the terminal transition).

    pub(crate) fn mark_enqueued(&self) -> bool {
        self.inner
            .enqueued
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn mark_eligible(&self) {
        self.inner.eligible.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_eligible(&self) {
        self.inner.eligible.store(false, Ordering::SeqCst);
    }

    pub(crate) fn set_executing(&self, executing: bool) {
        self.inner.executing.store(executing, Ordering::SeqCst);
    }

    pub(crate) fn record_dependency(&self, id: OperationId) {
        self.lock_dependencies().insert(id);
    }

    pub(crate) fn notify_waiters(&self) {
        let _ = self.inner.wake.send(());
    }

    /// Claim the terminal transition. Exactly one caller wins, even if
    /// completion and cancellation race. Called inside the exclusive section
    /// so terminal-state reads elsewhere in the section are serialized with
    /// the flip.
    pub(crate) fn mark_finished(&self) -> bool {
        self.inner
            .finished
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Deliver the terminal outcome claimed via `mark_finished`. The watch
    /// sends are non-blocking but kept outside the exclusive section anyway.
    pub(crate) fn deliver(&self, outcome: Outcome) {
        let _ = self.inner.done.send(Some(outcome));
        let _ = self.inner.wake.send(());
    }

    fn lock_dependencies(&self) -> std::sync::MutexGuard<'_, HashSet<OperationId>> {
        match self.inner.dependencies.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("cancelled", &self.is_cancelled())
            .field("executing", &self.is_executing())
            .field("eligible", &self.is_eligible())
            .field("finished", &self.is_finished())
            .finish()
    }
}
