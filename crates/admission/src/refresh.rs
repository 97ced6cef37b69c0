//! Refresh mutual exclusion and dependency wiring
//!
//! The coordinator owns the single exclusive section guarding the active
//! refresh set, the dependency graph, and the executing-flag transition. The
//! hazard it closes: "operation begins executing" and "a dependency is being
//! attached" must serialize against the same lock, otherwise a dependency can
//! be attached after the executor already decided the operation was runnable.
//!
//! The lock is held briefly (read a flag, mutate a set) and never across an
//! `.await` or a call into the executor.
//!
//! Edges always point from a newly admitted operation to a refresh already in
//! the active set, so the graph is acyclic by construction. Refresh
//! operations take edges on earlier refreshes too, which serializes them
//! under any executor that honors dependencies.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use session::CredentialSession;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::operation::{Operation, OperationId, Outcome};

/// Per-operation graph bookkeeping, dropped when the operation finishes.
struct OpRecord {
    handle: Operation,
    /// Unresolved dependencies: every id here must finish before this
    /// operation is eligible to run.
    pending: HashSet<OperationId>,
    /// Reverse edges, walked on finish to release waiters.
    dependents: HashSet<OperationId>,
}

impl OpRecord {
    fn new(handle: Operation) -> Self {
        Self {
            handle,
            pending: HashSet::new(),
            dependents: HashSet::new(),
        }
    }
}

struct GraphState {
    records: HashMap<OperationId, OpRecord>,
    /// Every refresh-variant operation currently enqueued or executing.
    active_refresh: HashSet<OperationId>,
}

/// Serializes credential-refresh execution and wires dependency edges.
///
/// Holds a non-owning reference to the credential session: the session is
/// owned by the hosting SDK instance, and the coordinator upgrades the weak
/// handle only for the duration of a log line.
pub struct RefreshCoordinator {
    state: Mutex<GraphState>,
    session: Weak<CredentialSession>,
}

impl RefreshCoordinator {
    /// Create a coordinator bound to the given credential session.
    pub fn new(session: Weak<CredentialSession>) -> Self {
        Self {
            state: Mutex::new(GraphState {
                records: HashMap::new(),
                active_refresh: HashSet::new(),
            }),
            session,
        }
    }

    /// Upgrade the session handle, if the host still owns it.
    pub fn session(&self) -> Option<Arc<CredentialSession>> {
        self.session.upgrade()
    }

    /// Number of refresh operations currently enqueued or executing.
    pub fn active_refresh_count(&self) -> usize {
        self.lock().active_refresh.len()
    }

    /// Number of operations currently tracked in the graph.
    pub fn tracked_count(&self) -> usize {
        self.lock().records.len()
    }

    /// Admit an operation: terminal check, dependency wiring, registration.
    ///
    /// Runs entirely inside the exclusive section, so every refresh admitted
    /// before this call returns is wired as a dependency and no refresh
    /// admitted concurrently is missed.
    pub(crate) fn admit(&self, operation: &Operation) -> Result<()> {
        let mut state = self.lock();
        let id = operation.id();
        if operation.is_cancelled() || operation.is_finished() {
            return Err(Error::AdmissionRejected(format!(
                "operation {id} is already terminal"
            )));
        }
        if !operation.mark_enqueued() {
            return Err(Error::AdmissionRejected(format!(
                "operation {id} was already enqueued"
            )));
        }

        let active: Vec<OperationId> = state.active_refresh.iter().copied().collect();
        let mut wired = HashSet::new();
        for refresh_id in active {
            if let Some(record) = state.records.get_mut(&refresh_id) {
                record.dependents.insert(id);
                wired.insert(refresh_id);
                operation.record_dependency(refresh_id);
            }
        }

        // A record may already exist if the caller wired dependencies before
        // enqueueing; merge rather than replace.
        let record = state
            .records
            .entry(id)
            .or_insert_with(|| OpRecord::new(operation.clone()));
        record.pending.extend(wired);
        let pending_count = record.pending.len();
        let eligible = pending_count == 0;

        if operation.is_refresh() {
            state.active_refresh.insert(id);
            info!(
                op = %id,
                in_flight = state.active_refresh.len(),
                "refresh operation admitted"
            );
        } else {
            debug!(op = %id, dependencies = pending_count, "operation admitted");
        }

        if eligible {
            operation.mark_eligible();
        }
        Ok(())
    }

    /// Attach `dependency` as a must-finish-before constraint on `operation`.
    ///
    /// Atomic with respect to the executing flag: if the target already began
    /// executing the attachment is refused (`DependencyRace`) — the caller
    /// must handle the escape hatch, typically by letting the racing
    /// operation fail naturally and retrying. An already-finished dependency
    /// is recorded but immediately satisfied.
    pub(crate) fn try_add_dependency(
        &self,
        dependency: &Operation,
        operation: &Operation,
    ) -> Result<()> {
        let op_id = operation.id();
        let dep_id = dependency.id();
        if op_id == dep_id {
            return Err(Error::AdmissionRejected(format!(
                "operation {op_id} cannot depend on itself"
            )));
        }

        let mut state = self.lock();
        if operation.is_executing() {
            return Err(Error::DependencyRace(format!(
                "operation {op_id} already began executing"
            )));
        }
        if operation.is_cancelled() || operation.is_finished() {
            return Err(Error::DependencyRace(format!(
                "operation {op_id} is already terminal"
            )));
        }

        operation.record_dependency(dep_id);
        // Serialized with `finish`, which claims the terminal flag inside
        // this same section: a finished dependency can never appear
        // untracked-yet-unfinished here.
        if dependency.is_finished() {
            return Ok(());
        }

        // Records are created lazily so edges can be wired before either
        // operation is enqueued.
        state
            .records
            .entry(dep_id)
            .or_insert_with(|| OpRecord::new(dependency.clone()))
            .dependents
            .insert(op_id);
        let record = state
            .records
            .entry(op_id)
            .or_insert_with(|| OpRecord::new(operation.clone()));
        record.pending.insert(dep_id);
        // The target may already have been marked eligible; a new pending
        // dependency revokes that until the dependency resolves.
        operation.clear_eligible();
        debug!(op = %op_id, dependency = %dep_id, "dependency attached");
        Ok(())
    }

    /// Executor-facing: flip the executing flag, exactly once, immediately
    /// before work begins.
    ///
    /// Refuses when the operation is cancelled, no longer tracked, or still
    /// has pending dependencies. After a refusal the executor must re-check
    /// the cancellation flag rather than assume it may run later.
    pub fn begin(&self, operation: &Operation) -> bool {
        let state = self.lock();
        if operation.is_cancelled() || operation.is_finished() {
            return false;
        }
        match state.records.get(&operation.id()) {
            Some(record) if record.pending.is_empty() => {
                operation.set_executing(true);
                debug!(op = %operation.id(), "operation began executing");
                true
            }
            _ => false,
        }
    }

    /// Executor-facing: record the terminal outcome, release dependents, and
    /// notify waiters.
    ///
    /// Idempotent: the outcome notification fires exactly once and the active
    /// refresh set is emptied exactly once, even if completion and
    /// cancellation race.
    pub fn finish(&self, operation: &Operation, outcome: Outcome) {
        let id = operation.id();
        let (claimed, released) = {
            let mut state = self.lock();
            operation.set_executing(false);
            // The terminal flag is claimed inside the section so that
            // `try_add_dependency` never observes the record gone while the
            // operation still reads as unfinished — that window would let it
            // recreate a record for a dependency no finish will ever resolve.
            let claimed = operation.mark_finished();
            let mut released = Vec::new();
            if let Some(record) = state.records.remove(&id) {
                if operation.is_refresh() && state.active_refresh.remove(&id) {
                    self.log_refresh_outcome(id, &outcome);
                } else {
                    debug!(op = %id, "operation finished");
                }
                for dependent_id in record.dependents {
                    if let Some(dependent) = state.records.get_mut(&dependent_id) {
                        dependent.pending.remove(&id);
                        if dependent.pending.is_empty() {
                            dependent.handle.mark_eligible();
                            released.push(dependent.handle.clone());
                        }
                    }
                }
            }
            (claimed, released)
        };

        if claimed {
            operation.deliver(outcome);
        }
        for dependent in released {
            dependent.notify_waiters();
        }
    }

    /// Cancel and forget every tracked operation.
    ///
    /// Flags are flipped inside the exclusive section, so an executor that
    /// calls `begin` afterwards is guaranteed a refusal. Returns the drained
    /// handles so the caller can count them.
    pub(crate) fn drain_all(&self) -> Vec<Operation> {
        let mut state = self.lock();
        let handles: Vec<Operation> = state
            .records
            .values()
            .map(|record| record.handle.clone())
            .collect();
        state.records.clear();
        state.active_refresh.clear();
        for operation in &handles {
            operation.cancel();
        }
        handles
    }

    /// Graph state summary for introspection and health reporting.
    pub fn snapshot(&self) -> serde_json::Value {
        let state = self.lock();
        let operations: Vec<serde_json::Value> = state
            .records
            .values()
            .map(|record| {
                serde_json::json!({
                    "id": record.handle.id().to_string(),
                    "kind": record.handle.kind().label(),
                    "pending_dependencies": record.pending.len(),
                    "executing": record.handle.is_executing(),
                    "cancelled": record.handle.is_cancelled(),
                })
            })
            .collect();
        serde_json::json!({
            "tracked": state.records.len(),
            "active_refresh": state.active_refresh.len(),
            "operations": operations,
        })
    }

    fn log_refresh_outcome(&self, id: OperationId, outcome: &Outcome) {
        match outcome {
            Outcome::Completed => {
                info!(op = %id, "refresh operation completed, releasing dependents");
                if let Some(session) = self.session.upgrade() {
                    debug!(op = %id, expires = session.expires(), "credential session after refresh");
                }
            }
            Outcome::Failed(message) => {
                warn!(
                    op = %id,
                    error = %message,
                    "refresh operation failed; dependents released, retry is the caller's policy"
                );
            }
            Outcome::Cancelled => {
                debug!(op = %id, "refresh operation cancelled");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
