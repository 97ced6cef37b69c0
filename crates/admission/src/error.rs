//! Error types for admission and refresh coordination

/// Errors from admission and refresh coordination.
///
/// Every variant is a local, recoverable signal; nothing here is fatal. The
/// bool-returning public surface maps `AdmissionRejected` and
/// `DependencyRace` to `false` for callers that only care whether the
/// operation was accepted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// `enqueue` was called with an operation that is already terminal or
    /// already enqueued. Treat as a no-op.
    #[error("admission rejected: {0}")]
    AdmissionRejected(String),

    /// The target operation began executing before the dependency could be
    /// attached. The ordering guarantee could not be established; caller
    /// policy decides whether to retry or surface it.
    #[error("dependency race: {0}")]
    DependencyRace(String),

    /// A credential-refresh operation's work failed. Dependents are still
    /// released; interpreting or retrying the failure is the caller's job.
    #[error("refresh failed: {0}")]
    RefreshFailed(String),

    /// An ordinary operation's work failed.
    #[error("operation failed: {0}")]
    Work(String),
}

/// Result alias for admission operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let err = Error::DependencyRace("op already executing".into());
        assert_eq!(err.to_string(), "dependency race: op already executing");

        let err = Error::RefreshFailed("token endpoint returned 401".into());
        assert!(err.to_string().starts_with("refresh failed:"), "got: {err}");
    }
}
