//! Credential value and session wrapper
//!
//! A `std::sync::RwLock` guards the credential: reads dominate (every request
//! reads the access token), writes happen only when a refresh operation
//! completes. The lock is never held across I/O or an `.await`.

use std::sync::RwLock;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A bearer credential with absolute expiry.
///
/// `expires` is a unix timestamp in milliseconds (absolute, not a delta).
/// Computed at storage time from the token endpoint's `expires_in` (seconds
/// delta) plus the current time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Current access token (Bearer token for API calls)
    pub access: String,
    /// Refresh token for obtaining new access tokens
    pub refresh: String,
    /// Expiration as unix timestamp in milliseconds
    pub expires: u64,
}

/// Current time as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Thread-safe holder of the session's credential.
///
/// Reads clone the credential out so callers never observe a torn token/expiry
/// pair while a refresh write is in progress.
pub struct CredentialSession {
    state: RwLock<Credential>,
}

impl CredentialSession {
    /// Create a session from an existing credential.
    pub fn new(credential: Credential) -> Self {
        Self {
            state: RwLock::new(credential),
        }
    }

    /// Get a clone of the current credential.
    pub fn credential(&self) -> Credential {
        self.read().clone()
    }

    /// Get the current access token.
    pub fn access_token(&self) -> String {
        self.read().access.clone()
    }

    /// Expiration of the current access token as unix milliseconds.
    pub fn expires(&self) -> u64 {
        self.read().expires
    }

    /// Whether the access token expires within `window_millis` from now.
    pub fn expires_within(&self, window_millis: u64) -> bool {
        self.read().expires <= now_millis() + window_millis
    }

    /// Replace the credential after a successful refresh.
    pub fn update(&self, access: String, refresh: String, expires: u64) {
        let mut state = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.access = access;
        state.refresh = refresh;
        state.expires = expires;
        debug!(expires, "credential updated");
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Credential> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_credential(expires: u64) -> Credential {
        Credential {
            access: "at_old".into(),
            refresh: "rt_old".into(),
            expires,
        }
    }

    /// Expiration far in the future (year 2100).
    fn future_expiry() -> u64 {
        4_102_444_800_000
    }

    #[test]
    fn update_replaces_all_fields() {
        let session = CredentialSession::new(test_credential(1_000));
        session.update("at_new".into(), "rt_new".into(), future_expiry());

        let credential = session.credential();
        assert_eq!(credential.access, "at_new");
        assert_eq!(credential.refresh, "rt_new");
        assert_eq!(credential.expires, future_expiry());
    }

    #[test]
    fn expires_within_detects_imminent_expiry() {
        let session = CredentialSession::new(test_credential(now_millis() + 1_000));
        assert!(session.expires_within(60_000));

        let session = CredentialSession::new(test_credential(future_expiry()));
        assert!(!session.expires_within(60_000));
    }

    #[test]
    fn access_token_reads_current_value() {
        let session = CredentialSession::new(test_credential(future_expiry()));
        assert_eq!(session.access_token(), "at_old");
        session.update("at_new".into(), "rt_old".into(), future_expiry());
        assert_eq!(session.access_token(), "at_new");
    }

    #[test]
    fn credential_serde_round_trip() {
        let credential = test_credential(42);
        let json = serde_json::to_string(&credential).unwrap();
        let parsed: Credential = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.access, credential.access);
        assert_eq!(parsed.expires, 42);
    }
}
