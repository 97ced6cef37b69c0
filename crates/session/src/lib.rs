//! Shared credential session handle
//!
//! Holds the current bearer credential (access token, refresh token, absolute
//! expiry) for an API session. The session object is owned by the hosting SDK
//! instance; the admission layer borrows it through a `Weak` handle purely as
//! a synchronization anchor and never extends its lifetime.
//!
//! Credential flow:
//! 1. Host SDK creates `CredentialSession` from stored tokens
//! 2. Admission layer is constructed with `Arc::downgrade(&session)`
//! 3. A refresh operation's work calls `update()` on success
//! 4. Request construction reads `access_token()` at send time

mod credential;

pub use credential::{Credential, CredentialSession, now_millis};
