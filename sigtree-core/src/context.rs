//! Verification context
//!
//! One explicit struct carrying every collaborator the engine consumes:
//! transport, local cache, pinned keyring, and the fetch timeout. Built once
//! by the embedding process and passed by reference into the clients, in
//! place of ambient singletons.

use std::sync::Arc;
use std::time::Duration;

use crate::keyring::TrustedKeyring;
use crate::store::LocalStore;
use crate::transport::ApiClient;

/// Default per-fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Collaborators shared by all verification sessions in a process.
#[derive(Clone)]
pub struct VerifyContext {
    pub api: Arc<dyn ApiClient>,
    pub store: Arc<LocalStore>,
    pub keyring: TrustedKeyring,
    pub fetch_timeout: Duration,
}

impl VerifyContext {
    pub fn new(api: Arc<dyn ApiClient>, store: Arc<LocalStore>, keyring: TrustedKeyring) -> Self {
        Self {
            api,
            store,
            keyring,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}
