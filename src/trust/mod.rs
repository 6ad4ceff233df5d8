//! Certificate trust and client identity collaborators.
//!
//! * [`TrustStore`]: accept-and-remember a server chain after a TLS
//!   failure, keyed by `address:port`.
//! * [`IdentityProvider`]: generate-or-load the client identity used when
//!   a server target names no certificate.
//!
//! Both are called from `spawn_blocking`; real implementations may touch
//! disk or a keystore.  The in-memory versions here back the loopback
//! binary and the tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("certificate chain is empty")]
    EmptyChain,

    #[error("identity generation failed: {0}")]
    Identity(String),
}

/// Opaque reference to a client identity (certificate + key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityHandle(String);

impl IdentityHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// TrustStore
// ---------------------------------------------------------------------------

pub trait TrustStore: Send + Sync {
    /// Remember the leaf of `chain` as trusted for `alias`.
    fn accept_and_remember(&self, alias: &str, chain: &[Vec<u8>]) -> Result<(), TrustError>;

    fn is_trusted(&self, alias: &str) -> bool;
}

/// Process-lifetime trust store.
#[derive(Default)]
pub struct MemoryTrustStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The remembered leaf certificate for `alias`.
    pub fn certificate(&self, alias: &str) -> Option<Vec<u8>> {
        self.entries().get(alias).cloned()
    }
}

impl TrustStore for MemoryTrustStore {
    fn accept_and_remember(&self, alias: &str, chain: &[Vec<u8>]) -> Result<(), TrustError> {
        let leaf = chain.first().ok_or(TrustError::EmptyChain)?;
        self.entries().insert(alias.to_string(), leaf.clone());
        log::info!("trust: remembered certificate for {alias} ({} bytes)", leaf.len());
        Ok(())
    }

    fn is_trusted(&self, alias: &str) -> bool {
        self.entries().contains_key(alias)
    }
}

// ---------------------------------------------------------------------------
// IdentityProvider
// ---------------------------------------------------------------------------

pub trait IdentityProvider: Send + Sync {
    /// Return the identity for `username`, creating one on first use.
    fn load_or_generate(&self, username: &str) -> Result<IdentityHandle, TrustError>;
}

/// Hands out one stable, process-lifetime identity per username.
#[derive(Default)]
pub struct EphemeralIdentityProvider {
    issued: Mutex<HashMap<String, IdentityHandle>>,
}

impl EphemeralIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityProvider for EphemeralIdentityProvider {
    fn load_or_generate(&self, username: &str) -> Result<IdentityHandle, TrustError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(TrustError::Identity("username is empty".into()));
        }
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        let next = issued.len() + 1;
        let handle = issued
            .entry(username.to_string())
            .or_insert_with(|| {
                log::info!("trust: generated identity for {username}");
                IdentityHandle::new(format!("ephemeral-{next}-{username}"))
            })
            .clone();
        Ok(handle)
    }
}
