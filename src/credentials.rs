// src/credentials.rs

//! Credentials lookup used by the dependency resolver and task cleanup.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub id: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

pub trait CredentialsManager: Send + Sync + fmt::Debug {
    fn set(&self, credentials: Credentials);
    /// Whether credentials with this id are available.
    fn resolve(&self, id: &str) -> bool;
    fn remove(&self, id: &str);
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialsManager {
    entries: RwLock<HashMap<String, Credentials>>,
}

impl InMemoryCredentialsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Credentials> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

impl CredentialsManager for InMemoryCredentialsManager {
    fn set(&self, credentials: Credentials) {
        debug!(id = %credentials.id, "storing credentials");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(credentials.id.clone(), credentials);
    }

    fn resolve(&self, id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    fn remove(&self, id: &str) {
        if self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
        {
            debug!(%id, "removed credentials");
        }
    }
}
