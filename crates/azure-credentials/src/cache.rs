//! Process-wide authorizer cache
//!
//! Scopes that resolve to the same tenant, cloud, subscription and client
//! share one [`Authorizer`] for the lifetime of the controller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::identity::Authorizer;

/// Authorizers keyed by [`crate::clients::hash_key`]
#[derive(Debug, Default)]
pub struct AuthorizerCache {
    entries: Mutex<HashMap<String, Arc<Authorizer>>>,
}

impl AuthorizerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached authorizer for `key`, or `authorizer` stored under it
    pub fn share(&self, key: String, authorizer: Authorizer) -> Arc<Authorizer> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.get(&key) {
            debug!(key = %key, "reusing cached authorizer");
            return Arc::clone(existing);
        }
        let shared = Arc::new(authorizer);
        entries.insert(key, Arc::clone(&shared));
        shared
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
