//! Tenant Cache
//!
//! Client-side cache whose keys are namespaced by gym id, so data cached for
//! one gym can never be served to another. Cleared on every logout.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Tenant-namespaced JSON cache.
#[derive(Default)]
pub struct TenantCache {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl TenantCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn scoped_key(tenant_id: &str, key: &str) -> String {
        format!("{}::{}", tenant_id, key)
    }

    /// Store a value for a tenant.
    pub fn insert<T: Serialize>(&self, tenant_id: &str, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.lock().insert(Self::scoped_key(tenant_id, key), value);
            }
            Err(e) => tracing::debug!(error = %e, key, "Skipped caching unserializable value"),
        }
    }

    /// Read a value for a tenant.
    pub fn get<T: DeserializeOwned>(&self, tenant_id: &str, key: &str) -> Option<T> {
        let value = self.lock().get(&Self::scoped_key(tenant_id, key)).cloned()?;
        serde_json::from_value(value).ok()
    }

    /// Drop one tenant's entries.
    pub fn clear_tenant(&self, tenant_id: &str) {
        let prefix = Self::scoped_key(tenant_id, "");
        self.lock().retain(|k, _| !k.starts_with(&prefix));
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, serde_json::Value>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
