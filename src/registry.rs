// Supplier registry: which sources exist, whether they are active and
// healthy, and in what order they should be queried. Administrative
// edits happen elsewhere; this core only reads configs and writes
// health state back after live attempts.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierConfig {
    pub code: String,
    // Driver identifier, resolved by the driver factory (closed set)
    pub driver: String,
    pub base_url: String,
    pub is_active: bool,
    // Higher priority is served first
    pub priority: i32,
    pub timeout_seconds: u64,
    pub retry_times: u32,
    pub is_healthy: bool,
    pub last_health_check: Option<DateTime<Utc>>,
    // Free-form supplier-specific knobs (endpoints, markets, inventory)
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl SupplierConfig {
    pub fn new(code: &str, driver: &str, base_url: &str) -> Self {
        Self {
            code: code.to_string(),
            driver: driver.to_string(),
            base_url: base_url.to_string(),
            is_active: true,
            priority: 0,
            timeout_seconds: 10,
            retry_times: 2,
            is_healthy: true,
            last_health_check: None,
            settings: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Default)]
pub struct SupplierRegistry {
    suppliers: DashMap<String, SupplierConfig>,
}

impl SupplierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, config: SupplierConfig) {
        self.suppliers.insert(config.code.clone(), config);
    }

    pub fn get(&self, code: &str) -> Option<SupplierConfig> {
        self.suppliers.get(code).map(|entry| entry.clone())
    }

    // Request-scoped snapshot: active sources, highest priority first.
    // Unhealthy sources are NOT filtered here; callers decide whether to
    // skip them or attempt them with reduced expectations. An empty
    // result is a degraded outcome, never an error.
    pub fn list_candidates(&self) -> Vec<SupplierConfig> {
        let mut candidates: Vec<SupplierConfig> = self
            .suppliers
            .iter()
            .filter(|entry| entry.is_active)
            .map(|entry| entry.clone())
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.code.cmp(&b.code)));
        candidates
    }

    pub fn mark_healthy(&self, code: &str) {
        self.set_health(code, true);
    }

    pub fn mark_unhealthy(&self, code: &str) {
        self.set_health(code, false);
    }

    fn set_health(&self, code: &str, healthy: bool) {
        if let Some(mut entry) = self.suppliers.get_mut(code) {
            if entry.is_healthy != healthy {
                info!(supplier = code, healthy, "supplier health changed");
            }
            entry.is_healthy = healthy;
            entry.last_health_check = Some(Utc::now());
        }
    }
}

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("No credential configured for supplier {0}")]
    Missing(String),
}

// Explicit secret-access seam. Credentials are decrypted only at the
// point of driver construction and never travel on SupplierConfig, in
// logs, or in normalized output. A production store wraps a KMS-backed
// backend behind this same trait.
pub trait SecretStore: Send + Sync {
    fn credential(&self, supplier_code: &str) -> Result<String, SecretError>;
}

#[derive(Default)]
pub struct InMemoryVault {
    secrets: RwLock<HashMap<String, String>>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, supplier_code: &str, credential: &str) {
        self.secrets
            .write()
            .insert(supplier_code.to_string(), credential.to_string());
    }
}

impl SecretStore for InMemoryVault {
    fn credential(&self, supplier_code: &str) -> Result<String, SecretError> {
        self.secrets
            .read()
            .get(supplier_code)
            .cloned()
            .ok_or_else(|| SecretError::Missing(supplier_code.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(code: &str, priority: i32, active: bool) -> SupplierConfig {
        SupplierConfig {
            priority,
            is_active: active,
            ..SupplierConfig::new(code, "http_api", "https://example.invalid")
        }
    }

    #[test]
    fn candidates_filter_inactive_and_sort_by_priority_desc() {
        let registry = SupplierRegistry::new();
        registry.register(config("charlie", 90, true));
        registry.register(config("alpha", 100, true));
        registry.register(config("bravo", 50, false));

        let candidates = registry.list_candidates();
        let codes: Vec<&str> = candidates.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["alpha", "charlie"]);
    }

    #[test]
    fn no_candidates_is_an_empty_list_not_an_error() {
        let registry = SupplierRegistry::new();
        registry.register(config("alpha", 10, false));
        assert!(registry.list_candidates().is_empty());
    }

    #[test]
    fn equal_priorities_keep_a_stable_order() {
        let registry = SupplierRegistry::new();
        registry.register(config("zulu", 10, true));
        registry.register(config("alpha", 10, true));

        let codes: Vec<String> = registry
            .list_candidates()
            .iter()
            .map(|c| c.code.clone())
            .collect();
        assert_eq!(codes, vec!["alpha", "zulu"]);
    }

    #[test]
    fn health_marks_update_flag_and_timestamp() {
        let registry = SupplierRegistry::new();
        registry.register(config("alpha", 10, true));

        registry.mark_unhealthy("alpha");
        let after_down = registry.get("alpha").unwrap();
        assert!(!after_down.is_healthy);
        assert!(after_down.last_health_check.is_some());

        registry.mark_healthy("alpha");
        assert!(registry.get("alpha").unwrap().is_healthy);

        // Unknown codes are ignored
        registry.mark_unhealthy("ghost");
    }

    #[test]
    fn vault_returns_credentials_only_for_known_suppliers() {
        let vault = InMemoryVault::new();
        vault.put("alpha", "api-key-123");

        assert_eq!(vault.credential("alpha").unwrap(), "api-key-123");
        assert!(matches!(
            vault.credential("bravo"),
            Err(SecretError::Missing(_))
        ));
    }
}
