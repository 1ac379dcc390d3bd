//! Tenant-level shared secrets.
//!
//! Keys come from two optional sources, merged with the file taking
//! precedence:
//! - an inline list `tenant=key,tenant=key`
//! - a JSON file holding an object `{ "tenant": "key" }`
//!
//! A tenant with no configured key is rejected (fail closed).

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use jobstream_core::TenantId;

use crate::secret::secure_eq;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("missing tenant key")]
    Missing,

    #[error("invalid tenant key")]
    Invalid,

    #[error("no key configured for tenant {0}")]
    UnknownTenant(TenantId),
}

#[derive(Debug, Error)]
pub enum TenantKeysError {
    #[error("malformed tenant key entry: {0}")]
    MalformedEntry(String),

    #[error("invalid tenant id in key list: {0}")]
    InvalidTenant(String),

    #[error("failed to read tenant keys file: {0}")]
    Io(#[from] std::io::Error),

    #[error("tenant keys file is not a JSON object of strings: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Default)]
pub struct TenantKeys {
    keys: HashMap<TenantId, String>,
}

impl TenantKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, tenant: TenantId, key: impl Into<String>) -> Self {
        self.keys.insert(tenant, key.into());
        self
    }

    /// Parse `tenant=key` pairs separated by commas. Blank entries are skipped.
    pub fn parse_list(raw: &str) -> Result<Self, TenantKeysError> {
        let mut keys = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (tenant, key) = entry
                .split_once('=')
                .ok_or_else(|| TenantKeysError::MalformedEntry(entry.to_string()))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(TenantKeysError::MalformedEntry(entry.to_string()));
            }
            let tenant = TenantId::parse(tenant.trim())
                .map_err(|_| TenantKeysError::InvalidTenant(tenant.trim().to_string()))?;
            keys.insert(tenant, key.to_string());
        }
        Ok(Self { keys })
    }

    pub fn from_json(raw: &str) -> Result<Self, TenantKeysError> {
        let map: HashMap<String, String> = serde_json::from_str(raw)?;
        let mut keys = HashMap::with_capacity(map.len());
        for (tenant, key) in map {
            let id = TenantId::parse(tenant.as_str())
                .map_err(|_| TenantKeysError::InvalidTenant(tenant.clone()))?;
            keys.insert(id, key);
        }
        Ok(Self { keys })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TenantKeysError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let keys = Self::from_json(&raw)?;
        debug!(path = %path.display(), tenants = keys.len(), "loaded tenant keys file");
        Ok(keys)
    }

    /// Merge `other` into `self`; `other` wins on conflicts.
    pub fn merge(mut self, other: TenantKeys) -> Self {
        self.keys.extend(other.keys);
        self
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.keys.contains_key(tenant)
    }

    pub fn verify(&self, tenant: &TenantId, presented: Option<&str>) -> Result<(), KeyError> {
        let expected = self
            .keys
            .get(tenant)
            .ok_or_else(|| KeyError::UnknownTenant(tenant.clone()))?;
        let presented = presented.ok_or(KeyError::Missing)?;
        if secure_eq(presented, expected) {
            Ok(())
        } else {
            Err(KeyError::Invalid)
        }
    }
}

impl core::fmt::Debug for TenantKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut tenants: Vec<&str> = self.keys.keys().map(TenantId::as_str).collect();
        tenants.sort_unstable();
        f.debug_struct("TenantKeys").field("tenants", &tenants).finish()
    }
}
