//! App secret ring and period salts
//!
//! The app secret never reaches the store: periods record only the version
//! label, and the ring resolves it again when a retained period is linked.
//! Values are held in `SecretString` so they stay out of logs and Debug output.

use crate::config::SecretsConfig;
use crate::error::{RetainlessError, Result};
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Random bytes per period salt
pub const SALT_BYTES: usize = 128;

/// Shareable secret value used as hashing input
#[derive(Clone)]
pub struct HashSecret(Arc<SecretString>);

impl HashSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::from(value.into())))
    }

    /// Generate a fresh base64-encoded period salt
    pub fn generate_salt() -> Self {
        let mut bytes = vec![0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(base64::engine::general_purpose::STANDARD.encode(&bytes))
    }

    pub(crate) fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for HashSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HashSecret([REDACTED])")
    }
}

/// Versioned app secrets; the current version hashes new periods
pub struct SecretRing {
    current_version: String,
    versions: HashMap<String, HashSecret>,
}

impl SecretRing {
    /// Build a ring from configuration
    ///
    /// Fails if no current version is named or the named version has no value.
    pub fn from_config(config: &SecretsConfig) -> Result<Self> {
        let current_version = config
            .current
            .clone()
            .filter(|version| !version.is_empty())
            .ok_or_else(|| {
                RetainlessError::Secret(
                    "No current secret version. Set RETAINLESS_SECRETS__CURRENT".to_string(),
                )
            })?;

        let versions: HashMap<String, HashSecret> = config
            .versions
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(version, value)| (version.clone(), HashSecret::new(value.clone())))
            .collect();

        if !versions.contains_key(&current_version) {
            return Err(RetainlessError::Secret(format!(
                "Current secret version '{}' has no value. Set RETAINLESS_SECRETS__VERSIONS__{}",
                current_version,
                current_version.to_uppercase()
            )));
        }

        debug!(
            "Secret ring loaded ({} versions, current: {})",
            versions.len(),
            current_version
        );

        Ok(Self {
            current_version,
            versions,
        })
    }

    /// Ring holding a single version, mostly for tests and tooling
    pub fn single(version: impl Into<String>, value: impl Into<String>) -> Self {
        let version = version.into();
        let mut versions = HashMap::new();
        versions.insert(version.clone(), HashSecret::new(value));
        Self {
            current_version: version,
            versions,
        }
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn current(&self) -> &HashSecret {
        // from_config and single both guarantee the current version exists
        &self.versions[&self.current_version]
    }

    /// Look up a retired secret by version label
    pub fn resolve(&self, version: &str) -> Option<HashSecret> {
        self.versions.get(version).cloned()
    }
}
