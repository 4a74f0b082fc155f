//! Store credential resolution.
//!
//! Resolution order:
//! 1. Environment variable (`ATTRSESSION_ACCESS_KEY`, `ATTRSESSION_SECRET_KEY`)
//! 2. Config file (with warning)

use crate::error::{ConfigError, Result};
use crate::types::StoreConfig;

/// Environment variable holding the access key id.
pub const ACCESS_KEY_ENV: &str = "ATTRSESSION_ACCESS_KEY";

/// Environment variable holding the secret access key.
pub const SECRET_KEY_ENV: &str = "ATTRSESSION_SECRET_KEY";

/// Result of secret resolution with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    /// The secret value.
    pub value: String,
    /// Where the secret was found.
    pub source: SecretSource,
}

/// Where a secret was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Environment variable.
    EnvVar(String),
    /// Config file (plaintext, not recommended).
    ConfigFile,
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::EnvVar(var) => write!(f, "env var {}", var),
            SecretSource::ConfigFile => write!(f, "config file (plaintext)"),
        }
    }
}

/// Both halves of a store credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key: ResolvedSecret,
    pub secret_key: ResolvedSecret,
}

/// Resolve one secret from the process environment, then the config value.
pub fn resolve_secret(env_var: &str, config_value: Option<&str>) -> Option<ResolvedSecret> {
    resolve_secret_with(env_var, config_value, |name| std::env::var(name).ok())
}

/// Resolve one secret using `lookup` to read environment variables.
pub fn resolve_secret_with<F>(
    env_var: &str,
    config_value: Option<&str>,
    lookup: F,
) -> Option<ResolvedSecret>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(env_var)
        && !value.is_empty()
    {
        return Some(ResolvedSecret {
            value,
            source: SecretSource::EnvVar(env_var.to_string()),
        });
    }

    config_value
        .filter(|v| !v.is_empty())
        .map(|v| ResolvedSecret {
            value: v.to_string(),
            source: SecretSource::ConfigFile,
        })
}

/// Resolve both store credentials from the environment and `store`.
pub fn resolve_credentials(store: &StoreConfig) -> Result<Credentials> {
    resolve_credentials_with(store, |name| std::env::var(name).ok())
}

/// [`resolve_credentials`] with an explicit environment lookup.
pub fn resolve_credentials_with<F>(store: &StoreConfig, lookup: F) -> Result<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    let access_key = resolve_secret_with(ACCESS_KEY_ENV, store.access_key.as_deref(), &lookup)
        .ok_or_else(|| ConfigError::MissingCredential {
            name: "access key".to_string(),
            env_var: ACCESS_KEY_ENV.to_string(),
            field: "access_key".to_string(),
        })?;

    let secret_key = resolve_secret_with(SECRET_KEY_ENV, store.secret_key.as_deref(), &lookup)
        .ok_or_else(|| ConfigError::MissingCredential {
            name: "secret key".to_string(),
            env_var: SECRET_KEY_ENV.to_string(),
            field: "secret_key".to_string(),
        })?;

    Ok(Credentials {
        access_key,
        secret_key,
    })
}
