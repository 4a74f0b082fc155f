//! Configuration types mapping to the TOML schema.
//!
//! ```toml
//! [store]       # SimpleDB endpoint, domain and credentials
//! [session]     # record protocol settings
//! [sweeper]     # background expiry sweep
//! [logging]     # CLI log output
//! ```

use std::path::PathBuf;
use std::time::Duration;

use attrsession::StoreOptions;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttrSessionConfig {
    /// Remote store connection.
    pub store: Option<StoreConfig>,

    /// Session record protocol.
    pub session: Option<SessionConfig>,

    /// Background expiry sweeper.
    pub sweeper: Option<SweeperConfig>,

    /// Log output.
    pub logging: Option<LoggingConfig>,
}

impl AttrSessionConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, as in the file they came from.
    pub fn merge(&mut self, other: AttrSessionConfig) {
        if other.store.is_some() {
            self.store = other.store;
        }
        if other.session.is_some() {
            self.session = other.session;
        }
        if other.sweeper.is_some() {
            self.sweeper = other.sweeper;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }
    }

    /// Store section, or defaults.
    pub fn store(&self) -> StoreConfig {
        self.store.clone().unwrap_or_default()
    }

    /// Session section, or defaults.
    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    /// Sweeper section, or defaults.
    pub fn sweeper(&self) -> SweeperConfig {
        self.sweeper.clone().unwrap_or_default()
    }

    /// Logging section, or defaults.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Check every section for values the store cannot work with.
    pub fn validate(&self) -> Result<()> {
        let store = self.store();
        if store.domain.trim().is_empty() {
            return Err(ConfigError::invalid("store.domain", "must not be empty"));
        }
        if store.endpoint.trim().is_empty() {
            return Err(ConfigError::invalid("store.endpoint", "must not be empty"));
        }
        if store.timeout_secs == 0 {
            return Err(ConfigError::invalid("store.timeout_secs", "must be positive"));
        }

        let session = self.session();
        if session.prefix.trim().is_empty() {
            return Err(ConfigError::invalid("session.prefix", "must not be empty"));
        }
        if session.timeout_minutes == 0 {
            return Err(ConfigError::invalid("session.timeout_minutes", "must be positive"));
        }
        if session.max_value_bytes < attrsession::codec::MIN_VALUE_BYTES {
            return Err(ConfigError::invalid(
                "session.max_value_bytes",
                format!("must be at least {}", attrsession::codec::MIN_VALUE_BYTES),
            ));
        }

        let sweeper = self.sweeper();
        if sweeper.interval_secs == 0 {
            return Err(ConfigError::invalid("sweeper.interval_secs", "must be positive"));
        }

        Ok(())
    }

    /// Options for the session record store.
    pub fn store_options(&self) -> StoreOptions {
        let session = self.session();
        let sweeper = self.sweeper();

        StoreOptions::new()
            .with_prefix(session.prefix)
            .with_session_timeout(Duration::from_secs(u64::from(session.timeout_minutes) * 60))
            .with_compression(session.compress)
            .with_max_lock_age(Duration::from_secs(session.max_lock_age_secs))
            .with_max_value_bytes(session.max_value_bytes)
            .with_delete_expired_on_read(session.delete_expired_on_read)
            .with_sweeper(sweeper.enabled)
            .with_sweep_interval(Duration::from_secs(sweeper.interval_secs))
    }

    /// Copy with credentials masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if let Some(store) = copy.store.as_mut() {
            store.access_key = store.access_key.as_ref().map(|_| REDACTED.to_string());
            store.secret_key = store.secret_key.as_ref().map(|_| REDACTED.to_string());
        }
        copy
    }
}

const REDACTED: &str = "********";

// ─────────────────────────────────────────────────────────────────────────────
// Store Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Remote store connection.
///
/// ```toml
/// [store]
/// endpoint = "https://sdb.eu-west-1.amazonaws.com"
/// domain = "sessions"
/// timeout_secs = 10
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Service endpoint URL.
    pub endpoint: String,
    /// Domain holding the session records.
    pub domain: String,
    /// Access key id. Prefer `ATTRSESSION_ACCESS_KEY`.
    pub access_key: Option<String>,
    /// Secret access key. Prefer `ATTRSESSION_SECRET_KEY`.
    pub secret_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: attrsession::backend::DEFAULT_ENDPOINT.to_string(),
            domain: "sessions".to_string(),
            access_key: None,
            secret_key: None,
            timeout_secs: 10,
        }
    }
}

impl StoreConfig {
    /// Check if the section carries a plaintext credential.
    pub fn has_plaintext_secret(&self) -> bool {
        self.secret_key.is_some() || self.access_key.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Session record protocol settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Item name prefix.
    pub prefix: String,
    /// Session timeout in minutes.
    pub timeout_minutes: u32,
    /// Deflate payloads. Every reader and writer of a domain must agree.
    pub compress: bool,
    /// Seconds after which a held lock may be stolen.
    pub max_lock_age_secs: u64,
    /// Largest attribute value the store accepts.
    pub max_value_bytes: usize,
    /// Delete expired records when a read finds them.
    pub delete_expired_on_read: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            prefix: attrsession::DEFAULT_PREFIX.to_string(),
            timeout_minutes: 20,
            compress: false,
            max_lock_age_secs: attrsession::DEFAULT_MAX_LOCK_AGE.as_secs(),
            max_value_bytes: attrsession::DEFAULT_MAX_VALUE_BYTES,
            delete_expired_on_read: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sweeper Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Background expiry sweeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    /// Seconds between sweeps.
    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: attrsession::DEFAULT_SWEEP_INTERVAL.as_secs(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Log output of the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Also write JSON logs to a daily rolling file.
    pub file: bool,
    /// Directory for log files. Defaults to `<config dir>/logs`.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "attrsession=info".to_string(),
            file: false,
            dir: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
