//! Options for the session record store.

use std::time::Duration;

use crate::codec::MIN_VALUE_BYTES;
use crate::error::{Error, Result};
use crate::lock::DEFAULT_MAX_LOCK_AGE;

/// Default item-name prefix.
pub const DEFAULT_PREFIX: &str = "session";

/// Default session timeout (20 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// SimpleDB's limit on the size of a single attribute value.
pub const DEFAULT_MAX_VALUE_BYTES: usize = 1024;

/// Default interval of the background expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Options for the session record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Prefix of every item name, `prefix-<session id>`.
    /// Lets several applications share one domain.
    pub prefix: String,

    /// Timeout applied to new records and lock releases.
    pub session_timeout: Duration,

    /// Deflate payloads before encoding.
    /// Readers and writers of a domain must agree on this.
    pub compress: bool,

    /// Age after which a held lock may be stolen.
    pub max_lock_age: Duration,

    /// Largest attribute value the store accepts, in bytes.
    pub max_value_bytes: usize,

    /// Delete expired records when a read finds them.
    pub delete_expired_on_read: bool,

    /// Whether a background sweeper should run.
    pub enable_sweeper: bool,

    /// Interval of the background sweeper.
    pub sweep_interval: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            compress: false,
            max_lock_age: DEFAULT_MAX_LOCK_AGE,
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
            delete_expired_on_read: false,
            enable_sweeper: true,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl StoreOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    pub fn with_max_lock_age(mut self, age: Duration) -> Self {
        self.max_lock_age = age;
        self
    }

    pub fn with_max_value_bytes(mut self, bytes: usize) -> Self {
        self.max_value_bytes = bytes;
        self
    }

    /// Enable or disable deleting expired records found by reads.
    pub fn with_delete_expired_on_read(mut self, enabled: bool) -> Self {
        self.delete_expired_on_read = enabled;
        self
    }

    /// Enable or disable the background sweeper.
    pub fn with_sweeper(mut self, enabled: bool) -> Self {
        self.enable_sweeper = enabled;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Whole minutes of the session timeout, at least one.
    pub fn timeout_minutes(&self) -> u32 {
        minutes(self.session_timeout)
    }

    /// Check the options for values the store cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.prefix.trim().is_empty() {
            return Err(Error::InvalidConfig("prefix must not be empty".into()));
        }
        if self.session_timeout.is_zero() {
            return Err(Error::InvalidConfig("session timeout must be positive".into()));
        }
        if self.max_value_bytes < MIN_VALUE_BYTES {
            return Err(Error::InvalidConfig(format!(
                "max_value_bytes must be at least {}",
                MIN_VALUE_BYTES
            )));
        }
        if self.enable_sweeper && self.sweep_interval.is_zero() {
            return Err(Error::InvalidConfig("sweep interval must be positive".into()));
        }
        Ok(())
    }
}

/// Round a duration up to whole minutes, at least one.
pub(crate) fn minutes(duration: Duration) -> u32 {
    let mins = duration.as_secs().div_ceil(60).max(1);
    u32::try_from(mins).unwrap_or(u32::MAX)
}
