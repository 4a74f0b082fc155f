//! CLI command handlers.

pub mod config;
pub mod init;
pub mod inspect;
pub mod sweep;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use attrsession::{SessionRecordStore, SimpleDbStore};
use attrsession_config::{AttrSessionConfig, ConfigSource};

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Effective configuration.
    pub config: AttrSessionConfig,
    /// Config files that were considered.
    pub sources: Vec<ConfigSource>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Client for the configured SimpleDB domain.
    pub fn simpledb(&self) -> Result<SimpleDbStore> {
        self.config
            .validate()
            .context("configuration is invalid")?;

        let store = self.config.store();
        let creds = attrsession_config::resolve_credentials(&store)?;
        tracing::debug!(
            access_key = %creds.access_key.source,
            secret_key = %creds.secret_key.source,
            "resolved store credentials"
        );

        let client = SimpleDbStore::builder()
            .endpoint(store.endpoint.clone())
            .domain(store.domain.clone())
            .credentials(creds.access_key.value, creds.secret_key.value)
            .timeout(store.timeout())
            .build()
            .with_context(|| format!("cannot create client for {}", store.endpoint))?;
        Ok(client)
    }

    /// Session record store over the configured domain.
    pub fn record_store(&self) -> Result<SessionRecordStore<SimpleDbStore>> {
        let client = Arc::new(self.simpledb()?);
        Ok(SessionRecordStore::new(client, self.config.store_options())?)
    }
}
