//! Configuration for attrsession.
//!
//! Provides TOML-based configuration with:
//! - Store connection, session protocol, sweeper and logging sections
//! - Config file layering (user config + project-local overrides)
//! - Credential resolution (env var → config file)
//! - Conversion into [`attrsession::StoreOptions`]

pub mod discovery;
pub mod error;
pub mod secrets;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    load_explicit, save_config, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use secrets::{
    ACCESS_KEY_ENV, Credentials, ResolvedSecret, SECRET_KEY_ENV, SecretSource,
    resolve_credentials, resolve_secret,
};
pub use types::*;
