//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use attrsession_config::AttrSessionConfig;

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration with secrets masked
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./attrsession.toml) instead of user config
        #[arg(long)]
        local: bool,
    },

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Which => cmd_which(ctx),
        ConfigCommand::Init { local } => cmd_init(local),
        ConfigCommand::Path => cmd_path(),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let effective = effective(&ctx.config).redacted();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&effective)?);
        return Ok(());
    }

    println!("# attrsession configuration\n");
    let loaded: Vec<_> = ctx.sources.iter().filter(|s| s.loaded).collect();
    if loaded.is_empty() {
        println!("# No config files loaded (using defaults)\n");
    } else {
        for source in loaded {
            println!("# from {}", source.path.display());
        }
        println!();
    }
    println!("{}", effective.to_toml()?);

    if let Err(e) = ctx.config.validate() {
        println!("# ⚠ {}", e);
    }
    Ok(())
}

fn cmd_which(ctx: &Context) -> Result<()> {
    if ctx.json_output {
        let sources: Vec<_> = ctx
            .sources
            .iter()
            .map(|s| serde_json::json!({ "path": s.path, "loaded": s.loaded }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    println!("Config file search order (later overrides earlier):\n");
    for source in &ctx.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }
    println!();

    let loaded_count = ctx.sources.iter().filter(|s| s.loaded).count();
    if loaded_count == 0 {
        println!("No config files found. Run 'attrsession config init' to create one.");
    } else {
        println!("{} config file(s) loaded.", loaded_count);
    }
    Ok(())
}

fn cmd_init(local: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("attrsession.toml")
    } else {
        attrsession_config::user_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    attrsession_config::save_config(&effective(&AttrSessionConfig::new()), &path)?;
    println!("✓ Created {}", path.display());
    println!(
        "  Set {} and {} to provide credentials.",
        attrsession_config::ACCESS_KEY_ENV,
        attrsession_config::SECRET_KEY_ENV
    );
    Ok(())
}

fn cmd_path() -> Result<()> {
    match attrsession_config::user_config_path() {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => anyhow::bail!("Could not determine config directory"),
    }
}

/// Fill every omitted section with its defaults so all settings are visible.
fn effective(config: &AttrSessionConfig) -> AttrSessionConfig {
    AttrSessionConfig {
        store: Some(config.store()),
        session: Some(config.session()),
        sweeper: Some(config.sweeper()),
        logging: Some(config.logging()),
    }
}
