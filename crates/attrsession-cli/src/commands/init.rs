//! Init command - provisions the SimpleDB domain.

use anyhow::Result;
use clap::Args;

use super::Context;

/// Arguments for the init command.
#[derive(Args, Debug)]
pub struct InitArgs {}

/// Run the init command. Creating an existing domain is a no-op.
pub async fn run(_args: InitArgs, ctx: &Context) -> Result<()> {
    let client = ctx.simpledb()?;
    client.create_domain().await?;

    if ctx.json_output {
        println!(
            "{}",
            serde_json::json!({ "domain": client.domain(), "endpoint": client.endpoint().as_str() })
        );
    } else {
        println!("Domain '{}' ready at {}", client.domain(), client.endpoint());
    }
    Ok(())
}
