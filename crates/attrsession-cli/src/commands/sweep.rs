//! Sweep command - deletes expired session records once.

use anyhow::Result;
use attrsession::SweepReport;
use clap::Args;
use console::Style;
use serde::Serialize;

use super::Context;

/// Arguments for the sweep command.
#[derive(Args, Debug)]
pub struct SweepArgs {}

#[derive(Debug, Serialize)]
struct SweepOutput {
    prefix: String,
    scanned: usize,
    deleted: usize,
    skipped: usize,
    failed: usize,
}

impl SweepOutput {
    fn new(prefix: &str, report: SweepReport) -> Self {
        Self {
            prefix: prefix.to_string(),
            scanned: report.scanned,
            deleted: report.deleted,
            skipped: report.skipped,
            failed: report.failed,
        }
    }
}

/// Run the sweep command.
pub async fn run(_args: SweepArgs, ctx: &Context) -> Result<()> {
    let store = ctx.record_store()?;
    let report = store.sweeper().sweep_once().await?;
    let output = SweepOutput::new(&store.options().prefix, report);

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!(
        "{} expired under '{}-': {} deleted, {} skipped, {} failed",
        output.scanned, output.prefix, output.deleted, output.skipped, output.failed
    );
    if output.skipped > 0 {
        println!(
            "{}",
            dim.apply_to("Skipped records were renewed or removed during the sweep.")
        );
    }

    if output.failed > 0 {
        anyhow::bail!("{} record(s) could not be deleted", output.failed);
    }
    Ok(())
}
