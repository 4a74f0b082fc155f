//! Inspect command - shows the stored record of one session.

use anyhow::Result;
use attrsession::{Attribute, RecordView, SessionActions};
use chrono::Utc;
use clap::Args;
use console::{Style, style};
use serde::Serialize;

use super::Context;

/// Arguments for the inspect command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Session id, without the item prefix
    pub session_id: String,

    /// Also print every raw attribute value
    #[arg(short, long)]
    pub raw: bool,
}

/// Decoded record state for JSON output.
#[derive(Debug, Serialize)]
struct InspectOutput {
    item: String,
    found: bool,
    attributes: Vec<(String, String)>,
    state: Option<RecordState>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecordState {
    expires: String,
    expired: bool,
    locked: bool,
    lock_id: u64,
    lock_age_secs: u64,
    initialize_item: bool,
    timeout_minutes: u32,
    chunks: usize,
    payload_bytes: Option<usize>,
}

/// Run the inspect command.
pub async fn run(args: InspectArgs, ctx: &Context) -> Result<()> {
    let store = ctx.record_store()?;
    let item = store.item_name(&args.session_id);
    let attributes = store.read_attributes(&args.session_id).await?;

    let (state, error) = if attributes.is_empty() {
        (None, None)
    } else {
        match RecordView::parse(&attributes) {
            Ok(view) => {
                let payload_bytes = store.codec().decode(&view.chunks).ok().map(|p| p.len());
                (Some(record_state(&view, payload_bytes)), None)
            }
            Err(e) => (None, Some(e.to_string())),
        }
    };

    let output = InspectOutput {
        item,
        found: !attributes.is_empty(),
        attributes: attributes.iter().map(|a| (a.name.clone(), a.value.clone())).collect(),
        state,
        error,
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_human(&output, &attributes, args.raw || ctx.verbose);
    }

    Ok(())
}

fn record_state(view: &RecordView, payload_bytes: Option<usize>) -> RecordState {
    let now = Utc::now();
    RecordState {
        expires: view.raw_expires.clone(),
        expired: view.is_expired(now),
        locked: view.locked,
        lock_id: view.lock_id.get(),
        lock_age_secs: view.lock_age(now).as_secs(),
        initialize_item: view.actions.contains(SessionActions::INITIALIZE_ITEM),
        timeout_minutes: view.timeout_minutes,
        chunks: view.chunks.len(),
        payload_bytes,
    }
}

fn print_human(output: &InspectOutput, attributes: &[Attribute], raw: bool) {
    let dim = Style::new().dim();
    let green = Style::new().green();
    let red = Style::new().red();
    let yellow = Style::new().yellow();

    println!();
    println!("{}", style(&output.item).bold());
    println!("{}", dim.apply_to("─".repeat(40)));

    if !output.found {
        println!("  {}", dim.apply_to("no record"));
        println!();
        return;
    }

    if let Some(state) = &output.state {
        let status = if state.expired {
            red.apply_to("● expired")
        } else if state.locked {
            yellow.apply_to("● locked")
        } else {
            green.apply_to("● active")
        };
        println!("  {} {}", dim.apply_to("Status:  "), status);
        println!("  {} {}", dim.apply_to("Expires: "), state.expires);
        println!("  {} {}", dim.apply_to("Timeout: "), format!("{} min", state.timeout_minutes));
        println!("  {} {}", dim.apply_to("Lock id: "), state.lock_id);
        println!("  {} {}s", dim.apply_to("Lock age:"), state.lock_age_secs);
        if state.initialize_item {
            println!("  {} uninitialized", dim.apply_to("Flags:   "));
        }
        match state.payload_bytes {
            Some(bytes) => println!(
                "  {} {} bytes in {} chunk(s)",
                dim.apply_to("Payload: "),
                bytes,
                state.chunks
            ),
            None => println!(
                "  {} {}",
                dim.apply_to("Payload: "),
                red.apply_to(format!("undecodable ({} chunks)", state.chunks))
            ),
        }
    }

    if let Some(error) = &output.error {
        println!("  {} {}", dim.apply_to("Status:  "), red.apply_to("● malformed"));
        println!("  {} {}", dim.apply_to("Error:   "), error);
    }

    if raw {
        println!();
        for attr in attributes {
            println!("  {:<14} {}", attr.name, attr.value);
        }
    }

    println!();
}
