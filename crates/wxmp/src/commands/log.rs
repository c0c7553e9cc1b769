//! Log command - diagnostic entry lookup.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};

use super::Context;

/// Arguments for the log command.
#[derive(Args, Debug)]
pub struct LogArgs {
    #[command(subcommand)]
    pub command: LogCommand,
}

#[derive(Subcommand, Debug)]
pub enum LogCommand {
    /// Print the diagnostic entry written for a failed call
    Show {
        /// Identifier returned with the failure
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Run the log command.
pub async fn run(args: LogArgs, ctx: &Context) -> Result<()> {
    match args.command {
        LogCommand::Show { id, json } => cmd_show(&id, json, ctx),
    }
}

fn cmd_show(id: &str, json: bool, ctx: &Context) -> Result<()> {
    let sink = ctx.open_diagnostics()?;
    let Some(entry) = sink.fetch(id)? else {
        anyhow::bail!("no diagnostic entry with id {}", id);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style(&entry.name).bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("Id:"), entry.id);
    println!(
        "  {} {}",
        dim.apply_to("Recorded:"),
        entry.recorded_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
    );
    if ctx.verbose {
        println!("  {} {:?}", dim.apply_to("Backend:"), ctx.config.diagnostics().backend);
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&entry.data)?);
    Ok(())
}
