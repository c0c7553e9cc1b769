//! Token command - access credential status and refresh.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};
use wxmp_oauth::CredentialStatus;

use super::{Context, spinner};

/// Arguments for the token command.
#[derive(Args, Debug)]
pub struct TokenArgs {
    #[command(subcommand)]
    pub command: TokenCommand,
}

#[derive(Subcommand, Debug)]
pub enum TokenCommand {
    /// Show the persisted credential without refreshing it
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Issue a new credential from the platform
    Refresh,
}

/// Run the token command.
pub async fn run(args: TokenArgs, ctx: &Context) -> Result<()> {
    match args.command {
        TokenCommand::Status { json } => cmd_status(json, ctx).await,
        TokenCommand::Refresh => cmd_refresh(ctx).await,
    }
}

async fn cmd_status(json: bool, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let cache = ctx.credential_cache(store, ctx.transport()?)?;
    let status = cache.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    print_status(cache.identity().app_id(), &status);
    if status.stale {
        println!();
        println!("  Run 'wxmp token refresh' to issue a new credential.");
    }
    Ok(())
}

async fn cmd_refresh(ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let cache = ctx.credential_cache(store, ctx.transport()?)?;

    let pb = spinner("Requesting access credential...")?;
    let result = cache.refresh().await;
    pb.finish_and_clear();
    let credential = result?;

    println!(
        "{} Credential refreshed (expires {})",
        style("✓").green(),
        credential.expires_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

fn print_status(app_id: &str, status: &CredentialStatus) {
    let dim = Style::new().dim();

    println!();
    println!("{}", style("Access Credential").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("App ID:"), app_id);

    if !status.present {
        println!("  {} {}", dim.apply_to("Status:"), style("● missing").red());
        return;
    }

    let state = if status.stale {
        style("● stale").yellow()
    } else {
        style("● fresh").green()
    };
    println!("  {} {}", dim.apply_to("Status:"), state);
    if let Some(expires_at) = status.expires_at {
        println!(
            "  {} {} ({})",
            dim.apply_to("Expires:"),
            expires_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            status.expires_in_display()
        );
    }
}
