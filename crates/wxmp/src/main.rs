//! wxmp - WeChat platform credential manager
//!
//! Main entry point for the wxmp CLI.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use wxmp_config::Settings;

mod commands;

use commands::{call, log, serve, store, token, verify};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// wxmp - WeChat platform credential manager and OAuth callback server
#[derive(Parser)]
#[command(name = "wxmp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration directory (default: platform config dir)
    #[arg(long, global = true, env = "WXMP_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect or seed the config store
    Store(store::StoreArgs),

    /// Show or refresh the access credential
    Token(token::TokenArgs),

    /// Make an authenticated platform call
    Call(call::CallArgs),

    /// Diagnostic log lookup
    Log(log::LogArgs),

    /// Check a server-validation signature
    Verify(verify::VerifyArgs),

    /// Run the OAuth callback server
    Serve(serve::ServeArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = wxmp_config::config_dir(cli.config_dir.as_deref());
    let settings = Settings::load(&config_dir, Path::new("."))?;

    // Initialize tracing: console (human-readable, stderr) + rotating JSON file
    let filter = if cli.verbose {
        "wxmp=debug,wxmp_oauth=debug,wxmp_store=debug,wxmp_config=debug,tower_http=debug,info"
    } else {
        "wxmp=info,wxmp_oauth=info,wxmp_store=info,warn"
    };

    let file_appender = tracing_appender::rolling::daily(&settings.paths.log_dir, "wxmp.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "wxmp=trace,wxmp_oauth=trace,wxmp_store=trace,wxmp_config=trace,tower_http=debug,info",
                )),
        )
        .init();

    for warning in &settings.warnings {
        tracing::warn!("{}", warning);
    }
    for path in &settings.layers {
        tracing::debug!(path = %path.display(), "loaded config");
    }

    let ctx = commands::Context::new(settings, cli.verbose);

    match cli.command {
        Commands::Store(args) => store::run(args, &ctx).await,
        Commands::Token(args) => token::run(args, &ctx).await,
        Commands::Call(args) => call::run(args, &ctx).await,
        Commands::Log(args) => log::run(args, &ctx).await,
        Commands::Verify(args) => verify::run(args, &ctx).await,
        Commands::Serve(args) => serve::run(args, &ctx).await,
    }
}
