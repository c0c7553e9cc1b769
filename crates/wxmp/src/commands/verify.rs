//! Verify command - check a server-validation signature.

use anyhow::Result;
use clap::Args;
use console::style;
use wxmp_oauth::{compute_signature, verify_signature};

use super::Context;

/// Arguments for the verify command.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// `timestamp` query parameter
    #[arg(long)]
    pub timestamp: String,

    /// `nonce` query parameter
    #[arg(long)]
    pub nonce: String,

    /// `signature` query parameter
    #[arg(long)]
    pub signature: String,

    /// Shared token (default: `server.validation_token` from config)
    #[arg(long)]
    pub token: Option<String>,
}

/// Run the verify command.
pub async fn run(args: VerifyArgs, ctx: &Context) -> Result<()> {
    let token = args
        .token
        .unwrap_or_else(|| ctx.config.server().validation_token);

    if verify_signature(&token, &args.timestamp, &args.nonce, &args.signature) {
        println!("{} signature valid", style("✓").green());
        return Ok(());
    }

    if ctx.verbose {
        eprintln!(
            "expected {}",
            compute_signature(&token, &args.timestamp, &args.nonce)
        );
    }
    anyhow::bail!("signature mismatch")
}
