//! Call command - authenticated platform call.

use anyhow::{Context as _, Result};
use clap::Args;
use console::style;
use wxmp_oauth::{CallOutcome, WxError};

use super::{Context, spinner};

/// Arguments for the call command.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Platform API URL; the access credential is appended automatically
    pub url: String,

    /// JSON body. When present and non-empty the call is a POST
    #[arg(short, long)]
    pub body: Option<String>,

    /// Force a credential refresh before calling
    #[arg(long)]
    pub refresh: bool,
}

/// Run the call command.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let body: Option<serde_json::Value> = args
        .body
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("--body is not valid JSON")?;

    let client = ctx.connect_client(args.refresh).await?;
    if ctx.verbose {
        eprintln!("{} {}", style("→").dim(), args.url);
    }

    let pb = spinner("Calling platform...")?;
    let result = client.call(&args.url, body.as_ref()).await;
    pb.finish_and_clear();

    match result {
        Ok(CallOutcome::Payload(value)) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Ok(CallOutcome::Unspecified { log_id }) => {
            anyhow::bail!(
                "platform returned an error without a message{}",
                log_hint(log_id.as_deref())
            )
        }
        Err(WxError::Platform {
            code,
            message,
            log_id,
        }) => {
            anyhow::bail!(
                "platform error {}: {}{}",
                code,
                message,
                log_hint(log_id.as_deref())
            )
        }
        Err(e) => Err(e.into()),
    }
}

fn log_hint(log_id: Option<&str>) -> String {
    match log_id {
        Some(id) => format!(" (details: wxmp log show {})", id),
        None => String::new(),
    }
}
