//! Store command - inspect and seed the config store.

use anyhow::Result;
use clap::{Args, Subcommand};
use console::{Style, style};
use wxmp_store::{ACCESS_TOKEN, APPSECRET, ConfigStore};

use super::{Context, mask};

/// Arguments for the store command.
#[derive(Args, Debug)]
pub struct StoreArgs {
    #[command(subcommand)]
    pub command: StoreCommand,
}

#[derive(Subcommand, Debug)]
pub enum StoreCommand {
    /// Print one value
    Get {
        /// Row name (appid, appsecret, access_token, access_token_expire_time, qrcode)
        name: String,
    },

    /// Write one value
    Set {
        /// Row name
        name: String,

        /// Value to store (prompted without echo when omitted)
        value: Option<String>,
    },

    /// List all rows
    List {
        /// Show secrets unmasked
        #[arg(long)]
        show_secrets: bool,
    },
}

/// Run the store command.
pub async fn run(args: StoreArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;

    match args.command {
        StoreCommand::Get { name } => {
            match store.get(&name)? {
                Some(value) => println!("{}", value),
                None => anyhow::bail!("'{}' is not set", name),
            }
            Ok(())
        }
        StoreCommand::Set { name, value } => {
            let value = match value {
                Some(v) => v,
                None => rpassword::prompt_password(format!("{}: ", name))?,
            };
            store.set(&name, value.trim())?;
            println!("{} {}", style("✓").green(), name);
            Ok(())
        }
        StoreCommand::List { show_secrets } => {
            let dim = Style::new().dim();
            println!("{}", style(format!("Config store ({})", store.table())).bold());
            println!("{}", dim.apply_to("─".repeat(40)));
            for (name, value) in store.entries()? {
                let shown = if !show_secrets && is_secret(&name) {
                    mask(&value)
                } else {
                    value
                };
                println!("  {:<26} {}", dim.apply_to(&name), shown);
            }
            Ok(())
        }
    }
}

fn is_secret(name: &str) -> bool {
    name == APPSECRET || name == ACCESS_TOKEN
}
