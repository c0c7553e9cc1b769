//! Serve command - run the OAuth callback server.

use anyhow::Result;
use clap::Args;
use wxmp_oauth::{
    AuthenticatedClient, CallbackConfig, CallbackServer, OAuthFlow, RandomSessionIssuer,
};

use super::Context;

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(long)]
    pub bind: Option<String>,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let mut server_config = ctx.config.server();
    if let Some(port) = args.port {
        server_config.port = port;
    }
    if let Some(bind) = args.bind {
        server_config.bind = bind;
    }
    let platform = ctx.config.platform();

    let store = ctx.open_store()?;
    let transport = ctx.transport()?;
    let cache = ctx.credential_cache(store, transport.clone())?;
    let identity = cache.identity().clone();
    let client =
        AuthenticatedClient::connect(cache, transport.clone(), ctx.open_diagnostics()?, false)
            .await?;

    let flow = OAuthFlow::new(
        identity,
        transport,
        client,
        Box::new(RandomSessionIssuer),
        &platform,
    );
    let config = CallbackConfig::from_config(&server_config, &platform)?;

    if server_config.public_base_url.is_none() {
        tracing::warn!("server.public_base_url not set, deriving redirect_uri from the Host header");
    }

    CallbackServer::new(config, flow).run().await?;
    Ok(())
}
