//! CLI command handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use wxmp_config::{DiagnosticsBackend, ResolvedPaths, Settings, WxmpConfig};
use wxmp_oauth::{
    AuthenticatedClient, ClientIdentity, CredentialCache, ReqwestTransport, SharedTransport,
};
use wxmp_store::{FileDiagnosticLog, SharedDiagnosticSink, SqliteConfigStore, SqliteDiagnosticLog};

pub mod call;
pub mod log;
pub mod serve;
pub mod store;
pub mod token;
pub mod verify;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration.
    pub config: WxmpConfig,
    /// Config directory and the files resolved under it.
    pub paths: ResolvedPaths,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    pub fn new(settings: Settings, verbose: bool) -> Self {
        Self {
            config: settings.config,
            paths: settings.paths,
            verbose,
        }
    }

    pub fn open_store(&self) -> Result<Arc<SqliteConfigStore>> {
        let store =
            SqliteConfigStore::open(&self.paths.store_file, &self.config.store().table_prefix)?;
        Ok(Arc::new(store))
    }

    /// Open the configured diagnostic sink, pruning expired entries.
    pub fn open_diagnostics(&self) -> Result<SharedDiagnosticSink> {
        let diagnostics = self.config.diagnostics();
        match diagnostics.backend {
            DiagnosticsBackend::Sqlite => {
                let log = SqliteDiagnosticLog::open(&self.paths.store_file)?;
                log.prune(diagnostics.retention_days)?;
                Ok(Arc::new(log))
            }
            DiagnosticsBackend::File => Ok(Arc::new(FileDiagnosticLog::new(
                &self.paths.diagnostics_dir,
                diagnostics.retention_days,
            )?)),
        }
    }

    pub fn transport(&self) -> Result<SharedTransport> {
        Ok(Arc::new(ReqwestTransport::from_config(&self.config.http())?))
    }

    /// Credential cache for the identity held in the store.
    pub fn credential_cache(
        &self,
        store: Arc<SqliteConfigStore>,
        transport: SharedTransport,
    ) -> Result<Arc<CredentialCache>> {
        let identity = ClientIdentity::load(store.as_ref())?;
        Ok(Arc::new(CredentialCache::new(
            identity,
            store,
            transport,
            &self.config.platform(),
        )))
    }

    /// Connect an authenticated client, refreshing the credential if needed.
    pub async fn connect_client(&self, force_refresh: bool) -> Result<AuthenticatedClient> {
        let store = self.open_store()?;
        let transport = self.transport()?;
        let cache = self.credential_cache(store, transport.clone())?;
        let client = AuthenticatedClient::connect(
            cache,
            transport,
            self.open_diagnostics()?,
            force_refresh,
        )
        .await?;
        Ok(client)
    }
}

/// Spinner on stderr while a platform request is in flight.
pub fn spinner(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    pb.set_message(message.to_string());
    Ok(pb)
}

/// Mask a secret for display, keeping a short prefix and suffix.
pub fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else if value.is_empty() {
        String::new()
    } else {
        "****".to_string()
    }
}
