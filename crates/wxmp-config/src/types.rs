//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [platform]      # remote API endpoints, refresh margin
//! [http]          # outbound timeouts
//! [store]         # SQLite config store
//! [diagnostics]   # diagnostic log sink
//! [server]        # callback server
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

pub mod defaults {
    /// Base URL of the platform API.
    pub const API_BASE: &str = "https://api.weixin.qq.com";
    /// Consent page for the OAuth authorization-code flow.
    pub const AUTHORIZE_URL: &str = "https://open.weixin.qq.com/connect/oauth2/authorize";
    /// Credentials expiring within this many seconds are refreshed.
    pub const REFRESH_MARGIN_SECS: u64 = 5 * 60;
    /// Language requested on profile lookups.
    pub const LANG: &str = "zh_CN";
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
    pub const TIMEOUT_SECS: u64 = 30;
    pub const USER_AGENT: &str = "Mozilla / 5.0 (Windows NT 10.0; Win64; x64)";
    pub const STORE_FILE: &str = "wxmp.db";
    /// File-backend diagnostic directory under the config dir.
    pub const DIAGNOSTICS_DIR: &str = "log";
    /// Tracing output directory under the config dir.
    pub const LOG_DIR: &str = "logs";
    pub const RETENTION_DAYS: u32 = 90;
    pub const BIND: &str = "127.0.0.1";
    pub const PORT: u16 = 8080;
    /// Token shared with the platform for the server-validation handshake.
    pub const VALIDATION_TOKEN: &str = "milingerfuyelkdoywb";
    /// Silent authorization.
    pub const OAUTH_SCOPE: &str = "snsapi_base";
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WxmpConfig {
    /// Remote platform settings.
    pub platform: Option<PlatformConfig>,

    /// Outbound HTTP settings.
    pub http: Option<HttpConfig>,

    /// Config Store settings.
    pub store: Option<StoreConfig>,

    /// Diagnostic log settings.
    pub diagnostics: Option<DiagnosticsConfig>,

    /// Callback server settings.
    pub server: Option<ServerConfig>,
}

impl WxmpConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    pub fn merge(&mut self, other: WxmpConfig) {
        if other.platform.is_some() {
            self.platform = other.platform;
        }

        if other.http.is_some() {
            self.http = other.http;
        }

        if other.store.is_some() {
            self.store = other.store;
        }

        if other.diagnostics.is_some() {
            self.diagnostics = other.diagnostics;
        }

        if other.server.is_some() {
            self.server = other.server;
        }
    }

    /// Platform section, or defaults.
    pub fn platform(&self) -> PlatformConfig {
        self.platform.clone().unwrap_or_default()
    }

    /// HTTP section, or defaults.
    pub fn http(&self) -> HttpConfig {
        self.http.clone().unwrap_or_default()
    }

    /// Store section, or defaults.
    pub fn store(&self) -> StoreConfig {
        self.store.clone().unwrap_or_default()
    }

    /// Diagnostics section, or defaults.
    pub fn diagnostics(&self) -> DiagnosticsConfig {
        self.diagnostics.clone().unwrap_or_default()
    }

    /// Server section, or defaults.
    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    /// Check values that parse fine but cannot be used.
    pub fn validate(&self) -> Result<()> {
        let platform = self.platform();
        for (field, value) in [
            ("platform.api_base", &platform.api_base),
            ("platform.authorize_url", &platform.authorize_url),
        ] {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: format!("'{}' is not an http(s) URL", value),
                });
            }
        }

        let http = self.http();
        if http.connect_timeout_secs == 0 || http.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http".to_string(),
                reason: "timeouts must be greater than zero".to_string(),
            });
        }

        let store = self.store();
        if !store
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::InvalidValue {
                field: "store.table_prefix".to_string(),
                reason: "only ASCII letters, digits and '_' are allowed".to_string(),
            });
        }

        let server = self.server();
        if server.validation_token.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "server.validation_token".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Platform Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Remote platform endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Base URL for `/cgi-bin/...` and `/sns/...` endpoints.
    pub api_base: String,
    /// OAuth consent page.
    pub authorize_url: String,
    /// Seconds before expiry at which a credential counts as stale.
    pub refresh_margin_secs: u64,
    /// `lang` parameter for profile lookups.
    pub lang: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base: defaults::API_BASE.to_string(),
            authorize_url: defaults::AUTHORIZE_URL.to_string(),
            refresh_margin_secs: defaults::REFRESH_MARGIN_SECS,
            lang: defaults::LANG.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Outbound HTTP settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: defaults::CONNECT_TIMEOUT_SECS,
            timeout_secs: defaults::TIMEOUT_SECS,
            user_agent: defaults::USER_AGENT.to_string(),
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Config Store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. Defaults to `<config dir>/wxmp.db`.
    pub path: Option<PathBuf>,
    /// Prefix for the `wechat` table name.
    pub table_prefix: String,
}

impl StoreConfig {
    /// Resolve the database path, falling back to `config_dir`.
    pub fn resolved_path(&self, config_dir: &Path) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| config_dir.join(defaults::STORE_FILE))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Diagnostics Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Which diagnostic log sink to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticsBackend {
    /// Indexed table next to the Config Store.
    #[default]
    Sqlite,
    /// `<dir>/<YYYYMM>/<DD>.log` flat files.
    File,
}

/// Diagnostic log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub backend: DiagnosticsBackend,
    /// Directory for the file backend. Defaults to `<config dir>/log`.
    pub path: Option<PathBuf>,
    /// Days to keep entries before cleanup.
    pub retention_days: u32,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            backend: DiagnosticsBackend::default(),
            path: None,
            retention_days: defaults::RETENTION_DAYS,
        }
    }
}

impl DiagnosticsConfig {
    /// Resolve the log directory for the file backend.
    pub fn resolved_path(&self, config_dir: &Path) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| config_dir.join(defaults::DIAGNOSTICS_DIR))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Callback server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind: String,
    /// Port to listen on.
    pub port: u16,
    /// Token for the server-validation handshake.
    pub validation_token: String,
    /// Externally reachable base URL, used to build the OAuth `redirect_uri`.
    pub public_base_url: Option<String>,
    /// Scope requested on the consent page (`snsapi_base` or `snsapi_userinfo`).
    pub oauth_scope: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: defaults::BIND.to_string(),
            port: defaults::PORT,
            validation_token: defaults::VALIDATION_TOKEN.to_string(),
            public_base_url: None,
            oauth_scope: defaults::OAUTH_SCOPE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        let config = WxmpConfig::new();
        assert!(config.platform.is_none());
        assert!(config.server.is_none());
        assert_eq!(config.platform().api_base, defaults::API_BASE);
        assert_eq!(config.platform().refresh_margin_secs, 300);
        assert_eq!(config.http().connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.http().timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_sections() {
        let toml = r#"
[platform]
api_base = "http://127.0.0.1:9000"

[diagnostics]
backend = "file"
path = "/var/log/wxmp"

[server]
port = 9090
public_base_url = "https://example.com"
"#;
        let config = WxmpConfig::from_toml(toml).unwrap();
        let platform = config.platform();
        assert_eq!(platform.api_base, "http://127.0.0.1:9000");
        // Missing fields in a present section fall back to defaults
        assert_eq!(platform.lang, "zh_CN");

        let diagnostics = config.diagnostics();
        assert_eq!(diagnostics.backend, DiagnosticsBackend::File);
        assert_eq!(
            diagnostics.resolved_path(Path::new("/etc/wxmp")),
            PathBuf::from("/var/log/wxmp")
        );
        assert_eq!(diagnostics.retention_days, 90);

        let server = config.server();
        assert_eq!(server.port, 9090);
        assert_eq!(server.validation_token, "milingerfuyelkdoywb");
        assert_eq!(server.oauth_scope, "snsapi_base");
    }

    #[test]
    fn test_merge_overrides_sections() {
        let mut base =
            WxmpConfig::from_toml("[server]\nport = 8080\n[http]\ntimeout_secs = 5").unwrap();
        let overlay = WxmpConfig::from_toml("[server]\nport = 3000").unwrap();
        base.merge(overlay);

        assert_eq!(base.server().port, 3000);
        assert_eq!(base.http().timeout_secs, 5);
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut config = WxmpConfig::new();
        config.store = Some(StoreConfig {
            path: Some(PathBuf::from("/tmp/wx.db")),
            table_prefix: "fa_".to_string(),
        });
        let text = config.to_toml().unwrap();
        let parsed = WxmpConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.store().table_prefix, "fa_");
        assert_eq!(
            parsed.store().resolved_path(Path::new("/etc/wxmp")),
            PathBuf::from("/tmp/wx.db")
        );
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let config = WxmpConfig::from_toml("[store]\ntable_prefix = \"x; DROP TABLE\"").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "store.table_prefix"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = WxmpConfig::from_toml("[http]\ntimeout_secs = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_http_base() {
        let config = WxmpConfig::from_toml("[platform]\napi_base = \"ftp://x\"").unwrap();
        assert!(config.validate().is_err());
    }
}
