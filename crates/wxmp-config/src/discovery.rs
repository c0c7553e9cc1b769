//! Locating and loading the wxmp configuration.
//!
//! Everything wxmp keeps on disk lives under one config directory: the
//! `config.toml` settings, the Config Store database, the diagnostic log and
//! the tracing logs. The directory is the one passed explicitly, else
//! `WXMP_CONFIG_DIR`, else `<platform config dir>/wxmp`.
//!
//! A `wxmp.toml` in the working directory is merged over `config.toml`, so a
//! checkout can point at a different store or callback port without touching
//! the user's settings.

use std::path::{Path, PathBuf};

use crate::{ConfigError, Result, WxmpConfig, defaults};

/// Settings file inside the config directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Override file looked up in the working directory.
pub const LOCAL_OVERRIDE_FILE: &str = "wxmp.toml";

const CONFIG_DIR_ENV: &str = "WXMP_CONFIG_DIR";

/// Resolve the config directory.
pub fn config_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .map(|d| d.join("wxmp"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Where wxmp reads and writes its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub config_dir: PathBuf,
    /// Config Store database (`[store] path`).
    pub store_file: PathBuf,
    /// Day-partitioned diagnostic files (`[diagnostics] path`).
    pub diagnostics_dir: PathBuf,
    /// Rolling JSON tracing output.
    pub log_dir: PathBuf,
}

impl ResolvedPaths {
    fn resolve(config: &WxmpConfig, config_dir: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            store_file: config.store().resolved_path(config_dir),
            diagnostics_dir: config.diagnostics().resolved_path(config_dir),
            log_dir: config_dir.join(defaults::LOG_DIR),
        }
    }
}

/// Merged configuration plus the paths it resolves to.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: WxmpConfig,
    pub paths: ResolvedPaths,
    /// Files that contributed to `config`, lowest precedence first.
    pub layers: Vec<PathBuf>,
    /// Files that exist but could not be used.
    pub warnings: Vec<String>,
}

impl Settings {
    /// Read `<config_dir>/config.toml`, then `<working_dir>/wxmp.toml` on top.
    ///
    /// Missing files are skipped. Unreadable or malformed ones are reported in
    /// `warnings` and skipped. The merged result must pass validation.
    pub fn load(config_dir: &Path, working_dir: &Path) -> Result<Self> {
        let mut config = WxmpConfig::new();
        let mut layers = Vec::new();
        let mut warnings = Vec::new();

        for path in [
            config_dir.join(CONFIG_FILE),
            working_dir.join(LOCAL_OVERRIDE_FILE),
        ] {
            match read_layer(&path) {
                Ok(Some(layer)) => {
                    config.merge(layer);
                    layers.push(path);
                }
                Ok(None) => {}
                Err(e) => warnings.push(format!("ignoring {}: {}", path.display(), e)),
            }
        }

        config.validate()?;
        let paths = ResolvedPaths::resolve(&config, config_dir);
        Ok(Self {
            config,
            paths,
            layers,
            warnings,
        })
    }
}

fn read_layer(path: &Path) -> Result<Option<WxmpConfig>> {
    if !path.is_file() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    WxmpConfig::from_toml(&contents).map(Some)
}
