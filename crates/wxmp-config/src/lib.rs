//! Configuration system for wxmp.
//!
//! Provides TOML-based configuration with:
//! - Platform endpoints and the credential refresh margin (`[platform]`)
//! - Outbound HTTP timeouts (`[http]`)
//! - Config Store location (`[store]`) and diagnostic log sink (`[diagnostics]`)
//! - Callback server settings (`[server]`)
//! - One config directory holding every file, with a working-directory override

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{CONFIG_FILE, LOCAL_OVERRIDE_FILE, ResolvedPaths, Settings, config_dir};
pub use error::{ConfigError, Result};
pub use types::*;
