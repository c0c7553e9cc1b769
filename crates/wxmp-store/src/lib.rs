//! Persistence collaborators for wxmp.
//!
//! - [`config_store`]: the `wechat` key/value table holding the client identity
//!   and the current access credential, bootstrapped on first use
//! - [`diagnostics`]: append-only diagnostic entries retrievable by identifier,
//!   backed by SQLite or by date-partitioned flat files

pub mod config_store;
pub mod diagnostics;
pub mod error;

pub use config_store::{
    ACCESS_TOKEN, ACCESS_TOKEN_EXPIRE_TIME, APPID, APPSECRET, ConfigStore, QRCODE,
    SharedConfigStore, SqliteConfigStore,
};
pub use diagnostics::{
    DiagnosticEntry, DiagnosticSink, FileDiagnosticLog, SharedDiagnosticSink,
    SqliteDiagnosticLog,
};
pub use error::{Result, StoreError};
