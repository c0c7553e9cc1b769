//! Credential lifecycle and authenticated requests for the WeChat platform API.
//!
//! The platform issues short-lived access credentials that must ride along on
//! every authenticated call. This crate keeps one fresh, retries once when the
//! platform reports it invalidated, and runs the OAuth authorization-code
//! callback that turns a redirect into a user identity.
//!
//! # Components
//!
//! - [`transport`]: single-request HTTP seam with connect/total timeouts
//! - [`credential`]: client identity and the single-flight credential cache
//! - [`client`]: authenticated request client with one forced-refresh retry
//! - [`oauth`]: authorization-code exchange flow and consent-page URL
//! - [`signature`]: server-validation handshake
//! - [`callback`]: axum router exposing the handshake and OAuth callback

pub mod callback;
pub mod client;
pub mod credential;
pub mod error;
pub mod oauth;
pub mod signature;
pub mod transport;

pub use callback::{CallbackConfig, CallbackError, CallbackServer};
pub use client::{AuthenticatedClient, CallOutcome, append_query};
pub use credential::{
    CacheState, ClientIdentity, Credential, CredentialCache, CredentialStatus,
    SharedCredentialCache,
};
pub use error::{Result, WxError};
pub use oauth::{
    CallbackOutcome, CallbackParams, FlowState, OAuthExchange, OAuthFlow, RandomSessionIssuer,
    RedirectTarget, Resolution, ResolvedIdentity, Scope, SessionIssuer, SubscriberLookup,
    UserProfile, build_authorize_url, decode_redirect, generate_state,
};
pub use signature::{ValidationParams, compute_signature, validate_server, verify_signature};
pub use transport::{HttpRequest, Method, ReqwestTransport, SharedTransport, Transport};
