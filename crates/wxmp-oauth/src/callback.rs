//! HTTP endpoints the platform calls back into.
//!
//! Serves the server-validation handshake, sends users to the consent page and
//! completes the authorization-code callback with a redirect to the page they
//! came from.

use axum::{
    Json, Router as AxumRouter,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use wxmp_config::{PlatformConfig, ServerConfig};

use crate::error::{Result, WxError};
use crate::oauth::{CallbackParams, OAuthFlow, build_authorize_url, generate_state};
use crate::signature::{ValidationParams, validate_server};

/// Configuration for the callback server.
#[derive(Debug, Clone)]
pub struct CallbackConfig {
    pub bind_addr: SocketAddr,
    /// Shared token for the validation handshake.
    pub validation_token: String,
    /// Externally visible base URL. Derived from the `Host` header when unset.
    pub public_base_url: Option<String>,
    pub authorize_url: String,
    pub oauth_scope: String,
}

impl CallbackConfig {
    /// Build from the `[server]` and `[platform]` sections.
    pub fn from_config(server: &ServerConfig, platform: &PlatformConfig) -> Result<Self> {
        let bind_addr = format!("{}:{}", server.bind, server.port)
            .parse()
            .map_err(|e| WxError::Config(format!("invalid bind address: {}", e)))?;
        Ok(Self {
            bind_addr,
            validation_token: server.validation_token.clone(),
            public_base_url: server
                .public_base_url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string()),
            authorize_url: platform.authorize_url.clone(),
            oauth_scope: server.oauth_scope.clone(),
        })
    }
}

struct CallbackState {
    config: CallbackConfig,
    flow: OAuthFlow,
}

/// The callback server.
pub struct CallbackServer {
    state: Arc<CallbackState>,
}

impl CallbackServer {
    pub fn new(config: CallbackConfig, flow: OAuthFlow) -> Self {
        Self {
            state: Arc::new(CallbackState { config, flow }),
        }
    }

    /// Build the axum router.
    pub fn router(&self) -> AxumRouter {
        AxumRouter::new()
            .route("/wechat", get(handle_validation))
            .route("/wechat/authorize", get(handle_authorize))
            .route("/wechat/redirect", get(handle_redirect))
            .route("/health", get(handle_health))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the server.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Starting callback server");
        axum::serve(listener, self.router()).await
    }

    /// Run with graceful shutdown, returning the bound address.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<SocketAddr> {
        let listener = TcpListener::bind(self.state.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "Starting callback server");
        tokio::spawn(async move {
            axum::serve(listener, self.router())
                .with_graceful_shutdown(shutdown)
                .await
                .ok();
        });
        Ok(local_addr)
    }
}

/// Handle GET /wechat
async fn handle_validation(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<ValidationParams>,
) -> String {
    validate_server(&state.config.validation_token, &params)
}

#[derive(Debug, Default, Deserialize)]
struct AuthorizeParams {
    #[serde(default)]
    redirect: Option<String>,
}

/// Handle GET /wechat/authorize
async fn handle_authorize(
    State(state): State<Arc<CallbackState>>,
    headers: HeaderMap,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let base = match &state.config.public_base_url {
        Some(base) => base.clone(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("localhost");
            format!("http://{}", host)
        }
    };
    let redirect = params.redirect.unwrap_or_default();
    let redirect_uri = format!(
        "{}/wechat/redirect?redirect={}",
        base,
        urlencoding::encode(&redirect)
    );

    let consent = build_authorize_url(
        &state.config.authorize_url,
        state.flow.identity().app_id(),
        &redirect_uri,
        &state.config.oauth_scope,
        &generate_state(),
    );
    found(&consent)
}

/// Handle GET /wechat/redirect
async fn handle_redirect(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> std::result::Result<Response, CallbackError> {
    let outcome = state.flow.handle_callback(&params).await?;
    Ok(found(&outcome.redirect_to))
}

/// Handle GET /health
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "wxmp-callback"
    }))
}

/// 302 with a `Location` that is always a valid header value.
fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, encode_location(location))],
    )
        .into_response()
}

/// Percent-encode bytes that cannot appear in a header value.
fn encode_location(location: &str) -> String {
    let mut out = String::with_capacity(location.len());
    for c in location.chars() {
        if c.is_ascii_graphic() {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", b));
            }
        }
    }
    out
}

/// Plain-text failure page for the OAuth callback.
#[derive(Debug)]
pub struct CallbackError(WxError);

impl From<WxError> for CallbackError {
    fn from(err: WxError) -> Self {
        Self(err)
    }
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            WxError::Authorization(_) => StatusCode::UNAUTHORIZED,
            WxError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            WxError::Credential(_) | WxError::Platform { .. } | WxError::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, format!("Login failed: {}", self.0)).into_response()
    }
}
