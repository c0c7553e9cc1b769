//! HTTP transport seam.
//!
//! Everything in this crate talks to the platform through [`Transport`], which
//! performs exactly one request and hands back the raw body. The platform
//! reports failures inside 200 responses, so the body is returned regardless of
//! HTTP status and interpretation is left to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use wxmp_config::HttpConfig;

use crate::error::{Result, WxError};

/// HTTP method used by the platform API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A single outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// A bodyless GET.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            headers: Vec::new(),
        }
    }

    /// A POST carrying an already-encoded JSON body.
    pub fn post_json(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body.into()),
            headers: vec![(
                header::CONTENT_TYPE.to_string(),
                "application/json".to_string(),
            )],
        }
    }
}

/// Performs one HTTP request and returns the response body.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: HttpRequest) -> Result<Vec<u8>>;
}

/// Shared transport for use across async contexts.
pub type SharedTransport = Arc<dyn Transport>;

/// Fetch `url` with a GET and parse the body as JSON.
pub async fn get_json(transport: &dyn Transport, url: &str) -> Result<serde_json::Value> {
    let body = transport.send(HttpRequest::get(url)).await?;
    Ok(serde_json::from_slice(&body)?)
}

// ============================================================================
// ReqwestTransport
// ============================================================================

/// [`Transport`] backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client with the given connect and total timeouts.
    pub fn new(connect_timeout: Duration, timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    /// Build from the `[http]` config section.
    pub fn from_config(config: &HttpConfig) -> Result<Self> {
        Self::new(
            config.connect_timeout(),
            config.timeout(),
            &config.user_agent,
        )
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<Vec<u8>> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| WxError::Transport(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, url = %request.url, "platform returned non-success status");
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| WxError::Transport(format!("failed to read response body: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// ScriptedTransport (for testing)
// ============================================================================

#[cfg(test)]
pub(crate) use scripted::ScriptedTransport;

#[cfg(test)]
mod scripted {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{HttpRequest, Transport};
    use crate::error::{Result, WxError};

    /// In-process transport that replays canned responses.
    ///
    /// Routes registered with [`ScriptedTransport::route`] answer every request
    /// whose URL contains the fragment. Requests matching no route consume the
    /// queue in order. Every request is recorded.
    #[derive(Debug, Default)]
    pub struct ScriptedTransport {
        routes: Mutex<Vec<(String, Scripted)>>,
        queue: Mutex<VecDeque<Scripted>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    #[derive(Debug, Clone)]
    enum Scripted {
        Body(Vec<u8>),
        Failure(String),
    }

    impl ScriptedTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Answer every request whose URL contains `fragment` with `body`.
        pub fn route(&self, fragment: &str, body: serde_json::Value) -> &Self {
            self.routes
                .lock()
                .push((fragment.to_string(), Scripted::Body(body.to_string().into_bytes())));
            self
        }

        /// Fail every request whose URL contains `fragment`.
        pub fn route_failure(&self, fragment: &str, message: &str) -> &Self {
            self.routes
                .lock()
                .push((fragment.to_string(), Scripted::Failure(message.to_string())));
            self
        }

        /// Queue a JSON body for the next unrouted request.
        pub fn push_json(&self, body: serde_json::Value) -> &Self {
            self.queue
                .lock()
                .push_back(Scripted::Body(body.to_string().into_bytes()));
            self
        }

        /// Queue a raw body for the next unrouted request.
        pub fn push_raw(&self, body: &str) -> &Self {
            self.queue
                .lock()
                .push_back(Scripted::Body(body.as_bytes().to_vec()));
            self
        }

        /// Queue a transport failure for the next unrouted request.
        pub fn push_failure(&self, message: &str) -> &Self {
            self.queue
                .lock()
                .push_back(Scripted::Failure(message.to_string()));
            self
        }

        /// All requests seen so far.
        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().clone()
        }

        /// Number of requests whose URL contains `fragment`.
        pub fn count(&self, fragment: &str) -> usize {
            self.requests
                .lock()
                .iter()
                .filter(|r| r.url.contains(fragment))
                .count()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<Vec<u8>> {
            let routed = self
                .routes
                .lock()
                .iter()
                .find(|(fragment, _)| request.url.contains(fragment.as_str()))
                .map(|(_, scripted)| scripted.clone());
            let url = request.url.clone();
            self.requests.lock().push(request);

            let scripted = match routed {
                Some(s) => s,
                None => self
                    .queue
                    .lock()
                    .pop_front()
                    .ok_or_else(|| WxError::Transport(format!("no scripted response for {}", url)))?,
            };

            match scripted {
                Scripted::Body(body) => Ok(body),
                Scripted::Failure(message) => Err(WxError::Transport(message)),
            }
        }
    }
}
