//! Authenticated request client.
//!
//! Appends the cached access credential to every call, interprets the
//! platform's `errcode`/`errmsg` envelope, and retries once through a forced
//! refresh when the platform reports the credential invalidated.

use std::sync::Arc;

use serde_json::{Value, json};
use url::Url;
use wxmp_store::{DiagnosticEntry, SharedDiagnosticSink};

use crate::credential::{Credential, CredentialCache};
use crate::error::{Result, WxError, is_invalidation};
use crate::transport::{HttpRequest, SharedTransport};

/// Successful result of [`AuthenticatedClient::call`].
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// `errcode` absent or zero; the parsed body, unchanged.
    Payload(Value),
    /// Non-zero `errcode` without an `errmsg`. Distinct from an error: the
    /// platform gave no reason, so there is nothing to surface but the log id.
    Unspecified { log_id: Option<String> },
}

impl CallOutcome {
    pub fn into_payload(self) -> Option<Value> {
        match self {
            CallOutcome::Payload(value) => Some(value),
            CallOutcome::Unspecified { .. } => None,
        }
    }

    pub fn is_unspecified(&self) -> bool {
        matches!(self, CallOutcome::Unspecified { .. })
    }
}

/// Append `key=value` to the query string of `url`.
///
/// Absolute URLs are recomposed through the `url` crate so an encoded `?`
/// inside an existing parameter is left alone. Relative targets fall back to
/// checking for a literal `?`.
pub fn append_query(url: &str, key: &str, value: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.query_pairs_mut().append_pair(key, value);
            parsed.to_string()
        }
        Err(_) => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{}{}{}={}", url, separator, key, urlencoding::encode(value))
        }
    }
}

/// Read `errcode`, accepting numbers and numeric strings. Absent means zero.
pub(crate) fn error_code(response: &Value) -> i64 {
    match response.get("errcode") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(-1),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(-1),
        _ => 0,
    }
}

/// Read a non-empty `errmsg`.
pub(crate) fn error_message(response: &Value) -> Option<&str> {
    response
        .get("errmsg")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
}

/// Empty bodies are sent as GET.
fn has_body(body: Option<&Value>) -> bool {
    match body {
        None | Some(Value::Null) => false,
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

/// Issues platform calls carrying the cached access credential.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    cache: Arc<CredentialCache>,
    transport: SharedTransport,
    diagnostics: SharedDiagnosticSink,
}

impl AuthenticatedClient {
    /// Build a client, loading the persisted credential and refreshing it first
    /// when it is missing, stale, or `force_refresh` is set.
    pub async fn connect(
        cache: Arc<CredentialCache>,
        transport: SharedTransport,
        diagnostics: SharedDiagnosticSink,
        force_refresh: bool,
    ) -> Result<Self> {
        cache.ensure_fresh(force_refresh).await?;
        Ok(Self {
            cache,
            transport,
            diagnostics,
        })
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }

    /// Call `url` with the current credential. A non-empty `body` is POSTed as
    /// JSON; otherwise the call is a GET.
    pub async fn call(&self, url: &str, body: Option<&Value>) -> Result<CallOutcome> {
        let mut is_retry = false;

        loop {
            let credential = self.credential().await?;
            let full_url = append_query(url, "access_token", &credential.value);
            let request = if has_body(body) {
                HttpRequest::post_json(&full_url, serde_json::to_string(&body)?)
            } else {
                HttpRequest::get(&full_url)
            };

            let raw = self.transport.send(request).await?;
            let response: Value = serde_json::from_slice(&raw)?;

            let code = error_code(&response);
            if code == 0 {
                return Ok(CallOutcome::Payload(response));
            }

            let message = error_message(&response).map(str::to_string);
            let record = json!({
                "url": full_url,
                "data": body,
                "response": response,
            });

            if !is_retry && is_invalidation(code, message.as_deref()) {
                if let Err(e) = self.cache.refresh_stale(&credential.value).await {
                    let mut record = record;
                    record["refresh_error"] = json!(e.to_string());
                    self.record(
                        "platform call failed: access_token invalidated, refresh failed",
                        record,
                    );
                    tracing::warn!(
                        url = %url,
                        error = %e,
                        "credential refresh after invalidation failed"
                    );
                    return Err(e);
                }
                self.record(
                    "platform call failed: access_token invalidated, refreshed and retrying",
                    record,
                );
                is_retry = true;
                continue;
            }

            let log_id = self.record("platform call failed", record);
            tracing::warn!(url = %url, errcode = code, retried = is_retry, "platform call failed");

            return match message {
                Some(message) => Err(WxError::Platform {
                    code,
                    message,
                    log_id,
                }),
                None => Ok(CallOutcome::Unspecified { log_id }),
            };
        }
    }

    /// GET `url` and return the payload, treating an unspecified failure as an error.
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        self.expect_payload(self.call(url, None).await?)
    }

    /// POST `body` to `url` and return the payload.
    pub async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        self.expect_payload(self.call(url, Some(body)).await?)
    }

    /// Look up a diagnostic entry written by a failed call.
    pub fn diagnostic(&self, log_id: &str) -> Result<Option<DiagnosticEntry>> {
        Ok(self.diagnostics.fetch(log_id)?)
    }

    fn expect_payload(&self, outcome: CallOutcome) -> Result<Value> {
        match outcome {
            CallOutcome::Payload(value) => Ok(value),
            CallOutcome::Unspecified { log_id } => Err(WxError::Platform {
                code: -1,
                message: "platform returned an error without a message".to_string(),
                log_id,
            }),
        }
    }

    /// A credential outside the refresh margin, replacing a stale one first.
    async fn credential(&self) -> Result<Credential> {
        self.cache.get_valid().await
    }

    /// Write a diagnostic entry. A failing sink must not mask the platform error.
    fn record(&self, name: &str, data: Value) -> Option<String> {
        match self.diagnostics.record(name, data) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(error = %e, "failed to write diagnostic entry");
                None
            }
        }
    }
}
