//! OAuth authorization-code flow for web pages opened inside the platform.
//!
//! The consent page sends the user back with a one-time `code` and the opaque
//! `redirect` target we handed out. [`OAuthFlow::handle_callback`] exchanges
//! the code for a user-scoped token, resolves the user's identity according to
//! the granted scope, issues an application session token and returns the
//! decoded redirect target with that token appended.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wxmp_config::PlatformConfig;

use crate::client::{AuthenticatedClient, CallOutcome, append_query, error_code, error_message};
use crate::credential::ClientIdentity;
use crate::error::{Result, WxError};
use crate::transport::{SharedTransport, get_json};

/// Scope value the platform returns for the profile-granting consent.
const USERINFO_SCOPE: &str = "snsapi_userinfo";

/// Query parameters of the OAuth callback.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub redirect: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

/// Consent scope granted by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Silent authorization: only the openid is available.
    Basic,
    /// Explicit consent: the profile can be fetched with the user token.
    UserInfo,
}

impl Scope {
    /// Interpret the scope string returned by the code exchange.
    pub fn from_platform(scope: &str) -> Self {
        if scope == USERINFO_SCOPE {
            Scope::UserInfo
        } else {
            Scope::Basic
        }
    }
}

/// Response of the code-exchange endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthExchange {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub openid: Option<String>,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub unionid: Option<String>,
}

/// Profile returned for the userinfo scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub openid: String,
    #[serde(default)]
    pub nickname: String,
    /// 1 male, 2 female, 0 unknown.
    #[serde(default)]
    pub sex: i64,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub country: String,
    #[serde(default, rename = "headimgurl")]
    pub avatar_url: String,
    #[serde(default)]
    pub privilege: Vec<String>,
    #[serde(default)]
    pub unionid: Option<String>,
}

/// Result of the best-effort subscriber lookup on the basic scope.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriberLookup {
    Found(Value),
    /// The platform reported an error without a message.
    Unspecified { log_id: Option<String> },
    /// The lookup failed; the flow continues without a profile.
    Failed(String),
}

/// How the identity was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    UserInfo(UserProfile),
    Basic { subscriber: SubscriberLookup },
}

/// States of one callback, for tracing and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    AwaitingCode,
    ExchangingCode,
    ResolvedBasic,
    ResolvedUserInfo,
    Failed,
}

/// The user identity produced by a successful callback.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedIdentity {
    pub open_id: String,
    pub scope: Scope,
    pub user_access_token: String,
    pub resolution: Resolution,
    /// Query parameters carried by the redirect target, e.g. `sharecode`.
    pub redirect_params: BTreeMap<String, String>,
}

impl ResolvedIdentity {
    pub fn state(&self) -> FlowState {
        match self.resolution {
            Resolution::UserInfo(_) => FlowState::ResolvedUserInfo,
            Resolution::Basic { .. } => FlowState::ResolvedBasic,
        }
    }

    /// Profile fields, when the userinfo scope was granted.
    pub fn profile(&self) -> Option<&UserProfile> {
        match &self.resolution {
            Resolution::UserInfo(profile) => Some(profile),
            Resolution::Basic { .. } => None,
        }
    }
}

/// What the caller needs to finish the request.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub identity: ResolvedIdentity,
    pub session_token: String,
    /// Decoded redirect target with `token` appended.
    pub redirect_to: String,
}

/// Derives an application session token from a resolved identity.
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    async fn issue(&self, identity: &ResolvedIdentity) -> Result<String>;
}

/// Issues random opaque tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSessionIssuer;

#[async_trait]
impl SessionIssuer for RandomSessionIssuer {
    async fn issue(&self, _identity: &ResolvedIdentity) -> Result<String> {
        Ok(generate_state())
    }
}

/// Random URL-safe string, used for consent `state` and session tokens.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the consent-page URL.
pub fn build_authorize_url(
    authorize_url: &str,
    app_id: &str,
    redirect_uri: &str,
    scope: &str,
    state: &str,
) -> String {
    let params = [
        ("appid", app_id),
        ("redirect_uri", redirect_uri),
        ("response_type", "code"),
        ("scope", scope),
        ("state", state),
    ];

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    format!("{}?{}#wechat_redirect", authorize_url, query)
}

/// A decoded redirect target.
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectTarget {
    pub url: String,
    pub params: BTreeMap<String, String>,
}

/// Decode the opaque `redirect` value: base64, then HTML entities, then
/// percent-encoding. Missing or empty targets become `/`.
pub fn decode_redirect(raw: Option<&str>) -> Result<RedirectTarget> {
    let raw = raw.unwrap_or_default();
    if raw.trim().is_empty() {
        return Ok(RedirectTarget {
            url: "/".to_string(),
            params: BTreeMap::new(),
        });
    }

    // Unescaped '+' in the query string arrives as a space.
    let encoded = raw.trim_end_matches(['\r', '\n']).replace(' ', "+");
    let bytes = STANDARD
        .decode(&encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')))
        .map_err(|e| WxError::InvalidRequest(format!("redirect is not base64: {}", e)))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| WxError::InvalidRequest("redirect is not valid UTF-8".to_string()))?;
    let unescaped = unescape_html(&text);

    let params = match unescaped.split_once('?') {
        Some((_, query)) => {
            let query = query.split('#').next().unwrap_or_default();
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        }
        None => BTreeMap::new(),
    };

    let url = urlencoding::decode(&unescaped)
        .map_err(|_| WxError::InvalidRequest("redirect is not valid UTF-8".to_string()))?
        .into_owned();

    Ok(RedirectTarget {
        url: if url.is_empty() { "/".to_string() } else { url },
        params,
    })
}

fn unescape_html(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Runs the authorization-code callback.
pub struct OAuthFlow {
    identity: ClientIdentity,
    transport: SharedTransport,
    client: AuthenticatedClient,
    issuer: Box<dyn SessionIssuer>,
    api_base: String,
    lang: String,
}

impl std::fmt::Debug for OAuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthFlow")
            .field("identity", &self.identity)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl OAuthFlow {
    pub fn new(
        identity: ClientIdentity,
        transport: SharedTransport,
        client: AuthenticatedClient,
        issuer: Box<dyn SessionIssuer>,
        platform: &PlatformConfig,
    ) -> Self {
        Self {
            identity,
            transport,
            client,
            issuer,
            api_base: platform.api_base.trim_end_matches('/').to_string(),
            lang: platform.lang.clone(),
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Handle one callback.
    pub async fn handle_callback(&self, params: &CallbackParams) -> Result<CallbackOutcome> {
        tracing::debug!(state = ?FlowState::AwaitingCode, "oauth callback received");

        let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
            tracing::warn!(state = ?FlowState::Failed, "oauth callback without code");
            return Err(WxError::Authorization("authorization code missing".to_string()));
        };

        let result = self.resolve(code, params.redirect.as_deref()).await;
        let (identity, target) = match result {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(state = ?FlowState::Failed, error = %e, "oauth callback failed");
                return Err(e);
            }
        };

        let session_token = self.issuer.issue(&identity).await?;
        let redirect_to = append_query(&target.url, "token", &session_token);

        tracing::info!(
            state = ?identity.state(),
            openid = %identity.open_id,
            "oauth callback resolved"
        );

        Ok(CallbackOutcome {
            identity,
            session_token,
            redirect_to,
        })
    }

    async fn resolve(
        &self,
        code: &str,
        redirect: Option<&str>,
    ) -> Result<(ResolvedIdentity, RedirectTarget)> {
        tracing::debug!(state = ?FlowState::ExchangingCode, "exchanging authorization code");
        let exchange = self.exchange_code(code).await?;
        let open_id = exchange
            .openid
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WxError::Credential("code exchange returned no openid".to_string()))?;

        let target = decode_redirect(redirect)?;
        let scope = Scope::from_platform(&exchange.scope);

        let resolution = match scope {
            Scope::UserInfo => {
                Resolution::UserInfo(self.fetch_profile(&exchange.access_token, &open_id).await?)
            }
            Scope::Basic => Resolution::Basic {
                subscriber: self.lookup_subscriber(&open_id).await,
            },
        };

        Ok((
            ResolvedIdentity {
                open_id,
                scope,
                user_access_token: exchange.access_token,
                resolution,
                redirect_params: target.params.clone(),
            },
            target,
        ))
    }

    /// Exchange the code directly; this endpoint takes the app secret, not the
    /// access credential.
    async fn exchange_code(&self, code: &str) -> Result<OAuthExchange> {
        let url = format!(
            "{}/sns/oauth2/access_token?appid={}&secret={}&code={}&grant_type=authorization_code",
            self.api_base,
            urlencoding::encode(self.identity.app_id()),
            urlencoding::encode(self.identity.app_secret()),
            urlencoding::encode(code),
        );
        let body = get_json(self.transport.as_ref(), &url).await?;
        if body.get("openid").is_none()
            && let Some(message) = error_message(&body)
        {
            return Err(WxError::Credential(format!(
                "code exchange failed (errcode {}): {}",
                error_code(&body),
                message
            )));
        }
        Ok(serde_json::from_value(body)?)
    }

    /// Any non-zero errcode is fatal to the flow.
    async fn fetch_profile(&self, user_token: &str, open_id: &str) -> Result<UserProfile> {
        let url = format!(
            "{}/sns/userinfo?access_token={}&openid={}&lang={}",
            self.api_base,
            urlencoding::encode(user_token),
            urlencoding::encode(open_id),
            self.lang,
        );
        let body = get_json(self.transport.as_ref(), &url).await?;
        let code = error_code(&body);
        if code != 0 {
            return Err(WxError::Platform {
                code,
                message: error_message(&body)
                    .unwrap_or("userinfo request failed")
                    .to_string(),
                log_id: None,
            });
        }
        Ok(serde_json::from_value(body)?)
    }

    async fn lookup_subscriber(&self, open_id: &str) -> SubscriberLookup {
        let url = format!(
            "{}/cgi-bin/user/info?openid={}&lang={}",
            self.api_base,
            urlencoding::encode(open_id),
            self.lang,
        );
        match self.client.call(&url, None).await {
            Ok(CallOutcome::Payload(value)) => SubscriberLookup::Found(value),
            Ok(CallOutcome::Unspecified { log_id }) => SubscriberLookup::Unspecified { log_id },
            Err(e) => {
                tracing::debug!(error = %e, "subscriber lookup failed, continuing without profile");
                SubscriberLookup::Failed(e.to_string())
            }
        }
    }
}
