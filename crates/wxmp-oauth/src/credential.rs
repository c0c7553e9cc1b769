//! Access-credential cache.
//!
//! Loads the credential persisted in the config store, decides whether it is
//! still usable, and re-issues it from the platform's token endpoint when it is
//! not. Refreshes are serialised per cache, so one cache should be shared by
//! every request made on behalf of the same client identity.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use wxmp_config::PlatformConfig;
use wxmp_store::{
    ACCESS_TOKEN, ACCESS_TOKEN_EXPIRE_TIME, APPID, APPSECRET, ConfigStore, SharedConfigStore,
};

use crate::error::{Result, WxError};
use crate::transport::{SharedTransport, get_json};

// ============================================================================
// ClientIdentity
// ============================================================================

/// The application's platform identity. Immutable once built.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    app_id: String,
    app_secret: String,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .finish()
    }
}

impl ClientIdentity {
    /// Build an identity. Both parts must be non-empty.
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Result<Self> {
        let app_id = app_id.into();
        let app_secret = app_secret.into();
        if app_id.trim().is_empty() || app_secret.trim().is_empty() {
            return Err(WxError::Config(
                "appid and appsecret must both be set in the config store".to_string(),
            ));
        }
        Ok(Self { app_id, app_secret })
    }

    /// Read `appid` / `appsecret` from the config store.
    pub fn load(store: &dyn ConfigStore) -> Result<Self> {
        let app_id = store.get(APPID)?.unwrap_or_default();
        let app_secret = store.get(APPSECRET)?.unwrap_or_default();
        Self::new(app_id, app_secret)
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn app_secret(&self) -> &str {
        &self.app_secret
    }
}

// ============================================================================
// Credential
// ============================================================================

/// A bearer credential and the instant it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Usable when non-empty and not expiring within `margin` of `now`.
    pub fn is_usable_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        !self.value.is_empty() && self.expires_at >= now + margin
    }
}

/// Outcome of [`CredentialCache::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    Fresh(Credential),
    NeedsRefresh,
}

/// Credential details for display.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStatus {
    pub present: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub expires_in_secs: i64,
    pub stale: bool,
}

impl CredentialStatus {
    pub fn expires_in_display(&self) -> String {
        if !self.present {
            "No credential (will refresh on next use)".to_string()
        } else if self.stale {
            "Stale (will refresh on next use)".to_string()
        } else {
            let hours = self.expires_in_secs / 3600;
            let minutes = (self.expires_in_secs % 3600) / 60;
            format!("{}h {}m", hours, minutes)
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    errcode: Option<i64>,
    #[serde(default)]
    errmsg: Option<String>,
}

// ============================================================================
// CredentialCache
// ============================================================================

/// Holds the current credential for one client identity.
#[derive(Debug)]
pub struct CredentialCache {
    identity: ClientIdentity,
    store: SharedConfigStore,
    transport: SharedTransport,
    api_base: String,
    margin: Duration,
    current: RwLock<Option<Credential>>,
    refresh_lock: Mutex<()>,
    refresh_count: AtomicU32,
}

impl CredentialCache {
    /// Create a cache. Nothing is read until [`load`](Self::load) or a refresh.
    pub fn new(
        identity: ClientIdentity,
        store: SharedConfigStore,
        transport: SharedTransport,
        platform: &PlatformConfig,
    ) -> Self {
        Self {
            identity,
            store,
            transport,
            api_base: platform.api_base.trim_end_matches('/').to_string(),
            margin: Duration::seconds(platform.refresh_margin_secs as i64),
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            refresh_count: AtomicU32::new(0),
        }
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Number of remote refreshes performed by this cache.
    pub fn refresh_count(&self) -> u32 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// The in-memory credential, if one has been loaded or issued.
    pub fn current(&self) -> Option<Credential> {
        self.current.read().clone()
    }

    /// Read the persisted credential and decide whether it can be used.
    pub async fn load(&self) -> Result<CacheState> {
        let Some(credential) = self.persisted()? else {
            tracing::debug!("no persisted credential");
            return Ok(CacheState::NeedsRefresh);
        };

        if !credential.is_usable_at(Utc::now(), self.margin) {
            tracing::debug!(expires_at = %credential.expires_at, "persisted credential is stale");
            return Ok(CacheState::NeedsRefresh);
        }

        *self.current.write() = Some(credential.clone());
        Ok(CacheState::Fresh(credential))
    }

    /// Return a usable credential, refreshing first when `force` is set or the
    /// persisted one is missing or stale.
    pub async fn ensure_fresh(&self, force: bool) -> Result<Credential> {
        if !force && let CacheState::Fresh(credential) = self.load().await? {
            return Ok(credential);
        }
        self.refresh().await
    }

    /// Return a usable credential for the next call.
    ///
    /// The in-memory credential is returned while it is outside the refresh
    /// margin. Once it goes stale it is replaced through the single-flight
    /// path, so concurrent callers share one refresh.
    pub async fn get_valid(&self) -> Result<Credential> {
        match self.current() {
            Some(credential) if credential.is_usable_at(Utc::now(), self.margin) => Ok(credential),
            Some(stale) => {
                tracing::debug!(expires_at = %stale.expires_at, "in-memory credential went stale");
                self.refresh_stale(&stale.value).await
            }
            None => self.ensure_fresh(false).await,
        }
    }

    /// Issue a new credential from the platform and persist it.
    pub async fn refresh(&self) -> Result<Credential> {
        let _guard = self.refresh_lock.lock().await;
        self.issue().await
    }

    /// Single-flight refresh after `stale` was rejected.
    ///
    /// If another task already replaced `stale` while this one waited for the
    /// lock, the replacement is returned without contacting the platform.
    pub async fn refresh_stale(&self, stale: &str) -> Result<Credential> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(current) = self.current()
            && current.value != stale
            && current.is_usable_at(Utc::now(), self.margin)
        {
            tracing::debug!("credential already replaced by a concurrent refresh");
            return Ok(current);
        }
        self.issue().await
    }

    /// Callers must hold `refresh_lock`.
    async fn issue(&self) -> Result<Credential> {
        let url = format!(
            "{}/cgi-bin/token?grant_type=client_credential&appid={}&secret={}",
            self.api_base,
            urlencoding::encode(self.identity.app_id()),
            urlencoding::encode(self.identity.app_secret()),
        );

        let body = get_json(self.transport.as_ref(), &url).await?;
        let response: TokenResponse = serde_json::from_value(body)?;

        let value = match response.access_token {
            Some(token) if !token.is_empty() => token,
            _ => {
                return Err(WxError::Credential(format!(
                    "token endpoint returned no access_token (errcode {}: {})",
                    response.errcode.unwrap_or_default(),
                    response.errmsg.unwrap_or_default()
                )));
            }
        };

        let lifetime = response.expires_in.unwrap_or(0);
        if lifetime < 0 {
            return Err(WxError::Credential(format!(
                "token endpoint returned a negative expires_in ({})",
                lifetime
            )));
        }
        let expires_at = Utc::now()
            .timestamp()
            .checked_add(lifetime)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| {
                WxError::Credential(format!("expires_in out of range ({})", lifetime))
            })?;
        let credential = Credential { value, expires_at };

        self.store.set(ACCESS_TOKEN, &credential.value)?;
        self.store
            .set(ACCESS_TOKEN_EXPIRE_TIME, &credential.expires_at.timestamp().to_string())?;

        *self.current.write() = Some(credential.clone());
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            app_id = %self.identity.app_id(),
            expires_at = %credential.expires_at,
            "access credential refreshed"
        );
        Ok(credential)
    }

    /// Credential details for display, without triggering a refresh.
    pub async fn status(&self) -> Result<CredentialStatus> {
        let now = Utc::now();
        let credential = match self.current() {
            Some(c) => Some(c),
            None => match self.load().await? {
                CacheState::Fresh(c) => Some(c),
                CacheState::NeedsRefresh => self.persisted()?,
            },
        };

        Ok(match credential {
            Some(c) => CredentialStatus {
                present: true,
                expires_at: Some(c.expires_at),
                expires_in_secs: (c.expires_at - now).num_seconds().max(0),
                stale: !c.is_usable_at(now, self.margin),
            },
            None => CredentialStatus {
                present: false,
                expires_at: None,
                expires_in_secs: 0,
                stale: true,
            },
        })
    }

    /// Persisted credential, stale or not. `None` when either field is absent.
    fn persisted(&self) -> Result<Option<Credential>> {
        let value = self.store.get(ACCESS_TOKEN)?;
        let expires_at = self
            .store
            .get(ACCESS_TOKEN_EXPIRE_TIME)?
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));
        Ok(value.zip(expires_at).map(|(value, expires_at)| Credential { value, expires_at }))
    }
}

/// Shared credential cache.
pub type SharedCredentialCache = Arc<CredentialCache>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use serde_json::json;
    use wxmp_store::SqliteConfigStore;

    fn store_with_identity() -> Arc<SqliteConfigStore> {
        let store = Arc::new(SqliteConfigStore::open_in_memory("").unwrap());
        store.set(APPID, "wx_app").unwrap();
        store.set(APPSECRET, "s3cret").unwrap();
        store
    }

    fn cache(store: Arc<SqliteConfigStore>, transport: Arc<ScriptedTransport>) -> CredentialCache {
        let identity = ClientIdentity::load(store.as_ref()).unwrap();
        CredentialCache::new(identity, store, transport, &PlatformConfig::default())
    }

    fn persist(store: &SqliteConfigStore, value: &str, expires_at: DateTime<Utc>) {
        store.set(ACCESS_TOKEN, value).unwrap();
        store
            .set(ACCESS_TOKEN_EXPIRE_TIME, &expires_at.timestamp().to_string())
            .unwrap();
    }

    #[test]
    fn test_identity_requires_both_parts() {
        assert!(matches!(ClientIdentity::new("", "x"), Err(WxError::Config(_))));
        assert!(matches!(ClientIdentity::new("x", " "), Err(WxError::Config(_))));

        let store = SqliteConfigStore::open_in_memory("").unwrap();
        assert!(matches!(ClientIdentity::load(&store), Err(WxError::Config(_))));

        let identity = ClientIdentity::new("wx1", "hunter2").unwrap();
        assert!(!format!("{:?}", identity).contains("hunter2"));
    }

    #[test]
    fn test_usability_margin() {
        let now = Utc::now();
        let margin = Duration::minutes(5);
        let credential = |value: &str, expires_at| Credential {
            value: value.to_string(),
            expires_at,
        };

        assert!(credential("t", now + Duration::hours(2)).is_usable_at(now, margin));
        assert!(credential("t", now + Duration::minutes(5)).is_usable_at(now, margin));
        assert!(!credential("t", now + Duration::minutes(4)).is_usable_at(now, margin));
        assert!(!credential("t", now - Duration::seconds(1)).is_usable_at(now, margin));
        assert!(!credential("", now + Duration::hours(2)).is_usable_at(now, margin));
    }

    #[tokio::test]
    async fn test_fresh_credential_never_refreshes() {
        let store = store_with_identity();
        for minutes in [6, 30, 120, 7 * 24 * 60] {
            persist(&store, "cached", Utc::now() + Duration::minutes(minutes));
            let transport = Arc::new(ScriptedTransport::new());
            let cache = cache(store.clone(), transport.clone());

            let credential = cache.ensure_fresh(false).await.unwrap();
            assert_eq!(credential.value, "cached");
            assert_eq!(cache.refresh_count(), 0);
            assert!(transport.requests().is_empty());
        }
    }

    #[tokio::test]
    async fn test_stale_credential_always_refreshes() {
        let store = store_with_identity();
        for minutes in [4, 1, 0, -1, -600] {
            persist(&store, "old", Utc::now() + Duration::minutes(minutes));
            let transport = Arc::new(ScriptedTransport::new());
            transport.push_json(json!({"access_token": "new", "expires_in": 7200}));
            let cache = cache(store.clone(), transport.clone());

            assert_eq!(cache.load().await.unwrap(), CacheState::NeedsRefresh);
            let credential = cache.ensure_fresh(false).await.unwrap();
            assert_eq!(credential.value, "new");
            assert_eq!(cache.refresh_count(), 1);
            assert_eq!(transport.count("/cgi-bin/token"), 1);
        }
    }

    #[tokio::test]
    async fn test_missing_credential_needs_refresh() {
        let store = store_with_identity();
        let cache = cache(store.clone(), Arc::new(ScriptedTransport::new()));
        assert_eq!(cache.load().await.unwrap(), CacheState::NeedsRefresh);

        store.set(ACCESS_TOKEN, "value-only").unwrap();
        assert_eq!(cache.load().await.unwrap(), CacheState::NeedsRefresh);

        store.set(ACCESS_TOKEN_EXPIRE_TIME, "not-a-number").unwrap();
        assert_eq!(cache.load().await.unwrap(), CacheState::NeedsRefresh);
    }

    #[tokio::test]
    async fn test_forced_refresh_ignores_fresh_credential() {
        let store = store_with_identity();
        persist(&store, "cached", Utc::now() + Duration::hours(1));
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!({"access_token": "forced", "expires_in": 7200}));
        let cache = cache(store, transport);

        assert_eq!(cache.ensure_fresh(true).await.unwrap().value, "forced");
        assert_eq!(cache.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_request_shape() {
        let store = store_with_identity();
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!({"access_token": "T", "expires_in": 7200}));
        let cache = cache(store, transport.clone());

        cache.refresh().await.unwrap();
        let requests = transport.requests();
        assert_eq!(
            requests[0].url,
            "https://api.weixin.qq.com/cgi-bin/token?grant_type=client_credential&appid=wx_app&secret=s3cret"
        );
        assert!(requests[0].body.is_none());
    }

    #[tokio::test]
    async fn test_refresh_persists_and_reloads_identically() {
        let store = store_with_identity();
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!({"access_token": "issued", "expires_in": 7200}));

        let issued = cache(store.clone(), transport).refresh().await.unwrap();
        let expected = Utc::now().timestamp() + 7200;
        assert!((issued.expires_at.timestamp() - expected).abs() <= 1);

        let reloaded = cache(store, Arc::new(ScriptedTransport::new()));
        assert_eq!(reloaded.load().await.unwrap(), CacheState::Fresh(issued));
    }

    #[tokio::test]
    async fn test_refresh_without_token_fails() {
        let store = store_with_identity();
        persist(&store, "kept", Utc::now() - Duration::hours(1));
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!({"errcode": 40013, "errmsg": "invalid appid"}));
        transport.push_json(json!({"access_token": "", "expires_in": 7200}));
        let cache = cache(store.clone(), transport);

        let err = cache.refresh().await.unwrap_err();
        assert!(matches!(err, WxError::Credential(ref m) if m.contains("40013")));
        assert!(matches!(cache.refresh().await, Err(WxError::Credential(_))));

        // Failed refreshes leave the store untouched
        assert_eq!(store.get(ACCESS_TOKEN).unwrap().as_deref(), Some("kept"));
        assert!(cache.current().is_none());
    }

    #[tokio::test]
    async fn test_refresh_rejects_out_of_range_lifetime() {
        let store = store_with_identity();
        persist(&store, "kept", Utc::now() - Duration::hours(1));
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_json(json!({"access_token": "huge", "expires_in": i64::MAX}))
            .push_json(json!({"access_token": "far", "expires_in": i64::MAX / 2}))
            .push_json(json!({"access_token": "negative", "expires_in": -60}));
        let cache = cache(store.clone(), transport);

        for _ in 0..3 {
            assert!(matches!(cache.refresh().await, Err(WxError::Credential(_))));
        }
        assert_eq!(store.get(ACCESS_TOKEN).unwrap().as_deref(), Some("kept"));
        assert!(cache.current().is_none());
        assert_eq!(cache.refresh_count(), 0);
    }

    #[tokio::test]
    async fn test_get_valid_replaces_stale_in_memory_credential() {
        let store = store_with_identity();
        persist(&store, "cached", Utc::now() + Duration::hours(1));
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!({"access_token": "renewed", "expires_in": 7200}));
        let cache = cache(store.clone(), transport.clone());

        assert_eq!(cache.get_valid().await.unwrap().value, "cached");
        assert!(transport.requests().is_empty());

        // The loaded credential ages past the margin while the cache is held
        *cache.current.write() = Some(Credential {
            value: "cached".to_string(),
            expires_at: Utc::now() + Duration::minutes(1),
        });
        assert_eq!(cache.get_valid().await.unwrap().value, "renewed");
        assert_eq!(transport.count("/cgi-bin/token"), 1);
        assert_eq!(store.get(ACCESS_TOKEN).unwrap().as_deref(), Some("renewed"));

        assert_eq!(cache.get_valid().await.unwrap().value, "renewed");
        assert_eq!(cache.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_transport_failure_propagates() {
        let store = store_with_identity();
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_failure("connection refused");
        let cache = cache(store, transport);

        assert!(matches!(cache.refresh().await, Err(WxError::Transport(_))));
    }

    #[tokio::test]
    async fn test_refresh_stale_is_single_flight() {
        let store = store_with_identity();
        let transport = Arc::new(ScriptedTransport::new());
        transport.route(
            "/cgi-bin/token",
            json!({"access_token": "replacement", "expires_in": 7200}),
        );
        let cache = Arc::new(cache(store, transport.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.refresh_stale("rejected").await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().value, "replacement");
        }

        assert_eq!(cache.refresh_count(), 1);
        assert_eq!(transport.count("/cgi-bin/token"), 1);
    }

    #[tokio::test]
    async fn test_status_reports_without_refreshing() {
        let store = store_with_identity();
        let transport = Arc::new(ScriptedTransport::new());
        let cache = cache(store.clone(), transport.clone());

        let status = cache.status().await.unwrap();
        assert!(!status.present);
        assert!(status.expires_in_display().contains("No credential"));

        persist(&store, "old", Utc::now() - Duration::minutes(1));
        let status = cache.status().await.unwrap();
        assert!(status.present && status.stale);
        assert_eq!(status.expires_in_secs, 0);

        persist(&store, "ok", Utc::now() + Duration::hours(2));
        let status = cache.status().await.unwrap();
        assert!(!status.stale);
        let display = status.expires_in_display();
        assert!(display.starts_with("1h") || display.starts_with("2h"));

        assert!(transport.requests().is_empty());
    }
}
