use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::api::LogsApiClient;
use crate::error::{EventSearchError, Result};

/// 客户端侧估计的 token 生命周期。认证响应目前不携带过期时间，
/// 如果 API 将来返回显式 TTL，应以其为准。
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub access_key: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Owns the bearer token and its expiry as one unit. The cache sits behind a
/// single async mutex, so a refresh is single-flight and no caller can observe
/// a token without its matching expiry.
pub struct AuthSession {
    api: Arc<LogsApiClient>,
    credentials: Option<Credentials>,
    ttl: Duration,
    cache: Mutex<Option<CachedToken>>,
}

impl AuthSession {
    pub fn new(api: Arc<LogsApiClient>, credentials: Option<Credentials>) -> Self {
        Self::with_ttl(api, credentials, DEFAULT_TOKEN_TTL)
    }

    /// TTL 可注入，便于测试过期路径。
    pub fn with_ttl(
        api: Arc<LogsApiClient>,
        credentials: Option<Credentials>,
        ttl: Duration,
    ) -> Self {
        Self {
            api,
            credentials,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Return a usable bearer token, re-acquiring it when the cached one has
    /// expired. Idempotent while the token is valid: no network call is made.
    pub async fn ensure_token(&self) -> Result<String> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            EventSearchError::CredentialsMissing(
                "set INFINITY_CLIENT_ID and INFINITY_ACCESS_KEY".to_string(),
            )
        })?;

        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.value.clone());
            }
        }

        let value = self.api.authenticate(credentials).await?;
        let expires_at = Instant::now() + self.ttl;
        *cache = Some(CachedToken {
            value: value.clone(),
            expires_at,
        });
        Ok(value)
    }
}
