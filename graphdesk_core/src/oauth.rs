use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::auth::{AuthDetails, AuthMethod, GraphSettings};
use crate::auth_store::AuthStore;
use crate::error::ConnectorError;

const LOGIN_BASE: &str = "https://login.microsoftonline.com";
/// Tokens are treated as expired this many seconds early.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthStart {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    pub expires_in: i64,
    pub interval: Option<i64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

/// Outcome of a single device-code poll.
#[derive(Debug, Clone)]
pub enum DevicePoll {
    Pending,
    SlowDown,
    Complete(OAuthTokens),
}

fn token_endpoint(tenant_id: &str) -> String {
    format!(
        "{}/{}/oauth2/v2.0/token",
        LOGIN_BASE,
        if tenant_id.is_empty() {
            "common"
        } else {
            tenant_id
        }
    )
}

fn parse_tokens(v: &Value) -> Result<OAuthTokens, ConnectorError> {
    let access_token = v
        .get("access_token")
        .and_then(|s| s.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConnectorError::Authentication("no access_token in response".into()))?;
    Ok(OAuthTokens {
        access_token: access_token.to_string(),
        refresh_token: v
            .get("refresh_token")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
        expires_in: v.get("expires_in").and_then(|i| i.as_i64()),
        scope: v
            .get("scope")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
        token_type: v
            .get("token_type")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
    })
}

async fn post_form(url: &str, body: &[(&str, String)]) -> Result<(u16, Value), ConnectorError> {
    let resp = reqwest::Client::new()
        .post(url)
        .form(body)
        .send()
        .await
        .map_err(ConnectorError::HttpRequest)?;
    let status = resp.status().as_u16();
    let v = resp
        .json::<Value>()
        .await
        .map_err(|e| ConnectorError::Other(e.to_string()))?;
    Ok((status, v))
}

pub async fn ms_client_credentials(
    tenant_id: &str,
    client_id: &str,
    client_secret: &str,
    scope: &str,
) -> Result<OAuthTokens, ConnectorError> {
    let body = [
        ("grant_type", "client_credentials".to_string()),
        ("client_id", client_id.to_string()),
        ("client_secret", client_secret.to_string()),
        ("scope", scope.to_string()),
    ];
    let (status, v) = post_form(&token_endpoint(tenant_id), &body).await?;
    if !(200..300).contains(&status) {
        return Err(ConnectorError::Authentication(format!(
            "client credentials grant failed: {}",
            describe_oauth_error(&v)
        )));
    }
    parse_tokens(&v)
}

pub async fn ms_device_authorize(
    tenant_id: &str,
    client_id: &str,
    scopes: &str,
) -> Result<DeviceAuthStart, ConnectorError> {
    let url = format!(
        "{}/{}/oauth2/v2.0/devicecode",
        LOGIN_BASE,
        if tenant_id.is_empty() {
            "common"
        } else {
            tenant_id
        }
    );
    let body = [
        ("client_id", client_id.to_string()),
        ("scope", scopes.to_string()),
    ];
    let (status, v) = post_form(&url, &body).await?;
    if !(200..300).contains(&status) {
        return Err(ConnectorError::Authentication(format!(
            "device authorize failed: {}",
            describe_oauth_error(&v)
        )));
    }
    Ok(DeviceAuthStart {
        device_code: v["device_code"].as_str().unwrap_or_default().to_string(),
        user_code: v["user_code"].as_str().unwrap_or_default().to_string(),
        verification_uri: v["verification_uri"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        verification_uri_complete: v
            .get("verification_uri_complete")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
        expires_in: v["expires_in"].as_i64().unwrap_or(900),
        interval: v.get("interval").and_then(|i| i.as_i64()),
        message: v
            .get("message")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string()),
    })
}

pub async fn ms_device_poll(
    tenant_id: &str,
    client_id: &str,
    device_code: &str,
) -> Result<DevicePoll, ConnectorError> {
    let body = [
        (
            "grant_type",
            "urn:ietf:params:oauth:grant-type:device_code".to_string(),
        ),
        ("client_id", client_id.to_string()),
        ("device_code", device_code.to_string()),
    ];
    let (status, v) = post_form(&token_endpoint(tenant_id), &body).await?;
    if (200..300).contains(&status) {
        return Ok(DevicePoll::Complete(parse_tokens(&v)?));
    }
    match v.get("error").and_then(|e| e.as_str()) {
        Some("authorization_pending") => Ok(DevicePoll::Pending),
        Some("slow_down") => Ok(DevicePoll::SlowDown),
        _ => Err(ConnectorError::Authentication(format!(
            "poll failed: {}",
            describe_oauth_error(&v)
        ))),
    }
}

pub async fn ms_refresh_token(
    tenant_id: &str,
    client_id: &str,
    client_secret: Option<&str>,
    refresh_token: &str,
) -> Result<OAuthTokens, ConnectorError> {
    let mut body = vec![
        ("grant_type", "refresh_token".to_string()),
        ("client_id", client_id.to_string()),
        ("refresh_token", refresh_token.to_string()),
    ];
    if let Some(s) = client_secret {
        if !s.is_empty() {
            body.push(("client_secret", s.to_string()));
        }
    }
    let (status, v) = post_form(&token_endpoint(tenant_id), &body).await?;
    if !(200..300).contains(&status) {
        return Err(ConnectorError::Authentication(format!(
            "refresh failed: {}",
            describe_oauth_error(&v)
        )));
    }
    parse_tokens(&v)
}

fn describe_oauth_error(v: &Value) -> String {
    match (
        v.get("error").and_then(|e| e.as_str()),
        v.get("error_description").and_then(|e| e.as_str()),
    ) {
        (Some(code), Some(desc)) => format!("{}: {}", code, desc.lines().next().unwrap_or(desc)),
        (Some(code), None) => code.to_string(),
        _ => v.to_string(),
    }
}

fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Writes access/refresh/expiry fields into an auth map after a grant.
pub fn apply_tokens(auth: &mut AuthDetails, tokens: &OAuthTokens) {
    auth.insert("access_token".to_string(), tokens.access_token.clone());
    if let Some(r) = &tokens.refresh_token {
        auth.insert("refresh_token".to_string(), r.clone());
    }
    if let Some(ex) = tokens.expires_in {
        auth.insert("expires_in".to_string(), ex.to_string());
        auth.insert(
            "expires_at".to_string(),
            (now_epoch() + ex - EXPIRY_SKEW_SECS).to_string(),
        );
    }
}

/// Writes a token grant into the stored credentials. Starts from what the
/// store already holds so environment overrides never reach the file; only
/// the token fields and `extra` are written.
pub fn persist_tokens(
    store: &dyn AuthStore,
    provider: &str,
    tokens: &OAuthTokens,
    extra: &[(&str, String)],
) -> Result<(), ConnectorError> {
    let mut stored = store.load(provider).unwrap_or_default();
    apply_tokens(&mut stored, tokens);
    for (key, value) in extra {
        stored.insert((*key).to_string(), value.clone());
    }
    store
        .save(provider, &stored)
        .map_err(|e| ConnectorError::Other(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub access_token: String,
    /// Unix seconds, already reduced by the skew. `None` means "no known expiry".
    pub expires_at: Option<i64>,
}

impl CachedToken {
    pub fn from_grant(tokens: &OAuthTokens, now: i64) -> Self {
        Self {
            access_token: tokens.access_token.clone(),
            expires_at: tokens.expires_in.map(|ex| now + ex - EXPIRY_SKEW_SECS),
        }
    }

    pub fn is_fresh(&self, now: i64) -> bool {
        match self.expires_at {
            Some(at) => at > now,
            None => true,
        }
    }
}

/// Hands out bearer tokens for Graph calls, re-acquiring them when stale.
pub struct TokenProvider {
    settings: GraphSettings,
    auth: Mutex<AuthDetails>,
    cached: Mutex<Option<CachedToken>>,
    store: Option<Arc<dyn AuthStore>>,
    provider_key: &'static str,
}

impl TokenProvider {
    pub fn new(settings: GraphSettings, auth: AuthDetails) -> Self {
        let cached = auth.get("access_token").map(|at| CachedToken {
            access_token: at.clone(),
            expires_at: auth.get("expires_at").and_then(|e| e.parse::<i64>().ok()),
        });
        Self {
            settings,
            auth: Mutex::new(auth),
            cached: Mutex::new(cached),
            store: None,
            provider_key: "microsoft-graph",
        }
    }

    /// Persist rotated delegated credentials to `store` after a refresh.
    pub fn with_store(mut self, store: Arc<dyn AuthStore>, provider_key: &'static str) -> Self {
        self.store = Some(store);
        self.provider_key = provider_key;
        self
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.settings
    }

    pub async fn access_token(&self) -> Result<String, ConnectorError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            let static_token = self.settings.method == AuthMethod::StaticToken;
            if static_token || token.is_fresh(now_epoch()) {
                return Ok(token.access_token.clone());
            }
        }

        let tokens = match self.settings.method {
            AuthMethod::StaticToken => {
                return Err(ConnectorError::Authentication(
                    "no access_token configured".to_string(),
                ))
            }
            AuthMethod::ClientCredentials => {
                debug!(tenant = %self.settings.tenant_id, "acquiring app-only Graph token");
                ms_client_credentials(
                    &self.settings.tenant_id,
                    self.settings.client_id.as_deref().unwrap_or_default(),
                    self.settings.client_secret.as_deref().unwrap_or_default(),
                    &self.settings.scopes,
                )
                .await?
            }
            AuthMethod::DeviceCode => {
                let refresh = self
                    .auth
                    .lock()
                    .await
                    .get("refresh_token")
                    .cloned()
                    .ok_or_else(|| {
                        ConnectorError::Authentication(
                            "Missing refresh_token (run `graphdesk login`)".to_string(),
                        )
                    })?;
                debug!("refreshing delegated Graph token");
                let tokens = ms_refresh_token(
                    &self.settings.tenant_id,
                    self.settings.client_id.as_deref().unwrap_or_default(),
                    self.settings.client_secret.as_deref(),
                    &refresh,
                )
                .await?;
                apply_tokens(&mut *self.auth.lock().await, &tokens);
                if let Some(store) = &self.store {
                    if let Err(e) = persist_tokens(store.as_ref(), self.provider_key, &tokens, &[]) {
                        tracing::warn!("could not persist refreshed token: {}", e);
                    }
                }
                tokens
            }
        };

        let token = CachedToken::from_grant(&tokens, now_epoch());
        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_store::MemoryAuthStore;
    use serde_json::json;

    #[test]
    fn persisted_tokens_leave_overrides_out_of_the_store() {
        let store = MemoryAuthStore::new();
        let mut stored = AuthDetails::new();
        stored.insert("client_id".into(), "app".into());
        stored.insert("refresh_token".into(), "old-rt".into());
        store.save("microsoft-graph", &stored).unwrap();

        // What a merged view would carry from the environment.
        let mut merged = stored.clone();
        merged.insert("client_secret".into(), "from-env".into());
        merged.insert("llm_api_key".into(), "sk-env".into());

        let tokens = OAuthTokens {
            access_token: "new-at".into(),
            refresh_token: Some("new-rt".into()),
            expires_in: Some(3600),
            scope: None,
            token_type: None,
        };
        apply_tokens(&mut merged, &tokens);
        persist_tokens(
            &store,
            "microsoft-graph",
            &tokens,
            &[("auth_method", "device_code".to_string()), ("tenant_id", "contoso".to_string())],
        )
        .unwrap();

        let saved = store.load("microsoft-graph").unwrap();
        assert_eq!(saved["access_token"], "new-at");
        assert_eq!(saved["refresh_token"], "new-rt");
        assert_eq!(saved["client_id"], "app");
        assert_eq!(saved["auth_method"], "device_code");
        assert_eq!(saved["tenant_id"], "contoso");
        assert!(saved.contains_key("expires_at"));
        assert!(!saved.contains_key("client_secret"));
        assert!(!saved.contains_key("llm_api_key"));
    }

    #[test]
    fn cached_token_respects_skewed_expiry() {
        let tokens = OAuthTokens {
            access_token: "at".into(),
            refresh_token: None,
            expires_in: Some(3600),
            scope: None,
            token_type: None,
        };
        let t = CachedToken::from_grant(&tokens, 1_000);
        assert_eq!(t.expires_at, Some(1_000 + 3600 - 60));
        assert!(t.is_fresh(1_000 + 3000));
        assert!(!t.is_fresh(1_000 + 3540));
    }

    #[test]
    fn parse_tokens_requires_access_token() {
        assert!(parse_tokens(&json!({"token_type": "Bearer"})).is_err());
        let t = parse_tokens(&json!({"access_token": "x", "expires_in": 10})).unwrap();
        assert_eq!(t.expires_in, Some(10));
    }

    #[test]
    fn describes_aad_errors_by_first_line() {
        let v = json!({"error": "invalid_client", "error_description": "AADSTS7000215: Invalid secret.\r\nTrace ID: 1"});
        assert_eq!(
            describe_oauth_error(&v),
            "invalid_client: AADSTS7000215: Invalid secret."
        );
    }

    #[tokio::test]
    async fn static_token_is_served_without_network() {
        let mut auth = AuthDetails::new();
        auth.insert("access_token".into(), "static".into());
        let settings = GraphSettings::from_auth(&auth).unwrap();
        let provider = TokenProvider::new(settings, auth);
        assert_eq!(provider.access_token().await.unwrap(), "static");
    }

    #[tokio::test]
    async fn fresh_stored_token_skips_refresh() {
        let mut auth = AuthDetails::new();
        auth.insert("client_id".into(), "app".into());
        auth.insert("refresh_token".into(), "rt".into());
        auth.insert("access_token".into(), "cached".into());
        auth.insert("expires_at".into(), (now_epoch() + 600).to_string());
        let settings = GraphSettings::from_auth(&auth).unwrap();
        assert_eq!(settings.method, AuthMethod::DeviceCode);
        let provider = TokenProvider::new(settings, auth);
        assert_eq!(provider.access_token().await.unwrap(), "cached");
    }
}
