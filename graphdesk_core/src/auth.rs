use std::collections::HashMap;

use crate::error::ConnectorError;

/// Flat key/value credentials as stored in the auth store.
pub type AuthDetails = HashMap<String, String>;

pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_APP_SCOPE: &str = "https://graph.microsoft.com/.default";
pub const DEFAULT_DELEGATED_SCOPES: &str =
    "offline_access Mail.Read Calendars.Read OnlineMeetings.Read OnlineMeetingTranscript.Read.All Files.ReadWrite";

/// Environment variables that override stored credentials, keyed by auth field.
const ENV_OVERRIDES: &[(&str, &[&str])] = &[
    ("tenant_id", &["AZURE_TENANT_ID"]),
    ("client_id", &["AZURE_CLIENT_ID"]),
    ("client_secret", &["AZURE_CLIENT_SECRET"]),
    ("mailbox", &["GRAPH_MAILBOX"]),
    ("access_token", &["GRAPH_ACCESS_TOKEN"]),
    ("llm_api_key", &["GRAPHDESK_LLM_API_KEY", "OPENAI_API_KEY"]),
    ("llm_model", &["GRAPHDESK_LLM_MODEL"]),
    ("llm_base_url", &["GRAPHDESK_LLM_BASE_URL"]),
];

/// Layers credentials: `explicit` over environment over `stored`.
pub fn merge_auth(stored: Option<AuthDetails>, explicit: &AuthDetails) -> AuthDetails {
    merge_auth_with_env(stored, explicit, |k| std::env::var(k).ok())
}

pub(crate) fn merge_auth_with_env<F>(
    stored: Option<AuthDetails>,
    explicit: &AuthDetails,
    env: F,
) -> AuthDetails
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = stored.unwrap_or_default();
    for (field, vars) in ENV_OVERRIDES {
        if let Some(value) = vars
            .iter()
            .filter_map(|v| env(v))
            .find(|v| !v.trim().is_empty())
        {
            merged.insert(field.to_string(), value);
        }
    }
    for (k, v) in explicit {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ClientCredentials,
    DeviceCode,
    StaticToken,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::ClientCredentials => "client_credentials",
            AuthMethod::DeviceCode => "device_code",
            AuthMethod::StaticToken => "static_token",
        }
    }
}

/// Typed view over the merged credentials.
#[derive(Debug, Clone)]
pub struct GraphSettings {
    pub method: AuthMethod,
    pub tenant_id: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scopes: String,
    pub mailbox: Option<String>,
    pub base_url: String,
}

impl GraphSettings {
    pub fn from_auth(auth: &AuthDetails) -> Result<Self, ConnectorError> {
        let get = |k: &str| {
            auth.get(k)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let client_secret = get("client_secret");
        let method = match get("auth_method").as_deref() {
            Some("client_credentials") => AuthMethod::ClientCredentials,
            Some("device_code") | Some("pkce") => AuthMethod::DeviceCode,
            Some("static_token") => AuthMethod::StaticToken,
            Some(other) => {
                return Err(ConnectorError::InvalidParams(format!(
                    "unknown auth_method '{}'",
                    other
                )))
            }
            None if client_secret.is_some() => AuthMethod::ClientCredentials,
            None if get("refresh_token").is_some() => AuthMethod::DeviceCode,
            None if get("access_token").is_some() => AuthMethod::StaticToken,
            None => {
                return Err(ConnectorError::Authentication(
                    "Microsoft Graph auth not configured (run `graphdesk config set` or `graphdesk login`)"
                        .to_string(),
                ))
            }
        };

        let settings = GraphSettings {
            method,
            tenant_id: get("tenant_id").unwrap_or_else(|| "common".to_string()),
            client_id: get("client_id"),
            client_secret,
            scopes: get("scopes").unwrap_or_else(|| match method {
                AuthMethod::ClientCredentials => DEFAULT_APP_SCOPE.to_string(),
                _ => DEFAULT_DELEGATED_SCOPES.to_string(),
            }),
            mailbox: get("mailbox"),
            base_url: get("graph_base_url")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| GRAPH_BASE_URL.to_string()),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConnectorError> {
        if self.method == AuthMethod::ClientCredentials {
            if self.tenant_id == "common" {
                return Err(ConnectorError::InvalidParams(
                    "client_credentials requires a tenant_id".to_string(),
                ));
            }
            if self.client_id.is_none() || self.client_secret.is_none() {
                return Err(ConnectorError::InvalidParams(
                    "client_credentials requires client_id and client_secret".to_string(),
                ));
            }
            // App-only tokens have no signed-in user, so `/me` is unavailable.
            if self.mailbox.is_none() {
                return Err(ConnectorError::InvalidParams(
                    "client_credentials requires a mailbox (user id or UPN)".to_string(),
                ));
            }
        }
        if self.method == AuthMethod::DeviceCode && self.client_id.is_none() {
            return Err(ConnectorError::InvalidParams(
                "device_code requires a client_id".to_string(),
            ));
        }
        Ok(())
    }
}
