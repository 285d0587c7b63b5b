// ABOUTME: Authentication against the data lake API gateway
// ABOUTME: Exchanges an environment's service account for a bearer token (OAuth2 password grant)

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::control::EnvironmentRecord;
use crate::error::SyncError;

/// An authenticated data lake session.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Control store id of the environment
    pub environment_id: i64,
    pub tenant: String,
    /// Base URL of the dataobjects API, without trailing slash
    pub api_base: String,
    /// Bearer token
    pub token: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("environment_id", &self.environment_id)
            .field("tenant", &self.tenant)
            .field("api_base", &self.api_base)
            .field("token", &"***")
            .finish()
    }
}

/// Produces a bearer-token session for an environment.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn authenticate(&self, environment: &EnvironmentRecord) -> Result<Session, SyncError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// OAuth2 resource-owner password grant against the environment's token endpoint.
pub struct OAuthTokenProvider {
    client: Client,
}

impl OAuthTokenProvider {
    pub fn new() -> Result<Self, SyncError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                SyncError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }

    /// Password grant with the client credentials sent as HTTP Basic auth.
    fn token_request(&self, settings: &OAuthSettings) -> RequestBuilder {
        self.client
            .post(settings.token_url.clone())
            .basic_auth(&settings.client_id, Some(&settings.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", settings.username.as_str()),
                ("password", settings.password.as_str()),
            ])
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn authenticate(&self, environment: &EnvironmentRecord) -> Result<Session, SyncError> {
        let settings = OAuthSettings::from_environment(environment)?;

        tracing::debug!(
            "Requesting access token for {} from {}",
            environment.tenant,
            settings.token_url
        );

        let response = self
            .token_request(&settings)
            .send()
            .await
            .map_err(|e| {
                SyncError::SourceUnavailable(format!("Failed to request access token: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::SourceUnavailable(format!(
                "Token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            SyncError::SourceUnavailable(format!("Failed to parse token response: {}", e))
        })?;

        let token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                SyncError::SourceUnavailable("Invalid access token received".to_string())
            })?;

        Ok(Session {
            environment_id: environment.id,
            tenant: environment.tenant.clone(),
            api_base: settings.api_base,
            token,
        })
    }
}

/// Everything needed to request a token, validated up front.
#[derive(Debug, Clone)]
struct OAuthSettings {
    token_url: Url,
    api_base: String,
    client_id: String,
    client_secret: String,
    username: String,
    password: String,
}

impl OAuthSettings {
    fn from_environment(env: &EnvironmentRecord) -> Result<Self, SyncError> {
        let required = |value: &Option<String>, name: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    SyncError::Configuration(format!(
                        "Environment {} is missing required OAuth field '{}'",
                        env.tenant, name
                    ))
                })
        };

        let client_id = required(&env.client_id, "client_id")?;
        let client_secret = required(&env.client_secret, "client_secret")?;
        let api_url = required(&env.api_url, "api_url")?;
        let token_path_prefix = required(&env.token_path_prefix, "token_path_prefix")?;
        let token_path = env.token_path.clone().unwrap_or_default();

        let token_url = token_endpoint(&api_url, &format!("{}{}", token_path_prefix, token_path))?;
        let api_base = format!(
            "{}/{}/DATAFABRIC/datalake/v2",
            api_url.trim_end_matches('/'),
            env.tenant
        );

        Ok(Self {
            token_url,
            api_base,
            client_id,
            client_secret,
            username: env.service_account_key.clone().unwrap_or_default(),
            password: env.service_account_secret.clone().unwrap_or_default(),
        })
    }
}

/// Resolve the token endpoint; `path` may be absolute or relative to `host`.
fn token_endpoint(host: &str, path: &str) -> Result<Url, SyncError> {
    let invalid = |e: url::ParseError| {
        SyncError::Configuration(format!("Invalid token endpoint '{}{}': {}", host, path, e))
    };

    if let Ok(absolute) = Url::parse(path) {
        return Ok(absolute);
    }
    let mut base = Url::parse(host).map_err(invalid)?;
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    base.join(path.trim_start_matches('/')).map_err(invalid)
}
