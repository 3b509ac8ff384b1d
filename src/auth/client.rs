// QuickBooks Online OAuth2 + accounting API client
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::QuickBooksConfig;
use crate::error::RemoteError;
use crate::types::{Credential, NewCredential, TokenGrant};

/// Remote side of the credential lifecycle.
///
/// Implementations only report what the remote said; classifying failures
/// into caller-facing errors is left to the resilience layer.
#[async_trait]
pub trait AccountingProvider: Send + Sync {
    /// Build the URL the user is redirected to. No network, cannot fail.
    fn authorization_url(&self, state: &str) -> String;

    /// Exchange an authorization code for a fresh credential
    async fn exchange_code(&self, code: &str, realm_id: &str) -> Result<NewCredential, RemoteError>;

    /// Mint a new access token from the credential's refresh token, in place
    async fn refresh(&self, credential: &mut Credential) -> Result<(), RemoteError>;

    /// Account listing, optionally filtered server-side by name prefix
    async fn query_accounts(
        &self,
        credential: &Credential,
        name_prefix: Option<&str>,
    ) -> Result<Value, RemoteError>;
}

pub struct QuickBooksClient {
    config: QuickBooksConfig,
    http: reqwest::Client,
}

impl QuickBooksClient {
    pub fn new(config: QuickBooksConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RemoteError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, http })
    }

    /// POST a form to the token endpoint with client Basic auth
    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, RemoteError> {
        let start = Instant::now();
        let res = self
            .http
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await;
        observe("token", start);

        let res = check_status(res?).await?;
        Ok(res.json::<TokenGrant>().await?)
    }
}

async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }

    let body = res.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), "QuickBooks returned an error response");
    Err(RemoteError::Status {
        status: status.as_u16(),
        body,
    })
}

fn observe(operation: &str, start: Instant) {
    crate::metrics::METRICS
        .remote_duration_seconds
        .with_label_values(&[operation])
        .observe(start.elapsed().as_secs_f64());
}

/// Build the account query, escaping the prefix as a QuickBooks string literal
pub fn account_query(name_prefix: Option<&str>) -> String {
    let mut query = String::from("SELECT * FROM Account");

    if let Some(prefix) = name_prefix.filter(|p| !p.is_empty()) {
        query.push_str(" WHERE Name LIKE '");
        for ch in prefix.chars() {
            if ch == '\'' || ch == '\\' {
                query.push('\\');
            }
            query.push(ch);
        }
        query.push_str("%'");
    }

    query
}

#[async_trait]
impl AccountingProvider for QuickBooksClient {
    fn authorization_url(&self, state: &str) -> String {
        let params = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.config.scope)
            .append_pair("state", state)
            .finish();

        format!("{}?{}", self.config.auth_url, params)
    }

    async fn exchange_code(&self, code: &str, realm_id: &str) -> Result<NewCredential, RemoteError> {
        let grant = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", &self.config.redirect_uri),
            ])
            .await?;

        NewCredential::from_grant(&grant, realm_id, Utc::now())
    }

    async fn refresh(&self, credential: &mut Credential) -> Result<(), RemoteError> {
        let grant = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &credential.refresh_token),
            ])
            .await?;

        credential.apply_refresh(&grant, Utc::now())
    }

    async fn query_accounts(
        &self,
        credential: &Credential,
        name_prefix: Option<&str>,
    ) -> Result<Value, RemoteError> {
        let url = format!(
            "{}/{}/query",
            self.config.api_base_url.trim_end_matches('/'),
            credential.realm_id
        );
        let query = account_query(name_prefix);

        let start = Instant::now();
        let res = self
            .http
            .get(&url)
            .bearer_auth(&credential.access_token)
            .header("Accept", "application/json")
            .header("Content-Type", "text/plain")
            .query(&[("query", query.as_str())])
            .send()
            .await;
        observe("query_accounts", start);

        let res = check_status(res?).await?;
        Ok(res.json::<Value>().await?)
    }
}
