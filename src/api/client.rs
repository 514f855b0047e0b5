//! Authenticated HTTP client for the support-desk REST API
//!
//! Wraps reqwest::Client with bearer-token injection and shared status
//! checking.

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::models::UserProfile;

/// Authenticated client for the desk backend.
pub struct DeskClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
    profile: Option<UserProfile>,
}

impl DeskClient {
    /// Load config and build the client. Fails with a clear message when the
    /// stored token is missing or expired.
    pub fn new() -> Result<Self> {
        let config = Config::load()?;
        let api_base = config.api_base()?;

        let token = config
            .get_access_token()
            .context("Not logged in. Run 'desk-cli login' first.")?;
        if token.is_expired() {
            bail!("Token expired. Run 'desk-cli login' to refresh.");
        }

        Ok(Self {
            http: reqwest::Client::new(),
            api_base,
            token: token.token,
            profile: config.get_profile(),
        })
    }

    /// Profile of the logged-in user, when the config carries one.
    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// GET request (bearer auth).
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST request with a JSON body (bearer auth).
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST request without a body (receipt endpoints).
    pub async fn post_empty(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("POST {}", url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        check_response(resp, &url).await
    }

    /// PUT request with a JSON body (bearer auth).
    pub async fn put(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = self.url(path);
        tracing::debug!("PUT {}", url);

        let resp = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("PUT {} failed", url))?;

        check_response(resp, &url).await
    }
}

#[cfg(test)]
impl DeskClient {
    /// Client pointing nowhere, for tests that never issue requests.
    pub fn for_tests() -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: "http://localhost:0/api".to_string(),
            token: "test-token".to_string(),
            profile: None,
        }
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Session invalid -- run 'desk-cli login'.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
