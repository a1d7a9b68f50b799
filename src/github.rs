//! GitHub REST client for App installations
//!
//! Authenticated, paginated access to the GitHub REST surface for a given
//! App installation: repository discovery and lightweight health probes.
//! Token acquisition is delegated to an [`InstallationTokenProvider`] so
//! credential mechanics stay outside this module.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// User-Agent sent on every outbound GitHub request.
const USER_AGENT: &str = "GitHub-Sync/0.1";

/// Page size used for repository discovery.
const PER_PAGE: usize = 100;

/// GitHub client specific errors
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("installation token unavailable: {0}")]
    TokenUnavailable(String),

    #[error("GitHub API authentication failed: 401 Unauthorized")]
    Unauthorized,

    #[error("Rate limited by GitHub API. Retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("pagination exceeded the configured budget of {max_pages} pages")]
    PageBudgetExceeded { max_pages: u32 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

/// One repository record as returned by the installation repositories API
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteRepository {
    pub id: i64,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub html_url: String,
}

#[derive(Debug, Deserialize)]
struct InstallationRepositoriesPage {
    total_count: i64,
    repositories: Vec<RemoteRepository>,
}

/// Source of installation access tokens for outbound calls.
///
/// How tokens are obtained or refreshed is not this service's concern;
/// implementations may read configuration, an external secret store, or a
/// signing flow.
#[async_trait]
pub trait InstallationTokenProvider: Send + Sync {
    async fn token_for(&self, installation_id: i64) -> Result<String, GitHubError>;
}

/// Token provider backed by a single configured token.
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl InstallationTokenProvider for StaticTokenProvider {
    async fn token_for(&self, _installation_id: i64) -> Result<String, GitHubError> {
        self.token.clone().ok_or_else(|| {
            GitHubError::TokenUnavailable("no installation token configured".to_string())
        })
    }
}

/// Authenticated GitHub API surface used by the sync engine and the health
/// check runner. The trait is the seam for test doubles.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Fetch every repository the installation can access, following
    /// pagination until exhausted. Returns a flat ordered sequence.
    async fn list_installation_repositories(
        &self,
        installation_id: i64,
    ) -> Result<Vec<RemoteRepository>, GitHubError>;

    /// Lightweight probe that the installation credentials still work.
    async fn check_installation(&self, installation_id: i64) -> Result<(), GitHubError>;

    /// Lightweight probe that a single repository is still reachable under
    /// the installation.
    async fn check_repository(
        &self,
        installation_id: i64,
        full_name: &str,
    ) -> Result<(), GitHubError>;
}

/// reqwest-backed GitHub API client
pub struct HttpGitHubClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn InstallationTokenProvider>,
    max_pages: u32,
}

impl HttpGitHubClient {
    /// Create a new client against the given API base URL.
    pub fn new(
        base_url: String,
        tokens: Arc<dyn InstallationTokenProvider>,
        max_pages: u32,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            max_pages: max_pages.max(1),
        }
    }

    async fn get(
        &self,
        installation_id: i64,
        url: Url,
    ) -> Result<reqwest::Response, GitHubError> {
        let token = self.tokens.token_for(installation_id).await?;

        let response = self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response);
        }

        if response.status() == 401 {
            return Err(GitHubError::Unauthorized);
        }

        if response.status() == 429 || response.status() == 403 {
            if let Some(retry_after) = response
                .headers()
                .get("Retry-After")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
            {
                warn!(retry_after, "Rate limited by GitHub API");
                return Err(GitHubError::RateLimited { retry_after });
            }
        }

        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(GitHubError::Api { status, message })
    }
}

#[async_trait]
impl GitHubApi for HttpGitHubClient {
    async fn list_installation_repositories(
        &self,
        installation_id: i64,
    ) -> Result<Vec<RemoteRepository>, GitHubError> {
        let mut collected = Vec::new();
        let mut page: u32 = 1;

        loop {
            if page > self.max_pages {
                return Err(GitHubError::PageBudgetExceeded {
                    max_pages: self.max_pages,
                });
            }

            let mut url = Url::parse(&format!("{}/installation/repositories", self.base_url))?;
            url.query_pairs_mut()
                .append_pair("per_page", &PER_PAGE.to_string())
                .append_pair("page", &page.to_string());

            let response = self.get(installation_id, url).await?;
            let body: InstallationRepositoriesPage = response.json().await?;
            let fetched = body.repositories.len();
            collected.extend(body.repositories);

            debug!(
                installation_id,
                page,
                fetched,
                total_count = body.total_count,
                "Fetched installation repositories page"
            );

            // A short page terminates pagination; so does reaching the
            // advertised total, which avoids one trailing empty request.
            if fetched < PER_PAGE || collected.len() as i64 >= body.total_count {
                return Ok(collected);
            }

            page += 1;
        }
    }

    async fn check_installation(&self, installation_id: i64) -> Result<(), GitHubError> {
        let mut url = Url::parse(&format!("{}/installation/repositories", self.base_url))?;
        url.query_pairs_mut().append_pair("per_page", "1");

        self.get(installation_id, url).await.map(|_| ())
    }

    async fn check_repository(
        &self,
        installation_id: i64,
        full_name: &str,
    ) -> Result<(), GitHubError> {
        let url = Url::parse(&format!("{}/repos/{}", self.base_url, full_name))?;

        self.get(installation_id, url).await.map(|_| ())
    }
}
