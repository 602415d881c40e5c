//! GitHub REST client
//!
//! The hosting provider is an opaque metadata/commits/contributors surface
//! plus the OAuth code exchange. Failures map onto the API taxonomy: bad
//! URLs are the caller's fault, missing repos are 404s, and everything else
//! is upstream.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::config::GithubConfig;

const DEFAULT_API_BASE: &str = "https://api.github.com";
const DEFAULT_WEB_BASE: &str = "https://github.com";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("devlens/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("{0}")]
    InvalidUrl(String),

    #[error("Repository not found")]
    RepoNotFound,

    #[error("{0}")]
    Upstream(String),
}

/// Everything the analyze endpoint needs about a repository head.
#[derive(Debug, Clone)]
pub struct RepoSnapshot {
    pub github_url: String,
    pub full_name: String,
    pub owner: String,
    pub name: String,
    pub description: Option<String>,
    pub stars: Option<i32>,
    pub forks: Option<i32>,
    pub language: Option<String>,
    pub size_kb: Option<i32>,
    pub default_branch: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubUser {
    pub id: i64,
    pub login: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

/// Normalize a user-supplied repository URL to `https://github.com/owner/repo`.
pub fn normalize_repo_url(raw: &str) -> Result<String, GithubError> {
    let parsed = Url::parse(raw.trim())
        .map_err(|_| GithubError::InvalidUrl("Invalid GitHub URL".to_string()))?;

    let scheme_ok = matches!(parsed.scheme(), "http" | "https");
    let host_ok = parsed
        .host_str()
        .is_some_and(|h| h.eq_ignore_ascii_case("github.com"));
    if !scheme_ok || !host_ok {
        return Err(GithubError::InvalidUrl(
            "Only github.com repository URLs are supported".to_string(),
        ));
    }

    let parts: Vec<&str> = parsed
        .path()
        .split('/')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 {
        return Err(GithubError::InvalidUrl(
            "GitHub URL must be in /owner/repo format".to_string(),
        ));
    }

    let owner = parts[0];
    let repo = parts[1].strip_suffix(".git").unwrap_or(parts[1]);
    if owner.is_empty() || repo.is_empty() {
        return Err(GithubError::InvalidUrl(
            "Invalid GitHub repository path".to_string(),
        ));
    }

    Ok(format!("https://github.com/{owner}/{repo}"))
}

pub struct GithubClient {
    http: reqwest::Client,
    config: GithubConfig,
    api_base: String,
    web_base: String,
}

impl GithubClient {
    pub fn new(config: GithubConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builds with static options");
        Self {
            http,
            config,
            api_base: DEFAULT_API_BASE.to_string(),
            web_base: DEFAULT_WEB_BASE.to_string(),
        }
    }

    /// Point the client at alternate hosts (proxies, test doubles).
    pub fn with_base_urls(mut self, api_base: &str, web_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.web_base = web_base.trim_end_matches('/').to_string();
        self
    }

    /// URL of the provider's OAuth authorization page.
    pub fn authorize_url(&self, state: &str) -> String {
        let mut url = Url::parse(&format!("{}/login/oauth/authorize", self.web_base))
            .expect("authorize URL is well-formed");
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.oauth_redirect_uri)
            .append_pair("scope", "read:user user:email")
            .append_pair("state", state);
        url.to_string()
    }

    /// Resolve current metadata and the head commit of a public repository.
    pub async fn resolve_snapshot(&self, github_url: &str) -> Result<RepoSnapshot, GithubError> {
        let normalized = normalize_repo_url(github_url)?;
        let owner_repo = normalized
            .strip_prefix("https://github.com/")
            .unwrap_or(&normalized);

        let repo_api = format!("{}/repos/{}", self.api_base, owner_repo);
        let repo_response = self
            .get_json(&repo_api)
            .await
            .map_err(|e| GithubError::Upstream(format!("Failed to fetch repository metadata: {e}")))?;

        let (status, repo_data) = repo_response;
        if status == 404 {
            return Err(GithubError::RepoNotFound);
        }
        if status != 200 {
            return Err(GithubError::Upstream(
                "Failed to fetch repository metadata".to_string(),
            ));
        }

        let default_branch = repo_data
            .get("default_branch")
            .and_then(Value::as_str)
            .unwrap_or("main")
            .to_string();

        let commit_api = format!("{repo_api}/commits/{default_branch}");
        let (commit_status, commit_data) = self
            .get_json(&commit_api)
            .await
            .map_err(|e| GithubError::Upstream(format!("Failed to resolve repository head commit: {e}")))?;
        if commit_status != 200 {
            return Err(GithubError::Upstream(
                "Failed to resolve repository head commit".to_string(),
            ));
        }
        let commit_sha = commit_data
            .get("sha")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                GithubError::Upstream("Repository head commit SHA missing".to_string())
            })?
            .to_string();

        let (fallback_owner, fallback_name) = owner_repo.split_once('/').unwrap_or((owner_repo, ""));

        Ok(RepoSnapshot {
            github_url: normalized.clone(),
            full_name: repo_data
                .get("full_name")
                .and_then(Value::as_str)
                .unwrap_or(owner_repo)
                .to_string(),
            owner: repo_data
                .get("owner")
                .and_then(|o| o.get("login"))
                .and_then(Value::as_str)
                .unwrap_or(fallback_owner)
                .to_string(),
            name: repo_data
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or(fallback_name)
                .to_string(),
            description: repo_data
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
            stars: repo_data
                .get("stargazers_count")
                .and_then(Value::as_i64)
                .map(|v| v as i32),
            forks: repo_data
                .get("forks_count")
                .and_then(Value::as_i64)
                .map(|v| v as i32),
            language: repo_data
                .get("language")
                .and_then(Value::as_str)
                .map(str::to_string),
            size_kb: repo_data
                .get("size")
                .and_then(Value::as_i64)
                .map(|v| v as i32),
            default_branch,
            commit_sha,
        })
    }

    /// Best-effort contributor stats; failures collapse to an error marker
    /// instead of failing the analysis stage.
    pub async fn contributor_stats(&self, full_name: &str) -> Value {
        let url = format!(
            "{}/repos/{}/contributors?per_page=10",
            self.api_base, full_name
        );
        match self.get_json(&url).await {
            Ok((200, data)) => {
                let top: Vec<Value> = data
                    .as_array()
                    .map(|rows| {
                        rows.iter()
                            .map(|row| {
                                serde_json::json!({
                                    "username": row.get("login").cloned().unwrap_or(Value::Null),
                                    "commits": row.get("contributions").and_then(Value::as_i64).unwrap_or(0),
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                serde_json::json!({ "top_contributors": top })
            }
            Ok((status, _)) => serde_json::json!({
                "top_contributors": [],
                "error": format!("github_status_{status}"),
            }),
            Err(_) => serde_json::json!({
                "top_contributors": [],
                "error": "github_unreachable",
            }),
        }
    }

    /// Exchange an OAuth code for a provider access token.
    pub async fn exchange_code(&self, code: &str) -> Result<String, GithubError> {
        let url = format!("{}/login/oauth/access_token", self.web_base);
        let response = self
            .http
            .post(&url)
            .header("accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.oauth_redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|_| GithubError::Upstream("Failed to exchange OAuth code".to_string()))?;

        if response.status() != 200 {
            return Err(GithubError::Upstream(
                "Failed to exchange OAuth code".to_string(),
            ));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|_| GithubError::Upstream("Failed to exchange OAuth code".to_string()))?;
        data.get("access_token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GithubError::Upstream("GitHub access token missing".to_string()))
    }

    /// Fetch the authenticated profile, falling back to the primary verified
    /// address when the profile email is private.
    pub async fn fetch_user(&self, access_token: &str) -> Result<GithubUser, GithubError> {
        let response = self
            .http
            .get(format!("{}/user", self.api_base))
            .header("accept", "application/vnd.github+json")
            .header("authorization", format!("Bearer {access_token}"))
            .header("x-github-api-version", API_VERSION)
            .send()
            .await
            .map_err(|_| GithubError::Upstream("Failed to fetch GitHub profile".to_string()))?;

        if response.status() != 200 {
            return Err(GithubError::Upstream(
                "Failed to fetch GitHub profile".to_string(),
            ));
        }

        let mut user: GithubUser = response
            .json()
            .await
            .map_err(|_| GithubError::Upstream("Invalid GitHub profile payload".to_string()))?;

        if user.email.is_none() {
            if let Ok(emails_response) = self
                .http
                .get(format!("{}/user/emails", self.api_base))
                .header("accept", "application/vnd.github+json")
                .header("authorization", format!("Bearer {access_token}"))
                .header("x-github-api-version", API_VERSION)
                .send()
                .await
            {
                if emails_response.status() == 200 {
                    if let Ok(emails) = emails_response.json::<Vec<Value>>().await {
                        user.email = emails
                            .iter()
                            .find(|e| {
                                e.get("primary").and_then(Value::as_bool).unwrap_or(false)
                                    && e.get("verified").and_then(Value::as_bool).unwrap_or(false)
                            })
                            .and_then(|e| e.get("email"))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                    }
                }
            }
        }

        Ok(user)
    }

    async fn get_json(&self, url: &str) -> Result<(u16, Value), reqwest::Error> {
        let response = self
            .http
            .get(url)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", API_VERSION)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.json().await.unwrap_or(Value::Null);
        Ok((status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_common_url_shapes() {
        assert_eq!(
            normalize_repo_url("https://github.com/owner/repo").unwrap(),
            "https://github.com/owner/repo"
        );
        assert_eq!(
            normalize_repo_url("https://github.com/owner/repo.git").unwrap(),
            "https://github.com/owner/repo"
        );
        assert_eq!(
            normalize_repo_url("  https://github.com/owner/repo/tree/main/src  ").unwrap(),
            "https://github.com/owner/repo"
        );
        assert_eq!(
            normalize_repo_url("http://GitHub.com/owner/repo").unwrap(),
            "https://github.com/owner/repo"
        );
    }

    #[test]
    fn rejects_non_github_hosts() {
        assert!(normalize_repo_url("https://gitlab.com/owner/repo").is_err());
        assert!(normalize_repo_url("ftp://github.com/owner/repo").is_err());
        assert!(normalize_repo_url("not a url").is_err());
    }

    #[test]
    fn rejects_incomplete_paths() {
        assert!(normalize_repo_url("https://github.com/").is_err());
        assert!(normalize_repo_url("https://github.com/owner").is_err());
    }

    #[test]
    fn authorize_url_carries_state_and_scope() {
        let client = GithubClient::new(GithubConfig {
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            oauth_redirect_uri: "https://api.devlens.dev/api/v1/auth/callback".to_string(),
        });
        let url = client.authorize_url("the-state");
        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("state=the-state"));
        assert!(url.contains("scope=read%3Auser+user%3Aemail"));
    }
}
