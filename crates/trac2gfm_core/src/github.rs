//! GitHub REST client for milestones, labels, issues and comments.

use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::MigrationConfig;

const ACCEPT_HEADER: &str = "application/vnd.github+json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMilestone {
    pub title: String,
    pub state: IssueState,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_on: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewLabel {
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueUpdate {
    pub state: IssueState,
}

pub trait IssueTrackerApi {
    /// Returns the new milestone number.
    fn create_milestone(&mut self, milestone: &NewMilestone) -> Result<u64>;
    /// Returns the label name as stored by GitHub.
    fn create_label(&mut self, label: &NewLabel) -> Result<String>;
    /// Returns the new issue number.
    fn create_issue(&mut self, issue: &NewIssue) -> Result<u64>;
    fn update_issue(&mut self, number: u64, update: &IssueUpdate) -> Result<()>;
    /// Returns the new comment id.
    fn create_comment(&mut self, issue_number: u64, body: &str) -> Result<u64>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Token(String),
    Basic { username: String, password: String },
    Anonymous,
}

#[derive(Debug, Clone)]
pub struct GithubClientConfig {
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    pub user_agent: String,
    pub credentials: Credentials,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl GithubClientConfig {
    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        let owner = config
            .github
            .project
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .context("github.project is not configured")?
            .to_string();
        let repo = config
            .github
            .repo
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .context("github.repo is not configured")?
            .to_string();

        let credentials = match (
            config.github_token(),
            config.github_username(),
            config.github_password(),
        ) {
            (Some(token), _, _) => Credentials::Token(token),
            (None, Some(username), Some(password)) => Credentials::Basic { username, password },
            _ => Credentials::Anonymous,
        };

        let github = &config.github;
        Ok(Self {
            api_url: config.github_api_url().trim_end_matches('/').to_string(),
            user_agent: format!("trac2gfm for {owner}"),
            owner,
            repo,
            credentials,
            timeout_ms: env_value_u64("GITHUB_HTTP_TIMEOUT_MS", github.timeout_ms.unwrap_or(30_000)),
            rate_limit_ms: env_value_u64("GITHUB_RATE_LIMIT_MS", github.rate_limit_ms.unwrap_or(250)),
            max_retries: env_value_usize("GITHUB_HTTP_RETRIES", github.max_retries.unwrap_or(2)),
            retry_delay_ms: env_value_u64(
                "GITHUB_HTTP_RETRY_DELAY_MS",
                github.retry_delay_ms.unwrap_or(1_000),
            ),
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}/{path}", self.api_url, self.owner, self.repo)
    }
}

pub struct GithubClient {
    client: Client,
    config: GithubClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

#[derive(Clone, Copy)]
enum Method {
    Post,
    Patch,
}

impl GithubClient {
    pub fn new(config: GithubClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build GitHub HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        Self::new(GithubClientConfig::from_config(config)?)
    }

    fn request_json<P, R>(&mut self, method: Method, path: &str, payload: &P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let url = self.config.repo_url(path);
        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let request = match method {
                Method::Post => self.client.post(&url),
                Method::Patch => self.client.patch(&url),
            };
            let response = self.authorize(request).json(payload).send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            warn!(%status, attempt, url = %url, "retrying GitHub request");
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!(
                            "GitHub API request to {url} failed with HTTP {status}: {}",
                            error_message(response)
                        );
                    }
                    debug!(%status, url = %url, "GitHub request succeeded");
                    return response
                        .json()
                        .context("failed to decode GitHub API JSON response");
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        warn!(%error, attempt, url = %url, "retrying GitHub request");
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call GitHub API");
                }
            }
        }

        bail!("GitHub API request exhausted retry budget")
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header("User-Agent", self.config.user_agent.clone())
            .header("Accept", ACCEPT_HEADER);
        match &self.config.credentials {
            Credentials::Token(token) => request.bearer_auth(token),
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Credentials::Anonymous => request,
        }
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize) {
        sleep(retry_delay(self.config.retry_delay_ms, attempt));
    }
}

impl IssueTrackerApi for GithubClient {
    fn create_milestone(&mut self, milestone: &NewMilestone) -> Result<u64> {
        let created: NumberedResponse = self
            .request_json(Method::Post, "milestones", milestone)
            .with_context(|| format!("failed to create milestone `{}`", milestone.title))?;
        Ok(created.number)
    }

    fn create_label(&mut self, label: &NewLabel) -> Result<String> {
        let created: LabelResponse = self
            .request_json(Method::Post, "labels", label)
            .with_context(|| format!("failed to create label `{}`", label.name))?;
        Ok(created.name)
    }

    fn create_issue(&mut self, issue: &NewIssue) -> Result<u64> {
        let created: NumberedResponse = self
            .request_json(Method::Post, "issues", issue)
            .with_context(|| format!("failed to create issue `{}`", issue.title))?;
        Ok(created.number)
    }

    fn update_issue(&mut self, number: u64, update: &IssueUpdate) -> Result<()> {
        let _: NumberedResponse = self
            .request_json(Method::Patch, &format!("issues/{number}"), update)
            .with_context(|| format!("failed to update issue #{number}"))?;
        Ok(())
    }

    fn create_comment(&mut self, issue_number: u64, body: &str) -> Result<u64> {
        let payload = CommentPayload { body };
        let created: CommentResponse = self
            .request_json(
                Method::Post,
                &format!("issues/{issue_number}/comments"),
                &payload,
            )
            .with_context(|| format!("failed to comment on issue #{issue_number}"))?;
        Ok(created.id)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn error_message(response: Response) -> String {
    response
        .json::<ErrorResponse>()
        .ok()
        .and_then(|payload| payload.message)
        .unwrap_or_else(|| "no error message".to_string())
}

fn retry_delay(base_ms: u64, attempt: usize) -> Duration {
    let exponent = u32::try_from(attempt).unwrap_or(16);
    let base = base_ms.saturating_mul(2u64.saturating_pow(exponent));
    let jitter = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| u64::from(duration.subsec_millis() % 100))
        .unwrap_or(0);
    Duration::from_millis(base.saturating_add(jitter))
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

#[derive(Debug, Serialize)]
struct CommentPayload<'a> {
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct NumberedResponse {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct LabelResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    id: u64,
}

#[derive(Debug, Deserialize, Default)]
struct ErrorResponse {
    message: Option<String>,
}
