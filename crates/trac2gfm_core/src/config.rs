use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::markup::{DEFAULT_WIKI_BASE_URI, Dialect, WikiConverter};
use crate::trac::LabelKind;

pub const DEFAULT_CONFIG_FILENAME: &str = "trac2gfm.toml";
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_LABEL_COLOR: &str = "ffffff";
pub const DEFAULT_MILESTONE_CACHE: &str = "/tmp/trac_milestones.json";
pub const DEFAULT_LABEL_CACHE: &str = "/tmp/trac_labels.json";
pub const DEFAULT_TICKET_CACHE: &str = "/tmp/trac_tickets.json";

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationConfig {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub github: GithubSection,
    #[serde(default)]
    pub trac: TracSection,
    #[serde(default)]
    pub markup: MarkupSection,
}

/// JSON mapping caches. An empty path disables that cache.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheSection {
    pub milestones: PathBuf,
    pub labels: PathBuf,
    pub tickets: PathBuf,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            milestones: PathBuf::from(DEFAULT_MILESTONE_CACHE),
            labels: PathBuf::from(DEFAULT_LABEL_CACHE),
            tickets: PathBuf::from(DEFAULT_TICKET_CACHE),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct GithubSection {
    pub username: Option<String>,
    /// Personal access token. Takes precedence over `password`.
    pub token: Option<String>,
    /// Account password for basic auth when no token is configured.
    pub password: Option<String>,
    /// Repository owner (user or organization).
    pub project: Option<String>,
    pub repo: Option<String>,
    pub api_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub rate_limit_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TracSection {
    pub database: Option<PathBuf>,
    /// Assignee used when a ticket owner is empty or has no `users` entry.
    pub default_owner: Option<String>,
    #[serde(default)]
    pub users: BTreeMap<String, String>,
    #[serde(default)]
    pub types: BTreeMap<String, LabelPolicy>,
    #[serde(default)]
    pub components: BTreeMap<String, LabelPolicy>,
    #[serde(default)]
    pub priorities: BTreeMap<String, LabelPolicy>,
    #[serde(default)]
    pub resolutions: BTreeMap<String, LabelPolicy>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LabelPolicy {
    #[serde(default)]
    pub import: bool,
    #[serde(default = "default_label_color")]
    pub color: String,
}

impl Default for LabelPolicy {
    fn default() -> Self {
        Self {
            import: false,
            color: default_label_color(),
        }
    }
}

fn default_label_color() -> String {
    DEFAULT_LABEL_COLOR.to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MarkupSection {
    #[serde(default)]
    pub dialect: Dialect,
    pub wiki_base_uri: Option<String>,
}

impl MigrationConfig {
    /// Resolve the GitHub token: env GITHUB_TOKEN > config.
    pub fn github_token(&self) -> Option<String> {
        env_override("GITHUB_TOKEN").or_else(|| non_empty(self.github.token.as_deref()))
    }

    /// Resolve the GitHub username: env GITHUB_USERNAME > config.
    pub fn github_username(&self) -> Option<String> {
        env_override("GITHUB_USERNAME").or_else(|| non_empty(self.github.username.as_deref()))
    }

    /// Resolve the basic-auth password: env GITHUB_PASSWORD > config.
    pub fn github_password(&self) -> Option<String> {
        env_override("GITHUB_PASSWORD").or_else(|| non_empty(self.github.password.as_deref()))
    }

    /// Resolve the REST endpoint: env GITHUB_API_URL > config > DEFAULT_GITHUB_API_URL.
    pub fn github_api_url(&self) -> String {
        env_override("GITHUB_API_URL")
            .or_else(|| non_empty(self.github.api_url.as_deref()))
            .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string())
    }

    /// Resolve the Trac database path: env TRAC_DATABASE > config.
    pub fn trac_database(&self) -> Option<PathBuf> {
        env_override("TRAC_DATABASE")
            .map(PathBuf::from)
            .or_else(|| self.trac.database.clone())
            .filter(|path| !path.as_os_str().is_empty())
    }

    /// Resolve the CamelCase link base: env WIKI_BASE_URI > config >
    /// the repository's GitHub URL > DEFAULT_WIKI_BASE_URI.
    pub fn wiki_base_uri(&self) -> String {
        if let Some(value) = env_override("WIKI_BASE_URI") {
            return value;
        }
        if let Some(value) = non_empty(self.markup.wiki_base_uri.as_deref()) {
            return value;
        }
        match (
            non_empty(self.github.project.as_deref()),
            non_empty(self.github.repo.as_deref()),
        ) {
            (Some(project), Some(repo)) => format!("{DEFAULT_WIKI_BASE_URI}/{project}/{repo}"),
            _ => DEFAULT_WIKI_BASE_URI.to_string(),
        }
    }

    pub fn converter(&self) -> WikiConverter {
        WikiConverter::new(self.wiki_base_uri())
    }

    pub fn label_policy(&self, kind: LabelKind, name: &str) -> Option<&LabelPolicy> {
        let table = match kind {
            LabelKind::Type => &self.trac.types,
            LabelKind::Component => &self.trac.components,
            LabelKind::Priority => &self.trac.priorities,
            LabelKind::Resolution => &self.trac.resolutions,
        };
        table.get(name)
    }

    /// GitHub login for a Trac user, falling back to `default_owner`.
    pub fn assignee_for(&self, trac_owner: &str) -> Option<String> {
        let owner = trac_owner.trim();
        if !owner.is_empty()
            && let Some(login) = self.trac.users.get(owner)
        {
            return Some(login.clone());
        }
        non_empty(self.trac.default_owner.as_deref())
    }

    pub fn validate_for_migration(&self) -> Result<()> {
        let mut missing = Vec::new();
        if non_empty(self.github.project.as_deref()).is_none() {
            missing.push("github.project");
        }
        if non_empty(self.github.repo.as_deref()).is_none() {
            missing.push("github.repo");
        }
        if self.trac_database().is_none() {
            missing.push("trac.database");
        }
        if !missing.is_empty() {
            bail!("missing required configuration: {}", missing.join(", "));
        }
        Ok(())
    }

    /// Copy safe to print: credentials are masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.github.token.is_some() {
            copy.github.token = Some(REDACTED.to_string());
        }
        if copy.github.password.is_some() {
            copy.github.password = Some(REDACTED.to_string());
        }
        copy
    }
}

/// Load and parse a MigrationConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrationConfig> {
    if !config_path.exists() {
        return Ok(MigrationConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrationConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_config(config: &MigrationConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to serialize config TOML")
}

fn env_override(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
