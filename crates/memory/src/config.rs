use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_BRANCH: &str = "main";
const DEFAULT_DRAIN_INTERVAL_SECS: u64 = 300;

/// Server configuration loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Repository in `owner/name` form
    pub repo: String,
    /// Access token for the GitHub API
    pub token: String,
    /// Branch that holds the memory files
    pub branch: String,
    /// Base URL of the GitHub API (overridable for GitHub Enterprise)
    pub api_url: String,
    /// Where pending writes are persisted between runs
    pub queue_path: PathBuf,
    /// How often the retry queue is drained in the background. `None` disables it.
    pub drain_interval: Option<Duration>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("repo", &self.repo)
            .field("token", &"<redacted>")
            .field("branch", &self.branch)
            .field("api_url", &self.api_url)
            .field("queue_path", &self.queue_path)
            .field("drain_interval", &self.drain_interval)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `GITHUB_REPO`: Repository holding the memory files (`owner/name`)
    /// - `GITHUB_TOKEN`: Token with contents read/write access to that repository
    ///
    /// Optional: `GITHUB_BRANCH`, `GITHUB_API_URL`, `MEMORY_QUEUE_PATH` (supports ~),
    /// `MEMORY_DRAIN_INTERVAL_SECS` (0 disables periodic draining).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let repo = lookup("GITHUB_REPO")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("GITHUB_REPO"))?;
        let repo = repo.trim().to_string();
        if !is_valid_repo(&repo) {
            return Err(ConfigError::InvalidRepo(repo));
        }

        let token = lookup("GITHUB_TOKEN")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("GITHUB_TOKEN"))?;
        let token = token.trim().to_string();
        if token.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidToken);
        }

        let branch = lookup("GITHUB_BRANCH")
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());

        let api_url = lookup("GITHUB_API_URL")
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let queue_path = lookup("MEMORY_QUEUE_PATH")
            .filter(|p| !p.trim().is_empty())
            .map(|p| expand_tilde(p.trim()))
            .unwrap_or_else(default_queue_path);

        let drain_interval = match lookup("MEMORY_DRAIN_INTERVAL_SECS") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidDrainInterval(raw.clone()))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => Some(Duration::from_secs(DEFAULT_DRAIN_INTERVAL_SECS)),
        };

        Ok(Self {
            repo,
            token,
            branch,
            api_url,
            queue_path,
            drain_interval,
        })
    }
}

/// `owner/name`, both halves non-empty and limited to the characters GitHub allows.
fn is_valid_repo(repo: &str) -> bool {
    let mut parts = repo.split('/');
    let (Some(owner), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let valid = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    valid(owner) && valid(name)
}

fn default_queue_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".repo-memory")
        .join("queue.json")
}

/// Expand ~ or ~/ prefix to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("GITHUB_REPO must look like 'owner/name', got '{0}'")]
    InvalidRepo(String),
    #[error("GITHUB_TOKEN must not contain whitespace")]
    InvalidToken,
    #[error("MEMORY_DRAIN_INTERVAL_SECS must be a whole number of seconds, got '{0}'")]
    InvalidDrainInterval(String),
}
