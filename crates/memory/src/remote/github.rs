//! GitHub repository backend.
//!
//! Uses the Git Trees API to enumerate files and the Contents API to read,
//! write and delete them. The blob sha GitHub returns for each file is the
//! revision token.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::traits::{RemoteEntry, RemoteError, RemoteFile, RemoteStore};
use crate::config::Config;

const USER_AGENT: &str = concat!("repo-memory/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";

/// Remote store backed by a GitHub repository branch.
pub struct GitHubStore {
    client: reqwest::Client,
    api_url: String,
    repo: String,
    branch: String,
    token: String,
}

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    sha: String,
}

#[derive(Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    message: String,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    message: String,
    sha: &'a str,
    branch: &'a str,
}

impl GitHubStore {
    /// Create a store for the repository and branch named in the config.
    pub fn new(config: &Config) -> Result<Self, RemoteError> {
        Self::with_settings(&config.api_url, &config.repo, &config.branch, &config.token)
    }

    pub fn with_settings(
        api_url: &str,
        repo: &str,
        branch: &str,
        token: &str,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
            branch: branch.to_string(),
            token: token.to_string(),
        })
    }

    fn contents_url(&self, path: &str) -> String {
        format!("{}/repos/{}/contents/{}", self.api_url, self.repo, encode_path(path))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Send a request and turn non-success statuses into `RemoteError`s.
    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let rate_limited = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "0");
        let message = response.text().await.unwrap_or_default();
        Err(map_status(status, rate_limited, path, message))
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// Resolve the current revision when the caller did not supply one.
    async fn current_revision(&self, path: &str) -> Result<Option<String>, RemoteError> {
        Ok(self.get(path).await?.map(|file| file.revision))
    }
}

#[async_trait::async_trait]
impl RemoteStore for GitHubStore {
    async fn list(&self) -> Result<Vec<RemoteEntry>, RemoteError> {
        let url = format!(
            "{}/repos/{}/git/trees/{}",
            self.api_url,
            self.repo,
            urlencoding::encode(&self.branch)
        );
        let request = self
            .request(Method::GET, &url)
            .query(&[("recursive", "1")]);

        let response = match self.send(request, "").await {
            Ok(response) => response,
            // Missing branch or empty repository: nothing stored yet
            Err(RemoteError::NotFound { .. }) | Err(RemoteError::Conflict { .. }) => {
                tracing::debug!("Branch {} has no tree yet", self.branch);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let tree: TreeResponse = Self::decode(response).await?;
        if tree.truncated {
            tracing::warn!("Tree listing for {} was truncated by GitHub", self.repo);
        }

        Ok(tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| RemoteEntry {
                path: entry.path,
                revision: entry.sha,
            })
            .collect())
    }

    async fn get(&self, path: &str) -> Result<Option<RemoteFile>, RemoteError> {
        let request = self
            .request(Method::GET, &self.contents_url(path))
            .query(&[("ref", self.branch.as_str())]);

        let response = match self.send(request, path).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let body: ContentResponse = Self::decode(response).await?;
        if body.encoding != "base64" {
            return Err(RemoteError::Decode(format!(
                "unsupported encoding '{}' for {}",
                body.encoding, path
            )));
        }

        Ok(Some(RemoteFile {
            path: path.to_string(),
            content: decode_content(&body.content)?,
            revision: body.sha,
        }))
    }

    async fn put(
        &self,
        path: &str,
        content: &str,
        expected_revision: Option<&str>,
    ) -> Result<String, RemoteError> {
        let resolved;
        let sha = match expected_revision {
            Some(sha) => Some(sha),
            None => {
                resolved = self.current_revision(path).await?;
                resolved.as_deref()
            }
        };

        let body = PutRequest {
            message: format!("Update {}", path),
            content: BASE64.encode(content.as_bytes()),
            branch: &self.branch,
            sha,
        };
        let request = self.request(Method::PUT, &self.contents_url(path)).json(&body);

        let response = self.send(request, path).await?;
        let body: PutResponse = Self::decode(response).await?;
        Ok(body.content.sha)
    }

    async fn delete(&self, path: &str, revision: Option<&str>) -> Result<(), RemoteError> {
        let sha = match revision {
            Some(sha) => sha.to_string(),
            None => self
                .current_revision(path)
                .await?
                .ok_or_else(|| RemoteError::NotFound {
                    path: path.to_string(),
                })?,
        };

        let body = DeleteRequest {
            message: format!("Delete {}", path),
            sha: &sha,
            branch: &self.branch,
        };
        let request = self.request(Method::DELETE, &self.contents_url(path)).json(&body);

        self.send(request, path).await?;
        Ok(())
    }

    async fn validate(&self) -> Result<bool, RemoteError> {
        let url = format!("{}/repos/{}", self.api_url, self.repo);
        match self.send(self.request(Method::GET, &url), "").await {
            Ok(_) => Ok(true),
            Err(RemoteError::NotFound { .. }) | Err(RemoteError::Unauthorized(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn map_status(status: StatusCode, rate_limited: bool, path: &str, message: String) -> RemoteError {
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound {
            path: path.to_string(),
        },
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => RemoteError::Conflict {
            path: path.to_string(),
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => RemoteError::RateLimited(message),
        StatusCode::FORBIDDEN if rate_limited => RemoteError::RateLimited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        _ => RemoteError::Http {
            status: status.as_u16(),
            message,
        },
    }
}

/// Percent-encode each path segment, keeping the slashes.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// GitHub wraps base64 payloads at 60 columns.
fn decode_content(encoded: &str) -> Result<String, RemoteError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64
        .decode(compact)
        .map_err(|e| RemoteError::Decode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| RemoteError::Decode(e.to_string()))
}
