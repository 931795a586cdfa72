//! GitHub remote - RemoteStore over the GitHub contents API.
//!
//! Version tokens are the blob SHAs GitHub reports for each file. Writes send
//! the expected SHA, and GitHub answers 409/422 when it no longer matches.

use crate::error::{SyncError, SyncResult};
use crate::sync::credentials::{require_token, CredentialStore};
use crate::sync::remote::{RemoteEntry, RemoteFile, RemoteStore};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const USER_AGENT: &str = "notesync";
const API_VERSION: &str = "2022-11-28";
const README_PATH: &str = "README.md";

/// Branch-scoped repository coordinates.
#[derive(Debug, Clone)]
pub struct GitHubTarget {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

pub struct GitHubRemote {
    client: reqwest::Client,
    target: GitHubTarget,
    credentials: Arc<dyn CredentialStore>,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    path: String,
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ContentFile {
    path: String,
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    message: String,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteRequest<'a> {
    message: String,
    sha: &'a str,
    branch: &'a str,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    content: WrittenContent,
}

#[derive(Debug, Deserialize)]
struct WrittenContent {
    sha: String,
}

impl GitHubRemote {
    pub fn new(target: GitHubTarget, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            target,
            credentials,
        }
    }

    pub fn target(&self) -> &GitHubTarget {
        &self.target
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.target.api_base.trim_end_matches('/'),
            self.target.owner,
            self.target.repo,
            path.trim_matches('/')
        )
    }

    async fn request(&self, method: Method, url: &str) -> SyncResult<RequestBuilder> {
        let token = require_token(self.credentials.as_ref()).await?;
        Ok(self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION))
    }

    async fn send(builder: RequestBuilder) -> SyncResult<Response> {
        builder
            .send()
            .await
            .map_err(|e| SyncError::api(format!("Cannot connect to GitHub API: {}", e)))
    }

    async fn get_file(&self, path: &str) -> SyncResult<ContentFile> {
        let url = self.contents_url(path);
        let builder = self
            .request(Method::GET, &url)
            .await?
            .query(&[("ref", self.target.branch.as_str())]);
        let response = Self::send(builder).await?;
        let response = check_status(response, path, false).await?;
        response
            .json()
            .await
            .map_err(|e| SyncError::decoding(format!("Cannot parse contents of {}: {}", path, e)))
    }
}

/// Map a non-success status onto the error taxonomy.
async fn check_status(response: Response, path: &str, is_write: bool) -> SyncResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body, path, is_write))
}

fn status_error(status: StatusCode, body: &str, path: &str, is_write: bool) -> SyncError {
    match status.as_u16() {
        401 => SyncError::Authentication(format!("GitHub rejected the token: {}", body)),
        // 403 is also used for rate limiting, which is transient.
        403 if body.contains("rate limit") => {
            SyncError::api(format!("GitHub rate limit exceeded: {}", body))
        }
        403 => SyncError::Authentication(format!("Access to {} denied: {}", path, body)),
        404 => SyncError::NotFound(path.to_string()),
        409 | 422 if is_write => SyncError::conflict(path),
        code => SyncError::api(format!("GitHub API error {} at {}: {}", code, path, body)),
    }
}

fn decode_content(file: &ContentFile) -> SyncResult<Vec<u8>> {
    if !file.encoding.is_empty() && file.encoding != "base64" {
        return Err(SyncError::decoding(format!(
            "Unsupported encoding '{}' for {}",
            file.encoding, file.path
        )));
    }
    let compact: String = file
        .content
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    BASE64
        .decode(compact)
        .map_err(|e| SyncError::decoding(format!("Invalid base64 in {}: {}", file.path, e)))
}

#[async_trait]
impl RemoteStore for GitHubRemote {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn list_files(&self, dir: &str) -> SyncResult<Vec<RemoteEntry>> {
        let url = self.contents_url(dir);
        let builder = self
            .request(Method::GET, &url)
            .await?
            .query(&[("ref", self.target.branch.as_str())]);
        let response = Self::send(builder).await?;

        let response = match check_status(response, dir, false).await {
            Ok(response) => response,
            // Missing directory or empty repository.
            Err(SyncError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let entries: Vec<ContentEntry> = response
            .json()
            .await
            .map_err(|e| SyncError::decoding(format!("Cannot parse listing of {}: {}", dir, e)))?;

        let mut files: Vec<RemoteEntry> = entries
            .into_iter()
            .filter(|e| e.kind == "file")
            .map(|e| RemoteEntry {
                path: e.path,
                token: e.sha,
            })
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("[GitHub] Listed {} files under {}", files.len(), dir);
        Ok(files)
    }

    async fn read_file(&self, path: &str) -> SyncResult<RemoteFile> {
        let file = self.get_file(path).await?;
        let content = decode_content(&file)?;
        Ok(RemoteFile {
            path: file.path,
            content,
            token: file.sha,
        })
    }

    async fn write_file(
        &self,
        path: &str,
        content: &[u8],
        expected_token: Option<&str>,
    ) -> SyncResult<String> {
        let body = WriteRequest {
            message: format!("Update {}", path),
            content: BASE64.encode(content),
            branch: &self.target.branch,
            sha: expected_token,
        };
        let url = self.contents_url(path);
        let builder = self.request(Method::PUT, &url).await?.json(&body);
        let response = Self::send(builder).await?;
        let response = check_status(response, path, true).await?;

        let written: WriteResponse = response
            .json()
            .await
            .map_err(|e| SyncError::decoding(format!("Cannot parse write response: {}", e)))?;
        debug!("[GitHub] Wrote {} -> {}", path, written.content.sha);
        Ok(written.content.sha)
    }

    async fn delete_file(&self, path: &str, expected_token: &str) -> SyncResult<()> {
        let body = DeleteRequest {
            message: format!("Delete {}", path),
            sha: expected_token,
            branch: &self.target.branch,
        };
        let url = self.contents_url(path);
        let builder = self.request(Method::DELETE, &url).await?.json(&body);
        let response = Self::send(builder).await?;
        check_status(response, path, true).await?;
        Ok(())
    }

    async fn initialize_empty_repository(&self) -> SyncResult<()> {
        match self.get_file(README_PATH).await {
            Ok(_) => return Ok(()),
            Err(SyncError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        info!(
            "[GitHub] Bootstrapping {}/{} on branch {}",
            self.target.owner, self.target.repo, self.target.branch
        );
        let readme = format!(
            "# {}\n\nNotes synchronized by notesync.\n",
            self.target.repo
        );
        match self.write_file(README_PATH, readme.as_bytes(), None).await {
            Ok(_) => Ok(()),
            // Someone else bootstrapped it first.
            Err(SyncError::Conflict { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
