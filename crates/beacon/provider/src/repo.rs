use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use base64::Engine;
use beacon_api::args::RepoArgs;
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{instrument, Level};
use url::Url;

/// One file revision as stored on the branch.
#[derive(Clone, Debug)]
pub struct RepoFile {
    pub content: Vec<u8>,
    /// Commit that last touched the file; passed back on update so the
    /// server can reject a stale write.
    pub last_commit_id: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitActionKind {
    Create,
    Update,
    Delete,
}

#[derive(Clone, Debug, Serialize)]
pub struct CommitAction {
    pub action: CommitActionKind,
    pub file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("commit rejected due to a concurrent change: {0}")]
    Conflict(String),
    #[error(transparent)]
    Other(#[from] ::anyhow::Error),
}

/// Minimal GitLab REST v4 client scoped to one project and branch.
pub struct RepoClient {
    client: Client,
    base: Url,
    branch: String,
}

impl RepoClient {
    const TOKEN_HEADER: &'static str = "PRIVATE-TOKEN";
    const PER_PAGE: usize = 100;

    pub fn try_new(args: &RepoArgs, timeout: Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let mut token = header::HeaderValue::from_str(&args.gitlab_token)
            .map_err(|error| anyhow!("failed to encode the access token: {error}"))?;
        token.set_sensitive(true);
        headers.insert(Self::TOKEN_HEADER, token);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        let base = args.gitlab_url.join(&format!(
            "api/v4/projects/{project}/",
            project = urlencode(&args.gitlab_project),
        ))?;

        Ok(Self {
            client,
            base,
            branch: args.gitlab_branch.clone(),
        })
    }

    /// Fetches a file revision, or `None` if the path is absent on the branch.
    #[instrument(level = Level::INFO, skip(self), err(Display))]
    pub async fn get_file(&self, path: &str) -> Result<Option<RepoFile>> {
        #[derive(Deserialize)]
        struct Payload {
            content: String,
            last_commit_id: String,
        }

        let url = self
            .base
            .join(&format!("repository/files/{}", urlencode(path)))?;
        let response = self
            .client
            .get(url)
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let payload: Payload = into_checked(response).await?.json().await?;
        let content = ::base64::engine::general_purpose::STANDARD
            .decode(payload.content.replace(['\n', '\r'], ""))
            .map_err(|error| anyhow!("failed to decode file content ({path}): {error}"))?;

        Ok(Some(RepoFile {
            content,
            last_commit_id: payload.last_commit_id,
        }))
    }

    /// Fetches the raw bytes of a blob on the branch.
    #[instrument(level = Level::INFO, skip(self), err(Display))]
    pub async fn get_raw(&self, path: &str) -> Result<Vec<u8>> {
        let url = self
            .base
            .join(&format!("repository/files/{}/raw", urlencode(path)))?;
        let response = self
            .client
            .get(url)
            .query(&[("ref", self.branch.as_str())])
            .send()
            .await?;

        into_checked(response)
            .await?
            .bytes()
            .await
            .map(Into::into)
            .map_err(Into::into)
    }

    /// Lists blob paths below the given directory, following pagination.
    /// A directory that does not exist yet lists as empty.
    #[instrument(level = Level::INFO, skip(self), err(Display))]
    pub async fn list_tree(&self, path: &str) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Entry {
            path: String,
            #[serde(rename = "type")]
            kind: String,
        }

        let url = self.base.join("repository/tree")?;
        let per_page = Self::PER_PAGE.to_string();
        let mut paths = Vec::default();
        for page in 1.. {
            let page_number = page.to_string();
            let response = self
                .client
                .get(url.clone())
                .query(&[
                    ("path", path),
                    ("ref", self.branch.as_str()),
                    ("per_page", per_page.as_str()),
                    ("page", page_number.as_str()),
                ])
                .send()
                .await?;

            if response.status() == StatusCode::NOT_FOUND {
                break;
            }

            let entries: Vec<Entry> = into_checked(response).await?.json().await?;
            let num_entries = entries.len();
            paths.extend(
                entries
                    .into_iter()
                    .filter(|entry| entry.kind == "blob")
                    .map(|entry| entry.path),
            );

            if num_entries < Self::PER_PAGE {
                break;
            }
        }
        Ok(paths)
    }

    /// Commits the given actions onto the branch as one atomic commit.
    #[instrument(level = Level::INFO, skip_all, fields(num_actions = actions.len()), err(Display))]
    pub async fn commit(&self, message: &str, actions: &[CommitAction]) -> Result<(), CommitError> {
        let url = self
            .base
            .join("repository/commits")
            .map_err(::anyhow::Error::from)?;
        let body = json!({
            "branch": &self.branch,
            "commit_message": message,
            "actions": actions,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(::anyhow::Error::from)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let reason = response.text().await.unwrap_or_default();
        // a stale per-action last_commit_id surfaces as 400, a concurrent
        // branch update as 409
        if status == StatusCode::BAD_REQUEST || status == StatusCode::CONFLICT {
            Err(CommitError::Conflict(reason))
        } else {
            Err(CommitError::Other(anyhow!(
                "commit failed with status {status}: {reason}"
            )))
        }
    }
}

async fn into_checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let reason = response.text().await.unwrap_or_default();
        bail!("request failed with status {status}: {reason}")
    }
}

/// Percent-encodes a repository path for use as one URL segment, as the API
/// expects (`/` becomes `%2F`).
fn urlencode(path: &str) -> String {
    path.bytes()
        .map(|byte| match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                char::from(byte).to_string()
            }
            byte => format!("%{byte:02X}"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::urlencode;

    #[test]
    fn paths_encode_as_one_segment() {
        assert_eq!(urlencode("ops/monitoring"), "ops%2Fmonitoring");
        assert_eq!(
            urlencode("dashboards/template.json.tera"),
            "dashboards%2Ftemplate.json.tera",
        );
        assert_eq!(urlencode("42"), "42");
    }
}
