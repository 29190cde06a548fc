use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use beacon_api::error::TargetError;
use beacon_core::digest::sha256_hex;
use futures::{stream, StreamExt, TryStreamExt};
use tracing::{info, instrument, Level};

use super::SyncTarget;
use crate::repo::{CommitAction, CommitActionKind, RepoClient};
use crate::template::DashboardDocument;

/// Repository sink: one file per dashboard below the configured directory,
/// the path Grafana's provisioning is pointed at.
///
/// `put` and `delete` only stage commit actions; `flush` lands the whole
/// cycle as a single commit, so a run over fifty services produces one
/// commit, not fifty. `list` has to run before the first `put` so staged
/// actions pick the right create-vs-update kind; the reconciler always does.
pub struct RepoStore<'a> {
    repo: &'a RepoClient,
    path: String,
    prune: bool,
    existing: Mutex<BTreeSet<String>>,
    staged: Mutex<Vec<CommitAction>>,
}

impl<'a> RepoStore<'a> {
    const NAME: &'static str = "repository";
    const MAX_CONCURRENT_FETCHES: usize = 8;

    pub fn new(repo: &'a RepoClient, path: &str, prune: bool) -> Self {
        Self {
            repo,
            path: path.trim_end_matches('/').into(),
            prune,
            existing: Mutex::default(),
            staged: Mutex::default(),
        }
    }

    fn file_path(&self, key: &str) -> String {
        format!("{path}/{key}.json", path = self.path)
    }

    /// Dashboard uid of a tree entry, or `None` for foreign files.
    fn key_of(&self, file_path: &str) -> Option<String> {
        file_path
            .strip_prefix(self.path.as_str())?
            .strip_prefix('/')?
            .strip_suffix(".json")
            .filter(|key| !key.is_empty() && !key.contains('/'))
            .map(Into::into)
    }
}

#[async_trait]
impl SyncTarget for RepoStore<'_> {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn prune(&self) -> bool {
        self.prune
    }

    #[instrument(level = Level::INFO, skip_all, err(Display))]
    async fn list(&self) -> Result<BTreeMap<String, String>, TargetError> {
        let into_error = |error: ::anyhow::Error| TargetError::List {
            target: Self::NAME.into(),
            reason: error.to_string(),
        };

        let paths = self.repo.list_tree(&self.path).await.map_err(into_error)?;

        let records: BTreeMap<_, _> = stream::iter(
            paths
                .into_iter()
                .filter_map(|path| self.key_of(&path).map(|key| (key, path))),
        )
        .map(|(key, path)| async move {
            let content = self.repo.get_raw(&path).await?;
            Ok((key, sha256_hex(&content)))
        })
        .buffer_unordered(Self::MAX_CONCURRENT_FETCHES)
        .try_collect()
        .await
        .map_err(into_error)?;

        *self.existing.lock().expect("repository state poisoned") =
            records.keys().cloned().collect();
        Ok(records)
    }

    async fn put(&self, document: &DashboardDocument) -> Result<(), TargetError> {
        let action = if self
            .existing
            .lock()
            .expect("repository state poisoned")
            .contains(&document.uid)
        {
            CommitActionKind::Update
        } else {
            CommitActionKind::Create
        };

        self.staged
            .lock()
            .expect("repository state poisoned")
            .push(CommitAction {
                action,
                file_path: self.file_path(&document.uid),
                content: Some(document.content.clone()),
                last_commit_id: None,
            });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TargetError> {
        self.staged
            .lock()
            .expect("repository state poisoned")
            .push(CommitAction {
                action: CommitActionKind::Delete,
                file_path: self.file_path(key),
                content: None,
                last_commit_id: None,
            });
        Ok(())
    }

    #[instrument(level = Level::INFO, skip_all, err(Display))]
    async fn flush(&self) -> Result<(), TargetError> {
        // cloned, not drained: a failed flush may be retried with the same
        // staged set
        let staged = self
            .staged
            .lock()
            .expect("repository state poisoned")
            .clone();
        if staged.is_empty() {
            return Ok(());
        }

        let message = format!("beacon: sync {} dashboards", staged.len());
        self.repo
            .commit(&message, &staged)
            .await
            .map_err(|error| TargetError::Flush {
                target: Self::NAME.into(),
                count: staged.len(),
                reason: error.to_string(),
            })?;

        info!("committed {} staged changes", staged.len());
        self.staged.lock().expect("repository state poisoned").clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use beacon_api::args::RepoArgs;

    use super::RepoStore;
    use crate::repo::RepoClient;

    fn client() -> RepoClient {
        let args = RepoArgs {
            gitlab_url: RepoArgs::BEACON_GITLAB_URL_VALUE.parse().unwrap(),
            gitlab_token: "secret".into(),
            gitlab_project: "ops/monitoring".into(),
            gitlab_branch: RepoArgs::BEACON_GITLAB_BRANCH_VALUE.into(),
            dashboard_path: RepoArgs::BEACON_DASHBOARD_PATH_VALUE.into(),
            template_path: RepoArgs::BEACON_TEMPLATE_PATH_VALUE.into(),
            registry_path: RepoArgs::BEACON_REGISTRY_PATH_VALUE.into(),
            prune_repo: false,
        };
        RepoClient::try_new(&args, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn tree_entries_map_to_dashboard_keys() {
        let repo = client();
        let store = RepoStore::new(&repo, "dashboards/generated/", false);

        assert_eq!(store.file_path("api-internal"), "dashboards/generated/api-internal.json");
        assert_eq!(
            store.key_of("dashboards/generated/api-internal.json"),
            Some("api-internal".into()),
        );

        // foreign entries are not ours to manage
        assert_eq!(store.key_of("dashboards/generated/README.md"), None);
        assert_eq!(store.key_of("dashboards/generated/sub/dir.json"), None);
        assert_eq!(store.key_of("dashboards/template.json.tera"), None);
    }
}
