mod gitlab;
mod kubernetes;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use beacon_api::error::TargetError;

use crate::template::DashboardDocument;

pub use self::{gitlab::RepoStore, kubernetes::ConfigMapStore, memory::MemoryStore};

/// A store holding the externally-visible copy of generated dashboards,
/// keyed by dashboard uid.
#[async_trait]
pub trait SyncTarget {
    /// Short name used in reports and logs.
    fn name(&self) -> &str;

    /// Whether entries absent from the desired set are deleted. Append-only
    /// targets report suppressed deletions instead.
    fn prune(&self) -> bool;

    /// Current state of the target: uid to content digest.
    async fn list(&self) -> Result<BTreeMap<String, String>, TargetError>;

    async fn put(&self, document: &DashboardDocument) -> Result<(), TargetError>;

    async fn delete(&self, key: &str) -> Result<(), TargetError>;

    /// Commits changes staged by `put`/`delete` where the transport batches
    /// them; a no-op everywhere else.
    async fn flush(&self) -> Result<(), TargetError> {
        Ok(())
    }
}
