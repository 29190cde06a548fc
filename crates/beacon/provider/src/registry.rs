use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use beacon_api::{
    error::AllocationError,
    identity::{DashboardIdentity, IdentityRegistry},
    service::ServiceDescriptor,
};
use tracing::{info, instrument, warn, Level};

use crate::repo::{CommitAction, CommitActionKind, CommitError, RepoClient};

/// Opaque revision of one loaded registry snapshot, handed back on store so
/// the backend can reject a write based on stale state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryVersion(pub Option<String>);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    Committed,
    /// The persisted registry changed since `load`; re-read and replay.
    Conflict,
}

/// Persistence of the identity registry. The compare-and-swap on `store` is
/// the system's one coordination point across reconciler instances.
#[async_trait]
pub trait RegistryStore {
    async fn load(&self) -> Result<(IdentityRegistry, RegistryVersion), AllocationError>;

    async fn store(
        &self,
        registry: &IdentityRegistry,
        version: RegistryVersion,
    ) -> Result<StoreOutcome, AllocationError>;
}

/// Registry persisted as a YAML file in the remote repository; the file's
/// last commit id is the compare-and-swap token.
#[derive(Copy, Clone)]
pub struct RepoRegistryStore<'a> {
    pub repo: &'a RepoClient,
    pub path: &'a str,
}

#[async_trait]
impl RegistryStore for RepoRegistryStore<'_> {
    async fn load(&self) -> Result<(IdentityRegistry, RegistryVersion), AllocationError> {
        let file = self
            .repo
            .get_file(self.path)
            .await
            .map_err(|error| AllocationError::Load {
                reason: error.to_string(),
            })?;

        match file {
            Some(file) => {
                let content =
                    String::from_utf8(file.content).map_err(|error| AllocationError::Load {
                        reason: error.to_string(),
                    })?;
                let registry =
                    IdentityRegistry::from_yaml(&content).map_err(|error| AllocationError::Load {
                        reason: error.to_string(),
                    })?;
                Ok((registry, RegistryVersion(Some(file.last_commit_id))))
            }
            None => Ok((IdentityRegistry::default(), RegistryVersion(None))),
        }
    }

    async fn store(
        &self,
        registry: &IdentityRegistry,
        version: RegistryVersion,
    ) -> Result<StoreOutcome, AllocationError> {
        let content = registry
            .to_yaml()
            .map_err(|error| AllocationError::Store {
                reason: error.to_string(),
            })?;

        let action = match version.0 {
            Some(last_commit_id) => CommitAction {
                action: CommitActionKind::Update,
                file_path: self.path.into(),
                content: Some(content),
                last_commit_id: Some(last_commit_id),
            },
            None => CommitAction {
                action: CommitActionKind::Create,
                file_path: self.path.into(),
                content: Some(content),
                last_commit_id: None,
            },
        };

        match self.repo.commit("update dashboard identity registry", &[action]).await {
            Ok(()) => Ok(StoreOutcome::Committed),
            Err(CommitError::Conflict(_)) => Ok(StoreOutcome::Conflict),
            Err(CommitError::Other(error)) => Err(AllocationError::Store {
                reason: error.to_string(),
            }),
        }
    }
}

/// In-memory registry store for tests and dry runs. The revision counter
/// mimics the repository's commit-id semantics.
#[derive(Default)]
pub struct MemoryRegistryStore {
    state: Mutex<MemoryRegistryState>,
}

#[derive(Default)]
struct MemoryRegistryState {
    registry: Option<IdentityRegistry>,
    revision: u64,
}

impl MemoryRegistryStore {
    pub fn snapshot(&self) -> IdentityRegistry {
        let state = self.state.lock().expect("registry state poisoned");
        state.registry.clone().unwrap_or_default()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn load(&self) -> Result<(IdentityRegistry, RegistryVersion), AllocationError> {
        let state = self.state.lock().expect("registry state poisoned");
        match &state.registry {
            Some(registry) => Ok((
                registry.clone(),
                RegistryVersion(Some(state.revision.to_string())),
            )),
            None => Ok((IdentityRegistry::default(), RegistryVersion(None))),
        }
    }

    async fn store(
        &self,
        registry: &IdentityRegistry,
        version: RegistryVersion,
    ) -> Result<StoreOutcome, AllocationError> {
        let mut state = self.state.lock().expect("registry state poisoned");
        let expected = state.registry.as_ref().map(|_| state.revision.to_string());
        if version.0 != expected {
            return Ok(StoreOutcome::Conflict);
        }

        state.registry = Some(registry.clone());
        state.revision += 1;
        Ok(StoreOutcome::Committed)
    }
}

/// Resolves identities for a whole discovery batch.
pub struct IdentityAllocator<'a> {
    store: &'a (dyn RegistryStore + Sync),
}

impl<'a> IdentityAllocator<'a> {
    pub const MAX_RETRY: usize = 3;

    pub const fn new(store: &'a (dyn RegistryStore + Sync)) -> Self {
        Self { store }
    }

    /// Allocates or resolves the identity of every service in the batch.
    ///
    /// Unseen services are allocated in the batch's stable `(namespace,
    /// name)` order, so any replay of the same discovery history converges to
    /// the same numeric ids. The updated registry is committed before this
    /// returns; a concurrent commit by another instance triggers a bounded
    /// re-read-and-replay.
    #[instrument(level = Level::INFO, skip_all, fields(num_services = services.len()), err(Display))]
    pub async fn allocate_batch(
        &self,
        services: &BTreeSet<ServiceDescriptor>,
    ) -> Result<BTreeMap<ServiceDescriptor, DashboardIdentity>, AllocationError> {
        for retry in 0..Self::MAX_RETRY {
            let (mut registry, version) = self.store.load().await?;
            let known = registry.identities.len();

            let identities = services
                .iter()
                .map(|service| (service.clone(), registry.allocate(&service.uid())))
                .collect();

            // nothing newly allocated: skip the write, nothing can conflict
            let allocated = registry.identities.len() - known;
            if allocated == 0 {
                return Ok(identities);
            }

            match self.store.store(&registry, version).await? {
                StoreOutcome::Committed => {
                    info!("allocated {allocated} new identities");
                    return Ok(identities);
                }
                StoreOutcome::Conflict => {
                    warn!(
                        "identity registry changed concurrently; replaying ({retry}/{max})",
                        retry = retry + 1,
                        max = Self::MAX_RETRY,
                    );
                }
            }
        }

        Err(AllocationError::Conflict {
            retries: Self::MAX_RETRY,
        })
    }
}
