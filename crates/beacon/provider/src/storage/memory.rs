use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use beacon_api::error::TargetError;
use beacon_core::digest::sha256_hex;

use super::SyncTarget;
use crate::template::DashboardDocument;

/// In-memory sink used by tests and dry runs.
pub struct MemoryStore {
    name: String,
    prune: bool,
    documents: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, prune: bool) -> Self {
        Self {
            name: name.into(),
            prune,
            documents: Mutex::default(),
        }
    }

    /// Seeds the sink with pre-existing content.
    pub fn insert(&self, key: impl Into<String>, content: impl Into<String>) {
        self.documents
            .lock()
            .expect("memory store poisoned")
            .insert(key.into(), content.into());
    }

    pub fn contents(&self) -> BTreeMap<String, String> {
        self.documents.lock().expect("memory store poisoned").clone()
    }
}

#[async_trait]
impl SyncTarget for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn prune(&self) -> bool {
        self.prune
    }

    async fn list(&self) -> Result<BTreeMap<String, String>, TargetError> {
        Ok(self
            .documents
            .lock()
            .expect("memory store poisoned")
            .iter()
            .map(|(key, content)| (key.clone(), sha256_hex(content)))
            .collect())
    }

    async fn put(&self, document: &DashboardDocument) -> Result<(), TargetError> {
        self.documents
            .lock()
            .expect("memory store poisoned")
            .insert(document.uid.clone(), document.content.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TargetError> {
        self.documents
            .lock()
            .expect("memory store poisoned")
            .remove(key);
        Ok(())
    }
}
