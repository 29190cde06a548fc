use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// The stable identity assigned once per monitored service and kept for the
/// lifetime of the registry, even after the service disappears.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardIdentity {
    pub uid: String,
    pub numeric_id: u64,
}

/// Append-only allocation state, persisted across reconciliation cycles.
///
/// Numeric ids are a strict function of first-seen order: replaying the same
/// discovery history against an empty registry reproduces the same mapping.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRegistry {
    /// High-water mark; the next numeric id to hand out. Never decreases,
    /// and ids below it are never reissued.
    pub next_id: u64,
    pub identities: BTreeMap<String, u64>,
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self {
            next_id: 1,
            identities: BTreeMap::default(),
        }
    }
}

impl IdentityRegistry {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut registry: Self = ::serde_yaml::from_str(content)?;

        // A hand-edited registry may carry a high-water mark below its own
        // entries; allocating from it would collide with a live id.
        if let Some(max_id) = registry.identities.values().max() {
            registry.next_id = registry.next_id.max(max_id + 1);
        }
        Ok(registry)
    }

    pub fn to_yaml(&self) -> Result<String> {
        ::serde_yaml::to_string(self).map_err(Into::into)
    }

    pub fn get(&self, uid: &str) -> Option<DashboardIdentity> {
        self.identities.get(uid).map(|&numeric_id| DashboardIdentity {
            uid: uid.into(),
            numeric_id,
        })
    }

    /// Returns the identity for the uid, assigning the next numeric id on
    /// first sight. Existing entries are never remapped.
    pub fn allocate(&mut self, uid: &str) -> DashboardIdentity {
        match self.identities.get(uid) {
            Some(&numeric_id) => DashboardIdentity {
                uid: uid.into(),
                numeric_id,
            },
            None => {
                let numeric_id = self.next_id;
                self.next_id += 1;
                self.identities.insert(uid.into(), numeric_id);
                DashboardIdentity {
                    uid: uid.into(),
                    numeric_id,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::IdentityRegistry;

    #[test]
    fn allocation_is_monotonic_and_idempotent() {
        let mut registry = IdentityRegistry::default();
        assert_eq!(registry.allocate("api-internal").numeric_id, 1);
        assert_eq!(registry.allocate("worker-internal").numeric_id, 2);
        assert_eq!(registry.allocate("api-internal").numeric_id, 1);
        assert_eq!(registry.next_id, 3);
    }

    #[test]
    fn removed_services_keep_their_ids_reserved() {
        let mut registry = IdentityRegistry::default();
        registry.allocate("api-internal");
        registry.allocate("worker-internal");

        // even with every entry gone, the high-water mark stands
        registry.identities.clear();
        assert_eq!(registry.allocate("gateway-edge").numeric_id, 3);
    }

    #[test]
    fn yaml_round_trip() {
        let mut registry = IdentityRegistry::default();
        registry.allocate("api-internal");
        registry.allocate("worker-internal");

        let restored = IdentityRegistry::from_yaml(&registry.to_yaml().unwrap()).unwrap();
        assert_eq!(restored, registry);
    }

    #[test]
    fn lagging_high_water_mark_is_repaired_on_load() {
        let content = "nextId: 1\nidentities:\n  api-internal: 7\n";
        let registry = IdentityRegistry::from_yaml(content).unwrap();
        assert_eq!(registry.next_id, 8);
    }
}
