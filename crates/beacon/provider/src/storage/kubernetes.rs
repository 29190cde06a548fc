use std::collections::BTreeMap;

use async_trait::async_trait;
use beacon_api::{consts, error::TargetError};
use beacon_core::digest::sha256_hex;
use k8s_openapi::{api::core::v1::ConfigMap, Resource};
use kube::{
    api::{DeleteParams, ListParams, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use serde_json::json;
use tracing::{instrument, Level};

use super::SyncTarget;
use crate::template::DashboardDocument;

/// Cluster sink: one labeled ConfigMap per dashboard in the configured
/// namespace, picked up by the Grafana dashboard sidecar.
pub struct ConfigMapStore {
    api: Api<ConfigMap>,
    prune: bool,
}

impl ConfigMapStore {
    const NAME: &'static str = "cluster";
    const FIELD_MANAGER: &'static str = "beacon";

    pub fn new(kube: Client, namespace: &str, prune: bool) -> Self {
        Self {
            api: Api::namespaced(kube, namespace),
            prune,
        }
    }

    fn file_name(key: &str) -> String {
        format!("{key}.json")
    }
}

#[async_trait]
impl SyncTarget for ConfigMapStore {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn prune(&self) -> bool {
        self.prune
    }

    #[instrument(level = Level::INFO, skip_all, err(Display))]
    async fn list(&self) -> Result<BTreeMap<String, String>, TargetError> {
        let lp = ListParams {
            label_selector: Some(format!(
                "{key}={value}",
                key = consts::LABEL_MANAGED_BY,
                value = consts::LABEL_MANAGED_BY_VALUE,
            )),
            ..Default::default()
        };

        let configs = self.api.list(&lp).await.map_err(|error| TargetError::List {
            target: Self::NAME.into(),
            reason: error.to_string(),
        })?;

        Ok(configs
            .items
            .into_iter()
            .filter_map(|config| {
                let key = config.name_any();
                let content = config
                    .data
                    .as_ref()
                    .and_then(|data| data.get(&Self::file_name(&key)))?;
                Some((key, sha256_hex(content)))
            })
            .collect())
    }

    async fn put(&self, document: &DashboardDocument) -> Result<(), TargetError> {
        let patch = Patch::Apply(json!({
            "apiVersion": ConfigMap::API_VERSION,
            "kind": ConfigMap::KIND,
            "metadata": {
                "name": &document.uid,
                "labels": {
                    (consts::LABEL_GRAFANA_DASHBOARD): consts::LABEL_GRAFANA_DASHBOARD_VALUE,
                    (consts::LABEL_MANAGED_BY): consts::LABEL_MANAGED_BY_VALUE,
                },
            },
            "data": {
                (Self::file_name(&document.uid)): &document.content,
            },
        }));
        let pp = PatchParams::apply(Self::FIELD_MANAGER).force();

        self.api
            .patch(&document.uid, &pp, &patch)
            .await
            .map(|_| ())
            .map_err(|error| TargetError::Put {
                target: Self::NAME.into(),
                key: document.uid.clone(),
                reason: error.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), TargetError> {
        let dp = DeleteParams::background();
        self.api
            .delete(key, &dp)
            .await
            .map(|_| ())
            .map_err(|error| TargetError::Delete {
                target: Self::NAME.into(),
                key: key.into(),
                reason: error.to_string(),
            })
    }
}
