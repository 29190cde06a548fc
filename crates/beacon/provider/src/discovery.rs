use std::collections::BTreeSet;

use async_trait::async_trait;
use beacon_api::{consts, error::DiscoveryError, service::ServiceDescriptor};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{api::ListParams, Api, Client, ResourceExt};
use tracing::{instrument, warn, Level};

/// Anything that can enumerate the services eligible for monitoring.
#[async_trait]
pub trait ServiceSource {
    async fn discover(&self) -> Result<BTreeSet<ServiceDescriptor>, DiscoveryError>;
}

/// Live discovery: deployments opted in via the discovery marker, across all
/// namespaces the credential can see. Read-only.
pub struct Discovery {
    kube: Client,
}

impl Discovery {
    pub const fn new(kube: Client) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl ServiceSource for Discovery {
    #[instrument(level = Level::INFO, skip_all, err(Display))]
    async fn discover(&self) -> Result<BTreeSet<ServiceDescriptor>, DiscoveryError> {
        let api = Api::<Deployment>::all(self.kube.clone());
        let lp = ListParams {
            label_selector: Some(format!(
                "{key}={value}",
                key = consts::LABEL_DASHBOARD,
                value = consts::LABEL_DASHBOARD_VALUE_ENABLED,
            )),
            ..Default::default()
        };

        let deployments = api
            .list_metadata(&lp)
            .await
            .map_err(|error| DiscoveryError {
                reason: error.to_string(),
            })?;

        Ok(normalize(deployments.items))
    }
}

/// Converts raw workload metadata into canonical service descriptors.
///
/// Workloads without a derivable name or namespace are skipped, not fatal to
/// the batch; duplicates collapse onto one representative.
pub fn normalize<K>(items: impl IntoIterator<Item = K>) -> BTreeSet<ServiceDescriptor>
where
    K: ResourceExt,
{
    items
        .into_iter()
        .filter_map(|item| {
            let namespace = item.namespace().unwrap_or_default();
            let name = item.name_any();
            match ServiceDescriptor::try_new(&namespace, &name) {
                Ok(service) => Some(service),
                Err(error) => {
                    warn!("skipping workload {namespace:?}/{name:?}: {error}");
                    None
                }
            }
        })
        .collect()
}
