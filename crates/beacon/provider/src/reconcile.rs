use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use beacon_api::{
    error::{CycleError, TargetError},
    report::{KeyedFailure, ReconciliationReport, SinkReport},
};
use chrono::Utc;
use futures::future;
use tokio::time::sleep;
use tracing::{info, instrument, warn, Level};

use crate::{
    discovery::ServiceSource,
    registry::{IdentityAllocator, RegistryStore},
    storage::SyncTarget,
    template::{DashboardDocument, DashboardTemplate, TemplateSource},
};

/// Desired-vs-observed difference for one sync target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffPlan {
    pub to_create: Vec<String>,
    pub to_update: Vec<String>,
    pub to_delete: Vec<String>,
    pub unchanged: usize,
}

impl DiffPlan {
    /// Three-set diff between the rendered documents and one sink's records.
    ///
    /// Keys in `quarantined` failed to render this cycle: they are neither
    /// desired nor deletable, so a broken placeholder can never take down the
    /// live dashboard it failed to re-render.
    pub fn compute(
        desired: &BTreeMap<String, DashboardDocument>,
        observed: &BTreeMap<String, String>,
        quarantined: &BTreeSet<String>,
    ) -> Self {
        let mut plan = Self::default();
        for (key, document) in desired {
            match observed.get(key) {
                Some(digest) if digest == &document.digest => plan.unchanged += 1,
                Some(_) => plan.to_update.push(key.clone()),
                None => plan.to_create.push(key.clone()),
            }
        }
        plan.to_delete = observed
            .keys()
            .filter(|key| !desired.contains_key(*key) && !quarantined.contains(*key))
            .cloned()
            .collect();
        plan
    }

    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// One full discover-allocate-render-diff-apply pass over both sinks.
pub struct Reconciler<'a> {
    pub services: &'a (dyn ServiceSource + Sync),
    pub registry: &'a (dyn RegistryStore + Sync),
    pub template: &'a (dyn TemplateSource + Sync),
    pub sinks: Vec<&'a (dyn SyncTarget + Sync)>,
}

impl Reconciler<'_> {
    #[instrument(level = Level::INFO, skip_all, err(Display))]
    pub async fn reconcile(&self) -> Result<ReconciliationReport, CycleError> {
        let started_at = Utc::now();

        let services = self.services.discover().await?;
        info!("discovered {} services", services.len());

        // allocation commits before the first render, so aborting any later
        // step never leaves the registry half-written
        let identities = IdentityAllocator::new(self.registry)
            .allocate_batch(&services)
            .await?;

        // an unreadable template would read as an empty desired set and
        // delete every live dashboard; fail the cycle before any writes
        let source =
            self.template
                .fetch()
                .await
                .map_err(|error| CycleError::TemplateUnavailable {
                    reason: error.to_string(),
                })?;
        let template =
            DashboardTemplate::new(&source).map_err(|error| CycleError::TemplateUnavailable {
                reason: error.to_string(),
            })?;

        let mut desired = BTreeMap::default();
        let mut quarantined = BTreeSet::default();
        let mut render_failures = Vec::default();
        for (service, identity) in &identities {
            match template.render(service, identity) {
                Ok(document) => {
                    desired.insert(document.uid.clone(), document);
                }
                Err(error) => {
                    warn!("failed to render {service}: {error}");
                    quarantined.insert(identity.uid.clone());
                    render_failures.push(KeyedFailure {
                        key: identity.uid.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        // the sinks are independent failure domains; apply them concurrently
        // and let neither abort the other
        let sinks = future::join_all(
            self.sinks
                .iter()
                .map(|sink| apply_sink(*sink, &desired, &quarantined)),
        )
        .await;

        Ok(ReconciliationReport {
            started_at,
            finished_at: Utc::now(),
            discovered: services.len(),
            render_failures,
            sinks,
        })
    }
}

const MAX_RETRY: usize = 3;
const BACKOFF: Duration = Duration::from_secs(1);

#[instrument(level = Level::INFO, skip_all, fields(target = sink.name()))]
async fn apply_sink(
    sink: &(dyn SyncTarget + Sync),
    desired: &BTreeMap<String, DashboardDocument>,
    quarantined: &BTreeSet<String>,
) -> SinkReport {
    let mut report = SinkReport::new(sink.name());

    let observed = match sink.list().await {
        Ok(observed) => observed,
        Err(error) => {
            // without the current state there is nothing safe to apply
            warn!("{error}");
            report.aborted = Some(error.to_string());
            return report;
        }
    };

    let plan = DiffPlan::compute(desired, &observed, quarantined);
    if plan.is_noop() {
        info!("in sync ({} unchanged)", plan.unchanged);
    } else {
        info!(
            "applying {} creates, {} updates, {} deletes",
            plan.to_create.len(),
            plan.to_update.len(),
            plan.to_delete.len(),
        );
    }
    report.unchanged = plan.unchanged;

    for key in plan.to_create {
        match with_retry(|| sink.put(&desired[&key])).await {
            Ok(()) => report.created.push(key),
            Err(error) => report.failures.push(failure(key, &error)),
        }
    }
    for key in plan.to_update {
        match with_retry(|| sink.put(&desired[&key])).await {
            Ok(()) => report.updated.push(key),
            Err(error) => report.failures.push(failure(key, &error)),
        }
    }
    if sink.prune() {
        for key in plan.to_delete {
            match with_retry(|| sink.delete(&key)).await {
                Ok(()) => report.deleted.push(key),
                Err(error) => report.failures.push(failure(key, &error)),
            }
        }
    } else {
        report.suppressed = plan.to_delete;
    }

    if let Err(error) = with_retry(|| sink.flush()).await {
        // staged writes never landed; reclassify them as failures
        warn!("{error}");
        let staged: Vec<_> = report
            .created
            .drain(..)
            .chain(report.updated.drain(..))
            .chain(report.deleted.drain(..))
            .collect();
        for key in staged {
            report.failures.push(failure(key, &error));
        }
    }

    report
}

fn failure(key: String, error: &TargetError) -> KeyedFailure {
    KeyedFailure {
        key,
        reason: error.to_string(),
    }
}

async fn with_retry<F, Fut>(f: F) -> Result<(), TargetError>
where
    F: Fn() -> Fut,
    Fut: ::core::future::Future<Output = Result<(), TargetError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(()) => return Ok(()),
            Err(error) => {
                attempt += 1;
                if attempt >= MAX_RETRY {
                    return Err(error);
                }
                warn!("{error}; retrying ({attempt}/{MAX_RETRY})");
                sleep(BACKOFF * attempt as u32).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use beacon_core::digest::sha256_hex;

    use super::DiffPlan;
    use crate::template::DashboardDocument;

    fn document(uid: &str, content: &str) -> (String, DashboardDocument) {
        (
            uid.into(),
            DashboardDocument {
                uid: uid.into(),
                content: content.into(),
                digest: sha256_hex(content),
            },
        )
    }

    #[test]
    fn classifies_all_four_sets() {
        let desired: BTreeMap<_, _> = [
            document("api-internal", "{}"),
            document("worker-internal", "{\"id\": 2}"),
            document("gateway-edge", "{\"id\": 3}"),
        ]
        .into();
        let observed: BTreeMap<String, String> = [
            ("api-internal".into(), sha256_hex("{}")),
            ("worker-internal".into(), sha256_hex("stale")),
            ("removed-internal".into(), sha256_hex("{}")),
        ]
        .into();

        let plan = DiffPlan::compute(&desired, &observed, &BTreeSet::default());
        assert_eq!(plan.to_create, vec!["gateway-edge".to_string()]);
        assert_eq!(plan.to_update, vec!["worker-internal".to_string()]);
        assert_eq!(plan.to_delete, vec!["removed-internal".to_string()]);
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn identical_state_is_a_noop() {
        let desired: BTreeMap<_, _> = [document("api-internal", "{}")].into();
        let observed: BTreeMap<String, String> = [("api-internal".into(), sha256_hex("{}"))].into();

        let plan = DiffPlan::compute(&desired, &observed, &BTreeSet::default());
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged, 1);
    }

    #[test]
    fn quarantined_keys_are_exempt_from_deletion() {
        let desired = BTreeMap::default();
        let observed: BTreeMap<String, String> = [
            ("api-internal".into(), sha256_hex("{}")),
            ("worker-internal".into(), sha256_hex("{}")),
        ]
        .into();
        let quarantined: BTreeSet<String> = ["api-internal".to_string()].into();

        let plan = DiffPlan::compute(&desired, &observed, &quarantined);
        assert_eq!(plan.to_delete, vec!["worker-internal".to_string()]);
    }
}
