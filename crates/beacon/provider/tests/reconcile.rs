use std::collections::BTreeSet;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use beacon_api::{error::DiscoveryError, service::ServiceDescriptor};
use beacon_provider::{
    discovery::ServiceSource,
    reconcile::Reconciler,
    registry::MemoryRegistryStore,
    storage::MemoryStore,
    template::TemplateSource,
};

const TEMPLATE: &str = r#"{
  "uid": "{{ uid }}",
  "id": {{ numericId }},
  "title": "{{ title }}",
  "tags": ["{{ namespace }}", "{{ name }}"],
  "panels": [
    {
      "targets": [
        { "expr": "up{job=~\"{{ selectorPrefix }}-.*\"}" }
      ]
    }
  ]
}"#;

/// Discovery pinned to a test-controlled service set.
struct FixedServices {
    services: Mutex<BTreeSet<ServiceDescriptor>>,
}

impl FixedServices {
    fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            services: Mutex::new(batch(pairs)),
        }
    }

    fn set(&self, pairs: &[(&str, &str)]) {
        *self.services.lock().unwrap() = batch(pairs);
    }
}

#[async_trait]
impl ServiceSource for FixedServices {
    async fn discover(&self) -> Result<BTreeSet<ServiceDescriptor>, DiscoveryError> {
        Ok(self.services.lock().unwrap().clone())
    }
}

struct FixedTemplate(&'static str);

#[async_trait]
impl TemplateSource for FixedTemplate {
    async fn fetch(&self) -> Result<String> {
        Ok(self.0.into())
    }
}

fn batch(pairs: &[(&str, &str)]) -> BTreeSet<ServiceDescriptor> {
    pairs
        .iter()
        .map(|(namespace, name)| ServiceDescriptor::try_new(namespace, name).unwrap())
        .collect()
}

#[tokio::test]
async fn two_new_services_reach_both_sinks_then_converge() {
    let services = FixedServices::new(&[("internal", "api"), ("internal", "worker")]);
    let registry = MemoryRegistryStore::default();
    let template = FixedTemplate(TEMPLATE);
    let cluster = MemoryStore::new("cluster", true);
    let repository = MemoryStore::new("repository", false);

    let reconciler = Reconciler {
        services: &services,
        registry: &registry,
        template: &template,
        sinks: vec![&cluster, &repository],
    };

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.discovered, 2);
    assert!(report.render_failures.is_empty());
    for sink in &report.sinks {
        assert_eq!(
            sink.created,
            vec!["api-internal".to_string(), "worker-internal".to_string()],
        );
        assert!(sink.failures.is_empty());
    }

    // identities follow the stable (namespace, name) order
    let snapshot = registry.snapshot();
    assert_eq!(snapshot.identities["api-internal"], 1);
    assert_eq!(snapshot.identities["worker-internal"], 2);

    let api: serde_json::Value =
        serde_json::from_str(&cluster.contents()["api-internal"]).unwrap();
    assert_eq!(api["uid"], "api-internal");
    assert_eq!(api["id"], 1);
    assert_eq!(cluster.contents(), repository.contents());

    // an immediate second cycle must be a no-op on both sinks
    let report = reconciler.reconcile().await.unwrap();
    for sink in &report.sinks {
        assert_eq!(sink.operations(), 0);
        assert_eq!(sink.unchanged, 2);
    }
}

#[tokio::test]
async fn removed_services_prune_the_cluster_but_stay_in_history() {
    let services = FixedServices::new(&[("internal", "api"), ("internal", "worker")]);
    let registry = MemoryRegistryStore::default();
    let template = FixedTemplate(TEMPLATE);
    let cluster = MemoryStore::new("cluster", true);
    let repository = MemoryStore::new("repository", false);

    let reconciler = Reconciler {
        services: &services,
        registry: &registry,
        template: &template,
        sinks: vec![&cluster, &repository],
    };
    reconciler.reconcile().await.unwrap();

    services.set(&[("internal", "api")]);
    let report = reconciler.reconcile().await.unwrap();

    let by_name = |name: &str| {
        report
            .sinks
            .iter()
            .find(|sink| sink.target == name)
            .unwrap()
    };
    assert_eq!(by_name("cluster").deleted, vec!["worker-internal".to_string()]);
    assert!(by_name("cluster").suppressed.is_empty());

    // the append-only sink reports the same delta without executing it
    assert!(by_name("repository").deleted.is_empty());
    assert_eq!(
        by_name("repository").suppressed,
        vec!["worker-internal".to_string()],
    );

    assert!(!cluster.contents().contains_key("worker-internal"));
    assert!(repository.contents().contains_key("worker-internal"));

    // the orphan keeps its id; a newcomer continues after it
    services.set(&[("internal", "api"), ("internal", "worker"), ("edge", "gateway")]);
    reconciler.reconcile().await.unwrap();

    let snapshot = registry.snapshot();
    assert_eq!(snapshot.identities["worker-internal"], 2);
    assert_eq!(snapshot.identities["gateway-edge"], 3);
}

#[tokio::test]
async fn one_broken_render_never_blocks_or_deletes_the_rest() {
    // the placeholder only breaks for the worker service
    const CONDITIONAL: &str = r#"{
  "uid": "{{ uid }}",
  "id": {{ numericId }}{% if name == "worker" %},
  "legend": "{{ rate }}"{% endif %}
}"#;

    let services = FixedServices::new(&[("internal", "api"), ("internal", "worker")]);
    let registry = MemoryRegistryStore::default();
    let template = FixedTemplate(CONDITIONAL);
    let cluster = MemoryStore::new("cluster", true);
    // the worker dashboard already exists from an earlier, healthy cycle
    cluster.insert("worker-internal", "{\"uid\": \"worker-internal\", \"id\": 2}");

    let reconciler = Reconciler {
        services: &services,
        registry: &registry,
        template: &template,
        sinks: vec![&cluster],
    };

    let report = reconciler.reconcile().await.unwrap();

    assert_eq!(report.render_failures.len(), 1);
    assert_eq!(report.render_failures[0].key, "worker-internal");

    let sink = &report.sinks[0];
    assert_eq!(sink.created, vec!["api-internal".to_string()]);
    // quarantined, not pruned
    assert!(sink.deleted.is_empty());
    assert!(cluster.contents().contains_key("worker-internal"));
}
