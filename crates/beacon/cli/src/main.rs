mod args;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use beacon_api::{error::CycleError, report::CycleOutcome};
use beacon_provider::{
    discovery::Discovery,
    reconcile::Reconciler,
    registry::RepoRegistryStore,
    repo::RepoClient,
    storage::{ConfigMapStore, RepoStore},
    template::RepoTemplateSource,
};
use clap::Parser;
use kube::Client;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    ::beacon_core::tracer::init_once();

    match try_main(self::args::Args::parse()).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(error) => {
            error!("failed to reconcile: {error}");
            ExitCode::from(CycleOutcome::Failed.exit_code())
        }
    }
}

async fn try_main(args: self::args::Args) -> Result<CycleOutcome> {
    let kube = Client::try_default().await?;
    let repo = RepoClient::try_new(&args.repo, Duration::from_secs(args.cycle.call_timeout))?;

    let discovery = Discovery::new(kube.clone());
    let registry = RepoRegistryStore {
        repo: &repo,
        path: &args.repo.registry_path,
    };
    let template = RepoTemplateSource {
        repo: &repo,
        path: &args.repo.template_path,
    };
    let cluster = ConfigMapStore::new(kube, &args.cluster.namespace, !args.cluster.keep_orphans);
    let repository = RepoStore::new(&repo, &args.repo.dashboard_path, args.repo.prune_repo);

    let reconciler = Reconciler {
        services: &discovery,
        registry: &registry,
        template: &template,
        sinks: vec![&cluster, &repository],
    };

    let report = ::tokio::time::timeout(
        Duration::from_secs(args.cycle.cycle_deadline),
        reconciler.reconcile(),
    )
    .await
    .map_err(|_| CycleError::DeadlineExceeded {
        seconds: args.cycle.cycle_deadline,
    })??;

    println!("{}", ::serde_json::to_string_pretty(&report)?);

    let outcome = report.outcome();
    info!("reconciliation finished: {outcome}");
    Ok(outcome)
}
