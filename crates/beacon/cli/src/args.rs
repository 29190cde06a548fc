use beacon_api::args::{ClusterArgs, CycleArgs, RepoArgs};
use clap::Parser;

/// Reconciles monitored deployments against generated Grafana dashboards,
/// once per invocation.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Args {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    #[command(flatten)]
    pub cycle: CycleArgs,

    #[command(flatten)]
    pub repo: RepoArgs,
}
