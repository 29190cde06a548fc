use clap::Parser;
use url::Url;

#[derive(Clone, Debug, Parser)]
pub struct RepoArgs {
    /// Base URL of the GitLab instance
    #[arg(
        long,
        env = Self::BEACON_GITLAB_URL_KEY,
        default_value = Self::BEACON_GITLAB_URL_VALUE,
    )]
    pub gitlab_url: Url,

    /// Access token with read/write repository scope
    #[arg(long, env = Self::BEACON_GITLAB_TOKEN_KEY, hide_env_values = true)]
    pub gitlab_token: String,

    /// Target project, as a numeric id or a full path (e.g. `ops/monitoring`)
    #[arg(long, env = Self::BEACON_GITLAB_PROJECT_KEY)]
    pub gitlab_project: String,

    /// Branch that receives generated dashboards
    #[arg(
        long,
        env = Self::BEACON_GITLAB_BRANCH_KEY,
        default_value = Self::BEACON_GITLAB_BRANCH_VALUE,
    )]
    pub gitlab_branch: String,

    /// Directory in the repository holding generated dashboards
    #[arg(
        long,
        env = Self::BEACON_DASHBOARD_PATH_KEY,
        default_value = Self::BEACON_DASHBOARD_PATH_VALUE,
    )]
    pub dashboard_path: String,

    /// Path of the dashboard template file
    #[arg(
        long,
        env = Self::BEACON_TEMPLATE_PATH_KEY,
        default_value = Self::BEACON_TEMPLATE_PATH_VALUE,
    )]
    pub template_path: String,

    /// Path of the persisted identity registry file
    #[arg(
        long,
        env = Self::BEACON_REGISTRY_PATH_KEY,
        default_value = Self::BEACON_REGISTRY_PATH_VALUE,
    )]
    pub registry_path: String,

    /// Delete repository files of disappeared services instead of keeping
    /// them as history
    #[arg(long, env = Self::BEACON_PRUNE_REPO_KEY)]
    pub prune_repo: bool,
}

impl RepoArgs {
    pub const BEACON_GITLAB_URL_KEY: &'static str = "BEACON_GITLAB_URL";
    pub const BEACON_GITLAB_URL_VALUE: &'static str = "https://gitlab.com";

    pub const BEACON_GITLAB_TOKEN_KEY: &'static str = "BEACON_GITLAB_TOKEN";
    pub const BEACON_GITLAB_PROJECT_KEY: &'static str = "BEACON_GITLAB_PROJECT";

    pub const BEACON_GITLAB_BRANCH_KEY: &'static str = "BEACON_GITLAB_BRANCH";
    pub const BEACON_GITLAB_BRANCH_VALUE: &'static str = "main";

    pub const BEACON_DASHBOARD_PATH_KEY: &'static str = "BEACON_DASHBOARD_PATH";
    pub const BEACON_DASHBOARD_PATH_VALUE: &'static str = "dashboards/generated";

    pub const BEACON_TEMPLATE_PATH_KEY: &'static str = "BEACON_TEMPLATE_PATH";
    pub const BEACON_TEMPLATE_PATH_VALUE: &'static str = "dashboards/template.json.tera";

    pub const BEACON_REGISTRY_PATH_KEY: &'static str = "BEACON_REGISTRY_PATH";
    pub const BEACON_REGISTRY_PATH_VALUE: &'static str = "dashboards/registry.yaml";

    pub const BEACON_PRUNE_REPO_KEY: &'static str = "BEACON_PRUNE_REPO";
}

#[derive(Clone, Debug, Parser)]
pub struct ClusterArgs {
    /// Namespace that receives generated dashboard ConfigMaps
    #[arg(
        long,
        env = Self::BEACON_NAMESPACE_KEY,
        default_value = Self::BEACON_NAMESPACE_VALUE,
    )]
    pub namespace: String,

    /// Keep ConfigMaps of disappeared services instead of deleting them
    #[arg(long, env = Self::BEACON_KEEP_CLUSTER_ORPHANS_KEY)]
    pub keep_orphans: bool,
}

impl ClusterArgs {
    pub const BEACON_NAMESPACE_KEY: &'static str = "BEACON_NAMESPACE";
    pub const BEACON_NAMESPACE_VALUE: &'static str = "monitoring";

    pub const BEACON_KEEP_CLUSTER_ORPHANS_KEY: &'static str = "BEACON_KEEP_CLUSTER_ORPHANS";
}

#[derive(Clone, Debug, Parser)]
pub struct CycleArgs {
    /// Per-request timeout against remote endpoints, in seconds
    #[arg(
        long,
        env = Self::BEACON_CALL_TIMEOUT_KEY,
        default_value_t = Self::BEACON_CALL_TIMEOUT_VALUE,
    )]
    pub call_timeout: u64,

    /// Deadline for the whole reconciliation cycle, in seconds
    #[arg(
        long,
        env = Self::BEACON_CYCLE_DEADLINE_KEY,
        default_value_t = Self::BEACON_CYCLE_DEADLINE_VALUE,
    )]
    pub cycle_deadline: u64,
}

impl CycleArgs {
    pub const BEACON_CALL_TIMEOUT_KEY: &'static str = "BEACON_CALL_TIMEOUT";
    pub const BEACON_CALL_TIMEOUT_VALUE: u64 = 30;

    pub const BEACON_CYCLE_DEADLINE_KEY: &'static str = "BEACON_CYCLE_DEADLINE";
    pub const BEACON_CYCLE_DEADLINE_VALUE: u64 = 300;
}
