pub mod args;
pub mod error;
pub mod identity;
pub mod report;
pub mod service;

pub mod consts {
    /// Label that opts a workload into dashboard generation.
    pub const LABEL_DASHBOARD: &str = "beacon.ulagbulag.io/dashboard";
    pub const LABEL_DASHBOARD_VALUE_ENABLED: &str = "enabled";

    /// Label that marks generated objects as owned by this system.
    pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    pub const LABEL_MANAGED_BY_VALUE: &str = "beacon";

    /// Discovery marker expected by the Grafana dashboard sidecar loader.
    pub const LABEL_GRAFANA_DASHBOARD: &str = "grafana_dashboard";
    pub const LABEL_GRAFANA_DASHBOARD_VALUE: &str = "1";
}
