use thiserror::Error;

/// Orchestrator unreachable or unauthorized. Fatal: there is nothing to
/// reconcile against, so the cycle aborts before any writes.
#[derive(Clone, Debug, Error)]
#[error("failed to discover services: {reason}")]
pub struct DiscoveryError {
    pub reason: String,
}

/// Identity registry unreadable or unwritable. Fatal and fail-closed: going
/// on without the registry could hand out colliding numeric ids.
#[derive(Clone, Debug, Error)]
pub enum AllocationError {
    #[error("failed to load the identity registry: {reason}")]
    Load { reason: String },
    #[error("failed to store the identity registry: {reason}")]
    Store { reason: String },
    #[error("identity registry kept changing concurrently; gave up after {retries} retries")]
    Conflict { retries: usize },
}

/// Template misuse, fatal to a single descriptor only; the rest of the batch
/// proceeds.
#[derive(Clone, Debug, Error)]
pub enum RenderError {
    #[error("failed to parse the dashboard template: {reason}")]
    Parse { reason: String },
    #[error("failed to render dashboard {key}: {reason}")]
    Unresolved { key: String, reason: String },
    #[error("rendered dashboard {key} is not a well-formed document: {reason}")]
    MalformedOutput { key: String, reason: String },
}

impl RenderError {
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Parse { .. } => None,
            Self::Unresolved { key, .. } | Self::MalformedOutput { key, .. } => Some(key),
        }
    }
}

/// One sink operation failed. Recorded against the sink after bounded
/// retries; never aborts the other sink.
#[derive(Clone, Debug, Error)]
pub enum TargetError {
    #[error("failed to list dashboards on {target}: {reason}")]
    List { target: String, reason: String },
    #[error("failed to write dashboard {key} to {target}: {reason}")]
    Put {
        target: String,
        key: String,
        reason: String,
    },
    #[error("failed to delete dashboard {key} from {target}: {reason}")]
    Delete {
        target: String,
        key: String,
        reason: String,
    },
    #[error("failed to flush {count} staged changes to {target}: {reason}")]
    Flush {
        target: String,
        count: usize,
        reason: String,
    },
}

impl TargetError {
    pub fn target(&self) -> &str {
        match self {
            Self::List { target, .. }
            | Self::Put { target, .. }
            | Self::Delete { target, .. }
            | Self::Flush { target, .. } => target,
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Self::List { .. } | Self::Flush { .. } => None,
            Self::Put { key, .. } | Self::Delete { key, .. } => Some(key),
        }
    }
}

/// Conditions that abort a whole reconciliation cycle before any sink writes.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("failed to fetch the dashboard template: {reason}")]
    TemplateUnavailable { reason: String },
    #[error("reconciliation deadline exceeded after {seconds}s")]
    DeadlineExceeded { seconds: u64 },
}
