use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

/// Outcome of one full discover-allocate-render-diff-apply pass, serialized
/// for the scheduler and for alerting.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Services returned by discovery after normalization.
    pub discovered: usize,
    pub render_failures: Vec<KeyedFailure>,
    pub sinks: Vec<SinkReport>,
}

impl ReconciliationReport {
    pub fn outcome(&self) -> CycleOutcome {
        let clean = self.render_failures.is_empty()
            && self
                .sinks
                .iter()
                .all(|sink| sink.failures.is_empty() && sink.aborted.is_none());
        if clean {
            CycleOutcome::Success
        } else {
            CycleOutcome::Degraded
        }
    }
}

/// What one sync target saw and did this cycle. Key lists are sorted.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkReport {
    pub target: String,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    /// Deletions that would have applied, suppressed on an append-only target.
    pub suppressed: Vec<String>,
    pub unchanged: usize,
    pub failures: Vec<KeyedFailure>,
    /// Set when the sink could not even be listed; no operations were applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl SinkReport {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            created: Vec::default(),
            updated: Vec::default(),
            deleted: Vec::default(),
            suppressed: Vec::default(),
            unchanged: 0,
            failures: Vec::default(),
            aborted: None,
        }
    }

    /// Number of write operations applied to this sink.
    pub fn operations(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyedFailure {
    pub key: String,
    pub reason: String,
}

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum CycleOutcome {
    /// Every desired dashboard reached every sink.
    Success,
    /// The cycle completed, but some dashboards or one sink failed.
    Degraded,
    /// The cycle aborted before completing; no partial state was written.
    Failed,
}

impl CycleOutcome {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Degraded => 1,
            Self::Failed => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{CycleOutcome, KeyedFailure, ReconciliationReport, SinkReport};

    fn report() -> ReconciliationReport {
        ReconciliationReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            discovered: 2,
            render_failures: Vec::default(),
            sinks: vec![SinkReport::new("cluster"), SinkReport::new("repository")],
        }
    }

    #[test]
    fn clean_cycle_is_success() {
        assert_eq!(report().outcome(), CycleOutcome::Success);
        assert_eq!(CycleOutcome::Success.exit_code(), 0);
    }

    #[test]
    fn any_failure_degrades_the_cycle() {
        let mut degraded = report();
        degraded.sinks[0].failures.push(KeyedFailure {
            key: "api-internal".into(),
            reason: "gone".into(),
        });
        assert_eq!(degraded.outcome(), CycleOutcome::Degraded);
        assert_eq!(degraded.outcome().exit_code(), 1);

        let mut unlisted = report();
        unlisted.sinks[1].aborted = Some("unreachable".into());
        assert_eq!(unlisted.outcome(), CycleOutcome::Degraded);
    }
}
