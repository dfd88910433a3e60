use alnumid::RunReport;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
};

/// Completed runs kept for status queries before the oldest are dropped.
const RETAINED_RUNS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyOutcomeView {
    pub category: String,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Running {
        started_at: DateTime<Utc>,
        requested_ids: u64,
    },
    Completed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        requested_ids: u64,
        success: bool,
        outcomes: Vec<KeyOutcomeView>,
    },
    /// The run task died before producing a report.
    Failed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        requested_ids: u64,
        error: String,
    },
}

/// In-memory record of generation runs, the out-of-band result channel for
/// callers that got a `202` back.
#[derive(Debug, Default)]
pub struct RunRegistry {
    next_id: AtomicU64,
    runs: Mutex<BTreeMap<u64, RunStatus>>,
}

impl RunRegistry {
    /// Registers a new run and returns its id.
    pub fn begin(&self, requested_ids: u64) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.runs.lock().insert(
            id,
            RunStatus::Running {
                started_at: Utc::now(),
                requested_ids,
            },
        );
        id
    }

    pub fn finish(&self, id: u64, report: &RunReport) {
        let success = report.is_success();
        let outcomes = report
            .outcomes
            .iter()
            .map(|o| {
                let (tracking, result, error) = match &o.result {
                    Ok(p) => (Some(p.tracking.clone()), Some(p.result.clone()), None),
                    Err(e) => (None, None, Some(e.to_string())),
                };
                KeyOutcomeView {
                    category: o.key.category().to_owned(),
                    color: o.key.color().to_owned(),
                    tracking,
                    result,
                    error,
                }
            })
            .collect();

        self.settle(id, |started_at, requested_ids| RunStatus::Completed {
            started_at,
            finished_at: Utc::now(),
            requested_ids,
            success,
            outcomes,
        });
    }

    /// Records a run whose task ended without a report, e.g. by panicking.
    pub fn fail(&self, id: u64, error: String) {
        self.settle(id, |started_at, requested_ids| RunStatus::Failed {
            started_at,
            finished_at: Utc::now(),
            requested_ids,
            error,
        });
    }

    fn settle(&self, id: u64, status: impl FnOnce(DateTime<Utc>, u64) -> RunStatus) {
        let mut runs = self.runs.lock();
        let (started_at, requested_ids) = match runs.get(&id) {
            Some(RunStatus::Running {
                started_at,
                requested_ids,
            }) => (*started_at, *requested_ids),
            _ => (Utc::now(), 0),
        };
        runs.insert(id, status(started_at, requested_ids));

        let settled: Vec<u64> = runs
            .iter()
            .filter(|(_, s)| !matches!(s, RunStatus::Running { .. }))
            .map(|(id, _)| *id)
            .collect();
        for old in settled.iter().take(settled.len().saturating_sub(RETAINED_RUNS)) {
            runs.remove(old);
        }
    }

    pub fn get(&self, id: u64) -> Option<RunStatus> {
        self.runs.lock().get(&id).cloned()
    }

    pub fn running(&self) -> usize {
        self.runs
            .lock()
            .values()
            .filter(|s| matches!(s, RunStatus::Running { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alnumid::{AllocationKey, Error, KeyOutcome, PersistedBatch};

    fn report() -> RunReport {
        RunReport {
            outcomes: vec![
                KeyOutcome {
                    key: AllocationKey::new("AL", "RED").unwrap(),
                    result: Ok(PersistedBatch {
                        tracking: "t.csv".into(),
                        result: "r.csv".into(),
                    }),
                },
                KeyOutcome {
                    key: AllocationKey::new("AL", "BLK").unwrap(),
                    result: Err(Error::ResolutionStalled {
                        unresolved: 2,
                        passes: 3,
                    }),
                },
            ],
        }
    }

    #[test]
    fn run_lifecycle() {
        let registry = RunRegistry::default();
        let id = registry.begin(10);
        assert!(matches!(
            registry.get(id),
            Some(RunStatus::Running { requested_ids: 10, .. })
        ));
        assert_eq!(registry.running(), 1);

        registry.finish(id, &report());
        let Some(RunStatus::Completed {
            success, outcomes, ..
        }) = registry.get(id)
        else {
            panic!("run should be completed");
        };
        assert!(!success);
        assert_eq!(outcomes[0].tracking, Some("t.csv".into()));
        assert!(outcomes[1].error.as_deref().unwrap().contains("unresolved"));
        assert_eq!(registry.running(), 0);
        assert!(registry.get(id + 1).is_none());
    }

    #[test]
    fn failed_task_is_no_longer_running() {
        let registry = RunRegistry::default();
        let id = registry.begin(4);
        registry.fail(id, "run task panicked".into());

        assert_eq!(registry.running(), 0);
        match registry.get(id) {
            Some(RunStatus::Failed {
                requested_ids,
                error,
                ..
            }) => {
                assert_eq!(requested_ids, 4);
                assert!(error.contains("panicked"));
            }
            other => panic!("expected a failed run, got {other:?}"),
        }
    }

    #[test]
    fn old_completed_runs_are_dropped() {
        let registry = RunRegistry::default();
        let running = registry.begin(1);
        let ids: Vec<u64> = (0..RETAINED_RUNS + 2).map(|_| registry.begin(1)).collect();
        for id in &ids {
            registry.finish(*id, &RunReport::default());
        }
        assert!(registry.get(ids[0]).is_none());
        assert!(registry.get(ids[1]).is_none());
        assert!(registry.get(ids[2]).is_some());
        assert!(registry.get(running).is_some());
    }
}
