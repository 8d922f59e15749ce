use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::arbitration::dissent::ErrorKind;
use crate::volume::Volume;

/// Outcome of one native unmount or eject call.
///
/// Invariant: `error` is `None` exactly when `success` is true, and the
/// duration is never negative. Both are enforced by the constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,
    pub error: Option<ErrorKind>,
    pub duration_seconds: f64,
}

impl OperationResult {
    pub fn ok(duration: Duration) -> Self {
        OperationResult {
            success: true,
            error: None,
            duration_seconds: duration.as_secs_f64(),
        }
    }

    pub fn failed(kind: ErrorKind, duration: Duration) -> Self {
        debug_assert!(!kind.is_success(), "failure result built from a success kind");
        OperationResult {
            success: false,
            error: Some(kind),
            duration_seconds: duration.as_secs_f64(),
        }
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.map(|kind| kind.to_string())
    }
}

/// Per-volume view of a batch eject, one per requested volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleEjectResult {
    pub volume_name: String,
    pub volume_path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_seconds: f64,
    /// Kept for callers that branch on the failure kind; the wire carries
    /// only the derived message.
    #[serde(skip)]
    pub error: Option<ErrorKind>,
}

impl SingleEjectResult {
    /// Fan one group outcome out to a member volume.
    pub fn from_outcome(volume: &Volume, outcome: &OperationResult) -> Self {
        SingleEjectResult {
            volume_name: volume.name.clone(),
            volume_path: volume.mount_path_display(),
            success: outcome.success,
            error_message: outcome.error_message(),
            duration_seconds: outcome.duration_seconds,
            error: outcome.error,
        }
    }
}

/// Aggregate of one whole batch.
///
/// `total_duration_seconds` is wall-clock time for the batch, not the sum
/// of member durations; groups run concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub total_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub results: Vec<SingleEjectResult>,
    pub total_duration_seconds: f64,
}

impl BatchResult {
    /// The batch over zero volumes: all counts zero, no native calls made.
    pub fn empty() -> Self {
        BatchResult {
            total_count: 0,
            success_count: 0,
            failed_count: 0,
            results: Vec::new(),
            total_duration_seconds: 0.0,
        }
    }

    /// Counts are derived from the results so the totals invariant holds
    /// by construction.
    pub fn from_results(results: Vec<SingleEjectResult>, total: Duration) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();
        BatchResult {
            total_count: results.len(),
            success_count,
            failed_count: results.len() - success_count,
            results,
            total_duration_seconds: total.as_secs_f64(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count == 0
    }
}
