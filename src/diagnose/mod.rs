// Blocking-process inspection: a best-effort answer to "why is this
// volume busy", built on lsof's machine-readable output. Reporting only;
// nothing here ever terminates a process.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::volume::Volume;
use crate::{EjectError, EjectResult};

/// One process holding files open under a mount point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockingProcess {
    pub pid: u32,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Per-volume diagnosis for the CLI payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeDiagnosis {
    pub volume: String,
    pub path: String,
    pub processes: Vec<BlockingProcess>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlockingProcessInspector: Send + Sync {
    async fn blocking_processes(&self, mount_path: &Path) -> EjectResult<Vec<BlockingProcess>>;
}

/// Inspect every given volume. Inspector failures degrade to an empty
/// process list for that volume; the diagnosis itself never fails.
pub async fn diagnose_volumes(
    inspector: &dyn BlockingProcessInspector,
    volumes: &[Volume],
) -> Vec<VolumeDiagnosis> {
    let mut reports = Vec::with_capacity(volumes.len());
    for volume in volumes {
        let processes = match inspector.blocking_processes(&volume.mount_path).await {
            Ok(processes) => processes,
            Err(err) => {
                tracing::warn!(volume = %volume.name, error = %err, "blocking-process inspection failed");
                Vec::new()
            }
        };
        reports.push(VolumeDiagnosis {
            volume: volume.name.clone(),
            path: volume.mount_path_display(),
            processes,
        });
    }
    reports
}

/// Shells out to `lsof -F pcL -- <mount point>`.
#[derive(Debug, Default)]
pub struct LsofInspector;

impl LsofInspector {
    pub fn new() -> Self {
        LsofInspector
    }
}

#[async_trait]
impl BlockingProcessInspector for LsofInspector {
    async fn blocking_processes(&self, mount_path: &Path) -> EjectResult<Vec<BlockingProcess>> {
        if !mount_path.is_absolute() {
            tracing::debug!(path = %mount_path.display(), "refusing to inspect a relative path");
            return Ok(Vec::new());
        }

        let output = Command::new("lsof")
            .arg("-F")
            .arg("pcL")
            .arg("--")
            .arg(mount_path)
            .output()
            .await
            .map_err(|err| EjectError::Inspection(format!("failed to run lsof: {err}")))?;

        // lsof exits non-zero when nothing holds files open; only a spawn
        // failure above is a real error.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let processes = parse_lsof_records(&stdout);
        tracing::debug!(
            path = %mount_path.display(),
            count = processes.len(),
            "blocking-process inspection finished"
        );
        Ok(processes)
    }
}

/// Parse `lsof -F pcL` output: one field per line, tagged by its first
/// character (`p` pid, `c` command, `L` login). A `p` line opens a new
/// record; unparseable pids drop the record, unknown tags are ignored.
pub fn parse_lsof_records(output: &str) -> Vec<BlockingProcess> {
    let mut processes: Vec<BlockingProcess> = Vec::new();
    let mut current: Option<BlockingProcess> = None;

    for line in output.lines() {
        let mut chars = line.chars();
        let Some(tag) = chars.next() else { continue };
        let value = chars.as_str();
        match tag {
            'p' => {
                if let Some(done) = current.take() {
                    push_unique(&mut processes, done);
                }
                match value.parse::<u32>() {
                    Ok(pid) => {
                        current = Some(BlockingProcess {
                            pid,
                            command: String::new(),
                            user: None,
                        });
                    }
                    Err(_) => {
                        tracing::debug!(line, "skipping unparseable lsof pid record");
                    }
                }
            }
            'c' => {
                if let Some(process) = current.as_mut() {
                    process.command = value.to_string();
                }
            }
            'L' => {
                if let Some(process) = current.as_mut() {
                    process.user = Some(value.to_string());
                }
            }
            _ => {}
        }
    }
    if let Some(done) = current.take() {
        push_unique(&mut processes, done);
    }
    processes
}

// lsof repeats the process set when a process holds several files; keep
// the first occurrence.
fn push_unique(processes: &mut Vec<BlockingProcess>, candidate: BlockingProcess) {
    if processes.iter().all(|p| p.pid != candidate.pid) {
        processes.push(candidate);
    }
}
