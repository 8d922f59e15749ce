//! Batch ejection of external storage volumes through the operating
//! system's disk-arbitration subsystem.
//!
//! The crate splits into volume discovery ([`volume`]), the native
//! session and callback bridge ([`arbitration`]), batch orchestration
//! ([`batch`]), and blocking-process inspection ([`diagnose`]). Per-volume
//! outcomes are data, not errors: [`EjectError`] is reserved for failures
//! that stop an operation from being attempted at all.

use std::path::PathBuf;

use thiserror::Error;

pub mod arbitration;
pub mod batch;
pub mod diagnose;
pub mod volume;


/// Failures that prevent an operation from running, as opposed to a
/// volume refusing to unmount (which is an [`arbitration::ErrorKind`]
/// inside a result).
#[derive(Error, Debug)]
pub enum EjectError {
    /// The native session could not be created. Fatal to the whole
    /// batch, distinct from any per-volume failure.
    #[error("failed to create disk arbitration session: {0}")]
    SessionCreate(String),

    #[error("not supported on this platform: {0}")]
    Unsupported(&'static str),

    #[error("cannot scan {path}: {source}")]
    Enumeration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("blocking-process inspection failed: {0}")]
    Inspection(String),
}

pub type EjectResult<T> = Result<T, EjectError>;

pub use arbitration::{DiskSession, Dissent, DissenterStatus, ErrorKind, VolumeArbiter};
pub use batch::{BatchEjectCoordinator, BatchResult, OperationResult, SingleEjectResult};
pub use diagnose::{
    diagnose_volumes, BlockingProcess, BlockingProcessInspector, LsofInspector, VolumeDiagnosis,
};
pub use volume::{
    DeviceId, EjectOptions, SystemVolumeEnumerator, Volume, VolumeBuilder, VolumeEnumerator,
};
