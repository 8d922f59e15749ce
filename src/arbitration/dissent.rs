/// Dissenter status handling for disk-arbitration operations
///
/// When an unmount or eject is refused, the subsystem hands the callback a
/// dissenter carrying a status code and sometimes a human-readable string.
/// This module maps the status family onto a closed set of error kinds so
/// the rest of the crate never touches raw codes.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw status code delivered by a dissenter.
///
/// The known family lives at `0xF8DA0001..=0xF8DA000C`, with `0` meaning
/// the operation was allowed. Codes outside the family still classify
/// (to [`ErrorKind::Unknown`]); the mapping is total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DissenterStatus(pub u32);

impl DissenterStatus {
    pub const SUCCESS: DissenterStatus = DissenterStatus(0);
    pub const ERROR: DissenterStatus = DissenterStatus(0xF8DA_0001);
    pub const BUSY: DissenterStatus = DissenterStatus(0xF8DA_0002);
    pub const BAD_ARGUMENT: DissenterStatus = DissenterStatus(0xF8DA_0003);
    pub const EXCLUSIVE_ACCESS: DissenterStatus = DissenterStatus(0xF8DA_0004);
    pub const NO_RESOURCES: DissenterStatus = DissenterStatus(0xF8DA_0005);
    pub const NOT_FOUND: DissenterStatus = DissenterStatus(0xF8DA_0006);
    pub const NOT_MOUNTED: DissenterStatus = DissenterStatus(0xF8DA_0007);
    pub const NOT_PERMITTED: DissenterStatus = DissenterStatus(0xF8DA_0008);
    pub const NOT_PRIVILEGED: DissenterStatus = DissenterStatus(0xF8DA_0009);
    pub const NOT_READY: DissenterStatus = DissenterStatus(0xF8DA_000A);
    pub const NOT_WRITABLE: DissenterStatus = DissenterStatus(0xF8DA_000B);
    pub const UNSUPPORTED: DissenterStatus = DissenterStatus(0xF8DA_000C);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DissenterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010X}", self.0)
    }
}

/// Why an unmount or eject did not succeed.
///
/// Closed taxonomy: every possible status code lands on exactly one kind,
/// with [`ErrorKind::Unknown`] preserving anything outside the known
/// family. Not extensible at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// The operation was allowed and completed.
    Success,
    /// Unspecified refusal.
    GeneralError,
    /// Open files or other activity on the volume.
    Busy,
    /// The request itself was malformed.
    BadArgument,
    /// Another client holds the disk exclusively.
    ExclusiveAccess,
    NoResources,
    NotFound,
    NotMounted,
    NotPermitted,
    NotPrivileged,
    NotReady,
    NotWritable,
    Unsupported,
    /// Status code outside the known family, preserved verbatim.
    Unknown(u32),
}

impl ErrorKind {
    /// Total mapping from a raw dissenter status.
    pub fn from_status(status: DissenterStatus) -> ErrorKind {
        match status {
            DissenterStatus::SUCCESS => ErrorKind::Success,
            DissenterStatus::ERROR => ErrorKind::GeneralError,
            DissenterStatus::BUSY => ErrorKind::Busy,
            DissenterStatus::BAD_ARGUMENT => ErrorKind::BadArgument,
            DissenterStatus::EXCLUSIVE_ACCESS => ErrorKind::ExclusiveAccess,
            DissenterStatus::NO_RESOURCES => ErrorKind::NoResources,
            DissenterStatus::NOT_FOUND => ErrorKind::NotFound,
            DissenterStatus::NOT_MOUNTED => ErrorKind::NotMounted,
            DissenterStatus::NOT_PERMITTED => ErrorKind::NotPermitted,
            DissenterStatus::NOT_PRIVILEGED => ErrorKind::NotPrivileged,
            DissenterStatus::NOT_READY => ErrorKind::NotReady,
            DissenterStatus::NOT_WRITABLE => ErrorKind::NotWritable,
            DissenterStatus::UNSUPPORTED => ErrorKind::Unsupported,
            DissenterStatus(raw) => ErrorKind::Unknown(raw),
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, ErrorKind::Success)
    }

    /// True for the kinds that mean "something is still using the volume".
    /// These are the failures worth following up with a blocking-process
    /// inspection.
    pub fn is_busy(self) -> bool {
        matches!(self, ErrorKind::Busy | ErrorKind::ExclusiveAccess)
    }

    /// Stable human-readable description of the fixed kinds.
    pub fn description(self) -> &'static str {
        match self {
            ErrorKind::Success => "operation completed",
            ErrorKind::GeneralError => "the operation failed",
            ErrorKind::Busy => "the disk is busy",
            ErrorKind::BadArgument => "invalid argument",
            ErrorKind::ExclusiveAccess => "the disk is in exclusive use by another process",
            ErrorKind::NoResources => "insufficient system resources",
            ErrorKind::NotFound => "disk not found",
            ErrorKind::NotMounted => "the volume is not mounted",
            ErrorKind::NotPermitted => "operation not permitted",
            ErrorKind::NotPrivileged => "insufficient privileges",
            ErrorKind::NotReady => "the disk is not ready",
            ErrorKind::NotWritable => "the disk is not writable",
            ErrorKind::Unsupported => "operation not supported by this disk",
            ErrorKind::Unknown(_) => "unrecognized status code",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Unknown(raw) => {
                write!(f, "{} ({})", self.description(), DissenterStatus(*raw))
            }
            other => f.write_str(other.description()),
        }
    }
}

/// A refusal as delivered by the native callback: the status code plus the
/// optional string some dissenters carry. The string never changes the
/// classification; it is kept for logs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dissent {
    pub status: DissenterStatus,
    pub message: Option<String>,
}

impl Dissent {
    pub fn new(status: DissenterStatus, message: Option<String>) -> Self {
        Dissent { status, message }
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_status(self.status)
    }
}

impl fmt::Display for Dissent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.kind(), msg),
            None => write!(f, "{}", self.kind()),
        }
    }
}
