// Disk-arbitration plumbing: dissent classification, the callback/async
// bridge, and session ownership

pub mod bridge;
pub mod dissent;
pub mod session;

#[cfg(target_os = "macos")]
mod macos;


pub use bridge::{CompletionReceiver, CompletionToken};
pub use dissent::{Dissent, DissenterStatus, ErrorKind};
pub use session::{DiskSession, VolumeArbiter};
