/// Disk-arbitration session ownership and the arbiter seam
///
/// `DiskSession` is the single owner of whatever native state the platform
/// needs for unmount/eject calls. The calls themselves go through the
/// `VolumeArbiter` trait so tests can substitute a scripted fake; the
/// shipping implementation is the macOS arbiter in this module's sibling.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::arbitration::dissent::ErrorKind;
use crate::batch::coordinator::BatchEjectCoordinator;
use crate::batch::report::{BatchResult, OperationResult};
use crate::volume::{DeviceId, EjectOptions, Volume};
use crate::EjectResult;

/// The three native primitives every backend must provide. Calls may be
/// issued concurrently; implementations must not require callers to hold
/// a lock across an await.
#[async_trait]
pub trait VolumeArbiter: Send + Sync {
    /// Unmount a single mount point.
    async fn unmount_volume(&self, mount_path: &Path, force: bool) -> OperationResult;

    /// Unmount every volume of a physical device in one call.
    async fn unmount_whole_device(&self, device: &DeviceId, force: bool) -> OperationResult;

    /// Eject (and power down, where applicable) a physical device.
    async fn eject_device(&self, device: &DeviceId) -> OperationResult;

    /// Release any native resources. Called at most once, after which no
    /// further primitive calls arrive.
    fn shutdown(&self) {}
}

/// Owner of the native disk-arbitration session.
///
/// Post-construction the only mutation is invalidation, tracked by an
/// atomic flag; operations after [`DiskSession::invalidate`] fail
/// deterministically instead of crashing or hanging.
pub struct DiskSession {
    arbiter: Arc<dyn VolumeArbiter>,
    invalidated: AtomicBool,
}

impl DiskSession {
    /// Session backed by the operating system's disk-arbitration
    /// subsystem. Fails up front when the native session cannot be
    /// created; that failure is fatal to the caller's whole batch and is
    /// distinct from any per-volume outcome.
    #[cfg(target_os = "macos")]
    pub fn native() -> EjectResult<Self> {
        let arbiter = super::macos::NativeArbiter::new()?;
        Ok(Self::with_arbiter(Arc::new(arbiter)))
    }

    #[cfg(not(target_os = "macos"))]
    pub fn native() -> EjectResult<Self> {
        Err(crate::EjectError::Unsupported(
            "disk arbitration requires macOS",
        ))
    }

    pub fn with_arbiter(arbiter: Arc<dyn VolumeArbiter>) -> Self {
        DiskSession {
            arbiter,
            invalidated: AtomicBool::new(false),
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    /// Release the native session. Idempotent; every later operation
    /// returns `success == false`.
    pub fn invalidate(&self) {
        if self.invalidated.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("invalidating disk session");
        self.arbiter.shutdown();
    }

    /// Unmount one volume, honoring the options: with a known physical
    /// device and `eject_physical_device` set this is a whole-device
    /// unmount followed by a device eject, otherwise a plain unmount of
    /// the mount point.
    pub async fn unmount(&self, volume: &Volume, options: EjectOptions) -> OperationResult {
        if let Some(failed) = self.refuse_if_invalidated() {
            return failed;
        }

        let started = Instant::now();
        match (&volume.device, options.eject_physical_device) {
            (Some(device), true) => {
                let unmounted = self.unmount_device(device, options.force).await;
                if !unmounted.success {
                    let kind = unmounted.error.unwrap_or(ErrorKind::GeneralError);
                    return OperationResult::failed(kind, started.elapsed());
                }
                let ejected = self.eject_device(device).await;
                if ejected.success {
                    OperationResult::ok(started.elapsed())
                } else {
                    let kind = ejected.error.unwrap_or(ErrorKind::GeneralError);
                    OperationResult::failed(kind, started.elapsed())
                }
            }
            _ => {
                self.unmount_mount_point(&volume.mount_path, options.force)
                    .await
            }
        }
    }

    /// Eject every given volume, grouped by physical device, groups in
    /// parallel. One result per input volume, in input order.
    pub async fn eject_all(&self, volumes: &[Volume], options: EjectOptions) -> BatchResult {
        BatchEjectCoordinator::new(self).eject_all(volumes, options).await
    }

    pub(crate) async fn unmount_mount_point(&self, path: &Path, force: bool) -> OperationResult {
        if let Some(failed) = self.refuse_if_invalidated() {
            return failed;
        }
        tracing::debug!(path = %path.display(), force, "unmounting volume");
        self.arbiter.unmount_volume(path, force).await
    }

    pub(crate) async fn unmount_device(&self, device: &DeviceId, force: bool) -> OperationResult {
        if let Some(failed) = self.refuse_if_invalidated() {
            return failed;
        }
        tracing::debug!(device = %device, force, "unmounting whole device");
        self.arbiter.unmount_whole_device(device, force).await
    }

    pub(crate) async fn eject_device(&self, device: &DeviceId) -> OperationResult {
        if let Some(failed) = self.refuse_if_invalidated() {
            return failed;
        }
        tracing::debug!(device = %device, "ejecting device");
        self.arbiter.eject_device(device).await
    }

    fn refuse_if_invalidated(&self) -> Option<OperationResult> {
        if self.is_invalidated() {
            tracing::warn!("refusing operation on an invalidated session");
            Some(OperationResult::failed(
                ErrorKind::GeneralError,
                Duration::ZERO,
            ))
        } else {
            None
        }
    }
}

impl Drop for DiskSession {
    fn drop(&mut self) {
        self.invalidate();
    }
}
