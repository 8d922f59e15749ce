/// Scripted stand-in for the native disk-arbitration backend
///
/// Records every primitive call, optionally sleeps to simulate a slow
/// device, and returns whatever outcome the test scripted for the target.
/// Unscripted targets succeed.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ejecta::{DeviceId, ErrorKind, OperationResult, VolumeArbiter};

/// One recorded primitive call, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbiterCall {
    UnmountVolume { path: PathBuf, force: bool },
    UnmountDevice { device: String, force: bool },
    EjectDevice { device: String },
}

#[derive(Default)]
pub struct FakeArbiter {
    unmount_volume_failures: Mutex<HashMap<PathBuf, ErrorKind>>,
    unmount_device_failures: Mutex<HashMap<String, ErrorKind>>,
    eject_failures: Mutex<HashMap<String, ErrorKind>>,
    device_delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<ArbiterCall>>,
    shutdowns: AtomicUsize,
}

impl FakeArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a failure for the plain unmount of one mount point.
    #[allow(dead_code)]
    pub fn fail_unmount(&self, path: &str, kind: ErrorKind) {
        self.unmount_volume_failures
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), kind);
    }

    /// Script a failure for the whole-device unmount of `device`.
    #[allow(dead_code)]
    pub fn fail_device_unmount(&self, device: &str, kind: ErrorKind) {
        self.unmount_device_failures
            .lock()
            .unwrap()
            .insert(device.to_string(), kind);
    }

    /// Script a failure for the eject of `device`.
    #[allow(dead_code)]
    pub fn fail_eject(&self, device: &str, kind: ErrorKind) {
        self.eject_failures
            .lock()
            .unwrap()
            .insert(device.to_string(), kind);
    }

    /// Make the whole-device unmount of `device` take `delay`.
    #[allow(dead_code)]
    pub fn delay_device(&self, device: &str, delay: Duration) {
        self.device_delays
            .lock()
            .unwrap()
            .insert(device.to_string(), delay);
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> Vec<ArbiterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    #[allow(dead_code)]
    pub fn unmount_volume_calls(&self) -> usize {
        self.count(|c| matches!(c, ArbiterCall::UnmountVolume { .. }))
    }

    #[allow(dead_code)]
    pub fn unmount_device_calls(&self) -> usize {
        self.count(|c| matches!(c, ArbiterCall::UnmountDevice { .. }))
    }

    #[allow(dead_code)]
    pub fn eject_calls(&self) -> usize {
        self.count(|c| matches!(c, ArbiterCall::EjectDevice { .. }))
    }

    /// Devices that received an eject call, in arrival order.
    #[allow(dead_code)]
    pub fn ejected_devices(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|call| match call {
                ArbiterCall::EjectDevice { device } => Some(device.clone()),
                _ => None,
            })
            .collect()
    }

    #[allow(dead_code)]
    pub fn shutdown_calls(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    fn count(&self, pred: impl Fn(&ArbiterCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: ArbiterCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VolumeArbiter for FakeArbiter {
    async fn unmount_volume(&self, mount_path: &Path, force: bool) -> OperationResult {
        let started = Instant::now();
        self.record(ArbiterCall::UnmountVolume {
            path: mount_path.to_path_buf(),
            force,
        });
        let scripted = self
            .unmount_volume_failures
            .lock()
            .unwrap()
            .get(mount_path)
            .copied();
        match scripted {
            Some(kind) => OperationResult::failed(kind, started.elapsed()),
            None => OperationResult::ok(started.elapsed()),
        }
    }

    async fn unmount_whole_device(&self, device: &DeviceId, force: bool) -> OperationResult {
        let started = Instant::now();
        self.record(ArbiterCall::UnmountDevice {
            device: device.as_str().to_string(),
            force,
        });
        // Copy the delay out first; the lock must not be held across the
        // sleep.
        let delay = self
            .device_delays
            .lock()
            .unwrap()
            .get(device.as_str())
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .unmount_device_failures
            .lock()
            .unwrap()
            .get(device.as_str())
            .copied();
        match scripted {
            Some(kind) => OperationResult::failed(kind, started.elapsed()),
            None => OperationResult::ok(started.elapsed()),
        }
    }

    async fn eject_device(&self, device: &DeviceId) -> OperationResult {
        let started = Instant::now();
        self.record(ArbiterCall::EjectDevice {
            device: device.as_str().to_string(),
        });
        let scripted = self
            .eject_failures
            .lock()
            .unwrap()
            .get(device.as_str())
            .copied();
        match scripted {
            Some(kind) => OperationResult::failed(kind, started.elapsed()),
            None => OperationResult::ok(started.elapsed()),
        }
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
