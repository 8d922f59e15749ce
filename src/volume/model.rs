use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Whole-disk identifier backing one or more volumes, e.g. `disk4`.
///
/// Two volumes that share a `DeviceId` live on the same physical device
/// and are unmounted and ejected together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        DeviceId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable description of one mounted volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// User-visible name, normally the last component of the mount path.
    pub name: String,
    /// Absolute mount point, e.g. `/Volumes/Backup`.
    pub mount_path: PathBuf,
    /// BSD device node of the backing partition (`disk4s1`), if any.
    /// Network mounts and other node-less filesystems carry `None`.
    pub bsd_name: Option<String>,
    /// Whole-disk identifier (`disk4`), if a BSD node exists.
    pub device: Option<DeviceId>,
    pub is_ejectable: bool,
    pub is_removable: bool,
    pub is_internal: bool,
}

impl Volume {
    /// A volume we are willing to eject: anything not backed by the
    /// internal (boot) device.
    pub fn is_external(&self) -> bool {
        !self.is_internal
    }

    pub fn mount_path_display(&self) -> String {
        self.mount_path.display().to_string()
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bsd_name {
            Some(bsd) => write!(f, "{} ({})", self.name, bsd),
            None => f.write_str(&self.name),
        }
    }
}

/// Builder used by the enumerator and by tests; flags default to the
/// conservative external-drive shape (ejectable, removable, not internal).
#[derive(Debug, Clone)]
pub struct VolumeBuilder {
    volume: Volume,
}

impl VolumeBuilder {
    pub fn new(name: impl Into<String>, mount_path: impl AsRef<Path>) -> Self {
        VolumeBuilder {
            volume: Volume {
                name: name.into(),
                mount_path: mount_path.as_ref().to_path_buf(),
                bsd_name: None,
                device: None,
                is_ejectable: true,
                is_removable: true,
                is_internal: false,
            },
        }
    }

    pub fn bsd_name(mut self, bsd: impl Into<String>) -> Self {
        self.volume.bsd_name = Some(bsd.into());
        self
    }

    pub fn device(mut self, device: DeviceId) -> Self {
        self.volume.device = Some(device);
        self
    }

    pub fn ejectable(mut self, value: bool) -> Self {
        self.volume.is_ejectable = value;
        self
    }

    pub fn removable(mut self, value: bool) -> Self {
        self.volume.is_removable = value;
        self
    }

    pub fn internal(mut self, value: bool) -> Self {
        self.volume.is_internal = value;
        self
    }

    pub fn build(self) -> Volume {
        self.volume
    }
}

/// Options applied to a single unmount/eject pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EjectOptions {
    /// Force the unmount even when processes hold open files.
    pub force: bool,
    /// Eject the physical device after its volumes are unmounted.
    pub eject_physical_device: bool,
}

impl EjectOptions {
    /// Unmount, then eject the physical device. The standard behavior.
    pub fn default_eject() -> Self {
        EjectOptions {
            force: false,
            eject_physical_device: true,
        }
    }

    /// Unmount only; the device stays powered and attached.
    pub fn unmount_only() -> Self {
        EjectOptions {
            force: false,
            eject_physical_device: false,
        }
    }

    /// Force the unmount past open files, then eject.
    pub fn force_eject() -> Self {
        EjectOptions {
            force: true,
            eject_physical_device: true,
        }
    }
}

impl Default for EjectOptions {
    fn default() -> Self {
        EjectOptions::default_eject()
    }
}
