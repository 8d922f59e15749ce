use crate::EjectResult;

use super::model::Volume;

/// Source of the currently mounted volumes.
///
/// The CLI talks to this trait so the scan can be replaced in tests; the
/// shipping implementation is [`SystemVolumeEnumerator`].
pub trait VolumeEnumerator: Send + Sync {
    fn enumerate(&self) -> EjectResult<Vec<Volume>>;
}

/// Derive the whole-disk identifier from a partition node name.
///
/// `disk4s2` collapses to `disk4`, and APFS snapshot slices such as
/// `disk3s1s1` collapse to `disk3`. Names that do not follow the
/// `disk<N>` scheme yield `None` so they never share a device group.
pub fn whole_disk_of(bsd_name: &str) -> Option<String> {
    let digits = bsd_name.strip_prefix("disk")?;
    let len = digits.chars().take_while(|c| c.is_ascii_digit()).count();
    if len == 0 {
        return None;
    }
    Some(format!("disk{}", &digits[..len]))
}

/// Strip the `/dev/` prefix from a mount-from node, e.g.
/// `/dev/disk4s1` -> `disk4s1`. Network sources (`//host/share`) and
/// pseudo-filesystems yield `None`.
pub fn device_node_name(mount_from: &str) -> Option<&str> {
    mount_from.strip_prefix("/dev/").filter(|rest| !rest.is_empty())
}

#[cfg(target_os = "macos")]
pub use self::macos::SystemVolumeEnumerator;
#[cfg(not(target_os = "macos"))]
pub use self::unsupported::SystemVolumeEnumerator;

#[cfg(target_os = "macos")]
mod macos {
    use std::ffi::{CStr, CString};
    use std::io;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;
    use std::path::{Path, PathBuf};

    use crate::volume::model::{DeviceId, Volume};
    use crate::{EjectError, EjectResult};

    use super::{device_node_name, whole_disk_of, VolumeEnumerator};

    // Mount flags from <sys/mount.h>; libc does not export all of them.
    const MNT_LOCAL: u32 = 0x0000_1000;
    const MNT_ROOTFS: u32 = 0x0000_4000;
    const MNT_DONTBROWSE: u32 = 0x0010_0000;
    const MNT_REMOVABLE: u32 = 0x0000_0200;

    const VOLUMES_ROOT: &str = "/Volumes";

    /// Scans `/Volumes` and describes every real mount point found there.
    pub struct SystemVolumeEnumerator {
        root: PathBuf,
    }

    impl SystemVolumeEnumerator {
        pub fn new() -> Self {
            SystemVolumeEnumerator {
                root: PathBuf::from(VOLUMES_ROOT),
            }
        }
    }

    impl Default for SystemVolumeEnumerator {
        fn default() -> Self {
            Self::new()
        }
    }

    impl VolumeEnumerator for SystemVolumeEnumerator {
        fn enumerate(&self) -> EjectResult<Vec<Volume>> {
            let boot_device = boot_whole_disk();
            let entries = std::fs::read_dir(&self.root).map_err(|source| {
                EjectError::Enumeration {
                    path: self.root.clone(),
                    source,
                }
            })?;

            let mut volumes = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|source| EjectError::Enumeration {
                    path: self.root.clone(),
                    source,
                })?;
                let path = entry.path();
                match describe_mount(&path, boot_device.as_deref()) {
                    Ok(Some(volume)) => volumes.push(volume),
                    Ok(None) => {}
                    Err(err) => {
                        tracing::debug!(path = %path.display(), error = %err, "skipping unreadable entry");
                    }
                }
            }
            volumes.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(volumes)
        }
    }

    /// Whole-disk id of the boot volume; volumes on the same device are
    /// internal.
    fn boot_whole_disk() -> Option<String> {
        let fs = statfs_path(Path::new("/")).ok()?;
        let node = device_node_name(&cstr_field(&fs.f_mntfromname))?.to_string();
        whole_disk_of(&node)
    }

    /// Builds a [`Volume`] for `path`, or `None` when the entry is not a
    /// mount point of its own (stale directories, firmlink aliases of the
    /// boot volume) or belongs to the boot device.
    fn describe_mount(path: &Path, boot_device: Option<&str>) -> io::Result<Option<Volume>> {
        let fs = statfs_path(path)?;
        let mounted_on = cstr_field(&fs.f_mntonname);
        if Path::new(&mounted_on) != path {
            return Ok(None);
        }

        let flags = fs.f_flags;
        if flags & MNT_ROOTFS != 0 || flags & MNT_DONTBROWSE != 0 {
            return Ok(None);
        }

        let mount_from = cstr_field(&fs.f_mntfromname);
        let bsd_name = device_node_name(&mount_from).map(str::to_string);
        let device = bsd_name.as_deref().and_then(whole_disk_of);

        let is_internal = match (&device, boot_device) {
            (Some(dev), Some(boot)) => dev == boot,
            _ => false,
        };
        let is_local = flags & MNT_LOCAL != 0;
        let is_removable = flags & MNT_REMOVABLE != 0;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| mounted_on.clone());

        Ok(Some(Volume {
            name,
            mount_path: path.to_path_buf(),
            bsd_name,
            device: device.map(DeviceId::new),
            is_ejectable: is_local && !is_internal,
            is_removable,
            is_internal,
        }))
    }

    fn statfs_path(path: &Path) -> io::Result<libc::statfs> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let mut out = MaybeUninit::<libc::statfs>::zeroed();
        // SAFETY: c_path is a valid NUL-terminated string and out is a
        // properly sized buffer for one statfs record.
        let rc = unsafe { libc::statfs(c_path.as_ptr(), out.as_mut_ptr()) };
        if rc == 0 {
            // SAFETY: statfs returned 0, so the buffer is initialized.
            Ok(unsafe { out.assume_init() })
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn cstr_field(field: &[libc::c_char]) -> String {
        // SAFETY: statfs name fields are NUL-terminated within their
        // fixed-size buffers.
        unsafe { CStr::from_ptr(field.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

#[cfg(not(target_os = "macos"))]
mod unsupported {
    use crate::volume::model::Volume;
    use crate::{EjectError, EjectResult};

    use super::VolumeEnumerator;

    /// Placeholder on platforms without a disk-arbitration subsystem.
    pub struct SystemVolumeEnumerator;

    impl SystemVolumeEnumerator {
        pub fn new() -> Self {
            SystemVolumeEnumerator
        }
    }

    impl Default for SystemVolumeEnumerator {
        fn default() -> Self {
            Self::new()
        }
    }

    impl VolumeEnumerator for SystemVolumeEnumerator {
        fn enumerate(&self) -> EjectResult<Vec<Volume>> {
            Err(EjectError::Unsupported("volume enumeration requires macOS"))
        }
    }
}
