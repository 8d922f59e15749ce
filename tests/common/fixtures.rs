/// Volume fixtures in the shapes the batch code distinguishes.
use ejecta::{DeviceId, Volume, VolumeBuilder};

/// External volume backed by a partition of `device`, mounted under
/// `/Volumes/<name>`.
pub fn volume_on(name: &str, bsd_name: &str, device: &str) -> Volume {
    VolumeBuilder::new(name, format!("/Volumes/{name}"))
        .bsd_name(bsd_name)
        .device(DeviceId::new(device))
        .build()
}

/// Node-less volume, the network-share shape: no backing device, so the
/// batch puts it in a singleton group and never ejects anything for it.
#[allow(dead_code)]
pub fn deviceless_volume(name: &str) -> Volume {
    VolumeBuilder::new(name, format!("/Volumes/{name}")).build()
}
