// Volume discovery and description

pub mod enumerator;
pub mod model;


pub use enumerator::{device_node_name, whole_disk_of, SystemVolumeEnumerator, VolumeEnumerator};
pub use model::{DeviceId, EjectOptions, Volume, VolumeBuilder};
