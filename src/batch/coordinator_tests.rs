/// Tests for device grouping. Execution scenarios (concurrency, fan-out,
/// call counts) run against the fake arbiter in the integration suite.

#[cfg(test)]
mod device_grouping_tests {
    use super::super::coordinator::group_by_device;
    use crate::volume::{DeviceId, Volume, VolumeBuilder};

    fn on_device(name: &str, device: &str) -> Volume {
        VolumeBuilder::new(name, format!("/Volumes/{name}"))
            .bsd_name(format!("{device}s1"))
            .device(DeviceId::new(device))
            .build()
    }

    fn deviceless(name: &str) -> Volume {
        VolumeBuilder::new(name, format!("/Volumes/{name}")).build()
    }

    #[test]
    fn test_volumes_sharing_a_device_share_a_group() {
        let volumes = vec![
            on_device("Data", "disk4"),
            on_device("Media", "disk4"),
            on_device("Backup", "disk5"),
        ];

        let groups = group_by_device(&volumes);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].device, Some(DeviceId::new("disk4")));
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[1].device, Some(DeviceId::new("disk5")));
        assert_eq!(groups[1].members.len(), 1);
    }

    #[test]
    fn test_deviceless_volumes_never_share_a_group() {
        let volumes = vec![deviceless("smb-a"), deviceless("smb-b")];

        let groups = group_by_device(&volumes);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.device.is_none()));
        assert!(groups.iter().all(|g| g.members.len() == 1));
    }

    #[test]
    fn test_grouping_preserves_input_positions() {
        let volumes = vec![
            on_device("A", "disk4"),
            deviceless("share"),
            on_device("B", "disk4"),
        ];

        let groups = group_by_device(&volumes);
        assert_eq!(groups.len(), 2);

        let disk4 = &groups[0];
        let positions: Vec<usize> = disk4.members.iter().map(|(idx, _)| *idx).collect();
        assert_eq!(positions, vec![0, 2]);

        let solo = &groups[1];
        assert_eq!(solo.members[0].0, 1);
        assert_eq!(solo.members[0].1.name, "share");
    }

    #[test]
    fn test_empty_input_yields_no_groups() {
        assert!(group_by_device(&[]).is_empty());
    }
}
