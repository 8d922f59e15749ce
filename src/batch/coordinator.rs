/// Batch ejection across device groups
///
/// Volumes are grouped by physical device so a multi-partition drive is
/// handled with one whole-device unmount and one eject instead of one
/// call per partition. Groups run concurrently; members of a group share
/// their group's outcome.
use std::collections::HashMap;
use std::time::Instant;

use futures::future::join_all;
use tracing::Instrument;
use uuid::Uuid;

use crate::arbitration::dissent::ErrorKind;
use crate::arbitration::session::DiskSession;
use crate::batch::report::{BatchResult, OperationResult, SingleEjectResult};
use crate::volume::{DeviceId, EjectOptions, Volume};

pub struct BatchEjectCoordinator<'a> {
    session: &'a DiskSession,
}

/// Volumes sharing one physical device, with their positions in the
/// caller's input so results come back in input order.
pub(crate) struct DeviceGroup<'v> {
    pub(crate) device: Option<DeviceId>,
    pub(crate) members: Vec<(usize, &'v Volume)>,
}

impl<'a> BatchEjectCoordinator<'a> {
    pub fn new(session: &'a DiskSession) -> Self {
        BatchEjectCoordinator { session }
    }

    /// Run the whole batch. Empty input short-circuits to a zero-valued
    /// result without touching the session.
    pub async fn eject_all(&self, volumes: &[Volume], options: EjectOptions) -> BatchResult {
        if volumes.is_empty() {
            tracing::debug!("batch eject requested with no volumes");
            return BatchResult::empty();
        }

        let batch_id = Uuid::new_v4();
        let span = tracing::info_span!("eject_batch", batch_id = %batch_id);
        self.run_batch(volumes, options).instrument(span).await
    }

    async fn run_batch(&self, volumes: &[Volume], options: EjectOptions) -> BatchResult {
        let started = Instant::now();
        let groups = group_by_device(volumes);
        tracing::info!(
            volumes = volumes.len(),
            groups = groups.len(),
            force = options.force,
            eject_device = options.eject_physical_device,
            "starting batch eject"
        );

        let group_results = join_all(groups.iter().map(|g| self.run_group(g, options))).await;

        let mut slots: Vec<Option<SingleEjectResult>> = vec![None; volumes.len()];
        for (group, results) in groups.iter().zip(group_results) {
            for ((input_index, _), result) in group.members.iter().zip(results) {
                slots[*input_index] = Some(result);
            }
        }
        let results: Vec<SingleEjectResult> = slots.into_iter().flatten().collect();
        debug_assert_eq!(results.len(), volumes.len());

        let batch = BatchResult::from_results(results, started.elapsed());
        tracing::info!(
            succeeded = batch.success_count,
            failed = batch.failed_count,
            seconds = batch.total_duration_seconds,
            "batch eject finished"
        );
        batch
    }

    /// One result per group member, in member order.
    async fn run_group(
        &self,
        group: &DeviceGroup<'_>,
        options: EjectOptions,
    ) -> Vec<SingleEjectResult> {
        match (&group.device, options.eject_physical_device) {
            (Some(device), true) => {
                let outcome = self.eject_whole_device(device, options.force).await;
                group
                    .members
                    .iter()
                    .map(|(_, volume)| SingleEjectResult::from_outcome(volume, &outcome))
                    .collect()
            }
            _ => {
                // No device to eject: each mount point stands alone, and
                // one refusal does not stop the others.
                let mut results = Vec::with_capacity(group.members.len());
                for (_, volume) in &group.members {
                    let outcome = self
                        .session
                        .unmount_mount_point(&volume.mount_path, options.force)
                        .await;
                    results.push(SingleEjectResult::from_outcome(volume, &outcome));
                }
                results
            }
        }
    }

    /// Whole-device unmount, then a single eject. An unmount refusal
    /// skips the eject entirely.
    async fn eject_whole_device(&self, device: &DeviceId, force: bool) -> OperationResult {
        let started = Instant::now();

        let unmounted = self.session.unmount_device(device, force).await;
        if !unmounted.success {
            let kind = unmounted.error.unwrap_or(ErrorKind::GeneralError);
            tracing::warn!(device = %device, error = %kind, "device unmount refused, skipping eject");
            return OperationResult::failed(kind, started.elapsed());
        }

        let ejected = self.session.eject_device(device).await;
        if ejected.success {
            OperationResult::ok(started.elapsed())
        } else {
            let kind = ejected.error.unwrap_or(ErrorKind::GeneralError);
            tracing::warn!(device = %device, error = %kind, "volumes unmounted but device eject refused");
            OperationResult::failed(kind, started.elapsed())
        }
    }
}

/// Group volumes by physical device, first appearance first. Volumes
/// without a device id never share a group.
pub(crate) fn group_by_device(volumes: &[Volume]) -> Vec<DeviceGroup<'_>> {
    let mut groups: Vec<DeviceGroup<'_>> = Vec::new();
    let mut index_by_device: HashMap<&DeviceId, usize> = HashMap::new();

    for (input_index, volume) in volumes.iter().enumerate() {
        match &volume.device {
            Some(device) => {
                if let Some(&slot) = index_by_device.get(device) {
                    groups[slot].members.push((input_index, volume));
                } else {
                    index_by_device.insert(device, groups.len());
                    groups.push(DeviceGroup {
                        device: Some(device.clone()),
                        members: vec![(input_index, volume)],
                    });
                }
            }
            None => groups.push(DeviceGroup {
                device: None,
                members: vec![(input_index, volume)],
            }),
        }
    }
    groups
}
