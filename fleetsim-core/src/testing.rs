//! Fixtures shared by the unit tests.

use chrono::Utc;

use crate::types::{Device, DeviceGroup, Region, RolloutId, UpdateStage, UpdateStatus};

/// An idle Laptops device in Europe.
pub fn device(id: &str, os: &str) -> Device {
    Device {
        id: id.to_string(),
        name: id.to_string(),
        region: Region::Europe,
        os_version: os.to_string(),
        device_group: DeviceGroup::Laptops,
        online: true,
        last_seen: Utc::now(),
        last_update: None,
        update_status: UpdateStatus::UpToDate,
        update_stage: UpdateStage::Idle,
        update_progress: 0.0,
        target_os_version: None,
        source_os_version: None,
        assigned_rollout: None,
    }
}

/// A device that rollout 1 has just put on an update from `from` to `to`.
pub fn updating_device(id: &str, from: &str, to: &str) -> Device {
    let mut d = device(id, from);
    d.assign_update(RolloutId(1), to);
    d
}

/// A device placed in `region` / `group`.
pub fn placed_device(id: &str, os: &str, region: Region, group: DeviceGroup) -> Device {
    let mut d = device(id, os);
    d.region = region;
    d.device_group = group;
    d
}
