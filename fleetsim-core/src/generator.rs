//! Initial device population.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::random::RandomSource;
use crate::types::{Device, DeviceGroup, Region, UpdateStage, UpdateStatus};
use crate::version::FLEET_OS_VERSIONS;

/// Number of devices in a freshly generated fleet.
pub const DEFAULT_FLEET_SIZE: usize = 1250;

/// Share of devices generated offline.
const OFFLINE_RATIO: f64 = 0.15;

/// Devices were last seen up to this many whole days ago.
const LAST_SEEN_WINDOW_DAYS: usize = 7;

/// Stable identifier for the `n`-th device (1-based).
pub fn device_id(n: usize) -> String {
    format!("DEV-{:04}", n)
}

/// Generate `count` devices with sequential ids and random attributes.
pub fn generate_devices(count: usize, rng: &mut dyn RandomSource, now: DateTime<Utc>) -> Vec<Device> {
    let devices: Vec<Device> = (1..=count)
        .map(|n| {
            let region = Region::ALL[rng.index(Region::ALL.len())];
            let os_version = FLEET_OS_VERSIONS[rng.index(FLEET_OS_VERSIONS.len())];
            let device_group = DeviceGroup::ALL[rng.index(DeviceGroup::ALL.len())];
            let online = !rng.chance(OFFLINE_RATIO);
            let days_ago = rng.index(LAST_SEEN_WINDOW_DAYS) as i64;

            Device {
                id: device_id(n),
                name: format!("Device-{}", n),
                region,
                os_version: os_version.to_string(),
                device_group,
                online,
                last_seen: now - Duration::days(days_ago),
                last_update: None,
                update_status: UpdateStatus::UpToDate,
                update_stage: UpdateStage::Idle,
                update_progress: 0.0,
                target_os_version: None,
                source_os_version: None,
                assigned_rollout: None,
            }
        })
        .collect();

    debug!(count = devices.len(), "Generated device population");
    devices
}
