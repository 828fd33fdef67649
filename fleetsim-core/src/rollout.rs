//! Rollout materialization and aggregate computation.
//!
//! Rollout counts are never edited by hand: they are always a pure function
//! of the current device registry, recomputed through [`compute_aggregates`].

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::types::{
    Device, DeviceGroup, Region, Rollout, RolloutAggregates, RolloutId, RolloutStatus,
    RolloutStrategy, UpdateStage,
};

/// Estimated duration of a rollout, used for the completion estimate.
const ESTIMATED_ROLLOUT_DAYS: i64 = 2;

/// A validated request to create a rollout.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutPlan {
    pub from_version: String,
    pub to_version: String,
    pub regions: BTreeSet<Region>,
    pub groups: BTreeSet<DeviceGroup>,
    pub exclude_risky: bool,
    pub strategy: RolloutStrategy,
}

impl RolloutPlan {
    /// Whether a device is picked up when this plan is materialized.
    pub fn selects(&self, device: &Device) -> bool {
        self.regions.contains(&device.region)
            && self.groups.contains(&device.device_group)
            && device.os_version == self.from_version
    }

    /// Number of devices the plan would pick up right now.
    pub fn matching_count(&self, devices: &[Device]) -> usize {
        devices.iter().filter(|d| self.selects(d)).count()
    }
}

/// Apply a plan to the registry.
///
/// Returns the new registry and the new rollout; the input slice is not
/// modified. An empty matching set yields a zero-device rollout.
pub fn materialize(
    plan: &RolloutPlan,
    devices: &[Device],
    id: RolloutId,
    now: DateTime<Utc>,
) -> (Vec<Device>, Rollout) {
    let total_devices = plan.matching_count(devices);

    let updated: Vec<Device> = devices
        .iter()
        .map(|device| {
            if plan.selects(device) {
                let mut device = device.clone();
                device.assign_update(id, &plan.to_version);
                device
            } else {
                device.clone()
            }
        })
        .collect();

    let rollout = Rollout {
        id,
        name: format!("{} → {}", plan.from_version, plan.to_version),
        status: RolloutStatus::Active,
        aggregates: RolloutAggregates {
            total_devices,
            ..RolloutAggregates::default()
        },
        start_time: now,
        estimated_completion: now + Duration::days(ESTIMATED_ROLLOUT_DAYS),
        target_regions: plan.regions.clone(),
        target_groups: plan.groups.clone(),
        from_version: plan.from_version.clone(),
        to_version: plan.to_version.clone(),
        exclude_risky: plan.exclude_risky,
        strategy: plan.strategy.clone(),
        last_updated: now,
        settling_since: None,
        completed_at: None,
    };

    debug!(rollout_id = %id, total_devices, "Materialized rollout");
    (updated, rollout)
}

/// Recompute a rollout's counts from the registry. Reads only.
pub fn compute_aggregates(rollout: &Rollout, devices: &[Device]) -> RolloutAggregates {
    let mut agg = RolloutAggregates::default();

    for device in devices.iter().filter(|d| rollout.targets(d)) {
        agg.total_devices += 1;
        match device.update_stage {
            UpdateStage::Completed => agg.completed_devices += 1,
            UpdateStage::Failed => agg.failed_devices += 1,
            UpdateStage::Downloading | UpdateStage::Installing => agg.in_progress_devices += 1,
            // No stage maps to "paused" yet; the count stays at zero.
            UpdateStage::Idle | UpdateStage::NotStarted => {}
        }
    }

    agg.progress = if agg.total_devices > 0 {
        agg.completed_devices as f64 / agg.total_devices as f64 * 100.0
    } else {
        0.0
    };

    agg
}

/// Refresh the cached counts of an active rollout.
///
/// Returns true when the counts changed.
pub fn refresh(rollout: &mut Rollout, devices: &[Device], now: DateTime<Utc>) -> bool {
    let aggregates = compute_aggregates(rollout, devices);
    if aggregates == rollout.aggregates {
        return false;
    }
    rollout.aggregates = aggregates;
    rollout.last_updated = now;
    true
}

/// Hand devices saved without an owning rollout to the newest rollout whose
/// targeting and version pair they match.
///
/// Returns the number of devices adopted.
pub fn adopt_unowned(rollouts: &[Rollout], devices: &mut [Device]) -> usize {
    let mut adopted = 0;
    for device in devices
        .iter_mut()
        .filter(|d| d.assigned_rollout.is_none() && d.update_stage != UpdateStage::Idle)
    {
        let owner = rollouts
            .iter()
            .filter(|r| {
                r.target_regions.contains(&device.region)
                    && r.target_groups.contains(&device.device_group)
                    && device.carries_update(&r.from_version, &r.to_version)
            })
            .map(|r| r.id)
            .max();
        if let Some(id) = owner {
            device.assigned_rollout = Some(id);
            adopted += 1;
        }
    }
    adopted
}

/// Track the settle period of a rollout at 100%.
///
/// Starts the settle clock when progress first reaches 100, resets it if
/// progress drops again, and marks the rollout completed once `delay` has
/// elapsed. Returns true only on the tick that completes the rollout.
pub fn settle(rollout: &mut Rollout, now: DateTime<Utc>, delay: Duration) -> bool {
    if !rollout.is_active() {
        return false;
    }

    if rollout.aggregates.progress < 100.0 {
        rollout.settling_since = None;
        return false;
    }

    let since = *rollout.settling_since.get_or_insert(now);
    if now - since < delay {
        return false;
    }

    rollout.status = RolloutStatus::Completed;
    rollout.aggregates.progress = 100.0;
    rollout.completed_at = Some(now);
    rollout.last_updated = now;
    true
}
