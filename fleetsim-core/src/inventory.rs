//! Read-only views over the device registry: search/filter and KPI totals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Device, DeviceGroup, Region, Rollout, UpdateStatus};

/// Default page size for device listings.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Device listing filters. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceQuery {
    /// Case-insensitive substring over id, name, OS version and region
    pub search: Option<String>,
    pub status: Option<UpdateStatus>,
    pub region: Option<Region>,
    pub group: Option<DeviceGroup>,
    pub online: Option<bool>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl DeviceQuery {
    pub fn matches(&self, device: &Device) -> bool {
        if let Some(status) = self.status {
            if device.update_status != status {
                return false;
            }
        }
        if self.region.map_or(false, |r| device.region != r) {
            return false;
        }
        if self.group.map_or(false, |g| device.device_group != g) {
            return false;
        }
        if self.online.map_or(false, |o| device.online != o) {
            return false;
        }

        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                [
                    device.id.as_str(),
                    device.name.as_str(),
                    device.os_version.as_str(),
                    device.region.as_str(),
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
            }
        }
    }
}

/// One page of matching devices.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePage {
    /// Number of devices matching the filters (all pages)
    pub total: usize,
    pub offset: usize,
    pub devices: Vec<Device>,
}

pub fn query_devices(devices: &[Device], query: &DeviceQuery) -> DevicePage {
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    let matching: Vec<&Device> = devices.iter().filter(|d| query.matches(d)).collect();
    let page = matching.iter().skip(offset).take(limit).map(|d| (*d).clone()).collect();

    DevicePage {
        total: matching.len(),
        offset,
        devices: page,
    }
}

/// Dashboard KPI totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSummary {
    pub total_devices: usize,
    pub online: usize,
    pub offline: usize,
    pub updating: usize,
    pub failed: usize,
    pub up_to_date: usize,
    pub by_region: BTreeMap<Region, usize>,
    pub active_rollouts: usize,
    /// Completed devices summed over every rollout
    pub completed_updates: usize,
}

pub fn fleet_summary(devices: &[Device], rollouts: &[Rollout]) -> FleetSummary {
    let mut summary = FleetSummary {
        total_devices: devices.len(),
        ..FleetSummary::default()
    };

    for device in devices {
        if device.online {
            summary.online += 1;
        } else {
            summary.offline += 1;
        }
        match device.update_status {
            UpdateStatus::Updating => summary.updating += 1,
            UpdateStatus::Failed => summary.failed += 1,
            UpdateStatus::UpToDate => summary.up_to_date += 1,
        }
        *summary.by_region.entry(device.region).or_default() += 1;
    }

    summary.active_rollouts = rollouts.iter().filter(|r| r.is_active()).count();
    summary.completed_updates = rollouts.iter().map(|r| r.aggregates.completed_devices).sum();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{device, placed_device, updating_device};

    fn fleet() -> Vec<Device> {
        let mut offline = placed_device("DEV-0003", "macOS 14 Sonoma", Region::AsiaPacific, DeviceGroup::Servers);
        offline.online = false;
        vec![
            device("DEV-0001", "Windows 10 22H2"),
            updating_device("DEV-0002", "Windows 10 22H2", "Windows 11 23H2"),
            offline,
        ]
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let devices = fleet();
        let query = DeviceQuery {
            search: Some("asia".to_string()),
            ..Default::default()
        };
        let page = query_devices(&devices, &query);
        assert_eq!(page.total, 1);
        assert_eq!(page.devices[0].id, "DEV-0003");

        let query = DeviceQuery {
            search: Some("dev-000".to_string()),
            limit: Some(2),
            offset: Some(1),
            ..Default::default()
        };
        let page = query_devices(&devices, &query);
        assert_eq!(page.total, 3);
        let ids: Vec<&str> = page.devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["DEV-0002", "DEV-0003"]);
    }

    #[test]
    fn test_filters_combine() {
        let devices = fleet();
        let query = DeviceQuery {
            status: Some(UpdateStatus::Updating),
            region: Some(Region::Europe),
            online: Some(true),
            ..Default::default()
        };
        let page = query_devices(&devices, &query);
        assert_eq!(page.total, 1);
        assert_eq!(page.devices[0].id, "DEV-0002");
    }

    #[test]
    fn test_fleet_summary_totals() {
        let summary = fleet_summary(&fleet(), &[]);
        assert_eq!(summary.total_devices, 3);
        assert_eq!(summary.online, 2);
        assert_eq!(summary.offline, 1);
        assert_eq!(summary.updating, 1);
        assert_eq!(summary.up_to_date, 2);
        assert_eq!(summary.by_region.get(&Region::Europe), Some(&2));
        assert_eq!(summary.active_rollouts, 0);
    }
}
