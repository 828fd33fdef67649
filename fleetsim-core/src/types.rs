//! Core types for devices and rollouts.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Enumerations
// =============================================================================

/// Geographic region a device is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "North America")]
    NorthAmerica,
    #[serde(rename = "Europe")]
    Europe,
    #[serde(rename = "Asia Pacific")]
    AsiaPacific,
    #[serde(rename = "Latin America")]
    LatinAmerica,
    #[serde(rename = "Middle East")]
    MiddleEast,
    #[serde(rename = "Africa")]
    Africa,
}

impl Region {
    /// Every region, in display order.
    pub const ALL: [Region; 6] = [
        Region::NorthAmerica,
        Region::Europe,
        Region::AsiaPacific,
        Region::LatinAmerica,
        Region::MiddleEast,
        Region::Africa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::NorthAmerica => "North America",
            Region::Europe => "Europe",
            Region::AsiaPacific => "Asia Pacific",
            Region::LatinAmerica => "Latin America",
            Region::MiddleEast => "Middle East",
            Region::Africa => "Africa",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown region '{}'", s))
    }
}

/// Functional group a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceGroup {
    #[serde(rename = "Workstations")]
    Workstations,
    #[serde(rename = "Laptops")]
    Laptops,
    #[serde(rename = "Servers")]
    Servers,
    #[serde(rename = "Desktops")]
    Desktops,
    #[serde(rename = "Mobile Devices")]
    MobileDevices,
    #[serde(rename = "Development Machines")]
    DevelopmentMachines,
}

impl DeviceGroup {
    /// Every device group, in display order.
    pub const ALL: [DeviceGroup; 6] = [
        DeviceGroup::Workstations,
        DeviceGroup::Laptops,
        DeviceGroup::Servers,
        DeviceGroup::Desktops,
        DeviceGroup::MobileDevices,
        DeviceGroup::DevelopmentMachines,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceGroup::Workstations => "Workstations",
            DeviceGroup::Laptops => "Laptops",
            DeviceGroup::Servers => "Servers",
            DeviceGroup::Desktops => "Desktops",
            DeviceGroup::MobileDevices => "Mobile Devices",
            DeviceGroup::DevelopmentMachines => "Development Machines",
        }
    }
}

impl fmt::Display for DeviceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceGroup::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown device group '{}'", s))
    }
}

/// Coarse update status shown in the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStatus {
    UpToDate,
    Updating,
    Failed,
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStatus::UpToDate => write!(f, "up-to-date"),
            UpdateStatus::Updating => write!(f, "updating"),
            UpdateStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for UpdateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up-to-date" | "up_to_date" | "uptodate" => Ok(UpdateStatus::UpToDate),
            "updating" => Ok(UpdateStatus::Updating),
            "failed" => Ok(UpdateStatus::Failed),
            other => Err(format!("unknown update status '{}'", other)),
        }
    }
}

/// Fine-grained update stage of a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStage {
    /// Not under update
    Idle,
    /// Update assigned, no progress yet
    NotStarted,
    /// Downloading the update payload
    Downloading,
    /// Installing the downloaded payload
    Installing,
    /// Update finished
    Completed,
    /// Update failed
    Failed,
}

impl UpdateStage {
    /// Check if this stage represents a final state
    pub fn is_final(&self) -> bool {
        matches!(self, UpdateStage::Completed | UpdateStage::Failed)
    }

    /// Stages that the ticker advances
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            UpdateStage::NotStarted | UpdateStage::Downloading | UpdateStage::Installing
        )
    }

    /// Stages counted as "in progress" by rollout aggregates
    pub fn is_in_flight(&self) -> bool {
        matches!(self, UpdateStage::Downloading | UpdateStage::Installing)
    }
}

impl fmt::Display for UpdateStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateStage::Idle => "idle",
            UpdateStage::NotStarted => "not_started",
            UpdateStage::Downloading => "downloading",
            UpdateStage::Installing => "installing",
            UpdateStage::Completed => "completed",
            UpdateStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Device
// =============================================================================

/// A simulated managed device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Stable identifier (`DEV-0001`)
    pub id: String,
    /// Display name
    pub name: String,
    pub region: Region,
    /// Installed OS, "family + release" (e.g. "Windows 11 23H2")
    pub os_version: String,
    pub device_group: DeviceGroup,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
    /// When the last update completed
    #[serde(default)]
    pub last_update: Option<DateTime<Utc>>,
    pub update_status: UpdateStatus,
    pub update_stage: UpdateStage,
    /// Progress of the current update (0-100)
    pub update_progress: f64,
    /// Version the current (or last) assigned update moves to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_os_version: Option<String>,
    /// Version the device ran when the current (or last) update was assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_os_version: Option<String>,
    /// Rollout that assigned the current (or last) update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_rollout: Option<RolloutId>,
}

impl Device {
    /// Whether the ticker still advances this device.
    pub fn is_updating(&self) -> bool {
        self.update_status == UpdateStatus::Updating && self.update_stage.is_active()
    }

    /// Whether the update this device carries was assigned by `rollout`.
    ///
    /// Ownership survives completion, so a finished device keeps counting
    /// towards the rollout that updated it and never towards a later one.
    pub fn belongs_to(&self, rollout: RolloutId) -> bool {
        self.update_stage != UpdateStage::Idle && self.assigned_rollout == Some(rollout)
    }

    /// Whether the device was assigned an update from `from` to `to`.
    pub fn carries_update(&self, from: &str, to: &str) -> bool {
        self.update_stage != UpdateStage::Idle
            && self.source_os_version.as_deref() == Some(from)
            && self.target_os_version.as_deref() == Some(to)
    }

    /// Put the device on `rollout`'s update path towards `target`.
    pub fn assign_update(&mut self, rollout: RolloutId, target: &str) {
        self.assigned_rollout = Some(rollout);
        self.source_os_version = Some(self.os_version.clone());
        self.target_os_version = Some(target.to_string());
        self.update_status = UpdateStatus::Updating;
        self.update_stage = UpdateStage::NotStarted;
        self.update_progress = 0.0;
    }

    /// Bring the record back to one consistent shape.
    ///
    /// Returns true when anything had to change.
    pub fn normalize(&mut self) -> bool {
        let before = self.clone();

        if !self.update_progress.is_finite() {
            self.update_progress = 0.0;
        }
        self.update_progress = self.update_progress.clamp(0.0, 100.0);

        match self.update_stage {
            UpdateStage::Idle => {
                self.update_status = UpdateStatus::UpToDate;
                self.update_progress = 0.0;
            }
            UpdateStage::NotStarted | UpdateStage::Downloading | UpdateStage::Installing => {
                if self.target_os_version.is_none() {
                    self.update_stage = UpdateStage::Idle;
                    self.update_status = UpdateStatus::UpToDate;
                    self.update_progress = 0.0;
                } else {
                    self.update_status = UpdateStatus::Updating;
                    if self.source_os_version.is_none() {
                        self.source_os_version = Some(self.os_version.clone());
                    }
                }
            }
            UpdateStage::Completed => {
                self.update_status = UpdateStatus::UpToDate;
                self.update_progress = 100.0;
                if let Some(target) = &self.target_os_version {
                    self.os_version = target.clone();
                }
            }
            UpdateStage::Failed => {
                self.update_status = UpdateStatus::Failed;
            }
        }

        *self != before
    }
}

// =============================================================================
// Rollout
// =============================================================================

/// Rollout identifier, derived from the creation time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RolloutId(pub i64);

impl fmt::Display for RolloutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RolloutId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(RolloutId)
    }
}

/// Lifecycle status of a rollout campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Active,
    Completed,
    Scheduled,
}

impl fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloutStatus::Active => write!(f, "active"),
            RolloutStatus::Completed => write!(f, "completed"),
            RolloutStatus::Scheduled => write!(f, "scheduled"),
        }
    }
}

/// How a rollout is released to its devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rolloutType", rename_all = "snake_case")]
pub enum RolloutStrategy {
    /// Start on confirmation
    Immediate,
    /// Start at a fixed date and time
    Scheduled {
        #[serde(rename = "scheduledDate")]
        date: NaiveDate,
        #[serde(rename = "scheduledTime")]
        time: NaiveTime,
    },
    /// Release in waves of `phase_percentage` of the fleet
    Phased {
        #[serde(rename = "phasePercentage")]
        phase_percentage: u8,
    },
}

impl RolloutStrategy {
    /// One-line description shown on the review screen.
    pub fn describe(&self) -> String {
        match self {
            RolloutStrategy::Immediate => "Execution on confirmation".to_string(),
            RolloutStrategy::Scheduled { date, time } => {
                format!("Queued for {} at {}", date.format("%Y-%m-%d"), time.format("%H:%M"))
            }
            RolloutStrategy::Phased { phase_percentage } => {
                format!("Phased pulses at {}% intensity", phase_percentage)
            }
        }
    }
}

/// Per-stage device counts of a rollout, always derived from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutAggregates {
    pub total_devices: usize,
    pub completed_devices: usize,
    pub failed_devices: usize,
    pub in_progress_devices: usize,
    pub paused_devices: usize,
    /// completed / total * 100, 0 for an empty rollout
    pub progress: f64,
}

/// An update campaign targeting a filtered subset of the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollout {
    pub id: RolloutId,
    pub name: String,
    pub status: RolloutStatus,
    #[serde(flatten)]
    pub aggregates: RolloutAggregates,
    pub start_time: DateTime<Utc>,
    pub estimated_completion: DateTime<Utc>,
    pub target_regions: BTreeSet<Region>,
    pub target_groups: BTreeSet<DeviceGroup>,
    pub from_version: String,
    pub to_version: String,
    pub exclude_risky: bool,
    pub strategy: RolloutStrategy,
    pub last_updated: DateTime<Utc>,
    /// When progress first reached 100 (completion pending)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settling_since: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Rollout {
    /// Whether `device` falls under this rollout's targeting predicate.
    pub fn targets(&self, device: &Device) -> bool {
        self.target_regions.contains(&device.region)
            && self.target_groups.contains(&device.device_group)
            && device.belongs_to(self.id)
    }

    pub fn is_active(&self) -> bool {
        self.status == RolloutStatus::Active
    }

    pub fn progress(&self) -> f64 {
        self.aggregates.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::device;

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(serde_json::to_string(&Region::AsiaPacific).unwrap(), "\"Asia Pacific\"");
        assert_eq!(serde_json::to_string(&DeviceGroup::MobileDevices).unwrap(), "\"Mobile Devices\"");
        assert_eq!(serde_json::to_string(&UpdateStatus::UpToDate).unwrap(), "\"up-to-date\"");
        assert_eq!(serde_json::to_string(&UpdateStage::NotStarted).unwrap(), "\"not_started\"");
        assert_eq!("europe".parse::<Region>().unwrap(), Region::Europe);
        assert!("Atlantis".parse::<Region>().is_err());
    }

    #[test]
    fn test_ownership_follows_assignment() {
        let mut d = device("DEV-0001", "Windows 10 22H2");
        assert!(!d.belongs_to(RolloutId(1)));

        d.assign_update(RolloutId(1), "Windows 11 23H2");
        d.update_stage = UpdateStage::Completed;
        d.os_version = "Windows 11 23H2".to_string();

        // Still owned by its rollout after the version flip
        assert!(d.belongs_to(RolloutId(1)));
        assert!(d.carries_update("Windows 10 22H2", "Windows 11 23H2"));
        // but never by a later campaign on the same version pair
        assert!(!d.belongs_to(RolloutId(2)));
        assert!(!d.carries_update("Windows 10 22H2", "Windows 11 22H2"));

        d.assign_update(RolloutId(2), "Windows 11 24H2");
        assert!(!d.belongs_to(RolloutId(1)));
        assert!(d.belongs_to(RolloutId(2)));
    }

    #[test]
    fn test_normalize_repairs_inconsistent_records() {
        let mut d = device("DEV-0002", "Ubuntu 20.04 LTS");
        d.update_stage = UpdateStage::Completed;
        d.update_progress = 42.0;
        d.target_os_version = Some("Ubuntu 22.04 LTS".to_string());
        assert!(d.normalize());
        assert_eq!(d.update_progress, 100.0);
        assert_eq!(d.os_version, "Ubuntu 22.04 LTS");
        assert_eq!(d.update_status, UpdateStatus::UpToDate);

        let mut orphan = device("DEV-0003", "Ubuntu 20.04 LTS");
        orphan.update_stage = UpdateStage::Downloading;
        orphan.update_progress = f64::NAN;
        assert!(orphan.normalize());
        assert_eq!(orphan.update_stage, UpdateStage::Idle);
        assert_eq!(orphan.update_progress, 0.0);

        let mut clean = device("DEV-0004", "Ubuntu 20.04 LTS");
        assert!(!clean.normalize());
    }

    #[test]
    fn test_strategy_wire_format() {
        let phased = RolloutStrategy::Phased { phase_percentage: 25 };
        let json = serde_json::to_value(&phased).unwrap();
        assert_eq!(json["rolloutType"], "phased");
        assert_eq!(json["phasePercentage"], 25);
        assert_eq!(phased.describe(), "Phased pulses at 25% intensity");
    }
}
