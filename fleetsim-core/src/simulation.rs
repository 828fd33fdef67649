//! Device update stage machine and its tuning parameters.
//!
//! ```text
//!   idle (untouched)
//!
//!   not_started ──► downloading ──(progress >= threshold)──► installing ──(100)──► completed
//!        │               │
//!        └───────────────┴──(failure roll)──► failed
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::generator::DEFAULT_FLEET_SIZE;
use crate::random::RandomSource;
use crate::types::{Device, UpdateStage, UpdateStatus};

/// Simulation tuning, typically loaded from the `simulation` section of the
/// daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// How often the ticker runs (e.g., "4s", "500ms")
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,

    /// How long a rollout stays at 100% before it is marked completed
    #[serde(default = "default_settle_delay")]
    pub settle_delay: String,

    /// Simulated latency of the wizard compatibility check
    #[serde(default = "default_compatibility_check_delay")]
    pub compatibility_check_delay: String,

    /// Upper bound of the per-tick progress increment while downloading
    #[serde(default = "default_download_step_max")]
    pub download_step_max: f64,

    /// Upper bound of the per-tick progress increment while installing
    #[serde(default = "default_install_step_max")]
    pub install_step_max: f64,

    /// Per-tick chance that a downloading device fails
    #[serde(default = "default_failure_probability")]
    pub failure_probability: f64,

    /// Progress at which a downloading device starts installing
    #[serde(default = "default_install_threshold")]
    pub install_threshold: f64,

    /// Minimum time between writes of the device registry during ticks
    #[serde(default = "default_persist_interval")]
    pub persist_interval: String,

    /// Number of devices generated when no snapshot exists
    #[serde(default = "default_fleet_size")]
    pub fleet_size: usize,

    /// Seed for reproducible runs (entropy when unset)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_tick_interval() -> String {
    "4s".to_string()
}

fn default_settle_delay() -> String {
    "5s".to_string()
}

fn default_compatibility_check_delay() -> String {
    "1200ms".to_string()
}

fn default_persist_interval() -> String {
    "30s".to_string()
}

fn default_download_step_max() -> f64 {
    5.0
}

fn default_install_step_max() -> f64 {
    3.0
}

fn default_failure_probability() -> f64 {
    0.02
}

fn default_install_threshold() -> f64 {
    70.0
}

fn default_fleet_size() -> usize {
    DEFAULT_FLEET_SIZE
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            settle_delay: default_settle_delay(),
            compatibility_check_delay: default_compatibility_check_delay(),
            persist_interval: default_persist_interval(),
            download_step_max: default_download_step_max(),
            install_step_max: default_install_step_max(),
            failure_probability: default_failure_probability(),
            install_threshold: default_install_threshold(),
            fleet_size: default_fleet_size(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Parse tick interval string to duration
    pub fn tick_interval_duration(&self) -> Duration {
        parse_duration(&self.tick_interval).unwrap_or(Duration::from_secs(4))
    }

    /// Parse settle delay string to duration
    pub fn settle_delay_duration(&self) -> Duration {
        parse_duration(&self.settle_delay).unwrap_or(Duration::from_secs(5))
    }

    /// Parse compatibility check delay string to duration
    pub fn compatibility_check_delay_duration(&self) -> Duration {
        parse_duration(&self.compatibility_check_delay).unwrap_or(Duration::from_millis(1200))
    }

    /// Parse persist interval string to duration
    pub fn persist_interval_duration(&self) -> Duration {
        parse_duration(&self.persist_interval).unwrap_or(Duration::from_secs(30))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        match parse_duration(&self.tick_interval) {
            None => {
                return Err(format!(
                    "Invalid tick interval '{}'. Use format like '4s', '500ms'",
                    self.tick_interval
                ))
            }
            Some(d) if d.is_zero() => return Err("Tick interval must be greater than zero".to_string()),
            Some(_) => {}
        }

        if parse_duration(&self.settle_delay).is_none() {
            return Err(format!("Invalid settle delay '{}'", self.settle_delay));
        }

        if parse_duration(&self.compatibility_check_delay).is_none() {
            return Err(format!(
                "Invalid compatibility check delay '{}'",
                self.compatibility_check_delay
            ));
        }

        if parse_duration(&self.persist_interval).is_none() {
            return Err(format!("Invalid persist interval '{}'", self.persist_interval));
        }

        if !(0.0..=1.0).contains(&self.failure_probability) {
            return Err(format!(
                "Failure probability {} must be between 0 and 1",
                self.failure_probability
            ));
        }

        if !(self.download_step_max >= 0.0 && self.install_step_max >= 0.0) {
            return Err("Progress step bounds cannot be negative".to_string());
        }

        if !(self.install_threshold > 0.0 && self.install_threshold <= 100.0) {
            return Err(format!(
                "Install threshold {} must be in (0, 100]",
                self.install_threshold
            ));
        }

        if self.fleet_size == 0 || self.fleet_size > 9999 {
            return Err(format!("Fleet size {} must be between 1 and 9999", self.fleet_size));
        }

        Ok(())
    }
}

/// Parse a duration string like "500ms", "4s", "5m", "1h"
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }

    let (split, unit) = s.char_indices().last()?;
    let num: u64 = s[..split].trim().parse().ok()?;

    let seconds = match unit {
        's' => Some(num),
        'm' => num.checked_mul(60),
        'h' => num.checked_mul(3600),
        _ => None,
    }?;

    Some(Duration::from_secs(seconds))
}

/// What a single tick did to one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Nothing changed
    Unchanged,
    /// Progress moved within the same stage
    Progressed,
    /// The device entered a new stage
    Entered(UpdateStage),
}

impl Advance {
    pub fn changed(&self) -> bool {
        !matches!(self, Advance::Unchanged)
    }
}

/// Advance one device by one tick.
///
/// Devices outside an update, and devices in a terminal stage, are left
/// untouched.
pub fn advance_device(
    device: &mut Device,
    config: &SimulationConfig,
    rng: &mut dyn RandomSource,
    now: DateTime<Utc>,
) -> Advance {
    if !device.is_updating() {
        return Advance::Unchanged;
    }

    let stage = device.update_stage;
    let before = device.update_progress;

    match stage {
        UpdateStage::NotStarted | UpdateStage::Downloading => {
            if rng.chance(config.failure_probability) {
                device.update_stage = UpdateStage::Failed;
                device.update_status = UpdateStatus::Failed;
                return Advance::Entered(UpdateStage::Failed);
            }

            device.update_progress = (before + rng.uniform(config.download_step_max)).min(100.0);

            let next = match stage {
                UpdateStage::NotStarted => UpdateStage::Downloading,
                UpdateStage::Downloading if device.update_progress >= config.install_threshold => {
                    UpdateStage::Installing
                }
                other => other,
            };

            if next != stage {
                device.update_stage = next;
                Advance::Entered(next)
            } else if device.update_progress != before {
                Advance::Progressed
            } else {
                Advance::Unchanged
            }
        }
        UpdateStage::Installing => {
            device.update_progress = (before + rng.uniform(config.install_step_max)).min(100.0);

            if device.update_progress >= 100.0 {
                complete_update(device, now);
                Advance::Entered(UpdateStage::Completed)
            } else if device.update_progress != before {
                Advance::Progressed
            } else {
                Advance::Unchanged
            }
        }
        UpdateStage::Idle | UpdateStage::Completed | UpdateStage::Failed => Advance::Unchanged,
    }
}

/// Finish an update: the device now runs its target version.
fn complete_update(device: &mut Device, now: DateTime<Utc>) {
    if let Some(target) = &device.target_os_version {
        device.os_version = target.clone();
    }
    device.update_progress = 100.0;
    device.update_stage = UpdateStage::Completed;
    device.update_status = UpdateStatus::UpToDate;
    device.last_update = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::{ScriptedRandom, SeededRandom};
    use crate::testing::{device, updating_device};

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("4s"), Some(Duration::from_secs(4)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("invalid"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("s"), None);
    }

    #[test]
    fn test_parse_duration_rejects_odd_units_and_overflow() {
        assert_eq!(parse_duration("4µ"), None);
        assert_eq!(parse_duration("µ"), None);
        assert_eq!(parse_duration("18446744073709551615h"), None);
        assert_eq!(parse_duration("18446744073709551615m"), None);

        let config = SimulationConfig {
            tick_interval: "4µ".to_string(),
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.tick_interval_duration(), Duration::from_secs(4));
    }

    #[test]
    fn test_config_validation() {
        let mut config = SimulationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval_duration(), Duration::from_secs(4));

        config.failure_probability = 1.5;
        assert!(config.validate().is_err());

        config.failure_probability = 0.02;
        config.tick_interval = "0s".to_string();
        assert!(config.validate().is_err());

        config.tick_interval = "4s".to_string();
        config.install_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_yaml_defaults() {
        let config: SimulationConfig = serde_yaml::from_str("failure_probability: 0.0\nseed: 9").unwrap();
        assert_eq!(config.failure_probability, 0.0);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.install_threshold, 70.0);
        assert_eq!(config.fleet_size, 1250);
    }

    #[test]
    fn test_exact_trajectory() {
        let config = SimulationConfig::default();
        let now = Utc::now();
        let mut d = updating_device("DEV-0001", "Windows 10 22H2", "Windows 11 23H2");

        // Each download tick draws (failure roll, increment); 0.5 never fails at 2%
        // and adds 0.5 * 5 = 2.5.
        let mut rng = ScriptedRandom::constant(0.5);

        assert_eq!(advance_device(&mut d, &config, &mut rng, now), Advance::Entered(UpdateStage::Downloading));
        assert_eq!(d.update_progress, 2.5);

        for _ in 0..26 {
            assert_eq!(advance_device(&mut d, &config, &mut rng, now), Advance::Progressed);
        }
        assert_eq!(d.update_progress, 67.5);
        assert_eq!(advance_device(&mut d, &config, &mut rng, now), Advance::Entered(UpdateStage::Installing));
        assert_eq!(d.update_progress, 70.0);

        // Installing adds 0.5 * 3 = 1.5 per tick: 20 ticks to reach 100.
        for _ in 0..19 {
            assert_eq!(advance_device(&mut d, &config, &mut rng, now), Advance::Progressed);
        }
        assert_eq!(advance_device(&mut d, &config, &mut rng, now), Advance::Entered(UpdateStage::Completed));
        assert_eq!(d.update_progress, 100.0);
        assert_eq!(d.os_version, "Windows 11 23H2");
        assert_eq!(d.update_status, UpdateStatus::UpToDate);
        assert_eq!(d.last_update, Some(now));
        assert!(!d.is_updating());
    }

    #[test]
    fn test_failure_roll_is_terminal() {
        let config = SimulationConfig::default();
        let now = Utc::now();
        let mut d = updating_device("DEV-0002", "Ubuntu 20.04 LTS", "Ubuntu 22.04 LTS");
        d.update_stage = UpdateStage::Downloading;
        d.update_progress = 30.0;

        let mut rng = ScriptedRandom::new([0.01]);
        assert_eq!(advance_device(&mut d, &config, &mut rng, now), Advance::Entered(UpdateStage::Failed));
        assert_eq!(d.update_progress, 30.0);
        assert_eq!(d.update_status, UpdateStatus::Failed);

        let mut rng = ScriptedRandom::constant(0.9);
        for _ in 0..10 {
            assert_eq!(advance_device(&mut d, &config, &mut rng, now), Advance::Unchanged);
        }
        assert_eq!(d.update_stage, UpdateStage::Failed);
        assert_eq!(d.update_progress, 30.0);
    }

    #[test]
    fn test_idle_devices_are_untouched() {
        let config = SimulationConfig::default();
        let mut d = device("DEV-0003", "macOS Sonoma");
        let snapshot = d.clone();
        let mut rng = SeededRandom::new(1);
        assert_eq!(advance_device(&mut d, &config, &mut rng, Utc::now()), Advance::Unchanged);
        assert_eq!(d, snapshot);
    }

    #[test]
    fn test_progress_never_decreases() {
        let config = SimulationConfig::default();
        let now = Utc::now();
        let mut rng = SeededRandom::new(1234);
        let mut devices: Vec<Device> = (0..200)
            .map(|i| updating_device(&format!("DEV-{:04}", i + 1), "Windows 10 22H2", "Windows 11 23H2"))
            .collect();

        for _ in 0..120 {
            for d in devices.iter_mut() {
                let before = d.clone();
                advance_device(d, &config, &mut rng, now);
                if before.update_stage.is_final() {
                    assert_eq!(*d, before);
                } else if d.update_stage != UpdateStage::Failed {
                    assert!(d.update_progress >= before.update_progress);
                }
            }
        }
    }
}
