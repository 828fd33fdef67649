//! Update wizard session and per-step validation.
//!
//! The wizard walks through four steps (version selection, targeting rules,
//! rollout strategy, review). Validation errors are keyed by form field and
//! only block moving forward; going back is always allowed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::rollout::RolloutPlan;
use crate::types::{Device, DeviceGroup, Region, RolloutStrategy};
use crate::version::{self, Compatibility};

/// Default share of devices released in the first phase.
pub const DEFAULT_PHASE_PERCENTAGE: u8 = 25;

const PHASE_PERCENTAGE_RANGE: std::ops::RangeInclusive<u8> = 5..=50;

// =============================================================================
// Form data
// =============================================================================

/// Step 1: source and destination versions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionSelection {
    pub from_version: String,
    pub to_version: String,
    /// Result of the compatibility check; `None` while pending
    pub is_compatible: Option<bool>,
    pub compatibility_message: String,
}

/// Step 2: which devices are targeted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetingRules {
    pub selected_regions: BTreeSet<Region>,
    pub selected_groups: BTreeSet<DeviceGroup>,
    /// Safe Deployment Shield
    pub exclude_risky: bool,
}

/// Release strategy chosen in step 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Immediate,
    Scheduled,
    Phased,
}

/// Step 3: raw strategy form fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StrategySelection {
    pub rollout_type: StrategyKind,
    /// `YYYY-MM-DD`
    pub scheduled_date: String,
    /// `HH:MM`
    pub scheduled_time: String,
    pub phase_percentage: u8,
}

impl Default for StrategySelection {
    fn default() -> Self {
        Self {
            rollout_type: StrategyKind::Immediate,
            scheduled_date: String::new(),
            scheduled_time: String::new(),
            phase_percentage: DEFAULT_PHASE_PERCENTAGE,
        }
    }
}

impl StrategySelection {
    fn parsed_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(self.scheduled_date.trim(), "%Y-%m-%d").ok()
    }

    fn parsed_time(&self) -> Option<NaiveTime> {
        let t = self.scheduled_time.trim();
        NaiveTime::parse_from_str(t, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M:%S"))
            .ok()
    }

    /// Convert to a strategy; `None` when the fields are incomplete.
    pub fn to_strategy(&self) -> Option<RolloutStrategy> {
        match self.rollout_type {
            StrategyKind::Immediate => Some(RolloutStrategy::Immediate),
            StrategyKind::Scheduled => Some(RolloutStrategy::Scheduled {
                date: self.parsed_date()?,
                time: self.parsed_time()?,
            }),
            StrategyKind::Phased => PHASE_PERCENTAGE_RANGE
                .contains(&self.phase_percentage)
                .then_some(RolloutStrategy::Phased {
                    phase_percentage: self.phase_percentage,
                }),
        }
    }

    fn schedule_info(&self) -> String {
        match self.rollout_type {
            StrategyKind::Immediate => "Execution on confirmation".to_string(),
            StrategyKind::Scheduled => {
                format!("Queued for {} at {}", self.scheduled_date, self.scheduled_time)
            }
            StrategyKind::Phased => format!("Phased pulses at {}% intensity", self.phase_percentage),
        }
    }
}

/// All form data collected by the wizard.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WizardData {
    pub version_selection: VersionSelection,
    pub targeting_rules: TargetingRules,
    pub rollout_strategy: StrategySelection,
}

// =============================================================================
// Steps and validation
// =============================================================================

/// The four wizard steps, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    #[default]
    VersionSelection,
    TargetingRules,
    RolloutStrategy,
    Review,
}

impl WizardStep {
    pub const ALL: [WizardStep; 4] = [
        WizardStep::VersionSelection,
        WizardStep::TargetingRules,
        WizardStep::RolloutStrategy,
        WizardStep::Review,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn title(&self) -> &'static str {
        match self {
            WizardStep::VersionSelection => "Version Selection",
            WizardStep::TargetingRules => "Targeting Rules",
            WizardStep::RolloutStrategy => "Rollout Strategy",
            WizardStep::Review => "Review & Confirm",
        }
    }

    fn next(&self) -> Option<Self> {
        Self::from_index(self.index() + 1)
    }

    fn previous(&self) -> Option<Self> {
        self.index().checked_sub(1).and_then(Self::from_index)
    }
}

/// Field-keyed validation messages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: &str, message: impl Into<String>) {
        self.0.insert(field.to_string(), message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn merge(&mut self, other: ValidationErrors) {
        self.0.extend(other.0);
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        f.write_str(&parts.join("; "))
    }
}

/// Validate the fields that belong to `step`.
pub fn validate_step(step: WizardStep, data: &WizardData) -> ValidationErrors {
    let mut errors = ValidationErrors::new();

    match step {
        WizardStep::VersionSelection => {
            let v = &data.version_selection;
            let from = v.from_version.trim();
            let to = v.to_version.trim();

            if from.is_empty() {
                errors.insert("fromVersion", "From version is required");
            }
            if to.is_empty() {
                errors.insert("toVersion", "To version is required");
            }
            if !from.is_empty() && !to.is_empty() {
                if version::is_downgrade(from, to) {
                    errors.insert("version", "Downgrading OS version is not allowed");
                }
                match v.is_compatible {
                    Some(true) => {}
                    Some(false) => errors.insert("compatibility", "Selected versions are not compatible"),
                    None => errors.insert(
                        "compatibility",
                        "Please wait for compatibility check to complete",
                    ),
                }
            }
        }
        WizardStep::TargetingRules => {
            let t = &data.targeting_rules;
            if t.selected_regions.is_empty() {
                errors.insert("regions", "At least one region must be selected");
            }
            if t.selected_groups.is_empty() {
                errors.insert("groups", "At least one device group must be selected");
            }
        }
        WizardStep::RolloutStrategy => {
            let s = &data.rollout_strategy;
            match s.rollout_type {
                StrategyKind::Immediate => {}
                StrategyKind::Scheduled => {
                    if s.scheduled_date.trim().is_empty() {
                        errors.insert("date", "Scheduled date is required");
                    } else if s.parsed_date().is_none() {
                        errors.insert("date", "Scheduled date must be YYYY-MM-DD");
                    }
                    if s.scheduled_time.trim().is_empty() {
                        errors.insert("time", "Scheduled time is required");
                    } else if s.parsed_time().is_none() {
                        errors.insert("time", "Scheduled time must be HH:MM");
                    }
                }
                StrategyKind::Phased => {
                    if !PHASE_PERCENTAGE_RANGE.contains(&s.phase_percentage) {
                        errors.insert("phasePercentage", "Phase percentage must be between 5 and 50");
                    }
                }
            }
        }
        WizardStep::Review => {}
    }

    errors
}

/// Validate every step and build the rollout plan.
pub fn build_plan(data: &WizardData) -> Result<RolloutPlan, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    for step in WizardStep::ALL {
        errors.merge(validate_step(step, data));
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let strategy = data.rollout_strategy.to_strategy().ok_or_else(|| {
        let mut e = ValidationErrors::new();
        e.insert("rolloutType", "Rollout strategy is incomplete");
        e
    })?;

    Ok(RolloutPlan {
        from_version: data.version_selection.from_version.trim().to_string(),
        to_version: data.version_selection.to_version.trim().to_string(),
        regions: data.targeting_rules.selected_regions.clone(),
        groups: data.targeting_rules.selected_groups.clone(),
        exclude_risky: data.targeting_rules.exclude_risky,
        strategy,
    })
}

// =============================================================================
// Session
// =============================================================================

/// Result of a forward navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Navigation {
    /// Moved to the given step
    Moved { step: WizardStep },
    /// Already on the review step; the session can be submitted
    ReadyToSubmit,
}

/// Transient wizard state: the current step and the collected data.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardSession {
    pub step: WizardStep,
    pub data: WizardData,
}

impl WizardSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume a persisted session.
    pub fn restore(step: WizardStep, data: WizardData) -> Self {
        Self { step, data }
    }

    /// A session nobody has touched yet.
    pub fn is_pristine(&self) -> bool {
        *self == Self::default()
    }

    /// Replace the form data.
    ///
    /// The compatibility result is owned by the session: it is kept when the
    /// version pair is unchanged and reset to pending when it changes.
    pub fn update(&mut self, mut data: WizardData) {
        let old = &self.data.version_selection;
        let new = &data.version_selection;
        if old.from_version == new.from_version && old.to_version == new.to_version {
            data.version_selection.is_compatible = old.is_compatible;
            data.version_selection.compatibility_message = old.compatibility_message.clone();
        } else {
            data.version_selection.is_compatible = None;
            data.version_selection.compatibility_message = String::new();
        }
        self.data = data;
    }

    /// Run the compatibility check on the selected versions and record it.
    pub fn check_compatibility(&mut self) -> Compatibility {
        let v = &mut self.data.version_selection;
        if v.from_version.trim().is_empty() || v.to_version.trim().is_empty() {
            return Compatibility {
                is_compatible: false,
                message: "Both versions are required.".to_string(),
            };
        }

        let result = version::check_compatibility(v.from_version.trim(), v.to_version.trim());
        v.is_compatible = Some(result.is_compatible);
        v.compatibility_message = result.message.clone();
        result
    }

    /// Errors blocking the current step.
    pub fn current_errors(&self) -> ValidationErrors {
        validate_step(self.step, &self.data)
    }

    /// Move forward if the current step validates.
    pub fn next(&mut self) -> Result<Navigation, ValidationErrors> {
        let errors = self.current_errors();
        if !errors.is_empty() {
            return Err(errors);
        }
        match self.step.next() {
            Some(step) => {
                self.step = step;
                Ok(Navigation::Moved { step })
            }
            None => Ok(Navigation::ReadyToSubmit),
        }
    }

    /// Move back one step. Always allowed; stays on the first step.
    pub fn back(&mut self) -> WizardStep {
        if let Some(step) = self.step.previous() {
            self.step = step;
        }
        self.step
    }

    /// Validate everything and produce the plan to materialize.
    pub fn plan(&self) -> Result<RolloutPlan, ValidationErrors> {
        build_plan(&self.data)
    }

    /// Discard the session.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// =============================================================================
// Review summary
// =============================================================================

/// Qualitative impact of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Impact estimate shown on the review step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSummary {
    /// Devices currently matching the targeting rules and source version
    pub total_devices: usize,
    /// Devices left after the risk exclusion
    pub affected_devices: usize,
    pub high_risk_count: usize,
    pub risk_level: RiskLevel,
    pub rollout_type: StrategyKind,
    pub schedule_info: String,
}

impl ReviewSummary {
    pub fn compute(data: &WizardData, devices: &[Device]) -> Self {
        let rules = &data.targeting_rules;
        let from = data.version_selection.from_version.trim();

        let total_devices = devices
            .iter()
            .filter(|d| {
                rules.selected_regions.contains(&d.region)
                    && rules.selected_groups.contains(&d.device_group)
                    && d.os_version == from
            })
            .count();

        let (affected_devices, high_risk_share) = if rules.exclude_risky {
            ((total_devices as f64 * 0.9).floor() as usize, 0.10)
        } else {
            (total_devices, 0.15)
        };
        let high_risk_count = (total_devices as f64 * high_risk_share).floor() as usize;

        let risk_level = if affected_devices > 1000 {
            RiskLevel::High
        } else if affected_devices > 500 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        Self {
            total_devices,
            affected_devices,
            high_risk_count,
            risk_level,
            rollout_type: data.rollout_strategy.rollout_type,
            schedule_info: data.rollout_strategy.schedule_info(),
        }
    }
}
