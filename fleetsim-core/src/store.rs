//! The fleet store: single owner of the device and rollout registries.
//!
//! All mutations go through `&mut self`, so a tick and a materialization can
//! never interleave. Readers get `Arc` snapshots of the registries; every
//! write swaps in a whole new vector.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::error::{FleetError, Result};
use crate::events::{Event, EventLevel, EventLog};
use crate::generator;
use crate::persistence::{self, keys, StateBackend};
use crate::random::RandomSource;
use crate::rollout::{self, RolloutPlan};
use crate::simulation::{self, Advance, SimulationConfig};
use crate::types::{Device, Rollout, RolloutId, UpdateStage};
use crate::version::Compatibility;
use crate::wizard::{Navigation, ReviewSummary, WizardData, WizardSession, WizardStep};

/// What one tick changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Devices whose progress or stage moved
    pub devices_advanced: usize,
    /// Devices that finished their update this tick
    pub devices_completed: Vec<String>,
    /// Devices that failed this tick
    pub devices_failed: Vec<String>,
    /// Rollouts whose counts changed
    pub rollouts_refreshed: usize,
    /// Rollouts marked completed this tick
    pub rollouts_completed: Vec<RolloutId>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.devices_advanced == 0 && self.rollouts_refreshed == 0 && self.rollouts_completed.is_empty()
    }
}

/// Device registry, rollout registry, wizard session and intro markers.
pub struct FleetStore {
    config: SimulationConfig,
    backend: Arc<dyn StateBackend>,
    events: Arc<EventLog>,
    rng: Box<dyn RandomSource>,

    devices: Arc<Vec<Device>>,
    rollouts: Arc<Vec<Rollout>>,
    active_rollout: Option<RolloutId>,
    wizard: WizardSession,
    played_intros: BTreeSet<RolloutId>,
    last_rollout_id: i64,

    /// When the device registry was last written to the backend
    devices_saved_at: DateTime<Utc>,
    /// Device changes from ticks not yet written
    devices_unsaved: bool,
}

impl FleetStore {
    /// Restore the store from `backend`, generating a fresh fleet for
    /// anything missing or unreadable.
    #[instrument(skip_all, fields(backend = %backend.describe()))]
    pub fn initialize(
        config: SimulationConfig,
        backend: Arc<dyn StateBackend>,
        events: Arc<EventLog>,
        mut rng: Box<dyn RandomSource>,
        now: DateTime<Utc>,
    ) -> Self {
        let restore = Restorer {
            backend: backend.as_ref(),
            events: &events,
        };

        let mut devices = match restore.load(keys::DEVICES, validate_devices) {
            Some(mut devices) => {
                let repaired = devices.iter_mut().map(Device::normalize).filter(|c| *c).count();
                if repaired > 0 {
                    warn!(repaired, "Normalized inconsistent device records");
                }
                info!(count = devices.len(), "Restored device registry");
                devices
            }
            None => {
                let devices = generator::generate_devices(config.fleet_size, rng.as_mut(), now);
                info!(count = devices.len(), "Generated device registry");
                events.push(
                    Event::system(EventLevel::Info, format!("Generated {} devices", devices.len())).at(now),
                );
                devices
            }
        };

        let mut rollouts = restore.load(keys::ROLLOUTS, validate_rollouts).unwrap_or_default();
        let adopted = rollout::adopt_unowned(&rollouts, &mut devices);
        if adopted > 0 {
            info!(adopted, "Linked restored devices to their rollouts");
        }
        for r in rollouts.iter_mut().filter(|r| r.is_active()) {
            rollout::refresh(r, &devices, now);
        }

        let active_rollout = restore
            .load::<Option<RolloutId>>(keys::ACTIVE_ROLLOUT, |_| Ok(()))
            .flatten()
            .filter(|id| rollouts.iter().any(|r| r.id == *id));

        let data = restore.load::<Option<WizardData>>(keys::WIZARD_DATA, |_| Ok(())).flatten();
        let step = restore
            .load::<usize>(keys::WIZARD_STEP, |i| {
                WizardStep::from_index(*i)
                    .map(|_| ())
                    .ok_or_else(|| format!("step index {} out of range", i))
            })
            .and_then(WizardStep::from_index)
            .unwrap_or_default();
        let wizard = WizardSession::restore(step, data.unwrap_or_default());

        let played_intros = restore
            .load::<BTreeSet<RolloutId>>(keys::PLAYED_INTROS, |_| Ok(()))
            .unwrap_or_default();

        let last_rollout_id = rollouts.iter().map(|r| r.id.0).max().unwrap_or(0);

        let store = Self {
            config,
            backend,
            events,
            rng,
            devices: Arc::new(devices),
            rollouts: Arc::new(rollouts),
            active_rollout,
            wizard,
            played_intros,
            last_rollout_id,
            devices_saved_at: now,
            devices_unsaved: false,
        };
        store.persist();

        info!(
            devices = store.devices.len(),
            rollouts = store.rollouts.len(),
            wizard_step = store.wizard.step.index(),
            "Fleet store initialized"
        );
        store
            .events
            .push(Event::system(EventLevel::Info, "Fleet store initialized").at(now));
        store
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// Snapshot of the device registry.
    pub fn devices(&self) -> Arc<Vec<Device>> {
        Arc::clone(&self.devices)
    }

    pub fn device(&self, id: &str) -> Result<Device> {
        self.devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| FleetError::DeviceNotFound(id.to_string()))
    }

    /// Snapshot of the rollout registry.
    pub fn rollouts(&self) -> Arc<Vec<Rollout>> {
        Arc::clone(&self.rollouts)
    }

    pub fn rollout(&self, id: RolloutId) -> Result<Rollout> {
        self.rollouts
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(FleetError::RolloutNotFound(id))
    }

    /// The featured rollout, if any.
    pub fn active_rollout(&self) -> Option<Rollout> {
        let id = self.active_rollout?;
        self.rollouts.iter().find(|r| r.id == id).cloned()
    }

    pub fn wizard(&self) -> &WizardSession {
        &self.wizard
    }

    pub fn intro_played(&self, id: RolloutId) -> bool {
        self.played_intros.contains(&id)
    }

    // =========================================================================
    // Rollouts
    // =========================================================================

    /// Create a rollout from a validated plan and make it the active one.
    #[instrument(skip(self, plan), fields(from = %plan.from_version, to = %plan.to_version))]
    pub fn materialize(&mut self, plan: &RolloutPlan, now: DateTime<Utc>) -> Rollout {
        let id = self.next_rollout_id(now);
        let (devices, new_rollout) = rollout::materialize(plan, &self.devices, id, now);

        self.devices = Arc::new(devices);
        let mut rollouts = (*self.rollouts).clone();
        rollouts.push(new_rollout.clone());
        self.rollouts = Arc::new(rollouts);
        self.active_rollout = Some(id);

        info!(
            rollout_id = %id,
            devices = new_rollout.aggregates.total_devices,
            strategy = %new_rollout.strategy.describe(),
            "Rollout created"
        );
        self.events.push(
            Event::rollout(
                EventLevel::Info,
                id,
                format!(
                    "Rollout {} created for {} devices",
                    new_rollout.name, new_rollout.aggregates.total_devices
                ),
            )
            .at(now),
        );

        self.persist();
        self.devices_saved_at = now;
        self.devices_unsaved = false;
        new_rollout
    }

    /// Remove a rollout. Devices keep their current update state.
    #[instrument(skip(self))]
    pub fn delete_rollout(&mut self, id: RolloutId) -> Result<Rollout> {
        let index = self
            .rollouts
            .iter()
            .position(|r| r.id == id)
            .ok_or(FleetError::RolloutNotFound(id))?;

        let mut rollouts = (*self.rollouts).clone();
        let removed = rollouts.remove(index);
        self.rollouts = Arc::new(rollouts);

        if self.active_rollout == Some(id) {
            self.active_rollout = None;
        }
        self.played_intros.remove(&id);

        info!(rollout_id = %id, "Rollout deleted");
        self.events
            .push(Event::rollout(EventLevel::Info, id, format!("Rollout {} deleted", removed.name)));
        self.persist();
        Ok(removed)
    }

    /// Record that the rollout intro has played.
    ///
    /// Returns true the first time, false if it had already played.
    pub fn mark_intro_played(&mut self, id: RolloutId) -> Result<bool> {
        if !self.rollouts.iter().any(|r| r.id == id) {
            return Err(FleetError::RolloutNotFound(id));
        }
        if !self.played_intros.insert(id) {
            return Ok(false);
        }
        self.save(keys::PLAYED_INTROS, &self.played_intros);
        self.events
            .push(Event::rollout(EventLevel::Debug, id, "Rollout intro played"));
        Ok(true)
    }

    fn next_rollout_id(&mut self, now: DateTime<Utc>) -> RolloutId {
        let id = now.timestamp_millis().max(self.last_rollout_id + 1);
        self.last_rollout_id = id;
        RolloutId(id)
    }

    // =========================================================================
    // Simulation
    // =========================================================================

    /// Advance every updating device, then recompute and settle every
    /// active rollout.
    ///
    /// Rollout keys are written whenever they change. The device registry
    /// is written at most once per `persist_interval`, or right away when a
    /// rollout completes.
    #[instrument(skip(self), level = "debug")]
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        if self.devices.iter().any(Device::is_updating) {
            let mut devices = (*self.devices).clone();
            for device in devices.iter_mut() {
                let advance = simulation::advance_device(device, &self.config, self.rng.as_mut(), now);
                if !advance.changed() {
                    continue;
                }
                report.devices_advanced += 1;
                match advance {
                    Advance::Entered(UpdateStage::Completed) => {
                        report.devices_completed.push(device.id.clone());
                        self.events.push(
                            Event::device(
                                EventLevel::Info,
                                &device.id,
                                format!("Update to {} completed", device.os_version),
                            )
                            .at(now),
                        );
                    }
                    Advance::Entered(UpdateStage::Failed) => {
                        warn!(device_id = %device.id, progress = device.update_progress, "Device update failed");
                        report.devices_failed.push(device.id.clone());
                        self.events.push(
                            Event::device(EventLevel::Warning, &device.id, "Update failed")
                                .with_details(serde_json::json!({ "progress": device.update_progress }))
                                .at(now),
                        );
                    }
                    _ => {}
                }
            }
            if report.devices_advanced > 0 {
                self.devices = Arc::new(devices);
                self.devices_unsaved = true;
            }
        }

        if self.rollouts.iter().any(Rollout::is_active) {
            let settle_delay = chrono::Duration::from_std(self.config.settle_delay_duration())
                .unwrap_or_else(|_| chrono::Duration::seconds(5));
            let mut rollouts = (*self.rollouts).clone();
            let mut changed = false;

            for r in rollouts.iter_mut().filter(|r| r.is_active()) {
                let before_settle = r.settling_since;
                if rollout::refresh(r, &self.devices, now) {
                    report.rollouts_refreshed += 1;
                    changed = true;
                }
                if rollout::settle(r, now, settle_delay) {
                    report.rollouts_completed.push(r.id);
                    if self.active_rollout == Some(r.id) {
                        self.active_rollout = None;
                    }
                    info!(
                        rollout_id = %r.id,
                        completed = r.aggregates.completed_devices,
                        failed = r.aggregates.failed_devices,
                        "Rollout completed"
                    );
                    self.events.push(
                        Event::rollout(EventLevel::Info, r.id, format!("Rollout {} completed", r.name)).at(now),
                    );
                }
                changed |= r.settling_since != before_settle || !r.is_active();
            }

            if changed {
                self.rollouts = Arc::new(rollouts);
                self.save(keys::ROLLOUTS, self.rollouts.as_slice());
                self.save(keys::ACTIVE_ROLLOUT, &self.active_rollout);
            }
        }

        if self.devices_unsaved {
            let interval = chrono::Duration::from_std(self.config.persist_interval_duration())
                .unwrap_or_else(|_| chrono::Duration::seconds(30));
            if now - self.devices_saved_at >= interval || !report.rollouts_completed.is_empty() {
                self.save(keys::DEVICES, self.devices.as_slice());
                self.devices_saved_at = now;
                self.devices_unsaved = false;
            }
        }

        if !report.is_idle() {
            debug!(
                advanced = report.devices_advanced,
                refreshed = report.rollouts_refreshed,
                unsaved_devices = self.devices_unsaved,
                "Tick applied"
            );
        }
        report
    }

    // =========================================================================
    // Wizard
    // =========================================================================

    /// Replace the wizard form data.
    pub fn update_wizard(&mut self, data: WizardData) -> &WizardSession {
        self.wizard.update(data);
        self.persist_wizard();
        &self.wizard
    }

    /// Run the compatibility check on the selected versions.
    pub fn check_compatibility(&mut self) -> Compatibility {
        let result = self.wizard.check_compatibility();
        self.persist_wizard();
        result
    }

    /// Move to the next step if the current one validates.
    pub fn wizard_next(&mut self) -> Result<Navigation> {
        let navigation = self.wizard.next().map_err(FleetError::Validation)?;
        self.persist_wizard();
        Ok(navigation)
    }

    pub fn wizard_back(&mut self) -> WizardStep {
        let step = self.wizard.back();
        self.persist_wizard();
        step
    }

    /// Drop the session without creating a rollout.
    pub fn reset_wizard(&mut self) {
        self.wizard.reset();
        self.persist_wizard();
        self.events.push(Event::wizard("Update wizard cancelled"));
    }

    pub fn review_summary(&self) -> ReviewSummary {
        ReviewSummary::compute(&self.wizard.data, &self.devices)
    }

    /// Validate the whole session and materialize it as a rollout.
    ///
    /// The session is discarded only when materialization happened.
    #[instrument(skip(self))]
    pub fn submit_wizard(&mut self, now: DateTime<Utc>) -> Result<Rollout> {
        let plan = self.wizard.plan().map_err(|errors| {
            debug!(errors = %errors, "Wizard submission rejected");
            FleetError::Validation(errors)
        })?;

        self.wizard.reset();
        let created = self.materialize(&plan, now);
        self.events.push(
            Event::wizard(format!("Update wizard submitted as rollout {}", created.id))
                .with_resource(created.id)
                .at(now),
        );
        Ok(created)
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write every store key. Failures are logged, never propagated.
    pub fn persist(&self) {
        self.save(keys::DEVICES, self.devices.as_slice());
        self.save(keys::ROLLOUTS, self.rollouts.as_slice());
        self.save(keys::ACTIVE_ROLLOUT, &self.active_rollout);
        self.save(keys::PLAYED_INTROS, &self.played_intros);
        self.persist_wizard();
    }

    fn persist_wizard(&self) {
        if self.wizard.data == WizardData::default() {
            if let Err(e) = self.backend.remove(keys::WIZARD_DATA) {
                warn!(error = %e, "Failed to clear wizard data");
            }
        } else {
            self.save(keys::WIZARD_DATA, &self.wizard.data);
        }
        self.save(keys::WIZARD_STEP, &self.wizard.step.index());
    }

    fn save<T: serde::Serialize + ?Sized>(&self, key: &str, value: &T) {
        if let Err(e) = persistence::save_json(self.backend.as_ref(), key, value) {
            warn!(key, error = %e, "Failed to persist state");
        }
    }
}

// =============================================================================
// Restore helpers
// =============================================================================

/// Loads persisted keys, discarding anything unreadable or invalid.
struct Restorer<'a> {
    backend: &'a dyn StateBackend,
    events: &'a EventLog,
}

impl Restorer<'_> {
    fn load<T: DeserializeOwned>(
        &self,
        key: &str,
        validate: impl FnOnce(&T) -> std::result::Result<(), String>,
    ) -> Option<T> {
        let result = persistence::load_json::<T>(self.backend, key).and_then(|value| match value {
            Some(v) => validate(&v)
                .map(|()| Some(v))
                .map_err(|reason| FleetError::InvalidSnapshot {
                    key: key.to_string(),
                    reason,
                }),
            None => Ok(None),
        });

        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Discarding persisted state");
                self.events.push(Event::system(
                    EventLevel::Warning,
                    format!("Stored '{}' was unreadable and has been reset", key),
                ));
                if let Err(e) = self.backend.remove(key) {
                    warn!(key, error = %e, "Failed to remove discarded state");
                }
                None
            }
        }
    }
}

fn validate_devices(devices: &Vec<Device>) -> std::result::Result<(), String> {
    if devices.is_empty() {
        return Err("device registry is empty".to_string());
    }
    let mut seen = HashSet::with_capacity(devices.len());
    match devices.iter().find(|d| !seen.insert(d.id.as_str())) {
        Some(dup) => Err(format!("duplicate device id {}", dup.id)),
        None => Ok(()),
    }
}

fn validate_rollouts(rollouts: &Vec<Rollout>) -> std::result::Result<(), String> {
    let mut seen = HashSet::with_capacity(rollouts.len());
    match rollouts.iter().find(|r| !seen.insert(r.id)) {
        Some(dup) => Err(format!("duplicate rollout id {}", dup.id)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryBackend;
    use crate::random::{ScriptedRandom, SeededRandom};
    use crate::types::{DeviceGroup, Region, RolloutStatus, RolloutStrategy, UpdateStatus};
    use chrono::Duration;

    fn store_with(backend: Arc<dyn StateBackend>, rng: Box<dyn RandomSource>) -> FleetStore {
        FleetStore::initialize(
            SimulationConfig::default(),
            backend,
            Arc::new(EventLog::new()),
            rng,
            Utc::now(),
        )
    }

    fn seeded_store() -> FleetStore {
        store_with(Arc::new(MemoryBackend::new()), Box::new(SeededRandom::new(7)))
    }

    fn plan_for(store: &FleetStore) -> RolloutPlan {
        // Target whatever the first device runs so the set is never empty
        let devices = store.devices();
        let first = &devices[0];
        let to = if first.os_version == "Windows 11 23H2" {
            "Windows 11 24H2"
        } else {
            "Windows 11 23H2"
        };
        RolloutPlan {
            from_version: first.os_version.clone(),
            to_version: to.to_string(),
            regions: Region::ALL.into_iter().collect(),
            groups: DeviceGroup::ALL.into_iter().collect(),
            exclude_risky: false,
            strategy: RolloutStrategy::Immediate,
        }
    }

    #[test]
    fn test_initialize_generates_and_persists() {
        let backend: Arc<dyn StateBackend> = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone(), Box::new(SeededRandom::new(1)));
        assert_eq!(store.devices().len(), 1250);
        assert!(store.rollouts().is_empty());
        assert!(store.active_rollout().is_none());
        assert!(backend.get(keys::DEVICES).unwrap().is_some());

        let reloaded = store_with(backend, Box::new(SeededRandom::new(2)));
        assert_eq!(reloaded.devices(), store.devices());
    }

    #[test]
    fn test_duplicate_device_ids_trigger_regeneration() {
        let backend: Arc<dyn StateBackend> = Arc::new(MemoryBackend::new());
        let d = crate::testing::device("DEV-0001", "Windows 10 22H2");
        persistence::save_json(backend.as_ref(), keys::DEVICES, &vec![d.clone(), d]).unwrap();

        let store = store_with(backend, Box::new(SeededRandom::new(3)));
        assert_eq!(store.devices().len(), 1250);
    }

    #[test]
    fn test_materialize_sets_active_and_snapshots_are_stable() {
        let mut store = seeded_store();
        let before = store.devices();
        let plan = plan_for(&store);
        let expected = plan.matching_count(&before);

        let created = store.materialize(&plan, Utc::now());
        assert_eq!(created.aggregates.total_devices, expected);
        assert_eq!(store.active_rollout().map(|r| r.id), Some(created.id));

        // Old snapshot is untouched
        assert!(before.iter().all(|d| d.update_stage == UpdateStage::Idle));
        let updating = store.devices().iter().filter(|d| d.is_updating()).count();
        assert_eq!(updating, expected);
    }

    #[test]
    fn test_rollout_ids_strictly_increase() {
        let mut store = seeded_store();
        let plan = plan_for(&store);
        let now = Utc::now();
        let a = store.materialize(&plan, now);
        let b = store.materialize(&plan, now);
        assert!(b.id > a.id);
        assert_eq!(store.active_rollout().map(|r| r.id), Some(b.id));
    }

    #[test]
    fn test_rollout_completes_after_settle_delay() {
        // Never fail, always take the maximum step
        let mut store = store_with(
            Arc::new(MemoryBackend::new()),
            Box::new(ScriptedRandom::constant(0.999)),
        );
        let plan = plan_for(&store);
        let start = Utc::now();
        let created = store.materialize(&plan, start);

        let mut now = start;
        let mut completed_at = None;
        for _ in 0..200 {
            now += Duration::seconds(4);
            let report = store.tick(now);
            if !report.rollouts_completed.is_empty() {
                assert_eq!(report.rollouts_completed, vec![created.id]);
                completed_at = Some(now);
                break;
            }
        }

        assert!(completed_at.is_some());
        let done = store.rollout(created.id).unwrap();
        assert_eq!(done.status, RolloutStatus::Completed);
        assert_eq!(done.progress(), 100.0);
        assert_eq!(done.aggregates.completed_devices, created.aggregates.total_devices);
        assert!(store.active_rollout().is_none());

        // Never completed twice
        let report = store.tick(now + Duration::seconds(30));
        assert!(report.rollouts_completed.is_empty());
    }

    /// Every active rollout's counts equal a recomputation over the
    /// devices it assigned.
    fn assert_counts_match_own_devices(store: &FleetStore) {
        let devices = store.devices();
        for r in store.rollouts().iter().filter(|r| r.is_active()) {
            let owned = devices.iter().filter(|d| d.belongs_to(r.id)).count();
            assert_eq!(r.aggregates.total_devices, owned, "rollout {}", r.id);
            assert_eq!(r.aggregates, rollout::compute_aggregates(r, &devices));
        }
    }

    /// A varied fleet whose updates never fail and always take the
    /// maximum step.
    fn never_failing_store() -> FleetStore {
        let backend: Arc<dyn StateBackend> = Arc::new(MemoryBackend::new());
        store_with(backend.clone(), Box::new(SeededRandom::new(7)));
        store_with(backend, Box::new(ScriptedRandom::constant(0.999)))
    }

    #[test]
    fn test_sequential_rollouts_on_same_pair_keep_separate_counts() {
        let mut store = never_failing_store();
        let wide = plan_for(&store);
        let first_region = store.devices()[0].region;
        let narrow = RolloutPlan {
            regions: [first_region].into_iter().collect(),
            ..wide.clone()
        };

        let start = Utc::now();
        let r1 = store.materialize(&narrow, start);
        let mut now = start;
        while store.rollout(r1.id).unwrap().is_active() {
            now += Duration::seconds(4);
            store.tick(now);
            assert_counts_match_own_devices(&store);
        }
        let r1_done = store.rollout(r1.id).unwrap();

        let expected = wide.matching_count(&store.devices());
        let r2 = store.materialize(&wide, now);
        assert_eq!(r2.aggregates.total_devices, expected);
        assert!(expected > 0);
        for _ in 0..5 {
            now += Duration::seconds(4);
            store.tick(now);
            assert_counts_match_own_devices(&store);
            let current = store.rollout(r2.id).unwrap();
            assert_eq!(current.aggregates.total_devices, r2.aggregates.total_devices);
            assert!(current.progress() < 100.0);
        }

        // The finished rollout still owns exactly the devices it updated
        let owned = store.devices().iter().filter(|d| d.belongs_to(r1.id)).count();
        assert_eq!(owned, r1_done.aggregates.total_devices);
        assert_eq!(store.rollout(r1.id).unwrap(), r1_done);
    }

    #[test]
    fn test_overlapping_rollout_reassigns_in_flight_devices() {
        let mut store = never_failing_store();
        let wide = plan_for(&store);
        let first_region = store.devices()[0].region;
        let narrow = RolloutPlan {
            regions: [first_region].into_iter().collect(),
            ..wide.clone()
        };

        let start = Utc::now();
        let r1 = store.materialize(&narrow, start);
        store.tick(start + Duration::seconds(4));
        assert_counts_match_own_devices(&store);

        let retarget = RolloutPlan {
            to_version: "Windows 11 24H2".to_string(),
            ..wide
        };
        let r2 = store.materialize(&retarget, start + Duration::seconds(5));
        assert_eq!(store.devices().iter().filter(|d| d.belongs_to(r1.id)).count(), 0);

        let mut now = start + Duration::seconds(5);
        for _ in 0..5 {
            now += Duration::seconds(4);
            store.tick(now);
            assert_counts_match_own_devices(&store);
        }
        assert_eq!(store.rollout(r1.id).unwrap().aggregates.total_devices, 0);
        assert_eq!(
            store.rollout(r2.id).unwrap().aggregates.total_devices,
            r2.aggregates.total_devices
        );
    }

    #[test]
    fn test_restore_links_devices_saved_without_owner() {
        let backend: Arc<dyn StateBackend> = Arc::new(MemoryBackend::new());
        let mut store = store_with(backend.clone(), Box::new(SeededRandom::new(11)));
        let created = store.materialize(&plan_for(&store), Utc::now());

        let mut legacy = (*store.devices()).clone();
        for d in legacy.iter_mut() {
            d.assigned_rollout = None;
        }
        persistence::save_json(backend.as_ref(), keys::DEVICES, &legacy).unwrap();

        let reloaded = store_with(backend, Box::new(SeededRandom::new(12)));
        let owned = reloaded.devices().iter().filter(|d| d.belongs_to(created.id)).count();
        assert_eq!(owned, created.aggregates.total_devices);
        assert_eq!(
            reloaded.rollout(created.id).unwrap().aggregates.total_devices,
            created.aggregates.total_devices
        );
    }

    #[test]
    fn test_tick_throttles_device_writes() {
        let backend: Arc<dyn StateBackend> = Arc::new(MemoryBackend::new());
        let mut store = store_with(backend.clone(), Box::new(ScriptedRandom::constant(0.999)));
        let start = Utc::now();
        let created = store.materialize(&plan_for(&store), start);
        // Stage and whole-percent progress per device
        fn fingerprint(devices: &[Device]) -> Vec<(UpdateStage, i64)> {
            devices
                .iter()
                .map(|d| (d.update_stage, d.update_progress.round() as i64))
                .collect()
        }
        let saved_devices = |b: &Arc<dyn StateBackend>| {
            let devices = persistence::load_json::<Vec<Device>>(b.as_ref(), keys::DEVICES)
                .unwrap()
                .unwrap();
            fingerprint(&devices)
        };
        let at_creation = saved_devices(&backend);

        store.tick(start + Duration::seconds(4));
        assert_ne!(fingerprint(&store.devices()), at_creation);
        assert_eq!(saved_devices(&backend), at_creation);
        let saved_rollouts = persistence::load_json::<Vec<Rollout>>(backend.as_ref(), keys::ROLLOUTS)
            .unwrap()
            .unwrap();
        assert_eq!(
            saved_rollouts[0].aggregates.in_progress_devices,
            store.rollout(created.id).unwrap().aggregates.in_progress_devices
        );
        assert!(saved_rollouts[0].aggregates.in_progress_devices > 0);

        store.tick(start + Duration::seconds(30));
        assert_eq!(saved_devices(&backend), fingerprint(&store.devices()));

        store.tick(start + Duration::seconds(34));
        assert_ne!(saved_devices(&backend), fingerprint(&store.devices()));
        store.persist();
        assert_eq!(saved_devices(&backend), fingerprint(&store.devices()));
    }

    #[test]
    fn test_failed_devices_are_terminal() {
        let mut store = store_with(Arc::new(MemoryBackend::new()), Box::new(ScriptedRandom::constant(0.0)));
        let plan = plan_for(&store);
        store.materialize(&plan, Utc::now());

        let report = store.tick(Utc::now());
        assert!(!report.devices_failed.is_empty());
        let snapshot = store.devices();
        assert!(snapshot
            .iter()
            .filter(|d| d.source_os_version.is_some())
            .all(|d| d.update_status == UpdateStatus::Failed));

        store.tick(Utc::now());
        assert_eq!(store.devices(), snapshot);
    }

    #[test]
    fn test_delete_rollout_clears_active() {
        let mut store = seeded_store();
        let created = store.materialize(&plan_for(&store), Utc::now());
        store.mark_intro_played(created.id).unwrap();

        store.delete_rollout(created.id).unwrap();
        assert!(store.active_rollout().is_none());
        assert!(!store.intro_played(created.id));
        assert!(matches!(
            store.delete_rollout(created.id),
            Err(FleetError::RolloutNotFound(_))
        ));
    }

    #[test]
    fn test_intro_marker_is_idempotent() {
        let backend: Arc<dyn StateBackend> = Arc::new(MemoryBackend::new());
        let mut store = store_with(backend.clone(), Box::new(SeededRandom::new(5)));
        let created = store.materialize(&plan_for(&store), Utc::now());

        assert!(store.mark_intro_played(created.id).unwrap());
        assert!(!store.mark_intro_played(created.id).unwrap());
        assert!(store.mark_intro_played(RolloutId(1)).is_err());

        let markers = store.events().query(Some(EventLevel::Debug), None, None);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].resource_id, Some(created.id.to_string()));

        let reloaded = store_with(backend, Box::new(SeededRandom::new(6)));
        assert!(reloaded.intro_played(created.id));
    }

    #[test]
    fn test_submit_rejects_incomplete_wizard() {
        let mut store = seeded_store();
        let err = store.submit_wizard(Utc::now()).unwrap_err();
        match err {
            FleetError::Validation(errors) => assert!(errors.contains("fromVersion")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.rollouts().is_empty());
    }
}
