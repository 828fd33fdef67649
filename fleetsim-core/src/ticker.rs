//! Background task driving the simulation.
//!
//! The ticker owns nothing but a handle to the shared store; each tick takes
//! the write lock for the whole advance-and-aggregate step.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::store::FleetStore;

/// Store shared between the ticker and request handlers.
pub type SharedStore = Arc<RwLock<FleetStore>>;

/// Periodic simulation driver.
pub struct SimulationTicker;

impl SimulationTicker {
    /// Spawn the ticker on the current runtime. The first tick fires one
    /// full `period` after start.
    pub fn start(store: SharedStore, period: Duration) -> TickerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(interval_ms = period.as_millis() as u64, "Starting simulation ticker");

            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let report = store.write().await.tick(Utc::now());
                        if !report.is_idle() {
                            debug!(
                                advanced = report.devices_advanced,
                                completed = report.devices_completed.len(),
                                failed = report.devices_failed.len(),
                                rollouts_completed = report.rollouts_completed.len(),
                                "Simulation tick"
                            );
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Simulation ticker stopped");
        });

        TickerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle used to stop a running ticker.
pub struct TickerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TickerHandle {
    /// Signal the ticker and wait for the task to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Simulation ticker task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use crate::persistence::MemoryBackend;
    use crate::random::ScriptedRandom;
    use crate::rollout::RolloutPlan;
    use crate::simulation::SimulationConfig;
    use crate::types::{DeviceGroup, Region, RolloutStrategy, UpdateStage};

    fn shared_store() -> SharedStore {
        let store = FleetStore::initialize(
            SimulationConfig::default(),
            Arc::new(MemoryBackend::new()),
            Arc::new(EventLog::new()),
            Box::new(ScriptedRandom::constant(0.5)),
            Utc::now(),
        );
        Arc::new(RwLock::new(store))
    }

    async fn start_rollout(store: &SharedStore) {
        let mut guard = store.write().await;
        let from = guard.devices()[0].os_version.clone();
        let plan = RolloutPlan {
            from_version: from,
            to_version: "Windows 11 23H2".to_string(),
            regions: Region::ALL.into_iter().collect(),
            groups: DeviceGroup::ALL.into_iter().collect(),
            exclude_risky: false,
            strategy: RolloutStrategy::Immediate,
        };
        guard.materialize(&plan, Utc::now());
    }

    fn downloading(store: &FleetStore) -> usize {
        store
            .devices()
            .iter()
            .filter(|d| d.update_stage == UpdateStage::Downloading)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval_and_stops() {
        let store = shared_store();
        start_rollout(&store).await;

        let ticker = SimulationTicker::start(store.clone(), Duration::from_secs(4));
        assert!(ticker.is_running());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(downloading(&*store.read().await), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(downloading(&*store.read().await) > 0);

        ticker.stop().await;
        let frozen = store.read().await.devices();
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(store.read().await.devices(), frozen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_reads_current_store() {
        let store = shared_store();

        let ticker = SimulationTicker::start(store.clone(), Duration::from_secs(4));
        ticker.stop().await;

        // Work created while stopped is picked up by the next ticker
        start_rollout(&store).await;
        let ticker = SimulationTicker::start(store.clone(), Duration::from_secs(4));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(downloading(&*store.read().await) > 0);
        ticker.stop().await;
    }
}
