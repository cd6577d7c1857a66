//! Alarm scheduling
//!
//! One interval task on the runtime scans for due alarms and hands each
//! fired alarm to the state machine through a channel. The machine
//! consumes fire events at its next yield point, so an alarm never
//! interrupts a transition mid-flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use walnut_config::AlarmConfig;

use crate::store::{Alarm, AlarmStore};

/// Fired alarms queue up here until the machine drains them.
const FIRE_QUEUE: usize = 8;

/// Tick-driven scanner over the alarm store.
pub struct AlarmScheduler {
    store: Arc<AlarmStore>,
    config: AlarmConfig,
}

impl AlarmScheduler {
    pub fn new(store: Arc<AlarmStore>, config: AlarmConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<AlarmStore> {
        &self.store
    }

    /// Spawn the tick task. Returns the fire-event receiver and the
    /// task handle for shutdown.
    pub fn spawn(self) -> (mpsc::Receiver<Alarm>, JoinHandle<()>) {
        let (fire_tx, fire_rx) = mpsc::channel(FIRE_QUEUE);
        let interval = Duration::from_secs_f32(self.config.check_interval_secs.max(0.1));
        let store = self.store;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                // At most one alarm per tick by store contract.
                match store.claim_due(Utc::now()) {
                    Ok(Some(alarm)) => {
                        tracing::info!(id = alarm.id, message = %alarm.message, "alarm fired");
                        if fire_tx.send(alarm).await.is_err() {
                            // Machine is gone; nothing left to ring for.
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "alarm scan failed");
                    }
                }
            }
        });

        (fire_rx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn config_fast() -> AlarmConfig {
        AlarmConfig {
            check_interval_secs: 0.1,
            ..AlarmConfig::default()
        }
    }

    #[tokio::test]
    async fn due_alarm_reaches_the_channel() {
        let store = Arc::new(AlarmStore::open_in_memory().unwrap());
        store
            .add(Utc::now() - ChronoDuration::seconds(1), "now", "ringtone")
            .unwrap();

        let scheduler = AlarmScheduler::new(Arc::clone(&store), config_fast());
        let (mut fire_rx, handle) = scheduler.spawn();

        let fired = tokio::time::timeout(Duration::from_secs(2), fire_rx.recv())
            .await
            .expect("alarm should fire within the window")
            .expect("channel open");
        assert_eq!(fired.message, "now");

        handle.abort();
    }

    #[tokio::test]
    async fn future_alarm_does_not_fire_early() {
        let store = Arc::new(AlarmStore::open_in_memory().unwrap());
        store
            .add(Utc::now() + ChronoDuration::minutes(30), "later", "ringtone")
            .unwrap();

        let scheduler = AlarmScheduler::new(Arc::clone(&store), config_fast());
        let (mut fire_rx, handle) = scheduler.spawn();

        let outcome = tokio::time::timeout(Duration::from_millis(400), fire_rx.recv()).await;
        assert!(outcome.is_err(), "nothing should fire yet");

        handle.abort();
    }
}
