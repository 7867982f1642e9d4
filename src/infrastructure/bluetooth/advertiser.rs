//! BLE Advertiser
//!
//! Announces the service: connectable, balanced duty cycle, medium power, no
//! timeout, device name and service UUID but no TX power level.
//!
//! A restart is not stop-then-start. The stack needs time to release its
//! advertising resources, so the stop and the start are each preceded by a
//! settle delay and run as timer events; the event loop keeps handling
//! notifications in between.

use crate::domain::models::{AdvertiseError, TimerEvent};
use crate::infrastructure::bluetooth::protocol::{AdvertiseData, AdvertiseSettings};
use crate::infrastructure::bluetooth::stack::RadioStack;
use crate::infrastructure::scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct Advertiser {
    stack: Arc<dyn RadioStack>,
    scheduler: Scheduler,
    device_name: String,
    settings: AdvertiseSettings,
    data: AdvertiseData,
    stop_delay: Duration,
    start_delay: Duration,
    started: bool,
    next_restart_id: u64,
    pending_restart: Option<u64>,
}

impl Advertiser {
    pub(crate) fn new(
        stack: Arc<dyn RadioStack>,
        scheduler: Scheduler,
        device_name: &str,
        service_uuid: Uuid,
        stop_delay: Duration,
        start_delay: Duration,
    ) -> Self {
        Self {
            stack,
            scheduler,
            device_name: device_name.to_string(),
            settings: AdvertiseSettings::default(),
            data: AdvertiseData::for_service(service_uuid),
            stop_delay,
            start_delay,
            started: false,
            next_restart_id: 0,
            pending_restart: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn restart_pending(&self) -> bool {
        self.pending_restart.is_some()
    }

    pub fn data(&self) -> &AdvertiseData {
        &self.data
    }

    pub fn start(&mut self) -> Result<(), AdvertiseError> {
        if self.started {
            return Err(AdvertiseError::AlreadyStarted);
        }

        if let Err(e) = self.stack.set_device_name(&self.device_name) {
            warn!("Could not set device name to {:?}: {}", self.device_name, e);
        }

        self.stack.start_advertising(&self.settings, &self.data)?;
        self.started = true;
        info!("Start BLE Advertising as {:?}", self.device_name);
        Ok(())
    }

    /// Halt advertising; a no-op when not started
    pub fn stop(&mut self) {
        if !self.started {
            debug!("Advertising already stopped");
            return;
        }
        info!("Stop BLE Advertising");
        self.stack.stop_advertising();
        self.started = false;
    }

    /// The stack reported asynchronously that the last start did not take
    pub fn on_start_failed(&mut self, error: AdvertiseError) {
        // a late AlreadyStarted means some advertisement is still running
        if error != AdvertiseError::AlreadyStarted {
            self.started = false;
        }
    }

    /// Schedule a stop and a start after their settle delays. Returns false
    /// when a restart is already under way; the pending one covers this call.
    pub fn restart(&mut self) -> bool {
        if self.pending_restart.is_some() {
            debug!("Advertising restart already pending");
            return false;
        }

        self.next_restart_id += 1;
        let restart_id = self.next_restart_id;
        self.pending_restart = Some(restart_id);
        info!("Restarting BLE Advertising");

        self.scheduler.schedule_sequence(vec![
            (self.stop_delay, TimerEvent::RestartStop { restart_id }),
            (self.start_delay, TimerEvent::RestartStart { restart_id }),
        ]);
        true
    }

    pub fn on_restart_stop(&mut self, restart_id: u64) {
        if self.pending_restart == Some(restart_id) {
            self.stop();
        }
    }

    /// Finish a restart. `None` for a restart that was cancelled meanwhile.
    pub fn on_restart_start(&mut self, restart_id: u64) -> Option<Result<(), AdvertiseError>> {
        if self.pending_restart != Some(restart_id) {
            debug!("Dropping stale advertising restart {}", restart_id);
            return None;
        }
        self.pending_restart = None;
        Some(self.start())
    }

    /// Forget all advertising state, e.g. after the radio went down
    pub fn reset(&mut self) {
        self.started = false;
        self.pending_restart = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol::SERVICE_UUID;
    use crate::infrastructure::bluetooth::simulated::{SimulatedStack, StackCall};
    use crate::infrastructure::bluetooth::stack::event_channel;

    fn advertiser(stack: Arc<SimulatedStack>, scheduler: Scheduler) -> Advertiser {
        Advertiser::new(
            stack,
            scheduler,
            "BLE",
            SERVICE_UUID,
            Duration::from_millis(1000),
            Duration::from_millis(500),
        )
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (tx, _rx) = event_channel();
        let stack = Arc::new(SimulatedStack::new(tx.clone()));
        stack.set_radio_enabled(true);
        let mut advertiser = advertiser(stack.clone(), Scheduler::new(tx));

        assert_eq!(advertiser.start(), Ok(()));
        assert_eq!(advertiser.start(), Err(AdvertiseError::AlreadyStarted));
        assert_eq!(
            stack.calls(),
            vec![
                StackCall::SetDeviceName("BLE".to_string()),
                StackCall::StartAdvertising(AdvertiseData::for_service(SERVICE_UUID)),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (tx, _rx) = event_channel();
        let stack = Arc::new(SimulatedStack::new(tx.clone()));
        stack.set_radio_enabled(true);
        let mut advertiser = advertiser(stack.clone(), Scheduler::new(tx));

        advertiser.start().unwrap();
        stack.clear_calls();
        advertiser.stop();
        advertiser.stop();
        assert_eq!(stack.calls(), vec![StackCall::StopAdvertising]);
        assert!(!advertiser.is_started());
    }

    #[tokio::test]
    async fn test_rejected_start_leaves_stopped() {
        let (tx, _rx) = event_channel();
        let stack = Arc::new(SimulatedStack::new(tx.clone()));
        stack.set_radio_enabled(true);
        stack.reject_advertising(Some(AdvertiseError::FeatureUnsupported));
        let mut advertiser = advertiser(stack, Scheduler::new(tx));

        assert_eq!(advertiser.start(), Err(AdvertiseError::FeatureUnsupported));
        assert!(!advertiser.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_collapses_while_pending() {
        let (tx, mut rx) = event_channel();
        let stack = Arc::new(SimulatedStack::new(tx.clone()));
        stack.set_radio_enabled(true);
        let mut advertiser = advertiser(stack.clone(), Scheduler::new(tx));
        advertiser.start().unwrap();

        assert!(advertiser.restart());
        assert!(!advertiser.restart());
        assert!(advertiser.restart_pending());

        let mut timers = Vec::new();
        while timers.len() < 2 {
            if let Some(crate::domain::models::PeripheralEvent::Timer(timer)) = rx.recv().await {
                timers.push(timer);
            }
        }
        assert_eq!(
            timers,
            vec![
                TimerEvent::RestartStop { restart_id: 1 },
                TimerEvent::RestartStart { restart_id: 1 },
            ]
        );

        advertiser.on_restart_stop(1);
        assert!(!advertiser.is_started());
        assert_eq!(advertiser.on_restart_start(1), Some(Ok(())));
        assert!(advertiser.is_started());
        assert!(!advertiser.restart_pending());
    }

    #[tokio::test]
    async fn test_reset_drops_pending_restart() {
        let (tx, _rx) = event_channel();
        let stack = Arc::new(SimulatedStack::new(tx.clone()));
        stack.set_radio_enabled(true);
        let mut advertiser = advertiser(stack, Scheduler::new(tx));
        advertiser.start().unwrap();

        advertiser.restart();
        advertiser.reset();
        advertiser.on_restart_stop(1);
        assert_eq!(advertiser.on_restart_start(1), None);
        assert!(!advertiser.is_started());
    }
}
