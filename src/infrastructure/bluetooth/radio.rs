//! Radio Power Controller
//!
//! Owns the adapter's power state. At startup the radio is power cycled so the
//! peripheral always begins from a clean stack: disabled if it was on, then
//! enabled again after a settle delay.

use crate::domain::models::{RadioState, TimerEvent};
use crate::error::PeripheralError;
use crate::infrastructure::bluetooth::stack::RadioStack;
use crate::infrastructure::scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a radio-state notification means for the rest of the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioTransition {
    /// The radio just became usable
    PoweredOn,
    /// The radio left the On state
    PoweredOff,
    Unchanged,
}

pub struct RadioPowerController {
    stack: Arc<dyn RadioStack>,
    scheduler: Scheduler,
    settle: Duration,
    state: RadioState,
}

impl RadioPowerController {
    pub(crate) fn new(stack: Arc<dyn RadioStack>, scheduler: Scheduler, settle: Duration) -> Self {
        Self {
            stack,
            scheduler,
            settle,
            state: RadioState::Off,
        }
    }

    pub fn state(&self) -> RadioState {
        self.state
    }

    /// Turn the radio off if it is on and schedule it back on.
    ///
    /// The enable is scheduled even when the disable is rejected; the error is
    /// returned for logging only.
    pub fn power_cycle(&mut self) -> Result<(), PeripheralError> {
        let mut result = Ok(());
        if self.stack.is_radio_enabled() {
            info!("Radio is on, disabling for a clean start");
            result = self.disable();
        }

        debug!("Radio enable scheduled in {:?}", self.settle);
        self.scheduler.schedule(self.settle, TimerEvent::EnableRadio);
        result
    }

    pub fn enable(&self) -> Result<(), PeripheralError> {
        info!("Enabling radio");
        self.stack
            .enable_radio()
            .map_err(|_| PeripheralError::RadioUnavailable { operation: "enable" })
    }

    pub fn disable(&self) -> Result<(), PeripheralError> {
        info!("Disabling radio");
        self.stack
            .disable_radio()
            .map_err(|_| PeripheralError::RadioUnavailable {
                operation: "disable",
            })
    }

    /// Unknown codes are logged and leave the last known state in place.
    pub fn on_state_changed(&mut self, state: RadioState) -> RadioTransition {
        if let RadioState::Unknown(code) = state {
            warn!("Ignoring unknown radio state {}", code);
            return RadioTransition::Unchanged;
        }

        let was_on = self.state == RadioState::On;
        self.state = state;

        match state {
            RadioState::On if !was_on => RadioTransition::PoweredOn,
            RadioState::TurningOff | RadioState::Off if was_on => RadioTransition::PoweredOff,
            _ => RadioTransition::Unchanged,
        }
    }
}
