//! Deferred actions
//!
//! The settle windows between radio operations are not slept on the event
//! loop. Instead a task sleeps and posts a [`TimerEvent`] back into the loop,
//! so the deferred step runs on the dispatch context while other notifications
//! keep flowing in the meantime. Under `tokio::time::pause` the delays run on
//! the virtual clock.

use crate::domain::models::{PeripheralEvent, TimerEvent};
use crate::infrastructure::bluetooth::stack::EventSender;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Clone)]
pub struct Scheduler {
    events: EventSender,
}

impl Scheduler {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    /// Post `event` after `delay`
    pub fn schedule(&self, delay: Duration, event: TimerEvent) -> JoinHandle<()> {
        self.schedule_sequence(vec![(delay, event)])
    }

    /// Post each event in turn, each one after its own delay
    pub fn schedule_sequence(&self, steps: Vec<(Duration, TimerEvent)>) -> JoinHandle<()> {
        let events = self.events.clone();
        tokio::spawn(async move {
            for (delay, event) in steps {
                tokio::time::sleep(delay).await;
                trace!("Timer fired: {:?}", event);
                if events.send(PeripheralEvent::Timer(event)).is_err() {
                    debug!("Event loop closed, dropping {:?}", event);
                    return;
                }
            }
        })
    }
}
