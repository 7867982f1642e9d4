//! Radio Stack Boundary
//!
//! The link layer, SMP and the platform Bluetooth service are not ours. This is
//! the contract the core needs from them: outbound calls on [`RadioStack`],
//! inbound notifications as [`StackEvent`]s pushed into the event channel.

use crate::domain::models::{
    AdvertiseError, DeviceAddress, IoCapability, PeripheralEvent, RemoteDevice, StackEvent,
    Transport,
};
use crate::error::StackError;
use crate::infrastructure::bluetooth::protocol::{AdvertiseData, AdvertiseSettings, ServiceDescriptor};
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<PeripheralEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PeripheralEvent>;

/// The coordinator's single event channel
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Push a stack notification into the event loop
pub fn notify(events: &EventSender, event: StackEvent) {
    // A closed loop means the coordinator has shut down; late notifications are moot.
    let _ = events.send(PeripheralEvent::Stack(event));
}

/// Opaque handle of an open GATT server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerHandle(pub u32);

pub trait RadioStack: Send + Sync {
    fn is_radio_enabled(&self) -> bool;
    fn enable_radio(&self) -> Result<(), StackError>;
    fn disable_radio(&self) -> Result<(), StackError>;

    /// Devices the stack holds a persistent bond for
    fn bonded_devices(&self) -> Vec<RemoteDevice>;

    fn set_io_capability(
        &self,
        transport: Transport,
        capability: IoCapability,
    ) -> Result<(), StackError>;
    fn set_device_name(&self, name: &str) -> Result<(), StackError>;

    /// `None` when the platform could not give us a server
    fn open_gatt_server(&self) -> Option<ServerHandle>;
    fn add_service(
        &self,
        server: ServerHandle,
        service: &ServiceDescriptor,
    ) -> Result<(), StackError>;
    fn close_gatt_server(&self, server: ServerHandle);

    /// Immediate rejections come back here; asynchronous ones arrive as
    /// [`StackEvent::AdvertiseFailed`].
    fn start_advertising(
        &self,
        settings: &AdvertiseSettings,
        data: &AdvertiseData,
    ) -> Result<(), AdvertiseError>;
    fn stop_advertising(&self);

    fn create_bond(&self, address: DeviceAddress) -> Result<(), StackError>;
    /// Confirm a consent-variant pairing
    fn finish_pairing(&self, address: DeviceAddress) -> Result<(), StackError>;
}
