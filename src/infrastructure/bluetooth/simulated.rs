//! In-process radio stack
//!
//! Answers outbound calls the way a platform stack would and pushes the
//! matching notifications into the event channel. Every call is recorded with
//! its (possibly virtual) timestamp. The `central`-side hooks play the remote
//! device; the failure switches inject stack errors.

use crate::domain::models::{
    AdvertiseError, BondFailureReason, DeviceAddress, IoCapability, PairingVariant, ProfileState,
    RawBondState, RadioState, RemoteDevice, StackEvent, Transport,
};
use crate::error::StackError;
use crate::infrastructure::bluetooth::protocol::{AdvertiseData, AdvertiseSettings, ServiceDescriptor};
use crate::infrastructure::bluetooth::stack::{notify, EventSender, RadioStack, ServerHandle};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// GATT server profile id used in profile-level connection notifications
pub const GATT_SERVER_PROFILE: i32 = 8;

/// Credential shown for the display variants
pub const DISPLAY_CREDENTIAL: u32 = 123_456;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    EnableRadio,
    DisableRadio,
    SetIoCapability(Transport, IoCapability),
    SetDeviceName(String),
    OpenGattServer,
    AddService(Uuid),
    CloseGattServer,
    StartAdvertising(AdvertiseData),
    StopAdvertising,
    CreateBond(DeviceAddress),
    FinishPairing(DeviceAddress),
}

struct SimState {
    radio_enabled: bool,
    advertising: bool,
    server: Option<ServerHandle>,
    next_handle: u32,
    pairing_variant: PairingVariant,
    fail_radio: bool,
    server_unavailable: bool,
    reject_finish: bool,
    advertise_rejection: Option<AdvertiseError>,
    advertise_failure: Option<AdvertiseError>,
    known: HashMap<DeviceAddress, RemoteDevice>,
    bonded: HashMap<DeviceAddress, RemoteDevice>,
    pending_pairing: HashMap<DeviceAddress, PairingVariant>,
    calls: Vec<(Instant, StackCall)>,
}

pub struct SimulatedStack {
    events: EventSender,
    state: Mutex<SimState>,
}

impl SimulatedStack {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            state: Mutex::new(SimState {
                radio_enabled: false,
                advertising: false,
                server: None,
                next_handle: 1,
                pairing_variant: PairingVariant::Consent,
                fail_radio: false,
                server_unavailable: false,
                reject_finish: false,
                advertise_rejection: None,
                advertise_failure: None,
                known: HashMap::new(),
                bonded: HashMap::new(),
                pending_pairing: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(state: &mut SimState, call: StackCall) {
        debug!("stack <- {:?}", call);
        state.calls.push((Instant::now(), call));
    }

    fn device(state: &SimState, address: DeviceAddress) -> RemoteDevice {
        state
            .known
            .get(&address)
            .cloned()
            .unwrap_or_else(|| RemoteDevice::new(address, None))
    }

    // --- inspection -------------------------------------------------------

    pub fn calls(&self) -> Vec<StackCall> {
        self.state().calls.iter().map(|(_, call)| call.clone()).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, StackCall)> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn is_advertising(&self) -> bool {
        self.state().advertising
    }

    pub fn is_bonded(&self, address: &DeviceAddress) -> bool {
        self.state().bonded.contains_key(address)
    }

    // --- configuration ----------------------------------------------------

    /// Set the power state without notifications, as found at process start
    pub fn set_radio_enabled(&self, enabled: bool) {
        self.state().radio_enabled = enabled;
    }

    pub fn set_pairing_variant(&self, variant: PairingVariant) {
        self.state().pairing_variant = variant;
    }

    pub fn add_bonded(&self, device: RemoteDevice) {
        let mut state = self.state();
        state.known.insert(device.address, device.clone());
        state.bonded.insert(device.address, device);
    }

    pub fn fail_radio_calls(&self, fail: bool) {
        self.state().fail_radio = fail;
    }

    pub fn set_server_unavailable(&self, unavailable: bool) {
        self.state().server_unavailable = unavailable;
    }

    /// Refuse consent confirmations, as a stack whose pairing already timed out would
    pub fn reject_finish_pairing(&self, reject: bool) {
        self.state().reject_finish = reject;
    }

    /// Refuse advertising synchronously
    pub fn reject_advertising(&self, error: Option<AdvertiseError>) {
        self.state().advertise_rejection = error;
    }

    /// Fail the next advertising start through the callback path
    pub fn fail_next_advertise(&self, error: AdvertiseError) {
        self.state().advertise_failure = Some(error);
    }

    // --- radio side effects -----------------------------------------------

    /// Power the radio down as if from outside (e.g. airplane mode)
    pub fn external_power_off(&self) {
        let mut state = self.state();
        Self::power_down(&mut state, &self.events);
    }

    /// Power the radio up as if from outside
    pub fn external_power_on(&self) {
        let mut state = self.state();
        Self::power_up(&mut state, &self.events);
    }

    fn power_up(state: &mut SimState, events: &EventSender) {
        if state.radio_enabled {
            return;
        }
        state.radio_enabled = true;
        notify(events, StackEvent::RadioStateChanged(RadioState::TurningOn));
        notify(events, StackEvent::RadioStateChanged(RadioState::On));
    }

    fn power_down(state: &mut SimState, events: &EventSender) {
        if !state.radio_enabled {
            return;
        }
        state.radio_enabled = false;
        state.advertising = false;
        state.server = None;
        state.pending_pairing.clear();
        notify(events, StackEvent::RadioStateChanged(RadioState::TurningOff));
        notify(events, StackEvent::RadioStateChanged(RadioState::Off));
    }

    fn start_pairing(state: &mut SimState, events: &EventSender, address: DeviceAddress) {
        let device = Self::device(state, address);
        let variant = state.pairing_variant;
        state.pending_pairing.insert(address, variant);

        notify(
            events,
            StackEvent::BondStateChanged {
                device: device.clone(),
                previous: RawBondState::None,
                current: RawBondState::Bonding,
                reason: None,
            },
        );
        let credential = matches!(
            variant,
            PairingVariant::DisplayPin | PairingVariant::DisplayPasskey
        )
        .then_some(DISPLAY_CREDENTIAL);
        notify(
            events,
            StackEvent::PairingRequested {
                device,
                variant,
                credential,
            },
        );
    }

    fn complete_pairing(state: &mut SimState, events: &EventSender, address: DeviceAddress) {
        let device = Self::device(state, address);
        state.pending_pairing.remove(&address);
        state.bonded.insert(address, device.clone());
        notify(events, StackEvent::Paired(device.clone()));
        notify(
            events,
            StackEvent::BondStateChanged {
                device,
                previous: RawBondState::Bonding,
                current: RawBondState::Bonded,
                reason: None,
            },
        );
    }

    // --- central side -----------------------------------------------------

    pub fn connect_central(&self, device: RemoteDevice) {
        self.state().known.insert(device.address, device.clone());
        notify(
            &self.events,
            StackEvent::ConnectionStateChanged {
                device: device.clone(),
                profile: GATT_SERVER_PROFILE,
                state: ProfileState::Connected,
            },
        );
        notify(
            &self.events,
            StackEvent::ServerConnectionStateChanged {
                device,
                status: 0,
                state: ProfileState::Connected,
            },
        );
    }

    pub fn disconnect_central(&self, address: DeviceAddress) {
        let device = {
            let mut state = self.state();
            state.pending_pairing.remove(&address);
            Self::device(&state, address)
        };
        notify(
            &self.events,
            StackEvent::ServerConnectionStateChanged {
                device: device.clone(),
                status: 0,
                state: ProfileState::Disconnected,
            },
        );
        notify(
            &self.events,
            StackEvent::ConnectionStateChanged {
                device,
                profile: GATT_SERVER_PROFILE,
                state: ProfileState::Disconnected,
            },
        );
    }

    /// A read of the encrypted characteristic. Succeeds on a bonded link;
    /// otherwise the stack refuses it and starts pairing on its own.
    pub fn read_encrypted_characteristic(&self, address: DeviceAddress) -> bool {
        let mut state = self.state();
        if state.bonded.contains_key(&address) {
            return true;
        }
        if !state.pending_pairing.contains_key(&address) {
            Self::start_pairing(&mut state, &self.events, address);
        }
        false
    }

    /// The remote confirmed a display-variant pairing
    pub fn remote_confirm(&self, address: DeviceAddress) {
        let mut state = self.state();
        if state.pending_pairing.contains_key(&address) {
            Self::complete_pairing(&mut state, &self.events, address);
        }
    }

    /// End the pending pairing with an error (timeout, cancel, ...)
    pub fn fail_pairing(&self, address: DeviceAddress, reason: BondFailureReason) {
        let device = {
            let mut state = self.state();
            state.pending_pairing.remove(&address);
            Self::device(&state, address)
        };
        notify(
            &self.events,
            StackEvent::PairingFailed {
                device: device.clone(),
                reason,
            },
        );
        notify(
            &self.events,
            StackEvent::BondStateChanged {
                device,
                previous: RawBondState::Bonding,
                current: RawBondState::None,
                reason: Some(reason),
            },
        );
    }
}

impl RadioStack for SimulatedStack {
    fn is_radio_enabled(&self) -> bool {
        self.state().radio_enabled
    }

    fn enable_radio(&self) -> Result<(), StackError> {
        let mut state = self.state();
        Self::record(&mut state, StackCall::EnableRadio);
        if state.fail_radio {
            return Err(StackError::Rejected { operation: "enable" });
        }
        Self::power_up(&mut state, &self.events);
        Ok(())
    }

    fn disable_radio(&self) -> Result<(), StackError> {
        let mut state = self.state();
        Self::record(&mut state, StackCall::DisableRadio);
        if state.fail_radio {
            return Err(StackError::Rejected {
                operation: "disable",
            });
        }
        Self::power_down(&mut state, &self.events);
        Ok(())
    }

    fn bonded_devices(&self) -> Vec<RemoteDevice> {
        let mut devices: Vec<_> = self.state().bonded.values().cloned().collect();
        devices.sort_by_key(|d| d.address);
        devices
    }

    fn set_io_capability(
        &self,
        transport: Transport,
        capability: IoCapability,
    ) -> Result<(), StackError> {
        let mut state = self.state();
        Self::record(&mut state, StackCall::SetIoCapability(transport, capability));
        Ok(())
    }

    fn set_device_name(&self, name: &str) -> Result<(), StackError> {
        let mut state = self.state();
        Self::record(&mut state, StackCall::SetDeviceName(name.to_string()));
        Ok(())
    }

    fn open_gatt_server(&self) -> Option<ServerHandle> {
        let mut state = self.state();
        Self::record(&mut state, StackCall::OpenGattServer);
        if state.server_unavailable || !state.radio_enabled {
            return None;
        }
        let handle = ServerHandle(state.next_handle);
        state.next_handle += 1;
        state.server = Some(handle);
        Some(handle)
    }

    fn add_service(
        &self,
        server: ServerHandle,
        service: &ServiceDescriptor,
    ) -> Result<(), StackError> {
        let mut state = self.state();
        Self::record(&mut state, StackCall::AddService(service.uuid));
        if state.server != Some(server) {
            return Err(StackError::Rejected {
                operation: "add_service",
            });
        }
        Ok(())
    }

    fn close_gatt_server(&self, server: ServerHandle) {
        let mut state = self.state();
        Self::record(&mut state, StackCall::CloseGattServer);
        if state.server == Some(server) {
            state.server = None;
        }
    }

    fn start_advertising(
        &self,
        _settings: &AdvertiseSettings,
        data: &AdvertiseData,
    ) -> Result<(), AdvertiseError> {
        let mut state = self.state();
        Self::record(&mut state, StackCall::StartAdvertising(data.clone()));
        if let Some(error) = state.advertise_rejection {
            return Err(error);
        }
        if !state.radio_enabled {
            return Err(AdvertiseError::InternalError);
        }
        if state.advertising {
            notify(
                &self.events,
                StackEvent::AdvertiseFailed(AdvertiseError::AlreadyStarted),
            );
        } else if let Some(error) = state.advertise_failure.take() {
            notify(&self.events, StackEvent::AdvertiseFailed(error));
        } else {
            state.advertising = true;
            notify(&self.events, StackEvent::AdvertiseStarted);
        }
        Ok(())
    }

    fn stop_advertising(&self) {
        let mut state = self.state();
        Self::record(&mut state, StackCall::StopAdvertising);
        state.advertising = false;
    }

    fn create_bond(&self, address: DeviceAddress) -> Result<(), StackError> {
        let mut state = self.state();
        Self::record(&mut state, StackCall::CreateBond(address));
        if !state.radio_enabled {
            return Err(StackError::RadioOff);
        }
        if state.bonded.contains_key(&address) {
            return Err(StackError::Rejected {
                operation: "create_bond",
            });
        }
        Self::start_pairing(&mut state, &self.events, address);
        Ok(())
    }

    fn finish_pairing(&self, address: DeviceAddress) -> Result<(), StackError> {
        let mut state = self.state();
        Self::record(&mut state, StackCall::FinishPairing(address));
        if state.reject_finish {
            return Err(StackError::Rejected {
                operation: "finish_pairing",
            });
        }
        match state.pending_pairing.get(&address) {
            Some(PairingVariant::Consent) => {
                Self::complete_pairing(&mut state, &self.events, address);
                Ok(())
            }
            _ => Err(StackError::Rejected {
                operation: "finish_pairing",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::PeripheralEvent;
    use crate::infrastructure::bluetooth::stack::event_channel;

    fn drain(rx: &mut crate::infrastructure::bluetooth::stack::EventReceiver) -> Vec<StackEvent> {
        let mut events = Vec::new();
        while let Ok(PeripheralEvent::Stack(event)) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_enable_emits_radio_transitions() {
        let (tx, mut rx) = event_channel();
        let stack = SimulatedStack::new(tx);

        stack.enable_radio().unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![
                StackEvent::RadioStateChanged(RadioState::TurningOn),
                StackEvent::RadioStateChanged(RadioState::On),
            ]
        );

        stack.enable_radio().unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_consent_pairing_completes_on_finish() {
        let (tx, mut rx) = event_channel();
        let stack = SimulatedStack::new(tx);
        stack.set_radio_enabled(true);
        let device = RemoteDevice::new("C0:FF:EE:00:00:01".parse().unwrap(), Some("Pixel"));

        stack.connect_central(device.clone());
        stack.create_bond(device.address).unwrap();
        let events = drain(&mut rx);
        assert!(events.contains(&StackEvent::PairingRequested {
            device: device.clone(),
            variant: PairingVariant::Consent,
            credential: None,
        }));

        stack.finish_pairing(device.address).unwrap();
        assert_eq!(drain(&mut rx)[0], StackEvent::Paired(device.clone()));
        assert!(stack.is_bonded(&device.address));
        assert!(stack.read_encrypted_characteristic(device.address));
    }

    #[test]
    fn test_finish_without_consent_request_is_rejected() {
        let (tx, _rx) = event_channel();
        let stack = SimulatedStack::new(tx);
        stack.set_radio_enabled(true);
        stack.set_pairing_variant(PairingVariant::Pin);
        let address: DeviceAddress = "C0:FF:EE:00:00:01".parse().unwrap();

        stack.create_bond(address).unwrap();
        assert!(stack.finish_pairing(address).is_err());
        assert!(!stack.is_bonded(&address));
    }

    #[test]
    fn test_unbonded_read_triggers_pairing() {
        let (tx, mut rx) = event_channel();
        let stack = SimulatedStack::new(tx);
        stack.set_radio_enabled(true);
        stack.set_pairing_variant(PairingVariant::DisplayPin);
        let address: DeviceAddress = "C0:FF:EE:00:00:01".parse().unwrap();

        assert!(!stack.read_encrypted_characteristic(address));
        assert!(!stack.read_encrypted_characteristic(address));
        let requests: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, StackEvent::PairingRequested { .. }))
            .collect();
        assert_eq!(requests.len(), 1);

        stack.remote_confirm(address);
        assert!(stack.read_encrypted_characteristic(address));
    }
}
