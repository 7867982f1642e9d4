//! Peripheral Service
//!
//! Connection lifecycle coordinator. Owns the radio controller, GATT server,
//! advertiser and pairing state machine, and is the only consumer of the event
//! channel, so all per-device state is mutated from one place.
//!
//! Once the radio reports On, the happy path runs exactly once for that On
//! period, strictly in order:
//! 1. I/O capability set to "no input, no output" (classic and LE)
//! 2. GATT server opened with the service registered
//! 3. advertising started after a settle delay
//!
//! A disconnect restarts advertising; a radio Off tears everything down so the
//! next On runs the happy path again.

use crate::domain::models::{
    BondingPolicy, IoCapability, PairingVariant, PeripheralEvent, ProfileState, RadioState,
    RemoteDevice, StackEvent, TimerEvent, Transport,
};
use crate::domain::pairing::{PairingAction, PairingStateMachine};
use crate::domain::settings::{Settings, TimingSettings};
use crate::error::PeripheralError;
use crate::infrastructure::bluetooth::advertiser::Advertiser;
use crate::infrastructure::bluetooth::gatt_server::{ConnectionTransition, GattServer};
use crate::infrastructure::bluetooth::protocol::ServiceDescriptor;
use crate::infrastructure::bluetooth::radio::{RadioPowerController, RadioTransition};
use crate::infrastructure::bluetooth::stack::{EventReceiver, EventSender, RadioStack};
use crate::infrastructure::scheduler::Scheduler;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Construction-time configuration of the peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralConfig {
    pub device_name: String,
    pub bonding_policy: BondingPolicy,
    pub timings: TimingSettings,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for PeripheralConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            device_name: settings.device_name.clone(),
            bonding_policy: settings.bonding_policy,
            timings: settings.timings,
        }
    }
}

pub struct PeripheralService {
    stack: Arc<dyn RadioStack>,
    scheduler: Scheduler,
    config: PeripheralConfig,
    radio: RadioPowerController,
    gatt_server: GattServer,
    advertiser: Advertiser,
    pairing: PairingStateMachine,
    // One epoch per On period; stale advertising timers carry an older one.
    epoch: u64,
    happy_path_ran: bool,
}

impl PeripheralService {
    pub fn new(stack: Arc<dyn RadioStack>, events: EventSender, config: PeripheralConfig) -> Self {
        let scheduler = Scheduler::new(events);
        let service = ServiceDescriptor::bonding_demo();
        let timings = config.timings;

        Self {
            radio: RadioPowerController::new(
                stack.clone(),
                scheduler.clone(),
                timings.radio_settle(),
            ),
            advertiser: Advertiser::new(
                stack.clone(),
                scheduler.clone(),
                &config.device_name,
                service.uuid,
                timings.restart_stop_delay(),
                timings.restart_start_delay(),
            ),
            gatt_server: GattServer::new(stack.clone(), config.bonding_policy, service),
            pairing: PairingStateMachine::new(),
            stack,
            scheduler,
            config,
            epoch: 0,
            happy_path_ran: false,
        }
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    pub fn radio(&self) -> &RadioPowerController {
        &self.radio
    }

    pub fn gatt_server(&self) -> &GattServer {
        &self.gatt_server
    }

    pub fn advertiser(&self) -> &Advertiser {
        &self.advertiser
    }

    pub fn pairing(&self) -> &PairingStateMachine {
        &self.pairing
    }

    /// Power cycle the radio; everything else follows from its notifications
    pub fn start(&mut self) {
        info!(
            "Starting BLE peripheral {:?} ({:?} bonding)",
            self.config.device_name, self.config.bonding_policy
        );
        if let Err(e) = self.radio.power_cycle() {
            error!("{}", e);
        }
    }

    /// Start, then dispatch events until shutdown or until every sender is gone
    pub async fn run(mut self, mut events: EventReceiver) {
        self.start();
        while let Some(event) = events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        self.shutdown();
    }

    /// Stop advertising and close the server
    pub fn shutdown(&mut self) {
        info!("Shutting down BLE peripheral");
        self.advertiser.stop();
        self.advertiser.reset();
        self.gatt_server.close();
    }

    /// Dispatch one event. Returns false on shutdown.
    pub fn handle_event(&mut self, event: PeripheralEvent) -> bool {
        match event {
            PeripheralEvent::Stack(event) => self.handle_stack_event(event),
            PeripheralEvent::Timer(event) => self.handle_timer_event(event),
            PeripheralEvent::Shutdown => return false,
        }
        true
    }

    fn handle_stack_event(&mut self, event: StackEvent) {
        match event {
            StackEvent::RadioStateChanged(state) => self.on_radio_state_changed(state),
            StackEvent::DeviceFound(device) => {
                info!("Device found: {}", device);
            }
            StackEvent::BondStateChanged {
                device,
                previous,
                current,
                reason,
            } => {
                debug!(
                    "Bond state for {}: {:?} -> {:?} ({:?})",
                    device, previous, current, reason
                );
                match self.pairing.on_bond_state_changed(&device, current, reason) {
                    Ok(Some(failure)) => warn!("{}", failure),
                    Ok(None) => {}
                    Err(e) => error!("{}", e),
                }
            }
            StackEvent::PairingRequested {
                device,
                variant,
                credential,
            } => self.on_pairing_requested(device, variant, credential),
            StackEvent::Paired(device) => match self.pairing.on_paired(&device) {
                Ok(true) => info!("Paired: {}", device),
                Ok(false) => debug!("Already bonded: {}", device),
                Err(e) => error!("{}", e),
            },
            StackEvent::PairingFailed { device, reason } => {
                info!("Pairing error: {} Error: {}", device, reason);
                if let Some(failure) = self.pairing.on_pairing_error(&device, reason) {
                    warn!("{}", failure);
                }
            }
            StackEvent::ConnectionStateChanged {
                device,
                profile,
                state,
            } => match state {
                ProfileState::Connected => info!("Connected: {} (profile {})", device, profile),
                ProfileState::Disconnected => {
                    info!("Disconnected: {} (profile {})", device, profile)
                }
                other => debug!("{:?}: {} (profile {})", other, device, profile),
            },
            StackEvent::ServerConnectionStateChanged {
                device,
                status,
                state,
            } => self.on_server_connection_state_changed(device, status, state),
            StackEvent::AdvertiseStarted => debug!("BLE Advertise Started"),
            StackEvent::AdvertiseFailed(reason) => {
                self.advertiser.on_start_failed(reason);
                error!("{}", PeripheralError::from(reason));
            }
        }
    }

    fn handle_timer_event(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::EnableRadio => {
                if let Err(e) = self.radio.enable() {
                    error!("{}", e);
                }
            }
            TimerEvent::StartAdvertising { epoch } => self.start_advertising(epoch),
            TimerEvent::RestartStop { restart_id } => self.advertiser.on_restart_stop(restart_id),
            TimerEvent::RestartStart { restart_id } => {
                if let Some(Err(e)) = self.advertiser.on_restart_start(restart_id) {
                    error!("{}", PeripheralError::from(e));
                }
            }
        }
    }

    fn on_radio_state_changed(&mut self, state: RadioState) {
        debug!("Radio state: {:?}", state);
        match self.radio.on_state_changed(state) {
            RadioTransition::PoweredOn => {
                info!("BT Adapter is on");
                self.run_happy_path();
            }
            RadioTransition::PoweredOff => {
                info!("BT Adapter is going off");
                self.tear_down();
            }
            RadioTransition::Unchanged => {}
        }
    }

    fn run_happy_path(&mut self) {
        if self.happy_path_ran {
            debug!("Peripheral already set up for this radio session");
            return;
        }
        self.happy_path_ran = true;
        self.epoch += 1;

        self.list_bonded_devices();

        for transport in [Transport::LowEnergy, Transport::Classic] {
            if let Err(e) = self
                .stack
                .set_io_capability(transport, IoCapability::NoInputNoOutput)
            {
                error!("Could not set {:?} I/O capability: {}", transport, e);
            }
        }

        if let Err(e) = self.gatt_server.open() {
            error!("Unable to create GATT server: {}", e);
            return;
        }

        self.scheduler.schedule(
            self.config.timings.advertise_delay(),
            TimerEvent::StartAdvertising { epoch: self.epoch },
        );
    }

    fn list_bonded_devices(&mut self) {
        info!("Bonded devices:");
        for device in self.stack.bonded_devices() {
            info!(
                "addr: {}, name: {}",
                device.address,
                device.name.as_deref().unwrap_or("-")
            );
            self.pairing.restore_bonded(&device);
        }
    }

    fn start_advertising(&mut self, epoch: u64) {
        if epoch != self.epoch || !self.happy_path_ran || !self.gatt_server.is_open() {
            debug!("Dropping advertising start from radio session {}", epoch);
            return;
        }
        if let Err(e) = self.advertiser.start() {
            error!("{}", PeripheralError::from(e));
        }
    }

    fn tear_down(&mut self) {
        self.happy_path_ran = false;
        self.advertiser.reset();
        self.gatt_server.close();
        self.pairing.clear_sessions();
    }

    fn on_server_connection_state_changed(
        &mut self,
        device: RemoteDevice,
        status: i32,
        state: ProfileState,
    ) {
        match self
            .gatt_server
            .on_connection_state_changed(&device, status, state)
        {
            ConnectionTransition::Connected { request_bond } => {
                if request_bond {
                    self.request_bond(&device);
                }
            }
            ConnectionTransition::Disconnected => {
                if let Some(session) = self.pairing.on_disconnected(&device.address) {
                    info!(
                        "Pairing with {} ({}) cancelled by disconnect",
                        device, session.variant
                    );
                }
                self.advertiser.restart();
            }
            ConnectionTransition::Ignored => {}
        }
    }

    fn request_bond(&mut self, device: &RemoteDevice) {
        if !self.pairing.begin_bonding(device) {
            debug!("No bond request needed for {}", device);
            return;
        }
        info!("Requesting bond with {}", device);
        if let Err(e) = self.stack.create_bond(device.address) {
            warn!("Bond request for {} rejected: {}", device, e);
            self.pairing.abort_bonding(&device.address);
        }
    }

    fn on_pairing_requested(
        &mut self,
        device: RemoteDevice,
        variant: PairingVariant,
        credential: Option<u32>,
    ) {
        info!("Pairing initiated: {} ({})", device, variant);

        match self.pairing.on_pairing_request(device, variant, credential) {
            PairingAction::ConfirmConsent(device) => {
                info!("Consent");
                match self.stack.finish_pairing(device.address) {
                    Ok(()) => {
                        if let Err(e) = self.pairing.confirm_consent(&device.address) {
                            error!("{}", e);
                        }
                    }
                    Err(e) => warn!("Could not confirm pairing with {}: {}", device, e),
                }
            }
            PairingAction::DisplayCredential {
                variant,
                credential,
                ..
            } => match credential {
                Some(credential) => info!("{}: {:06}", variant, credential),
                None => warn!("{} requested without a credential", variant),
            },
            PairingAction::Unhandled(e) => warn!("{}", e),
        }
    }
}
