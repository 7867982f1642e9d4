//! GATT Server
//!
//! Hosts the service definition and keeps the per-device connection state.
//! Connection notifications are reduced to the two transitions the rest of the
//! peripheral cares about; repeats and intermediate states are ignored.

use crate::domain::models::{
    BondingPolicy, ConnectionState, DeviceAddress, ProfileState, RemoteDevice,
};
use crate::error::PeripheralError;
use crate::infrastructure::bluetooth::protocol::ServiceDescriptor;
use crate::infrastructure::bluetooth::stack::{RadioStack, ServerHandle};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTransition {
    /// A central connected; `request_bond` is set under the eager policy
    Connected { request_bond: bool },
    /// A connected central went away
    Disconnected,
    Ignored,
}

pub struct GattServer {
    stack: Arc<dyn RadioStack>,
    policy: BondingPolicy,
    service: ServiceDescriptor,
    handle: Option<ServerHandle>,
    connections: HashMap<DeviceAddress, ConnectionState>,
}

impl GattServer {
    pub(crate) fn new(
        stack: Arc<dyn RadioStack>,
        policy: BondingPolicy,
        service: ServiceDescriptor,
    ) -> Self {
        Self {
            stack,
            policy,
            service,
            handle: None,
            connections: HashMap::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Open the server and register the service
    pub fn open(&mut self) -> Result<ServerHandle, PeripheralError> {
        if self.handle.is_some() {
            return Err(PeripheralError::ServerAlreadyOpen);
        }

        let handle = self
            .stack
            .open_gatt_server()
            .ok_or(PeripheralError::ServerUnavailable)?;

        if let Err(e) = self.stack.add_service(handle, &self.service) {
            error!("Unable to register service {}: {}", self.service.uuid, e);
            self.stack.close_gatt_server(handle);
            return Err(PeripheralError::ServerUnavailable);
        }

        info!("GATT server open, service {} registered", self.service.uuid);
        self.handle = Some(handle);
        Ok(handle)
    }

    /// Close the server and forget every connection
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!("Closing GATT server {:?}", handle);
            self.stack.close_gatt_server(handle);
        }
        self.connections.clear();
    }

    pub fn connection_state(&self, address: &DeviceAddress) -> ConnectionState {
        self.connections.get(address).copied().unwrap_or_default()
    }

    pub fn connected_devices(&self) -> Vec<DeviceAddress> {
        self.connections
            .iter()
            .filter(|(_, state)| **state == ConnectionState::Connected)
            .map(|(address, _)| *address)
            .collect()
    }

    pub fn on_connection_state_changed(
        &mut self,
        device: &RemoteDevice,
        status: i32,
        state: ProfileState,
    ) -> ConnectionTransition {
        match state {
            ProfileState::Connected => {
                let previous = self.connections.insert(device.address, ConnectionState::Connected);
                if previous == Some(ConnectionState::Connected) {
                    debug!("Duplicate connect for {}", device);
                    return ConnectionTransition::Ignored;
                }
                info!("BLE device connected: {} (status {})", device, status);
                ConnectionTransition::Connected {
                    request_bond: self.policy.is_eager(),
                }
            }
            // A failed attempt can be reported as Disconnected without a
            // Connected first; only a repeat of the same Disconnected is dropped.
            ProfileState::Disconnected => {
                let previous = self
                    .connections
                    .insert(device.address, ConnectionState::Disconnected);
                match previous {
                    Some(ConnectionState::Disconnected) => {
                        debug!("Duplicate disconnect for {}", device);
                        ConnectionTransition::Ignored
                    }
                    Some(ConnectionState::Connected) => {
                        info!("BLE device disconnected: {} (status {})", device, status);
                        ConnectionTransition::Disconnected
                    }
                    None => {
                        info!(
                            "BLE device disconnected without a connection: {} (status {})",
                            device, status
                        );
                        ConnectionTransition::Disconnected
                    }
                }
            }
            other => {
                debug!("Ignoring server connection state {:?} for {}", other, device);
                ConnectionTransition::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::simulated::{SimulatedStack, StackCall};
    use crate::infrastructure::bluetooth::stack::event_channel;

    fn central() -> RemoteDevice {
        RemoteDevice::new("C0:FF:EE:00:00:01".parse().unwrap(), Some("Pixel"))
    }

    fn server(stack: Arc<SimulatedStack>, policy: BondingPolicy) -> GattServer {
        stack.set_radio_enabled(true);
        GattServer::new(stack, policy, ServiceDescriptor::bonding_demo())
    }

    #[test]
    fn test_open_registers_service_once() {
        let (tx, _rx) = event_channel();
        let stack = Arc::new(SimulatedStack::new(tx));
        let mut server = server(stack.clone(), BondingPolicy::Eager);

        assert!(server.open().is_ok());
        assert_eq!(server.open(), Err(PeripheralError::ServerAlreadyOpen));
        assert_eq!(
            stack.calls(),
            vec![
                StackCall::OpenGattServer,
                StackCall::AddService(ServiceDescriptor::bonding_demo().uuid),
            ]
        );
    }

    #[test]
    fn test_open_without_handle_is_unavailable() {
        let (tx, _rx) = event_channel();
        let stack = Arc::new(SimulatedStack::new(tx));
        stack.set_server_unavailable(true);
        let mut server = server(stack, BondingPolicy::Eager);

        assert_eq!(server.open(), Err(PeripheralError::ServerUnavailable));
        assert!(!server.is_open());
    }

    #[test]
    fn test_eager_and_lazy_connect() {
        let (tx, _rx) = event_channel();
        let stack = Arc::new(SimulatedStack::new(tx));
        let device = central();

        let mut eager = server(stack.clone(), BondingPolicy::Eager);
        assert_eq!(
            eager.on_connection_state_changed(&device, 0, ProfileState::Connected),
            ConnectionTransition::Connected { request_bond: true }
        );

        let mut lazy = server(stack, BondingPolicy::Lazy);
        assert_eq!(
            lazy.on_connection_state_changed(&device, 0, ProfileState::Connected),
            ConnectionTransition::Connected {
                request_bond: false
            }
        );
    }

    #[test]
    fn test_repeated_notifications_collapse() {
        let (tx, _rx) = event_channel();
        let stack = Arc::new(SimulatedStack::new(tx));
        let mut server = server(stack, BondingPolicy::Eager);
        let device = central();

        server.on_connection_state_changed(&device, 0, ProfileState::Connected);
        assert_eq!(
            server.on_connection_state_changed(&device, 0, ProfileState::Connected),
            ConnectionTransition::Ignored
        );
        assert_eq!(
            server.on_connection_state_changed(&device, 0, ProfileState::Connecting),
            ConnectionTransition::Ignored
        );
        assert_eq!(server.connection_state(&device.address), ConnectionState::Connected);

        assert_eq!(
            server.on_connection_state_changed(&device, 19, ProfileState::Disconnected),
            ConnectionTransition::Disconnected
        );
        assert_eq!(
            server.on_connection_state_changed(&device, 19, ProfileState::Disconnected),
            ConnectionTransition::Ignored
        );
        assert_eq!(
            server.connection_state(&device.address),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_disconnect_without_connect_counts_once() {
        let (tx, _rx) = event_channel();
        let stack = Arc::new(SimulatedStack::new(tx));
        let mut server = server(stack, BondingPolicy::Eager);
        let device = central();

        assert_eq!(
            server.on_connection_state_changed(&device, 133, ProfileState::Disconnected),
            ConnectionTransition::Disconnected
        );
        assert_eq!(
            server.on_connection_state_changed(&device, 133, ProfileState::Disconnected),
            ConnectionTransition::Ignored
        );
        assert!(server.connected_devices().is_empty());

        // the next attempt connects normally
        assert_eq!(
            server.on_connection_state_changed(&device, 0, ProfileState::Connected),
            ConnectionTransition::Connected { request_bond: true }
        );
        assert_eq!(server.connected_devices(), vec![device.address]);
    }

    #[test]
    fn test_close_forgets_connections() {
        let (tx, _rx) = event_channel();
        let stack = Arc::new(SimulatedStack::new(tx));
        let mut server = server(stack.clone(), BondingPolicy::Eager);
        let device = central();

        server.open().unwrap();
        server.on_connection_state_changed(&device, 0, ProfileState::Connected);
        server.close();

        assert!(!server.is_open());
        assert!(server.connected_devices().is_empty());
        assert_eq!(stack.calls().last(), Some(&StackCall::CloseGattServer));
    }
}
