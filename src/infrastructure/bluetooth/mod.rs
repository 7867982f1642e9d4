//! Bluetooth Module
//!
//! Peripheral-role control logic: advertise, accept a central, bond with it and
//! serve one encrypted characteristic.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    PeripheralService                     │
//! │  (Lifecycle coordinator - sole consumer of the events)   │
//! └──────┬──────────────┬──────────────┬──────────────┬──────┘
//!        │              │              │              │
//!        ▼              ▼              ▼              ▼
//! ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌────────────┐
//! │   Radio    │ │ GattServer │ │ Advertiser │ │  Pairing   │
//! │            │ │            │ │            │ │  (domain)  │
//! │ - power    │ │ - service  │ │ - start    │ │ - bond     │
//! │   cycle    │ │ - links    │ │ - restart  │ │   records  │
//! └─────┬──────┘ └─────┬──────┘ └─────┬──────┘ └────────────┘
//!       └──────────────┼──────────────┘
//!                      ▼
//!               ┌────────────┐   StackEvent    ┌──────────────────┐
//!               │ RadioStack │ ──────────────▶ │  event channel   │
//!               └────────────┘                 └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Service/characteristic UUIDs and advertisement parameters
//! - [`stack`] - The radio stack contract and the event channel
//! - [`radio`] - Radio power controller
//! - [`advertiser`] - Advertisement start/stop/restart
//! - [`gatt_server`] - GATT server and per-device connection state
//! - [`service`] - Main service coordinator
//! - [`simulated`] - In-process radio stack

pub mod advertiser;
pub mod gatt_server;
pub mod protocol;
pub mod radio;
pub mod service;
pub mod simulated;
pub mod stack;

// Re-export main service for convenience
pub use service::{PeripheralConfig, PeripheralService};
