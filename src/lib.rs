//! BLE peripheral that advertises one service, bonds with the central that
//! connects to it and serves a characteristic readable only over the bonded,
//! encrypted link.
//!
//! The radio stack is a collaborator behind [`RadioStack`]; its notifications
//! arrive as [`StackEvent`]s on a single channel consumed by
//! [`PeripheralService`].

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::models::{PeripheralEvent, StackEvent};
pub use error::PeripheralError;
pub use infrastructure::bluetooth::stack::{event_channel, RadioStack};
pub use infrastructure::bluetooth::{PeripheralConfig, PeripheralService};
