//! Error taxonomy
//!
//! Every failure the peripheral can run into is terminal to the attempt, never
//! to the process. The coordinator logs these and returns to an idle state.

use crate::domain::models::{AdvertiseError, BondFailureReason, DeviceAddress, PairingVariant};
use thiserror::Error;

/// Failures surfaced by the peripheral core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeripheralError {
    /// The stack rejected an enable/disable request
    #[error("radio unavailable: {operation} was rejected")]
    RadioUnavailable { operation: &'static str },

    /// Advertising could not be started
    #[error("advertising failed: {reason}")]
    AdvertiseFailure { reason: AdvertiseError },

    /// Opening the GATT server (or registering its service) failed
    #[error("GATT server unavailable")]
    ServerUnavailable,

    /// The GATT server is already open for this radio session
    #[error("GATT server already open")]
    ServerAlreadyOpen,

    /// A bonding attempt ended without a bond
    #[error("bonding with {address} failed: {reason}")]
    BondFailure {
        address: DeviceAddress,
        reason: BondFailureReason,
    },

    /// The negotiated pairing variant needs input this device cannot give
    #[error("pairing variant {variant} for {address} is not handled")]
    UnhandledPairingVariant {
        address: DeviceAddress,
        variant: PairingVariant,
    },
}

impl From<AdvertiseError> for PeripheralError {
    fn from(reason: AdvertiseError) -> Self {
        Self::AdvertiseFailure { reason }
    }
}

/// Errors raised by the pairing state machine on inconsistent notifications
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairingError {
    #[error("no pairing session in flight for {address}")]
    NoSession { address: DeviceAddress },

    #[error("{address} reported paired before consent was confirmed")]
    ConsentNotConfirmed { address: DeviceAddress },
}

/// Rejection of an outbound call by the radio stack
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    #[error("radio stack rejected {operation}")]
    Rejected { operation: &'static str },

    #[error("radio is not powered")]
    RadioOff,
}
