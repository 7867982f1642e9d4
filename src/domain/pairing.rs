//! Pairing / Bonding State Machine
//!
//! Tracks one bond record per device address and at most one pairing session
//! per device. The machine never talks to the radio stack itself: it returns a
//! [`PairingAction`] that the coordinator carries out, and is told about the
//! result through the `on_*` methods.
//!
//! ```text
//! NotBonded ──request──▶ Bonding ──paired──▶ Bonded
//!     ▲                     │
//!     └──── disconnect ─────┤
//!                           └──error──▶ BondFailed(reason)
//! ```

use crate::domain::models::{
    BondFailureReason, BondState, DeviceAddress, PairingVariant, RawBondState, RemoteDevice,
};
use crate::error::{PairingError, PeripheralError};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// One in-flight pairing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingSession {
    pub device: RemoteDevice,
    pub variant: PairingVariant,
    /// PIN or passkey handed over by the stack, if the variant has one
    pub credential: Option<u32>,
    consent_confirmed: bool,
}

impl PairingSession {
    fn new(device: RemoteDevice, variant: PairingVariant, credential: Option<u32>) -> Self {
        Self {
            device,
            variant,
            credential,
            consent_confirmed: false,
        }
    }

    pub fn consent_confirmed(&self) -> bool {
        self.consent_confirmed
    }
}

/// What the coordinator must do in response to a pairing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingAction {
    /// Confirm the pairing with the stack, then report back via `confirm_consent`
    ConfirmConsent(RemoteDevice),
    /// Show the credential out of band; the remote side drives confirmation
    DisplayCredential {
        device: RemoteDevice,
        variant: PairingVariant,
        credential: Option<u32>,
    },
    /// Nothing can resolve this variant locally; the attempt will time out
    Unhandled(PeripheralError),
}

#[derive(Debug, Default)]
pub struct PairingStateMachine {
    records: HashMap<DeviceAddress, BondState>,
    sessions: HashMap<DeviceAddress, PairingSession>,
}

impl PairingStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bond_state(&self, address: &DeviceAddress) -> BondState {
        self.records.get(address).copied().unwrap_or_default()
    }

    pub fn session(&self, address: &DeviceAddress) -> Option<&PairingSession> {
        self.sessions.get(address)
    }

    /// Seed the mirror with a bond the stack already holds
    pub fn restore_bonded(&mut self, device: &RemoteDevice) {
        self.records.insert(device.address, BondState::Bonded);
    }

    /// Mark a bond request as issued. Returns false when the device is already
    /// bonding or bonded and no new request should go out.
    pub fn begin_bonding(&mut self, device: &RemoteDevice) -> bool {
        match self.bond_state(&device.address) {
            BondState::Bonding | BondState::Bonded => false,
            BondState::NotBonded | BondState::BondFailed(_) => {
                self.records.insert(device.address, BondState::Bonding);
                true
            }
        }
    }

    /// Undo `begin_bonding` when the stack refused to start the bond
    pub fn abort_bonding(&mut self, address: &DeviceAddress) {
        if self.bond_state(address) == BondState::Bonding && !self.sessions.contains_key(address) {
            self.records.insert(*address, BondState::NotBonded);
        }
    }

    pub fn on_pairing_request(
        &mut self,
        device: RemoteDevice,
        variant: PairingVariant,
        credential: Option<u32>,
    ) -> PairingAction {
        let address = device.address;
        self.records.insert(address, BondState::Bonding);

        let session = PairingSession::new(device.clone(), variant, credential);
        if let Some(stale) = self.sessions.insert(address, session) {
            debug!(
                "Replacing pairing session for {} ({})",
                stale.device, stale.variant
            );
        }

        match variant {
            PairingVariant::Consent => PairingAction::ConfirmConsent(device),
            PairingVariant::DisplayPin | PairingVariant::DisplayPasskey => {
                PairingAction::DisplayCredential {
                    device,
                    variant,
                    credential,
                }
            }
            PairingVariant::Pin | PairingVariant::PasskeyConfirmation | PairingVariant::Unknown(_) => {
                PairingAction::Unhandled(PeripheralError::UnhandledPairingVariant {
                    address,
                    variant,
                })
            }
        }
    }

    /// Record that the stack accepted our consent confirmation
    pub fn confirm_consent(&mut self, address: &DeviceAddress) -> Result<(), PairingError> {
        let session = self
            .sessions
            .get_mut(address)
            .ok_or(PairingError::NoSession { address: *address })?;
        session.consent_confirmed = true;
        Ok(())
    }

    /// Pairing completed. Returns false for a duplicate notification.
    pub fn on_paired(&mut self, device: &RemoteDevice) -> Result<bool, PairingError> {
        let address = device.address;
        if let Some(session) = self.sessions.get(&address) {
            if session.variant == PairingVariant::Consent && !session.consent_confirmed {
                return Err(PairingError::ConsentNotConfirmed { address });
            }
        }

        self.sessions.remove(&address);
        let previous = self.records.insert(address, BondState::Bonded);
        Ok(previous != Some(BondState::Bonded))
    }

    /// Pairing failed. Returns `None` for a repeated error or one that arrives
    /// after the device is already bonded.
    ///
    /// The error may land after the disconnect that cancelled the session, so
    /// a missing session alone does not make it stale.
    pub fn on_pairing_error(
        &mut self,
        device: &RemoteDevice,
        reason: BondFailureReason,
    ) -> Option<PeripheralError> {
        let address = device.address;
        let had_session = self.sessions.remove(&address).is_some();
        if !had_session
            && matches!(
                self.bond_state(&address),
                BondState::Bonded | BondState::BondFailed(_)
            )
        {
            return None;
        }

        self.records.insert(address, BondState::BondFailed(reason));
        Some(PeripheralError::BondFailure { address, reason })
    }

    /// Mirror a bond-state broadcast. Returns a failure when this broadcast is
    /// the one that ended an attempt.
    pub fn on_bond_state_changed(
        &mut self,
        device: &RemoteDevice,
        current: RawBondState,
        reason: Option<BondFailureReason>,
    ) -> Result<Option<PeripheralError>, PairingError> {
        let address = device.address;
        match current {
            RawBondState::Bonding => {
                if self.bond_state(&address) != BondState::Bonding {
                    self.records.insert(address, BondState::Bonding);
                }
                Ok(None)
            }
            RawBondState::Bonded => {
                if self.on_paired(device)? {
                    info!("Bond established with {}", device);
                }
                Ok(None)
            }
            RawBondState::None => match self.bond_state(&address) {
                BondState::Bonding => Ok(self.on_pairing_error(
                    device,
                    reason.unwrap_or(BondFailureReason::Unknown(0)),
                )),
                BondState::Bonded => {
                    info!("Bond with {} removed", device);
                    self.records.insert(address, BondState::NotBonded);
                    Ok(None)
                }
                // a failure broadcast that trails the disconnect
                BondState::NotBonded => Ok(reason.and_then(|r| self.on_pairing_error(device, r))),
                BondState::BondFailed(_) => Ok(None),
            },
            RawBondState::Unknown(code) => {
                warn!("Ignoring unknown bond state {} for {}", code, device);
                Ok(None)
            }
        }
    }

    /// A disconnect cancels whatever pairing was in flight for the device
    pub fn on_disconnected(&mut self, address: &DeviceAddress) -> Option<PairingSession> {
        let session = self.sessions.remove(address);
        if self.bond_state(address) == BondState::Bonding {
            self.records.insert(*address, BondState::NotBonded);
        }
        session
    }

    /// Drop every in-flight session, e.g. when the radio goes down
    pub fn clear_sessions(&mut self) {
        let addresses: Vec<_> = self.sessions.keys().copied().collect();
        for address in addresses {
            self.on_disconnected(&address);
        }
        for state in self.records.values_mut() {
            if *state == BondState::Bonding {
                *state = BondState::NotBonded;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn central() -> RemoteDevice {
        RemoteDevice::new("C0:FF:EE:00:00:01".parse().unwrap(), Some("Pixel"))
    }

    #[test]
    fn test_consent_requires_confirmation_before_bonded() {
        let mut machine = PairingStateMachine::new();
        let device = central();

        let action = machine.on_pairing_request(device.clone(), PairingVariant::Consent, None);
        assert_eq!(action, PairingAction::ConfirmConsent(device.clone()));
        assert_eq!(machine.bond_state(&device.address), BondState::Bonding);

        assert_eq!(
            machine.on_paired(&device),
            Err(PairingError::ConsentNotConfirmed {
                address: device.address
            })
        );
        assert_eq!(machine.bond_state(&device.address), BondState::Bonding);

        machine.confirm_consent(&device.address).unwrap();
        assert_eq!(machine.on_paired(&device), Ok(true));
        assert_eq!(machine.bond_state(&device.address), BondState::Bonded);
        assert!(machine.session(&device.address).is_none());
    }

    #[test]
    fn test_display_variants_surface_credential() {
        let mut machine = PairingStateMachine::new();
        let device = central();

        let action =
            machine.on_pairing_request(device.clone(), PairingVariant::DisplayPasskey, Some(123456));
        assert_eq!(
            action,
            PairingAction::DisplayCredential {
                device: device.clone(),
                variant: PairingVariant::DisplayPasskey,
                credential: Some(123456),
            }
        );
        // the remote side confirms, so no local consent is needed
        assert_eq!(machine.on_paired(&device), Ok(true));
    }

    #[test]
    fn test_pin_and_passkey_confirmation_are_unhandled() {
        let mut machine = PairingStateMachine::new();
        let device = central();

        for variant in [PairingVariant::Pin, PairingVariant::PasskeyConfirmation] {
            let action = machine.on_pairing_request(device.clone(), variant, None);
            assert_eq!(
                action,
                PairingAction::Unhandled(PeripheralError::UnhandledPairingVariant {
                    address: device.address,
                    variant,
                })
            );
        }
        assert_eq!(
            machine.session(&device.address).map(|s| s.variant),
            Some(PairingVariant::PasskeyConfirmation)
        );
    }

    #[test]
    fn test_timeout_fails_bond_and_allows_fresh_session() {
        let mut machine = PairingStateMachine::new();
        let device = central();

        machine.on_pairing_request(device.clone(), PairingVariant::Pin, None);
        let error = machine.on_pairing_error(&device, BondFailureReason::AuthTimeout);
        assert_eq!(
            error,
            Some(PeripheralError::BondFailure {
                address: device.address,
                reason: BondFailureReason::AuthTimeout,
            })
        );
        assert_eq!(
            machine.bond_state(&device.address),
            BondState::BondFailed(BondFailureReason::AuthTimeout)
        );

        // duplicate error is collapsed
        assert_eq!(
            machine.on_pairing_error(&device, BondFailureReason::AuthTimeout),
            None
        );

        assert!(machine.begin_bonding(&device));
        machine.on_pairing_request(device.clone(), PairingVariant::Consent, None);
        let session = machine.session(&device.address).unwrap();
        assert_eq!(session.variant, PairingVariant::Consent);
        assert!(!session.consent_confirmed());
    }

    #[test]
    fn test_begin_bonding_is_not_repeated() {
        let mut machine = PairingStateMachine::new();
        let device = central();

        assert!(machine.begin_bonding(&device));
        assert!(!machine.begin_bonding(&device));

        machine.abort_bonding(&device.address);
        assert_eq!(machine.bond_state(&device.address), BondState::NotBonded);

        machine.restore_bonded(&device);
        assert!(!machine.begin_bonding(&device));
    }

    #[test]
    fn test_disconnect_cancels_session() {
        let mut machine = PairingStateMachine::new();
        let device = central();

        machine.on_pairing_request(device.clone(), PairingVariant::Consent, None);
        let cancelled = machine.on_disconnected(&device.address);
        assert_eq!(cancelled.map(|s| s.variant), Some(PairingVariant::Consent));
        assert_eq!(machine.bond_state(&device.address), BondState::NotBonded);
        assert!(machine.on_disconnected(&device.address).is_none());
    }

    #[test]
    fn test_error_after_disconnect_still_fails_bond() {
        let mut machine = PairingStateMachine::new();
        let device = central();

        machine.on_pairing_request(device.clone(), PairingVariant::Pin, None);
        machine.on_disconnected(&device.address);
        assert_eq!(machine.bond_state(&device.address), BondState::NotBonded);

        assert_eq!(
            machine.on_pairing_error(&device, BondFailureReason::AuthTimeout),
            Some(PeripheralError::BondFailure {
                address: device.address,
                reason: BondFailureReason::AuthTimeout,
            })
        );
        assert_eq!(
            machine.bond_state(&device.address),
            BondState::BondFailed(BondFailureReason::AuthTimeout)
        );

        // the trailing broadcast for the same attempt adds nothing
        assert_eq!(
            machine
                .on_bond_state_changed(
                    &device,
                    RawBondState::None,
                    Some(BondFailureReason::AuthTimeout)
                )
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_failure_broadcast_alone_after_disconnect() {
        let mut machine = PairingStateMachine::new();
        let device = central();

        machine.on_pairing_request(device.clone(), PairingVariant::Consent, None);
        machine.on_disconnected(&device.address);

        let failure = machine
            .on_bond_state_changed(
                &device,
                RawBondState::None,
                Some(BondFailureReason::RemoteAuthCanceled),
            )
            .unwrap();
        assert_eq!(
            failure,
            Some(PeripheralError::BondFailure {
                address: device.address,
                reason: BondFailureReason::RemoteAuthCanceled,
            })
        );
    }

    #[test]
    fn test_bond_state_broadcasts() {
        let mut machine = PairingStateMachine::new();
        let device = central();

        machine
            .on_bond_state_changed(&device, RawBondState::Bonding, None)
            .unwrap();
        assert_eq!(machine.bond_state(&device.address), BondState::Bonding);

        let failure = machine
            .on_bond_state_changed(
                &device,
                RawBondState::None,
                Some(BondFailureReason::RemoteDeviceDown),
            )
            .unwrap();
        assert_eq!(
            failure,
            Some(PeripheralError::BondFailure {
                address: device.address,
                reason: BondFailureReason::RemoteDeviceDown,
            })
        );

        machine
            .on_bond_state_changed(&device, RawBondState::Bonded, None)
            .unwrap();
        assert_eq!(machine.bond_state(&device.address), BondState::Bonded);

        machine
            .on_bond_state_changed(&device, RawBondState::None, None)
            .unwrap();
        assert_eq!(machine.bond_state(&device.address), BondState::NotBonded);
    }

    #[test]
    fn test_clear_sessions_resets_bonding_records() {
        let mut machine = PairingStateMachine::new();
        let first = central();
        let second = RemoteDevice::new("C0:FF:EE:00:00:02".parse().unwrap(), None);

        machine.on_pairing_request(first.clone(), PairingVariant::Consent, None);
        machine.begin_bonding(&second);
        machine.clear_sessions();

        assert!(machine.session(&first.address).is_none());
        assert_eq!(machine.bond_state(&first.address), BondState::NotBonded);
        assert_eq!(machine.bond_state(&second.address), BondState::NotBonded);
    }
}
