use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Link-layer address of a remote device (`AA:BB:CC:DD:EE:FF`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid device address: {0}")]
pub struct AddressParseError(String);

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| AddressParseError(s.to_string()))?;
            *byte = u8::from_str_radix(part, 16).map_err(|_| AddressParseError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(AddressParseError(s.to_string()));
        }
        Ok(Self(bytes))
    }
}

/// A central peer as reported by the radio stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDevice {
    pub address: DeviceAddress,
    pub name: Option<String>,
}

impl RemoteDevice {
    pub fn new(address: DeviceAddress, name: Option<&str>) -> Self {
        Self {
            address,
            name: name.map(str::to_string),
        }
    }
}

impl fmt::Display for RemoteDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", self.address, name),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Adapter power state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Off,
    TurningOn,
    On,
    TurningOff,
    Unknown(i32),
}

impl RadioState {
    pub fn from_code(code: i32) -> Self {
        match code {
            10 => Self::Off,
            11 => Self::TurningOn,
            12 => Self::On,
            13 => Self::TurningOff,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Off => 10,
            Self::TurningOn => 11,
            Self::On => 12,
            Self::TurningOff => 13,
            Self::Unknown(code) => *code,
        }
    }
}

/// Profile-level connection state as reported by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Unknown(i32),
}

impl ProfileState {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnecting,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Disconnecting => 3,
            Self::Unknown(code) => *code,
        }
    }
}

/// Per-device link state kept by the GATT server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Bond state as broadcast by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawBondState {
    None,
    Bonding,
    Bonded,
    Unknown(i32),
}

impl RawBondState {
    pub fn from_code(code: i32) -> Self {
        match code {
            10 => Self::None,
            11 => Self::Bonding,
            12 => Self::Bonded,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::None => 10,
            Self::Bonding => 11,
            Self::Bonded => 12,
            Self::Unknown(code) => *code,
        }
    }
}

/// In-memory mirror of a device's bond
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BondState {
    #[default]
    NotBonded,
    Bonding,
    Bonded,
    BondFailed(BondFailureReason),
}

/// User-interaction method negotiated for a pairing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingVariant {
    /// A PIN must be entered locally
    Pin,
    /// A passkey shown on both sides must be accepted or rejected locally
    PasskeyConfirmation,
    /// Pairing only needs a local yes
    Consent,
    /// Show the passkey; the remote side confirms
    DisplayPasskey,
    /// Show the PIN; the remote side confirms
    DisplayPin,
    Unknown(i32),
}

impl PairingVariant {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Pin,
            2 => Self::PasskeyConfirmation,
            3 => Self::Consent,
            4 => Self::DisplayPasskey,
            5 => Self::DisplayPin,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Pin => 0,
            Self::PasskeyConfirmation => 2,
            Self::Consent => 3,
            Self::DisplayPasskey => 4,
            Self::DisplayPin => 5,
            Self::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for PairingVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pin => f.write_str("PIN"),
            Self::PasskeyConfirmation => f.write_str("Passkey confirm"),
            Self::Consent => f.write_str("Consent"),
            Self::DisplayPasskey => f.write_str("Display passkey"),
            Self::DisplayPin => f.write_str("Display PIN"),
            Self::Unknown(code) => write!(f, "Unknown ({code})"),
        }
    }
}

/// Why a bonding attempt ended without a bond
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondFailureReason {
    AuthFailed,
    AuthRejected,
    AuthCanceled,
    RemoteDeviceDown,
    DiscoveryInProgress,
    AuthTimeout,
    RepeatedAttempts,
    RemoteAuthCanceled,
    Removed,
    Unknown(i32),
}

impl BondFailureReason {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::AuthFailed,
            2 => Self::AuthRejected,
            3 => Self::AuthCanceled,
            4 => Self::RemoteDeviceDown,
            5 => Self::DiscoveryInProgress,
            6 => Self::AuthTimeout,
            7 => Self::RepeatedAttempts,
            8 => Self::RemoteAuthCanceled,
            9 => Self::Removed,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::AuthFailed => 1,
            Self::AuthRejected => 2,
            Self::AuthCanceled => 3,
            Self::RemoteDeviceDown => 4,
            Self::DiscoveryInProgress => 5,
            Self::AuthTimeout => 6,
            Self::RepeatedAttempts => 7,
            Self::RemoteAuthCanceled => 8,
            Self::Removed => 9,
            Self::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for BondFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AuthFailed => "AUTH_FAILED",
            Self::AuthRejected => "AUTH_REJECTED",
            Self::AuthCanceled => "AUTH_CANCELED",
            Self::RemoteDeviceDown => "REMOTE_DEVICE_DOWN",
            Self::DiscoveryInProgress => "DISCOVERY_IN_PROGRESS",
            Self::AuthTimeout => "AUTH_TIMEOUT",
            Self::RepeatedAttempts => "REPEATED_ATTEMPTS",
            Self::RemoteAuthCanceled => "REMOTE_AUTH_CANCELED",
            Self::Removed => "REMOVED",
            Self::Unknown(_) => "Unknown",
        })
    }
}

/// Reasons an advertisement could not be started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdvertiseError {
    #[error("Data too large")]
    PayloadTooLarge,
    #[error("Too many advertisers")]
    TooManyAdvertisers,
    #[error("Already started")]
    AlreadyStarted,
    #[error("Internal error")]
    InternalError,
    #[error("Feature unsupported")]
    FeatureUnsupported,
    #[error("Unknown")]
    Unknown(i32),
}

impl AdvertiseError {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::PayloadTooLarge,
            2 => Self::TooManyAdvertisers,
            3 => Self::AlreadyStarted,
            4 => Self::InternalError,
            5 => Self::FeatureUnsupported,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::PayloadTooLarge => 1,
            Self::TooManyAdvertisers => 2,
            Self::AlreadyStarted => 3,
            Self::InternalError => 4,
            Self::FeatureUnsupported => 5,
            Self::Unknown(code) => *code,
        }
    }
}

/// Local I/O capability used in pairing negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoCapability {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    NoInputNoOutput,
    KeyboardDisplay,
}

/// Transport an I/O capability applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Classic,
    LowEnergy,
}

/// When bonding is started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BondingPolicy {
    /// Request a bond as soon as a central connects
    #[default]
    Eager,
    /// Let the stack start pairing on the first encrypted read
    Lazy,
}

impl BondingPolicy {
    pub fn is_eager(&self) -> bool {
        matches!(self, Self::Eager)
    }
}

/// Notifications delivered by the radio stack
#[derive(Debug, Clone, PartialEq)]
pub enum StackEvent {
    RadioStateChanged(RadioState),
    DeviceFound(RemoteDevice),
    BondStateChanged {
        device: RemoteDevice,
        previous: RawBondState,
        current: RawBondState,
        reason: Option<BondFailureReason>,
    },
    PairingRequested {
        device: RemoteDevice,
        variant: PairingVariant,
        credential: Option<u32>,
    },
    Paired(RemoteDevice),
    PairingFailed {
        device: RemoteDevice,
        reason: BondFailureReason,
    },
    ConnectionStateChanged {
        device: RemoteDevice,
        profile: i32,
        state: ProfileState,
    },
    ServerConnectionStateChanged {
        device: RemoteDevice,
        status: i32,
        state: ProfileState,
    },
    AdvertiseStarted,
    AdvertiseFailed(AdvertiseError),
}

/// Deferred actions posted back by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Power the radio back on after the startup power cycle
    EnableRadio,
    /// Start advertising for the radio session with this epoch
    StartAdvertising { epoch: u64 },
    /// First half of an advertising restart
    RestartStop { restart_id: u64 },
    /// Second half of an advertising restart
    RestartStart { restart_id: u64 },
}

/// Everything the coordinator's event loop consumes
#[derive(Debug, Clone, PartialEq)]
pub enum PeripheralEvent {
    Stack(StackEvent),
    Timer(TimerEvent),
    Shutdown,
}

impl From<StackEvent> for PeripheralEvent {
    fn from(event: StackEvent) -> Self {
        Self::Stack(event)
    }
}

impl From<TimerEvent> for PeripheralEvent {
    fn from(event: TimerEvent) -> Self {
        Self::Timer(event)
    }
}
