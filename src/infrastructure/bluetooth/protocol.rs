//! Bonding Demo GATT Protocol
//!
//! Static shape of the one service exposed to centrals, and the parameters of
//! the advertisement that announces it.

use uuid::Uuid;

/// Primary service UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xB340B65C_B8AE_49E7_8ED8_F79C61708475);

/// Characteristic readable only over an encrypted link
pub const CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xFEE891B9_032A_43AF_8923_5E3A4FF989A3);

/// Client Characteristic Configuration descriptor (0x2902)
pub const DESCRIPTOR_CONFIG_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805F9B34FB);

/// Characteristic property bits
pub mod properties {
    pub const READ: u8 = 0x02;
    pub const NOTIFY: u8 = 0x10;
}

/// Attribute permission bits
pub mod permissions {
    pub const READ: u16 = 0x01;
    pub const READ_ENCRYPTED: u16 = 0x02;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorDefinition {
    pub uuid: Uuid,
    pub permissions: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDefinition {
    pub uuid: Uuid,
    pub properties: u8,
    pub permissions: u16,
    pub descriptors: Vec<DescriptorDefinition>,
}

impl CharacteristicDefinition {
    pub fn requires_encryption(&self) -> bool {
        self.permissions & permissions::READ_ENCRYPTED != 0
    }
}

/// A primary GATT service with its characteristics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicDefinition>,
}

impl ServiceDescriptor {
    /// The bonding demo service: one read + notify characteristic that needs
    /// an encrypted link, carrying a read-only configuration descriptor.
    pub fn bonding_demo() -> Self {
        Self {
            uuid: SERVICE_UUID,
            characteristics: vec![CharacteristicDefinition {
                uuid: CHARACTERISTIC_UUID,
                properties: properties::READ | properties::NOTIFY,
                permissions: permissions::READ_ENCRYPTED,
                descriptors: vec![DescriptorDefinition {
                    uuid: DESCRIPTOR_CONFIG_UUID,
                    permissions: permissions::READ,
                }],
            }],
        }
    }

    pub fn characteristic(&self, uuid: &Uuid) -> Option<&CharacteristicDefinition> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPowerLevel {
    UltraLow,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseSettings {
    pub mode: AdvertiseMode,
    pub connectable: bool,
    /// Zero means advertise until stopped
    pub timeout_ms: u32,
    pub tx_power: TxPowerLevel,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            mode: AdvertiseMode::Balanced,
            connectable: true,
            timeout_ms: 0,
            tx_power: TxPowerLevel::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseData {
    pub include_device_name: bool,
    pub include_tx_power_level: bool,
    pub service_uuids: Vec<Uuid>,
}

impl AdvertiseData {
    pub fn for_service(service_uuid: Uuid) -> Self {
        Self {
            include_device_name: true,
            include_tx_power_level: false,
            service_uuids: vec![service_uuid],
        }
    }
}
