//! Domain layer: device model, pairing state machine and settings.

pub mod models;
pub mod pairing;
pub mod settings;
