use anyhow::Context;
use ble_pairing_peripheral::domain::models::{
    BondFailureReason, BondingPolicy, PairingVariant, PeripheralEvent, RemoteDevice,
};
use ble_pairing_peripheral::domain::settings::SettingsService;
use ble_pairing_peripheral::infrastructure::bluetooth::simulated::SimulatedStack;
use ble_pairing_peripheral::infrastructure::bluetooth::stack::{event_channel, EventSender};
use ble_pairing_peripheral::infrastructure::bluetooth::{PeripheralConfig, PeripheralService};
use ble_pairing_peripheral::infrastructure::logging::init_logger;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Eager,
    Lazy,
}

impl From<PolicyArg> for BondingPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Eager => BondingPolicy::Eager,
            PolicyArg::Lazy => BondingPolicy::Lazy,
        }
    }
}

/// Run the bonding peripheral against an in-process radio stack with a
/// scripted central
#[derive(Debug, Parser)]
#[command(name = "ble-pairing-peripheral", version, about)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// When to request a bond with a connecting central
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = match cli.config {
        Some(path) => SettingsService::from_path(path),
        None => SettingsService::new().context("Failed to locate settings")?,
    };
    if let Some(policy) = cli.policy {
        settings.get_mut().bonding_policy = policy.into();
    }

    let _log_guard = init_logger(&settings.get().log_settings, cli.log_level.as_deref())
        .context("Failed to initialize logging")?;
    info!("Settings loaded from {}", settings.path().display());

    let config = PeripheralConfig::from(settings.get());
    let policy = config.bonding_policy;

    let (tx, rx) = event_channel();
    let stack = Arc::new(SimulatedStack::new(tx.clone()));
    stack.set_radio_enabled(true);

    let service = PeripheralService::new(stack.clone(), tx.clone(), config);
    let peripheral = tokio::spawn(service.run(rx));

    tokio::select! {
        result = run_central_script(stack, policy) => result?,
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted");
        }
    }

    request_shutdown(&tx);
    peripheral.await.context("Peripheral task failed")?;
    info!("Done");
    Ok(())
}

fn request_shutdown(events: &EventSender) {
    if events.send(PeripheralEvent::Shutdown).is_err() {
        warn!("Peripheral already stopped");
    }
}

/// Two central sessions: one that bonds and reads the protected value, and
/// one whose PIN pairing is never answered and times out.
async fn run_central_script(stack: Arc<SimulatedStack>, policy: BondingPolicy) -> anyhow::Result<()> {
    // Radio power cycle plus the advertising delay
    sleep(Duration::from_secs(3)).await;

    let phone = RemoteDevice::new("C0:FF:EE:00:00:01".parse()?, Some("Phone"));
    info!("Central {} connecting", phone);
    stack.connect_central(phone.clone());
    if !policy.is_eager() {
        let readable = stack.read_encrypted_characteristic(phone.address);
        info!("Unbonded read allowed: {}", readable);
    }
    sleep(Duration::from_secs(1)).await;

    let readable = stack.read_encrypted_characteristic(phone.address);
    info!("Bonded read allowed: {}", readable);
    stack.disconnect_central(phone.address);

    // Advertising comes back after the restart delays
    sleep(Duration::from_secs(2)).await;

    let tablet = RemoteDevice::new("C0:FF:EE:00:00:02".parse()?, Some("Tablet"));
    stack.set_pairing_variant(PairingVariant::Pin);
    info!("Central {} connecting with PIN pairing", tablet);
    stack.connect_central(tablet.clone());
    if !policy.is_eager() {
        stack.read_encrypted_characteristic(tablet.address);
    }
    sleep(Duration::from_secs(1)).await;

    stack.fail_pairing(tablet.address, BondFailureReason::AuthTimeout);
    stack.disconnect_central(tablet.address);
    sleep(Duration::from_secs(2)).await;

    Ok(())
}
