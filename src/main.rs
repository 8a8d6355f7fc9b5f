//! Demo binary: scan for a health peripheral, connect to the first one
//! found, stream its readings for a while, then disconnect.

use anyhow::Result;
use health_device_bridge::{logging, BluetoothManager, BluetoothState, BridgeConfig, UserIdentity};
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let identity = UserIdentity::new("demo-user");
    let manager = BluetoothManager::new(Some(&identity), BridgeConfig::default()).await?;
    let mut states = manager.subscribe();

    println!("Scanning for health peripherals...");
    manager.start_scan();
    wait_until(&mut states, |s| s.scanning || s.last_error.is_some()).await?;
    wait_until(&mut states, |s| !s.scanning).await?;

    let snapshot = manager.state();
    if let Some(error) = &snapshot.last_error {
        anyhow::bail!("scan failed: {error}");
    }
    for device in &snapshot.devices {
        println!("  {} ({}), {} dBm", device.name, device.id, device.rssi);
    }
    let Some(device) = snapshot.devices.first() else {
        println!("No health peripherals found.");
        manager.shutdown().await;
        return Ok(());
    };

    println!("Connecting to {}...", device.name);
    manager.connect(device.id.clone());
    wait_until(&mut states, |s| {
        s.connection.is_connected() || s.last_error.is_some()
    })
    .await?;

    let snapshot = manager.state();
    if let Some(error) = &snapshot.last_error {
        anyhow::bail!("connection failed: {error}");
    }

    println!("Connected; streaming readings for 30 seconds...");
    for _ in 0..30 {
        sleep(Duration::from_secs(1)).await;
        let reading = manager.state().reading;
        println!(
            "  heart rate: {}, steps: {}, battery: {}",
            reading
                .heart_rate_bpm
                .map_or_else(|| "-".into(), |bpm| format!("{bpm} bpm")),
            reading
                .step_count
                .map_or_else(|| "-".into(), |steps| steps.to_string()),
            reading
                .battery_percent
                .map_or_else(|| "-".into(), |percent| format!("{percent}%")),
        );
        if manager.state().connection.is_disconnected() {
            println!("Peripheral went away.");
            break;
        }
    }

    manager.disconnect();
    wait_until(&mut states, |s| s.connection.is_disconnected()).await?;
    println!("Disconnected.");
    manager.shutdown().await;
    Ok(())
}

async fn wait_until(
    states: &mut watch::Receiver<BluetoothState>,
    predicate: impl Fn(&BluetoothState) -> bool,
) -> Result<()> {
    loop {
        if predicate(&states.borrow()) {
            return Ok(());
        }
        states.changed().await?;
    }
}
