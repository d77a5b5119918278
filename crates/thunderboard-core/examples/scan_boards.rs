//! Example: Scanning for Thunderboards
//!
//! This example scans for Thunderboard React and Sense boards using
//! Bluetooth Low Energy and lists what it found.
//!
//! Run with: `cargo run --example scan_boards`

use thunderboard_core::{BleManager, ManagerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    println!("Scanning for Thunderboards...");
    println!();

    let manager = BleManager::bluetooth(ManagerConfig::default()).await?;
    manager.start().await?;
    let boards = manager.scan().await?;

    if boards.is_empty() {
        println!("No Thunderboards found.");
        println!();
        println!("Make sure:");
        println!("  - The board is powered on and advertising");
        println!("  - Bluetooth is enabled on this computer");
        println!("  - The board is within range");
    } else {
        println!("Found {} board(s):", boards.len());
        println!();

        for board in &boards {
            let rssi = board
                .rssi
                .map(|r| format!("{} dBm", r))
                .unwrap_or_else(|| "N/A".to_string());

            println!("  {}", board.display_name());
            println!("    Identifier: {}", board.id);
            println!("    RSSI: {}", rssi);
            println!();
        }
    }

    Ok(())
}
