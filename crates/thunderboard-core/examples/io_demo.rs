//! Example: Digital I/O demo
//!
//! Connects to the board named on the command line, configures the I/O
//! demo, blinks LED 0 and prints button changes for ten seconds.
//!
//! Run with: `cargo run --example io_demo -- "Thunder React #12345"`

use std::time::Duration;

use thunderboard_core::{BleManager, DemoKind, IoEvent, ManagerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let target = std::env::args().nth(1).ok_or("usage: io_demo <board name or id>")?;

    let manager = BleManager::bluetooth(ManagerConfig::default()).await?;
    manager.start().await?;
    manager.scan().await?;

    let board = manager
        .find_device(&target)
        .await
        .ok_or_else(|| format!("board '{}' not found", target))?;
    println!("Connecting to {}...", board.display_name());
    manager.connect_and_wait(&board.id).await?;

    let io = manager
        .configure_demo(&board.id, DemoKind::Io)
        .await?
        .into_io()
        .ok_or("unexpected demo connection")?;
    let mut events = io.subscribe();

    io.set_led(0, true).await?;
    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(IoEvent::Inputs(inputs)) => println!("Buttons: {:?}", inputs),
                Ok(IoEvent::Disconnected) | Err(_) => break,
            },
        }
    }
    io.set_led(0, false).await?;

    manager.disconnect(&board.id).await?;
    Ok(())
}
