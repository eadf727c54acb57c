//! Reference outstation.
//!
//! Listens on port 2404 with common address 1, answers interrogations with
//! the built-in process image, accepts single commands for IOA 5000 and
//! reports a counting measurement at IOA 110 every second.
//!
//! ```text
//! RUST_LOG=debug cargo run --example simple_server
//! ```

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use voltage_outstation::{ProcessHandler, Station, StationConfig};

#[tokio::main]
async fn main() -> voltage_outstation::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let bind = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:2404".to_string());
    let config = StationConfig::new(bind);
    let handler = Arc::new(ProcessHandler::default());
    let mut station = Station::new(config, handler.clone());

    let addr = station.start().await?;
    tracing::info!("Outstation running on {}, press Ctrl-C to stop", addr);

    tokio::signal::ctrl_c().await?;

    if let Some(time) = handler.last_clock_sync() {
        tracing::info!("Last clock synchronization: {}", time);
    }
    station.stop().await
}
