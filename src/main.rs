//! srb-monitor binary - runs one bin monitor against a real broker and logs
//! canonical state transitions and alerts. The display layer proper lives
//! elsewhere; this binary is the headless equivalent.

use anyhow::Result;
use srb_monitor::config::{self, bin_description};
use srb_monitor::models::AlertSeverity;
use srb_monitor::BinMonitor;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().init();

    let cfg = config::load_config().await;
    let bin_type = std::env::args().nth(1).unwrap_or_else(|| "plastic".into());
    info!(bin_type = %bin_type, "{}", bin_description(&bin_type));

    let (monitor, mut alerts) = BinMonitor::start(&cfg, &bin_type);

    loop {
        tokio::select! {
            Some(alert) = alerts.recv() => match alert.severity {
                AlertSeverity::Error => error!(alert = %alert.message, "alert"),
                AlertSeverity::Warning => warn!(alert = %alert.message, "alert"),
                _ => info!(alert = %alert.message, "alert"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    monitor.shutdown().await;
    Ok(())
}
