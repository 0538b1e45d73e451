//! Probe command - check store round trips

use anyhow::Result;
use succus_lib::{Messenger, MemoryGraph, ProtocolConfig, SeaSuite};

use crate::ui;

pub async fn run(config: ProtocolConfig) -> Result<()> {
    let messenger = Messenger::new(MemoryGraph::new(), SeaSuite::new(), config);
    let report = messenger.probe().await;

    ui::header("Store Probe");
    ui::key_value("Latency", &format!("{}ms", report.latency_ms));
    match &report.error {
        None => ui::success("Store is reachable"),
        Some(error) => {
            ui::error(&format!("Store probe failed: {}", error));
            anyhow::bail!("store probe failed");
        }
    }
    Ok(())
}
