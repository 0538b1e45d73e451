//! Store connectivity probe.

use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::transport::{GraphStore, GraphStoreExt};

/// Outcome of [`probe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    pub success: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

/// Write a probe record, read it back and time the round trip.
pub async fn probe<S: GraphStore + ?Sized>(store: &S, timeout: Duration) -> ProbeReport {
    let started = Instant::now();
    let stamp = crate::now_ms();
    let key = format!("succus_probe_{stamp}");

    let round_trip = async {
        let node = store.get(&key);
        node.put(json!({ "timestamp": stamp }))
            .await
            .map_err(|e| format!("write failed: {e}"))?;
        match node.once().await {
            Ok(Some(value)) if value["timestamp"] == json!(stamp) => Ok(()),
            Ok(_) => Err("read back a different value".to_string()),
            Err(e) => Err(format!("read failed: {e}")),
        }
    };

    let result = match tokio::time::timeout(timeout, round_trip).await {
        Ok(result) => result,
        Err(_) => Err(format!("no response within {}ms", timeout.as_millis())),
    };
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(()) => {
            info!(latency_ms, "Store probe succeeded");
            ProbeReport {
                success: true,
                latency_ms,
                error: None,
            }
        }
        Err(error) => {
            warn!(latency_ms, %error, "Store probe failed");
            ProbeReport {
                success: false,
                latency_ms,
                error: Some(error),
            }
        }
    }
}
