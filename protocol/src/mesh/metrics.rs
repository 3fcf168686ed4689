//! # Mesh Metrics
//!
//! Counters for every classification outcome, plus frames we couldn't
//! decode and messages parked for later delivery. All registered in a
//! dedicated [`prometheus::Registry`] so an embedding app can merge or
//! expose them however it likes.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Prometheus handles for one mesh node. Cheap to clone.
#[derive(Clone)]
pub struct MeshMetrics {
    registry: Registry,
    pub duplicate_total: IntCounter,
    pub expired_total: IntCounter,
    pub processed_total: IntCounter,
    pub relayed_total: IntCounter,
    pub malformed_total: IntCounter,
    pub stored_total: IntCounter,
    /// Peers currently in the `Connected` state.
    pub connected_peers: IntGauge,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::new(name, help)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl MeshMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("meshstealth".into()), None)?;

        let duplicate_total = counter(
            &registry,
            "mesh_duplicate_total",
            "Inbound messages dropped as already seen",
        )?;
        let expired_total = counter(
            &registry,
            "mesh_expired_total",
            "Inbound messages dropped as older than the expiry window",
        )?;
        let processed_total = counter(
            &registry,
            "mesh_processed_total",
            "Inbound messages consumed at this node",
        )?;
        let relayed_total = counter(
            &registry,
            "mesh_relayed_total",
            "Inbound messages forwarded with one hop fewer",
        )?;
        let malformed_total = counter(
            &registry,
            "mesh_malformed_total",
            "Inbound frames that failed to decode",
        )?;
        let stored_total = counter(
            &registry,
            "mesh_stored_total",
            "Messages parked in the relay store",
        )?;

        let connected_peers = IntGauge::new("mesh_connected_peers", "Currently connected peers")?;
        registry.register(Box::new(connected_peers.clone()))?;

        Ok(Self {
            registry,
            duplicate_total,
            expired_total,
            processed_total,
            relayed_total,
            malformed_total,
            stored_total,
            connected_peers,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        let metrics = MeshMetrics::new().unwrap();
        metrics.relayed_total.inc();
        metrics.relayed_total.inc();
        metrics.connected_peers.set(3);
        let text = metrics.encode().unwrap();
        assert!(text.contains("meshstealth_mesh_relayed_total 2"));
        assert!(text.contains("meshstealth_mesh_connected_peers 3"));
    }

    #[test]
    fn instances_do_not_share_state() {
        let a = MeshMetrics::new().unwrap();
        let b = MeshMetrics::new().unwrap();
        a.duplicate_total.inc();
        assert_eq!(b.duplicate_total.get(), 0);
    }
}
