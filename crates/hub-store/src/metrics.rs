//! Statsd-backed counters (spec §6 `STATSD_METRICS_SERVER`, ambient
//! observability carried forward regardless of the spec's silence on
//! dashboards — see the expanded spec's ambient-stack section).
//!
//! Wraps `cadence`'s client behind a handful of named methods so call sites
//! read as domain events ("a cast merged") rather than raw metric strings.
//! Falls back to a no-op sink when `STATSD_METRICS_SERVER` is unset, so the
//! engine never has to branch on whether metrics are configured.

use cadence::{Counted, NopMetricSink, QueuingMetricSink, StatsdClient, UdpMetricSink};
use std::net::UdpSocket;

const METRIC_PREFIX: &str = "hub_store";

pub struct Metrics {
    client: StatsdClient,
}

impl Metrics {
    /// `server` is `host:port`, as delivered by `STATSD_METRICS_SERVER`.
    pub fn new(server: Option<&str>) -> Self {
        let client = match server.and_then(Self::udp_client) {
            Some(client) => client,
            None => StatsdClient::from_sink(METRIC_PREFIX, NopMetricSink),
        };
        Self { client }
    }

    fn udp_client(server: &str) -> Option<StatsdClient> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.set_nonblocking(true).ok()?;
        let sink = UdpMetricSink::from(server, socket).ok()?;
        let queuing_sink = QueuingMetricSink::from(sink);
        Some(StatsdClient::from_sink(METRIC_PREFIX, queuing_sink))
    }

    pub fn message_merged(&self, store: &str) {
        let _ = self.client.count(&format!("merge.{store}"), 1);
    }

    pub fn message_duplicate(&self, store: &str) {
        let _ = self.client.count(&format!("duplicate.{store}"), 1);
    }

    pub fn message_conflict(&self, store: &str) {
        let _ = self.client.count(&format!("conflict.{store}"), 1);
    }

    pub fn message_prunable(&self, store: &str) {
        let _ = self.client.count(&format!("prunable.{store}"), 1);
    }

    pub fn message_pruned(&self, store: &str) {
        let _ = self.client.count(&format!("pruned.{store}"), 1);
    }

    pub fn revoke_job_completed(&self) {
        let _ = self.client.count("revoke_job.completed", 1);
    }

    pub fn revoke_job_failed(&self) {
        let _ = self.client.count("revoke_job.failed", 1);
    }

    pub fn sync_trie_root_recomputed(&self) {
        let _ = self.client.count("sync_trie.root_recomputed", 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_server_falls_back_to_noop_sink_without_panicking() {
        let metrics = Metrics::new(None);
        metrics.message_merged("cast");
        metrics.revoke_job_completed();
    }
}
