//! Metric store: one entry per configured stream, each holding the latest
//! snapshot plus the rolling bitrate history behind its own lock.
//!
//! Entries are created at startup and live until shutdown; they are never
//! removed or rekeyed. The store is the only mutable state shared between
//! samplers and the exposition endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::{Quality, SampleReport, Stability, StreamDescriptor, StreamKey, StreamSnapshot};
use crate::scoring;

/// Rolling bitrate history depth; stability is defined from 3 entries up.
pub const BITRATE_HISTORY_LEN: usize = 10;

/// One stream's immutable descriptor and its lock-guarded snapshot.
pub struct StreamState {
    pub descriptor: StreamDescriptor,
    snapshot: RwLock<StreamSnapshot>,
}

impl StreamState {
    pub fn new(descriptor: StreamDescriptor) -> Self {
        Self {
            descriptor,
            snapshot: RwLock::new(StreamSnapshot::default()),
        }
    }

    /// Copy out the current snapshot under a shared lock.
    pub async fn snapshot(&self) -> StreamSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Commit a successful sampling pass: overwrite the per-cycle fields,
    /// roll the bitrate history, re-derive the labels, clear the failure
    /// counter.
    pub async fn commit_sample(&self, report: SampleReport) {
        let mut snapshot = self.snapshot.write().await;

        snapshot.total_packets = report.total_packets;
        snapshot.video_packets = report.video_packets;
        snapshot.audio_packets = report.audio_packets;
        snapshot.keyframes = report.keyframes;
        if let Some(codec) = report.codec {
            snapshot.codec = codec.to_string();
        }

        snapshot.framerate = report.framerate;
        snapshot.bitrate_bps = report.bitrate_bps;
        snapshot.gop_size = report.gop_size;

        snapshot.response_ms = report.response_ms;
        snapshot.ttfb_ms = report.ttfb_ms;
        snapshot.throughput_bps = report.throughput_bps;
        snapshot.stall_count = report.stall_count;
        snapshot.stall_max_ms = report.stall_max_ms;
        snapshot.stall_total_ms = report.stall_total_ms;
        snapshot.stall_ratio = report.stall_ratio;

        if report.bitrate_bps > 0.0 {
            snapshot.bitrate_history.push(report.bitrate_bps);
            if snapshot.bitrate_history.len() > BITRATE_HISTORY_LEN {
                snapshot.bitrate_history.remove(0);
            }
            snapshot.avg_bitrate_bps = snapshot.bitrate_history.iter().sum::<f64>()
                / snapshot.bitrate_history.len() as f64;
            snapshot.stability =
                scoring::stability_label(&snapshot.bitrate_history, snapshot.avg_bitrate_bps);
        }

        snapshot.playable = scoring::is_playable(report.keyframes, report.video_packets);
        snapshot.quality =
            scoring::quality_label(snapshot.playable, report.framerate, report.bitrate_bps);

        snapshot.healthy = true;
        snapshot.consecutive_failures = 0;
        snapshot.last_check_at = Some(Utc::now());
    }

    /// A cycle whose retries are exhausted: zero the per-cycle fields, flip
    /// the health flags, bump the failure counter. The bitrate history is
    /// deliberately retained so stability recovers from where it left off.
    pub async fn mark_failed(&self) {
        let mut snapshot = self.snapshot.write().await;

        snapshot.consecutive_failures += 1;
        snapshot.healthy = false;
        snapshot.playable = false;

        snapshot.total_packets = 0;
        snapshot.video_packets = 0;
        snapshot.audio_packets = 0;
        snapshot.keyframes = 0;
        snapshot.bitrate_bps = 0.0;
        snapshot.avg_bitrate_bps = 0.0;
        snapshot.framerate = 0.0;
        snapshot.gop_size = 0;
        snapshot.codec.clear();
        snapshot.response_ms = 0.0;
        snapshot.ttfb_ms = 0.0;
        snapshot.throughput_bps = 0.0;
        snapshot.stall_count = 0;
        snapshot.stall_max_ms = 0.0;
        snapshot.stall_total_ms = 0.0;
        snapshot.stall_ratio = 0.0;

        snapshot.quality = Quality::Poor;
        snapshot.stability = Stability::Unstable;
        snapshot.last_check_at = Some(Utc::now());
    }
}

/// A stream's descriptor together with a copy of its snapshot, as consumed
/// by the exposition layer.
#[derive(Debug, Clone)]
pub struct StreamMetrics {
    pub descriptor: StreamDescriptor,
    pub snapshot: StreamSnapshot,
}

#[derive(Clone, Default)]
pub struct StreamStore {
    streams: Arc<RwLock<HashMap<StreamKey, Arc<StreamState>>>>,
}

impl StreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream. Called at startup only; a duplicate key replaces
    /// the earlier entry, matching last-one-wins config semantics.
    pub async fn add_stream(&self, descriptor: StreamDescriptor) {
        info!(
            stream_id = %descriptor.id,
            url = %descriptor.url,
            project = %descriptor.project,
            line = %descriptor.line,
            "registered stream"
        );
        let key = descriptor.key();
        let state = Arc::new(StreamState::new(descriptor));
        self.streams.write().await.insert(key, state);
    }

    pub async fn len(&self) -> usize {
        self.streams.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.streams.read().await.is_empty()
    }

    /// Snapshot of the stream set for one check cycle.
    pub async fn streams(&self) -> Vec<Arc<StreamState>> {
        self.streams.read().await.values().cloned().collect()
    }

    /// Deep copy of every stream's metrics for the exposition endpoint.
    pub async fn all_metrics(&self) -> Vec<StreamMetrics> {
        let streams = self.streams().await;
        let mut metrics = Vec::with_capacity(streams.len());
        for state in streams {
            metrics.push(StreamMetrics {
                descriptor: state.descriptor.clone(),
                snapshot: state.snapshot().await,
            });
        }
        debug!(streams = metrics.len(), "collected metric snapshots");
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn descriptor(id: &str) -> StreamDescriptor {
        StreamDescriptor::new(
            id.to_string(),
            format!("http://origin.example.com/live/{id}.flv"),
            "G01".to_string(),
            "source".to_string(),
            StdHashMap::new(),
        )
    }

    fn healthy_report(bitrate: f64) -> SampleReport {
        SampleReport {
            total_packets: 260,
            video_packets: 250,
            audio_packets: 10,
            keyframes: 10,
            codec: Some("H264"),
            framerate: 25.0,
            bitrate_bps: bitrate,
            gop_size: 25,
            response_ms: 40.0,
            ttfb_ms: 55.0,
            throughput_bps: bitrate,
            stall_count: 0,
            stall_max_ms: 0.0,
            stall_total_ms: 0.0,
            stall_ratio: 0.0,
        }
    }

    #[tokio::test]
    async fn commit_sets_health_and_labels() {
        let state = StreamState::new(descriptor("s1"));
        state.commit_sample(healthy_report(2_500_000.0)).await;

        let snapshot = state.snapshot().await;
        assert!(snapshot.healthy);
        assert!(snapshot.playable);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert_eq!(snapshot.quality, Quality::Good);
        // One cycle of history: stability stays unknown.
        assert_eq!(snapshot.stability, Stability::Unknown);
        assert_eq!(snapshot.avg_bitrate_bps, 2_500_000.0);
        assert_eq!(snapshot.codec, "H264");
        assert!(snapshot.last_check_at.is_some());
    }

    #[tokio::test]
    async fn history_is_capped_and_averaged() {
        let state = StreamState::new(descriptor("s1"));
        for i in 0..12 {
            state.commit_sample(healthy_report(1_000_000.0 + i as f64)).await;
        }

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.bitrate_history.len(), BITRATE_HISTORY_LEN);
        // Oldest two entries dropped: history is 1_000_002 ..= 1_000_011.
        assert_eq!(snapshot.bitrate_history[0], 1_000_002.0);
        let mean = snapshot.bitrate_history.iter().sum::<f64>() / 10.0;
        assert_eq!(snapshot.avg_bitrate_bps, mean);
        assert_eq!(snapshot.stability, Stability::Stable);
    }

    #[tokio::test]
    async fn zero_bitrate_does_not_touch_history() {
        let state = StreamState::new(descriptor("s1"));
        state.commit_sample(healthy_report(2_000_000.0)).await;

        let mut report = healthy_report(0.0);
        report.framerate = 0.0;
        state.commit_sample(report).await;

        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.bitrate_history, vec![2_000_000.0]);
        assert_eq!(snapshot.avg_bitrate_bps, 2_000_000.0);
    }

    #[tokio::test]
    async fn mark_failed_resets_but_keeps_history() {
        let state = StreamState::new(descriptor("s1"));
        state.commit_sample(healthy_report(2_500_000.0)).await;
        state.commit_sample(healthy_report(2_500_000.0)).await;
        state.mark_failed().await;

        let snapshot = state.snapshot().await;
        assert!(!snapshot.healthy);
        assert!(!snapshot.playable);
        assert_eq!(snapshot.consecutive_failures, 1);
        assert_eq!(snapshot.quality, Quality::Poor);
        assert_eq!(snapshot.stability, Stability::Unstable);
        assert_eq!(snapshot.total_packets, 0);
        assert_eq!(snapshot.bitrate_bps, 0.0);
        assert_eq!(snapshot.avg_bitrate_bps, 0.0);
        assert_eq!(snapshot.stall_ratio, 0.0);
        assert_eq!(snapshot.codec, "");
        // The history survives the reset.
        assert_eq!(snapshot.bitrate_history.len(), 2);
    }

    #[tokio::test]
    async fn consecutive_failures_count_and_reset() {
        let state = StreamState::new(descriptor("s1"));
        for _ in 0..3 {
            state.mark_failed().await;
        }
        assert_eq!(state.snapshot().await.consecutive_failures, 3);
        assert!(!state.snapshot().await.healthy);

        state.commit_sample(healthy_report(1_000_000.0)).await;
        let snapshot = state.snapshot().await;
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(snapshot.healthy);
    }

    #[tokio::test]
    async fn store_returns_deep_copies() {
        let store = StreamStore::new();
        store.add_stream(descriptor("a")).await;
        store.add_stream(descriptor("b")).await;
        assert_eq!(store.len().await, 2);

        let metrics = store.all_metrics().await;
        assert_eq!(metrics.len(), 2);
        assert!(metrics.iter().all(|m| !m.snapshot.healthy));
    }

    #[tokio::test]
    async fn duplicate_key_replaces_entry() {
        let store = StreamStore::new();
        store.add_stream(descriptor("a")).await;
        store.add_stream(descriptor("a")).await;
        assert_eq!(store.len().await, 1);
    }
}
