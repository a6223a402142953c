//! Prometheus gauge projection of the metric store.
//!
//! Prometheus label schemas are fixed per metric, so every gauge carries the
//! base labels (project, line, id) plus the allow-listed user tags; a stream
//! without one of the optional tags gets an empty string there. All values
//! are per-cycle snapshots exposed as gauges, never cumulative counters.

use anyhow::Result;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::models::StreamDescriptor;
use crate::scoring;
use crate::store::StreamStore;

/// User tag keys allowed through to Prometheus labels.
///
/// - `table` / `desk`: venue and counter identifiers
/// - `biz`: business category
/// - `isp`: carrier (ct / cm / cu)
/// - `role`: deployment role (test / prod)
const ALLOWED_TAG_KEYS: [&str; 5] = ["table", "desk", "biz", "isp", "role"];

const LABEL_NAMES: [&str; 8] = ["project", "line", "id", "table", "desk", "biz", "isp", "role"];

pub struct Exporter {
    store: StreamStore,
    registry: Registry,

    up: GaugeVec,
    healthy: GaugeVec,
    playable: GaugeVec,
    total_packets: GaugeVec,
    video_packets: GaugeVec,
    audio_packets: GaugeVec,
    keyframes: GaugeVec,
    bitrate: GaugeVec,
    avg_bitrate: GaugeVec,
    framerate: GaugeVec,
    response_time: GaugeVec,
    gop_size: GaugeVec,
    quality_score: GaugeVec,
    stability_score: GaugeVec,
    overall_score: GaugeVec,
    ttfb: GaugeVec,
    read_throughput: GaugeVec,
    read_stall_count: GaugeVec,
    read_stall_max: GaugeVec,
    read_stall_total: GaugeVec,
    read_stall_ratio: GaugeVec,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<GaugeVec> {
    let vec = GaugeVec::new(Opts::new(name, help), &LABEL_NAMES)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

impl Exporter {
    pub fn new(store: StreamStore) -> Result<Self> {
        let registry = Registry::new();

        Ok(Self {
            up: gauge(&registry, "video_stream_up", "Stream is up (1) or down (0)")?,
            healthy: gauge(
                &registry,
                "video_stream_healthy",
                "Stream health status (1=healthy, 0=unhealthy)",
            )?,
            playable: gauge(
                &registry,
                "video_stream_playable",
                "Stream is playable (1=yes, 0=no)",
            )?,
            total_packets: gauge(
                &registry,
                "video_stream_total_packets",
                "Total packets received in the last sample window",
            )?,
            video_packets: gauge(
                &registry,
                "video_stream_video_packets",
                "Video packets received in the last sample window",
            )?,
            audio_packets: gauge(
                &registry,
                "video_stream_audio_packets",
                "Audio packets received in the last sample window",
            )?,
            keyframes: gauge(
                &registry,
                "video_stream_keyframes",
                "Keyframes received in the last sample window",
            )?,
            bitrate: gauge(
                &registry,
                "video_stream_bitrate_bps",
                "Current stream bitrate in bits per second",
            )?,
            avg_bitrate: gauge(
                &registry,
                "video_stream_avg_bitrate_bps",
                "Rolling-mean stream bitrate in bits per second",
            )?,
            framerate: gauge(
                &registry,
                "video_stream_framerate",
                "Stream framerate in fps",
            )?,
            response_time: gauge(
                &registry,
                "video_stream_response_ms",
                "FLV HTTP response-header time in milliseconds",
            )?,
            gop_size: gauge(&registry, "video_stream_gop_size", "GOP size in frames")?,
            quality_score: gauge(
                &registry,
                "video_stream_quality_score",
                "Stream quality score (0=poor, 1=fair, 2=good)",
            )?,
            stability_score: gauge(
                &registry,
                "video_stream_stability_score",
                "Bitrate stability score (0=unstable, 1=moderate, 2=stable)",
            )?,
            overall_score: gauge(
                &registry,
                "video_stream_overall_score",
                "Composite quality/stability score (0=poor, 1=good/fair, 2=excellent)",
            )?,
            ttfb: gauge(
                &registry,
                "video_stream_ttfb_ms",
                "Time to first byte in milliseconds",
            )?,
            read_throughput: gauge(
                &registry,
                "video_stream_read_throughput_bps",
                "Read throughput over the sample window in bits per second",
            )?,
            read_stall_count: gauge(
                &registry,
                "video_stream_read_stall_count",
                "Number of reads slower than the stall threshold",
            )?,
            read_stall_max: gauge(
                &registry,
                "video_stream_read_stall_max_ms",
                "Longest single read stall in milliseconds",
            )?,
            read_stall_total: gauge(
                &registry,
                "video_stream_read_stall_total_ms",
                "Total read stall time in milliseconds",
            )?,
            read_stall_ratio: gauge(
                &registry,
                "video_stream_read_stall_ratio",
                "Stall time over sample duration (0-1); higher means more jitter",
            )?,
            store,
            registry,
        })
    }

    /// Refresh every gauge from the store, then render the exposition text.
    pub async fn render(&self) -> Result<String> {
        self.refresh().await;

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    async fn refresh(&self) {
        for metrics in self.store.all_metrics().await {
            let values = label_values(&metrics.descriptor);
            let labels: Vec<&str> = values.iter().map(String::as_str).collect();
            let snapshot = &metrics.snapshot;

            let bool_gauge = |flag: bool| if flag { 1.0 } else { 0.0 };

            self.up
                .with_label_values(&labels)
                .set(bool_gauge(snapshot.healthy));
            self.healthy
                .with_label_values(&labels)
                .set(bool_gauge(snapshot.healthy && snapshot.consecutive_failures == 0));
            self.playable
                .with_label_values(&labels)
                .set(bool_gauge(snapshot.playable));

            self.total_packets
                .with_label_values(&labels)
                .set(snapshot.total_packets as f64);
            self.video_packets
                .with_label_values(&labels)
                .set(snapshot.video_packets as f64);
            self.audio_packets
                .with_label_values(&labels)
                .set(snapshot.audio_packets as f64);
            self.keyframes
                .with_label_values(&labels)
                .set(snapshot.keyframes as f64);

            self.bitrate
                .with_label_values(&labels)
                .set(snapshot.bitrate_bps);
            self.avg_bitrate
                .with_label_values(&labels)
                .set(snapshot.avg_bitrate_bps);
            self.framerate
                .with_label_values(&labels)
                .set(snapshot.framerate);
            self.response_time
                .with_label_values(&labels)
                .set(snapshot.response_ms);
            self.gop_size
                .with_label_values(&labels)
                .set(snapshot.gop_size as f64);

            self.quality_score
                .with_label_values(&labels)
                .set(f64::from(snapshot.quality.score()));
            self.stability_score
                .with_label_values(&labels)
                .set(f64::from(snapshot.stability.score()));
            self.overall_score.with_label_values(&labels).set(f64::from(
                scoring::overall_score(snapshot.quality, snapshot.stability, snapshot.stall_ratio),
            ));

            self.ttfb.with_label_values(&labels).set(snapshot.ttfb_ms);
            self.read_throughput
                .with_label_values(&labels)
                .set(snapshot.throughput_bps);
            self.read_stall_count
                .with_label_values(&labels)
                .set(snapshot.stall_count as f64);
            self.read_stall_max
                .with_label_values(&labels)
                .set(snapshot.stall_max_ms);
            self.read_stall_total
                .with_label_values(&labels)
                .set(snapshot.stall_total_ms);
            self.read_stall_ratio
                .with_label_values(&labels)
                .set(snapshot.stall_ratio);
        }
    }
}

/// Resolve the fixed label schema for one stream: base labels from the
/// descriptor, allow-listed user tags where present, empty strings
/// elsewhere. Tags outside the allow-list are dropped here.
fn label_values(descriptor: &StreamDescriptor) -> [String; 8] {
    let tag = |key: &str| descriptor.labels.get(key).cloned().unwrap_or_default();

    [
        descriptor.project.clone(),
        descriptor.line.clone(),
        descriptor.id.clone(),
        tag(ALLOWED_TAG_KEYS[0]),
        tag(ALLOWED_TAG_KEYS[1]),
        tag(ALLOWED_TAG_KEYS[2]),
        tag(ALLOWED_TAG_KEYS[3]),
        tag(ALLOWED_TAG_KEYS[4]),
    ]
}
