//! Core data model: stream descriptors, per-cycle snapshots, and the
//! discrete quality / stability labels derived from them.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use url::Url;

/// Identifies one sampler instance for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub project: String,
    pub line: String,
    pub url: String,
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.project, self.line, self.url)
    }
}

/// Immutable description of a probed stream, created from the config record
/// at startup and never rekeyed.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub id: String,
    pub url: String,
    pub project: String,
    /// Line role: the topological position in the delivery path
    /// (source / service / cdn), lower-cased.
    pub line: String,
    /// Human-readable name used in log records.
    pub name: String,
    /// Full tag map: user tags plus the system keys project / line / id.
    pub labels: HashMap<String, String>,
}

impl StreamDescriptor {
    pub fn new(
        id: String,
        url: String,
        project: String,
        line: String,
        labels: HashMap<String, String>,
    ) -> Self {
        let name = probe_name(&project, &id, &url);
        Self {
            id,
            url,
            project,
            line,
            name,
            labels,
        }
    }

    pub fn key(&self) -> StreamKey {
        StreamKey {
            project: self.project.clone(),
            line: self.line.clone(),
            url: self.url.clone(),
        }
    }
}

static URL_FALLBACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://([^/]+)/(.+)").expect("static regex"));

/// Build the log-friendly probe name `<project>_<host>_<id>_<path>` from a
/// stream URL: host kept verbatim, path with its extension stripped and
/// slashes replaced by underscores.
fn probe_name(project: &str, id: &str, raw_url: &str) -> String {
    let mut host_segment = "unknown".to_string();
    let mut path_segment = "unknown".to_string();

    match Url::parse(raw_url) {
        Ok(parsed) => {
            if let Some(host) = parsed.host_str() {
                if !host.is_empty() {
                    host_segment = host.to_string();
                }
            }

            let mut path = parsed.path().trim_start_matches('/').to_string();
            if !path.is_empty() {
                if let Some(dot) = path.rfind('.') {
                    if dot > path.rfind('/').map_or(0, |s| s + 1) {
                        path.truncate(dot);
                    }
                }
                let path = path.replace('/', "_");
                if !path.is_empty() {
                    path_segment = path;
                }
            }
        }
        Err(_) => {
            if let Some(captures) = URL_FALLBACK.captures(raw_url) {
                if let Some(host) = captures.get(1) {
                    host_segment = host.as_str().to_string();
                }
                if let Some(path) = captures.get(2) {
                    let trimmed = path
                        .as_str()
                        .trim_end_matches(".flv")
                        .trim_end_matches(".m3u8")
                        .replace('/', "_");
                    if !trimmed.is_empty() {
                        path_segment = trimmed;
                    }
                }
            }
        }
    }

    format!("{project}_{host_segment}_{id}_{path_segment}")
}

/// Discrete video quality label for one sampling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Good,
    Fair,
    Poor,
    #[default]
    Unknown,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Good => "good",
            Quality::Fair => "fair",
            Quality::Poor => "poor",
            Quality::Unknown => "unknown",
        }
    }

    /// Gauge projection: good=2, fair=1, everything else 0.
    pub fn score(&self) -> u8 {
        match self {
            Quality::Good => 2,
            Quality::Fair => 1,
            Quality::Poor | Quality::Unknown => 0,
        }
    }
}

/// Discrete bitrate stability label, defined once the bitrate history holds
/// at least three cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    Stable,
    Moderate,
    Unstable,
    #[default]
    Unknown,
}

impl Stability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::Stable => "stable",
            Stability::Moderate => "moderate",
            Stability::Unstable => "unstable",
            Stability::Unknown => "unknown",
        }
    }

    /// Gauge projection: stable=2, moderate=1, everything else 0.
    pub fn score(&self) -> u8 {
        match self {
            Stability::Stable => 2,
            Stability::Moderate => 1,
            Stability::Unstable | Stability::Unknown => 0,
        }
    }
}

/// Per-stream metric snapshot, overwritten each cycle (gauge semantics).
///
/// All fields are mutated only under the owning stream's write lock; readers
/// take a shared lock and copy.
#[derive(Debug, Clone, Default)]
pub struct StreamSnapshot {
    pub total_packets: u64,
    pub video_packets: u64,
    pub audio_packets: u64,
    pub keyframes: u64,

    pub bitrate_bps: f64,
    pub avg_bitrate_bps: f64,
    /// Last <= 10 per-cycle bitrates, oldest first. Retained across failed
    /// cycles so stability recovers quickly after a blip.
    pub bitrate_history: Vec<f64>,
    pub framerate: f64,
    pub gop_size: u64,
    pub codec: String,

    pub response_ms: f64,
    pub ttfb_ms: f64,
    pub throughput_bps: f64,
    pub stall_count: u64,
    pub stall_max_ms: f64,
    pub stall_total_ms: f64,
    /// Fraction of the sample window spent in stalled reads, clamped to [0,1].
    pub stall_ratio: f64,

    pub healthy: bool,
    pub playable: bool,
    pub quality: Quality,
    pub stability: Stability,
    pub consecutive_failures: u32,
    pub last_check_at: Option<DateTime<Utc>>,
}

/// Raw observations and derived rates for one successful sampling pass,
/// handed from the sampler to the store for commit under the stream lock.
#[derive(Debug, Clone, Default)]
pub struct SampleReport {
    pub total_packets: u64,
    pub video_packets: u64,
    pub audio_packets: u64,
    pub keyframes: u64,
    pub codec: Option<&'static str>,

    pub framerate: f64,
    pub bitrate_bps: f64,
    pub gop_size: u64,

    pub response_ms: f64,
    pub ttfb_ms: f64,
    pub throughput_bps: f64,
    pub stall_count: u64,
    pub stall_max_ms: f64,
    pub stall_total_ms: f64,
    pub stall_ratio: f64,
}
