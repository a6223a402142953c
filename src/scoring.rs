//! Scoring: the deterministic mapping from raw sample observations to the
//! discrete quality / stability / overall gauges.
//!
//! Everything here is a pure function of its inputs so the same observations
//! always produce the same scores, regardless of which cycle or worker
//! computed them.

use crate::models::{Quality, Stability};

/// Stall ratio above which the overall score is forced to 0. Strictly
/// greater-than: a ratio of exactly 0.5 does not trip the override.
pub const STALL_OVERRIDE_RATIO: f64 = 0.5;

/// A stream is playable once it shows at least two keyframes and more than
/// ten video packets within the sample window.
pub fn is_playable(keyframes: u64, video_packets: u64) -> bool {
    keyframes >= 2 && video_packets > 10
}

/// Video quality from framerate and bitrate. Not playable is always poor.
pub fn quality_label(playable: bool, framerate: f64, bitrate_bps: f64) -> Quality {
    if !playable {
        return Quality::Poor;
    }
    if framerate >= 25.0 && bitrate_bps >= 600_000.0 {
        Quality::Good
    } else if framerate >= 20.0 && bitrate_bps >= 400_000.0 {
        Quality::Fair
    } else {
        Quality::Poor
    }
}

/// Bitrate stability from the coefficient of variation of the rolling
/// history. Needs at least three cycles of history; the variance is the
/// population variance around the supplied mean.
pub fn stability_label(history: &[f64], avg_bitrate: f64) -> Stability {
    if history.len() < 3 {
        return Stability::Unknown;
    }
    if avg_bitrate <= 0.0 {
        return Stability::Unknown;
    }

    let variance = history
        .iter()
        .map(|bitrate| {
            let diff = bitrate - avg_bitrate;
            diff * diff
        })
        .sum::<f64>()
        / history.len() as f64;
    let cv = variance.sqrt() / avg_bitrate;

    if cv < 0.15 {
        Stability::Stable
    } else if cv < 0.30 {
        Stability::Moderate
    } else {
        Stability::Unstable
    }
}

/// Composite score in {0,1,2}. Excessive blocking dominates every other
/// signal: a stall ratio strictly above 0.5 forces 0.
pub fn overall_score(quality: Quality, stability: Stability, stall_ratio: f64) -> u8 {
    if stall_ratio > STALL_OVERRIDE_RATIO {
        return 0;
    }

    match (quality.score(), stability.score()) {
        (2, 2) => 2,
        (2, 1) => 1,
        (2, 0) => 0,
        (1, 2) => 1,
        (1, 1) => 1,
        (1, 0) => 0,
        // quality poor or unknown
        _ => 0,
    }
}
