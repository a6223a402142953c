//! Stream sampler: open one HTTP-FLV endpoint, pull packets through the
//! stall-tracking reader for a bounded window, derive the per-cycle metric
//! snapshot and commit it to the stream's store entry.

use std::io;
use std::time::{Duration, Instant};

use futures::TryStreamExt;
use reqwest::{Client, StatusCode};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::errors::SampleError;
use crate::flv::{DemuxError, FlvDemuxer, PacketKind};
use crate::models::SampleReport;
use crate::probe::reader::StallReader;
use crate::store::StreamState;

/// Idle connections kept per origin host, shared process-wide so repeated
/// cycles amortise TCP/TLS setup.
const POOL_MAX_IDLE_PER_HOST: usize = 50;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Build the process-wide HTTP transport. No client-level timeout: deadlines
/// are enforced per request so a slow sample cannot be cut short by an
/// unrelated knob.
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// True when a demux read failure is really the per-attempt deadline firing
/// on the transport; the deadline surfaces through the body stream as an
/// ordinary read error.
fn is_deadline(err: &DemuxError) -> bool {
    match err {
        DemuxError::Io(io_err) => {
            io_err.kind() == io::ErrorKind::TimedOut
                || io_err
                    .get_ref()
                    .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
                    .is_some_and(reqwest::Error::is_timeout)
        }
        DemuxError::BadSignature(_) => false,
    }
}

pub struct Sampler {
    client: Client,
    probe: ProbeConfig,
}

impl Sampler {
    pub fn new(client: Client, probe: ProbeConfig) -> Self {
        Self { client, probe }
    }

    /// Run one sampling pass against `stream` with a hard deadline. On
    /// success the stream's snapshot is overwritten; on failure it is left
    /// untouched (the retry wrapper decides when to mark it failed).
    pub async fn sample(
        &self,
        stream: &StreamState,
        timeout: Duration,
    ) -> Result<(), SampleError> {
        let descriptor = &stream.descriptor;
        debug!(
            stream_id = %descriptor.id,
            name = %descriptor.name,
            url = %descriptor.url,
            timeout_s = timeout.as_secs(),
            "sampling stream"
        );

        let request_start = Instant::now();
        let response = self
            .client
            .get(&descriptor.url)
            .timeout(timeout)
            .send()
            .await
            .map_err(SampleError::from_request)?;

        let response_ms = request_start.elapsed().as_secs_f64() * 1000.0;
        if response.status() != StatusCode::OK {
            return Err(SampleError::HttpStatus(response.status()));
        }

        let body = StreamReader::new(response.bytes_stream().map_err(io::Error::other));
        let reader = StallReader::new(body, self.probe.stall_threshold());
        let mut demuxer = FlvDemuxer::new(reader);

        let sample_duration = self.probe.sample_duration();
        let sample_start = Instant::now();

        let mut total_packets = 0u64;
        let mut video_packets = 0u64;
        let mut audio_packets = 0u64;
        let mut keyframes = 0u64;
        let mut first_dts: Option<Duration> = None;
        let mut last_dts: Option<Duration> = None;
        let mut codec: Option<&'static str> = None;

        loop {
            let elapsed = sample_start.elapsed();
            // Normal stop: window elapsed and enough keyframes collected.
            if elapsed >= sample_duration && keyframes >= self.probe.min_keyframes {
                break;
            }
            // Hard stop: bound the worst case even if keyframes never arrive.
            if elapsed >= sample_duration * 2 {
                break;
            }

            match demuxer.read_packet().await {
                Ok(Some(packet)) => {
                    total_packets += 1;
                    match packet.kind {
                        PacketKind::Video(video_codec) => {
                            video_packets += 1;
                            if packet.is_keyframe {
                                keyframes += 1;
                            }
                            if first_dts.is_none() {
                                first_dts = Some(packet.dts);
                            }
                            last_dts = Some(packet.dts);
                            codec.get_or_insert(video_codec.as_str());
                        }
                        PacketKind::Audio(_) => {
                            audio_packets += 1;
                        }
                        PacketKind::Script
                        | PacketKind::VideoConfig(_)
                        | PacketKind::AudioConfig(_) => {}
                    }
                }
                Ok(None) => break,
                Err(err) if is_deadline(&err) => {
                    return Err(SampleError::DeadlineExceeded(err.to_string()));
                }
                Err(err) => return Err(err.into()),
            }
        }

        if video_packets == 0 {
            return Err(SampleError::NoVideo);
        }

        let sample_elapsed = sample_start.elapsed().as_secs_f64();
        let stats = demuxer.get_ref().stats().clone();

        // DTS window when valid, wall clock otherwise.
        let dts_elapsed = match (first_dts, last_dts) {
            (Some(first), Some(last)) if last > first => Some((last - first).as_secs_f64()),
            _ => None,
        };

        let framerate = match dts_elapsed {
            Some(window) => video_packets as f64 / window,
            None => 0.0,
        };
        let bits = stats.bytes_read as f64 * 8.0;
        let bitrate_bps = match dts_elapsed {
            Some(window) => bits / window,
            None if sample_elapsed > 0.0 => bits / sample_elapsed,
            None => 0.0,
        };

        let gop_size = if keyframes > 1 {
            video_packets / keyframes
        } else if keyframes == 1 {
            video_packets
        } else {
            0
        };

        let ttfb_ms = stats
            .first_read_at
            .map(|at| at.duration_since(request_start).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let throughput_bps = if sample_elapsed > 0.0 {
            bits / sample_elapsed
        } else {
            0.0
        };

        let stall_ratio = if sample_elapsed > 0.0 {
            (stats.total_stall.as_secs_f64() / sample_elapsed).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let report = SampleReport {
            total_packets,
            video_packets,
            audio_packets,
            keyframes,
            codec,
            framerate,
            bitrate_bps,
            gop_size,
            response_ms,
            ttfb_ms,
            throughput_bps,
            stall_count: stats.stall_count,
            stall_max_ms: stats.max_stall.as_secs_f64() * 1000.0,
            stall_total_ms: stats.total_stall.as_secs_f64() * 1000.0,
            stall_ratio,
        };

        debug!(
            stream_id = %descriptor.id,
            elapsed_s = format!("{sample_elapsed:.2}"),
            video_packets,
            keyframes,
            bitrate_kbps = format!("{:.1}", report.bitrate_bps / 1000.0),
            framerate = format!("{:.1}", report.framerate),
            gop = report.gop_size,
            stalls = report.stall_count,
            "sample complete"
        );

        stream.commit_sample(report).await;
        Ok(())
    }
}
