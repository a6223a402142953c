//! HTTP-FLV demultiplexer.
//!
//! Consumes any `AsyncRead` octet source and yields a lazy sequence of typed
//! packets with a monotonic decode timestamp and a keyframe flag. Payload
//! bytes are read (so the byte accounting upstream sees them) but only the
//! first bytes are inspected; the probe counts packets, it does not decode.
//!
//! Live streams are cut at arbitrary byte positions when the origin drops the
//! connection, so end-of-input anywhere (between tags or mid-payload) is a
//! clean end of stream, not an error. Genuine I/O failures (including request
//! cancellation surfacing through the transport) are passed through untouched.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

const FLV_SIGNATURE: [u8; 3] = *b"FLV";

const TAG_AUDIO: u8 = 8;
const TAG_VIDEO: u8 = 9;
const TAG_SCRIPT: u8 = 18;

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("not an FLV stream (signature {0:02x?})")]
    BadSignature([u8; 3]),

    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Hevc,
    Other(u8),
}

impl VideoCodec {
    fn from_id(id: u8) -> Self {
        match id {
            7 => VideoCodec::H264,
            12 => VideoCodec::Hevc,
            other => VideoCodec::Other(other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "H264",
            VideoCodec::Hevc => "HEVC",
            VideoCodec::Other(_) => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Aac,
    Mp3,
    Other(u8),
}

impl AudioCodec {
    fn from_format(format: u8) -> Self {
        match format {
            10 => AudioCodec::Aac,
            2 => AudioCodec::Mp3,
            other => AudioCodec::Other(other),
        }
    }
}

/// What a tag carries. Codec configuration records (AVC/HEVC sequence
/// headers, AudioSpecificConfig) are distinguished from frames so packet
/// counters see frames only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Script,
    Video(VideoCodec),
    VideoConfig(VideoCodec),
    Audio(AudioCodec),
    AudioConfig(AudioCodec),
}

#[derive(Debug, Clone, Copy)]
pub struct FlvPacket {
    pub kind: PacketKind,
    /// Decode timestamp; millisecond granularity on the wire.
    pub dts: Duration,
    pub is_keyframe: bool,
}

pub struct FlvDemuxer<R> {
    reader: R,
    header_read: bool,
    payload: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FlvDemuxer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            header_read: false,
            payload: Vec::new(),
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read the next packet. `Ok(None)` means the stream ended cleanly.
    pub async fn read_packet(&mut self) -> Result<Option<FlvPacket>, DemuxError> {
        if !self.header_read {
            if !self.read_header().await? {
                return Ok(None);
            }
            self.header_read = true;
        }

        loop {
            // Previous-tag-size trailer, then the 11-byte tag header.
            let mut prev = [0u8; 4];
            if !fill(&mut self.reader, &mut prev).await? {
                return Ok(None);
            }

            let mut header = [0u8; 11];
            if !fill(&mut self.reader, &mut header).await? {
                return Ok(None);
            }

            let tag_type = header[0] & 0x1f;
            let data_size = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;
            let timestamp_ms =
                u32::from_be_bytes([header[7], header[4], header[5], header[6]]) as u64;

            self.payload.resize(data_size, 0);
            if !fill(&mut self.reader, &mut self.payload).await? {
                return Ok(None);
            }

            let dts = Duration::from_millis(timestamp_ms);
            let packet = match tag_type {
                TAG_SCRIPT => FlvPacket {
                    kind: PacketKind::Script,
                    dts,
                    is_keyframe: false,
                },
                TAG_VIDEO => match self.classify_video(dts) {
                    Some(packet) => packet,
                    None => continue,
                },
                TAG_AUDIO => match self.classify_audio(dts) {
                    Some(packet) => packet,
                    None => continue,
                },
                // Reserved / encrypted tag types are skipped, not errors.
                _ => continue,
            };

            return Ok(Some(packet));
        }
    }

    fn classify_video(&self, dts: Duration) -> Option<FlvPacket> {
        let first = *self.payload.first()?;
        let frame_type = first >> 4;
        let codec = VideoCodec::from_id(first & 0x0f);

        // AVC/HEVC packet type 0 is the decoder configuration record.
        let is_config = matches!(codec, VideoCodec::H264 | VideoCodec::Hevc)
            && self.payload.get(1) == Some(&0);

        Some(FlvPacket {
            kind: if is_config {
                PacketKind::VideoConfig(codec)
            } else {
                PacketKind::Video(codec)
            },
            dts,
            is_keyframe: frame_type == 1 && !is_config,
        })
    }

    fn classify_audio(&self, dts: Duration) -> Option<FlvPacket> {
        let first = *self.payload.first()?;
        let codec = AudioCodec::from_format(first >> 4);

        // AAC packet type 0 is the AudioSpecificConfig.
        let is_config = codec == AudioCodec::Aac && self.payload.get(1) == Some(&0);

        Some(FlvPacket {
            kind: if is_config {
                PacketKind::AudioConfig(codec)
            } else {
                PacketKind::Audio(codec)
            },
            dts,
            is_keyframe: false,
        })
    }

    /// Parse the 9-byte file header and skip to the first tag boundary.
    /// Returns false when the stream ends before the header completes.
    async fn read_header(&mut self) -> Result<bool, DemuxError> {
        let mut header = [0u8; 9];
        if !fill(&mut self.reader, &mut header).await? {
            return Ok(false);
        }

        let signature = [header[0], header[1], header[2]];
        if signature != FLV_SIGNATURE {
            return Err(DemuxError::BadSignature(signature));
        }

        let data_offset = u32::from_be_bytes([header[5], header[6], header[7], header[8]]);
        let trailing = (data_offset as usize).saturating_sub(header.len());
        if trailing > 0 {
            let mut skip = vec![0u8; trailing];
            if !fill(&mut self.reader, &mut skip).await? {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// read_exact with end-of-input folded into `Ok(false)`.
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<bool, DemuxError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(err) => Err(DemuxError::Io(err)),
    }
}
