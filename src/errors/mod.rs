//! Sampler failure taxonomy.
//!
//! Every variant is retryable within a cycle; the retry wrapper only cares
//! about success or failure, the kinds exist so log records can tell a
//! deadline apart from a refused connection or a silent stream.

use thiserror::Error;

use crate::flv::DemuxError;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to build request: {0}")]
    RequestBuild(#[source] reqwest::Error),

    #[error("connection failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("unexpected HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("packet read failed: {0}")]
    Demux(#[from] DemuxError),

    #[error("no video stream in sample window")]
    NoVideo,
}

impl SampleError {
    /// Short tag for structured log records.
    pub fn kind(&self) -> &'static str {
        match self {
            SampleError::RequestBuild(_) => "request_build",
            SampleError::Transport(_) => "transport",
            SampleError::DeadlineExceeded(_) => "deadline",
            SampleError::HttpStatus(_) => "http_status",
            SampleError::Demux(_) => "demux",
            SampleError::NoVideo => "no_video",
        }
    }

    /// Classify a reqwest failure from the request/response-header phase.
    pub fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SampleError::DeadlineExceeded(err.to_string())
        } else if err.is_builder() {
            SampleError::RequestBuild(err)
        } else {
            SampleError::Transport(err)
        }
    }
}
