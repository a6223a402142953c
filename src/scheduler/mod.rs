//! Cycle scheduler: every `check_interval` it fans one sampling job per
//! stream out through a bounded semaphore, with exponential-backoff retries
//! per stream and a hard failure boundary that resets the snapshot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::config::ProbeConfig;
use crate::errors::SampleError;
use crate::probe::Sampler;
use crate::store::{StreamState, StreamStore};

pub type ShutdownSender = watch::Sender<bool>;
pub type ShutdownReceiver = watch::Receiver<bool>;

pub fn shutdown_channel() -> (ShutdownSender, ShutdownReceiver) {
    watch::channel(false)
}

/// Per-attempt deadline: the sample window plus headroom for connection
/// setup, widened on long-interval deployments.
pub fn attempt_timeout(probe: &ProbeConfig) -> Duration {
    if probe.check_interval > 20 {
        Duration::from_secs(probe.check_interval - 5)
    } else {
        Duration::from_secs(probe.sample_duration + 5)
    }
}

/// Backoff before retry attempt `attempt` (1-based): 2s, 4s, 8s, ...
pub fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt)
}

pub struct Scheduler {
    store: StreamStore,
    sampler: Arc<Sampler>,
    probe: ProbeConfig,
    shutdown: ShutdownReceiver,
}

impl Scheduler {
    pub fn new(
        store: StreamStore,
        sampler: Arc<Sampler>,
        probe: ProbeConfig,
        shutdown: ShutdownReceiver,
    ) -> Self {
        Self {
            store,
            sampler,
            probe,
            shutdown,
        }
    }

    /// Run until shutdown. The first cycle starts immediately; cycles may
    /// overlap when a prior cycle outlives the interval, and each cycle gets
    /// fresh workers so nothing is shared across cycles but the store.
    pub async fn run(mut self) {
        let stream_count = self.store.len().await;
        info!(
            streams = stream_count,
            check_interval_s = self.probe.check_interval,
            max_concurrent = self.probe.max_concurrent,
            max_retries = self.probe.max_retries,
            "scheduler started"
        );

        let mut ticker = interval(self.probe.check_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let store = self.store.clone();
                    let sampler = Arc::clone(&self.sampler);
                    let probe = self.probe.clone();
                    tokio::spawn(async move {
                        run_cycle(store, sampler, probe).await;
                    });
                }
                _ = self.shutdown.changed() => {
                    info!("scheduler stopped");
                    return;
                }
            }
        }
    }
}

/// One check cycle: dispatch every stream through the semaphore and wait for
/// all workers to come back.
pub async fn run_cycle(store: StreamStore, sampler: Arc<Sampler>, probe: ProbeConfig) {
    let cycle_start = Instant::now();
    let streams = store.streams().await;

    info!(
        streams = streams.len(),
        max_concurrent = probe.max_concurrent,
        sample_duration_s = probe.sample_duration,
        "check cycle started"
    );

    let semaphore = Arc::new(Semaphore::new(probe.max_concurrent));
    let mut workers = JoinSet::new();

    for stream in streams {
        let semaphore = Arc::clone(&semaphore);
        let sampler = Arc::clone(&sampler);
        let probe = probe.clone();
        workers.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return false;
            };
            check_with_retry(&sampler, &stream, &probe).await.is_ok()
        });
    }

    let mut succeeded = 0u64;
    let mut failed = 0u64;
    while let Some(outcome) = workers.join_next().await {
        match outcome {
            Ok(true) => succeeded += 1,
            _ => failed += 1,
        }
    }

    info!(
        elapsed_s = format!("{:.2}", cycle_start.elapsed().as_secs_f64()),
        succeeded,
        failed,
        "check cycle complete"
    );
}

/// Run the sampler with up to `max_retries` additional attempts. Exhaustion
/// marks the stream failed and surfaces the last error; retries never cross
/// a cycle boundary.
pub async fn check_with_retry(
    sampler: &Sampler,
    stream: &Arc<StreamState>,
    probe: &ProbeConfig,
) -> Result<(), SampleError> {
    let timeout = attempt_timeout(probe);
    let mut last_error: Option<SampleError> = None;

    for attempt in 0..=probe.max_retries {
        if attempt > 0 {
            let delay = retry_delay(attempt);
            info!(
                stream_id = %stream.descriptor.id,
                attempt,
                delay_s = delay.as_secs(),
                "waiting before retry"
            );
            tokio::time::sleep(delay).await;
        }

        match sampler.sample(stream, timeout).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(
                    stream_id = %stream.descriptor.id,
                    attempt = attempt + 1,
                    attempts_max = probe.max_retries + 1,
                    kind = err.kind(),
                    error = %err,
                    "check attempt failed"
                );
                last_error = Some(err);
            }
        }
    }

    stream.mark_failed().await;
    let Some(err) = last_error else {
        // Unreachable: the loop always runs at least one attempt.
        return Ok(());
    };
    error!(
        stream_id = %stream.descriptor.id,
        attempts = probe.max_retries + 1,
        error = %err,
        "retries exhausted, stream marked failed"
    );
    Err(err)
}
