//! Per-job lanes that drive remote calls outside the tracker actor.
//!
//! A job's submission lane runs first; once the tracker has persisted the
//! Submitted state it starts the job's poll lane. Lanes never touch job
//! records. They report to the tracker with messages and exit when their
//! job's cancellation token fires, finishing any call already in flight.

use std::sync::Arc;
use std::time::Duration;

use batch::{RemoteBatchClient, RemoteJobId, RemoteStatus, with_deadline};
use ractor::ActorRef;
use reading_core::{JobDescriptor, JobId, RetryPolicy};
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::messages::{PollOutcome, TrackerMessage};

/// Shared pieces every lane needs.
pub(crate) struct LaneContext<C> {
    pub client: Arc<C>,
    pub tracker: ActorRef<TrackerMessage>,
    pub permits: Arc<Semaphore>,
    pub token: CancellationToken,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

/// Sleep for `delay` unless `token` fires first. Returns false when cancelled.
async fn pause(token: &CancellationToken, delay: Duration) -> bool {
    if delay.is_zero() {
        return !token.is_cancelled();
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Wait for a call permit. Returns `None` once the lane is cancelled.
async fn call_permit<'a>(
    token: &CancellationToken,
    permits: &'a Semaphore,
) -> Option<SemaphorePermit<'a>> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        permit = permits.acquire() => permit.ok(),
    }
}

pub(crate) async fn submit_lane<C: RemoteBatchClient>(
    ctx: LaneContext<C>,
    descriptor: JobDescriptor,
    active_slots: Option<Arc<Semaphore>>,
) {
    let job_id = descriptor.id();

    let slot = match active_slots {
        Some(slots) => tokio::select! {
            _ = ctx.token.cancelled() => return,
            slot = slots.acquire_owned() => slot.ok(),
        },
        None => None,
    };

    let mut failures = 0u32;
    let result = loop {
        if ctx.token.is_cancelled() {
            return;
        }

        let attempt = {
            let Some(_permit) = call_permit(&ctx.token, &ctx.permits).await else {
                return;
            };
            with_deadline(ctx.call_timeout, ctx.client.submit(&descriptor)).await
        };

        match attempt {
            Ok(remote_id) => break Ok(remote_id),
            Err(e) if e.is_transient() => {
                failures += 1;
                tracing::warn!(
                    "Submit of job {} failed (attempt {}): {}",
                    descriptor.name(),
                    failures,
                    e
                );
                if ctx.retry.exhausted(failures) {
                    break Err(format!("submission exhausted: {}", e.message()));
                }
                if !pause(&ctx.token, ctx.retry.backoff(failures)).await {
                    return;
                }
            }
            Err(e) => break Err(format!("submission rejected: {}", e.message())),
        }
    };

    let _ = ctx.tracker.send_message(TrackerMessage::SubmitOutcome {
        job_id,
        result,
        slot,
    });
}

/// Tracks how long a running job's log has gone without growing.
///
/// The clock starts when the job is first seen Running and restarts on
/// every new line. A job that has not logged anything is never stalled.
struct StallWatch {
    window: Duration,
    lines: usize,
    last_growth: Instant,
}

impl StallWatch {
    fn new(window: Duration) -> Self {
        Self {
            window,
            lines: 0,
            last_growth: Instant::now(),
        }
    }

    fn observe(&mut self, lines: usize) {
        if lines > self.lines {
            self.lines = lines;
            self.last_growth = Instant::now();
        }
    }

    fn stalled(&self) -> bool {
        self.lines > 0 && self.last_growth.elapsed() >= self.window
    }
}

pub(crate) struct PollSettings {
    pub interval: Duration,
    pub stall_timeout: Option<Duration>,
}

pub(crate) async fn poll_lane<C: RemoteBatchClient>(
    ctx: LaneContext<C>,
    job_id: JobId,
    remote_id: RemoteJobId,
    settings: PollSettings,
) {
    let mut seq = 0u64;
    let mut failures = 0u32;
    let mut delay = Duration::ZERO;
    let mut stall: Option<StallWatch> = None;

    loop {
        if !pause(&ctx.token, delay).await {
            return;
        }

        let result = {
            let Some(_permit) = call_permit(&ctx.token, &ctx.permits).await else {
                return;
            };
            with_deadline(ctx.call_timeout, ctx.client.poll(&remote_id)).await
        };

        let (outcome, done) = match result {
            Ok(status) => {
                failures = 0;
                let done = status.job_state().is_terminal();
                (PollOutcome::Status(status), done)
            }
            Err(e) if e.is_transient() => {
                failures += 1;
                tracing::debug!("Poll of {} failed ({}): {}", remote_id, failures, e);
                let outcome = PollOutcome::Transient {
                    error: e.message().to_string(),
                    failures,
                };
                (outcome, ctx.retry.exhausted(failures))
            }
            Err(e) => (
                PollOutcome::Permanent {
                    error: e.message().to_string(),
                },
                true,
            ),
        };

        let running = matches!(outcome, PollOutcome::Status(RemoteStatus::Running));
        seq += 1;
        if ctx
            .tracker
            .send_message(TrackerMessage::PollOutcome {
                job_id,
                seq,
                outcome,
            })
            .is_err()
            || done
        {
            return;
        }

        if running && let Some(window) = settings.stall_timeout {
            let watch = stall.get_or_insert_with(|| StallWatch::new(window));
            let logs = {
                let Some(_permit) = call_permit(&ctx.token, &ctx.permits).await else {
                    return;
                };
                with_deadline(ctx.call_timeout, ctx.client.fetch_logs(&remote_id)).await
            };
            let fetched = match logs {
                Ok(lines) => {
                    watch.observe(lines.len());
                    true
                }
                Err(e) => {
                    tracing::debug!("Log fetch for {} failed: {}", remote_id, e);
                    false
                }
            };
            if fetched && watch.stalled() {
                seq += 1;
                let _ = ctx.tracker.send_message(TrackerMessage::PollOutcome {
                    job_id,
                    seq,
                    outcome: PollOutcome::Stalled {
                        secs: watch.window.as_secs(),
                    },
                });
                return;
            }
        }

        delay = if failures > 0 {
            ctx.retry.backoff(failures)
        } else {
            settings.interval
        };
    }
}

/// Issue a best-effort remote cancel, publishing the result as an event.
pub(crate) async fn cancel_remote<C: RemoteBatchClient>(
    client: Arc<C>,
    permits: Arc<Semaphore>,
    call_timeout: Duration,
    events: tokio::sync::broadcast::Sender<reading_core::JobEvent>,
    job_id: JobId,
    remote_id: RemoteJobId,
    reason: String,
) {
    let result = {
        let Ok(_permit) = permits.acquire().await else {
            return;
        };
        with_deadline(call_timeout, client.cancel(&remote_id, &reason)).await
    };

    let now = chrono::Utc::now();
    let event = match result {
        Ok(()) => {
            tracing::info!("Cancelled remote job {} ({})", remote_id, reason);
            reading_core::JobEvent::CancelIssued {
                job_id,
                remote_job_id: remote_id.to_string(),
                timestamp: now,
            }
        }
        Err(e) => {
            tracing::warn!("Failed to cancel remote job {}: {}", remote_id, e);
            reading_core::JobEvent::CancelFailed {
                job_id,
                error: e.to_string(),
                timestamp: now,
            }
        }
    };
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stall_watch_resets_on_growth() {
        let mut watch = StallWatch::new(Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(6)).await;
        watch.observe(3);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!watch.stalled());

        watch.observe(3);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(watch.stalled());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_log_never_stalls() {
        let mut watch = StallWatch::new(Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(30)).await;
        watch.observe(0);
        assert!(!watch.stalled());

        // The first line starts the clock.
        watch.observe(1);
        assert!(!watch.stalled());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(watch.stalled());
    }

    #[tokio::test]
    async fn call_permit_gives_up_when_cancelled() {
        let token = CancellationToken::new();
        let permits = Semaphore::new(1);

        let held = permits.acquire().await.unwrap();
        let waiter = call_permit(&token, &permits);
        token.cancel();
        assert!(waiter.await.is_none());

        // Cancellation wins even when a permit is free.
        drop(held);
        assert!(call_permit(&token, &permits).await.is_none());
    }
}
