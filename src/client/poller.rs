use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::models::generation::JobStatusView;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2500);

/// Where the poller reads job status from.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, entity_id: Uuid, job_id: Uuid) -> Result<JobStatusView, PollError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("Status request failed: {0}")]
    Request(String),

    #[error("Status endpoint returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed status response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Stopped,
}

/// Controls a running poll loop. Dropping the handle stops the loop.
pub struct PollHandle {
    cancel: CancellationToken,
    state: watch::Receiver<PollerState>,
}

impl PollHandle {
    /// Cancel the timer and any in-flight request. No callback fires afterwards.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Resolves once the loop has stopped for any reason.
    pub async fn stopped(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == PollerState::Stopped)
            .await;
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Finish {
    Terminal(JobStatusView),
    Failed(PollError),
    Cancelled,
}

pub struct StatusPoller;

impl StatusPoller {
    /// Poll `job_id` until it reaches a terminal state or fails.
    ///
    /// Checks once immediately, then on every tick. A tick that arrives while a
    /// check is still in flight drops that check and starts a new one. Must be
    /// called from within a tokio runtime.
    pub fn start<S, E>(
        source: Arc<dyn StatusSource>,
        entity_id: Uuid,
        job_id: Uuid,
        config: PollConfig,
        on_success: S,
        on_error: E,
    ) -> PollHandle
    where
        S: FnOnce(JobStatusView) + Send + 'static,
        E: FnOnce(PollError) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(PollerState::Idle);

        let token = cancel.clone();
        tokio::spawn(async move {
            state_tx.send_replace(PollerState::Polling);
            let finish = poll_until_done(source.as_ref(), entity_id, job_id, &config, &token).await;
            state_tx.send_replace(PollerState::Stopped);

            if token.is_cancelled() {
                return;
            }
            match finish {
                Finish::Terminal(view) => on_success(view),
                Finish::Failed(err) => on_error(err),
                Finish::Cancelled => {}
            }
        });

        PollHandle {
            cancel,
            state: state_rx,
        }
    }
}

async fn poll_until_done(
    source: &dyn StatusSource,
    entity_id: Uuid,
    job_id: Uuid,
    config: &PollConfig,
    cancel: &CancellationToken,
) -> Finish {
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; it stands for the initial check.
    ticker.tick().await;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Finish::Cancelled,
            result = source.fetch(entity_id, job_id) => result,
            _ = ticker.tick() => {
                debug!(%job_id, "Status check superseded by next tick");
                continue;
            }
        };

        match result {
            Ok(view) if view.is_terminal() => return Finish::Terminal(view),
            Ok(view) => debug!(%job_id, status = %view.status, "Job still running"),
            Err(err) => return Finish::Failed(err),
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Finish::Cancelled,
            _ = ticker.tick() => {}
        }
    }
}
