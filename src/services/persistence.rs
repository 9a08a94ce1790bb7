//! Drains the persistence queue outside the game lock. Failed writes are retried
//! with backoff; exhausted ones raise an admin alert and are counted, but never
//! touch the game state.

use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    dao::{game_store::execute, models::PersistJob, storage::StorageError},
    dto::sse::PersistenceAlert,
    services::sse_events,
    state::{PersistQueue, SharedState},
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const MAX_ATTEMPTS: u32 = 4;

#[derive(Debug, Error)]
#[error("no storage backend installed")]
struct NoBackend;

/// Retry schedule of the worker.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay after the first failure, doubled after each retry.
    pub initial_delay: Duration,
    /// Upper bound of the delay.
    pub max_delay: Duration,
    /// Total attempts per record, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: INITIAL_DELAY,
            max_delay: MAX_DELAY,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

/// Consume queued jobs until every sender is gone.
pub async fn run(state: SharedState, mut queue: PersistQueue, policy: RetryPolicy) {
    info!("persistence worker started");
    while let Some(job) = queue.recv().await {
        persist(&state, job, policy).await;
    }
    info!("persistence queue closed; worker stopping");
}

async fn persist(state: &SharedState, job: PersistJob, policy: RetryPolicy) {
    let kind = job.kind();
    let mut delay = policy.initial_delay;
    let mut attempt = 1;

    loop {
        let result = match state.game_store().await {
            Some(store) => execute(store.as_ref(), job.clone()).await,
            None => Err(StorageError::unavailable("degraded mode".into(), NoBackend)),
        };
        let err = match result {
            Ok(()) => {
                debug!(record = kind, attempt, "record stored");
                return;
            }
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= policy.max_attempts {
            alert(state, kind, attempt, err.to_string());
            return;
        }
        warn!(record = kind, attempt, error = %err, "storing record failed; retrying");
        sleep(delay).await;
        delay = (delay * 2).min(policy.max_delay);
        attempt += 1;
    }
}

fn alert(state: &SharedState, record: &'static str, attempts: u32, error: String) {
    let total_failures = state.record_persistence_failure();
    error!(record, attempts, total_failures, error = %error, "giving up on record");
    sse_events::broadcast_persistence_alert(
        state,
        &PersistenceAlert {
            record: record.to_string(),
            attempts,
            error,
            total_failures,
        },
    );
}
