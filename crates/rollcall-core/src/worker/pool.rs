//! Promotion worker
//!
//! Drains the promotion queue with bounded concurrency, retries contended
//! promotions with backoff, and periodically sweeps for seats that were
//! freed without a promotion ever running.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::queue::{PromotionReceiver, PromotionRequest};
use crate::admission::PromotionCoordinator;
use crate::config::{duration_millis, env_parse, option_duration_millis};
use crate::directory::{DirectoryError, EventDirectory};
use crate::model::Attendance;
use crate::persistence::LedgerError;
use crate::reliability::RetryPolicy;

/// Promotion worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionWorkerConfig {
    /// Identifies this worker in logs
    pub worker_id: String,

    /// Maximum promotions in flight at once
    pub max_concurrency: usize,

    /// Backoff for promotions that hit lock contention or a database error
    pub retry: RetryPolicy,

    /// How often to sweep for unfilled seats (None disables the sweep)
    #[serde(with = "option_duration_millis")]
    pub sweep_interval: Option<Duration>,

    /// Graceful shutdown timeout
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for PromotionWorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("promoter-{}", Uuid::now_v7()),
            max_concurrency: 4,
            retry: RetryPolicy::exponential(),
            sweep_interval: Some(Duration::from_secs(60)),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl PromotionWorkerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `ROLLCALL_WORKER_ID`: worker id (default: generated)
    /// - `ROLLCALL_PROMOTION_CONCURRENCY`: promotions in flight (default: 4)
    /// - `ROLLCALL_SWEEP_INTERVAL_SECS`: vacancy sweep period, 0 disables (default: 60)
    /// - `ROLLCALL_SHUTDOWN_TIMEOUT_SECS`: drain timeout (default: 30)
    /// - `ROLLCALL_PROMOTION_MAX_ATTEMPTS`: attempts per promotion request (default: 5)
    /// - `ROLLCALL_PROMOTION_RETRY_INITIAL_MS`: first retry delay (default: 200)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let worker_id = std::env::var("ROLLCALL_WORKER_ID").unwrap_or(defaults.worker_id);
        let max_concurrency = env_parse::<usize>("ROLLCALL_PROMOTION_CONCURRENCY")
            .unwrap_or(defaults.max_concurrency)
            .max(1);
        let sweep_interval = match env_parse::<u64>("ROLLCALL_SWEEP_INTERVAL_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.sweep_interval,
        };
        let shutdown_timeout = env_parse::<u64>("ROLLCALL_SHUTDOWN_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_timeout);

        let mut retry = defaults.retry;
        if let Some(attempts) = env_parse::<u32>("ROLLCALL_PROMOTION_MAX_ATTEMPTS") {
            retry = retry.with_max_attempts(attempts);
        }
        if let Some(ms) = env_parse::<u64>("ROLLCALL_PROMOTION_RETRY_INITIAL_MS") {
            retry = retry.with_initial_interval(Duration::from_millis(ms));
        }

        Self {
            worker_id,
            max_concurrency,
            retry,
            sweep_interval,
            shutdown_timeout,
        }
    }

    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set maximum concurrency
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Set the sweep interval; None disables the sweep
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Worker status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    /// Consuming requests
    Running,
    /// Finishing in-flight promotions, not taking new ones
    Draining,
    Stopped,
}

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("promotion worker is already running")]
    AlreadyRunning,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

impl WorkerError {
    /// Whether a later attempt at the same promotion can succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_retryable(),
            Self::Directory(DirectoryError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

/// Background consumer of promotion requests
///
/// # Example
///
/// ```ignore
/// use rollcall_core::worker::{PromotionQueue, PromotionWorker, PromotionWorkerConfig};
///
/// let (queue, receiver) = PromotionQueue::new();
/// let worker = PromotionWorker::new(coordinator, directory, PromotionWorkerConfig::from_env());
/// worker.start(receiver)?;
///
/// // ... later, graceful shutdown
/// worker.shutdown().await?;
/// ```
pub struct PromotionWorker {
    coordinator: Arc<PromotionCoordinator>,
    directory: Arc<dyn EventDirectory>,
    config: PromotionWorkerConfig,
    shutdown_tx: watch::Sender<bool>,
    status: RwLock<WorkerStatus>,
    active: Arc<Semaphore>,
    consume_handle: Mutex<Option<JoinHandle<()>>>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PromotionWorker {
    pub fn new(
        coordinator: Arc<PromotionCoordinator>,
        directory: Arc<dyn EventDirectory>,
        config: PromotionWorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let max_concurrency = config.max_concurrency.max(1);

        Self {
            coordinator,
            directory,
            config: PromotionWorkerConfig {
                max_concurrency,
                ..config
            },
            shutdown_tx,
            status: RwLock::new(WorkerStatus::Stopped),
            active: Arc::new(Semaphore::new(max_concurrency)),
            consume_handle: Mutex::new(None),
            sweep_handle: Mutex::new(None),
        }
    }

    /// Start consuming `receiver` and, if configured, the vacancy sweep
    #[instrument(skip(self, receiver), fields(worker_id = %self.config.worker_id))]
    pub fn start(&self, receiver: PromotionReceiver) -> Result<(), WorkerError> {
        {
            let mut status = self.status.write();
            if *status != WorkerStatus::Stopped {
                return Err(WorkerError::AlreadyRunning);
            }
            *status = WorkerStatus::Running;
        }
        self.shutdown_tx.send_replace(false);

        info!(
            worker_id = %self.config.worker_id,
            max_concurrency = self.config.max_concurrency,
            sweep_interval = ?self.config.sweep_interval,
            "Starting promotion worker"
        );

        self.start_consume_loop(receiver);
        if let Some(interval) = self.config.sweep_interval {
            self.start_sweep_loop(interval);
        }

        Ok(())
    }

    /// Stop taking requests and wait for in-flight promotions
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerError> {
        {
            let mut status = self.status.write();
            if *status == WorkerStatus::Stopped {
                return Ok(());
            }
            *status = WorkerStatus::Draining;
        }

        info!(worker_id = %self.config.worker_id, "Initiating graceful shutdown");
        self.shutdown_tx.send_replace(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        let handles = [self.consume_handle.lock().take(), self.sweep_handle.lock().take()];
        for handle in handles.into_iter().flatten() {
            if tokio::time::timeout_at(deadline, handle).await.is_err() {
                warn!("Background loop did not stop before the shutdown deadline");
                return Err(WorkerError::ShutdownTimeout);
            }
        }

        loop {
            let available = self.active.available_permits();
            if available == self.config.max_concurrency {
                debug!("All promotions completed");
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.config.max_concurrency - available,
                    "Shutdown timeout reached"
                );
                return Err(WorkerError::ShutdownTimeout);
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        *self.status.write() = WorkerStatus::Stopped;
        info!(worker_id = %self.config.worker_id, "Promotion worker stopped");
        Ok(())
    }

    pub fn status(&self) -> WorkerStatus {
        *self.status.read()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Run one vacancy sweep now
    ///
    /// Returns how many records were promoted.
    pub async fn sweep(&self) -> Result<usize, WorkerError> {
        sweep_vacancies(&self.coordinator, self.directory.as_ref()).await
    }

    fn start_consume_loop(&self, mut receiver: PromotionReceiver) {
        let coordinator = Arc::clone(&self.coordinator);
        let directory = Arc::clone(&self.directory);
        let retry = self.config.retry.clone();
        let active = Arc::clone(&self.active);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    request = receiver.recv() => request,
                    _ = shutdown_rx.changed() => {
                        debug!("Consume loop: shutdown requested");
                        break;
                    }
                };

                let Some(request) = request else {
                    debug!("Consume loop: queue closed");
                    break;
                };

                let permit = tokio::select! {
                    permit = Arc::clone(&active).acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                    _ = shutdown_rx.changed() => {
                        warn!(event_id = %request.event_id, "Dropping promotion request at shutdown");
                        break;
                    }
                };

                let coordinator = Arc::clone(&coordinator);
                let directory = Arc::clone(&directory);
                let retry = retry.clone();
                tokio::spawn(async move {
                    run_promotion(&coordinator, directory.as_ref(), &retry, request).await;
                    drop(permit);
                });
            }

            debug!("Consume loop exited");
        });

        *self.consume_handle.lock() = Some(handle);
    }

    fn start_sweep_loop(&self, interval: Duration) {
        let coordinator = Arc::clone(&self.coordinator);
        let directory = Arc::clone(&self.directory);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match sweep_vacancies(&coordinator, directory.as_ref()).await {
                            Ok(0) => {}
                            Ok(promoted) => info!(promoted, "Vacancy sweep promoted waitlisted users"),
                            Err(e) => error!("Vacancy sweep failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Sweep loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Sweep loop exited");
        });

        *self.sweep_handle.lock() = Some(handle);
    }
}

/// Promote once for `request`, retrying transient failures
async fn run_promotion(
    coordinator: &PromotionCoordinator,
    directory: &dyn EventDirectory,
    retry: &RetryPolicy,
    request: PromotionRequest,
) {
    let event_id = request.event_id;
    let mut attempt = 1;

    loop {
        match promote_for_request(coordinator, directory, event_id).await {
            Ok(Some(attendance)) => {
                debug!(
                    %event_id,
                    attendance_id = %attendance.id,
                    attempt,
                    queued_for_ms = (attendance.promoted_at.unwrap_or(request.requested_at)
                        - request.requested_at)
                        .num_milliseconds(),
                    "promotion request handled"
                );
                return;
            }
            Ok(None) => {
                debug!(%event_id, "promotion request found no free seat or an empty waitlist");
                return;
            }
            Err(e) if e.is_retryable() && retry.has_attempts_remaining(attempt) => {
                attempt += 1;
                let delay = retry.delay_for_attempt(attempt);
                warn!(%event_id, attempt, ?delay, "Promotion failed, retrying: {}", e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(%event_id, attempt, "Promotion failed: {}", e);
                return;
            }
        }
    }
}

/// Look the event up again and promote into its free seat, if any
async fn promote_for_request(
    coordinator: &PromotionCoordinator,
    directory: &dyn EventDirectory,
    event_id: Uuid,
) -> Result<Option<Attendance>, WorkerError> {
    let Some(event) = directory.get_event(event_id).await? else {
        warn!(%event_id, "promotion requested for unknown event, skipping");
        return Ok(None);
    };

    Ok(coordinator.promote_next(&event).await?)
}

/// Fill open seats at every upcoming event that still has a waitlist
async fn sweep_vacancies(
    coordinator: &PromotionCoordinator,
    directory: &dyn EventDirectory,
) -> Result<usize, WorkerError> {
    let event_ids = coordinator.ledger().events_with_waitlist().await?;
    let mut promoted = 0;

    for event_id in event_ids {
        let Some(event) = directory.get_event(event_id).await? else {
            debug!(%event_id, "sweep: waitlist for unknown event, skipping");
            continue;
        };

        if event.is_past() {
            continue;
        }

        match coordinator.fill_vacancies(&event).await {
            Ok(filled) => promoted += filled.len(),
            // One busy event must not stall the rest of the sweep
            Err(e) if e.is_retryable() => {
                warn!(%event_id, "sweep: skipping event: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(promoted)
}
