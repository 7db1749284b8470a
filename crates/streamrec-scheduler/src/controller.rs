//! Recording controller boundary.
//!
//! The controller owns the external capture process. The engine only asks
//! it to start, stop and report status, and bounds every call with a
//! timeout.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::Mutex;

use streamrec_types::RecorderStatus;

use crate::clock::Clock;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("{0}")]
    Failed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Trait for whatever runs the capture process.
///
/// `start` on an already-running controller and `stop` on an idle one
/// should succeed without side effects.
#[async_trait]
pub trait RecordingController: Send + Sync {
    /// Start capturing. Returns the time capture began.
    async fn start(&self) -> Result<NaiveDateTime, ControllerError>;

    /// Stop capturing.
    async fn stop(&self) -> Result<(), ControllerError>;

    /// Report whether capture is currently running.
    async fn status(&self) -> Result<RecorderStatus, ControllerError>;
}

/// Run a controller call, turning an overrun into [`ControllerError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ControllerError>
where
    F: Future<Output = Result<T, ControllerError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ControllerError::Timeout(limit)),
    }
}

/// A controller that records nothing and only tracks state in memory.
///
/// Backs `--dry-run` and tests. Failures and latency can be injected.
pub struct InMemoryController {
    clock: Arc<dyn Clock>,
    running_since: Mutex<Option<NaiveDateTime>>,
    start_failures: AtomicU32,
    stop_failures: AtomicU32,
    status_failure: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
}

impl InMemoryController {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            running_since: Mutex::new(None),
            start_failures: AtomicU32::new(0),
            stop_failures: AtomicU32::new(0),
            status_failure: Mutex::new(None),
            delay: Mutex::new(None),
            start_calls: AtomicU32::new(0),
            stop_calls: AtomicU32::new(0),
        }
    }

    /// Make the next `count` start calls fail.
    pub fn fail_next_starts(&self, count: u32) {
        self.start_failures.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` stop calls fail.
    pub fn fail_next_stops(&self, count: u32) {
        self.stop_failures.store(count, Ordering::SeqCst);
    }

    /// Make every status call fail with `reason` until cleared with `None`.
    pub async fn set_status_failure(&self, reason: Option<String>) {
        *self.status_failure.lock().await = reason;
    }

    /// Delay every call by `delay`.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().await = delay;
    }

    /// Simulate a capture started outside the scheduler.
    pub async fn force_running(&self, since: Option<NaiveDateTime>) {
        *self.running_since.lock().await = since;
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u32 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl RecordingController for InMemoryController {
    async fn start(&self) -> Result<NaiveDateTime, ControllerError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if take_failure(&self.start_failures) {
            return Err(ControllerError::Failed("injected start failure".into()));
        }
        let mut running = self.running_since.lock().await;
        Ok(*running.get_or_insert_with(|| self.clock.now()))
    }

    async fn stop(&self) -> Result<(), ControllerError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if take_failure(&self.stop_failures) {
            return Err(ControllerError::Failed("injected stop failure".into()));
        }
        *self.running_since.lock().await = None;
        Ok(())
    }

    async fn status(&self) -> Result<RecorderStatus, ControllerError> {
        self.pause().await;
        if let Some(reason) = self.status_failure.lock().await.clone() {
            return Err(ControllerError::Failed(reason));
        }
        Ok(match *self.running_since.lock().await {
            Some(since) => RecorderStatus::running(since),
            None => RecorderStatus::idle(),
        })
    }
}
