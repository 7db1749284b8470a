//! Scheduler engine: reconciles desired recording state with the controller.
//!
//! Each tick derives `desired` from the stored rules and `actual` from the
//! recording controller, issues at most one start or stop, disables expired
//! one-time rules, and persists its bookkeeping. Nothing is carried in
//! memory between ticks except the current phase and a failure counter, so
//! a restarted process converges within one tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use streamrec_config::SchedulerConfig;
use streamrec_types::{EnginePhase, EngineRunState, RecorderStatus, ScheduleRule};

use crate::clock::Clock;
use crate::controller::{ControllerError, RecordingController, with_timeout};
use crate::occurrence;
use crate::store::ScheduleStore;
use crate::Result;

/// Engine timing knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub tick_interval: Duration,
    pub controller_timeout: Duration,
    pub escalate_after: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for EngineConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            tick_interval: Duration::from_secs(config.tick_interval_secs.max(1)),
            controller_timeout: Duration::from_secs(config.controller_timeout_secs.max(1)),
            escalate_after: config.escalate_after.max(1),
        }
    }
}

/// What a tick did about the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickAction {
    /// Desired and actual already agreed.
    None,
    Started,
    Stopped,
    StartFailed,
    StopFailed,
    /// Status could not be read; nothing was attempted.
    StatusUnknown,
    /// A capture the engine did not start is running outside any window.
    LeftRunning,
}

/// Summary of one completed tick.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub at: NaiveDateTime,
    pub desired: bool,
    /// `None` when the controller status could not be read.
    pub actual: Option<bool>,
    pub action: TickAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// One-time rules disabled by this tick's sweep.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Completed(TickReport),
    /// The tick was aborted, usually because storage was unavailable.
    Failed { error: String },
    /// Another tick was still running.
    Skipped,
}

/// What a tick would decide right now, computed without side effects.
#[derive(Debug, Clone, Serialize)]
pub struct TickPreview {
    pub at: NaiveDateTime,
    pub desired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    /// One-time rules the next sweep would disable.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expired: Vec<String>,
    pub run_state: EngineRunState,
}

/// Engine status for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub phase: EnginePhase,
    pub tick_interval_secs: u64,
    pub run_state: EngineRunState,
}

/// Drives the recording controller from the schedule.
pub struct SchedulerEngine {
    store: Arc<ScheduleStore>,
    controller: Arc<dyn RecordingController>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    phase: RwLock<EnginePhase>,
    tick_lock: Mutex<()>,
    failures: AtomicU32,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<ScheduleStore>,
        controller: Arc<dyn RecordingController>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            controller,
            clock,
            config,
            phase: RwLock::new(EnginePhase::Idle),
            tick_lock: Mutex::new(()),
            failures: AtomicU32::new(0),
        }
    }

    pub async fn phase(&self) -> EnginePhase {
        *self.phase.read().await
    }

    async fn set_phase(&self, phase: EnginePhase) {
        *self.phase.write().await = phase;
    }

    /// Current phase plus the persisted run state.
    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        Ok(EngineSnapshot {
            phase: self.phase().await,
            tick_interval_secs: self.config.tick_interval.as_secs(),
            run_state: self.store.load_run_state().await?,
        })
    }

    /// Ticks that failed in a row, whether storage or the controller failed.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Evaluate the schedule at the current time without touching the
    /// controller, the rules or the persisted run state.
    pub async fn preview(&self) -> Result<TickPreview> {
        let now = self.clock.now();
        let rules = self.store.list().await?;
        let run_state = self.store.load_run_state().await?;

        let active = occurrence::active_rules(&rules, now);
        let expired = rules
            .iter()
            .filter(|r| r.enabled && occurrence::has_expired(r, now))
            .map(|r| r.id.clone())
            .collect();

        Ok(TickPreview {
            at: now,
            desired: !active.is_empty(),
            rule_id: active.first().map(|rule| rule.id.clone()),
            expired,
            run_state,
        })
    }

    /// Run one tick now. Skipped if another tick is in flight.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!("Tick already in progress, skipping");
            return TickOutcome::Skipped;
        };

        let now = self.clock.now();
        match self.run_tick(now).await {
            Ok(report) => TickOutcome::Completed(report),
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.escalate_after {
                    error!(failures, "Scheduler tick failed repeatedly: {e}");
                } else {
                    warn!(failures, "Scheduler tick aborted: {e}");
                }
                TickOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run_tick(&self, now: NaiveDateTime) -> Result<TickReport> {
        let rules = self.store.list().await?;
        let mut state = self.store.load_run_state().await?;

        let active = occurrence::active_rules(&rules, now);
        let desired = !active.is_empty();
        let lead = active.first().map(|rule| rule.id.clone());

        let mut report = TickReport {
            at: now,
            desired,
            actual: None,
            action: TickAction::None,
            rule_id: None,
            disabled: Vec::new(),
            error: None,
        };

        match self.call(self.controller.status()).await {
            Ok(status) => {
                report.actual = Some(status.active);
                self.reconcile(desired, status, lead, &mut state, &mut report)
                    .await;
            }
            Err(e) => {
                warn!("Recording status unavailable, will retry next tick: {e}");
                report.action = TickAction::StatusUnknown;
                report.error = Some(e.to_string());
            }
        }

        report.disabled = self.sweep(&rules, now).await?;

        let failures = if report.error.is_some() {
            let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures >= self.config.escalate_after {
                error!(failures, "Recording controller keeps failing");
            }
            failures
        } else {
            self.failures.store(0, Ordering::SeqCst);
            0
        };

        state.last_tick = Some(now);
        state.desired = desired;
        state.last_error = report.error.clone();
        state.consecutive_failures = failures;
        self.store.save_run_state(&state).await?;

        debug!(
            desired,
            actual = ?report.actual,
            action = ?report.action,
            "Tick complete"
        );
        Ok(report)
    }

    async fn reconcile(
        &self,
        desired: bool,
        status: RecorderStatus,
        lead: Option<String>,
        state: &mut EngineRunState,
        report: &mut TickReport,
    ) {
        match (desired, status.active) {
            (true, true) => {
                if !state.owns_recording {
                    info!(schedule_id = ?lead, "Adopting running recording for active schedule");
                    state.owns_recording = true;
                    state.last_rule_id = lead.clone();
                    report.rule_id = lead;
                }
                self.set_phase(EnginePhase::Active).await;
            }
            (false, false) => {
                state.owns_recording = false;
                self.set_phase(EnginePhase::Idle).await;
            }
            (true, false) => {
                self.set_phase(EnginePhase::Triggering).await;
                report.rule_id = lead.clone();
                match self.call(self.controller.start()).await {
                    Ok(since) => {
                        info!(schedule_id = ?lead, %since, "Scheduled recording started");
                        state.owns_recording = true;
                        state.last_rule_id = lead;
                        report.action = TickAction::Started;
                        self.set_phase(EnginePhase::Active).await;
                    }
                    Err(e) => {
                        warn!(schedule_id = ?lead, "Failed to start recording, will retry next tick: {e}");
                        report.action = TickAction::StartFailed;
                        report.error = Some(e.to_string());
                        self.set_phase(EnginePhase::Idle).await;
                    }
                }
            }
            (false, true) if state.owns_recording => {
                self.set_phase(EnginePhase::Triggering).await;
                report.rule_id = state.last_rule_id.clone();
                match self.call(self.controller.stop()).await {
                    Ok(()) => {
                        info!(schedule_id = ?state.last_rule_id, "Scheduled recording stopped");
                        state.owns_recording = false;
                        report.action = TickAction::Stopped;
                        self.set_phase(EnginePhase::Idle).await;
                    }
                    Err(e) => {
                        warn!("Failed to stop recording, will retry next tick: {e}");
                        report.action = TickAction::StopFailed;
                        report.error = Some(e.to_string());
                        self.set_phase(EnginePhase::Active).await;
                    }
                }
            }
            (false, true) => {
                debug!("Recording running outside any schedule and not started by scheduler");
                report.action = TickAction::LeftRunning;
                self.set_phase(EnginePhase::Idle).await;
            }
        }
    }

    /// Disable enabled one-time rules whose window has ended.
    ///
    /// `rules` only nominates candidates; each one is checked again against
    /// its stored record, since the listing may be stale by now.
    async fn sweep(&self, rules: &[ScheduleRule], now: NaiveDateTime) -> Result<Vec<String>> {
        let mut disabled = Vec::new();
        for rule in rules
            .iter()
            .filter(|r| r.enabled && occurrence::has_expired(r, now))
        {
            if self.store.disable_if_expired(&rule.id, now).await? {
                info!(schedule_id = %rule.id, title = %rule.title, "Expired one-time schedule disabled");
                disabled.push(rule.id.clone());
            }
        }
        Ok(disabled)
    }

    async fn call<T>(
        &self,
        fut: impl std::future::Future<Output = std::result::Result<T, ControllerError>>,
    ) -> std::result::Result<T, ControllerError> {
        with_timeout(self.config.controller_timeout, fut).await
    }

    // ─── Manual Control ─────────────────────────────────────

    /// Start recording on an operator's request. The engine does not take
    /// ownership, so it will not stop this capture on its own.
    pub async fn start_recording(&self) -> Result<NaiveDateTime> {
        let since = self.call(self.controller.start()).await?;
        info!(%since, "Recording started manually");
        Ok(since)
    }

    /// Stop recording on an operator's request.
    pub async fn stop_recording(&self) -> Result<()> {
        self.call(self.controller.stop()).await?;
        info!("Recording stopped manually");
        Ok(())
    }

    pub async fn recording_status(&self) -> Result<RecorderStatus> {
        Ok(self.call(self.controller.status()).await?)
    }

    /// Tick on a fixed interval until `shutdown` fires.
    ///
    /// Cancellation is only observed between ticks, so an in-flight tick
    /// always completes.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.tick_interval.as_secs(),
            "Scheduler engine started"
        );
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler engine stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}
