//! Wiring shared by the CLI commands.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use streamrec_config::StreamRecConfig;
use streamrec_recorder::ProcessRecorder;
use streamrec_scheduler::{
    Clock, EngineConfig, InMemoryController, NextOccurrenceBadge, RecordingController,
    ScheduleStore, SchedulerEngine, SystemClock,
};
use streamrec_storage::RecStorage;

pub struct App {
    pub store: Arc<ScheduleStore>,
    pub engine: Arc<SchedulerEngine>,
    pub badge: Arc<NextOccurrenceBadge>,
    pub clock: Arc<dyn Clock>,
}

/// Open the schedule database named by `config`.
pub fn open_store(config: &StreamRecConfig) -> Result<Arc<ScheduleStore>> {
    let db_path = config
        .database_path()
        .context("Failed to resolve database path")?;
    let storage = RecStorage::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Storage initialized: {}", db_path.display());
    Ok(Arc::new(ScheduleStore::new(storage)))
}

impl App {
    /// Build the store, controller, engine and badge. `dry_run` swaps the
    /// capture process for an in-memory controller.
    pub fn build(config: &StreamRecConfig, dry_run: bool) -> Result<Self> {
        let store = open_store(config)?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let controller: Arc<dyn RecordingController> = if dry_run {
            info!("Dry run: recording actions are simulated");
            Arc::new(InMemoryController::new(clock.clone()))
        } else {
            let output_dir = config
                .recordings_dir()
                .context("Failed to resolve recordings directory")?;
            info!(
                program = %config.recorder.program,
                output_dir = %output_dir.display(),
                "Using process recorder"
            );
            Arc::new(ProcessRecorder::new(&config.recorder, output_dir))
        };

        let engine = Arc::new(SchedulerEngine::new(
            store.clone(),
            controller,
            clock.clone(),
            EngineConfig::from(&config.scheduler),
        ));
        let badge = Arc::new(NextOccurrenceBadge::new(store.clone(), clock.clone()));

        Ok(Self {
            store,
            engine,
            badge,
            clock,
        })
    }
}
