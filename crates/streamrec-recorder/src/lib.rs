//! streamrec-recorder: Process-backed recording controller.
//!
//! Runs the configured capture program (ffmpeg by default) as a child
//! process. One capture at a time; the child is killed if the recorder is
//! dropped.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use streamrec_config::RecorderConfig;
use streamrec_scheduler::{ControllerError, RecordingController};
use streamrec_types::RecorderStatus;

/// Placeholder in `args` replaced with the output file path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

struct Capture {
    child: Child,
    stdin: Option<ChildStdin>,
    since: NaiveDateTime,
    output: PathBuf,
}

impl Capture {
    /// `Ok(true)` while the child is still running.
    fn is_running(&mut self) -> Result<bool, ControllerError> {
        match self.child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(exit)) => {
                warn!(
                    output = %self.output.display(),
                    exit_code = ?exit.code(),
                    "Capture process exited on its own"
                );
                Ok(false)
            }
            Err(e) => Err(ControllerError::Failed(format!(
                "failed to poll capture process: {e}"
            ))),
        }
    }
}

/// A [`RecordingController`] that spawns one capture process per recording.
pub struct ProcessRecorder {
    program: String,
    args: Vec<String>,
    output_dir: PathBuf,
    file_pattern: String,
    stop_input: String,
    stop_grace: Duration,
    current: Mutex<Option<Capture>>,
}

impl ProcessRecorder {
    pub fn new(config: &RecorderConfig, output_dir: PathBuf) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            output_dir,
            file_pattern: config.file_pattern.clone(),
            stop_input: config.stop_input.clone(),
            stop_grace: Duration::from_secs(config.stop_grace_secs),
            current: Mutex::new(None),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn output_path(&self, now: NaiveDateTime) -> Result<PathBuf, ControllerError> {
        let mut name = String::new();
        write!(name, "{}", now.format(&self.file_pattern)).map_err(|_| {
            ControllerError::Failed(format!("invalid file pattern: {}", self.file_pattern))
        })?;
        Ok(self.output_dir.join(name))
    }

    fn command(&self, output: &Path) -> Command {
        let output = output.to_string_lossy();
        let mut cmd = Command::new(&self.program);
        cmd.args(
            self.args
                .iter()
                .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output)),
        )
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RecordingController for ProcessRecorder {
    async fn start(&self) -> Result<NaiveDateTime, ControllerError> {
        let mut current = self.current.lock().await;
        if let Some(capture) = current.as_mut() {
            if capture.is_running()? {
                debug!("Capture already running");
                return Ok(capture.since);
            }
            *current = None;
        }

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| {
                ControllerError::Failed(format!(
                    "failed to create {}: {e}",
                    self.output_dir.display()
                ))
            })?;

        let since = Local::now().naive_local();
        let output = self.output_path(since)?;
        let mut child = self
            .command(&output)
            .spawn()
            .map_err(|e| ControllerError::Failed(format!("failed to spawn {}: {e}", self.program)))?;
        let stdin = child.stdin.take();

        info!(
            program = %self.program,
            pid = ?child.id(),
            output = %output.display(),
            "Capture process started"
        );
        *current = Some(Capture {
            child,
            stdin,
            since,
            output,
        });
        Ok(since)
    }

    async fn stop(&self) -> Result<(), ControllerError> {
        let Some(mut capture) = self.current.lock().await.take() else {
            return Ok(());
        };

        if let Some(mut stdin) = capture.stdin.take() {
            if !self.stop_input.is_empty() {
                // The process may already be gone; a broken pipe is fine.
                let line = format!("{}\n", self.stop_input);
                let _ = stdin.write_all(line.as_bytes()).await;
            }
        }

        match tokio::time::timeout(self.stop_grace, capture.child.wait()).await {
            Ok(Ok(exit)) => {
                info!(
                    output = %capture.output.display(),
                    exit_code = ?exit.code(),
                    "Capture process exited"
                );
            }
            Ok(Err(e)) => {
                warn!("Error waiting for capture exit: {e}");
                capture
                    .child
                    .kill()
                    .await
                    .map_err(|e| ControllerError::Failed(format!("failed to kill capture: {e}")))?;
            }
            Err(_) => {
                warn!(output = %capture.output.display(), "Capture did not exit in time, killing");
                capture
                    .child
                    .kill()
                    .await
                    .map_err(|e| ControllerError::Failed(format!("failed to kill capture: {e}")))?;
            }
        }
        Ok(())
    }

    async fn status(&self) -> Result<RecorderStatus, ControllerError> {
        let mut current = self.current.lock().await;
        let Some(capture) = current.as_mut() else {
            return Ok(RecorderStatus::idle());
        };
        if capture.is_running()? {
            Ok(RecorderStatus::running(capture.since))
        } else {
            *current = None;
            Ok(RecorderStatus::idle())
        }
    }
}
