use crate::config::CaptureConfig;
use crate::error::CaptureError;

use super::device::{self, DeviceCheck};
use super::storage::{self, PurgeReport};

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// What the capture process is asked to record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CaptureRequest {
    Duration(u32),
    Frames(u64),
}

/// How a supervised capture ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Process exited with status 0
    Completed,
    /// Process exited with a non-zero status or was killed by a signal
    Failed { code: Option<i32> },
    /// Process outlived the completion deadline and was stopped
    TimedOut,
    /// The session was stopped by another caller
    Stopped,
}

impl CaptureOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CaptureOutcome::Completed)
    }
}

/// Capture progress snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureStatus {
    #[serde(rename = "is_capturing")]
    pub active: bool,
    pub frames_captured: u64,
    pub expected_frames: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<f64>,
}

struct CaptureSession {
    child: Child,
    started_at: Instant,
}

/// Owns the lifecycle of the external capture process.
///
/// At most one session exists at a time; the check-and-set happens under
/// the session lock.
pub struct CaptureManager {
    config: CaptureConfig,
    fps: f64,
    folder: PathBuf,
    session: Mutex<Option<CaptureSession>>,
    active: AtomicBool,
    expected_frames: AtomicU64,
    started_at: parking_lot::Mutex<Option<Instant>>,
}

impl CaptureManager {
    pub fn new(config: CaptureConfig, fps: f64) -> Self {
        Self {
            folder: PathBuf::from(&config.folder),
            config,
            fps,
            session: Mutex::new(None),
            active: AtomicBool::new(false),
            expected_frames: AtomicU64::new(0),
            started_at: parking_lot::Mutex::new(None),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Frames requested by a capture request at the configured rate
    pub fn frames_for(&self, request: CaptureRequest) -> u64 {
        match request {
            CaptureRequest::Duration(seconds) => (seconds as f64 * self.fps) as u64,
            CaptureRequest::Frames(frames) => frames,
        }
    }

    /// Probe the capture chain. Never fails; problems lower the confidence.
    pub fn verify(&self) -> DeviceCheck {
        let check = device::probe(
            &self.config.executable,
            &self.config.device_prefix,
            &self.config.driver_module,
        );
        info!("Capture device check: {:?}", check.confidence());
        check
    }

    /// Make sure the staging directory exists and accepts writes
    pub async fn prepare_storage(&self) -> Result<(), CaptureError> {
        storage::prepare(&self.folder, self.config.use_tmpfs).await
    }

    /// Delete staged frames left from earlier runs
    pub fn purge_stale_frames(&self) -> PurgeReport {
        storage::purge(&self.folder, &self.config.file_extension)
    }

    /// Launch the capture process. Returns the expected frame count.
    pub async fn start(&self, request: CaptureRequest) -> Result<u64, CaptureError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            warn!("Capture start refused: a session is already active");
            return Err(CaptureError::AlreadyActive);
        }

        let frames = self.frames_for(request);
        let output_prefix = self.folder.join(&self.config.file_prefix);

        info!(
            "Starting capture: {} frames ({:.1}s) into {}",
            frames,
            frames as f64 / self.fps,
            self.folder.display()
        );

        let mut child = Command::new(&self.config.executable)
            .arg(&self.config.sensor_mode_flag)
            .arg("-c")
            .arg(frames.to_string())
            .arg("-o")
            .arg(&output_prefix)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CaptureError::ExecutableNotFound {
                    executable: self.config.executable.clone(),
                },
                _ => CaptureError::LaunchFailed {
                    details: e.to_string(),
                },
            })?;

        tokio::time::sleep(Duration::from_millis(self.config.launch_grace_ms)).await;

        if let Some(status) = child.try_wait().map_err(CaptureError::Process)? {
            let mut stderr_output = String::new();
            if let Some(mut stderr) = child.stderr.take() {
                let _ = stderr.read_to_string(&mut stderr_output).await;
            }
            error!(
                "Capture process exited immediately with {}: {}",
                status,
                stderr_output.trim()
            );
            return Err(CaptureError::LaunchFailed {
                details: format!("exited immediately with {}", status),
            });
        }

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("capture: {}", line);
                }
            });
        }

        let started_at = Instant::now();
        *session = Some(CaptureSession { child, started_at });
        *self.started_at.lock() = Some(started_at);
        self.expected_frames.store(frames, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);

        Ok(frames)
    }

    /// Default completion deadline: expected duration plus the configured buffer
    pub fn default_timeout(&self) -> Duration {
        let expected = self.expected_frames.load(Ordering::SeqCst) as f64 / self.fps;
        Duration::from_secs_f64(expected) + Duration::from_secs(self.config.completion_buffer_sec)
    }

    /// Wait for the capture process to exit, stopping it past the deadline.
    ///
    /// The session lock is released between polls so `stop()` can proceed.
    pub async fn wait_for_completion(
        &self,
        timeout: Option<Duration>,
        poll_interval: Duration,
    ) -> CaptureOutcome {
        let timeout = timeout.unwrap_or_else(|| self.default_timeout());
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut session = self.session.lock().await;
                let Some(current) = session.as_mut() else {
                    return CaptureOutcome::Stopped;
                };

                match current.child.try_wait() {
                    Ok(Some(status)) => {
                        let elapsed = current.started_at.elapsed();
                        *session = None;
                        self.active.store(false, Ordering::SeqCst);
                        return Self::outcome_from(status, elapsed);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Failed to poll capture process: {}", e);
                    }
                }
            }

            if Instant::now() >= deadline {
                warn!("Capture did not finish within {:?}, stopping it", timeout);
                self.stop().await;
                return CaptureOutcome::TimedOut;
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    fn outcome_from(status: ExitStatus, elapsed: Duration) -> CaptureOutcome {
        if status.success() {
            info!("Capture completed after {:.1}s", elapsed.as_secs_f64());
            CaptureOutcome::Completed
        } else {
            error!("Capture process failed with {}", status);
            CaptureOutcome::Failed {
                code: status.code(),
            }
        }
    }

    /// Terminate the capture process: SIGTERM, bounded wait, then SIGKILL.
    ///
    /// Idempotent; returns whether a running session was stopped.
    pub async fn stop(&self) -> bool {
        let taken = self.session.lock().await.take();
        self.active.store(false, Ordering::SeqCst);

        let Some(mut session) = taken else {
            debug!("Capture stop requested with no active session");
            return false;
        };

        info!("Stopping capture process");

        if let Some(pid) = session.child.id() {
            // SAFETY: pid belongs to a child we have not yet reaped
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }

        let grace = Duration::from_secs(self.config.terminate_timeout_sec);
        match tokio::time::timeout(grace, session.child.wait()).await {
            Ok(Ok(status)) => debug!("Capture process exited with {}", status),
            Ok(Err(e)) => warn!("Error waiting for capture process: {}", e),
            Err(_) => {
                warn!("Capture process ignored SIGTERM, killing it");
                if let Err(e) = session.child.kill().await {
                    error!("Failed to kill capture process: {}", e);
                }
            }
        }

        true
    }

    /// Current progress, derived from the staging directory listing
    pub fn status(&self) -> CaptureStatus {
        let frames_captured = storage::list_frames(
            &self.folder,
            &self.config.file_prefix,
            &self.config.file_extension,
        )
        .len() as u64;
        let expected_frames = self.expected_frames.load(Ordering::SeqCst);

        if !self.is_active() {
            return CaptureStatus {
                active: false,
                frames_captured,
                expected_frames,
                elapsed_sec: None,
                progress_percent: None,
            };
        }

        let elapsed_sec = self
            .started_at
            .lock()
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let progress_percent = if expected_frames > 0 {
            frames_captured as f64 / expected_frames as f64 * 100.0
        } else {
            0.0
        };

        CaptureStatus {
            active: true,
            frames_captured,
            expected_frames,
            elapsed_sec: Some(elapsed_sec),
            progress_percent: Some(progress_percent),
        }
    }
}
