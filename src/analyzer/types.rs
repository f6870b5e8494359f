use chrono::{DateTime, Utc};
use serde::Serialize;

/// Metrics for one analyzed frame. Appended to the run log and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameResult {
    /// 1-based ordinal of the frame within the run
    pub frame_number: u64,
    /// Sequence number taken from the frame filename
    pub sequence: Option<u64>,
    /// Capture time of the frame file, when known
    pub timestamp: Option<DateTime<Utc>>,
    pub elapsed_sec: f64,
    pub current_burn_pixels: u64,
    pub cumulative_burn_pixels: u64,
    pub current_burn_area_cm2: f64,
    pub cumulative_burn_area_cm2: f64,
    pub burn_percentage: f64,
    pub max_temp_celsius: f64,
    pub mean_temp_celsius: f64,
    pub ros_cm2_per_sec: f64,
}

/// Aggregate statistics over a run.
///
/// `Default` is the empty summary reported before any frame is processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BurnSummary {
    pub total_frames: u64,
    pub duration_sec: f64,
    pub final_burn_area_cm2: f64,
    pub final_burn_percentage: f64,
    /// Final cumulative area over the run duration
    pub avg_ros_cm2_per_sec: f64,
    pub max_ros_cm2_per_sec: f64,
    /// Mean over positive instantaneous samples, first frame excluded
    pub mean_instantaneous_ros_cm2_per_sec: f64,
    pub max_temp_celsius: f64,
    pub ignition_frame: Option<u64>,
    pub ignition_time_sec: Option<f64>,
    pub baseline_temp_celsius: Option<f64>,
    pub burn_threshold_celsius: f64,
    pub actual_fps: Option<f64>,
}

/// Point-in-time snapshot served to polling controllers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LiveUpdate {
    Waiting {
        frame: u64,
    },
    Capturing {
        frame: u64,
        elapsed_sec: f64,
        burn_percentage: f64,
        burn_area_cm2: f64,
        max_temp_celsius: f64,
        current_ros_cm2_per_sec: f64,
    },
}

impl LiveUpdate {
    pub fn from_result(result: &FrameResult) -> Self {
        LiveUpdate::Capturing {
            frame: result.frame_number,
            elapsed_sec: result.elapsed_sec,
            burn_percentage: round_to(result.burn_percentage, 2),
            burn_area_cm2: round_to(result.cumulative_burn_area_cm2, 2),
            max_temp_celsius: round_to(result.max_temp_celsius, 1),
            current_ros_cm2_per_sec: round_to(result.ros_cm2_per_sec, 2),
        }
    }
}

/// Outcome of feeding one frame to the analyzer
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub result: FrameResult,
    /// This frame crossed the ignition threshold
    pub ignited_now: bool,
    /// This frame fired the once-per-run auto-stop
    pub auto_stop: bool,
}

/// Implicit lifecycle of an analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerPhase {
    /// No baseline yet
    Uninitialized,
    /// Baseline set, accumulating
    Active,
    /// Auto-stop fired; frames are still accepted
    Stopped,
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
