use crate::analyzer::segmentation::{
    adaptive_mask, count_lit, filter_small_regions, merge_into, percentile, temperature_mask,
};
use crate::analyzer::types::{AnalyzerPhase, BurnSummary, FrameAnalysis, FrameResult, LiveUpdate};
use crate::config::{AnalyzerConfig, DetectionMethod, FrameTiming, SensorConfig};
use crate::error::FrameError;
use crate::frame::ThermalFrame;

use chrono::{DateTime, Utc};
use image::GrayImage;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Timestamped frames observed before the measured rate is checked
const FPS_CHECK_FRAMES: u64 = 50;

/// Allowed deviation of the measured rate from the nominal rate
const FPS_TOLERANCE: f64 = 1.0;

/// Accumulated state of one run
#[derive(Debug, Default)]
struct AnalysisState {
    baseline: Option<f64>,
    cumulative_mask: Option<GrayImage>,
    results: Vec<FrameResult>,
    ignition: Option<(u64, f64)>,
    low_ros_streak: u32,
    auto_stopped: bool,
    first_frame_time: Option<SystemTime>,
    timestamped_frames: u64,
    actual_fps: Option<f64>,
}

/// Stateful burn-front analyzer.
///
/// All mutating calls take `&mut self`; callers sharing one analyzer across
/// workers wrap it in a mutex so that the cumulative mask and the set-once
/// fields see a single writer.
#[derive(Debug)]
pub struct BurnAnalyzer {
    config: AnalyzerConfig,
    sensor: SensorConfig,
    temp_threshold_delta: f64,
    state: AnalysisState,
}

impl BurnAnalyzer {
    pub fn new(config: AnalyzerConfig, sensor: SensorConfig) -> Self {
        info!(
            "Burn analyzer initialized: {:?} detection, delta {:.1}°C, {}x{} @ {:.1} fps",
            config.detection_method,
            config.temp_threshold_delta,
            sensor.width,
            sensor.height,
            sensor.fps
        );

        Self {
            temp_threshold_delta: config.temp_threshold_delta,
            config,
            sensor,
            state: AnalysisState::default(),
        }
    }

    /// Discard all accumulated state, keeping the configuration
    pub fn reset(&mut self) {
        debug!(
            "Burn analyzer reset after {} frames",
            self.state.results.len()
        );
        self.state = AnalysisState::default();
    }

    /// Override the burn threshold delta for the next run
    pub fn set_temp_threshold_delta(&mut self, delta: f64) {
        self.temp_threshold_delta = delta;
    }

    pub fn temp_threshold_delta(&self) -> f64 {
        self.temp_threshold_delta
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn phase(&self) -> AnalyzerPhase {
        if self.state.auto_stopped {
            AnalyzerPhase::Stopped
        } else if self.state.baseline.is_some() {
            AnalyzerPhase::Active
        } else {
            AnalyzerPhase::Uninitialized
        }
    }

    pub fn baseline(&self) -> Option<f64> {
        self.state.baseline
    }

    /// Ignition frame number and elapsed time, once detected
    pub fn ignition(&self) -> Option<(u64, f64)> {
        self.state.ignition
    }

    pub fn frames_processed(&self) -> u64 {
        self.state.results.len() as u64
    }

    pub fn results(&self) -> &[FrameResult] {
        &self.state.results
    }

    pub fn cumulative_mask(&self) -> Option<&GrayImage> {
        self.state.cumulative_mask.as_ref()
    }

    pub fn low_ros_streak(&self) -> u32 {
        self.state.low_ros_streak
    }

    /// Temperature above which a pixel counts as burned
    pub fn effective_threshold(&self) -> Option<f64> {
        self.state.baseline.map(|baseline| {
            (baseline + self.temp_threshold_delta).max(self.config.min_burn_temp_absolute)
        })
    }

    /// Analyze one frame. `fire_active` gates the auto-stop decision.
    pub fn process_frame(
        &mut self,
        frame: &ThermalFrame,
        fire_active: bool,
    ) -> Result<FrameAnalysis, FrameError> {
        if frame.width != self.sensor.width || frame.height != self.sensor.height {
            return Err(FrameError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
            });
        }

        let celsius = frame.celsius();
        let frame_index = self.state.results.len() as u64;
        let frame_number = frame_index + 1;
        let elapsed_sec = self.elapsed_for(frame, frame_index);

        let baseline = match self.state.baseline {
            Some(baseline) => baseline,
            None => {
                let baseline = percentile(&celsius, self.config.baseline_percentile);
                info!("Baseline temperature established: {:.1}°C", baseline);
                self.state.baseline = Some(baseline);
                self.state.cumulative_mask = Some(GrayImage::new(frame.width, frame.height));
                baseline
            }
        };

        let raw_mask = match self.config.detection_method {
            DetectionMethod::Temperature => {
                let threshold = (baseline + self.temp_threshold_delta)
                    .max(self.config.min_burn_temp_absolute);
                temperature_mask(&celsius, frame.width, frame.height, threshold)
            }
            DetectionMethod::Adaptive => adaptive_mask(&celsius, frame.width, frame.height),
        };
        let current_mask = filter_small_regions(&raw_mask, self.config.min_region_area_px);

        let cumulative_mask = self
            .state
            .cumulative_mask
            .get_or_insert_with(|| GrayImage::new(frame.width, frame.height));
        let cumulative_burn_pixels = merge_into(cumulative_mask, &current_mask);
        let current_burn_pixels = count_lit(&current_mask);

        let pixel_area = self.sensor.pixel_area_cm2;
        let current_burn_area_cm2 = current_burn_pixels as f64 * pixel_area;
        let cumulative_burn_area_cm2 = cumulative_burn_pixels as f64 * pixel_area;
        let burn_percentage =
            cumulative_burn_pixels as f64 / self.sensor.pixel_count() as f64 * 100.0;

        let max_temp_celsius = celsius.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean_temp_celsius = celsius.iter().sum::<f64>() / celsius.len() as f64;

        let mut ignited_now = false;
        if self.state.ignition.is_none()
            && cumulative_burn_pixels > self.config.ignition_min_pixels as u64
        {
            info!(
                "Ignition detected at frame {} ({:.2}s, {} px)",
                frame_number, elapsed_sec, cumulative_burn_pixels
            );
            self.state.ignition = Some((frame_number, elapsed_sec));
            ignited_now = true;
        }

        let ros_cm2_per_sec = match self.state.results.last() {
            Some(prev) => {
                let dt = elapsed_sec - prev.elapsed_sec;
                if dt > 0.0 {
                    (cumulative_burn_area_cm2 - prev.cumulative_burn_area_cm2) / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        let result = FrameResult {
            frame_number,
            sequence: frame.sequence,
            timestamp: frame.captured_at.map(DateTime::<Utc>::from),
            elapsed_sec,
            current_burn_pixels,
            cumulative_burn_pixels,
            current_burn_area_cm2,
            cumulative_burn_area_cm2,
            burn_percentage,
            max_temp_celsius,
            mean_temp_celsius,
            ros_cm2_per_sec,
        };
        self.state.results.push(result.clone());

        if ros_cm2_per_sec < self.config.ros_stop_threshold {
            self.state.low_ros_streak = self.state.low_ros_streak.saturating_add(1);
        } else {
            self.state.low_ros_streak = 0;
        }

        let mut auto_stop = false;
        if !self.state.auto_stopped
            && fire_active
            && self.state.low_ros_streak >= self.config.min_low_ros_frames.max(1)
        {
            info!(
                "Fire stopped spreading: ROS < {} cm²/s for {} frames, requesting auto-stop",
                self.config.ros_stop_threshold, self.state.low_ros_streak
            );
            self.state.auto_stopped = true;
            auto_stop = true;
        }

        if self.state.timestamped_frames == FPS_CHECK_FRAMES && self.state.actual_fps.is_none() {
            self.check_frame_rate(elapsed_sec);
        }

        debug!(
            "Frame {} analyzed: {} px burned ({:.2}%), ROS {:.3} cm²/s",
            frame_number, cumulative_burn_pixels, burn_percentage, ros_cm2_per_sec
        );

        Ok(FrameAnalysis {
            result,
            ignited_now,
            auto_stop,
        })
    }

    /// Elapsed seconds for the frame at `frame_index` under the timing policy
    fn elapsed_for(&mut self, frame: &ThermalFrame, frame_index: u64) -> f64 {
        let nominal = frame_index as f64 / self.sensor.fps;

        if self.config.frame_timing != FrameTiming::FileModified {
            return nominal;
        }

        let Some(captured_at) = frame.captured_at else {
            return nominal;
        };

        self.state.timestamped_frames += 1;
        let first = *self.state.first_frame_time.get_or_insert(captured_at);
        captured_at
            .duration_since(first)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn check_frame_rate(&mut self, elapsed_sec: f64) {
        if elapsed_sec <= 0.0 {
            return;
        }

        let actual = FPS_CHECK_FRAMES as f64 / elapsed_sec;
        self.state.actual_fps = Some(actual);

        if (actual - self.sensor.fps).abs() > FPS_TOLERANCE {
            warn!(
                "Measured frame rate {:.1} fps differs from configured {:.1} fps",
                actual, self.sensor.fps
            );
        } else {
            debug!("Measured frame rate {:.1} fps", actual);
        }
    }

    /// Aggregate statistics; the empty summary when nothing was processed
    pub fn summary(&self) -> BurnSummary {
        let results = &self.state.results;
        let Some(last) = results.last() else {
            return BurnSummary::default();
        };

        let avg_ros_cm2_per_sec = if last.elapsed_sec > 0.0 {
            last.cumulative_burn_area_cm2 / last.elapsed_sec
        } else {
            0.0
        };

        let positive_ros: Vec<f64> = results
            .iter()
            .skip(1)
            .map(|r| r.ros_cm2_per_sec)
            .filter(|&ros| ros > 0.0)
            .collect();
        let max_ros_cm2_per_sec = positive_ros.iter().copied().fold(0.0, f64::max);
        let mean_instantaneous_ros_cm2_per_sec = if positive_ros.is_empty() {
            0.0
        } else {
            positive_ros.iter().sum::<f64>() / positive_ros.len() as f64
        };

        let max_temp_celsius = results
            .iter()
            .map(|r| r.max_temp_celsius)
            .fold(f64::NEG_INFINITY, f64::max);

        BurnSummary {
            total_frames: results.len() as u64,
            duration_sec: last.elapsed_sec,
            final_burn_area_cm2: last.cumulative_burn_area_cm2,
            final_burn_percentage: last.burn_percentage,
            avg_ros_cm2_per_sec,
            max_ros_cm2_per_sec,
            mean_instantaneous_ros_cm2_per_sec,
            max_temp_celsius,
            ignition_frame: self.state.ignition.map(|(frame, _)| frame),
            ignition_time_sec: self.state.ignition.map(|(_, time)| time),
            baseline_temp_celsius: self.state.baseline,
            burn_threshold_celsius: self.effective_threshold().unwrap_or(0.0),
            actual_fps: self.state.actual_fps,
        }
    }

    /// Snapshot of the given 0-based frame index, or the latest frame
    pub fn live_update(&self, frame_index: Option<usize>) -> LiveUpdate {
        let results = &self.state.results;
        if results.is_empty() {
            return LiveUpdate::Waiting { frame: 0 };
        }

        let index = match frame_index {
            Some(index) if index < results.len() => index,
            _ => results.len() - 1,
        };
        LiveUpdate::from_result(&results[index])
    }
}
