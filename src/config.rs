use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BurnCamConfig {
    pub sensor: SensorConfig,
    pub capture: CaptureConfig,
    pub analyzer: AnalyzerConfig,
    pub processing: ProcessingConfig,
    pub monitor: MonitorConfig,
    pub serial: SerialConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SensorConfig {
    /// Frame width in pixels
    #[serde(default = "default_sensor_width")]
    pub width: u32,

    /// Frame height in pixels
    #[serde(default = "default_sensor_height")]
    pub height: u32,

    /// Nominal capture rate of the sensor in frames per second
    #[serde(default = "default_sensor_fps")]
    pub fps: f64,

    /// Physical area covered by one pixel in cm²
    #[serde(default = "default_pixel_area_cm2")]
    pub pixel_area_cm2: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// External capture executable (resolved through PATH)
    #[serde(default = "default_capture_executable")]
    pub executable: String,

    /// Flag selecting the sensor mode
    #[serde(default = "default_sensor_mode_flag")]
    pub sensor_mode_flag: String,

    /// Staging directory the capture process writes frames into
    #[serde(default = "default_capture_folder")]
    pub folder: String,

    /// Frame filename prefix
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Frame filename extension (without the dot)
    #[serde(default = "default_file_extension")]
    pub file_extension: String,

    /// Capture duration used when a command carries none
    #[serde(default = "default_duration_sec")]
    pub default_duration_sec: u32,

    /// Slack added to the expected duration before a capture is timed out
    #[serde(default = "default_completion_buffer_sec")]
    pub completion_buffer_sec: u64,

    /// Time the process must survive after launch to count as started
    #[serde(default = "default_launch_grace_ms")]
    pub launch_grace_ms: u64,

    /// Time allowed for a graceful terminate before the process is killed
    #[serde(default = "default_terminate_timeout_sec")]
    pub terminate_timeout_sec: u64,

    /// Mount an in-memory filesystem on the staging directory
    #[serde(default = "default_use_tmpfs")]
    pub use_tmpfs: bool,

    /// Kernel module expected for the sensor driver
    #[serde(default = "default_driver_module")]
    pub driver_module: String,

    /// Device node name prefix under /dev
    #[serde(default = "default_device_prefix")]
    pub device_prefix: String,
}

/// Burn mask detection policy
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Pixel burned if hotter than max(baseline + delta, absolute floor)
    Temperature,
    /// Otsu threshold over the frame normalized to 8 bits
    Adaptive,
}

/// Source of per-frame elapsed time
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrameTiming {
    /// Processed frame index divided by the nominal sensor rate
    Nominal,
    /// Modification time of the frame file
    FileModified,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnalyzerConfig {
    /// Temperature rise above baseline that marks a pixel as burned (°C)
    #[serde(default = "default_temp_threshold_delta")]
    pub temp_threshold_delta: f64,

    /// Percentile of the first frame used as baseline
    #[serde(default = "default_baseline_percentile")]
    pub baseline_percentile: f64,

    /// Absolute temperature floor for burned pixels (°C)
    #[serde(default = "default_min_burn_temp_absolute")]
    pub min_burn_temp_absolute: f64,

    /// Burn mask detection policy
    #[serde(default = "default_detection_method")]
    pub detection_method: DetectionMethod,

    /// Connected regions smaller than this are discarded as noise
    #[serde(default = "default_min_region_area_px")]
    pub min_region_area_px: u32,

    /// Cumulative burned pixels required to declare ignition
    #[serde(default = "default_ignition_min_pixels")]
    pub ignition_min_pixels: u32,

    /// ROS below this counts as "not spreading" (cm²/s)
    #[serde(default = "default_ros_stop_threshold")]
    pub ros_stop_threshold: f64,

    /// Consecutive low-ROS frames required before auto-stop fires
    #[serde(default = "default_min_low_ros_frames")]
    pub min_low_ros_frames: u32,

    /// Source of per-frame elapsed time
    #[serde(default = "default_frame_timing")]
    pub frame_timing: FrameTiming,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProcessingConfig {
    /// Number of analysis workers draining the frame queue
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Periodic wake of an idle worker to observe stop requests
    #[serde(default = "default_worker_wake_ms")]
    pub worker_wake_ms: u64,

    /// Staging directory poll interval of the frame watcher
    #[serde(default = "default_watcher_poll_ms")]
    pub watcher_poll_ms: u64,

    /// Upper bound on waiting for the queue to drain
    #[serde(default = "default_drain_timeout_sec")]
    pub drain_timeout_sec: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorConfig {
    /// Partial results snapshot, overwritten every interval during a run
    #[serde(default = "default_partial_results_path")]
    pub partial_results_path: String,

    /// Partial results snapshot interval
    #[serde(default = "default_partial_interval_sec")]
    pub partial_interval_sec: u64,

    /// Completion poll interval of the capture monitor
    #[serde(default = "default_completion_poll_ms")]
    pub completion_poll_ms: u64,

    /// Directory receiving one summary file per completed run
    #[serde(default)]
    pub results_dir: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SerialConfig {
    /// Enable the serial transport
    #[serde(default = "default_serial_enabled")]
    pub enabled: bool,

    /// Serial device path
    #[serde(default = "default_serial_device")]
    pub device: String,

    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Sleep between read polls
    #[serde(default = "default_serial_poll_ms")]
    pub poll_interval_ms: u64,

    /// Push run completion lines without a request
    #[serde(default = "default_push_notifications")]
    pub push_notifications: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NetworkConfig {
    /// Enable the TCP transport
    #[serde(default = "default_network_enabled")]
    pub enabled: bool,

    /// IP address to bind to
    #[serde(default = "default_network_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_network_port")]
    pub port: u16,

    /// Concurrent connections served; further clients wait for a slot
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Baud rates the serial transport can configure
pub const SUPPORTED_BAUD_RATES: &[u32] = &[1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

impl BurnCamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("burncam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("sensor.width", default_sensor_width())?
            .set_default("sensor.height", default_sensor_height())?
            .set_default("sensor.fps", default_sensor_fps())?
            .set_default("sensor.pixel_area_cm2", default_pixel_area_cm2())?
            .set_default("capture.executable", default_capture_executable())?
            .set_default("capture.sensor_mode_flag", default_sensor_mode_flag())?
            .set_default("capture.folder", default_capture_folder())?
            .set_default("capture.file_prefix", default_file_prefix())?
            .set_default("capture.file_extension", default_file_extension())?
            .set_default("capture.default_duration_sec", default_duration_sec())?
            .set_default(
                "capture.completion_buffer_sec",
                default_completion_buffer_sec(),
            )?
            .set_default("capture.launch_grace_ms", default_launch_grace_ms())?
            .set_default(
                "capture.terminate_timeout_sec",
                default_terminate_timeout_sec(),
            )?
            .set_default("capture.use_tmpfs", default_use_tmpfs())?
            .set_default("capture.driver_module", default_driver_module())?
            .set_default("capture.device_prefix", default_device_prefix())?
            .set_default(
                "analyzer.temp_threshold_delta",
                default_temp_threshold_delta(),
            )?
            .set_default(
                "analyzer.baseline_percentile",
                default_baseline_percentile(),
            )?
            .set_default(
                "analyzer.min_burn_temp_absolute",
                default_min_burn_temp_absolute(),
            )?
            .set_default("analyzer.detection_method", "temperature")?
            .set_default("analyzer.min_region_area_px", default_min_region_area_px())?
            .set_default(
                "analyzer.ignition_min_pixels",
                default_ignition_min_pixels(),
            )?
            .set_default("analyzer.ros_stop_threshold", default_ros_stop_threshold())?
            .set_default("analyzer.min_low_ros_frames", default_min_low_ros_frames())?
            .set_default("analyzer.frame_timing", "nominal")?
            .set_default("processing.workers", default_workers() as i64)?
            .set_default("processing.worker_wake_ms", default_worker_wake_ms())?
            .set_default("processing.watcher_poll_ms", default_watcher_poll_ms())?
            .set_default("processing.drain_timeout_sec", default_drain_timeout_sec())?
            .set_default(
                "monitor.partial_results_path",
                default_partial_results_path(),
            )?
            .set_default("monitor.partial_interval_sec", default_partial_interval_sec())?
            .set_default("monitor.completion_poll_ms", default_completion_poll_ms())?
            .set_default("serial.enabled", default_serial_enabled())?
            .set_default("serial.device", default_serial_device())?
            .set_default("serial.baud_rate", default_baud_rate())?
            .set_default("serial.poll_interval_ms", default_serial_poll_ms())?
            .set_default("serial.push_notifications", default_push_notifications())?
            .set_default("network.enabled", default_network_enabled())?
            .set_default("network.ip", default_network_ip())?
            .set_default("network.port", default_network_port())?
            .set_default("network.max_connections", default_max_connections() as i64)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with BURNCAM__ prefix, e.g. BURNCAM__NETWORK__PORT
            .add_source(
                Environment::with_prefix("BURNCAM")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: BurnCamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensor.width == 0 || self.sensor.height == 0 {
            return Err(ConfigError::Message(
                "Sensor resolution must be greater than 0".to_string(),
            ));
        }

        if !(self.sensor.fps > 0.0) {
            return Err(ConfigError::Message(
                "Sensor fps must be greater than 0".to_string(),
            ));
        }

        if !(self.sensor.pixel_area_cm2 > 0.0) {
            return Err(ConfigError::Message(
                "Pixel area must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=100.0).contains(&self.analyzer.baseline_percentile) {
            return Err(ConfigError::Message(
                "Baseline percentile must be within 0..=100".to_string(),
            ));
        }

        if self.processing.workers == 0 {
            return Err(ConfigError::Message(
                "At least one analysis worker is required".to_string(),
            ));
        }

        if self.capture.file_extension.is_empty() {
            return Err(ConfigError::Message(
                "Frame file extension must not be empty".to_string(),
            ));
        }

        if self.serial.enabled && !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(ConfigError::Message(format!(
                "Unsupported serial baud rate {}",
                self.serial.baud_rate
            )));
        }

        if self.network.enabled && self.network.port == 0 {
            return Err(ConfigError::Message(
                "Network port must be greater than 0".to_string(),
            ));
        }

        if self.network.enabled && self.network.max_connections == 0 {
            return Err(ConfigError::Message(
                "Network max_connections must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl SensorConfig {
    /// Size in bytes of one raw frame file
    pub fn frame_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * 2
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl Default for BurnCamConfig {
    fn default() -> Self {
        Self {
            sensor: SensorConfig::default(),
            capture: CaptureConfig::default(),
            analyzer: AnalyzerConfig::default(),
            processing: ProcessingConfig::default(),
            monitor: MonitorConfig::default(),
            serial: SerialConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            width: default_sensor_width(),
            height: default_sensor_height(),
            fps: default_sensor_fps(),
            pixel_area_cm2: default_pixel_area_cm2(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            executable: default_capture_executable(),
            sensor_mode_flag: default_sensor_mode_flag(),
            folder: default_capture_folder(),
            file_prefix: default_file_prefix(),
            file_extension: default_file_extension(),
            default_duration_sec: default_duration_sec(),
            completion_buffer_sec: default_completion_buffer_sec(),
            launch_grace_ms: default_launch_grace_ms(),
            terminate_timeout_sec: default_terminate_timeout_sec(),
            use_tmpfs: default_use_tmpfs(),
            driver_module: default_driver_module(),
            device_prefix: default_device_prefix(),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            temp_threshold_delta: default_temp_threshold_delta(),
            baseline_percentile: default_baseline_percentile(),
            min_burn_temp_absolute: default_min_burn_temp_absolute(),
            detection_method: default_detection_method(),
            min_region_area_px: default_min_region_area_px(),
            ignition_min_pixels: default_ignition_min_pixels(),
            ros_stop_threshold: default_ros_stop_threshold(),
            min_low_ros_frames: default_min_low_ros_frames(),
            frame_timing: default_frame_timing(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            worker_wake_ms: default_worker_wake_ms(),
            watcher_poll_ms: default_watcher_poll_ms(),
            drain_timeout_sec: default_drain_timeout_sec(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            partial_results_path: default_partial_results_path(),
            partial_interval_sec: default_partial_interval_sec(),
            completion_poll_ms: default_completion_poll_ms(),
            results_dir: None,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            enabled: default_serial_enabled(),
            device: default_serial_device(),
            baud_rate: default_baud_rate(),
            poll_interval_ms: default_serial_poll_ms(),
            push_notifications: default_push_notifications(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: default_network_enabled(),
            ip: default_network_ip(),
            port: default_network_port(),
            max_connections: default_max_connections(),
        }
    }
}

// Default value functions
fn default_sensor_width() -> u32 {
    160
}
fn default_sensor_height() -> u32 {
    120
}
fn default_sensor_fps() -> f64 {
    9.0
}
fn default_pixel_area_cm2() -> f64 {
    0.25
}

fn default_capture_executable() -> String {
    "lepton_data_collector".to_string()
}
fn default_sensor_mode_flag() -> String {
    "-3".to_string()
}
fn default_capture_folder() -> String {
    "/tmp/capture".to_string()
}
fn default_file_prefix() -> String {
    "sample_".to_string()
}
fn default_file_extension() -> String {
    "gray".to_string()
}
fn default_duration_sec() -> u32 {
    60
}
fn default_completion_buffer_sec() -> u64 {
    30
}
fn default_launch_grace_ms() -> u64 {
    500
}
fn default_terminate_timeout_sec() -> u64 {
    5
}
fn default_use_tmpfs() -> bool {
    true
}
fn default_driver_module() -> String {
    "lepton".to_string()
}
fn default_device_prefix() -> String {
    "video".to_string()
}

fn default_temp_threshold_delta() -> f64 {
    100.0
}
fn default_baseline_percentile() -> f64 {
    50.0
}
fn default_min_burn_temp_absolute() -> f64 {
    100.0
}
fn default_detection_method() -> DetectionMethod {
    DetectionMethod::Temperature
}
fn default_min_region_area_px() -> u32 {
    20
}
fn default_ignition_min_pixels() -> u32 {
    50
}
fn default_ros_stop_threshold() -> f64 {
    0.1
}
fn default_min_low_ros_frames() -> u32 {
    50
}
fn default_frame_timing() -> FrameTiming {
    FrameTiming::Nominal
}

fn default_workers() -> usize {
    2
}
fn default_worker_wake_ms() -> u64 {
    1000
}
fn default_watcher_poll_ms() -> u64 {
    100
}
fn default_drain_timeout_sec() -> u64 {
    30
}

fn default_partial_results_path() -> String {
    "/tmp/burn_partial_results.json".to_string()
}
fn default_partial_interval_sec() -> u64 {
    10
}
fn default_completion_poll_ms() -> u64 {
    200
}

fn default_serial_enabled() -> bool {
    true
}
fn default_serial_device() -> String {
    "/dev/serial0".to_string()
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_serial_poll_ms() -> u64 {
    100
}
fn default_push_notifications() -> bool {
    true
}

fn default_network_enabled() -> bool {
    true
}
fn default_network_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_network_port() -> u16 {
    5000
}
fn default_max_connections() -> usize {
    4
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BurnCamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sensor.frame_bytes(), 160 * 120 * 2);
        assert_eq!(config.analyzer.detection_method, DetectionMethod::Temperature);
    }

    #[test]
    fn test_config_validation() {
        let mut config = BurnCamConfig::default();
        config.sensor.width = 0;
        assert!(config.validate().is_err());

        config.sensor.width = 160;
        config.processing.workers = 0;
        assert!(config.validate().is_err());

        config.processing.workers = 1;
        config.serial.baud_rate = 12345;
        assert!(config.validate().is_err());

        config.serial.enabled = false;
        assert!(config.validate().is_ok());

        config.analyzer.baseline_percentile = 101.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_with_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[sensor]
width = 80
height = 60

[analyzer]
detection_method = "adaptive"
min_low_ros_frames = 3

[network]
port = 6000
"#
        )
        .unwrap();

        let config = BurnCamConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.sensor.width, 80);
        assert_eq!(config.sensor.height, 60);
        assert_eq!(config.analyzer.detection_method, DetectionMethod::Adaptive);
        assert_eq!(config.analyzer.min_low_ros_frames, 3);
        assert_eq!(config.network.port, 6000);
        // Untouched keys keep their defaults
        assert_eq!(config.capture.file_prefix, "sample_");
        assert_eq!(config.analyzer.frame_timing, FrameTiming::Nominal);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = BurnCamConfig::load_from_file("/nonexistent/burncam.toml").unwrap();
        assert_eq!(config.network.port, 5000);
        assert_eq!(config.serial.baud_rate, 9600);
    }
}
