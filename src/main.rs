use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use burncam::protocol::{ProtocolController, RigControl, RunParameters};
use burncam::transport::{SerialTransport, TcpTransport, Transport};
use burncam::{BurnCamConfig, BurnRig, ShutdownReason};

#[derive(Parser, Debug)]
#[command(name = "burncam")]
#[command(about = "Thermal burn-chamber rig controller")]
#[command(version)]
#[command(long_about = "Drives a thermal capture executable, analyzes the frames it writes \
to measure burned area and rate of spread, and answers line-oriented JSON commands over a \
serial link and a TCP port.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "burncam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the rig")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Run a single capture without any transport, print the summary and exit
    #[arg(long)]
    standalone: bool,

    /// Capture duration in seconds for --standalone
    #[arg(long, value_name = "SECONDS", requires = "standalone")]
    duration: Option<u32>,

    /// Burn temperature delta in °C for --standalone
    #[arg(long, value_name = "CELSIUS", requires = "standalone")]
    threshold: Option<f64>,

    /// Do not open the serial transport
    #[arg(long)]
    no_serial: bool,

    /// Do not start the TCP transport
    #[arg(long)]
    no_network: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting burncam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match BurnCamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if args.no_serial {
        config.serial.enabled = false;
    }
    if args.no_network {
        config.network.enabled = false;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let rig = BurnRig::new(config);
    rig.initialize().await.map_err(|e| {
        error!("Failed to initialize rig: {}", e);
        e
    })?;

    if args.standalone {
        let exit_code = run_standalone(&rig, &args).await?;
        std::process::exit(exit_code);
    }

    start_transports(&rig).await?;

    let exit_code = rig.run().await.map_err(|e| {
        error!("Rig error during execution: {}", e);
        e
    })?;

    info!("burncam exited with code: {}", exit_code);
    std::process::exit(exit_code);
}

async fn run_standalone(rig: &BurnRig, args: &Args) -> Result<i32> {
    let defaults = rig.run_defaults();
    let params = RunParameters {
        duration_sec: args
            .duration
            .filter(|d| *d > 0)
            .unwrap_or(defaults.duration_sec),
        temp_threshold: args
            .threshold
            .filter(|t| *t > 0.0)
            .unwrap_or(defaults.temp_threshold),
    };

    let outcome = rig.run_standalone(params).await;
    let exit_code = rig.shutdown().await?;

    match outcome {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(exit_code)
        }
        Err(e) => {
            error!("Standalone run failed: {}", e);
            eprintln!("✗ Run failed: {}", e);
            Ok(1)
        }
    }
}

/// Bind the enabled transports and serve them until the rig shuts down
async fn start_transports(rig: &BurnRig) -> Result<()> {
    let config = rig.config();
    let mut transports: Vec<Box<dyn Transport>> = Vec::new();

    if config.network.enabled {
        let transport = TcpTransport::bind(&config.network, controller(rig, "tcp")).await?;
        transports.push(Box::new(transport));
    }

    if config.serial.enabled {
        match SerialTransport::open(&config.serial, controller(rig, "serial"), rig.event_bus()) {
            Ok(transport) => transports.push(Box::new(transport)),
            Err(e) => warn!("Serial transport unavailable: {}", e),
        }
    }

    if transports.is_empty() {
        warn!("No transport enabled; the rig can only be stopped by a signal");
    }

    for transport in transports {
        let rig = rig.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.serve(rig.cancellation_token()).await {
                error!("{} transport failed: {}", transport.name(), e);
                rig.request_shutdown(ShutdownReason::Error(format!(
                    "{} transport failed: {}",
                    transport.name(),
                    e
                )));
            }
        });
    }

    Ok(())
}

fn controller(rig: &BurnRig, transport: &'static str) -> ProtocolController {
    ProtocolController::new(Arc::new(rig.clone()) as Arc<dyn RigControl>, transport)
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("burncam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "burncam.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# burncam configuration file");
    println!("# Default values for every option; any key may be omitted.");
    println!("# Environment overrides use the BURNCAM__ prefix, e.g. BURNCAM__NETWORK__PORT=6000");
    println!();

    let default_config = r#"[sensor]
# Frame resolution in pixels
width = 160
height = 120
# Nominal sensor frame rate
fps = 9.0
# Physical area covered by one pixel (cm²)
pixel_area_cm2 = 0.25

[capture]
# Capture executable and its sensor mode flag
executable = "lepton_data_collector"
sensor_mode_flag = "-3"
# Staging directory the executable writes frames into
folder = "/tmp/capture"
file_prefix = "sample_"
file_extension = "gray"
# Duration used when START carries none
default_duration_sec = 60
# Slack before a capture that outlives its duration is timed out
completion_buffer_sec = 30
# The process must survive this long after launch to count as started
launch_grace_ms = 500
# Graceful terminate window before the process is killed
terminate_timeout_sec = 5
# Mount tmpfs on the staging directory (requires privileges)
use_tmpfs = true
# Kernel module and /dev node prefix of the sensor driver
driver_module = "lepton"
device_prefix = "video"

[analyzer]
# Rise above the baseline that marks a pixel as burned (°C)
temp_threshold_delta = 100.0
# Percentile of the first frame used as baseline
baseline_percentile = 50.0
# Burned pixels are never colder than this (°C)
min_burn_temp_absolute = 100.0
# "temperature" or "adaptive"
detection_method = "temperature"
# Burn regions smaller than this are discarded as noise
min_region_area_px = 20
# Cumulative burned pixels required to declare ignition
ignition_min_pixels = 50
# Rate of spread below this counts as not spreading (cm²/s)
ros_stop_threshold = 0.1
# Consecutive low-ROS frames before auto-stop
min_low_ros_frames = 50
# "nominal" (index / fps) or "file_modified"
frame_timing = "nominal"

[processing]
workers = 2
worker_wake_ms = 1000
watcher_poll_ms = 100
drain_timeout_sec = 30

[monitor]
partial_results_path = "/tmp/burn_partial_results.json"
partial_interval_sec = 10
completion_poll_ms = 200
# One summary file per completed run (optional)
# results_dir = "/var/lib/burncam/runs"

[serial]
enabled = true
device = "/dev/serial0"
baud_rate = 9600
poll_interval_ms = 100
# Push final results without a request when a run completes
push_notifications = true

[network]
enabled = true
ip = "0.0.0.0"
port = 5000
max_connections = 4
"#;

    println!("{}", default_config);
}
