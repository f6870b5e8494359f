use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use burncam::{
    analyzer::BurnAnalyzer,
    capture::storage,
    config::{BurnCamConfig, SensorConfig},
    frame::{sequence_from_filename, ThermalFrame},
};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

/// Offline tools for staged burn-chamber frames.
#[derive(Parser, Debug)]
#[command(name = "burntool")]
#[command(about = "Analyze or inspect raw thermal frames without a running rig")]
struct Args {
    /// Path to burncam configuration file (sensor and analyzer settings)
    #[arg(short = 'c', long, default_value = "burncam.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Tool,
}

#[derive(Subcommand, Debug)]
enum Tool {
    /// Run the burn analyzer over a directory of frames
    Analyze {
        /// Directory holding the frame files
        dir: PathBuf,

        /// Burn temperature delta in °C (defaults to the configured one)
        #[arg(long)]
        threshold: Option<f64>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print dimensions and temperature range of a single frame
    Inspect {
        /// Frame file
        file: PathBuf,
    },
}

#[derive(Debug)]
struct FrameStats {
    width: u32,
    height: u32,
    min_celsius: f64,
    max_celsius: f64,
    mean_celsius: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = load_config(&args.config)?;

    match args.command {
        Tool::Analyze {
            dir,
            threshold,
            json,
        } => analyze(&config, &dir, threshold, json),
        Tool::Inspect { file } => inspect(&config.sensor, &file),
    }
}

fn analyze(config: &BurnCamConfig, dir: &Path, threshold: Option<f64>, json: bool) -> Result<()> {
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", dir.display()));
    }

    let mut frames = storage::list_frames(
        dir,
        &config.capture.file_prefix,
        &config.capture.file_extension,
    );
    if frames.is_empty() {
        return Err(anyhow!("No frames found in {}", dir.display()));
    }
    frames.sort_by_key(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .and_then(sequence_from_filename)
    });

    info!("Analyzing {} frame(s) from {}", frames.len(), dir.display());

    let mut analyzer = BurnAnalyzer::new(config.analyzer.clone(), config.sensor.clone());
    if let Some(delta) = threshold {
        analyzer.set_temp_threshold_delta(delta);
    }

    let mut skipped = 0usize;
    for path in &frames {
        let frame = match ThermalFrame::read(path, config.sensor.width, config.sensor.height) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                skipped += 1;
                continue;
            }
        };

        // No live fire signal offline, so auto-stop never fires
        match analyzer.process_frame(&frame, false) {
            Ok(analysis) if analysis.ignited_now => {
                debug!("Ignition at {}", path.display());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                skipped += 1;
            }
        }
    }

    let summary = analyzer.summary();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Frames analyzed:     {}", summary.total_frames);
    if skipped > 0 {
        println!("Frames skipped:      {}", skipped);
    }
    println!("Duration:            {:.2} s", summary.duration_sec);
    println!("Burn threshold:      {:.1} °C", summary.burn_threshold_celsius);
    match summary.baseline_temp_celsius {
        Some(baseline) => println!("Baseline:            {:.1} °C", baseline),
        None => println!("Baseline:            -"),
    }
    match (summary.ignition_frame, summary.ignition_time_sec) {
        (Some(frame), Some(time)) => println!("Ignition:            frame {} at {:.2} s", frame, time),
        _ => println!("Ignition:            not detected"),
    }
    println!(
        "Final burn area:     {:.2} cm² ({:.2}%)",
        summary.final_burn_area_cm2, summary.final_burn_percentage
    );
    println!("Average ROS:         {:.3} cm²/s", summary.avg_ros_cm2_per_sec);
    println!("Max ROS:             {:.3} cm²/s", summary.max_ros_cm2_per_sec);
    println!("Max temperature:     {:.1} °C", summary.max_temp_celsius);
    if let Some(fps) = summary.actual_fps {
        println!("Measured frame rate: {:.2} fps", fps);
    }

    Ok(())
}

fn inspect(sensor: &SensorConfig, file: &Path) -> Result<()> {
    let frame = ThermalFrame::read(file, sensor.width, sensor.height)
        .with_context(|| format!("Failed to read frame {}", file.display()))?;

    let celsius = frame.celsius();
    let stats = FrameStats {
        width: frame.width,
        height: frame.height,
        min_celsius: celsius.iter().copied().fold(f64::INFINITY, f64::min),
        max_celsius: celsius.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean_celsius: celsius.iter().sum::<f64>() / celsius.len().max(1) as f64,
    };

    println!("{}", file.display());
    if let Some(sequence) = frame.sequence {
        println!("  sequence: {}", sequence);
    }
    println!("  size:     {}x{}", stats.width, stats.height);
    println!("  min:      {:.2} °C", stats.min_celsius);
    println!("  max:      {:.2} °C", stats.max_celsius);
    println!("  mean:     {:.2} °C", stats.mean_celsius);

    Ok(())
}

fn load_config(config_path: &Path) -> Result<BurnCamConfig> {
    if config_path.exists() {
        BurnCamConfig::load_from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))
    } else {
        warn!(
            "Config file {} not found, using built-in defaults",
            config_path.display()
        );
        Ok(BurnCamConfig::default())
    }
}
