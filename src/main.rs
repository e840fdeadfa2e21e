use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use grind_monitor::models::{
    AverageWindow, CalculationMode, Region, RegionConfig, TrackerConfig,
};
use grind_monitor::services::archive::SessionArchive;
use grind_monitor::services::engine::TrackingEngine;
use grind_monitor::services::sample_source::SimulatedSampleSource;
use log::debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

fn long_version() -> String {
    format!(
        "{} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GRIND_MONITOR_GIT_HASH").unwrap_or("unreleased"),
        env!("GRIND_MONITOR_BUILD_TIME"),
    )
}

#[derive(Parser)]
#[command(name = "grind-monitor")]
#[command(about = "Tracking and EXP analytics engine for a screen-recognition grinding overlay")]
#[command(version, long_version = long_version().leak() as &'static str)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a tracking session against the simulated recognition backend
    Monitor {
        /// Session length in seconds
        #[arg(short, long, default_value = "60")]
        duration: u64,

        /// Simulated starting character level
        #[arg(short, long, default_value = "120")]
        level: u32,
    },
    /// Show archive aggregates
    Status,
    /// List archived sessions
    History {
        /// Number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Rename an archived session
    Rename { id: String, title: String },
    /// Delete an archived session
    Delete { id: String },
    /// Delete every archived session
    Clear,
    /// Configure the tracker
    Config {
        /// Average window: none, 1m, 5m, 10m, 30m, 1h
        #[arg(long)]
        window: Option<String>,
        /// Average mode: prediction or per-interval
        #[arg(long)]
        mode: Option<String>,
        /// Authoritative pull cadence in seconds
        #[arg(long)]
        poll_interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("grind-monitor");
    std::fs::create_dir_all(&data_dir)?;

    if cli.verbose {
        // Debug output goes to a file so it never fights the status
        // lines on the terminal
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_dir.join("grind-monitor.log"))?;
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Debug)
            .target(env_logger::Target::Pipe(Box::new(log_file)))
            .init();
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let config = load_or_create_config(&data_dir)?;

    match cli.command {
        Some(Commands::Monitor { duration, level }) => {
            run_monitor(&data_dir, config, duration, level).await?;
        }
        Some(Commands::Status) => {
            let archive = open_archive(&data_dir, &config).await?;
            show_status(&archive);
        }
        Some(Commands::History { limit }) => {
            let archive = open_archive(&data_dir, &config).await?;
            show_history(&archive, limit);
        }
        Some(Commands::Rename { id, title }) => {
            let mut archive = open_archive(&data_dir, &config).await?;
            archive.rename_session(&id, &title).await?;
            println!("renamed session {}", id);
        }
        Some(Commands::Delete { id }) => {
            let mut archive = open_archive(&data_dir, &config).await?;
            archive.delete_session(&id).await?;
            println!("deleted session {}", id);
        }
        Some(Commands::Clear) => {
            let mut archive = open_archive(&data_dir, &config).await?;
            archive.clear_all().await?;
            println!("archive cleared");
        }
        Some(Commands::Config { window, mode, poll_interval }) => {
            configure(&data_dir, config, window, mode, poll_interval)?;
        }
        None => {
            run_monitor(&data_dir, config, 60, 120).await?;
        }
    }

    Ok(())
}

async fn run_monitor(
    data_dir: &PathBuf,
    mut config: TrackerConfig,
    duration: u64,
    level: u32,
) -> Result<()> {
    println!(
        "{}",
        "grind-monitor - simulated tracking session".bright_cyan().bold()
    );

    // The simulated backend does not read pixels; any regions satisfy
    // the start precondition.
    if config.regions.is_none() {
        debug!("no regions configured, using placeholder regions for simulation");
        config.regions = Some(placeholder_regions());
    }

    let archive = Arc::new(RwLock::new(open_archive(data_dir, &config).await?));
    let source = Arc::new(SimulatedSampleSource::new(level));
    let engine = TrackingEngine::new(source, Arc::clone(&archive), config);

    engine.start().await?;

    let rounds = (duration / 5).max(1);
    for _ in 0..rounds {
        tokio::time::sleep(Duration::from_secs(5)).await;

        let snapshot = engine.snapshot().await;
        let average = engine.window_average().await;
        let eta = engine.level_up_eta().await;

        let level_text = snapshot
            .level
            .map(|l| l.to_string())
            .unwrap_or_else(|| "?".to_string());
        let percentage_text = snapshot
            .percentage
            .map(|p| format!("{:.2}%", p))
            .unwrap_or_else(|| "?".to_string());

        print!(
            "  lv {} [{}]  +{} exp  {}/h  next lv in {}",
            level_text.bright_white().bold(),
            percentage_text,
            snapshot.total_exp,
            snapshot.exp_per_hour,
            eta.to_string().bright_green(),
        );
        if let Some(average) = average {
            print!("  avg {}", average);
        }
        if let Some(error) = &snapshot.error {
            print!("  {}", error.red());
        }
        println!();
    }

    engine.end_session().await?;

    let archive = archive.read().await;
    if let Some(record) = archive.all_sessions().first() {
        println!();
        println!("{}", "session archived:".bright_yellow().bold());
        println!("  id:        {}", record.id);
        println!("  title:     {}", record.title);
        println!(
            "  duration:  {}s ({}s paused)",
            record.duration_seconds, record.paused_seconds
        );
        match record.exp_gained {
            Some(gained) => println!("  exp:       +{} ({:.1}/s)", gained, record.avg_exp_per_second),
            None => println!("  exp:       no data"),
        }
    }

    Ok(())
}

fn show_status(archive: &SessionArchive) {
    println!("{}", "archive status".bright_cyan().bold());
    println!("  sessions:       {}", archive.total_sessions());
    println!(
        "  tracked time:   {}",
        humantime::format_duration(Duration::from_secs(archive.total_tracking_time()))
    );
    println!(
        "  avg duration:   {}",
        humantime::format_duration(Duration::from_secs(archive.average_duration() as u64))
    );
}

fn show_history(archive: &SessionArchive, limit: usize) {
    let sessions = archive.recent_sessions(limit);
    if sessions.is_empty() {
        println!("no archived sessions");
        return;
    }

    println!(
        "{}",
        format!("last {} sessions (newest first)", sessions.len())
            .bright_cyan()
            .bold()
    );
    for record in sessions {
        let exp = record
            .exp_gained
            .map(|g| format!("+{}", g))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  {}  {:>8}s  {:>12} exp  {}",
            &record.id[..8],
            humantime::format_rfc3339_seconds(record.start_time.into()),
            record.duration_seconds,
            exp,
            record.title,
        );
    }
}

fn configure(
    data_dir: &PathBuf,
    mut config: TrackerConfig,
    window: Option<String>,
    mode: Option<String>,
    poll_interval: Option<u64>,
) -> Result<()> {
    if let Some(window) = window {
        config.average_window = parse_window(&window)?;
        println!("average window set to {}", config.average_window.label());
    }
    if let Some(mode) = mode {
        config.calculation_mode = parse_mode(&mode)?;
        println!("calculation mode set to {}", config.calculation_mode.suffix());
    }
    if let Some(interval) = poll_interval {
        config.poll_interval_seconds = interval.max(1);
        println!("poll interval set to {}s", config.poll_interval_seconds);
    }

    let content = serde_json::to_string_pretty(&config)?;
    std::fs::write(data_dir.join("config.json"), content)?;
    Ok(())
}

async fn open_archive(data_dir: &PathBuf, config: &TrackerConfig) -> Result<SessionArchive> {
    let mut archive = SessionArchive::new(
        data_dir.join("session_records.json"),
        config.archive_limit,
    );
    archive.load().await?;
    Ok(archive)
}

fn load_or_create_config(data_dir: &PathBuf) -> Result<TrackerConfig> {
    let config_path = data_dir.join("config.json");
    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        let config = TrackerConfig::default();
        let content = serde_json::to_string_pretty(&config)?;
        std::fs::write(&config_path, content)?;
        Ok(config)
    }
}

fn parse_window(value: &str) -> Result<AverageWindow> {
    match value.to_lowercase().as_str() {
        "none" | "off" => Ok(AverageWindow::None),
        "1m" | "1min" => Ok(AverageWindow::OneMinute),
        "5m" | "5min" => Ok(AverageWindow::FiveMinutes),
        "10m" | "10min" => Ok(AverageWindow::TenMinutes),
        "30m" | "30min" => Ok(AverageWindow::ThirtyMinutes),
        "1h" | "60min" => Ok(AverageWindow::OneHour),
        _ => anyhow::bail!(
            "invalid window '{}': use none, 1m, 5m, 10m, 30m or 1h",
            value
        ),
    }
}

fn parse_mode(value: &str) -> Result<CalculationMode> {
    match value.to_lowercase().as_str() {
        "prediction" => Ok(CalculationMode::Prediction),
        "per-interval" | "interval" => Ok(CalculationMode::PerInterval),
        _ => anyhow::bail!("invalid mode '{}': use prediction or per-interval", value),
    }
}

fn placeholder_regions() -> RegionConfig {
    let region = Region { x: 0, y: 0, width: 1, height: 1 };
    RegionConfig {
        level: region,
        exp: region,
        consumable_a: region,
        consumable_b: region,
    }
}
