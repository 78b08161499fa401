mod preview;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use preview::TerminalPreview;
use rollcall_core::OnnxFaceAnalyzer;
use rollcall_hw::Camera;
use rollcall_session::{
    reference_photos, AttendanceLog, AttendanceRecord, Config, EnrollError, IdentityKey,
    IdentityStore, RecognitionSession, StopReason, TIMESTAMP_FORMAT,
};
use serde::Serialize;
use std::io::{BufRead, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Webcam face-recognition attendance")]
struct Cli {
    /// Config file (default: $ROLLCALL_CONFIG, then ./rollcall.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a reference photo for a new identity
    Enroll {
        /// Name to enroll; prompted for when omitted
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Watch the camera and mark attendance
    Recognize,
    /// List enrolled identities
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show attendance records
    Report {
        /// Only records from this day (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// List video capture devices
    Devices,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Enroll { name } => enroll(&config, name),
        Commands::Recognize => recognize(&config),
        Commands::List { json } => list(&config, json),
        Commands::Report { date, json } => report(&config, date, json),
        Commands::Devices => devices(),
    }
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    std::io::stdout().flush()?;

    let mut line = String::new();
    if std::io::stdin().lock().read_line(&mut line)? == 0 {
        bail!("no name entered");
    }
    Ok(line)
}

fn enroll(config: &Config, name: Option<String>) -> Result<()> {
    let raw = match name {
        Some(name) => name,
        None => prompt("Enter your name: ")?,
    };
    let key = IdentityKey::normalize(&raw)?;

    let mut camera = match Camera::open(&config.camera_device) {
        Ok(camera) => camera,
        Err(e) => {
            tracing::error!(device = %config.camera_device, error = %e, "cannot open camera");
            println!("Failed to capture image.");
            return Ok(());
        }
    };

    println!("Look at the camera. Capturing in {} seconds...", config.enroll_delay_secs);

    match rollcall_session::enroll(&mut camera, &config.images_dir, &key, config.enroll_delay()) {
        Ok(_) => println!("Image saved as {}", key.file_name()),
        Err(EnrollError::Capture(e)) => {
            tracing::warn!(error = %e, "enrollment capture failed");
            println!("Failed to capture image.");
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn recognize(config: &Config) -> Result<()> {
    let mut analyzer =
        OnnxFaceAnalyzer::load(&config.scrfd_model_path(), &config.arcface_model_path())
            .with_context(|| {
                format!("failed to load face models from {}", config.model_dir.display())
            })?;

    let store = IdentityStore::load(&config.images_dir, &mut analyzer)?;
    if store.is_empty() {
        tracing::warn!(
            dir = %config.images_dir.display(),
            "no identities enrolled; nobody will be marked"
        );
    }

    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("failed to open camera {}", config.camera_device))?;
    let stream = camera.stream()?;

    let log = AttendanceLog::new(&config.attendance_log);
    let mut session = RecognitionSession::new(store, log, analyzer, config.tolerance);

    println!("Press 'q' to quit.");
    let preview = TerminalPreview::open()?;
    let summary = session.run(stream, preview)?;

    match summary.reason {
        StopReason::QuitKey => tracing::info!(frames = summary.frames, "stopped by user"),
        StopReason::CaptureFailed => {
            tracing::info!(frames = summary.frames, "camera stopped delivering frames")
        }
    }
    println!("{} marked in this session.", summary.marked.len());
    Ok(())
}

fn list(config: &Config, json: bool) -> Result<()> {
    let names: Vec<String> = reference_photos(&config.images_dir)
        .with_context(|| format!("failed to read {}", config.images_dir.display()))?
        .into_iter()
        .map(|(name, _)| name)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&names)?);
    } else if names.is_empty() {
        println!("No identities enrolled");
    } else {
        for name in &names {
            println!("{name}");
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<NaiveDate>,
    /// Distinct names, in order of first appearance.
    present: Vec<String>,
    records: Vec<AttendanceRecord>,
}

impl Report {
    fn new(date: Option<NaiveDate>, records: Vec<AttendanceRecord>) -> Self {
        let mut present: Vec<String> = Vec::new();
        for record in &records {
            if !present.contains(&record.name) {
                present.push(record.name.clone());
            }
        }
        Self { date, present, records }
    }
}

fn report(config: &Config, date: Option<NaiveDate>, json: bool) -> Result<()> {
    let log = AttendanceLog::new(&config.attendance_log);
    let records = match date {
        Some(day) => log.records_on(day)?,
        None => log.records()?,
    };
    let report = Report::new(date, records);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.records.is_empty() {
        println!("No attendance records");
        return Ok(());
    }
    for record in &report.records {
        println!("{:<24} {}", record.name, record.timestamp.format(TIMESTAMP_FORMAT));
    }
    println!("{} present", report.present.len());
    Ok(())
}

fn devices() -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No video capture devices found");
        return Ok(());
    }
    for device in devices {
        println!("{}  {} ({}, {})", device.path, device.name, device.driver, device.bus);
    }
    Ok(())
}
