// src/main.rs
//! Trackbook - record GPS tracks from gpsd or a serial NMEA receiver

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use trackbook::{
    config::TrackbookConfig,
    display::TerminalDisplay,
    preferences::{PreferenceRegistry, Preferences, Theme, UnitSystem},
    refresh::RefreshLoop,
    storage::{FileTrackStore, PersistenceWorker, TrackStore},
    units, RecordingSession, Track, TrackerService, Tracklist,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Track storage directory (overrides the configured one)
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceKind {
    Gpsd,
    Serial,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record a new track until Ctrl+C
    Record {
        #[arg(long, value_enum)]
        source: Option<SourceKind>,
        /// gpsd host
        #[arg(long)]
        host: Option<String>,
        /// gpsd port
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        serial_port: Option<String>,
        #[arg(long)]
        baud: Option<u32>,
        /// Store the source settings as the new default
        #[arg(long)]
        save_config: bool,
    },
    /// List recorded tracks, newest first
    List,
    /// Show statistics of one track
    Show { id: i64 },
    /// Export a track as GPX into a directory or file
    Export { id: i64, destination: PathBuf },
    Rename { id: i64, name: String },
    Delete { id: i64 },
    /// Toggle the starred flag of a track
    Star { id: i64 },
    /// Set the unit system used for display
    Units { units: UnitSystem },
    Theme { theme: Theme },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so the terminal view stays readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trackbook=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let mut config = TrackbookConfig::load().context("Failed to load configuration")?;
    if let Some(dir) = args.storage_dir.clone() {
        config.storage_dir = Some(dir);
    }

    match args.command {
        Commands::Record { source, host, port, serial_port, baud, save_config } => {
            match source {
                Some(SourceKind::Serial) => {
                    let Some(serial_port) = serial_port.or_else(|| config.serial_port.clone()) else {
                        bail!("--serial-port is required for the serial source");
                    };
                    let baud = baud.or(config.serial_baudrate).unwrap_or(9600);
                    config.update_serial(serial_port, baud);
                }
                Some(SourceKind::Gpsd) => {
                    let host = host.or_else(|| config.gpsd_host.clone()).unwrap_or_else(|| "localhost".to_string());
                    let port = port.or(config.gpsd_port).unwrap_or(2947);
                    config.update_gpsd(host, port);
                }
                None => {}
            }
            if save_config {
                config.save().context("Failed to save configuration")?;
            }
            record(&config).await
        }
        Commands::List => list(&config),
        Commands::Show { id } => show(&config, id),
        Commands::Export { id, destination } => {
            let mut store = open_store(&config)?;
            let track = store.load(id)?;
            let path = store.export_gpx(&track, &destination)?;
            println!("Exported to {}", path.display());
            Ok(())
        }
        Commands::Rename { id, name } => {
            let mut store = open_store(&config)?;
            let mut tracklist = Tracklist::load(&store)?;
            tracklist.rename(id, &name, &mut store)?;
            println!("Renamed track {} to {}", id, name);
            Ok(())
        }
        Commands::Delete { id } => {
            let mut store = open_store(&config)?;
            let mut tracklist = Tracklist::load(&store)?;
            let removed = tracklist.remove_by_id(id, &mut store)?;
            println!("Deleted {} ({} tracks left)", removed.name, tracklist.len());
            Ok(())
        }
        Commands::Star { id } => {
            let mut store = open_store(&config)?;
            let mut tracklist = Tracklist::load(&store)?;
            let starred = tracklist.toggle_starred(id, &mut store)?;
            println!("Track {} {}", id, if starred { "starred" } else { "unstarred" });
            Ok(())
        }
        Commands::Units { units } => {
            update_preferences(&mut config, |registry| registry.set_units(units))
        }
        Commands::Theme { theme } => {
            update_preferences(&mut config, |registry| registry.set_theme(theme))
        }
    }
}

fn open_store(config: &TrackbookConfig) -> anyhow::Result<FileTrackStore> {
    let root = config.storage_root()?;
    FileTrackStore::new(root.clone()).with_context(|| format!("Failed to open track storage at {}", root.display()))
}

async fn record(config: &TrackbookConfig) -> anyhow::Result<()> {
    let source = config.location_source()?;
    let mut worker = PersistenceWorker::spawn(open_store(config)?);

    if let Some(mut errors) = worker.take_error_receiver() {
        tokio::spawn(async move {
            while let Some(report) = errors.recv().await {
                eprintln!("Could not {} track {}: {}", report.operation, report.track_id, report.error);
            }
        });
    }

    let session = RecordingSession::new(config.filter, config.star_tolerance_m);
    let service = TrackerService::new(session, worker.handle());
    let reader = service
        .spawn_source(source.clone())
        .await
        .with_context(|| format!("Failed to connect to {:?}", source))?;

    let client = service.connect();
    let id = client.start_tracking()?;
    tracing::info!("Recording track {}", id);

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    let mut display = TerminalDisplay::new(config.preferences);
    let refresh = RefreshLoop::new(service.connect(), Duration::from_millis(config.refresh_interval_ms));
    let (shown, result) = refresh.run_then_stop(&mut display, running).await;

    service.shutdown();
    reader.abort();

    match &result {
        Ok(Some(track)) => print_summary(track, config.preferences),
        Ok(None) => println!("\nNo waypoints recorded, nothing saved."),
        Err(_) => {
            // One more attempt before giving up
            if let Ok(tracks) = client.retry_save().await {
                for track in &tracks {
                    print_summary(track, config.preferences);
                }
            }
        }
    }

    let unsaved = client.has_unsaved_track();
    drop(client);
    drop(service);
    worker.shutdown().await;

    if unsaved {
        result.context("Failed to save the recorded track")?;
    }
    shown.context("Terminal display failed")?;
    Ok(())
}

fn print_summary(track: &Track, preferences: Preferences) {
    println!("\nSaved {} ({})", track.name, track.id);
    println!(
        "  {} in {}",
        units::distance_to_string(track.distance as f64, preferences.units),
        units::duration_to_string(track.duration)
    );
    if let Some(path) = &track.export_location {
        println!("  GPX: {}", path.display());
    }
}

fn list(config: &TrackbookConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let tracklist = Tracklist::load(&store)?;
    let prefs = config.preferences;

    if tracklist.is_empty() {
        println!("No tracks recorded yet.");
        return Ok(());
    }

    for element in &tracklist.elements {
        println!(
            "{} {:>20}  {}  {} • {} • {}",
            if element.starred { "★" } else { " " },
            element.id,
            element.name,
            element.date_string,
            units::distance_to_string(element.distance as f64, prefs.units),
            units::duration_to_string(element.duration)
        );
    }
    println!(
        "\n{} tracks, {} in {}",
        tracklist.len(),
        units::distance_to_string(tracklist.total_distance() as f64, prefs.units),
        units::duration_to_string(tracklist.total_duration())
    );
    Ok(())
}

fn show(config: &TrackbookConfig, id: i64) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let track = store.load(id)?;
    let u = config.preferences.units;

    println!("{} ({})", track.name, track.id);
    println!("  Recorded:  {} - {}", units::readable_date_time(&track.recording_start), units::readable_date_time(&track.recording_stop));
    println!("  Waypoints: {}", track.way_points.len());
    println!("  Distance:  {}", units::distance_to_string(track.distance as f64, u));
    println!("  Duration:  {}", units::duration_to_string(track.duration));
    println!("  Paused:    {}", units::duration_to_string(track.recording_paused));
    println!("  Velocity:  {}", units::velocity_to_string(track.distance as f64, track.duration, u));
    if !track.is_empty() {
        println!("  Altitude:  {} - {}", units::distance_to_string(track.min_altitude, u), units::distance_to_string(track.max_altitude, u));
        println!(
            "  Elevation: +{} / -{}",
            units::distance_to_string(track.positive_elevation, u),
            units::distance_to_string(track.negative_elevation, u)
        );
    }
    if track.step_count >= 0.0 {
        println!("  Steps:     {:.0}", track.step_count);
    }
    for wp in track.starred_way_points() {
        println!("  ★ {:.6}, {:.6} at {}", wp.latitude, wp.longitude, units::readable_date_time(&wp.time));
    }
    if let Some(path) = &track.export_location {
        println!("  GPX:       {}", path.display());
    }
    Ok(())
}

fn update_preferences(
    config: &mut TrackbookConfig,
    change: impl FnOnce(&mut PreferenceRegistry),
) -> anyhow::Result<()> {
    let mut registry = PreferenceRegistry::new(config.preferences);
    let changed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&changed);
    registry.subscribe(move |preference| {
        tracing::info!("Preference updated: {:?}", preference);
        flag.store(true, Ordering::Relaxed);
    });

    change(&mut registry);

    if changed.load(Ordering::Relaxed) {
        config.preferences = registry.current();
        config.save().context("Failed to save configuration")?;
        println!("Preferences: units {}, theme {}", config.preferences.units, config.preferences.theme);
    } else {
        println!("Preferences unchanged");
    }
    Ok(())
}
