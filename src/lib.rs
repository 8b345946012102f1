//! Lakehouse feature preparation and distributed autoencoder training.
//!
//! A bronze telemetry table is split temporally into train and test tables,
//! streamed back as fixed-size batches, and fed to a small autoencoder that is
//! trained either in-process or across a pool of synchronised replicas.

#[cfg(feature = "server")]
pub mod cli;
pub mod config;
pub mod data;
pub mod distributed;
pub mod features;
pub mod model;
pub mod table;
pub mod tracking;
pub mod training;

// ============================================================================
// TYPE ALIASES
// ============================================================================
/// Loss values, feature values and model parameters.
pub type Energy = f32;
/// Probabilities emitted by the sigmoid head.
pub type Probability = f32;
/// Sequential row identifier assigned by the feature builder.
pub type RowId = i64;
/// Table version number in the commit log.
pub type Version = u64;

// ============================================================================
// COLUMNS
// The bronze telemetry schema: identifiers and timestamps are dropped before
// training, `defect` is the label, everything else is a numeric feature.
// ============================================================================
/// Synthetic sequential id added by the feature builder.
pub const ID_FIELD: &str = "id";
/// Binary label column the autoencoder predicts.
pub const TARGET_COLUMN: &str = "defect";
/// Ordering column for the temporal split.
pub const TIMESTAMP_COLUMN: &str = "timestamp";
/// Identifier and categorical columns removed before training.
pub const CATEGORICAL_COLUMNS: [&str; 5] = [
    "device_id",
    "trip_id",
    "timestamp",
    "factory_id",
    "model_id",
];
/// Numeric sensor columns of the synthetic bronze table.
pub const SENSOR_COLUMNS: [&str; 6] = [
    "airflow_rate",
    "rotation_speed",
    "air_pressure",
    "temperature",
    "delay",
    "density",
];

// ============================================================================
// FEATURE SPLIT
// ============================================================================
/// Leading fraction of timestamp-ordered rows assigned to the train table.
pub const TRAIN_FRACTION: f64 = 0.7;

// ============================================================================
// AUTOENCODER
// ============================================================================
/// Width of the outer hidden layers.
pub const HIDDEN_SIZE: usize = 64;
/// Width of the bottleneck.
pub const LATENT_DIM: usize = 32;
/// Adam step size. No schedule is applied.
pub const LEARNING_RATE: f64 = 1e-3;
/// Predictions are kept this far from 0 and 1 before taking logs.
pub const BCE_EPSILON: Probability = 1e-7;

// ============================================================================
// TRAINING LOOP
// ============================================================================
/// Rows per batch read from a table.
pub const BATCH_SIZE: usize = 2048;
/// Upper bound on training epochs.
pub const EPOCHS: usize = 20;
/// Epochs without improvement of `train_loss` before stopping.
pub const PATIENCE: usize = 3;
/// Minimum decrease of `train_loss` that counts as an improvement.
pub const MIN_DELTA: Energy = 0.;
/// Step metrics are written every n optimizer steps.
pub const LOG_EVERY_N_STEPS: usize = 50;

// ============================================================================
// DISTRIBUTION
// ============================================================================
/// Replica count used by the multi-node driver.
pub const NUM_PROCESSES: usize = 2;
/// Largest group the distributor launches; every replica holds its own thread.
pub const MAX_PROCESSES: usize = 64;

// ============================================================================
// RUNTIME UTILITIES
// ============================================================================
/// Initialize dual logging (terminal + file) with timestamped log files.
/// Creates `logs/` directory and writes DEBUG level to file, INFO to terminal.
#[cfg(feature = "server")]
pub fn log() {
    std::fs::create_dir_all("logs").expect("create logs directory");
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves slow")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{}.log", time)).expect("create log file"),
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![term, file]).expect("initialize logger");
}

/// Register Ctrl+C handler for immediate (non-graceful) termination.
pub fn kys() {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!();
            log::warn!("violent interrupt received, exiting immediately");
            std::process::exit(130);
        }
    });
}

/// Global interrupt flag for graceful shutdown coordination.
static INTERRUPTED: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);
/// Optional training deadline from TRAIN_DURATION env var.
static DEADLINE: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

/// Check if graceful shutdown was requested (via stdin "Q") or deadline reached.
pub fn interrupted() -> bool {
    INTERRUPTED.load(std::sync::atomic::Ordering::Relaxed)
        || DEADLINE
            .get()
            .map_or(false, |d| std::time::Instant::now() >= *d)
}

/// Register graceful interrupt handler. Type "Q" + Enter to stop after the current epoch.
/// Optionally set TRAIN_DURATION env var (e.g., "2h", "30m") for timed runs.
pub fn brb() {
    if let Ok(duration) = std::env::var("TRAIN_DURATION") {
        if let Some(deadline) = parse_duration(&duration) {
            let _ = DEADLINE.set(std::time::Instant::now() + deadline);
            log::info!("training will stop after {}", duration);
        }
    }
    std::thread::spawn(|| {
        loop {
            let ref mut buffer = String::new();
            match std::io::stdin().read_line(buffer) {
                Ok(0) | Err(_) => break,
                Ok(_) if buffer.trim().to_uppercase() == "Q" => {
                    log::warn!("graceful interrupt requested, finishing current epoch...");
                    INTERRUPTED.store(true, std::sync::atomic::Ordering::Relaxed);
                    break;
                }
                Ok(_) => continue,
            }
        }
    });
}

/// Parse duration string like "30s", "5m", "2h", "1d" into Duration.
fn parse_duration(s: &str) -> Option<std::time::Duration> {
    let s = s.trim();
    let (num, unit) = s.split_at(s.len().saturating_sub(1));
    let value: u64 = num.parse().ok()?;
    match unit {
        "s" => Some(std::time::Duration::from_secs(value)),
        "m" => Some(std::time::Duration::from_secs(value * 60)),
        "h" => Some(std::time::Duration::from_secs(value * 3600)),
        "d" => Some(std::time::Duration::from_secs(value * 86400)),
        _ => None,
    }
}
