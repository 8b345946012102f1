use crate::config::Config;
use crate::config::Context;
use crate::config::Credentials;
use crate::data::DataModule;
use crate::distributed::Distributor;
use crate::distributed::multi_node;
use crate::distributed::single_node;
use crate::features::FeatureBuilder;
use crate::features::Fleet;
use crate::table::Table;
use crate::table::WriteOptions;
use crate::tracking::RunStatus;
use crate::tracking::Tracker;
use crate::*;
use clap::Parser;
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

type Backend = burn::backend::Autodiff<burn::backend::NdArray>;

#[derive(Parser)]
#[command(author, version, about = "Lakehouse feature preparation and autoencoder training", long_about = None)]
pub struct Cli {
    /// Directory holding the catalogs.
    #[arg(long, default_value = "lakehouse", global = true)]
    root: PathBuf,
    #[arg(long, default_value = "main", global = true)]
    catalog: String,
    /// JSON config file; overrides --root and --catalog.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(about = "Write a synthetic bronze telemetry table")]
    Bronze {
        #[arg(long, default_value_t = 50)]
        devices: usize,
        #[arg(long, default_value_t = 400)]
        readings: usize,
    },
    #[command(about = "Split the bronze table into train and test tables", alias = "feat")]
    Features,
    #[command(about = "Train the autoencoder on the train table")]
    Train {
        #[arg(long, conflicts_with = "distributed")]
        single: bool,
        #[arg(long)]
        distributed: bool,
        #[arg(long, default_value_t = NUM_PROCESSES)]
        processes: usize,
        /// Run replicas as if on a cluster rather than the driver.
        #[arg(long)]
        cluster: bool,
        #[arg(long)]
        gpu: bool,
        #[arg(long, default_value_t = BATCH_SIZE)]
        batch_size: usize,
    },
    #[command(about = "Show table versions and the latest training run")]
    Status,
}

impl Cli {
    pub async fn run() -> anyhow::Result<()> {
        let cli = Self::parse();
        let config = match cli.config {
            Some(ref path) => Config::load(path)?,
            None => Config::catalog(&cli.root, &cli.catalog),
        };
        let context = Context::new(config, Credentials::from_env());
        match cli.command {
            Command::Bronze { devices, readings } => bronze(&context, devices, readings),
            Command::Features => features(&context),
            Command::Train {
                distributed,
                processes,
                cluster,
                gpu,
                batch_size,
                ..
            } => train(&context, distributed, Distributor::new(processes, !cluster, gpu), batch_size).await,
            Command::Status => status(&context),
        }
    }
}

fn bronze(context: &Context, devices: usize, readings: usize) -> anyhow::Result<()> {
    let frame = Fleet { devices, readings }.generate(&mut rand::rng())?;
    let commit = Table::at(&context.config.bronze_table).overwrite(&frame, WriteOptions::default())?;
    log::info!(
        "{:<20}{} rows, version {}",
        "bronze",
        commit.rows,
        commit.version
    );
    Ok(())
}

fn features(context: &Context) -> anyhow::Result<()> {
    let features = FeatureBuilder::from(&context.config).build()?;
    log::info!("{:<20}{}", "training columns", features.columns.join(", "));
    log::info!("{:<20}{}", "input size", features.input_size());
    Ok(())
}

async fn train(
    context: &Context,
    spread: bool,
    distributor: Distributor,
    batch_size: usize,
) -> anyhow::Result<()> {
    let config = &context.config;
    let columns = Table::at(&config.train_table)
        .latest()?
        .schema
        .into_iter()
        .map(|field| field.name)
        .filter(|name| name != ID_FIELD)
        .collect::<Vec<_>>();
    anyhow::ensure!(
        columns.iter().any(|c| c == TARGET_COLUMN),
        "train table has no {} column",
        TARGET_COLUMN
    );
    let input_size = columns.len() - 1;
    let data = DataModule::new(&config.train_table, &config.test_table, &columns).with_batch_size(batch_size);
    let model = if spread {
        multi_node::<Backend>(context, &data, input_size, &distributor).await?
    } else {
        single_node::<Backend>(context, &data, input_size)?
    };
    log::info!("{:<20}{:?}", "trained", model.config());
    Ok(())
}

fn status(context: &Context) -> anyhow::Result<()> {
    let config = &context.config;
    for (name, path) in [
        ("bronze", &config.bronze_table),
        ("train", &config.train_table),
        ("test", &config.test_table),
    ] {
        let table = Table::at(path);
        if !table.exists() {
            log::info!("{:<20}{}", name, "missing".red());
            continue;
        }
        log::info!("{:<20}{}", name, path);
        for commit in table.history()? {
            log::info!("{:<20}{}", "", commit);
        }
    }
    let tracker = Tracker::at(config.tracking_root());
    let Some(experiment) = tracker.find(&config.pl_experiment_path)? else {
        log::info!("{:<20}{}", "experiment", "none".yellow());
        return Ok(());
    };
    let Some(run) = experiment.latest()? else {
        log::info!("{:<20}{}", "experiment", "no runs".yellow());
        return Ok(());
    };
    let status = match run.status() {
        RunStatus::Finished => run.status().to_string().green(),
        RunStatus::Running => run.status().to_string().yellow(),
        RunStatus::Failed | RunStatus::Killed => run.status().to_string().red(),
    };
    log::info!("{:<20}{} {}", "latest run", run.id(), status);
    for (metric, value) in run.summary()? {
        log::info!("{:<20}{:.5}", metric, value);
    }
    Ok(())
}
