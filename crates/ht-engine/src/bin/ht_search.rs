//! Hypertrack search CLI
//!
//! Tunes a random forest on a prepared train/validation split and reports the
//! best tracked run.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use ht_data::SplitLoader;
use ht_engine::{ObjectiveEvaluator, SearchConfig, SearchDriver, SearchSummary};
use ht_optimizer::{RandomSearch, SearchSpace, SearchStrategy, TpeSearch};
use ht_tracking::{TrackingClient, TrackingConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Algo {
    Tpe,
    Random,
}

#[derive(Debug, Parser)]
#[command(name = "ht-search")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hyperparameter search with experiment tracking", long_about = None)]
struct Cli {
    /// Directory holding train.{parquet,csv} and val.{parquet,csv}
    #[arg(long, default_value = "./output")]
    data_path: PathBuf,

    /// Number of trials to run
    #[arg(long, default_value_t = 15, value_parser = clap::value_parser!(u64).range(1..))]
    num_trials: u64,

    /// Tracking store endpoint, http(s):// or memory:// [default: $HT_TRACKING_URI]
    #[arg(long)]
    tracking_uri: Option<String>,

    /// Experiment grouping the trial runs [default: $HT_EXPERIMENT_NAME]
    #[arg(long)]
    experiment_name: Option<String>,

    /// Seed for the search strategy
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Search strategy
    #[arg(long, value_enum, default_value_t = Algo::Tpe)]
    algo: Algo,

    /// Target column (defaults to the last column)
    #[arg(long)]
    target: Option<String>,

    /// Fail a trial whose evaluation exceeds this many seconds
    #[arg(long)]
    trial_timeout_secs: Option<u64>,

    /// Wrap the trial runs in a parent run
    #[arg(long)]
    parent_run: bool,
}

impl Cli {
    /// Environment settings, overridden by explicit flags.
    fn tracking_config(&self) -> TrackingConfig {
        let mut config = TrackingConfig::from_env();
        if let Some(uri) = &self.tracking_uri {
            config.endpoint = uri.clone();
        }
        if let Some(name) = &self.experiment_name {
            config.experiment_name = name.clone();
        }
        config
    }

    fn search_config(&self) -> SearchConfig {
        SearchConfig::default()
            .with_num_trials(self.num_trials as usize)
            .with_trial_timeout(self.trial_timeout_secs.map(Duration::from_secs))
            .with_parent_run(self.parent_run)
    }

    fn strategy(&self) -> anyhow::Result<Box<dyn SearchStrategy>> {
        let space = SearchSpace::random_forest();
        Ok(match self.algo {
            Algo::Tpe => Box::new(TpeSearch::new(space, Some(self.seed))?),
            Algo::Random => Box::new(RandomSearch::new(space, Some(self.seed))?),
        })
    }
}

async fn run(cli: &Cli) -> anyhow::Result<SearchSummary> {
    let split = SplitLoader::new(&cli.data_path)
        .with_target(cli.target.clone())
        .load()
        .with_context(|| format!("loading data from {}", cli.data_path.display()))?;

    let tracking = cli.tracking_config();
    let client = TrackingClient::connect(tracking.clone())
        .await
        .with_context(|| format!("connecting to tracking store at {}", tracking.endpoint))?;

    let mut driver = SearchDriver::new(
        cli.search_config(),
        cli.strategy()?,
        ObjectiveEvaluator::random_forest(split),
        client,
    )?;
    Ok(driver.run().await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let summary = run(&cli).await?;

    println!(
        "Experiment {} ({}): {} completed, {} failed",
        summary.experiment.name, summary.experiment.experiment_id, summary.completed, summary.failed
    );
    match &summary.best_run {
        Some(best) => {
            println!("Best run:");
            println!("{}", serde_json::to_string_pretty(best)?);
        }
        None => println!("No completed run logged a loss"),
    }
    Ok(())
}
