use std::path::PathBuf;
use std::time::Instant;

use alertdash::config::{BucketOverrides, GeneratorOverrides, StorageOverrides};
use alertdash::generator::{reset_alerts, seed_alerts, teardown_dashboard};
use alertdash::{
    AlertStore, ConfigOverrides, DashConfig, Dashboard, DashboardStore, PersistentStore,
    SystemClock, View,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "alertdash")]
#[command(about = "Build and inspect materialized alert dashboards")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Persistent store directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Alerts per priority bucket
    #[arg(long, global = true)]
    bucket_size: Option<u64>,

    /// Repair the store before opening it
    #[arg(long, global = true)]
    repair: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate synthetic alerts
    Seed {
        /// Number of alerts to generate
        #[arg(long)]
        count: Option<u64>,

        /// RNG seed for a reproducible dataset
        #[arg(long)]
        seed: Option<u64>,

        /// Append instead of resetting the alerts collection first
        #[arg(long)]
        keep: bool,
    },

    /// Rebuild dashboard views from the alerts collection
    Refresh {
        #[arg(value_enum, default_value = "all")]
        view: RefreshTarget,
    },

    /// Print dashboard documents as JSON
    #[command(subcommand)]
    Show(ShowCommands),

    /// Remove dashboard documents
    Teardown {
        /// Also drop the alerts collection
        #[arg(long)]
        alerts: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RefreshTarget {
    Buckets,
    Summary,
    Recent,
    All,
}

#[derive(Subcommand)]
enum ShowCommands {
    /// Landing page data: recent alerts and the newest priority bucket
    Page,
    /// One priority bucket
    Bucket { index: u64 },
    /// Number of priority buckets
    Count,
    /// Most recent open alerts
    Recent,
    /// Every open priority alert in one document
    Summary,
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    if let Some(log_path) = &cli.log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("failed to create log file {}", log_path.display()))?;
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn overrides(cli: &Cli) -> ConfigOverrides {
    let (count, seed) = match &cli.command {
        Commands::Seed { count, seed, .. } => (*count, *seed),
        _ => (None, None),
    };
    ConfigOverrides {
        storage: Some(StorageOverrides {
            data_dir: cli.data_dir.clone(),
            repair: cli.repair.then_some(true),
        }),
        buckets: Some(BucketOverrides {
            bucket_size: cli.bucket_size,
        }),
        generator: Some(GeneratorOverrides { count, seed }),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let config = DashConfig::load(cli.config.as_deref(), overrides(&cli))?;
    std::fs::create_dir_all(&config.storage.data_dir).with_context(|| {
        format!(
            "failed to create data dir {}",
            config.storage.data_dir.display()
        )
    })?;
    let mut dashboard = Dashboard::open(config)?;

    match cli.command {
        Commands::Seed { keep, .. } => seed(&mut dashboard, keep)?,
        Commands::Refresh { view } => {
            let views: Vec<View> = match view {
                RefreshTarget::Buckets => vec![View::Buckets],
                RefreshTarget::Summary => vec![View::Summary],
                RefreshTarget::Recent => vec![View::Recent],
                RefreshTarget::All => View::ALL.to_vec(),
            };
            for view in views {
                let start = Instant::now();
                let report = dashboard.refresh(view)?;
                println!(
                    "{view:?}: matched {} of {} alerts ({} malformed), {} written, {} removed in {}",
                    report.scan.matched,
                    report.scan.scanned,
                    report.scan.malformed,
                    report.write.written(),
                    report.write.pruned,
                    alertdash::format_duration(start.elapsed())
                );
            }
        }
        Commands::Show(show) => match show {
            ShowCommands::Page => print_json(&dashboard.page()?)?,
            ShowCommands::Bucket { index } => print_json(&dashboard.load_more(index)?)?,
            ShowCommands::Count => println!("{}", dashboard.priority_bucket_count()?),
            ShowCommands::Recent => print_json(&dashboard.recent_alerts()?)?,
            ShowCommands::Summary => print_json(&dashboard.priority_summary()?)?,
        },
        Commands::Teardown { alerts } => {
            teardown_dashboard(dashboard.store_mut())?;
            if alerts {
                reset_alerts(dashboard.store_mut())?;
            }
            let store = dashboard.store();
            println!(
                "dashboard documents: {}, alerts: {}",
                store.document_count(),
                store.alert_count()
            );
        }
    }

    Ok(())
}

fn seed(dashboard: &mut Dashboard<PersistentStore>, keep: bool) -> Result<()> {
    let generator = dashboard.config().generator.clone();
    let mut rng = match generator.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    if !keep {
        reset_alerts(dashboard.store_mut())?;
    }
    let start = Instant::now();
    let report = seed_alerts(dashboard.store_mut(), &generator, &mut rng, &SystemClock)?;
    let secs = start.elapsed().as_secs_f64().max(1e-9);
    println!(
        "seeded {} alerts in {} batches ({:.2}s, {:.0} alerts/s)",
        report.inserted,
        report.batches,
        secs,
        report.inserted as f64 / secs
    );
    Ok(())
}
