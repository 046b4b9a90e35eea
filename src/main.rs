use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod error;
mod features;
mod history;
mod models;
mod report;
mod risk;

use config::RiskConfig;
use error::EngineError;
use report::AlertGranularity;

#[derive(Parser)]
#[command(name = "clinic-risk-report")]
#[command(about = "Attendance reports and risk classification for a psychology practice", long_about = None)]
struct Cli {
    #[command(flatten)]
    scoring: ScoringArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ScoringArgs {
    /// JSON file with risk thresholds and weights
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Evaluation date (defaults to today)
    #[arg(long, global = true)]
    as_of: Option<NaiveDate>,
    #[arg(long, global = true)]
    low_threshold: Option<f64>,
    #[arg(long, global = true)]
    high_threshold: Option<f64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo psychologists, patients and appointments
    Seed,
    /// Import appointment history from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Build the attendance report and risk alerts for a psychologist
    Report {
        #[arg(long)]
        psychologist: i64,
        /// Authenticated psychologist (defaults to --psychologist)
        #[arg(long)]
        caller: Option<i64>,
        /// Include low-risk patients in the alerts
        #[arg(long)]
        all_levels: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Risk analysis for one patient, or for every patient of a psychologist
    Risk {
        #[arg(long)]
        psychologist: i64,
        #[arg(long)]
        patient: Option<i64>,
    },
}

fn emit(output: String, out: Option<&PathBuf>) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, output)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report written to {}.", path.display());
        }
        None => println!("{output}"),
    }
    Ok(())
}

fn engine_failure(err: EngineError) -> anyhow::Error {
    tracing::warn!(kind = err.kind(), status = err.status_code(), "request failed");
    match serde_json::to_string(&err.body()) {
        Ok(body) => anyhow::anyhow!(body),
        Err(_) => anyhow::Error::new(err),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the clinic Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let today = risk::evaluation_date(cli.scoring.as_of);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool, today).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} appointments from {}.", csv.display());
        }
        Commands::Report {
            psychologist,
            caller,
            all_levels,
            format,
            out,
        } => {
            let config = load_config(&cli.scoring)?;
            let reader = db::PgHistory::new(pool);
            let granularity = if all_levels {
                AlertGranularity::All
            } else {
                AlertGranularity::Elevated
            };
            let report = report::build_report(
                &reader,
                caller.unwrap_or(psychologist),
                psychologist,
                today,
                &config,
                granularity,
            )
            .await
            .map_err(engine_failure)?;

            let output = match format {
                OutputFormat::Json => serde_json::to_string_pretty(&report)?,
                OutputFormat::Markdown => report::render_markdown(psychologist, today, &report),
            };
            emit(output, out.as_ref())?;
        }
        Commands::Risk {
            psychologist,
            patient,
        } => {
            let config = load_config(&cli.scoring)?;
            let reader = db::PgHistory::new(pool);
            let output = match patient {
                Some(patient_id) => {
                    let assessment =
                        risk::assess_patient(&reader, psychologist, patient_id, today, &config)
                            .await
                            .map_err(engine_failure)?;
                    serde_json::to_string_pretty(&assessment)?
                }
                None => {
                    let overview =
                        report::risk_overview(&reader, psychologist, psychologist, today, &config)
                            .await
                            .map_err(engine_failure)?;
                    serde_json::to_string_pretty(&overview)?
                }
            };
            emit(output, None)?;
        }
    }

    Ok(())
}

fn load_config(args: &ScoringArgs) -> anyhow::Result<RiskConfig> {
    RiskConfig::load(args.config.as_deref(), args.low_threshold, args.high_threshold)
}
