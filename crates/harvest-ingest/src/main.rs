//! Harvest Ingest - on-demand collection runs

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use harvest_common::logging::{init_logging, LogConfig, LogLevel};
use harvest_common::types::{format_partition_date, parse_partition_date, today, PartitionKey};
use harvest_ingest::config::IngestConfig;
use harvest_ingest::db::{create_pool, run_migrations};
use harvest_ingest::ingest::framework::types::CollectionOutcome;
use harvest_ingest::ingest::{builtin_registry, CollectionPipeline, RunContext};
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "harvest-ingest")]
#[command(author, version, about = "Date-partitioned data collection")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect one source
    Run {
        /// Source name (see `sources`)
        source: String,

        /// Partition date, YYYYMMDD (default: today)
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },

    /// Collect every registered source
    RunAll {
        /// Partition date, YYYYMMDD (default: today)
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },

    /// List registered sources
    Sources,

    /// Show ledger rows for a partition date
    Ledger {
        /// Partition date, YYYYMMDD (default: today)
        #[arg(short, long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },

    /// Print the stored records of one partition
    Show {
        source: String,

        /// Partition date, YYYYMMDD
        #[arg(short, long, value_parser = parse_date)]
        date: NaiveDate,
    },
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    parse_partition_date(value).map_err(|e| e.to_string())
}

fn context_for(date: Option<NaiveDate>) -> RunContext {
    match date {
        Some(date) => RunContext::for_date(date),
        None => RunContext::now(),
    }
}

fn print_outcomes(outcomes: &[(String, CollectionOutcome)], json: bool) -> Result<()> {
    if json {
        let rows: Vec<serde_json::Value> = outcomes
            .iter()
            .map(|(source, outcome)| {
                serde_json::json!({ "source": source, "outcome": outcome })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for (source, outcome) in outcomes {
            println!(
                "{:<18} {:<8} {:>6}  {}",
                source, outcome.status, outcome.count, outcome.message
            );
        }
    }
    Ok(())
}

async fn execute(cli: Cli) -> Result<bool> {
    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    let registry = builtin_registry(&config).context("Failed to build source catalogue")?;

    if let Command::Sources = cli.command {
        for source in registry.iter() {
            println!("{:<18} {} ({} feed(s))", source.name, source.description, source.feeds.len());
        }
        return Ok(true);
    }

    let pool = create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool).await.context("Failed to run migrations")?;

    let pipeline = CollectionPipeline::new(pool, registry, config.pipeline_settings());

    match cli.command {
        Command::Run { source, date } => {
            let ctx = context_for(date);
            let outcome = pipeline.run_with_context(&source, &ctx).await;
            let ok = outcome.is_success();
            print_outcomes(&[(source, outcome)], cli.json)?;
            Ok(ok)
        },
        Command::RunAll { date } => {
            let ctx = context_for(date);
            let outcomes = pipeline.run_all(&ctx).await;
            let ok = outcomes.iter().all(|(_, o)| o.is_success());
            print_outcomes(&outcomes, cli.json)?;
            Ok(ok)
        },
        Command::Ledger { date } => {
            let date = format_partition_date(date.unwrap_or_else(today));
            let entries = pipeline
                .ledger()
                .list_for_date(&date)
                .await
                .context("Failed to read ledger")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for entry in &entries {
                    println!(
                        "{} {:<18} {:<8} {:>6} {}  {}",
                        entry.partition_date,
                        entry.source_name,
                        entry.status,
                        entry.record_count,
                        entry.ingested_at,
                        entry.message
                    );
                }
            }
            Ok(true)
        },
        Command::Show { source, date } => {
            let key = PartitionKey::for_date(source, date)?;
            let records = pipeline
                .store()
                .load_partition(&key)
                .await
                .with_context(|| format!("Failed to load partition {}", key))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for record in &records {
                    let fields: Vec<String> = record
                        .fields()
                        .iter()
                        .map(|(column, value)| format!("{}={}", column, value))
                        .collect();
                    println!("{}", fields.join(" "));
                }
                info!(partition = %key, rows = records.len(), "Partition loaded");
            }
            Ok(true)
        },
        Command::Sources => Ok(true),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    // Environment variables take precedence
    let log_config = match LogConfig::builder()
        .level(log_level)
        .log_file_prefix("harvest-ingest")
        .build()
        .merge_env()
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid logging configuration: {:#}", e);
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        },
    }
}
