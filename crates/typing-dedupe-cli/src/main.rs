//! typing-dedupe CLI - Plan the table lifecycle of a sync against a warehouse snapshot.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use typing_dedupe::catalog::{CatalogParser, ConfiguredCatalog};
use typing_dedupe::drivers::snapshot::SnapshotStreamState;
use typing_dedupe::drivers::{PostgresSqlGenerator, SnapshotDestinationHandler, WarehouseSnapshot};
use typing_dedupe::{Config, ParsedCatalog, TypingDedupingError, TyperDeduper};

#[derive(Parser)]
#[command(name = "typing-dedupe")]
#[command(about = "Plan typing and deduping of raw tables into final tables")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the stream ids and columns derived from a configured catalog
    Catalog {
        /// Path to the configured catalog (JSON)
        #[arg(long)]
        catalog: PathBuf,

        /// Output JSON result to stdout
        #[arg(long)]
        output_json: bool,
    },

    /// Print the SQL one sync would run against a warehouse snapshot
    Plan {
        /// Path to the configured catalog (JSON)
        #[arg(long)]
        catalog: PathBuf,

        /// Path to a warehouse snapshot (YAML, or JSON for .json files).
        /// An empty warehouse is assumed when omitted.
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Guard every cast so bad values become NULL instead of failing
        #[arg(long)]
        safer_casting: bool,

        /// Output JSON result to stdout
        #[arg(long)]
        output_json: bool,
    },
}

#[derive(Serialize)]
struct StreamSummary {
    namespace: String,
    name: String,
    sync_mode: String,
    final_table: String,
    raw_table: String,
    primary_key: Vec<String>,
    cursor: Option<String>,
    columns: Vec<ColumnSummary>,
}

#[derive(Serialize)]
struct ColumnSummary {
    name: String,
    original_name: String,
    #[serde(rename = "type")]
    column_type: String,
}

#[derive(Serialize)]
struct PlanOutput {
    statements: Vec<String>,
    states: Vec<SnapshotStreamState>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), TypingDedupingError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(TypingDedupingError::Config)?;

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let generator = PostgresSqlGenerator::new();

    match cli.command {
        Commands::Catalog {
            catalog,
            output_json,
        } => {
            let parsed = parse_catalog(&catalog, &generator, &config)?;
            let summaries = summarize(&parsed, &generator);

            if output_json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for stream in &summaries {
                    println!("{}.{} ({})", stream.namespace, stream.name, stream.sync_mode);
                    println!("  Final table: {}", stream.final_table);
                    println!("  Raw table:   {}", stream.raw_table);
                    if !stream.primary_key.is_empty() {
                        println!("  Primary key: {}", stream.primary_key.join(", "));
                    }
                    if let Some(cursor) = &stream.cursor {
                        println!("  Cursor:      {}", cursor);
                    }
                    for column in &stream.columns {
                        println!("    {} {}", column.name, column.column_type);
                    }
                }
            }
        }

        Commands::Plan {
            catalog,
            snapshot,
            safer_casting,
            output_json,
        } => {
            let parsed = parse_catalog(&catalog, &generator, &config)?;
            let snapshot = match &snapshot {
                Some(path) => WarehouseSnapshot::load(path)?,
                None => WarehouseSnapshot::default(),
            };

            let handler = SnapshotDestinationHandler::new(snapshot, &parsed);
            let migrator = handler.v1_v2_migrator();
            let streams: Vec<(String, String)> = parsed
                .streams()
                .iter()
                .map(|s| (s.id.original_namespace.clone(), s.id.original_name.clone()))
                .collect();

            let td = TyperDeduper::new(generator, handler, parsed, &config)
                .with_v1_v2_migrator(Box::new(migrator));

            td.prepare_schemas().await?;
            td.prepare_tables().await?;
            for (namespace, name) in &streams {
                td.type_and_dedupe(namespace, name, safer_casting).await?;
            }
            td.commit_final_tables().await?;

            let output = PlanOutput {
                statements: td.handler().executed_statements().await,
                states: td.handler().states().await,
            };
            info!("Planned {} statements", output.statements.len());

            if output_json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                for statement in &output.statements {
                    println!("{};\n", statement.trim_end());
                }
                for state in &output.states {
                    println!(
                        "-- {}.{}: needs_soft_reset = {}",
                        state.namespace, state.name, state.state.needs_soft_reset
                    );
                }
            }
        }
    }

    Ok(())
}

fn parse_catalog(
    path: &Path,
    generator: &PostgresSqlGenerator,
    config: &Config,
) -> Result<ParsedCatalog, TypingDedupingError> {
    let configured = ConfiguredCatalog::load(path)?;
    CatalogParser::new(generator, config).parse(&configured)
}

fn summarize(catalog: &ParsedCatalog, generator: &PostgresSqlGenerator) -> Vec<StreamSummary> {
    catalog
        .streams()
        .iter()
        .map(|stream| StreamSummary {
            namespace: stream.id.original_namespace.clone(),
            name: stream.id.original_name.clone(),
            sync_mode: stream.sync_mode.to_string(),
            final_table: stream.id.final_table_id("\"", ""),
            raw_table: stream.id.raw_table_id("\""),
            primary_key: stream.primary_key.iter().map(|c| c.name.clone()).collect(),
            cursor: stream.cursor.as_ref().map(|c| c.name.clone()),
            columns: stream
                .columns
                .iter()
                .map(|(column, airbyte_type)| ColumnSummary {
                    name: column.name.clone(),
                    original_name: column.original_name.clone(),
                    column_type: generator.to_dialect_type(airbyte_type).to_string(),
                })
                .collect(),
        })
        .collect()
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries only command output.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("Unknown log format '{}' (expected text or json)", other)),
    }

    Ok(())
}
