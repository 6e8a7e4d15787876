mod api_client;
mod auth;
mod config;
mod dates;
mod error;
mod event;
mod report;
mod runner;
mod schema;
mod transform;
mod warehouse;

use api_client::ApiClient;
use chrono::Utc;
use clap::{Parser, Subcommand};
use config::Config;
use error::Error;
use event::{JobResponse, ReportWindow};
use log::{error, info};
use runner::CampaignPerformanceJob;
use std::io::Read;
use std::path::{Path, PathBuf};
use warehouse::{ParquetWarehouse, TableSpec};

#[derive(Parser)]
struct Args {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull the report for explicit dates, or the trailing 30 days if either is missing
    Run {
        #[arg(long, help = "Date should be in the form YYYY-MM-DD")]
        start: Option<String>,

        #[arg(long, help = "Date should be in the form YYYY-MM-DD")]
        end: Option<String>,
    },
    /// Handle a push envelope `{"message": {"data": "<base64 json>"}}`
    HandleEvent {
        #[arg(help = "File holding the envelope, stdin if omitted")]
        path: Option<PathBuf>,
    },
}

fn read_window(command: Command) -> Result<ReportWindow, Error> {
    match command {
        Command::Run { start, end } => Ok(ReportWindow { start, end }),
        Command::HandleEvent { path } => {
            let body = match path {
                Some(path) => std::fs::read(path)?,
                None => {
                    let mut body = Vec::new();
                    std::io::stdin().read_to_end(&mut body)?;
                    body
                }
            };
            event::decode_trigger(&body)
        }
    }
}

async fn run(args: Args) -> Result<JobResponse, Error> {
    let started_at = Utc::now();
    let config = args.config;

    let window = read_window(args.command)?;
    info!("Starting run for window {:?}", window);

    let schema = schema::load_table_schema(Path::new(&config.schema_dir), report::REPORT_NAME)?;
    let table = TableSpec::new(&config.dataset, report::REPORT_NAME, schema);

    let api_client = ApiClient::new(&config)?;
    let warehouse = ParquetWarehouse::open(&config.warehouse_dir)?;

    let job = CampaignPerformanceJob {
        api: &api_client,
        warehouse: &warehouse,
        account_id: &config.account_id,
        table: &table,
    };

    let summary = job.run(&window, started_at).await?;

    Ok(JobResponse::new(summary))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::init();

    match run(args).await {
        Ok(response) => {
            println!("{}", serde_json::to_string(&response)?);
        }
        Err(err) => {
            error!("failed to run {} pipeline: {}", event::PIPELINE, err);
            std::process::exit(1);
        }
    }

    Ok(())
}
