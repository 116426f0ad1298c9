mod aligner;
mod config;
mod error;
mod features;
mod forecast;
mod loader;
mod models;
mod pipeline;
mod providers;
mod report;
mod server;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "stock-report", about = "Stock forecast & analysis report generator", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Start the web front end
    Serve {
        /// Address to bind (default from config: server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Generate one report and print where it was written
    Report {
        /// Ticker symbol, e.g. AAPL, BRK-A, ^GSPC
        ticker: String,

        /// Forecast horizon: 30, 15d, 2w, 3m, 1y
        #[arg(short = 'H', long)]
        horizon: Option<String>,
    },

    /// Show cache statistics
    Stats,

    /// Apply cache schema migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "stock_forecast_report=info,warn",
        1 => "stock_forecast_report=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let pipeline = Arc::new(Pipeline::from_config(&config)?);
            server::serve(pipeline, &bind).await?;
        }

        Command::Report { ticker, horizon } => {
            let pipeline = Pipeline::from_config(&config)?;
            match pipeline.run(&ticker, horizon.as_deref()).await {
                Ok(artifact) => {
                    println!("Report  : {}", artifact.path.display());
                    if let Some(csv) = &artifact.csv_path {
                        println!("Data    : {}", csv.display());
                    }
                    println!("Outlook : {}", artifact.outlook.label());
                }
                Err(e) => {
                    tracing::debug!("{:?}", e);
                    anyhow::bail!("{} ({})", e.user_message(), e.kind());
                }
            }
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)
                .with_context(|| format!("Failed to open {:?}", config.storage.db_path))?;
            let stats = repo.stats()?;
            let date = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or("—".into());
            println!("─────────────────────────────────");
            println!("  Stock Report — Cache Stats");
            println!("─────────────────────────────────");
            println!("  Tickers      : {}", stats.tickers);
            println!("  Price bars   : {}", stats.price_bars);
            println!("  Macro series : {}", stats.macro_series);
            println!("  Macro obs    : {}", stats.macro_observations);
            println!("  From         : {}", date(stats.first_date));
            println!("  To           : {}", date(stats.last_date));
            println!(
                "  Last fetch   : {}",
                stats.last_fetch.map(|t| t.to_string()).unwrap_or("—".into())
            );
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            if let Some(parent) = config.storage.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
