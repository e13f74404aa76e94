//! farescout CLI - find the cheapest flights for a route and date.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use farescout::{
    ChromeLauncher, FareSearch, Report, SearchOptions, SearchRequest, SessionConfig, SiteProfile,
    TripType,
};

/// farescout - browser-driven flight fare search
#[derive(Parser)]
#[command(name = "farescout")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search fares and print a JSON report
    Search(SearchArgs),

    /// Print the built-in site profile as JSON
    Profile,
}

#[derive(Parser)]
struct SearchArgs {
    /// Origin airport code (e.g. JFK)
    #[arg(long = "from")]
    origin: String,

    /// Destination airport code (e.g. LAX)
    #[arg(long = "to")]
    destination: String,

    /// Departure date, YYYY-MM-DD or MM/DD
    #[arg(long)]
    depart: String,

    /// Return date for a round trip, YYYY-MM-DD or MM/DD
    #[arg(long = "return")]
    return_date: Option<String>,

    /// Number of cheapest options to report
    #[arg(short = 'n', long, default_value = "1")]
    candidates: usize,

    /// Site profile JSON file (see `farescout profile`)
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Overall search timeout in seconds
    #[arg(short, long, default_value = "120")]
    timeout: u64,

    /// Include every extracted option in the report
    #[arg(long)]
    include_all: bool,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Path to the Chrome/Chromium executable
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// Proxy URL (e.g., http://127.0.0.1:8080 or socks5://127.0.0.1:1080)
    #[arg(short, long)]
    proxy: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "json")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Pretty-printed JSON report
    Json,
    /// One tab-separated line per selected option
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only the report.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Search(args) => run_search(args).await,
        Commands::Profile => {
            println!("{}", SiteProfile::kayak().to_json_pretty()?);
            Ok(())
        }
    }
}

async fn run_search(args: SearchArgs) -> Result<()> {
    let trip_type = if args.return_date.is_some() {
        TripType::RoundTrip
    } else {
        TripType::OneWay
    };
    let today = chrono::Local::now().date_naive();
    let request = SearchRequest::from_inputs(
        &args.origin,
        &args.destination,
        trip_type,
        &args.depart,
        args.return_date.as_deref(),
        today,
    )?;

    let profile = match &args.profile {
        Some(path) => SiteProfile::from_path(path)
            .with_context(|| format!("loading site profile {}", path.display()))?,
        None => SiteProfile::kayak(),
    };

    let launcher = ChromeLauncher::new(SessionConfig {
        headless: !args.headed,
        chrome_path: args.chrome.clone(),
        proxy_url: args.proxy.clone(),
        ..Default::default()
    });
    let engine = FareSearch::new(profile, Arc::new(launcher))?;

    let options = SearchOptions::default()
        .with_candidates(args.candidates)
        .with_full_set(args.include_all)
        .with_overall_timeout(Duration::from_secs(args.timeout));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, closing browser...");
            on_interrupt.cancel();
        }
    });

    let report = engine.search(&request, &options, &cancel).await?;
    print_report(&report, args.format)
}

fn print_report(report: &Report, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Compact => {
            for option in &report.options {
                let times = match (option.departure_time, option.arrival_time) {
                    (Some(dep), Some(arr)) => {
                        format!("{}-{}", dep.format("%H:%M"), arr.format("%H:%M"))
                    }
                    _ => "-".to_string(),
                };
                let stops = option
                    .layovers
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "{}\t{}\t{}\t{} stops\t{}",
                    option.price,
                    option.airlines.join(", "),
                    times,
                    stops,
                    option.id
                );
            }
        }
    }
    Ok(())
}
