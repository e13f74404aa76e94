//! Find the cheapest one-way fares on Kayak with a local Chrome.
//!
//! ```sh
//! cargo run --example cheapest_one_way -- JFK LAX 2026-12-15
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use farescout::{ChromeLauncher, FareSearch, SearchOptions, SearchRequest, SiteProfile, TripType};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [origin, destination, departure] = args.as_slice() else {
        bail!("usage: cheapest_one_way <ORIGIN> <DESTINATION> <YYYY-MM-DD|MM/DD>");
    };

    let request = SearchRequest::from_inputs(
        origin,
        destination,
        TripType::OneWay,
        departure,
        None,
        Local::now().date_naive(),
    )?;

    let engine = FareSearch::new(SiteProfile::kayak(), Arc::new(ChromeLauncher::default()))?;
    let options = SearchOptions::default()
        .with_candidates(3)
        .with_overall_timeout(Duration::from_secs(90));

    let report = engine
        .search(&request, &options, &CancellationToken::new())
        .await?;

    println!(
        "{} -> {} on {}: {} of {} options",
        request.origin(),
        request.destination(),
        request.departure(),
        report.options.len(),
        report.available
    );
    for (rank, option) in report.options.iter().enumerate() {
        let duration = option
            .duration_minutes
            .map(|m| format!("{}h {:02}m", m / 60, m % 60))
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{}. {}  {}  {}",
            rank + 1,
            option.price,
            option.airlines.join(", "),
            duration
        );
    }
    if report.partial {
        println!("(some result records could not be read)");
    }
    Ok(())
}
