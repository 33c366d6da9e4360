mod cli;

use std::fs::File;
use std::future::Future;
use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use log::warn;

use cli::{Cli, Commands};
use stock_compare::app::ComparisonSelection;
use stock_compare::config::Config;
use stock_compare::fetch::TickerQuery;
use stock_compare::services::HistoryService;
use stock_compare::{Dispatcher, MarketDataClient};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::from_env().context("Failed to read configuration from environment")?,
    };

    let dispatcher = Dispatcher::new(config.rate_limit)?;
    let client = MarketDataClient::new(config.provider.clone(), dispatcher.clone())
        .context("Set POLYGON_API_KEY or provide api_key in the config file")?;
    let service = HistoryService::new(client);
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Search {
            query,
            ticker_type,
            limit,
            pages,
        } => {
            let mut request = TickerQuery::search(query).with_limit(limit);
            if let Some(kind) = ticker_type {
                request = request.with_type(kind);
            }
            search(&service, &dispatcher, &request, pages.max(1)).await?;
        }
        Commands::History { ticker, range } => {
            let (from, to) = range.resolve(today);
            let history =
                with_queue_feedback(&dispatcher, service.daily_bars(&ticker, from, to)).await?;

            if history.delayed {
                println!("(delayed data)");
            }
            if history.is_empty() {
                println!("No data for {} between {} and {}", history.ticker, from, to);
            }
            for bar in &history.bars {
                println!(
                    "{}  O {:>10.2}  H {:>10.2}  L {:>10.2}  C {:>10.2}  V {:>14.0}",
                    bar.date, bar.open, bar.high, bar.low, bar.close, bar.volume
                );
            }
        }
        Commands::Compare {
            tickers,
            range,
            csv,
        } => {
            let (from, to) = range.resolve(today);
            let selection = ComparisonSelection::new(&tickers, from, to)?;
            let comparison = with_queue_feedback(&dispatcher, service.compare(&selection)).await?;

            for series in &comparison.series {
                match series.total_return_pct() {
                    Some(change) => eprintln!(
                        "{:<8} {:>+8.2}% over {} trading days{}",
                        series.ticker,
                        change,
                        series.points.len(),
                        if series.delayed { " (delayed)" } else { "" }
                    ),
                    None => eprintln!("{:<8} no data in range", series.ticker),
                }
            }

            match csv {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    comparison.write_csv(file)?;
                    println!("Saved comparison to {}", path.display());
                }
                None => comparison.write_csv(io::stdout())?,
            }
        }
    }

    Ok(())
}

async fn search(
    service: &HistoryService,
    dispatcher: &Dispatcher,
    query: &TickerQuery,
    pages: u32,
) -> Result<()> {
    let mut page = with_queue_feedback(dispatcher, service.search_tickers(query)).await?;
    let mut read = 1;

    loop {
        for info in &page.tickers {
            println!(
                "{:<10} {:<45} {:<6} {:<5}",
                info.ticker,
                info.name,
                info.primary_exchange.as_deref().unwrap_or("-"),
                info.kind.as_deref().unwrap_or("-")
            );
        }

        let Some(next_url) = page.next_url.as_deref().filter(|_| read < pages) else {
            break;
        };
        page = with_queue_feedback(dispatcher, service.next_ticker_page(next_url)).await?;
        read += 1;
    }

    Ok(())
}

/// Drive `work` to completion, reporting quota waits.
///
/// The first Ctrl-C clears the queue and lets in-flight work settle; a second one exits.
async fn with_queue_feedback<F: Future>(dispatcher: &Dispatcher, work: F) -> F::Output {
    tokio::pin!(work);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut cancelled = false;

    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = ticker.tick() => {
                let status = dispatcher.status();
                if status.queue_length > 0 && !status.can_dispatch_now {
                    eprintln!(
                        "{} request(s) waiting for quota ({}/{} used); next slot in {}s",
                        status.queue_length,
                        status.requests_in_window,
                        status.max_requests,
                        status.wait_time().as_secs() + 1
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if cancelled {
                    std::process::exit(130);
                }
                cancelled = true;
                let cleared = dispatcher.clear();
                warn!("cancelled; dropped {cleared} queued request(s), press Ctrl-C again to quit");
            }
        }
    }
}
