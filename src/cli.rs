use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "stock-compare")]
#[command(about = "Compare historical daily prices of up to three equities")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON config file; without it POLYGON_* environment variables are used
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Search tradable instruments by ticker or company name
    Search {
        query: String,

        /// Provider instrument type, e.g. CS or ETF
        #[arg(short = 't', long = "type")]
        ticker_type: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: u32,

        /// Follow pagination until this many pages have been read
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },

    /// Print daily bars for a single ticker
    History {
        ticker: String,

        #[command(flatten)]
        range: DateRangeArgs,
    },

    /// Compare closing prices of up to three tickers, rebased to the first day
    Compare {
        #[arg(required = true, num_args = 1..=3)]
        tickers: Vec<String>,

        #[command(flatten)]
        range: DateRangeArgs,

        /// Write the comparison table to this CSV file instead of stdout
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[derive(clap::Args, Clone, Copy)]
pub struct DateRangeArgs {
    /// First day (YYYY-MM-DD); defaults to one year before --to
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Last day (YYYY-MM-DD); defaults to today
    #[arg(long)]
    pub to: Option<NaiveDate>,
}

impl DateRangeArgs {
    pub fn resolve(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let to = self.to.unwrap_or(today);
        let from = self
            .from
            .unwrap_or_else(|| to - chrono::Duration::days(365));
        (from, to)
    }
}
