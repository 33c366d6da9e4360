use std::collections::BTreeSet;
use std::io::Write;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::fetch::request::normalize_ticker;
use crate::fetch::PriceHistory;

/// Most instruments shown side by side.
pub const MAX_TICKERS: usize = 3;

/// Validated set of tickers and the inclusive date range to compare them over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonSelection {
    tickers: Vec<String>,
    from: NaiveDate,
    to: NaiveDate,
}

impl ComparisonSelection {
    pub fn new<I, S>(tickers: I, from: NaiveDate, to: NaiveDate) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut selected: Vec<String> = Vec::new();
        for ticker in tickers {
            let ticker = normalize_ticker(ticker.as_ref())?;
            if !selected.contains(&ticker) {
                selected.push(ticker);
            }
        }

        if selected.is_empty() {
            return Err(AppError::message("Select at least one ticker to compare"));
        }
        if selected.len() > MAX_TICKERS {
            return Err(AppError::message(format!(
                "At most {MAX_TICKERS} tickers can be compared, got {}",
                selected.len()
            )));
        }
        if from > to {
            return Err(AppError::message(format!(
                "Start date {from} is after end date {to}"
            )));
        }

        Ok(Self {
            tickers: selected,
            from,
            to,
        })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn from(&self) -> NaiveDate {
        self.from
    }

    pub fn to(&self) -> NaiveDate {
        self.to
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonPoint {
    pub date: NaiveDate,
    pub close: f64,
    /// Percent change of `close` against the first close in range.
    pub change_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonSeries {
    pub ticker: String,
    pub delayed: bool,
    pub points: Vec<ComparisonPoint>,
}

impl ComparisonSeries {
    pub fn from_history(history: &PriceHistory) -> Self {
        let base = history.first_close().filter(|close| *close > 0.0);
        let points = history
            .bars
            .iter()
            .map(|bar| ComparisonPoint {
                date: bar.date,
                close: bar.close,
                change_pct: match base {
                    Some(base) => (bar.close / base - 1.0) * 100.0,
                    None => 0.0,
                },
            })
            .collect();

        Self {
            ticker: history.ticker.clone(),
            delayed: history.delayed,
            points,
        }
    }

    pub fn total_return_pct(&self) -> Option<f64> {
        self.points.last().map(|point| point.change_pct)
    }

    fn point_on(&self, date: NaiveDate) -> Option<&ComparisonPoint> {
        self.points
            .binary_search_by(|point| point.date.cmp(&date))
            .ok()
            .map(|idx| &self.points[idx])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub series: Vec<ComparisonSeries>,
}

impl Comparison {
    pub fn build(selection: &ComparisonSelection, histories: &[PriceHistory]) -> Self {
        Self {
            from: selection.from(),
            to: selection.to(),
            series: histories.iter().map(ComparisonSeries::from_history).collect(),
        }
    }

    /// Every trading date present in at least one series, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.series
            .iter()
            .flat_map(|series| series.points.iter().map(|point| point.date))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn any_delayed(&self) -> bool {
        self.series.iter().any(|series| series.delayed)
    }

    /// Write one row per date with close and percent change columns for each ticker.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);

        let mut header = vec!["date".to_string()];
        for series in &self.series {
            header.push(format!("{}_close", series.ticker));
            header.push(format!("{}_change_pct", series.ticker));
        }
        csv.write_record(&header)?;

        for date in self.dates() {
            let mut row = vec![date.format("%Y-%m-%d").to_string()];
            for series in &self.series {
                match series.point_on(date) {
                    Some(point) => {
                        row.push(format!("{:.4}", point.close));
                        row.push(format!("{:.2}", point.change_pct));
                    }
                    None => {
                        row.push(String::new());
                        row.push(String::new());
                    }
                }
            }
            csv.write_record(&row)?;
        }

        csv.flush()?;
        Ok(())
    }
}
