pub mod comparison;

pub use comparison::{
    Comparison, ComparisonPoint, ComparisonSelection, ComparisonSeries, MAX_TICKERS,
};
