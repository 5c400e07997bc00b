//! Domain types for the price-forecast pipeline

pub mod quantity;
pub mod series;

pub use quantity::{Quantity, Resolution, Source};
pub use series::{floor_to_hour, SourceSeries, TimePoint};
