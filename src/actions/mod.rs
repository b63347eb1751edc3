//! Side effects performed for each accepted button press.
//!
//! A press is recorded to the time-series store and acknowledged on the
//! indicator LED, in that order.

pub mod indicator;
pub mod pipeline;
pub mod store;

// Re-export commonly used items
pub use indicator::Indicator;
pub use pipeline::ActionPipeline;
pub use store::{InfluxClient, MeasurementPoint, TimeSeriesStore};
