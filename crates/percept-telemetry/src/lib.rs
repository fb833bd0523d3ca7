pub mod log_feed;
pub mod pipeline_metrics;
pub mod synthetic;

pub use log_feed::*;
pub use pipeline_metrics::*;
pub use synthetic::*;
