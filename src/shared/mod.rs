pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;

pub use config::{AppConfig, SyncConfig};
pub use error::{AppError, Result};
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};
