//! # Utility Modules
//!
//! Supporting utilities shared by the pipeline components.
//!
//! ## Components
//! - **Compression**: LZ4 and Zstd with bounded decompression and an entropy check
//! - **Logging**: `tracing-subscriber` initialisation from [`LoggingConfig`](crate::config::LoggingConfig)
//! - **Metrics**: Thread-safe pipeline counters

pub mod compression;
pub mod logging;
pub mod metrics;

pub use compression::CompressionKind;
pub use metrics::{global_metrics, Metrics, MetricsSnapshot};
