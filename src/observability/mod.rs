// Logging and metrics configuration
pub mod config;

// Structured logging
pub mod logging;

// Prometheus metrics
pub mod metrics;

pub use config::{LogConfig, LogFormat, LogOutput, MetricsConfig, ObservabilityConfig};
pub use logging::{init_logging, CorrelationId};
pub use metrics::{install_recorder, MetricsHandle};
