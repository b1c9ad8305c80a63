pub mod config;

pub use config::{ApiConfig, BackendKind, Config, IndicatorConfig, LoggingConfig, PollConfig};
