pub mod config;

pub use config::{ConfigError, IngestConfig, SelectorMode, SourceColor};
