pub mod config;
pub mod error;
pub mod timefmt;
pub mod types;

pub use config::{
    Config, EnrichmentConfig, EnrichmentProvider, FileConfig, Secrets, SourceConfig, StorageConfig,
};
pub use error::{ConfigError, StoreError, StoreResult};
pub use types::*;
