pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{DeployConfig, StorageConfig, StorageType};
pub use core::{SyncConfig, SyncEngine, SyncReport};
pub use error::{ConfigError, ManifestError, SyncError, SyncPhase};
