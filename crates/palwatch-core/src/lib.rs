//! palwatch-core: shared types for the palwatch monitoring workers.
//!
//! Holds the `palwatch.toml` configuration model, the remote error taxonomy,
//! the REST API payload types, and the capability traits (`HealthApi`,
//! `RemoteFs`, `RemoteConnector`) that the monitor crate is written against.

pub mod config;
pub mod error;
pub mod remote;
pub mod types;

pub use config::{
    parse_duration, CacheConfig, ChatConfig, PalwatchConfig, SaveConfig, Secret, ServerTarget,
    SftpConfig, StatusConfig, UnreachablePolicy,
};
pub use error::{ConfigError, ConfigResult, RemoteError, RemoteResult};
pub use remote::{BoxFuture, HealthApi, RemoteConnector, RemoteFs};
pub use types::*;
