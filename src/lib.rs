#![forbid(unsafe_code)]

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod scan;
pub mod stats;

pub use broadcast::is_broadcastable;
pub use config::{StatsConfig, WriteMode};
pub use error::{OsError, OsResult};
pub use model::{Category, Target};
pub use stats::{StatsRecord, StatsStore, StatsSummary};
