use std::path::PathBuf;

/// Default backing file, relative to the working directory of the test run.
pub const DEFAULT_STATS_PATH: &str = "./statics_data";

pub const STATS_PATH_ENV: &str = "OPSCAN_STATS_PATH";
pub const STATS_STRICT_ENV: &str = "OPSCAN_STATS_STRICT";

/// How `StatsStore` guards its read-modify-write cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// No lock, plain overwrite. Concurrent writers lose updates.
    #[default]
    Lenient,
    /// Lock file around every cycle, atomic replace, stale-snapshot check.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsConfig {
    pub path: PathBuf,
    pub mode: WriteMode,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STATS_PATH),
            mode: WriteMode::Lenient,
        }
    }
}

impl StatsConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves the config through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup(STATS_PATH_ENV)
            && !path.trim().is_empty()
        {
            config.path = PathBuf::from(path);
        }

        if lookup(STATS_STRICT_ENV).is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true")) {
            config.mode = WriteMode::Strict;
        }

        config
    }

    /// Applies command-line overrides on top of the environment.
    #[must_use]
    pub fn with_overrides(mut self, path: Option<PathBuf>, strict: bool) -> Self {
        if let Some(path) = path {
            self.path = path;
        }
        if strict {
            self.mode = WriteMode::Strict;
        }
        self
    }
}
