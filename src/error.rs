use std::path::PathBuf;

use thiserror::Error;

pub type OsResult<T> = Result<T, OsError>;

#[derive(Debug, Error)]
pub enum OsError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stats schema mismatch: expected major {expected}, got `{found}`")]
    SchemaMismatch { expected: String, found: String },

    #[error("corrupt stats record: {0}")]
    Corrupt(String),

    #[error("unknown target `{0}` (expected one of Host, X86, ARM, OpenCL, Metal)")]
    UnknownTarget(String),

    #[error(
        "unknown category `{0}` (expected one of all_test_ops, success_ops, out_diff_ops, not_supported_ops)"
    )]
    UnknownCategory(String),

    #[error("stats lock at `{path}` held by pid {pid} since {since}")]
    LockHeld {
        path: PathBuf,
        pid: u32,
        since: String,
    },

    #[error("stale snapshot: loaded revision {loaded}, on-disk revision {on_disk}")]
    StaleSnapshot { loaded: u64, on_disk: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl OsError {
    /// Stable, unique, machine-readable error code for every variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "OS-IO",
            Self::Json(_) => "OS-JSON",
            Self::SchemaMismatch { .. } => "OS-SCHEMA-MISMATCH",
            Self::Corrupt(_) => "OS-CORRUPT",
            Self::UnknownTarget(_) => "OS-UNKNOWN-TARGET",
            Self::UnknownCategory(_) => "OS-UNKNOWN-CATEGORY",
            Self::LockHeld { .. } => "OS-LOCK-HELD",
            Self::StaleSnapshot { .. } => "OS-STALE-SNAPSHOT",
            Self::InvalidRequest(_) => "OS-INVALID-REQUEST",
        }
    }

    /// True when the error means the backing stats file does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io(error) if error.kind() == std::io::ErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::OsError;

    fn all_variants() -> Vec<OsError> {
        vec![
            OsError::Io(std::io::Error::other("test")),
            OsError::Json(serde_json::from_str::<serde_json::Value>("{").unwrap_err()),
            OsError::SchemaMismatch {
                expected: "1".to_owned(),
                found: "2.0".to_owned(),
            },
            OsError::Corrupt("x".to_owned()),
            OsError::UnknownTarget("x".to_owned()),
            OsError::UnknownCategory("x".to_owned()),
            OsError::LockHeld {
                path: std::path::PathBuf::from("x.lock"),
                pid: 1,
                since: "now".to_owned(),
            },
            OsError::StaleSnapshot {
                loaded: 1,
                on_disk: 2,
            },
            OsError::InvalidRequest("x".to_owned()),
        ]
    }

    #[test]
    fn error_codes_are_unique_and_prefixed() {
        let errors = all_variants();
        assert_eq!(errors.len(), 9, "test should cover every OsError variant");

        let mut seen = std::collections::HashSet::new();
        for error in &errors {
            let code = error.error_code();
            assert!(code.starts_with("OS-"), "bad prefix: `{code}`");
            let suffix = &code[3..];
            assert!(
                !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_uppercase() || c == '-'),
                "code suffix must match [A-Z-]+ but got `{suffix}`"
            );
            assert!(seen.insert(code), "duplicate error_code detected: `{code}`");
        }
    }

    #[test]
    fn display_messages_for_all_variants() {
        let expected = [
            "i/o failure",
            "json failure",
            "schema mismatch",
            "corrupt stats record",
            "unknown target",
            "unknown category",
            "held by pid",
            "stale snapshot",
            "invalid request",
        ];
        for (error, needle) in all_variants().into_iter().zip(expected) {
            let text = error.to_string();
            assert!(text.contains(needle), "expected `{needle}` in: {text}");
        }
    }

    #[test]
    fn not_found_io_error_is_detected() {
        let err: OsError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(err.is_not_found());
        assert!(!OsError::InvalidRequest("x".to_owned()).is_not_found());
        assert!(!OsError::Io(std::io::Error::other("disk")).is_not_found());
    }

    #[test]
    fn stale_snapshot_displays_revisions() {
        let err = OsError::StaleSnapshot {
            loaded: 3,
            on_disk: 5,
        };
        let text = err.to_string();
        assert!(text.contains("revision 3"), "got: {text}");
        assert!(text.contains("revision 5"), "got: {text}");
    }

    #[test]
    fn os_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<OsError>();
        assert_sync::<OsError>();
    }
}
