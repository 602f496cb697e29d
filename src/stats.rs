//! File-backed accumulator of per-backend operator outcomes.
//!
//! Every call reloads the whole record from disk, mutates it and rewrites
//! the whole file; nothing is cached between calls. In
//! [`WriteMode::Lenient`] two writers that load before either stores lose
//! the first writer's update. [`WriteMode::Strict`] serializes the cycle
//! through a lock file and rejects stale snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::{StatsConfig, WriteMode};
use crate::error::{OsError, OsResult};
use crate::model::{Category, Target};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const SCHEMA_VERSION: &str = "1.0";
const LOCK_STALE_SECONDS: i64 = 300;
const LOCK_ACQUIRE_ATTEMPTS: usize = 400;
const LOCK_BASE_BACKOFF_MS: u64 = 1;
const LOCK_MAX_BACKOFF_MS: u64 = 25;

static NO_OPS: BTreeSet<String> = BTreeSet::new();

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

pub type TargetSets = BTreeMap<Target, BTreeSet<String>>;

/// The persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRecord {
    pub schema_version: String,
    /// Bumped on every store.
    pub revision: u64,
    pub targets: BTreeSet<Target>,
    pub all_test_ops: TargetSets,
    pub success_ops: TargetSets,
    pub out_diff_ops: TargetSets,
    pub not_supported_ops: TargetSets,
}

impl Default for StatsRecord {
    fn default() -> Self {
        let empty: TargetSets = Target::ALL
            .into_iter()
            .map(|target| (target, BTreeSet::new()))
            .collect();
        Self {
            schema_version: SCHEMA_VERSION.to_owned(),
            revision: 0,
            targets: BTreeSet::new(),
            all_test_ops: empty.clone(),
            success_ops: empty.clone(),
            out_diff_ops: empty.clone(),
            not_supported_ops: empty,
        }
    }
}

impl StatsRecord {
    #[must_use]
    pub const fn category(&self, category: Category) -> &TargetSets {
        match category {
            Category::AllTestOps => &self.all_test_ops,
            Category::SuccessOps => &self.success_ops,
            Category::OutDiffOps => &self.out_diff_ops,
            Category::NotSupportedOps => &self.not_supported_ops,
        }
    }

    fn category_mut(&mut self, category: Category) -> &mut TargetSets {
        match category {
            Category::AllTestOps => &mut self.all_test_ops,
            Category::SuccessOps => &mut self.success_ops,
            Category::OutDiffOps => &mut self.out_diff_ops,
            Category::NotSupportedOps => &mut self.not_supported_ops,
        }
    }

    #[must_use]
    pub fn ops(&self, category: Category, target: Target) -> &BTreeSet<String> {
        self.category(category).get(&target).unwrap_or(&NO_OPS)
    }

    /// Adds `op` under `(category, target)` and marks `target` as seen.
    /// Returns false when the operator was already present.
    pub fn insert(&mut self, category: Category, target: Target, op: &str) -> bool {
        self.targets.insert(target);
        self.category_mut(category)
            .entry(target)
            .or_default()
            .insert(op.to_owned())
    }

    /// Rejects documents written by another schema major version or missing
    /// a per-target entry in any category.
    pub fn validate(&self) -> OsResult<()> {
        let expected_major = major(SCHEMA_VERSION);
        if major(&self.schema_version) != expected_major {
            return Err(OsError::SchemaMismatch {
                expected: expected_major.to_owned(),
                found: self.schema_version.clone(),
            });
        }

        for category in Category::ALL {
            let sets = self.category(category);
            if let Some(missing) = Target::ALL.into_iter().find(|t| !sets.contains_key(t)) {
                return Err(OsError::Corrupt(format!(
                    "category `{category}` has no entry for target `{missing}`"
                )));
            }
        }
        Ok(())
    }
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSummary {
    pub target: Target,
    pub test_count: usize,
    pub success_count: usize,
    pub not_supported_count: usize,
    pub out_diff_count: usize,
    pub success: Vec<String>,
    pub not_supported: Vec<String>,
    pub out_diff: Vec<String>,
}

impl TargetSummary {
    /// Success is reported net of the not-supported and output-diff sets.
    #[must_use]
    pub fn from_record(record: &StatsRecord, target: Target) -> Self {
        let tested = record.ops(Category::AllTestOps, target);
        let not_supported = record.ops(Category::NotSupportedOps, target);
        let out_diff = record.ops(Category::OutDiffOps, target);
        let success: Vec<String> = record
            .ops(Category::SuccessOps, target)
            .iter()
            .filter(|op| !not_supported.contains(*op) && !out_diff.contains(*op))
            .cloned()
            .collect();

        Self {
            target,
            test_count: tested.len(),
            success_count: success.len(),
            not_supported_count: not_supported.len(),
            out_diff_count: out_diff.len(),
            success,
            not_supported: not_supported.iter().cloned().collect(),
            out_diff: out_diff.iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSummary {
    pub targets: Vec<TargetSummary>,
}

impl StatsSummary {
    #[must_use]
    pub fn from_record(record: &StatsRecord) -> Self {
        Self {
            targets: record
                .targets
                .iter()
                .map(|&target| TargetSummary::from_record(record, target))
                .collect(),
        }
    }

    #[must_use]
    pub fn target(&self, target: Target) -> Option<&TargetSummary> {
        self.targets.iter().find(|summary| summary.target == target)
    }
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "----------------------Unit Test Summary---------------------")?;
        for summary in &self.targets {
            writeln!(f, "Target = {}", summary.target)?;
            writeln!(f, "Number of test = {}", summary.test_count)?;
            writeln!(f, "Number of success = {}", summary.success_count)?;
            writeln!(f, "Number of not supported = {}", summary.not_supported_count)?;
            writeln!(f, "Number of output diff = {}", summary.out_diff_count)?;
            writeln!(f, "\nDetails:")?;
            writeln!(f, "Success:\n{:?}", summary.success)?;
            writeln!(f, "\nNot supported:\n{:?}", summary.not_supported)?;
            writeln!(f, "\nOutput diff:\n{:?}", summary.out_diff)?;
            writeln!(f, "\n")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StatsStore {
    path: PathBuf,
    mode: WriteMode,
}

impl StatsStore {
    /// A lenient store; see [`StatsStore::with_mode`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_mode(path, WriteMode::Lenient)
    }

    pub fn with_mode(path: impl Into<PathBuf>, mode: WriteMode) -> Self {
        Self {
            path: path.into(),
            mode,
        }
    }

    #[must_use]
    pub fn from_config(config: &StatsConfig) -> Self {
        Self::with_mode(config.path.clone(), config.mode)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Reads the persisted record. A missing file is an `Io` not-found error.
    pub fn load(&self) -> OsResult<StatsRecord> {
        let raw = fs::read_to_string(&self.path)?;
        let record: StatsRecord = serde_json::from_str(&raw)?;
        record.validate()?;
        tracing::debug!(
            path = %self.path.display(),
            revision = record.revision,
            "loaded stats record"
        );
        Ok(record)
    }

    /// Like [`StatsStore::load`], but a missing file yields the empty default.
    pub fn load_or_default(&self) -> OsResult<StatsRecord> {
        match self.load() {
            Err(error) if error.is_not_found() => Ok(StatsRecord::default()),
            other => other,
        }
    }

    /// Writes `record` over the backing file and bumps its revision.
    ///
    /// Lenient mode overwrites unconditionally. Strict mode takes the lock
    /// and fails with [`OsError::StaleSnapshot`] when the file has been
    /// stored since `record` was loaded.
    pub fn store(&self, record: &mut StatsRecord) -> OsResult<()> {
        match self.mode {
            WriteMode::Lenient => self.write_record(record),
            WriteMode::Strict => {
                let _lock = StatsLock::acquire(&self.path, "store")?;
                let on_disk = self.load_or_default()?.revision;
                if on_disk != record.revision {
                    return Err(OsError::StaleSnapshot {
                        loaded: record.revision,
                        on_disk,
                    });
                }
                self.write_record(record)
            }
        }
    }

    /// Load, add `op` under `(category, target)`, store.
    pub fn record(&self, category: Category, target: Target, op: &str) -> OsResult<()> {
        if op.trim().is_empty() {
            return Err(OsError::InvalidRequest(
                "operator name must not be blank".to_owned(),
            ));
        }

        let _lock = match self.mode {
            WriteMode::Lenient => None,
            WriteMode::Strict => Some(StatsLock::acquire(&self.path, "record")?),
        };

        let mut record = self.load_or_default()?;
        let added = record.insert(category, target, op);
        self.write_record(&mut record)?;
        tracing::debug!(
            path = %self.path.display(),
            %category,
            %target,
            op,
            added,
            "recorded operator"
        );
        Ok(())
    }

    pub fn record_all_test_op(&self, target: Target, op: &str) -> OsResult<()> {
        self.record(Category::AllTestOps, target, op)
    }

    pub fn record_success_op(&self, target: Target, op: &str) -> OsResult<()> {
        self.record(Category::SuccessOps, target, op)
    }

    pub fn record_out_diff_op(&self, target: Target, op: &str) -> OsResult<()> {
        self.record(Category::OutDiffOps, target, op)
    }

    pub fn record_not_supported_op(&self, target: Target, op: &str) -> OsResult<()> {
        self.record(Category::NotSupportedOps, target, op)
    }

    /// Per-target report. Fails when nothing has been recorded yet.
    pub fn summarize(&self) -> OsResult<StatsSummary> {
        let record = self.load()?;
        Ok(StatsSummary::from_record(&record))
    }

    /// Deletes the backing file. Returns whether there was one.
    pub fn reset(&self) -> OsResult<bool> {
        let _lock = match self.mode {
            WriteMode::Lenient => None,
            WriteMode::Strict => Some(StatsLock::acquire(&self.path, "reset")?),
        };
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "stats file removed");
                Ok(true)
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    fn write_record(&self, record: &mut StatsRecord) -> OsResult<()> {
        record.revision += 1;
        let json = serde_json::to_string_pretty(record)?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        match self.mode {
            WriteMode::Lenient => fs::write(&self.path, json)?,
            WriteMode::Strict => atomic_write_bytes(&self.path, json.as_bytes())?,
        }
        tracing::debug!(
            path = %self.path.display(),
            revision = record.revision,
            "stored stats record"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    created_at_rfc3339: String,
    operation: String,
}

/// Exclusive lock file next to the stats file, removed on drop.
#[derive(Debug)]
pub struct StatsLock {
    path: PathBuf,
    released: bool,
}

impl StatsLock {
    pub fn acquire(stats_path: &Path, operation: &str) -> OsResult<Self> {
        Self::acquire_with_attempts(stats_path, operation, LOCK_ACQUIRE_ATTEMPTS)
    }

    pub(crate) fn acquire_with_attempts(
        stats_path: &Path,
        operation: &str,
        attempts: usize,
    ) -> OsResult<Self> {
        let path = lock_path(stats_path);
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut last_holder: Option<LockInfo> = None;
        for attempt in 0..attempts {
            match OpenOptions::new().create_new(true).write(true).open(&path) {
                Ok(mut file) => {
                    let info = LockInfo {
                        pid: std::process::id(),
                        created_at_rfc3339: Utc::now().to_rfc3339(),
                        operation: operation.to_owned(),
                    };
                    file.write_all(serde_json::to_string_pretty(&info)?.as_bytes())?;
                    file.sync_all()?;
                    tracing::debug!(path = %path.display(), operation, "acquired stats lock");
                    return Ok(Self {
                        path,
                        released: false,
                    });
                }
                Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                    match inspect_lock(&path)? {
                        LockState::Gone => continue,
                        LockState::Stale { reason, contents } => {
                            match break_stale_lock(&path, &contents, reason)? {
                                BreakOutcome::Archived | BreakOutcome::Changed => continue,
                                BreakOutcome::Busy => {}
                            }
                        }
                        LockState::Held(info) => last_holder = info,
                    }
                }
                Err(error) => return Err(error.into()),
            }

            let delay_ms =
                (LOCK_BASE_BACKOFF_MS * (attempt as u64 + 1)).min(LOCK_MAX_BACKOFF_MS);
            std::thread::sleep(Duration::from_millis(delay_ms));
        }

        let (pid, since) = last_holder.map_or_else(
            || (0, "unknown".to_owned()),
            |info| (info.pid, info.created_at_rfc3339),
        );
        Err(OsError::LockHeld { path, pid, since })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> OsResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> OsResult<()> {
        if self.released {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        self.released = true;
        Ok(())
    }
}

impl Drop for StatsLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
            self.released = true;
        }
    }
}

enum LockState {
    Gone,
    /// `contents` is the lock body that was judged stale.
    Stale {
        reason: &'static str,
        contents: String,
    },
    Held(Option<LockInfo>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BreakOutcome {
    Archived,
    /// The lock vanished or was replaced since it was judged stale.
    Changed,
    /// Another waiter is breaking the lock right now.
    Busy,
}

#[must_use]
pub fn lock_path(stats_path: &Path) -> PathBuf {
    sibling_path(stats_path, ".lock")
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

fn read_lock_body(path: &Path) -> OsResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

fn file_age_secs(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age.as_secs())
}

fn inspect_lock(path: &Path) -> OsResult<LockState> {
    let Some(contents) = read_lock_body(path)? else {
        return Ok(LockState::Gone);
    };

    if let Ok(info) = serde_json::from_str::<LockInfo>(&contents) {
        if is_lock_stale(&info) {
            return Ok(LockState::Stale {
                reason: "stale",
                contents,
            });
        }
        return Ok(LockState::Held(Some(info)));
    }

    // An unparseable lock may be one another writer is still filling in;
    // only an old one counts as corrupt.
    match file_age_secs(path) {
        Some(age) if age > LOCK_STALE_SECONDS.unsigned_abs() => Ok(LockState::Stale {
            reason: "corrupt",
            contents,
        }),
        _ => Ok(LockState::Held(None)),
    }
}

fn is_lock_stale(info: &LockInfo) -> bool {
    if !pid_is_alive(info.pid) {
        return true;
    }

    if let Ok(created) = chrono::DateTime::parse_from_rfc3339(&info.created_at_rfc3339) {
        let age = Utc::now().signed_duration_since(created);
        if age.num_seconds() > LOCK_STALE_SECONDS {
            return true;
        }
    }

    false
}

/// Marker file that serializes waiters breaking the same stale lock.
struct BreakGuard {
    path: PathBuf,
}

impl BreakGuard {
    fn try_acquire(lock: &Path) -> OsResult<Option<Self>> {
        let path = sibling_path(lock, ".break");
        match OpenOptions::new().create_new(true).write(true).open(&path) {
            Ok(_) => Ok(Some(Self { path })),
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
                // Left behind by a waiter that died mid-break.
                if file_age_secs(&path).is_some_and(|age| age > LOCK_STALE_SECONDS.unsigned_abs())
                {
                    let _ = fs::remove_file(&path);
                }
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }
}

impl Drop for BreakGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Archives the lock at `path` only while it still holds `snapshot`, the
/// body that was judged stale.
pub(crate) fn break_stale_lock(
    path: &Path,
    snapshot: &str,
    reason: &str,
) -> OsResult<BreakOutcome> {
    let Some(_guard) = BreakGuard::try_acquire(path)? else {
        return Ok(BreakOutcome::Busy);
    };

    if read_lock_body(path)?.as_deref() != Some(snapshot) {
        return Ok(BreakOutcome::Changed);
    }

    let archived = sibling_path(
        path,
        &format!(".{reason}.{}.json", Utc::now().timestamp_millis()),
    );
    match fs::rename(path, &archived) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(BreakOutcome::Changed);
        }
        Err(error) => return Err(error.into()),
    }

    // A holder that was only old, not dead, can release between the check
    // and the rename and let a new writer in.
    if read_lock_body(&archived)?.as_deref() != Some(snapshot) {
        restore_displaced_lock(path, &archived)?;
        return Ok(BreakOutcome::Changed);
    }

    tracing::warn!(
        lock = %path.display(),
        archived = %archived.display(),
        reason,
        "archived abandoned stats lock"
    );
    Ok(BreakOutcome::Archived)
}

fn restore_displaced_lock(path: &Path, archived: &Path) -> OsResult<()> {
    match fs::hard_link(archived, path) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {
            tracing::warn!(
                lock = %path.display(),
                "live stats lock was displaced and could not be restored"
            );
        }
        Err(error) => return Err(error.into()),
    }
    fs::remove_file(archived)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}

// ---------------------------------------------------------------------------
// Utility helpers
// ---------------------------------------------------------------------------

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> OsResult<()> {
    let tmp = sibling_path(path, ".tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    sync_parent_dir(path)?;
    Ok(())
}

fn sync_parent_dir(path: &Path) -> OsResult<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            let dir = fs::File::open(parent)?;
            dir.sync_all()?;
        }
    }
    Ok(())
}
