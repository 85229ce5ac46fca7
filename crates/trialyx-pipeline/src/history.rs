//! Dataset history tracking: change detection by content checksum, a
//! stable "latest" copy, timestamped immutable snapshots, and optional
//! age-based snapshot retention.
//!
//! One logical dataset has one state record (`collection_state.json`),
//! created on the first run and overwritten on every subsequent run.
//! Snapshot filenames embed a UTC timestamp token that sorts
//! lexicographically and is parsed back for retention pruning.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use trialyx_common::{Result, TrialyxError};

#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Freshly produced dataset file to track.
    pub dataset_file: PathBuf,
    pub state_file: PathBuf,
    pub latest_file: PathBuf,
    pub history_dir: PathBuf,
    /// Override for reproducible runs; defaults to now (UTC).
    pub timestamp: Option<DateTime<Utc>>,
    /// Snapshots older than this many days are deleted. None keeps all.
    pub retention_days: Option<i64>,
    /// Snapshot only when content changed; default snapshots every run.
    pub snapshot_on_change: bool,
    /// Optional "true"/"false" flag file for external automation.
    pub changed_flag_path: Option<PathBuf>,
}

impl HistoryConfig {
    pub fn new(
        dataset_file: impl Into<PathBuf>,
        state_file: impl Into<PathBuf>,
        latest_file: impl Into<PathBuf>,
        history_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dataset_file: dataset_file.into(),
            state_file: state_file.into(),
            latest_file: latest_file.into(),
            history_dir: history_dir.into(),
            timestamp: None,
            retention_days: None,
            snapshot_on_change: false,
            changed_flag_path: None,
        }
    }
}

/// Persisted per-dataset collection state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionState {
    pub schema_version: u32,
    pub last_collected_at: String,
    pub last_changed_at: String,
    pub latest_file: String,
    pub latest_checksum: String,
    pub latest_row_count: usize,
    pub history_count: usize,
    pub last_pruned_count: usize,
    pub latest_snapshot: String,
}

#[derive(Debug, Clone)]
pub struct HistoryOutcome {
    pub changed: bool,
    pub snapshot: Option<PathBuf>,
    pub pruned: usize,
    pub row_count: usize,
    pub checksum: String,
    pub state: CollectionState,
}

/// SHA-256 of a file, streamed in 1 MiB chunks.
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Row count of a dataset file: JSON-array length for `.json`, non-blank
/// line count otherwise.
pub fn dataset_row_count(path: &Path) -> Result<usize> {
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path)?)?;
        return Ok(value.as_array().map_or(1, |arr| arr.len()));
    }
    let content = fs::read_to_string(path)?;
    Ok(content.lines().filter(|line| !line.trim().is_empty()).count())
}

fn iso_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Filename-safe token: the ISO timestamp with `:` and `-` stripped,
/// e.g. `20260210T000000Z`. Sorts lexicographically in time order.
fn timestamp_token(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Parse the timestamp token embedded in a snapshot filename.
fn parse_snapshot_timestamp(name: &str, prefix: &str, suffix: &str) -> Option<DateTime<Utc>> {
    let token = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
    NaiveDateTime::parse_from_str(token, "%Y%m%dT%H%M%SZ")
        .ok()
        .map(|naive| naive.and_utc())
}

fn read_state(path: &Path) -> Result<Option<CollectionState>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
}

fn snapshot_name_parts(dataset_file: &Path) -> Result<(String, String)> {
    let stem = dataset_file
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            TrialyxError::Config(format!(
                "dataset file has no usable name: {}",
                dataset_file.display()
            ))
        })?;
    let ext = dataset_file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jsonl");
    Ok((format!("{stem}_"), format!(".{ext}")))
}

/// Delete snapshots older than the retention cutoff. Files whose names do
/// not parse as snapshot tokens are left alone.
fn prune_old_snapshots(
    history_dir: &Path,
    prefix: &str,
    suffix: &str,
    now: DateTime<Utc>,
    retention_days: i64,
) -> Result<usize> {
    if retention_days < 0 || !history_dir.exists() {
        return Ok(0);
    }
    let cutoff = now - Duration::days(retention_days);
    let mut deleted = 0;
    for entry in fs::read_dir(history_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(ts) = parse_snapshot_timestamp(name, prefix, suffix) else {
            continue;
        };
        if ts < cutoff {
            fs::remove_file(entry.path())?;
            deleted += 1;
            debug!(snapshot = name, "pruned aged snapshot");
        }
    }
    Ok(deleted)
}

fn count_snapshots(history_dir: &Path, prefix: &str, suffix: &str) -> Result<usize> {
    if !history_dir.exists() {
        return Ok(0);
    }
    let mut n = 0;
    for entry in fs::read_dir(history_dir)? {
        let name = entry?.file_name();
        if let Some(name) = name.to_str() {
            if name.starts_with(prefix) && name.ends_with(suffix) {
                n += 1;
            }
        }
    }
    Ok(n)
}

/// Track one freshly produced dataset file: detect change, refresh the
/// latest copy, snapshot, prune, and persist the updated state record.
#[instrument(skip_all, fields(dataset = %config.dataset_file.display()))]
pub fn update_history(config: &HistoryConfig) -> Result<HistoryOutcome> {
    if !config.dataset_file.exists() {
        return Err(TrialyxError::Config(format!(
            "dataset file not found: {}",
            config.dataset_file.display()
        )));
    }

    let now = config.timestamp.unwrap_or_else(Utc::now);
    let ts = iso_timestamp(now);
    let token = timestamp_token(now);
    let (prefix, suffix) = snapshot_name_parts(&config.dataset_file)?;

    let checksum = file_checksum(&config.dataset_file)?;
    let row_count = dataset_row_count(&config.dataset_file)?;

    let prev = read_state(&config.state_file)?;
    let prev_checksum = prev.as_ref().map(|s| s.latest_checksum.as_str());
    let changed = !config.latest_file.exists() || Some(checksum.as_str()) != prev_checksum;

    if let Some(parent) = config.latest_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&config.dataset_file, &config.latest_file)?;

    let should_snapshot = if config.snapshot_on_change { changed } else { true };
    let snapshot = if should_snapshot {
        fs::create_dir_all(&config.history_dir)?;
        let path = config.history_dir.join(format!("{prefix}{token}{suffix}"));
        fs::copy(&config.dataset_file, &path)?;
        Some(path)
    } else {
        None
    };

    let pruned = match config.retention_days {
        Some(days) => prune_old_snapshots(&config.history_dir, &prefix, &suffix, now, days)?,
        None => 0,
    };
    let history_count = count_snapshots(&config.history_dir, &prefix, &suffix)?;

    let state = CollectionState {
        schema_version: 1,
        last_collected_at: ts.clone(),
        last_changed_at: if changed {
            ts
        } else {
            prev.as_ref()
                .map(|s| s.last_changed_at.clone())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| iso_timestamp(now))
        },
        latest_file: config.latest_file.display().to_string(),
        latest_checksum: checksum.clone(),
        latest_row_count: row_count,
        history_count,
        last_pruned_count: pruned,
        latest_snapshot: snapshot
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| {
                prev.as_ref()
                    .map(|s| s.latest_snapshot.clone())
                    .unwrap_or_default()
            }),
    };
    if let Some(parent) = config.state_file.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(
        &config.state_file,
        format!("{}\n", serde_json::to_string_pretty(&state)?),
    )?;

    if let Some(ref flag_path) = config.changed_flag_path {
        if let Some(parent) = flag_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(flag_path, if changed { "true\n" } else { "false\n" })?;
    }

    info!(
        changed,
        rows = row_count,
        history_count,
        pruned,
        "history updated"
    );

    Ok(HistoryOutcome {
        changed,
        snapshot,
        pruned,
        row_count,
        checksum,
        state,
    })
}
