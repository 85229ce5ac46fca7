//! Shard merge: combine independently collected trials datasets into one,
//! deduplicating by the canonical JSON signature of the whole row.
//!
//! Two rows are "the same" only when every field matches exactly. Rows for
//! the same trial sourced from different collections carry different field
//! sets and are intentionally both kept.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument};

use trialyx_common::{io, Result, TrialyxError};
use trialyx_ingestion::normalise::build_union_header;

use crate::export::PREFERRED_TRIALS_HEADER;

#[derive(Debug, Clone, Serialize)]
pub struct MergeSummary {
    pub schema_version: u32,
    pub mode: String,
    pub shard_dirs: Vec<PathBuf>,
    pub n_shards: usize,
    pub n_input_rows: usize,
    pub n_rows: usize,
    pub n_cids: usize,
    pub jsonl: PathBuf,
    pub json: PathBuf,
    pub csv: PathBuf,
    pub cids_txt: PathBuf,
}

/// Canonical JSON signature of a row: sorted keys, compact separators.
/// `serde_json` maps are ordered, so serialising the value directly is
/// already canonical.
pub fn row_signature(row: &Value) -> Result<String> {
    Ok(serde_json::to_string(row)?)
}

/// Rows of one shard: `trials.jsonl` preferred, `trials.json` array as the
/// fallback. A shard with neither is an error.
fn rows_from_shard(shard_dir: &Path) -> Result<Vec<Value>> {
    let jsonl = shard_dir.join("trials.jsonl");
    if jsonl.exists() {
        return io::read_jsonl(&jsonl);
    }

    let json = shard_dir.join("trials.json");
    if json.exists() {
        let value: Value = serde_json::from_str(&std::fs::read_to_string(&json)?)?;
        let rows = value
            .as_array()
            .map(|arr| arr.iter().filter(|v| v.is_object()).cloned().collect())
            .unwrap_or_default();
        return Ok(rows);
    }

    Err(TrialyxError::Pipeline(format!(
        "no trials.jsonl or trials.json in shard dir: {}",
        shard_dir.display()
    )))
}

/// Merge shard datasets into `out_dir`, writing JSONL/JSON/CSV views, the
/// sorted unique CID list, and a summary record.
#[instrument(skip_all, fields(n_shards = shard_dirs.len(), out_dir = %out_dir.display()))]
pub fn merge_trials_shards(shard_dirs: &[PathBuf], out_dir: &Path) -> Result<MergeSummary> {
    if shard_dirs.is_empty() {
        return Err(TrialyxError::Config(
            "at least one shard dir is required".to_string(),
        ));
    }
    io::ensure_dir(out_dir)?;

    let mut merged: Vec<Value> = Vec::new();
    let mut signatures: HashSet<String> = HashSet::new();
    let mut input_rows = 0usize;

    for shard in shard_dirs {
        for row in rows_from_shard(shard)? {
            input_rows += 1;
            let signature = row_signature(&row)?;
            if signatures.insert(signature) {
                merged.push(row);
            }
        }
    }

    let maps: Vec<Map<String, Value>> = merged
        .iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
    let header = build_union_header(&maps, &PREFERRED_TRIALS_HEADER);

    let jsonl_path = out_dir.join("trials.jsonl");
    let json_path = out_dir.join("trials.json");
    let csv_path = out_dir.join("trials.csv");
    let cids_txt = out_dir.join("cids.txt");
    let summary_path = out_dir.join("summary.json");

    io::write_jsonl(&jsonl_path, &merged)?;
    io::write_json_array_from_jsonl(&jsonl_path, &json_path)?;
    write_csv(&csv_path, &merged, &header)?;

    let mut cids: Vec<u64> = merged
        .iter()
        .filter_map(|row| row.get("cid").and_then(|v| v.as_u64()))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    cids.sort_unstable();
    let mut txt = cids.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("\n");
    txt.push('\n');
    std::fs::write(&cids_txt, txt)?;

    let summary = MergeSummary {
        schema_version: 1,
        mode: "merged_from_shards".to_string(),
        shard_dirs: shard_dirs.to_vec(),
        n_shards: shard_dirs.len(),
        n_input_rows: input_rows,
        n_rows: merged.len(),
        n_cids: cids.len(),
        jsonl: jsonl_path,
        json: json_path,
        csv: csv_path,
        cids_txt,
    };
    std::fs::write(
        &summary_path,
        format!("{}\n", serde_json::to_string_pretty(&summary)?),
    )?;

    info!(
        shards = summary.n_shards,
        input_rows = summary.n_input_rows,
        rows = summary.n_rows,
        cids = summary.n_cids,
        "shard merge complete"
    );
    Ok(summary)
}

fn write_csv(path: &Path, rows: &[Value], header: &[String]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| TrialyxError::Pipeline(format!("csv open failed: {e}")))?;
    writer
        .write_record(header)
        .map_err(|e| TrialyxError::Pipeline(format!("csv write failed: {e}")))?;
    for row in rows {
        let record: Vec<String> = header
            .iter()
            .map(|key| match row.get(key) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| TrialyxError::Pipeline(format!("csv write failed: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| TrialyxError::Pipeline(format!("csv flush failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_shard(dir: &Path, rows: &[Value]) {
        io::write_jsonl(&dir.join("trials.jsonl"), rows).unwrap();
    }

    #[test]
    fn test_subset_shard_is_fully_deduplicated() {
        let tmp = tempfile::tempdir().unwrap();
        let shard_a = tmp.path().join("a");
        let shard_b = tmp.path().join("b");
        std::fs::create_dir_all(&shard_a).unwrap();
        std::fs::create_dir_all(&shard_b).unwrap();

        let row_a = json!({"cid": 11, "collection": "ClinicalTrials.gov", "id": "NCT00000011"});
        let row_b = json!({"cid": 12, "collection": "ClinicalTrials.gov", "id": "NCT00000012"});
        write_shard(&shard_a, &[row_a.clone(), row_b.clone()]);
        // Shard B is a strict subset of shard A.
        write_shard(&shard_b, &[row_a.clone()]);

        let out = tmp.path().join("merged");
        let summary = merge_trials_shards(&[shard_a, shard_b], &out).unwrap();

        assert_eq!(summary.n_input_rows, 3);
        assert_eq!(summary.n_rows, 2);
        assert_eq!(summary.n_cids, 2);
        assert_eq!(io::read_jsonl(&out.join("trials.jsonl")).unwrap().len(), 2);
        assert_eq!(
            std::fs::read_to_string(out.join("cids.txt")).unwrap(),
            "11\n12\n"
        );
    }

    #[test]
    fn test_rows_differing_in_any_field_both_survive() {
        let tmp = tempfile::tempdir().unwrap();
        let shard = tmp.path().join("a");
        std::fs::create_dir_all(&shard).unwrap();

        // Same trial, different field sets from different sources.
        write_shard(
            &shard,
            &[
                json!({"cid": 11, "id": "NCT00000011", "status": "Completed"}),
                json!({"cid": 11, "id": "NCT00000011", "phase": "Phase 2"}),
            ],
        );

        let out = tmp.path().join("merged");
        let summary = merge_trials_shards(&[shard], &out).unwrap();
        assert_eq!(summary.n_rows, 2);
    }

    #[test]
    fn test_json_array_shard_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let shard = tmp.path().join("a");
        std::fs::create_dir_all(&shard).unwrap();
        std::fs::write(
            shard.join("trials.json"),
            r#"[{"cid": 7, "id": "NCT00000007"}]"#,
        )
        .unwrap();

        let out = tmp.path().join("merged");
        let summary = merge_trials_shards(&[shard], &out).unwrap();
        assert_eq!(summary.n_rows, 1);
        assert_eq!(summary.n_cids, 1);
    }

    #[test]
    fn test_empty_shard_dir_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let shard = tmp.path().join("empty");
        std::fs::create_dir_all(&shard).unwrap();
        let out = tmp.path().join("merged");
        assert!(merge_trials_shards(&[shard], &out).is_err());
    }

    #[test]
    fn test_row_signature_is_key_order_independent() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": 2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": 2, "b": 1}"#).unwrap();
        assert_eq!(row_signature(&a).unwrap(), row_signature(&b).unwrap());
    }
}
