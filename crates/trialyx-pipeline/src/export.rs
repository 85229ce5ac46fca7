//! Trials dataset export: per-CID SDQ union rows across the three
//! registries, streamed to JSONL with resume support, then derived CSV and
//! JSON-array views over the union schema.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};

use trialyx_common::{io, Result, TrialyxError};
use trialyx_ingestion::models::{CompoundProperties, SdqCollection};
use trialyx_ingestion::normalise::{
    align_rows_to_union_schema, build_union_header, extract_sdq_rows,
    normalise_sdq_trial_row_union,
};
use trialyx_ingestion::sources::{ClassificationNodes, CompoundDirectory, TrialWebSearch};

/// Preferred column order for the trials CSV header; remaining union keys
/// follow lexicographically.
pub const PREFERRED_TRIALS_HEADER: [&str; 12] = [
    "cid",
    "collection",
    "id",
    "id_url",
    "title",
    "phase",
    "status",
    "date",
    "smiles",
    "inchikey",
    "iupac_name",
    "compound_error",
];

/// Native SDQ fields superseded by the normalised `id`/`date`/`id_url`.
const NATIVE_ID_FIELDS: [&str; 3] = ["ctid", "eudractnumber", "updatedate"];

#[derive(Debug, Clone)]
pub struct ExportTrialsConfig {
    pub hnids: Vec<u32>,
    pub out_dir: PathBuf,
    pub collections: Vec<SdqCollection>,
    pub limit_per_collection: usize,
    pub limit_cids: Option<usize>,
    pub resume: bool,
    pub progress_every: usize,
}

impl ExportTrialsConfig {
    pub fn new(hnids: Vec<u32>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            hnids,
            out_dir: out_dir.into(),
            collections: vec![
                SdqCollection::ClinicalTrials,
                SdqCollection::EuRegister,
                SdqCollection::JapanNiph,
            ],
            limit_per_collection: 200,
            limit_cids: None,
            resume: false,
            progress_every: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportTrialsPaths {
    pub cids_txt: PathBuf,
    pub jsonl: PathBuf,
    pub csv: PathBuf,
    pub json: PathBuf,
    pub summary: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportTrialsResult {
    pub n_cids: usize,
    pub n_rows: usize,
    pub n_cids_with_trials: usize,
    pub n_error_rows: usize,
    pub csv_rows: usize,
    pub json_rows: usize,
    pub paths: ExportTrialsPaths,
}

/// Union trial rows for one CID across the configured collections,
/// aligned to their common schema.
async fn union_rows_for_cid(
    web: &dyn TrialWebSearch,
    cid: u64,
    collections: &[SdqCollection],
    limit_per_collection: usize,
) -> Result<Vec<Map<String, Value>>> {
    let mut merged: Vec<Map<String, Value>> = Vec::new();
    for collection in collections {
        let payload = web.sdq_payload(cid, collection, limit_per_collection).await?;
        for row in extract_sdq_rows(&payload) {
            merged.push(normalise_sdq_trial_row_union(&row, collection));
        }
    }
    let (aligned, _) = align_rows_to_union_schema(&merged, &[]);
    Ok(aligned)
}

/// Keep the normalised schema only: native identifier fields are dropped
/// from exported rows.
fn sanitise_trial_row(row: &mut Map<String, Value>) {
    for key in NATIVE_ID_FIELDS {
        row.remove(key);
    }
}

fn placeholder_row() -> Map<String, Value> {
    let mut row = Map::new();
    for key in ["collection", "id", "title", "phase", "status", "date", "id_url", "cids"] {
        row.insert(key.to_string(), Value::Null);
    }
    row.insert("note".to_string(), json!("no_trials_found"));
    row
}

fn enrich_row(
    row: &mut Map<String, Value>,
    cid: u64,
    props: &CompoundProperties,
    compound_error: &Option<String>,
) {
    row.insert("cid".to_string(), json!(cid));
    row.insert("smiles".to_string(), json!(props.canonical_smiles));
    row.insert("inchikey".to_string(), json!(props.inchikey));
    row.insert("iupac_name".to_string(), json!(props.iupac_name));
    row.insert("compound_error".to_string(), json!(compound_error));
}

/// CIDs already covered by a prior `trials.jsonl`.
fn processed_cids(path: &Path) -> Result<HashSet<u64>> {
    let mut seen = HashSet::new();
    for row in io::read_jsonl(path)? {
        if let Some(cid) = row.get("cid").and_then(|v| v.as_u64()) {
            seen.insert(cid);
        }
    }
    Ok(seen)
}

/// Derive the CSV view of a trials JSONL file over its union header.
fn write_csv_from_jsonl(jsonl_path: &Path, csv_path: &Path, header: &[String]) -> Result<usize> {
    let mut writer = csv::Writer::from_path(csv_path)
        .map_err(|e| TrialyxError::Pipeline(format!("csv open failed: {e}")))?;
    writer
        .write_record(header)
        .map_err(|e| TrialyxError::Pipeline(format!("csv write failed: {e}")))?;

    let mut n = 0;
    for row in io::read_jsonl(jsonl_path)? {
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
        n += 1;
    }
    writer
        .flush()
        .map_err(|e| TrialyxError::Pipeline(format!("csv flush failed: {e}")))?;
    Ok(n)
}

/// Union header over every row of a JSONL file.
fn union_header_from_jsonl(path: &Path, preferred: &[&str]) -> Result<Vec<String>> {
    let rows: Vec<Map<String, Value>> = io::read_jsonl(path)?
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
    Ok(build_union_header(&rows, preferred))
}

/// Run the trials-dataset export for the configured source nodes.
#[instrument(skip_all, fields(hnids = ?config.hnids, out_dir = %config.out_dir.display()))]
pub async fn export_trials_dataset(
    config: &ExportTrialsConfig,
    nodes: &dyn ClassificationNodes,
    pubchem: &dyn CompoundDirectory,
    web: &dyn TrialWebSearch,
) -> Result<ExportTrialsResult> {
    if config.collections.is_empty() {
        return Err(TrialyxError::Config(
            "at least one SDQ collection is required".to_string(),
        ));
    }
    io::ensure_dir(&config.out_dir)?;

    let paths = ExportTrialsPaths {
        cids_txt: config.out_dir.join("cids.txt"),
        jsonl: config.out_dir.join("trials.jsonl"),
        csv: config.out_dir.join("trials.csv"),
        json: config.out_dir.join("trials.json"),
        summary: config.out_dir.join("summary.json"),
    };

    // 1) Collect and dedupe CIDs, first-seen order.
    let mut cids: Vec<u64> = Vec::new();
    let mut seen: HashSet<u64> = HashSet::new();
    for &hnid in &config.hnids {
        for cid in nodes.cids_for_node(hnid).await? {
            if seen.insert(cid) {
                cids.push(cid);
            }
        }
    }
    if let Some(limit) = config.limit_cids {
        cids.truncate(limit);
    }
    let mut txt = cids.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("\n");
    txt.push('\n');
    std::fs::write(&paths.cids_txt, txt)?;

    let already_done = if config.resume {
        processed_cids(&paths.jsonl)?
    } else {
        HashSet::new()
    };

    info!(
        n_cids = cids.len(),
        resume = config.resume,
        skipped = already_done.len(),
        "trials export starting"
    );

    let mut total_rows = 0usize;
    let mut cids_with_trials = 0usize;
    let mut error_rows = 0usize;
    let total = cids.len();

    // 2) CID -> union trial rows + compound properties, streamed.
    for (idx, &cid) in cids.iter().enumerate() {
        let done = idx + 1;
        if already_done.contains(&cid) {
            continue;
        }

        let mut compound_error: Option<String> = None;
        let props = match pubchem.compound_properties(cid).await {
            Ok(props) => props,
            Err(e) => {
                compound_error = Some(format!("compound_props_error:{e}"));
                CompoundProperties::default()
            }
        };

        let mut rows = match union_rows_for_cid(web, cid, &config.collections, config.limit_per_collection).await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(cid, error = %e, "trials union failed, recording error row");
                let mut row = Map::new();
                row.insert(
                    "collections".to_string(),
                    json!(config.collections.iter().map(|c| c.code()).collect::<Vec<_>>()),
                );
                row.insert("error".to_string(), json!(format!("trials_union_error:{e}")));
                enrich_row(&mut row, cid, &props, &compound_error);
                io::append_jsonl(&paths.jsonl, &Value::Object(row))?;
                total_rows += 1;
                error_rows += 1;
                continue;
            }
        };

        if rows.is_empty() {
            // Placeholder row keeps the CID traceable in the dataset.
            rows = vec![placeholder_row()];
        } else {
            cids_with_trials += 1;
        }

        for mut row in rows {
            sanitise_trial_row(&mut row);
            enrich_row(&mut row, cid, &props, &compound_error);
            io::append_jsonl(&paths.jsonl, &Value::Object(row))?;
            total_rows += 1;
        }

        if config.progress_every > 0 && (done % config.progress_every == 0 || done == total) {
            info!(done, total, rows = total_rows, "export progress");
        }
    }

    // 3) Derived CSV and JSON-array views.
    let header = union_header_from_jsonl(&paths.jsonl, &PREFERRED_TRIALS_HEADER)?;
    let csv_rows = write_csv_from_jsonl(&paths.jsonl, &paths.csv, &header)?;
    let json_rows = io::write_json_array_from_jsonl(&paths.jsonl, &paths.json)?;

    let summary = json!({
        "hnids": config.hnids,
        "collections": config.collections.iter().map(|c| c.code()).collect::<Vec<_>>(),
        "n_cids": cids.len(),
        "n_rows": total_rows,
        "n_cids_with_trials": cids_with_trials,
        "n_error_rows": error_rows,
        "jsonl": paths.jsonl,
        "csv": paths.csv,
        "json": paths.json,
        "csv_rows": csv_rows,
        "json_rows": json_rows,
    });
    std::fs::write(&paths.summary, format!("{}\n", serde_json::to_string_pretty(&summary)?))?;

    info!(
        cids = cids.len(),
        rows = total_rows,
        with_trials = cids_with_trials,
        errors = error_rows,
        "trials export complete"
    );

    Ok(ExportTrialsResult {
        n_cids: cids.len(),
        n_rows: total_rows,
        n_cids_with_trials: cids_with_trials,
        n_error_rows: error_rows,
        csv_rows,
        json_rows,
        paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitise_drops_native_id_fields() {
        let mut row: Map<String, Value> = serde_json::from_str(
            r#"{"id":"NCT00000001","ctid":"NCT00000001","eudractnumber":null,"updatedate":"2020-01-01","title":"T"}"#,
        )
        .unwrap();
        sanitise_trial_row(&mut row);
        assert!(row.contains_key("id"));
        assert!(row.contains_key("title"));
        for key in NATIVE_ID_FIELDS {
            assert!(!row.contains_key(key));
        }
    }

    #[test]
    fn test_placeholder_row_is_marked() {
        let row = placeholder_row();
        assert_eq!(row["note"], "no_trials_found");
        assert_eq!(row["id"], Value::Null);
    }

    #[test]
    fn test_csv_view_respects_header_order() {
        let dir = tempfile::tempdir().unwrap();
        let jsonl = dir.path().join("trials.jsonl");
        let csv_path = dir.path().join("trials.csv");
        std::fs::write(
            &jsonl,
            "{\"cid\":11,\"id\":\"NCT00000011\",\"extra\":{\"k\":1}}\n{\"cid\":12,\"status\":\"Done\"}\n",
        )
        .unwrap();

        let header = union_header_from_jsonl(&jsonl, &["cid", "id"]).unwrap();
        assert_eq!(header, vec!["cid", "id", "extra", "status"]);

        let n = write_csv_from_jsonl(&jsonl, &csv_path, &header).unwrap();
        assert_eq!(n, 2);
        let content = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), "cid,id,extra,status");
        assert_eq!(lines.next().unwrap(), "11,NCT00000011,\"{\"\"k\"\":1}\",");
    }
}
