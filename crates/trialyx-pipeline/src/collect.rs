//! Streaming collection pipeline: HNID → CID → NCT → study documents.
//!
//! Flow for one run:
//!   1. Enumerate CIDs from the source classification nodes, deduplicating
//!      while preserving first-seen order, and record per-CID provenance
//!   2. For each CID, resolve its trial IDs through the fallback chain and
//!      append the link/compound rows immediately (the run is interruptible
//!      at any point; resume rebuilds state from the output files alone)
//!   3. Fetch each newly seen trial document once, memoised for the rest of
//!      the run and bounded by the global fetch limit; emit one study row
//!      per referencing CID, tagged with that CID
//!
//! Fully sequential by design: one request in flight at any time.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use trialyx_common::{io, Result, TrialyxError};
use trialyx_ingestion::sources::{
    ClassificationNodes, CompoundDirectory, CompoundDisplay, TrialRegistry, TrialWebSearch,
};

use crate::linker::{extract_nct_id, LinkerConfig};
use crate::links::{map_cid_record, CidLinkConfig};
use crate::resolver::NctResolver;

#[derive(Debug, Clone)]
pub struct CollectConfig {
    pub hnids: Vec<u32>,
    pub out_dir: PathBuf,
    pub limit_cids: Option<usize>,
    pub limit_ncts: Option<usize>,
    pub ctgov_fields: Option<Vec<String>>,
    pub use_term_fallback: bool,
    /// Term-linker profile used when `use_term_fallback` is set.
    pub linker: LinkerConfig,
    pub resume: bool,
    pub progress_every: usize,
    pub fail_fast: bool,
}

impl CollectConfig {
    pub fn new(hnids: Vec<u32>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            hnids,
            out_dir: out_dir.into(),
            limit_cids: None,
            limit_ncts: None,
            ctgov_fields: None,
            use_term_fallback: false,
            linker: LinkerConfig::fallback_profile(),
            resume: false,
            progress_every: 0,
            fail_fast: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectPaths {
    pub cids_txt: PathBuf,
    pub cids_jsonl: PathBuf,
    pub links: PathBuf,
    pub compounds: PathBuf,
    pub map_csv: PathBuf,
    pub studies: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectResult {
    pub cids_count: usize,
    pub nct_ids_total_mapped: usize,
    pub nct_unique_seen: usize,
    pub nct_requested: usize,
    pub nct_fetched: usize,
    pub nct_existing_before_resume: usize,
    pub elapsed_sec: f64,
    pub paths: CollectPaths,
}

/// Enumerate CIDs across the source nodes: first-seen order, deduplicated,
/// with the set of nodes each CID came from. Persists `cids.txt` and
/// `cids.jsonl` before any mapping work starts.
async fn enumerate_cids(
    nodes: &dyn ClassificationNodes,
    hnids: &[u32],
    out_dir: &Path,
    limit: Option<usize>,
) -> Result<(Vec<u64>, CollectPaths)> {
    let mut ordered: Vec<u64> = Vec::new();
    let mut provenance: HashMap<u64, BTreeSet<u32>> = HashMap::new();

    for &hnid in hnids {
        for cid in nodes.cids_for_node(hnid).await? {
            provenance
                .entry(cid)
                .or_insert_with(|| {
                    ordered.push(cid);
                    BTreeSet::new()
                })
                .insert(hnid);
        }
    }

    if let Some(limit) = limit {
        ordered.truncate(limit);
    }

    io::ensure_dir(out_dir)?;
    let paths = CollectPaths {
        cids_txt: out_dir.join("cids.txt"),
        cids_jsonl: out_dir.join("cids.jsonl"),
        links: out_dir.join("cid_nct_links.jsonl"),
        compounds: out_dir.join("compounds.jsonl"),
        map_csv: out_dir.join("cid_nct_map.csv"),
        studies: out_dir.join("studies.jsonl"),
    };

    let mut txt = ordered.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("\n");
    txt.push('\n');
    std::fs::write(&paths.cids_txt, txt)?;

    let rows: Vec<Value> = ordered
        .iter()
        .map(|cid| {
            json!({
                "cid": cid,
                "source_hnids": provenance.get(cid).map(|s| s.iter().collect::<Vec<_>>()).unwrap_or_default(),
            })
        })
        .collect();
    io::write_jsonl(&paths.cids_jsonl, &rows)?;

    Ok((ordered, paths))
}

/// CIDs already present in a prior links file.
fn load_processed_cids(path: &Path) -> Result<HashSet<u64>> {
    let mut seen = HashSet::new();
    for row in io::read_jsonl(path)? {
        if let Some(cid) = row.get("cid").and_then(|v| v.as_u64()) {
            seen.insert(cid);
        }
    }
    Ok(seen)
}

/// Study documents already on disk, keyed by trial ID, first row wins.
fn load_study_cache(path: &Path) -> Result<HashMap<String, Value>> {
    let mut cache = HashMap::new();
    for row in io::read_jsonl(path)? {
        if let Some(nct) = extract_nct_id(&row) {
            cache.entry(nct).or_insert(row);
        }
    }
    Ok(cache)
}

/// Append (cid, nct_id) pairs to the flat CSV map, writing the header when
/// the file does not exist yet.
fn append_map_csv(path: &Path, cid: u64, nct_ids: &[String]) -> Result<()> {
    let new_file = !path.exists();
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if new_file {
        writer
            .write_record(["cid", "nct_id"])
            .map_err(|e| TrialyxError::Pipeline(format!("csv write failed: {e}")))?;
    }
    for nct in nct_ids {
        writer
            .write_record([cid.to_string().as_str(), nct.as_str()])
            .map_err(|e| TrialyxError::Pipeline(format!("csv write failed: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| TrialyxError::Pipeline(format!("csv flush failed: {e}")))?;
    Ok(())
}

/// Run the streaming pipeline. All writes are append-as-you-go; killing
/// the process and re-running with `resume` picks up where it left off.
#[instrument(skip_all, fields(hnids = ?config.hnids, out_dir = %config.out_dir.display()))]
pub async fn collect_ctgov_docs(
    config: &CollectConfig,
    nodes: &dyn ClassificationNodes,
    display: &dyn CompoundDisplay,
    web: &dyn TrialWebSearch,
    pubchem: &dyn CompoundDirectory,
    registry: &dyn TrialRegistry,
) -> Result<CollectResult> {
    let t0 = Instant::now();

    info!("loading CIDs from classification nodes");
    let (cids, paths) =
        enumerate_cids(nodes, &config.hnids, &config.out_dir, config.limit_cids).await?;
    info!(n_cids = cids.len(), "CID enumeration done");

    let processed_cids = if config.resume {
        load_processed_cids(&paths.links)?
    } else {
        HashSet::new()
    };
    let mut study_cache = if config.resume {
        load_study_cache(&paths.studies)?
    } else {
        HashMap::new()
    };
    let existing_before = study_cache.len();
    if config.resume {
        info!(
            processed_cids = processed_cids.len(),
            cached_studies = existing_before,
            "resume state rebuilt from prior output files"
        );
    }

    let resolver = NctResolver::new(display, web);
    let link_config = CidLinkConfig {
        use_term_fallback: config.use_term_fallback,
        linker: config.linker.clone(),
        fail_fast: config.fail_fast,
        ..Default::default()
    };

    let fetch_limit = config.limit_ncts.unwrap_or(usize::MAX);
    let mut nct_requested = 0usize;
    let mut nct_fetched = 0usize;
    let mut nct_total_mapped = 0usize;
    let total = cids.len();

    info!("streaming CID -> NCT -> study documents");
    for (idx, &cid) in cids.iter().enumerate() {
        let done = idx + 1;
        if processed_cids.contains(&cid) {
            if config.progress_every > 0 && (done % config.progress_every == 0 || done == total) {
                info!(cid, done, total, "skipped (resume)");
            }
            continue;
        }

        let record = map_cid_record(cid, &resolver, pubchem, registry, &link_config).await?;
        let nct_ids = record.link.nct_ids.clone();
        nct_total_mapped += nct_ids.len();

        io::append_jsonl(&paths.links, &serde_json::to_value(&record.link)?)?;
        if let Some(compound) = &record.compound {
            io::append_jsonl(&paths.compounds, &serde_json::to_value(compound)?)?;
        }
        append_map_csv(&paths.map_csv, cid, &nct_ids)?;

        for nct in &nct_ids {
            if !study_cache.contains_key(nct) {
                if nct_requested >= fetch_limit {
                    warn!(cid, nct = %nct, "trial fetch limit reached, skipping remaining new IDs");
                    break;
                }
                nct_requested += 1;
                let doc = registry
                    .get_study(nct, config.ctgov_fields.as_deref())
                    .await?;
                study_cache.insert(nct.clone(), doc);
                nct_fetched += 1;
            }

            // Intentionally denormalised: one study row per referencing CID.
            if let Some(doc) = study_cache.get(nct) {
                let mut tagged = doc.clone();
                if let Some(obj) = tagged.as_object_mut() {
                    obj.insert("cid".to_string(), json!(cid));
                }
                io::append_jsonl(&paths.studies, &tagged)?;
            }
        }

        if config.progress_every > 0 && (done % config.progress_every == 0 || done == total) {
            info!(
                cid,
                done,
                total,
                nct_found = nct_ids.len(),
                nct_fetched_total = nct_fetched,
                "CID processed"
            );
        }
    }

    let result = CollectResult {
        cids_count: cids.len(),
        nct_ids_total_mapped: nct_total_mapped,
        nct_unique_seen: study_cache.len(),
        nct_requested,
        nct_fetched,
        nct_existing_before_resume: existing_before,
        elapsed_sec: t0.elapsed().as_secs_f64(),
        paths,
    };
    info!(
        cids = result.cids_count,
        mapped = result.nct_ids_total_mapped,
        fetched = result.nct_fetched,
        elapsed_sec = result.elapsed_sec,
        "collection run complete"
    );
    Ok(result)
}
