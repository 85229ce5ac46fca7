//! CID → NCT link records.
//!
//! The coarse-grained lane used by the streaming pipeline: one record per
//! CID carrying the resolved registry IDs and a single provenance label.
//! When the resolver comes up empty, the fuzzy linker can optionally take
//! over as a final fallback; its per-link evidence is collapsed to the ID
//! set here (the evidence-bearing lane is `dataset::build_dataset_for_cids`).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use trialyx_common::{io, Result, TrialyxError};
use trialyx_ingestion::sources::{CompoundDirectory, TrialRegistry};

use crate::linker::{CompoundTrialLinker, LinkerConfig};
use crate::resolver::{NctResolver, Provenance};

/// One `cid_nct_links.jsonl` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CidNctLink {
    pub cid: u64,
    pub nct_ids: Vec<String>,
    pub n_nct: usize,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One `compounds.jsonl` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompoundRow {
    pub cid: u64,
    pub inchikey: Option<String>,
    pub canonical_smiles: Option<String>,
    pub iupac_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synonyms: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Link row plus optional compound-properties sidecar for one CID.
#[derive(Debug, Clone)]
pub struct CidRecord {
    pub link: CidNctLink,
    pub compound: Option<CompoundRow>,
}

#[derive(Debug, Clone)]
pub struct CidLinkConfig {
    pub include_compound_props: bool,
    pub use_term_fallback: bool,
    pub linker: LinkerConfig,
    pub fail_fast: bool,
}

impl Default for CidLinkConfig {
    fn default() -> Self {
        Self {
            include_compound_props: true,
            use_term_fallback: false,
            linker: LinkerConfig::fallback_profile(),
            fail_fast: false,
        }
    }
}

/// Build the link record (and optional compound row) for a single CID.
///
/// In the default non-fail-fast mode every failure is captured as an
/// `error` string on the affected row and processing continues; with
/// `fail_fast` the first failure propagates.
#[instrument(skip(resolver, pubchem, registry, config))]
pub async fn map_cid_record(
    cid: u64,
    resolver: &NctResolver<'_>,
    pubchem: &dyn CompoundDirectory,
    registry: &dyn TrialRegistry,
    config: &CidLinkConfig,
) -> Result<CidRecord> {
    let resolution = resolver.resolve(cid).await;
    let mut errors: Vec<String> = resolution.error_summary().into_iter().collect();
    if config.fail_fast {
        if let Some(summary) = resolution.error_summary() {
            return Err(TrialyxError::Pipeline(format!("cid {cid}: {summary}")));
        }
    }

    let mut nct_ids = resolution.ids;
    let mut source = resolution.source;

    if nct_ids.is_empty() && config.use_term_fallback {
        let linker = CompoundTrialLinker::with_config(pubchem, registry, config.linker.clone());
        match linker.link_cid(cid).await {
            Ok(links) => {
                let unique: BTreeSet<String> = links.into_iter().map(|l| l.nct_id).collect();
                if !unique.is_empty() {
                    nct_ids = unique.into_iter().collect();
                    source = Provenance::TermLinkFallback;
                }
            }
            Err(e) => {
                if config.fail_fast {
                    return Err(e);
                }
                errors.push(format!("ctgov_fallback_error:{e}"));
            }
        }
    }

    let link = CidNctLink {
        cid,
        n_nct: nct_ids.len(),
        nct_ids,
        source: source.label().to_string(),
        error: if errors.is_empty() {
            None
        } else {
            Some(errors.join("|"))
        },
    };

    let compound = if config.include_compound_props {
        Some(match pubchem.compound_properties(cid).await {
            Ok(props) => CompoundRow {
                cid,
                inchikey: props.inchikey,
                canonical_smiles: props.canonical_smiles,
                iupac_name: props.iupac_name,
                synonyms: None,
                error: None,
            },
            Err(e) => {
                if config.fail_fast {
                    return Err(e);
                }
                CompoundRow {
                    cid,
                    inchikey: None,
                    canonical_smiles: None,
                    iupac_name: None,
                    synonyms: None,
                    error: Some(format!("compound_props_error:{e}")),
                }
            }
        })
    } else {
        None
    };

    Ok(CidRecord { link, compound })
}

#[derive(Debug, Clone)]
pub struct ExportLinksOutputs {
    pub links: PathBuf,
    pub compounds: Option<PathBuf>,
}

/// Batch lane: resolve every CID and write `cid_nct_links.jsonl` (and the
/// `compounds.jsonl` sidecar) in one pass, no document fetching.
pub async fn export_cids_nct_dataset(
    cids: &[u64],
    out_dir: &Path,
    resolver: &NctResolver<'_>,
    pubchem: &dyn CompoundDirectory,
    registry: &dyn TrialRegistry,
    config: &CidLinkConfig,
    progress_every: usize,
) -> Result<ExportLinksOutputs> {
    io::ensure_dir(out_dir)?;

    let mut link_rows = Vec::with_capacity(cids.len());
    let mut compound_rows = Vec::new();

    let total = cids.len();
    for (idx, &cid) in cids.iter().enumerate() {
        let record = map_cid_record(cid, resolver, pubchem, registry, config).await?;
        link_rows.push(serde_json::to_value(&record.link)?);
        if let Some(compound) = record.compound {
            compound_rows.push(serde_json::to_value(&compound)?);
        }

        let done = idx + 1;
        if progress_every > 0 && (done % progress_every == 0 || done == total) {
            info!(done, total, "CID -> NCT mapping progress");
        }
    }

    let links_path = out_dir.join("cid_nct_links.jsonl");
    io::write_jsonl(&links_path, &link_rows)?;

    let compounds_path = if config.include_compound_props {
        let path = out_dir.join("compounds.jsonl");
        io::write_jsonl(&path, &compound_rows)?;
        Some(path)
    } else {
        None
    };

    Ok(ExportLinksOutputs {
        links: links_path,
        compounds: compounds_path,
    })
}
