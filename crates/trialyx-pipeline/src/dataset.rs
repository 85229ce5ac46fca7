//! Batch dataset builder: compounds, evidence-bearing links, and study
//! documents for a fixed list of CIDs.
//!
//! Every distinct trial referenced by any link is fetched exactly once;
//! the document cache spans the whole CID batch.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::{info, instrument};

use trialyx_common::{io, Result};
use trialyx_ingestion::sources::{CompoundDirectory, TrialRegistry};

use crate::linker::{CompoundTrialLinker, LinkerConfig};

#[derive(Debug, Clone)]
pub struct DatasetBuildConfig {
    pub out_dir: PathBuf,
    pub max_synonyms_in_compound: usize,
    pub linker: LinkerConfig,
}

impl DatasetBuildConfig {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            max_synonyms_in_compound: 30,
            linker: LinkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetOutputs {
    pub compounds: PathBuf,
    pub links: PathBuf,
    pub studies: PathBuf,
}

/// Build the three co-indexed JSONL artifacts for a CID batch.
#[instrument(skip(cids, pubchem, registry, config), fields(n_cids = cids.len()))]
pub async fn build_dataset_for_cids(
    cids: &[u64],
    pubchem: &dyn CompoundDirectory,
    registry: &dyn TrialRegistry,
    config: &DatasetBuildConfig,
) -> Result<DatasetOutputs> {
    io::ensure_dir(&config.out_dir)?;

    let linker = CompoundTrialLinker::with_config(pubchem, registry, config.linker.clone());

    let mut compounds: Vec<Value> = Vec::new();
    let mut links: Vec<Value> = Vec::new();
    let mut studies: Vec<Value> = Vec::new();
    let mut seen_ncts: HashSet<String> = HashSet::new();

    for &cid in cids {
        let props = pubchem.compound_properties(cid).await?;
        let synonyms = pubchem
            .synonyms(cid, config.max_synonyms_in_compound)
            .await?;

        compounds.push(json!({
            "cid": cid,
            "inchikey": props.inchikey,
            "canonical_smiles": props.canonical_smiles,
            "iupac_name": props.iupac_name,
            "synonyms": synonyms,
        }));

        let link_results = linker.link_cid(cid).await?;
        info!(cid, n_links = link_results.len(), "CID linked");

        for link in &link_results {
            links.push(json!({
                "cid": link.cid,
                "nct_id": link.nct_id,
                "match_term": link.evidence.term,
                "query_mode": link.evidence.query_mode,
                "score": link.evidence.score,
                "reasons": link.evidence.reasons,
            }));

            if seen_ncts.insert(link.nct_id.clone()) {
                studies.push(registry.get_study(&link.nct_id, None).await?);
            }
        }
    }

    let outputs = DatasetOutputs {
        compounds: config.out_dir.join("compounds.jsonl"),
        links: config.out_dir.join("links.jsonl"),
        studies: config.out_dir.join("studies.jsonl"),
    };
    io::write_jsonl(&outputs.compounds, &compounds)?;
    io::write_jsonl(&outputs.links, &links)?;
    io::write_jsonl(&outputs.studies, &studies)?;

    info!(
        n_compounds = compounds.len(),
        n_links = links.len(),
        n_studies = studies.len(),
        "dataset build complete"
    );
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trialyx_ingestion::models::{CompoundProperties, StudyQuery};

    struct StubCompounds;

    #[async_trait]
    impl CompoundDirectory for StubCompounds {
        async fn compound_properties(&self, _cid: u64) -> trialyx_common::Result<CompoundProperties> {
            Ok(CompoundProperties {
                inchikey: Some("BSYNRYMUTXBXSQ-UHFFFAOYSA-N".to_string()),
                canonical_smiles: Some("CC(=O)OC1=CC=CC=C1C(=O)O".to_string()),
                iupac_name: None,
            })
        }

        async fn synonyms(&self, _cid: u64, _max: usize) -> trialyx_common::Result<Vec<String>> {
            Ok(vec!["Aspirin".to_string()])
        }

        async fn cids_by_name(&self, _name: &str) -> trialyx_common::Result<Vec<u64>> {
            Ok(vec![])
        }
    }

    struct StubRegistry {
        get_study_calls: AtomicUsize,
    }

    #[async_trait]
    impl TrialRegistry for StubRegistry {
        async fn search_studies(&self, _query: &StudyQuery) -> trialyx_common::Result<Value> {
            Ok(json!({"studies": [{
                "protocolSection": {
                    "identificationModule": {"nctId": "NCT01561508", "briefTitle": "Aspirin trial"}
                }
            }]}))
        }

        async fn get_study(
            &self,
            trial_id: &str,
            _fields: Option<&[String]>,
        ) -> trialyx_common::Result<Value> {
            self.get_study_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"protocolSection": {"identificationModule": {"nctId": trial_id}}}))
        }
    }

    #[tokio::test]
    async fn test_study_documents_fetched_once_across_batch() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StubRegistry {
            get_study_calls: AtomicUsize::new(0),
        };
        let config = DatasetBuildConfig::new(dir.path());

        // Two CIDs linking to the same trial: one document fetch, one study row.
        let outputs = build_dataset_for_cids(&[2244, 2245], &StubCompounds, &registry, &config)
            .await
            .unwrap();

        assert_eq!(registry.get_study_calls.load(Ordering::SeqCst), 1);
        assert_eq!(io::read_jsonl(&outputs.studies).unwrap().len(), 1);
        assert_eq!(io::read_jsonl(&outputs.links).unwrap().len(), 2);
        assert_eq!(io::read_jsonl(&outputs.compounds).unwrap().len(), 2);

        let link = &io::read_jsonl(&outputs.links).unwrap()[0];
        assert_eq!(link["nct_id"], "NCT01561508");
        assert_eq!(link["query_mode"], "intr");
        assert!(link["score"].as_i64().unwrap() >= 2);
    }
}
