//! Trials-dataset export over stub upstream clients: union rows across
//! collections, placeholder rows, derived CSV/JSON views, and resume.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use trialyx_common::Result;
use trialyx_ingestion::models::{CompoundProperties, SdqCollection};
use trialyx_ingestion::sources::{ClassificationNodes, CompoundDirectory, TrialWebSearch};
use trialyx_pipeline::export::{export_trials_dataset, ExportTrialsConfig};

struct StubNodes;

#[async_trait]
impl ClassificationNodes for StubNodes {
    async fn cids_for_node(&self, _hnid: u32) -> Result<Vec<u64>> {
        Ok(vec![11, 12])
    }
}

struct StubCompounds;

#[async_trait]
impl CompoundDirectory for StubCompounds {
    async fn compound_properties(&self, cid: u64) -> Result<CompoundProperties> {
        Ok(CompoundProperties {
            inchikey: Some(format!("KEY-{cid}")),
            canonical_smiles: Some("CC(=O)O".to_string()),
            iupac_name: Some("acetic acid".to_string()),
        })
    }

    async fn synonyms(&self, _cid: u64, _max: usize) -> Result<Vec<String>> {
        Ok(vec![])
    }

    async fn cids_by_name(&self, _name: &str) -> Result<Vec<u64>> {
        Ok(vec![])
    }
}

/// CID 11 has one trial in each of two registries; CID 12 has none.
struct StubWeb;

#[async_trait]
impl TrialWebSearch for StubWeb {
    async fn sdq_payload(
        &self,
        cid: u64,
        collection: &SdqCollection,
        _limit: usize,
    ) -> Result<Value> {
        let mut rows: HashMap<(u64, &str), Value> = HashMap::new();
        rows.insert(
            (11, "clinicaltrials"),
            json!({
                "ctid": "NCT00000011",
                "updatedate": "2020-01-01",
                "link": "https://clinicaltrials.gov/study/NCT00000011",
                "title": "Trial eleven",
                "phase": "Phase 2",
                "status": "Completed",
            }),
        );
        rows.insert(
            (11, "clinicaltrials_eu"),
            json!({
                "eudractnumber": "2011-000801-30",
                "date": "2012-05-10",
                "title": "EU trial eleven",
                "sponsor": "Acme",
            }),
        );

        match rows.remove(&(cid, collection.code())) {
            Some(row) => Ok(json!({"SDQOutputSet": [{"rows": [row]}]})),
            None => Ok(json!({"SDQOutputSet": [{"rows": []}]})),
        }
    }

    async fn compound_page_html(&self, _cid: u64) -> Result<String> {
        Ok(String::new())
    }
}

#[tokio::test]
async fn test_export_union_rows_and_derived_views() {
    let tmp = tempfile::tempdir().unwrap();
    let config = ExportTrialsConfig::new(vec![1_856_916], tmp.path());

    let result = export_trials_dataset(&config, &StubNodes, &StubCompounds, &StubWeb)
        .await
        .unwrap();

    // CID 11 contributes two rows (one per registry), CID 12 a placeholder.
    assert_eq!(result.n_cids, 2);
    assert_eq!(result.n_rows, 3);
    assert_eq!(result.n_cids_with_trials, 1);
    assert_eq!(result.n_error_rows, 0);
    assert_eq!(result.csv_rows, 3);
    assert_eq!(result.json_rows, 3);

    let rows = trialyx_common::io::read_jsonl(&result.paths.jsonl).unwrap();

    // Normalised identifiers; native field names are gone from the export.
    assert_eq!(rows[0]["id"], "NCT00000011");
    assert_eq!(rows[0]["date"], "2020-01-01");
    assert_eq!(rows[0]["collection"], "ClinicalTrials.gov");
    assert!(rows[0].get("ctid").is_none());
    assert!(rows[0].get("updatedate").is_none());

    // EU row keyed on its EudraCT number, registry-specific field kept.
    assert_eq!(rows[1]["id"], "2011-000801-30");
    assert_eq!(rows[1]["collection"], "EU Clinical Trials Register");
    assert_eq!(rows[1]["sponsor"], "Acme");

    // Placeholder row for the trial-less CID, still enriched with props.
    assert_eq!(rows[2]["note"], "no_trials_found");
    assert_eq!(rows[2]["cid"], 12);
    assert_eq!(rows[2]["inchikey"], "KEY-12");

    // CSV header leads with the preferred columns that actually occur.
    let csv = std::fs::read_to_string(&result.paths.csv).unwrap();
    let header = csv.lines().next().unwrap();
    assert!(header.starts_with("cid,collection,id,id_url,title,phase,status,date,smiles,inchikey,iupac_name,compound_error"));

    // Enumerated CIDs were persisted.
    assert_eq!(
        std::fs::read_to_string(&result.paths.cids_txt).unwrap(),
        "11\n12\n"
    );
    assert!(result.paths.summary.exists());
}

#[tokio::test]
async fn test_export_resume_skips_covered_cids() {
    let tmp = tempfile::tempdir().unwrap();
    let config = ExportTrialsConfig::new(vec![1_856_916], tmp.path());

    export_trials_dataset(&config, &StubNodes, &StubCompounds, &StubWeb)
        .await
        .unwrap();

    let resumed = ExportTrialsConfig {
        resume: true,
        ..config
    };
    let second = export_trials_dataset(&resumed, &StubNodes, &StubCompounds, &StubWeb)
        .await
        .unwrap();

    // Nothing new was appended; derived views still cover the full file.
    assert_eq!(second.n_rows, 0);
    assert_eq!(second.csv_rows, 3);
    assert_eq!(second.json_rows, 3);
    let rows = trialyx_common::io::read_jsonl(&second.paths.jsonl).unwrap();
    assert_eq!(rows.len(), 3);
}
