//! Fuzzy compound → trial linking via term search.
//!
//! Expands a CID into candidate search terms (synonyms, plus a short IUPAC
//! name as the priority term), queries the trial registry per term in two
//! modes (intervention-scoped, free-text), and scores each returned study
//! by textual evidence. Only matches at or above the score threshold are
//! kept, (cid, trial-id) pairs are first-match-wins, and the whole search
//! short-circuits once the per-CID link cap is reached.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use trialyx_common::Result;
use trialyx_ingestion::models::{QueryMode, StudyQuery};
use trialyx_ingestion::sources::{CompoundDirectory, TrialRegistry};

/// IUPAC names longer than this are skipped as search terms; long
/// systematic names never match registry free text.
const MAX_IUPAC_TERM_LEN: usize = 40;

#[derive(Debug, Clone)]
pub struct LinkerConfig {
    pub max_synonyms: usize,
    pub page_size: usize,
    pub max_pages_per_term: usize,
    pub min_score: i32,
    pub max_links_per_cid: usize,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            max_synonyms: 20,
            page_size: 100,
            max_pages_per_term: 2,
            min_score: 2,
            max_links_per_cid: 50,
        }
    }
}

impl LinkerConfig {
    /// Cheaper profile used when the linker runs as a resolver fallback
    /// rather than as the primary discovery path.
    pub fn fallback_profile() -> Self {
        Self {
            max_synonyms: 12,
            page_size: 50,
            max_pages_per_term: 1,
            min_score: 2,
            max_links_per_cid: 30,
        }
    }
}

/// Why one study was accepted for one search term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEvidence {
    pub term: String,
    pub query_mode: QueryMode,
    pub score: i32,
    pub reasons: Vec<String>,
}

/// One accepted (cid, trial-id) link with its evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkResult {
    pub cid: u64,
    pub nct_id: String,
    pub evidence: LinkEvidence,
}

pub struct CompoundTrialLinker<'a> {
    pubchem: &'a dyn CompoundDirectory,
    registry: &'a dyn TrialRegistry,
    config: LinkerConfig,
}

impl<'a> CompoundTrialLinker<'a> {
    pub fn new(pubchem: &'a dyn CompoundDirectory, registry: &'a dyn TrialRegistry) -> Self {
        Self::with_config(pubchem, registry, LinkerConfig::default())
    }

    pub fn with_config(
        pubchem: &'a dyn CompoundDirectory,
        registry: &'a dyn TrialRegistry,
        config: LinkerConfig,
    ) -> Self {
        Self {
            pubchem,
            registry,
            config,
        }
    }

    /// Candidate search terms for one CID.
    async fn candidate_terms(&self, cid: u64) -> Result<Vec<String>> {
        let mut terms = self.pubchem.synonyms(cid, self.config.max_synonyms).await?;
        let props = self.pubchem.compound_properties(cid).await?;

        if let Some(iupac) = props.iupac_name {
            let iupac = iupac.trim();
            if !iupac.is_empty()
                && iupac.len() <= MAX_IUPAC_TERM_LEN
                && !terms.iter().any(|t| t == iupac)
            {
                terms.insert(0, iupac.to_string());
            }
        }
        Ok(terms)
    }

    #[instrument(skip(self))]
    pub async fn link_cid(&self, cid: u64) -> Result<Vec<LinkResult>> {
        let terms = self.candidate_terms(cid).await?;
        debug!(cid, n_terms = terms.len(), "linking CID against trial registry");

        let mut results: Vec<LinkResult> = Vec::new();
        let mut seen_ncts: HashSet<String> = HashSet::new();

        for term in &terms {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let scorer = TermScorer::new(term);

            for (mode, mut query) in [
                (QueryMode::Intr, StudyQuery::intervention(term)),
                (QueryMode::Term, StudyQuery::free_text(term)),
            ] {
                query.page_size = self.config.page_size;
                let studies = self
                    .registry
                    .collect_studies(&query, Some(self.config.max_pages_per_term), None)
                    .await?;

                for study in &studies {
                    let Some(nct) = extract_nct_id(study) else {
                        continue;
                    };

                    let (score, reasons) = scorer.score(study);
                    if score < self.config.min_score {
                        continue;
                    }
                    // First match wins; a later, higher-scoring duplicate
                    // for the same pair is discarded.
                    if !seen_ncts.insert(nct.clone()) {
                        continue;
                    }

                    results.push(LinkResult {
                        cid,
                        nct_id: nct,
                        evidence: LinkEvidence {
                            term: term.to_string(),
                            query_mode: mode,
                            score,
                            reasons,
                        },
                    });

                    if results.len() >= self.config.max_links_per_cid {
                        return Ok(results);
                    }
                }
            }
        }

        Ok(results)
    }
}

/// Trial identifier out of a study document: the nested v2 location first,
/// then the legacy top-level field name variants.
pub fn extract_nct_id(study: &Value) -> Option<String> {
    let nested = study
        .get("protocolSection")
        .and_then(|ps| ps.get("identificationModule"))
        .and_then(|im| im.get("nctId"))
        .and_then(|v| v.as_str());
    if let Some(nct) = nested {
        let nct = nct.trim();
        if !nct.is_empty() {
            return Some(nct.to_string());
        }
    }
    for key in ["nctId", "NCTId", "nct_id"] {
        if let Some(nct) = study.get(key).and_then(|v| v.as_str()) {
            let nct = nct.trim();
            if !nct.is_empty() {
                return Some(nct.to_string());
            }
        }
    }
    None
}

/// Lowercase and collapse runs of whitespace.
fn norm_text(s: &str) -> String {
    s.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scoring evidence over the study's core text fields for one term.
struct TermScorer {
    term: String,
    whole_word: Option<Regex>,
}

impl TermScorer {
    fn new(term: &str) -> Self {
        let term = norm_text(term);
        let whole_word = if term.is_empty() {
            None
        } else {
            Regex::new(&format!(
                "(^|[^a-z0-9]){}([^a-z0-9]|$)",
                regex::escape(&term)
            ))
            .ok()
        };
        Self { term, whole_word }
    }

    /// +2 for a substring hit in the core fields, +1 more for a whole-word
    /// hit in the same blob.
    fn score(&self, study: &Value) -> (i32, Vec<String>) {
        let blob = text_blob(study);
        let mut score = 0;
        let mut reasons = Vec::new();

        if !self.term.is_empty() && blob.contains(&self.term) {
            score += 2;
            reasons.push("term_found_in_core_fields(+2)".to_string());
        }
        if let Some(ref re) = self.whole_word {
            if re.is_match(&blob) {
                score += 1;
                reasons.push("term_whole_word_match(+1)".to_string());
            }
        }
        (score, reasons)
    }
}

/// Normalised concatenation of the study's title, official title, overall
/// status, conditions, and intervention names.
fn text_blob(study: &Value) -> String {
    let ps = study.get("protocolSection").cloned().unwrap_or(Value::Null);

    let ident = ps.get("identificationModule");
    let title = ident
        .and_then(|m| m.get("briefTitle"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let official = ident
        .and_then(|m| m.get("officialTitle"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let status = ps
        .get("statusModule")
        .and_then(|m| m.get("overallStatus"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let conditions = ps
        .get("conditionsModule")
        .and_then(|m| m.get("conditions"))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    let interventions = ps
        .get("interventionsModule")
        .and_then(|m| m.get("interventions"))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|it| it.get("name").and_then(|v| v.as_str()))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();

    norm_text(&format!(
        "{title} {official} {status} {conditions} {interventions}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trialyx_ingestion::models::CompoundProperties;

    struct StubCompounds {
        synonyms: Vec<String>,
        iupac: Option<String>,
    }

    #[async_trait]
    impl CompoundDirectory for StubCompounds {
        async fn compound_properties(&self, _cid: u64) -> trialyx_common::Result<CompoundProperties> {
            Ok(CompoundProperties {
                iupac_name: self.iupac.clone(),
                ..Default::default()
            })
        }

        async fn synonyms(&self, _cid: u64, max_items: usize) -> trialyx_common::Result<Vec<String>> {
            Ok(self.synonyms.iter().take(max_items).cloned().collect())
        }

        async fn cids_by_name(&self, _name: &str) -> trialyx_common::Result<Vec<u64>> {
            Ok(vec![])
        }
    }

    struct StubRegistry {
        studies: Vec<Value>,
        search_calls: AtomicUsize,
    }

    impl StubRegistry {
        fn returning(studies: Vec<Value>) -> Self {
            Self {
                studies,
                search_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TrialRegistry for StubRegistry {
        async fn search_studies(&self, _query: &StudyQuery) -> trialyx_common::Result<Value> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"studies": self.studies}))
        }

        async fn get_study(
            &self,
            _trial_id: &str,
            _fields: Option<&[String]>,
        ) -> trialyx_common::Result<Value> {
            Ok(json!({}))
        }
    }

    fn study(nct: &str, title: &str) -> Value {
        json!({
            "protocolSection": {
                "identificationModule": {"nctId": nct, "briefTitle": title},
                "statusModule": {"overallStatus": "Completed"},
            }
        })
    }

    #[tokio::test]
    async fn test_aspirin_scenario_threshold() {
        let compounds = StubCompounds {
            synonyms: vec!["Aspirin".to_string()],
            iupac: None,
        };
        let registry = StubRegistry::returning(vec![study("NCT01561508", "Aspirin trial")]);

        let linker = CompoundTrialLinker::new(&compounds, &registry);
        let links = linker.link_cid(2244).await.unwrap();
        assert_eq!(links.len(), 1);
        assert!(links[0].evidence.score >= 2);
        assert_eq!(links[0].nct_id, "NCT01561508");
        assert_eq!(links[0].evidence.query_mode, QueryMode::Intr);

        // Raising the threshold past the achievable score yields nothing.
        let strict = CompoundTrialLinker::with_config(
            &compounds,
            &registry,
            LinkerConfig {
                min_score: 5,
                ..Default::default()
            },
        );
        assert!(strict.link_cid(2244).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_whole_word_bonus() {
        let compounds = StubCompounds {
            synonyms: vec!["Aspirin".to_string()],
            iupac: None,
        };
        // "aspirin" appears as a whole word: substring +2 and whole-word +1.
        let registry = StubRegistry::returning(vec![study("NCT00000001", "Aspirin in adults")]);
        let linker = CompoundTrialLinker::new(&compounds, &registry);
        let links = linker.link_cid(1).await.unwrap();
        assert_eq!(links[0].evidence.score, 3);
        assert_eq!(links[0].evidence.reasons.len(), 2);

        // Embedded substring only: +2, no whole-word bonus.
        let registry = StubRegistry::returning(vec![study("NCT00000002", "Polyaspirinate study")]);
        let linker = CompoundTrialLinker::new(&compounds, &registry);
        let links = linker.link_cid(1).await.unwrap();
        assert_eq!(links[0].evidence.score, 2);
    }

    #[tokio::test]
    async fn test_duplicate_pairs_first_match_wins() {
        let compounds = StubCompounds {
            synonyms: vec!["Aspirin".to_string(), "Acetylsalicylic acid".to_string()],
            iupac: None,
        };
        // The same study comes back for both query modes and both terms.
        let registry = StubRegistry::returning(vec![study("NCT01561508", "Aspirin trial")]);
        let linker = CompoundTrialLinker::new(&compounds, &registry);

        let links = linker.link_cid(2244).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].evidence.term, "Aspirin");
    }

    #[tokio::test]
    async fn test_cap_short_circuits_remaining_terms() {
        let compounds = StubCompounds {
            synonyms: vec!["Aspirin".to_string(), "Acetylsalicylic acid".to_string()],
            iupac: None,
        };
        let registry = StubRegistry::returning(vec![
            study("NCT00000001", "Aspirin one"),
            study("NCT00000002", "Aspirin two"),
        ]);
        let linker = CompoundTrialLinker::with_config(
            &compounds,
            &registry,
            LinkerConfig {
                max_links_per_cid: 2,
                ..Default::default()
            },
        );

        let links = linker.link_cid(2244).await.unwrap();
        assert_eq!(links.len(), 2);
        // Cap hit inside the first term's first query mode: the free-text
        // mode and the second term are never searched.
        assert_eq!(registry.search_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_iupac_name_becomes_priority_term() {
        let compounds = StubCompounds {
            synonyms: vec!["2-acetyloxybenzoic acid".to_string()],
            iupac: Some("aspirin".to_string()),
        };
        let registry = StubRegistry::returning(vec![study("NCT00000001", "Aspirin trial")]);
        let linker = CompoundTrialLinker::new(&compounds, &registry);

        let links = linker.link_cid(2244).await.unwrap();
        assert_eq!(links[0].evidence.term, "aspirin");
    }

    #[tokio::test]
    async fn test_long_iupac_name_is_not_a_term() {
        let long_name = "3-[2-[4-(6-fluoro-1,2-benzoxazol-3-yl)piperidin-1-yl]ethyl]-2-methyl-6,7,8,9-tetrahydropyrido[1,2-a]pyrimidin-4-one";
        let compounds = StubCompounds {
            synonyms: vec!["Risperidone".to_string()],
            iupac: Some(long_name.to_string()),
        };
        let registry = StubRegistry::returning(vec![]);
        let linker = CompoundTrialLinker::new(&compounds, &registry);
        let terms = linker.candidate_terms(1).await.unwrap();
        assert_eq!(terms, vec!["Risperidone"]);
    }

    #[test]
    fn test_extract_nct_id_field_locations() {
        assert_eq!(
            extract_nct_id(&study("NCT01561508", "t")).as_deref(),
            Some("NCT01561508")
        );
        assert_eq!(
            extract_nct_id(&json!({"NCTId": " NCT00000001 "})).as_deref(),
            Some("NCT00000001")
        );
        assert_eq!(
            extract_nct_id(&json!({"nct_id": "NCT00000002"})).as_deref(),
            Some("NCT00000002")
        );
        assert!(extract_nct_id(&json!({"nctId": "  "})).is_none());
        assert!(extract_nct_id(&json!({})).is_none());
    }

    #[test]
    fn test_norm_text_collapses_whitespace() {
        assert_eq!(norm_text("  Aspirin\t In  Adults "), "aspirin in adults");
    }
}
