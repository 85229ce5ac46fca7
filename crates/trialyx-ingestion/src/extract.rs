//! Trial-ID text mining over arbitrary nested JSON payloads and raw HTML.
//!
//! PUG-View display records bury ClinicalTrials.gov references at wildly
//! varying depths, so extraction is an unbounded recursive descent over
//! every string value. Results are always deduplicated, uppercased, and
//! sorted (`BTreeSet` iteration order).

use std::collections::BTreeSet;

use regex::Regex;
use serde_json::Value;

/// Fixed heading candidates always probed for heading-scoped lookups.
const HEADING_CANDIDATES: [&str; 5] = [
    "ClinicalTrials.gov",
    "Clinical Trials",
    "ClinicalTrials",
    "Drug and Medication Information",
    "Drug-and-Medication-Information",
];

/// Compiled trial-ID mining patterns, built once and injected into the
/// components that need them.
#[derive(Debug, Clone)]
pub struct TrialIdExtractor {
    trial_id: Regex,
    registry_host: Regex,
    clinical_trials: Regex,
    drug_med_info: Regex,
}

impl TrialIdExtractor {
    pub fn new() -> Self {
        Self {
            trial_id: Regex::new(r"(?i)\bNCT\d{8}\b").unwrap(),
            registry_host: Regex::new(r"(?i)clinicaltrials\.gov").unwrap(),
            clinical_trials: Regex::new(r"(?i)clinical\s*trials?(\.gov)?").unwrap(),
            drug_med_info: Regex::new(r"(?i)drug(?:\s|-|&|and)+medication(?:\s|-)+information")
                .unwrap(),
        }
    }

    /// All trial IDs in a raw string, uppercased and sorted.
    pub fn ids_in_text(&self, text: &str) -> BTreeSet<String> {
        self.trial_id
            .find_iter(text)
            .map(|m| m.as_str().to_uppercase())
            .collect()
    }

    /// Trial IDs in a structured payload.
    ///
    /// Two scopes: `URL` members whose value points at the registry host,
    /// and any string value that hints at the registry (contains `nct` or
    /// the host name). Keeps mining away from unrelated identifiers that
    /// happen to look numeric.
    pub fn ids_in_payload(&self, payload: &Value) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();

        walk(payload, &mut |value| {
            if let Value::Object(map) = value {
                if let Some(Value::String(url)) = map.get("URL") {
                    if self.registry_host.is_match(url) {
                        ids.extend(self.ids_in_text(url));
                    }
                }
            }
            if let Value::String(s) = value {
                let lower = s.to_lowercase();
                if lower.contains("nct") || lower.contains("clinicaltrials.gov") {
                    ids.extend(self.ids_in_text(s));
                }
            }
        });

        ids
    }

    /// Trial IDs in every string value, with no scoping hints.
    /// Used for SDQ payloads, where every row is already trial data.
    pub fn ids_in_all_strings(&self, payload: &Value) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        walk(payload, &mut |value| {
            if let Value::String(s) = value {
                ids.extend(self.ids_in_text(s));
            }
        });
        ids
    }

    /// Whether the record declares an external clinical-trials data table.
    /// Such records often carry no inline NCT IDs in the default payload.
    pub fn has_external_trials_table(&self, payload: &Value) -> bool {
        let mut found = false;
        walk(payload, &mut |value| {
            if found {
                return;
            }
            if let Value::Object(map) = value {
                if let Some(Value::String(name)) = map.get("ExternalTableName") {
                    if self.clinical_trials.is_match(name) {
                        found = true;
                    }
                }
            }
        });
        found
    }

    /// Heading labels worth a scoped follow-up query: the fixed candidate
    /// set plus any heading-like value in the record matching the clinical
    /// trials or drug-and-medication-information keyword patterns.
    pub fn clinical_headings(&self, payload: &Value) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = HEADING_CANDIDATES.iter().map(|s| s.to_string()).collect();

        walk(payload, &mut |value| {
            if let Value::Object(map) = value {
                for key in ["TOCHeading", "Name", "Heading", "Title"] {
                    if let Some(Value::String(label)) = map.get(key) {
                        if self.clinical_trials.is_match(label) || self.drug_med_info.is_match(label)
                        {
                            out.insert(label.trim().to_string());
                        }
                    }
                }
            }
        });

        out
    }
}

impl Default for TrialIdExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Visit a value and every value reachable beneath it.
fn walk<'a>(value: &'a Value, visit: &mut dyn FnMut(&'a Value)) {
    visit(value);
    match value {
        Value::Object(map) => {
            for v in map.values() {
                walk(v, visit);
            }
        }
        Value::Array(arr) => {
            for v in arr {
                walk(v, visit);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_in_text_sorted_deduplicated_uppercased() {
        let ex = TrialIdExtractor::new();
        let ids: Vec<String> = ex
            .ids_in_text("Referenced study NCT76543210 and also nct00000001, then NCT76543210 again")
            .into_iter()
            .collect();
        assert_eq!(ids, vec!["NCT00000001", "NCT76543210"]);
    }

    #[test]
    fn test_ids_in_text_requires_exactly_eight_digits() {
        let ex = TrialIdExtractor::new();
        assert!(ex.ids_in_text("NCT1234567").is_empty());
        assert!(ex.ids_in_text("NCT123456789").is_empty());
        assert_eq!(ex.ids_in_text("NCT12345678").len(), 1);
    }

    #[test]
    fn test_ids_in_payload_scopes_to_registry_urls() {
        let ex = TrialIdExtractor::new();
        let payload = json!({
            "Section": [
                {"URL": "https://clinicaltrials.gov/study/NCT01561508"},
                {"URL": "https://example.org/other/NCT99999999"},
            ]
        });
        let ids: Vec<String> = ex.ids_in_payload(&payload).into_iter().collect();
        assert_eq!(ids, vec!["NCT01561508"]);
    }

    #[test]
    fn test_ids_in_payload_picks_up_hinted_strings() {
        let ex = TrialIdExtractor::new();
        let payload = json!({
            "Information": [
                {"Value": {"StringWithMarkup": [{"String": "See NCT04267848 for details"}]}},
                {"Value": "unrelated 12345678"},
            ]
        });
        let ids: Vec<String> = ex.ids_in_payload(&payload).into_iter().collect();
        assert_eq!(ids, vec!["NCT04267848"]);
    }

    #[test]
    fn test_ids_in_all_strings_is_unscoped() {
        let ex = TrialIdExtractor::new();
        let payload = json!({
            "SDQOutputSet": [{"rows": [{"ctid": "NCT01561508", "title": "A trial"}]}]
        });
        assert_eq!(ex.ids_in_all_strings(&payload).len(), 1);
    }

    #[test]
    fn test_external_table_detection() {
        let ex = TrialIdExtractor::new();
        let with = json!({"Section": [{"ExternalTableName": "clinicaltrials"}]});
        let without = json!({"Section": [{"ExternalTableName": "patents"}]});
        assert!(ex.has_external_trials_table(&with));
        assert!(!ex.has_external_trials_table(&without));
    }

    #[test]
    fn test_clinical_headings_include_fixed_and_dynamic() {
        let ex = TrialIdExtractor::new();
        let payload = json!({
            "Record": {
                "Section": [
                    {"TOCHeading": "Clinical Trials (International)"},
                    {"TOCHeading": "Safety and Hazards"},
                ]
            }
        });
        let headings = ex.clinical_headings(&payload);
        assert!(headings.contains("ClinicalTrials.gov"));
        assert!(headings.contains("Clinical Trials (International)"));
        assert!(!headings.contains("Safety and Hazards"));
    }

    #[test]
    fn test_clinical_headings_on_null_payload_are_the_fixed_set() {
        let ex = TrialIdExtractor::new();
        assert_eq!(ex.clinical_headings(&Value::Null).len(), HEADING_CANDIDATES.len());
    }
}
