//! Data models shared by source clients, normalisers, and the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Basic compound properties from the PubChem PUG property table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompoundProperties {
    pub inchikey: Option<String>,
    pub canonical_smiles: Option<String>,
    pub iupac_name: Option<String>,
}

impl CompoundProperties {
    /// Parse one row of a PUG `PropertyTable`.
    /// Some CIDs return `ConnectivitySMILES` only; normalise it onto the
    /// canonical key.
    pub fn from_property_row(row: &Value) -> Self {
        let get = |key: &str| row.get(key).and_then(|v| v.as_str()).map(String::from);
        let canonical = get("CanonicalSMILES")
            .filter(|s| !s.is_empty())
            .or_else(|| get("ConnectivitySMILES"));
        Self {
            inchikey: get("InChIKey"),
            canonical_smiles: canonical,
            iupac_name: get("IUPACName"),
        }
    }
}

/// Trial collections served by the PubChem SDQ endpoint.
///
/// Three registries are known; anything else passes its raw code through
/// as the label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SdqCollection {
    ClinicalTrials,
    EuRegister,
    JapanNiph,
    Other(String),
}

impl SdqCollection {
    pub fn from_code(code: &str) -> Self {
        match code {
            "clinicaltrials" => SdqCollection::ClinicalTrials,
            "clinicaltrials_eu" => SdqCollection::EuRegister,
            "clinicaltrials_jp" => SdqCollection::JapanNiph,
            other => SdqCollection::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            SdqCollection::ClinicalTrials => "clinicaltrials",
            SdqCollection::EuRegister => "clinicaltrials_eu",
            SdqCollection::JapanNiph => "clinicaltrials_jp",
            SdqCollection::Other(code) => code,
        }
    }

    /// Human-readable registry label used in normalised rows.
    pub fn label(&self) -> &str {
        match self {
            SdqCollection::ClinicalTrials => "ClinicalTrials.gov",
            SdqCollection::EuRegister => "EU Clinical Trials Register",
            SdqCollection::JapanNiph => "NIPH Clinical Trials Search of Japan",
            SdqCollection::Other(code) => code,
        }
    }

    /// Default SDQ sort order. The EU and Japan collections key on `date`;
    /// ClinicalTrials.gov keys on `updatedate`.
    pub fn default_order(&self) -> &'static str {
        match self {
            SdqCollection::EuRegister | SdqCollection::JapanNiph => "date,desc",
            _ => "updatedate,desc",
        }
    }
}

/// How a trial-registry search query was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Scoped to the intervention-name field.
    Intr,
    /// Free-text search.
    Term,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Intr => "intr",
            QueryMode::Term => "term",
        }
    }
}

/// One page worth of ClinicalTrials.gov search parameters.
#[derive(Debug, Clone, Default)]
pub struct StudyQuery {
    pub cond: Option<String>,
    pub intr: Option<String>,
    pub term: Option<String>,
    pub fields: Option<Vec<String>>,
    pub sort: Option<String>,
    pub page_size: usize,
    pub page_token: Option<String>,
    pub count_total: bool,
}

impl StudyQuery {
    pub fn intervention(term: &str) -> Self {
        Self {
            intr: Some(term.to_string()),
            page_size: 50,
            ..Default::default()
        }
    }

    pub fn free_text(term: &str) -> Self {
        Self {
            term: Some(term.to_string()),
            page_size: 50,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connectivity_smiles_fallback() {
        let row = json!({
            "ConnectivitySMILES": "CC(=O)OC1=CC=CC=C1C(=O)O",
            "InChIKey": "BSYNRYMUTXBXSQ-UHFFFAOYSA-N",
        });
        let props = CompoundProperties::from_property_row(&row);
        assert_eq!(
            props.canonical_smiles.as_deref(),
            Some("CC(=O)OC1=CC=CC=C1C(=O)O")
        );
        assert!(props.iupac_name.is_none());
    }

    #[test]
    fn test_collection_labels() {
        assert_eq!(SdqCollection::ClinicalTrials.label(), "ClinicalTrials.gov");
        assert_eq!(
            SdqCollection::from_code("clinicaltrials_eu").label(),
            "EU Clinical Trials Register"
        );
        // Unknown collections pass their raw code through
        let other = SdqCollection::from_code("clinicaltrials_kr");
        assert_eq!(other.label(), "clinicaltrials_kr");
        assert_eq!(other.default_order(), "updatedate,desc");
    }

    #[test]
    fn test_query_mode_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&QueryMode::Intr).unwrap(), "\"intr\"");
        assert_eq!(QueryMode::Term.as_str(), "term");
    }
}
