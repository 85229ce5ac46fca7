//! PubChem PUG REST client.
//!
//! API docs: https://pubchem.ncbi.nlm.nih.gov/docs/pug-rest
//! Endpoint: https://pubchem.ncbi.nlm.nih.gov/rest/pug
//!
//! Serves compound properties (SMILES, InChIKey, IUPAC name), synonym
//! lists, and name -> CID resolution.

use async_trait::async_trait;
use tracing::{debug, instrument};
use url::Url;

use trialyx_common::{HttpClient, Result, TrialyxError};

use super::CompoundDirectory;
use crate::models::CompoundProperties;

const PUG_API_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug";

const PROPERTY_LIST: &str = "CanonicalSMILES,ConnectivitySMILES,InChIKey,IUPACName";

pub struct PubChemClient {
    http: HttpClient,
    base_url: Url,
}

impl PubChemClient {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: Url::parse(PUG_API_URL).unwrap(),
        }
    }

    pub fn with_base_url(http: HttpClient, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TrialyxError::Config(format!("invalid PUG base URL {base_url}: {e}")))?;
        Ok(Self { http, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        url.path_segments_mut().unwrap().extend(segments);
        url.to_string()
    }
}

impl Default for PubChemClient {
    fn default() -> Self {
        Self::new(HttpClient::default())
    }
}

#[async_trait]
impl CompoundDirectory for PubChemClient {
    #[instrument(skip(self))]
    async fn compound_properties(&self, cid: u64) -> Result<CompoundProperties> {
        let url = self.endpoint(&["compound", "cid", &cid.to_string(), "property", PROPERTY_LIST, "JSON"]);
        let data = self.http.get_json(&url, &[]).await?;

        let row = data
            .get("PropertyTable")
            .and_then(|v| v.get("Properties"))
            .and_then(|v| v.as_array())
            .and_then(|rows| rows.first())
            .ok_or_else(|| TrialyxError::InvalidPayload {
                url,
                detail: format!("no properties for CID {cid}"),
            })?;

        Ok(CompoundProperties::from_property_row(row))
    }

    #[instrument(skip(self))]
    async fn synonyms(&self, cid: u64, max_items: usize) -> Result<Vec<String>> {
        let url = self.endpoint(&["compound", "cid", &cid.to_string(), "synonyms", "JSON"]);
        let data = self.http.get_json(&url, &[]).await?;

        let raw = data
            .get("InformationList")
            .and_then(|v| v.get("Information"))
            .and_then(|v| v.as_array())
            .and_then(|info| info.first())
            .and_then(|first| first.get("Synonym"))
            .and_then(|v| v.as_array());

        let mut out: Vec<String> = Vec::new();
        if let Some(arr) = raw {
            for value in arr {
                let Some(s) = value.as_str() else { continue };
                let trimmed = s.trim();
                if trimmed.is_empty() || out.iter().any(|seen| seen == trimmed) {
                    continue;
                }
                out.push(trimmed.to_string());
                if out.len() >= max_items {
                    break;
                }
            }
        }
        debug!(cid, n = out.len(), "synonyms retrieved");
        Ok(out)
    }

    #[instrument(skip(self))]
    async fn cids_by_name(&self, name: &str) -> Result<Vec<u64>> {
        let url = self.endpoint(&["compound", "name", name, "cids", "JSON"]);
        let data = self.http.get_json(&url, &[]).await?;

        let cids = data
            .get("IdentifierList")
            .and_then(|v| v.get("CID"))
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_u64()).collect())
            .unwrap_or_default();
        Ok(cids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_encodes_name_segments() {
        let client = PubChemClient::default();
        let url = client.endpoint(&["compound", "name", "acetyl salicylic acid", "cids", "JSON"]);
        assert!(url.ends_with("/compound/name/acetyl%20salicylic%20acid/cids/JSON"));
    }

    #[test]
    fn test_endpoint_keeps_property_list_inline() {
        let client = PubChemClient::default();
        let url = client.endpoint(&["compound", "cid", "2244", "property", PROPERTY_LIST, "JSON"]);
        assert!(url.contains("property/CanonicalSMILES,ConnectivitySMILES,InChIKey,IUPACName/JSON"));
    }
}
