//! PubChem classification-node client.
//!
//! Endpoint: https://pubchem.ncbi.nlm.nih.gov/rest/pug/classification
//! Maps a classification node (HNID) to the compound IDs grouped under it,
//! e.g. the "has clinical trial data" nodes.

use async_trait::async_trait;
use tracing::{debug, instrument};

use trialyx_common::{HttpClient, Result};

use super::ClassificationNodes;

const CLASSIFICATION_API_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug/classification";

/// Known clinical-trial classification nodes (hid=72).
pub const HNID_CLINICAL_TRIALS: u32 = 1_856_916;
pub const HNID_CLINICALTRIALS_GOV: u32 = 3_647_573;
pub const HNID_EU_CLINICAL_TRIALS_REGISTER: u32 = 3_647_574;
pub const HNID_JAPAN_NIPH_CLINICAL_TRIALS: u32 = 3_647_575;

pub struct PubChemClassificationClient {
    http: HttpClient,
    base_url: String,
}

impl PubChemClassificationClient {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: CLASSIFICATION_API_URL.to_string(),
        }
    }

    pub fn with_base_url(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl Default for PubChemClassificationClient {
    fn default() -> Self {
        Self::new(HttpClient::default())
    }
}

#[async_trait]
impl ClassificationNodes for PubChemClassificationClient {
    /// HNID -> CID list. The TXT format returns one numeric ID per line.
    #[instrument(skip(self))]
    async fn cids_for_node(&self, hnid: u32) -> Result<Vec<u64>> {
        let url = format!("{}/hnid/{}/cids/TXT", self.base_url, hnid);
        let text = self.http.get_text(&url, &[]).await?;

        let cids: Vec<u64> = text
            .split_whitespace()
            .filter_map(|token| token.parse().ok())
            .collect();
        debug!(hnid, n = cids.len(), "classification node CIDs retrieved");
        Ok(cids)
    }
}
