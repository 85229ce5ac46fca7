//! PubChem PUG-View client.
//!
//! API docs: https://pubchem.ncbi.nlm.nih.gov/docs/pug-view
//! Endpoint: https://pubchem.ncbi.nlm.nih.gov/rest/pug_view
//!
//! Serves the structured "display" record for a compound (the annotated
//! document the compound web page is rendered from), either in full or
//! scoped to one named heading section.

use async_trait::async_trait;
use serde_json::Value;
use tracing::instrument;

use trialyx_common::{HttpClient, Result};

use super::CompoundDisplay;

const PUG_VIEW_API_URL: &str = "https://pubchem.ncbi.nlm.nih.gov/rest/pug_view";

pub struct PugViewClient {
    http: HttpClient,
    base_url: String,
}

impl PugViewClient {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: PUG_VIEW_API_URL.to_string(),
        }
    }

    pub fn with_base_url(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn record_url(&self, cid: u64) -> String {
        format!("{}/data/compound/{}/JSON", self.base_url, cid)
    }
}

impl Default for PugViewClient {
    fn default() -> Self {
        Self::new(HttpClient::default())
    }
}

#[async_trait]
impl CompoundDisplay for PugViewClient {
    #[instrument(skip(self))]
    async fn record(&self, cid: u64) -> Result<Value> {
        let params = [("response_type", "display".to_string())];
        self.http.get_json(&self.record_url(cid), &params).await
    }

    #[instrument(skip(self))]
    async fn record_by_heading(&self, cid: u64, heading: &str) -> Result<Value> {
        let params = [
            ("heading", heading.to_string()),
            ("response_type", "display".to_string()),
        ];
        self.http.get_json(&self.record_url(cid), &params).await
    }
}
