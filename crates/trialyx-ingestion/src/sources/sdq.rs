//! PubChem web (SDQ) client.
//!
//! Endpoint: https://pubchem.ncbi.nlm.nih.gov/sdq/sphinxql.cgi
//!
//! The SDQ endpoint backs the trial tables shown on compound web pages.
//! A query is one nested JSON object passed as a URL parameter, filtered
//! to a single CID and one trial collection. The same client also fetches
//! the rendered compound page HTML, the text-mining fallback of last
//! resort.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use trialyx_common::{HttpClient, Result};

use super::TrialWebSearch;
use crate::models::SdqCollection;

const PUBCHEM_WEB_URL: &str = "https://pubchem.ncbi.nlm.nih.gov";

pub struct PubChemWebClient {
    http: HttpClient,
    base_url: String,
}

impl PubChemWebClient {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: PUBCHEM_WEB_URL.to_string(),
        }
    }

    pub fn with_base_url(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl Default for PubChemWebClient {
    fn default() -> Self {
        Self::new(HttpClient::default())
    }
}

/// The SDQ query object for one (cid, collection) lookup.
fn sdq_query_object(cid: u64, collection: &SdqCollection, limit: usize) -> Value {
    json!({
        "select": "*",
        "collection": collection.code(),
        "order": [collection.default_order()],
        "start": 1,
        "limit": limit,
        "nullatbottom": 1,
        "where": {"ands": [{"cid": cid.to_string()}]},
        "width": 1_000_000,
    })
}

#[async_trait]
impl TrialWebSearch for PubChemWebClient {
    #[instrument(skip(self))]
    async fn sdq_payload(
        &self,
        cid: u64,
        collection: &SdqCollection,
        limit: usize,
    ) -> Result<Value> {
        let query = serde_json::to_string(&sdq_query_object(cid, collection, limit))?;
        let url = format!("{}/sdq/sphinxql.cgi", self.base_url);
        let params = [
            ("infmt", "json".to_string()),
            ("outfmt", "json".to_string()),
            ("query", query),
        ];
        let payload = self.http.get_json(&url, &params).await?;
        debug!(cid, collection = collection.code(), "SDQ payload retrieved");
        Ok(payload)
    }

    #[instrument(skip(self))]
    async fn compound_page_html(&self, cid: u64) -> Result<String> {
        let url = format!("{}/compound/{}", self.base_url, cid);
        self.http.get_text(&url, &[]).await
    }
}
