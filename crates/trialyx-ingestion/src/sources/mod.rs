//! Upstream source clients.
//!
//! One capability trait per external collaborator, so the pipeline can be
//! exercised against stub implementations in tests and the production
//! clients stay interchangeable.

pub mod classification;
pub mod ctgov;
pub mod pubchem;
pub mod pug_view;
pub mod sdq;

pub use classification::PubChemClassificationClient;
pub use ctgov::CtGovClient;
pub use pubchem::PubChemClient;
pub use pug_view::PugViewClient;
pub use sdq::PubChemWebClient;

use async_trait::async_trait;
use serde_json::Value;

use trialyx_common::Result;

use crate::models::{CompoundProperties, SdqCollection, StudyQuery};

/// Classification-node lookups: a grouping node (HNID) to its compound IDs.
#[async_trait]
pub trait ClassificationNodes: Send + Sync {
    async fn cids_for_node(&self, hnid: u32) -> Result<Vec<u64>>;
}

/// Compound metadata lookups against the chemical database.
#[async_trait]
pub trait CompoundDirectory: Send + Sync {
    async fn compound_properties(&self, cid: u64) -> Result<CompoundProperties>;

    /// Synonyms in upstream order, deduplicated, capped at `max_items`.
    async fn synonyms(&self, cid: u64, max_items: usize) -> Result<Vec<String>>;

    async fn cids_by_name(&self, name: &str) -> Result<Vec<u64>>;
}

/// Structured display records for a compound, full or scoped to one heading.
#[async_trait]
pub trait CompoundDisplay: Send + Sync {
    async fn record(&self, cid: u64) -> Result<Value>;

    async fn record_by_heading(&self, cid: u64, heading: &str) -> Result<Value>;
}

/// Public web-search fallbacks: per-registry SDQ queries and, as a last
/// resort, the rendered compound page HTML.
#[async_trait]
pub trait TrialWebSearch: Send + Sync {
    async fn sdq_payload(&self, cid: u64, collection: &SdqCollection, limit: usize)
        -> Result<Value>;

    async fn compound_page_html(&self, cid: u64) -> Result<String>;
}

/// The trial registry proper: paged study search and full study documents.
#[async_trait]
pub trait TrialRegistry: Send + Sync {
    /// Fetch a single result page.
    async fn search_studies(&self, query: &StudyQuery) -> Result<Value>;

    /// Fetch the full document for one trial identifier.
    async fn get_study(&self, trial_id: &str, fields: Option<&[String]>) -> Result<Value>;

    /// Follow `nextPageToken` pagination until exhaustion or a cap.
    async fn collect_studies(
        &self,
        query: &StudyQuery,
        max_pages: Option<usize>,
        max_results: Option<usize>,
    ) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        let mut token = query.page_token.clone();
        let mut pages = 0usize;
        loop {
            let mut page_query = query.clone();
            page_query.page_token = token;
            let payload = self.search_studies(&page_query).await?;

            if let Some(studies) = payload.get("studies").and_then(|v| v.as_array()) {
                for study in studies {
                    out.push(study.clone());
                    if let Some(max) = max_results {
                        if out.len() >= max {
                            return Ok(out);
                        }
                    }
                }
            }

            token = payload
                .get("nextPageToken")
                .and_then(|v| v.as_str())
                .map(String::from);
            pages += 1;
            if token.is_none() {
                break;
            }
            if let Some(max) = max_pages {
                if pages >= max {
                    break;
                }
            }
        }
        Ok(out)
    }
}
