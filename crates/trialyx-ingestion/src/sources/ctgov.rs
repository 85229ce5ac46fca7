//! ClinicalTrials.gov v2 API client.
//!
//! API docs: https://clinicaltrials.gov/data-api/api
//! Endpoint: https://clinicaltrials.gov/api/v2/studies
//!
//! Search results are paginated via `nextPageToken`; paging itself lives
//! in the `TrialRegistry::collect_studies` default method.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use trialyx_common::{HttpClient, Result};

use super::TrialRegistry;
use crate::models::StudyQuery;

const CT_API_URL: &str = "https://clinicaltrials.gov/api/v2";

const MAX_PAGE_SIZE: usize = 1_000;

pub struct CtGovClient {
    http: HttpClient,
    base_url: String,
}

impl CtGovClient {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            base_url: CT_API_URL.to_string(),
        }
    }

    pub fn with_base_url(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

impl Default for CtGovClient {
    fn default() -> Self {
        Self::new(HttpClient::default())
    }
}

/// Join a field list: trimmed, empties dropped, order-preserving dedup.
fn normalise_fields(fields: &[String]) -> Option<String> {
    let mut unique: Vec<&str> = Vec::new();
    for field in fields {
        let f = field.trim();
        if f.is_empty() || unique.contains(&f) {
            continue;
        }
        unique.push(f);
    }
    if unique.is_empty() {
        None
    } else {
        Some(unique.join(","))
    }
}

#[async_trait]
impl TrialRegistry for CtGovClient {
    #[instrument(skip(self, query))]
    async fn search_studies(&self, query: &StudyQuery) -> Result<Value> {
        let page_size = query.page_size.clamp(1, MAX_PAGE_SIZE);
        let mut params: Vec<(&str, String)> = vec![
            ("pageSize", page_size.to_string()),
            ("countTotal", query.count_total.to_string()),
        ];
        if let Some(ref cond) = query.cond {
            params.push(("query.cond", cond.clone()));
        }
        if let Some(ref intr) = query.intr {
            params.push(("query.intr", intr.clone()));
        }
        if let Some(ref term) = query.term {
            params.push(("query.term", term.clone()));
        }
        if let Some(ref sort) = query.sort {
            params.push(("sort", sort.clone()));
        }
        if let Some(ref fields) = query.fields {
            if let Some(joined) = normalise_fields(fields) {
                params.push(("fields", joined));
            }
        }
        if let Some(ref token) = query.page_token {
            params.push(("pageToken", token.clone()));
        }

        let url = format!("{}/studies", self.base_url);
        let payload = self.http.get_json(&url, &params).await?;
        debug!(
            n = payload.get("studies").and_then(|v| v.as_array()).map_or(0, |a| a.len()),
            "study page retrieved"
        );
        Ok(payload)
    }

    #[instrument(skip(self, fields))]
    async fn get_study(&self, trial_id: &str, fields: Option<&[String]>) -> Result<Value> {
        let url = format!("{}/studies/{}", self.base_url, trial_id);
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(joined) = fields.and_then(|f| normalise_fields(f)) {
            params.push(("fields", joined));
        }
        self.http.get_json(&url, &params).await
    }
}
