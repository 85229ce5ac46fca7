//! CID → trial-ID resolution through an ordered fallback chain.
//!
//! Tiers, most to least reliable:
//!   1. Structured annotations in the compound display record
//!   2. Heading-scoped display lookups (when tier 1 is empty or the record
//!      points at an external clinical-trials table)
//!   3. SDQ search, one registry at a time (ClinicalTrials.gov → EU → Japan)
//!   4. Raw compound-page HTML text mining
//!
//! A failing tier never aborts the chain: its failure is captured in the
//! resolution and the next tier runs. The provenance label names exactly
//! which tier produced the result, for downstream auditability.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use trialyx_ingestion::extract::TrialIdExtractor;
use trialyx_ingestion::models::SdqCollection;
use trialyx_ingestion::sources::{CompoundDisplay, TrialWebSearch};

/// Which tier of the fallback chain produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    PugViewAnnotations,
    SdqClinicalTrials,
    SdqEuRegister,
    SdqJapanNiph,
    CompoundPageHtml,
    TermLinkFallback,
    Empty,
}

impl Provenance {
    pub fn label(&self) -> &'static str {
        match self {
            Provenance::PugViewAnnotations => "PubChem PUG-View annotations",
            Provenance::SdqClinicalTrials => {
                "PubChem web clinicaltrials endpoint fallback (sdq)"
            }
            Provenance::SdqEuRegister => {
                "PubChem web EU Clinical Trials Register endpoint fallback (sdq)"
            }
            Provenance::SdqJapanNiph => {
                "PubChem web NIPH Clinical Trials Search of Japan endpoint fallback (sdq)"
            }
            Provenance::CompoundPageHtml => "PubChem web compound page fallback (html)",
            Provenance::TermLinkFallback => "CTGov term-link fallback (no PUG-View NCT IDs)",
            Provenance::Empty => "PubChem web fallback (empty)",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One captured tier failure. The chain records these instead of raising.
#[derive(Debug, Clone)]
pub struct TierFailure {
    pub tier: &'static str,
    pub message: String,
}

impl TierFailure {
    fn new(tier: &'static str, error: &dyn fmt::Display) -> Self {
        Self {
            tier,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_error:{}", self.tier, self.message)
    }
}

/// Outcome of one resolution: sorted unique IDs, the winning tier, and any
/// tier failures encountered along the way.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub ids: Vec<String>,
    pub source: Provenance,
    pub errors: Vec<TierFailure>,
}

impl Resolution {
    /// Joined failure messages, or None when every tier ran clean.
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("|"),
        )
    }
}

/// SDQ registries tried by tier 3, in priority order.
const SDQ_TIERS: [(SdqCollection, Provenance, &str); 3] = [
    (
        SdqCollection::ClinicalTrials,
        Provenance::SdqClinicalTrials,
        "sdq_clinicaltrials",
    ),
    (
        SdqCollection::EuRegister,
        Provenance::SdqEuRegister,
        "sdq_clinicaltrials_eu",
    ),
    (
        SdqCollection::JapanNiph,
        Provenance::SdqJapanNiph,
        "sdq_clinicaltrials_jp",
    ),
];

pub struct NctResolver<'a> {
    display: &'a dyn CompoundDisplay,
    web: &'a dyn TrialWebSearch,
    extractor: TrialIdExtractor,
    sdq_limit: usize,
}

impl<'a> NctResolver<'a> {
    pub fn new(display: &'a dyn CompoundDisplay, web: &'a dyn TrialWebSearch) -> Self {
        Self {
            display,
            web,
            extractor: TrialIdExtractor::new(),
            sdq_limit: 200,
        }
    }

    pub fn with_sdq_limit(mut self, limit: usize) -> Self {
        self.sdq_limit = limit;
        self
    }

    /// Run the chain for one CID. Never errors as a whole: total exhaustion
    /// yields an empty ID list with the reserved empty provenance label.
    #[instrument(skip(self))]
    pub async fn resolve(&self, cid: u64) -> Resolution {
        let mut errors: Vec<TierFailure> = Vec::new();

        // Tier 1: structured annotations in the full display record.
        let mut ids: BTreeSet<String> = BTreeSet::new();
        let mut headings: BTreeSet<String> = self.extractor.clinical_headings(&Value::Null);
        let mut needs_heading_lookup = true;

        match self.display.record(cid).await {
            Ok(payload) => {
                ids = self.extractor.ids_in_payload(&payload);
                headings = self.extractor.clinical_headings(&payload);
                // External-table records may carry no inline IDs at all.
                needs_heading_lookup =
                    ids.is_empty() || self.extractor.has_external_trials_table(&payload);
            }
            Err(e) => {
                warn!(cid, error = %e, "display record fetch failed");
                errors.push(TierFailure::new("pug_view", &e));
            }
        }

        // Tier 2: heading-scoped lookups; failing headings are skipped.
        if needs_heading_lookup {
            for heading in &headings {
                match self.display.record_by_heading(cid, heading).await {
                    Ok(payload) => {
                        ids.extend(self.extractor.ids_in_payload(&payload));
                    }
                    Err(e) => {
                        debug!(cid, heading = %heading, error = %e, "heading lookup failed, skipping");
                    }
                }
            }
        }

        if !ids.is_empty() {
            return Resolution {
                ids: ids.into_iter().collect(),
                source: Provenance::PugViewAnnotations,
                errors,
            };
        }

        // Tier 3: SDQ search per registry, first non-empty registry wins.
        for (collection, provenance, tier) in SDQ_TIERS {
            match self.web.sdq_payload(cid, &collection, self.sdq_limit).await {
                Ok(payload) => {
                    let found = self.extractor.ids_in_all_strings(&payload);
                    if !found.is_empty() {
                        return Resolution {
                            ids: found.into_iter().collect(),
                            source: provenance,
                            errors,
                        };
                    }
                }
                Err(e) => {
                    warn!(cid, collection = collection.code(), error = %e, "SDQ lookup failed");
                    errors.push(TierFailure::new(tier, &e));
                }
            }
        }

        // Tier 4: text-mine the rendered compound page.
        match self.web.compound_page_html(cid).await {
            Ok(html) => {
                let found = self.extractor.ids_in_text(&html);
                if !found.is_empty() {
                    return Resolution {
                        ids: found.into_iter().collect(),
                        source: Provenance::CompoundPageHtml,
                        errors,
                    };
                }
            }
            Err(e) => {
                warn!(cid, error = %e, "compound page fetch failed");
                errors.push(TierFailure::new("compound_page_html", &e));
            }
        }

        Resolution {
            ids: Vec::new(),
            source: Provenance::Empty,
            errors,
        }
    }
}
