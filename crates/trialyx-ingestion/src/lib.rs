//! trialyx-ingestion — Upstream source clients and payload mining.
//! - Capability traits + production clients for the three upstream services
//!   (PubChem PUG/PUG-View/SDQ, ClinicalTrials.gov v2)
//! - Trial-ID text mining over arbitrary nested payloads
//! - Registry row normalisation and union-schema alignment

pub mod extract;
pub mod models;
pub mod normalise;
pub mod sources;
