//! trialyx-pipeline — Compound → clinical-trial linkage and dataset assembly.
//! - CID → NCT resolution through a four-tier fallback chain
//! - Fuzzy term-based compound-trial linking with scored evidence
//! - Batch and streaming dataset builders (resumable, append-as-you-go)
//! - Shard merge by whole-row content signature
//! - Dataset history tracking (checksums, snapshots, retention)

pub mod collect;
pub mod dataset;
pub mod export;
pub mod history;
pub mod links;
pub mod linker;
pub mod merge;
pub mod resolver;
