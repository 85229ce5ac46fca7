//! trialyx — compound → clinical-trial linkage pipeline.
//! Entry point for the CLI binary.

mod config;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use trialyx_common::{HttpClient, Result, TrialyxError};
use trialyx_ingestion::models::SdqCollection;
use trialyx_ingestion::sources::{
    classification::{
        HNID_CLINICALTRIALS_GOV, HNID_CLINICAL_TRIALS, HNID_EU_CLINICAL_TRIALS_REGISTER,
        HNID_JAPAN_NIPH_CLINICAL_TRIALS,
    },
    ClassificationNodes, CompoundDirectory, CtGovClient, PubChemClassificationClient,
    PubChemClient, PubChemWebClient, PugViewClient,
};
use trialyx_pipeline::collect::{collect_ctgov_docs, CollectConfig};
use trialyx_pipeline::dataset::{build_dataset_for_cids, DatasetBuildConfig};
use trialyx_pipeline::export::{export_trials_dataset, ExportTrialsConfig};
use trialyx_pipeline::history::{update_history, HistoryConfig};
use trialyx_pipeline::links::{export_cids_nct_dataset, CidLinkConfig};
use trialyx_pipeline::merge::merge_trials_shards;
use trialyx_pipeline::resolver::NctResolver;

#[derive(Parser)]
#[command(
    name = "trialyx",
    version,
    about = "Collect clinical-trial metadata linked to chemical compounds"
)]
struct Cli {
    /// Path to trialyx.toml (defaults: $TRIALYX_CONFIG, then ./trialyx.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download CID lists for clinical-trial classification nodes
    FetchCids {
        /// Comma-separated HNIDs; defaults to the four known trial nodes
        #[arg(long)]
        hnids: Option<String>,
        #[arg(long, default_value = "out_hnid")]
        out_dir: PathBuf,
    },

    /// Resolve CIDs to trial IDs and export link records (no documents)
    MapCidNct {
        /// CID to map; repeatable
        #[arg(long = "cid")]
        cids: Vec<u64>,
        /// File with one CID per line
        #[arg(long)]
        cids_file: Option<PathBuf>,
        #[arg(long, default_value = "out_nct")]
        out_dir: PathBuf,
        /// Run the fuzzy term linker when all resolver tiers come up empty
        #[arg(long)]
        use_fallback: bool,
        /// Skip the compounds.jsonl properties sidecar
        #[arg(long)]
        skip_compound_props: bool,
        /// Abort on the first per-CID failure instead of recording it
        #[arg(long)]
        fail_fast: bool,
        #[arg(long, default_value_t = 0)]
        progress_every: usize,
    },

    /// Build compounds/links/studies datasets via the fuzzy linker
    BuildDataset {
        /// Compound name to resolve via PubChem (e.g. aspirin)
        #[arg(long)]
        name: Option<String>,
        /// PubChem CID
        #[arg(long)]
        cid: Option<u64>,
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,
    },

    /// Streaming collection: HNIDs -> CIDs -> NCT IDs -> study documents
    CollectDocs {
        /// Comma-separated source HNIDs
        #[arg(long, required = true)]
        hnids: String,
        #[arg(long, default_value = "out_ctgov_docs")]
        out_dir: PathBuf,
        #[arg(long)]
        limit_cids: Option<usize>,
        /// Global cap on trial-document fetches
        #[arg(long)]
        limit_ncts: Option<usize>,
        /// Comma-separated field list for study fetches (default: full docs)
        #[arg(long)]
        fields: Option<String>,
        #[arg(long)]
        use_fallback: bool,
        /// Skip CIDs and trial documents already present in the output dir
        #[arg(long)]
        resume: bool,
        #[arg(long)]
        fail_fast: bool,
        #[arg(long, default_value_t = 25)]
        progress_every: usize,
    },

    /// Export the per-CID SDQ trials dataset (JSONL/CSV/JSON)
    ExportTrials {
        #[arg(long, default_value_t = HNID_CLINICAL_TRIALS)]
        hnid: u32,
        /// Comma-separated extra HNIDs
        #[arg(long)]
        extra_hnids: Option<String>,
        #[arg(long, default_value = "clinicaltrials,clinicaltrials_eu,clinicaltrials_jp")]
        collections: String,
        #[arg(long, default_value_t = 200)]
        limit_per_collection: usize,
        #[arg(long)]
        limit_cids: Option<usize>,
        #[arg(long, default_value = "out/pubchem_trials_dataset")]
        out_dir: PathBuf,
        /// Skip CIDs already present in trials.jsonl
        #[arg(long)]
        resume: bool,
        #[arg(long, default_value_t = 50)]
        progress_every: usize,
    },

    /// Merge trials datasets collected in independent shard directories
    MergeShards {
        /// Comma-separated shard output directories
        #[arg(long, required = true)]
        shard_dirs: String,
        #[arg(long, required = true)]
        out_dir: PathBuf,
    },

    /// Track a dataset file: change detection, latest copy, snapshots
    UpdateHistory {
        #[arg(long, required = true)]
        dataset_file: PathBuf,
        #[arg(long, default_value = "snapshots/collection_state.json")]
        state_file: PathBuf,
        #[arg(long, required = true)]
        latest_file: PathBuf,
        #[arg(long, default_value = "snapshots/history")]
        history_dir: PathBuf,
        /// UTC timestamp override (RFC 3339, e.g. 2026-02-10T00:00:00Z)
        #[arg(long)]
        timestamp: Option<String>,
        /// Delete snapshots older than this many days
        #[arg(long)]
        retention_days: Option<i64>,
        /// Snapshot only when content changed (default: every run)
        #[arg(long)]
        snapshot_on_change: bool,
        /// Write "true"/"false" for workflow automation
        #[arg(long)]
        changed_flag_path: Option<PathBuf>,
    },
}

fn parse_csv_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(String::from)
        .collect()
}

fn parse_hnids(value: &str) -> Result<Vec<u32>> {
    parse_csv_list(value)
        .iter()
        .map(|x| {
            x.parse()
                .map_err(|_| TrialyxError::Config(format!("invalid HNID: {x}")))
        })
        .collect()
}

fn node_label(hnid: u32) -> String {
    match hnid {
        HNID_CLINICAL_TRIALS => "clinical_trials".to_string(),
        HNID_CLINICALTRIALS_GOV => "clinicaltrials_gov".to_string(),
        HNID_EU_CLINICAL_TRIALS_REGISTER => "eu_register".to_string(),
        HNID_JAPAN_NIPH_CLINICAL_TRIALS => "japan_niph".to_string(),
        other => format!("hnid_{other}"),
    }
}

fn read_cids_file(path: &PathBuf) -> Result<Vec<u64>> {
    let text = std::fs::read_to_string(path)?;
    text.split_whitespace()
        .map(|x| {
            x.parse()
                .map_err(|_| TrialyxError::Config(format!("invalid CID in {}: {x}", path.display())))
        })
        .collect()
}

/// Short human-readable diagnosis for common failure signatures.
fn diagnose(error: &TrialyxError) -> &'static str {
    match error {
        TrialyxError::Http(e) if e.is_connect() => {
            "network error: could not reach the upstream host (DNS or connectivity failure)"
        }
        TrialyxError::Http(e) if e.is_timeout() => "request timed out",
        TrialyxError::Api { status: 429, .. } => "rate limited by the upstream service",
        TrialyxError::Api {
            status: 408 | 503 | 504,
            ..
        } => "upstream unavailable (transient errors exhausted after retries)",
        TrialyxError::Api { .. } => "upstream returned an HTTP error",
        TrialyxError::Http(_) => "HTTP request failed",
        TrialyxError::InvalidPayload { .. } => "upstream returned a malformed payload",
        TrialyxError::Io(_) => "file I/O failed",
        TrialyxError::Config(_) => "invalid configuration or arguments",
        _ => "run failed",
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trialyx=info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("error: {}", diagnose(&e));
        eprintln!("  caused by: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load(cli.config.as_deref())?;
    let http = HttpClient::new(config.http.to_http_config())?;

    match cli.command {
        Command::FetchCids { hnids, out_dir } => {
            let hnids = match hnids {
                Some(ref csv) => parse_hnids(csv)?,
                None => vec![
                    HNID_CLINICAL_TRIALS,
                    HNID_CLINICALTRIALS_GOV,
                    HNID_EU_CLINICAL_TRIALS_REGISTER,
                    HNID_JAPAN_NIPH_CLINICAL_TRIALS,
                ],
            };
            let nodes = PubChemClassificationClient::new(http);
            trialyx_common::io::ensure_dir(&out_dir)?;

            for hnid in hnids {
                let cids = nodes.cids_for_node(hnid).await?;
                let path = out_dir.join(format!("{}_cids.txt", node_label(hnid)));
                let mut txt = cids.iter().map(|c| c.to_string()).collect::<Vec<_>>().join("\n");
                txt.push('\n');
                std::fs::write(&path, txt)?;
                info!(hnid, n_cids = cids.len(), path = %path.display(), "CID list saved");
                println!("{}: {} CIDs -> {}", node_label(hnid), cids.len(), path.display());
            }
        }

        Command::MapCidNct {
            cids,
            cids_file,
            out_dir,
            use_fallback,
            skip_compound_props,
            fail_fast,
            progress_every,
        } => {
            let mut all_cids = cids;
            if let Some(ref path) = cids_file {
                all_cids.extend(read_cids_file(path)?);
            }
            if all_cids.is_empty() {
                return Err(TrialyxError::Config(
                    "provide --cid or --cids-file".to_string(),
                ));
            }

            let pubchem = PubChemClient::new(http.clone());
            let display = PugViewClient::new(http.clone());
            let web = PubChemWebClient::new(http.clone());
            let registry = CtGovClient::new(http);
            let resolver = NctResolver::new(&display, &web);
            let link_config = CidLinkConfig {
                include_compound_props: !skip_compound_props,
                use_term_fallback: use_fallback,
                linker: config.fallback.to_linker_config(),
                fail_fast,
            };

            let outputs = export_cids_nct_dataset(
                &all_cids,
                &out_dir,
                &resolver,
                &pubchem,
                &registry,
                &link_config,
                progress_every,
            )
            .await?;
            println!("cid_nct_links: {}", outputs.links.display());
            if let Some(compounds) = outputs.compounds {
                println!("compounds: {}", compounds.display());
            }
        }

        Command::BuildDataset { name, cid, out_dir } => {
            let pubchem = PubChemClient::new(http.clone());
            let registry = CtGovClient::new(http);

            let cids: Vec<u64> = if let Some(cid) = cid {
                vec![cid]
            } else if let Some(ref name) = name {
                let resolved = pubchem.cids_by_name(name).await?;
                resolved.into_iter().take(1).collect()
            } else {
                return Err(TrialyxError::Config("provide --name or --cid".to_string()));
            };
            if cids.is_empty() {
                return Err(TrialyxError::Pipeline(format!(
                    "no CID found for name: {}",
                    name.unwrap_or_default()
                )));
            }

            let mut build_config = DatasetBuildConfig::new(out_dir);
            build_config.linker = config.linker.to_linker_config();
            let outputs = build_dataset_for_cids(&cids, &pubchem, &registry, &build_config).await?;
            println!("compounds: {}", outputs.compounds.display());
            println!("links: {}", outputs.links.display());
            println!("studies: {}", outputs.studies.display());
        }

        Command::CollectDocs {
            hnids,
            out_dir,
            limit_cids,
            limit_ncts,
            fields,
            use_fallback,
            resume,
            fail_fast,
            progress_every,
        } => {
            let nodes = PubChemClassificationClient::new(http.clone());
            let pubchem = PubChemClient::new(http.clone());
            let display = PugViewClient::new(http.clone());
            let web = PubChemWebClient::new(http.clone());
            let registry = CtGovClient::new(http);

            let collect_config = CollectConfig {
                hnids: parse_hnids(&hnids)?,
                out_dir,
                limit_cids,
                limit_ncts,
                ctgov_fields: fields.as_deref().map(parse_csv_list),
                use_term_fallback: use_fallback,
                linker: config.fallback.to_linker_config(),
                resume,
                progress_every,
                fail_fast,
            };

            let result =
                collect_ctgov_docs(&collect_config, &nodes, &display, &web, &pubchem, &registry)
                    .await?;
            println!("cids: {}", result.cids_count);
            println!("nct_ids_mapped: {}", result.nct_ids_total_mapped);
            println!("nct_unique_seen: {}", result.nct_unique_seen);
            println!("nct_fetched: {}", result.nct_fetched);
            println!("elapsed_sec: {:.1}", result.elapsed_sec);
            println!("links: {}", result.paths.links.display());
            println!("studies: {}", result.paths.studies.display());
        }

        Command::ExportTrials {
            hnid,
            extra_hnids,
            collections,
            limit_per_collection,
            limit_cids,
            out_dir,
            resume,
            progress_every,
        } => {
            let mut hnids = vec![hnid];
            if let Some(ref extra) = extra_hnids {
                hnids.extend(parse_hnids(extra)?);
            }

            let nodes = PubChemClassificationClient::new(http.clone());
            let pubchem = PubChemClient::new(http.clone());
            let web = PubChemWebClient::new(http);

            let export_config = ExportTrialsConfig {
                collections: parse_csv_list(&collections)
                    .iter()
                    .map(|code| SdqCollection::from_code(code))
                    .collect(),
                limit_per_collection,
                limit_cids,
                resume,
                progress_every,
                ..ExportTrialsConfig::new(hnids, out_dir)
            };

            let result = export_trials_dataset(&export_config, &nodes, &pubchem, &web).await?;
            println!("cids: {}", result.n_cids);
            println!("rows: {}", result.n_rows);
            println!("cids_with_trials: {}", result.n_cids_with_trials);
            println!("error_rows: {}", result.n_error_rows);
            println!("jsonl: {}", result.paths.jsonl.display());
            println!("csv: {}", result.paths.csv.display());
            println!("json: {}", result.paths.json.display());
            println!("summary: {}", result.paths.summary.display());
        }

        Command::MergeShards {
            shard_dirs,
            out_dir,
        } => {
            let dirs: Vec<PathBuf> = parse_csv_list(&shard_dirs).into_iter().map(PathBuf::from).collect();
            let summary = merge_trials_shards(&dirs, &out_dir)?;
            println!("shards: {}", summary.n_shards);
            println!("input_rows: {}", summary.n_input_rows);
            println!("rows: {}", summary.n_rows);
            println!("cids: {}", summary.n_cids);
            println!("jsonl: {}", summary.jsonl.display());
            println!("csv: {}", summary.csv.display());
            println!("json: {}", summary.json.display());
        }

        Command::UpdateHistory {
            dataset_file,
            state_file,
            latest_file,
            history_dir,
            timestamp,
            retention_days,
            snapshot_on_change,
            changed_flag_path,
        } => {
            let timestamp = match timestamp {
                Some(ref raw) => Some(
                    DateTime::parse_from_rfc3339(raw)
                        .map_err(|e| {
                            TrialyxError::Config(format!("invalid --timestamp {raw}: {e}"))
                        })?
                        .with_timezone(&Utc),
                ),
                None => None,
            };

            let history_config = HistoryConfig {
                dataset_file,
                state_file: state_file.clone(),
                latest_file: latest_file.clone(),
                history_dir,
                timestamp,
                retention_days,
                snapshot_on_change,
                changed_flag_path,
            };
            let outcome = update_history(&history_config)?;
            println!("changed: {}", outcome.changed);
            println!("latest: {}", latest_file.display());
            println!("state: {}", state_file.display());
            if let Some(snapshot) = outcome.snapshot {
                println!("snapshot: {}", snapshot.display());
            }
            println!("pruned_snapshots: {}", outcome.pruned);
            println!("rows: {}", outcome.row_count);
            println!("checksum: {}", outcome.checksum);
        }
    }

    Ok(())
}
