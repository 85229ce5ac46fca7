//! Configuration loading for trialyx.
//! Reads trialyx.toml from the current directory or the path in the
//! TRIALYX_CONFIG env var; everything has a default, so no file is needed.

use std::path::Path;

use serde::{Deserialize, Serialize};

use trialyx_common::{HttpConfig, Result, TrialyxError};
use trialyx_pipeline::linker::LinkerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub http: HttpSection,
    pub linker: LinkerSection,
    pub fallback: FallbackSection,
}

impl Config {
    /// Load from an explicit path (must exist), else TRIALYX_CONFIG, else
    /// ./trialyx.toml, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = std::env::var("TRIALYX_CONFIG") {
            return Self::from_file(Path::new(&path));
        }
        let default_path = Path::new("trialyx.toml");
        if default_path.exists() {
            return Self::from_file(default_path);
        }
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrialyxError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&text)
            .map_err(|e| TrialyxError::Config(format!("cannot parse {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        let defaults = HttpConfig::default();
        Self {
            user_agent: defaults.user_agent,
            timeout_secs: defaults.timeout_secs,
            max_attempts: defaults.max_attempts,
            base_delay_ms: defaults.base_delay_ms,
            max_delay_ms: defaults.max_delay_ms,
        }
    }
}

impl HttpSection {
    pub fn to_http_config(&self) -> HttpConfig {
        HttpConfig {
            user_agent: self.user_agent.clone(),
            timeout_secs: self.timeout_secs,
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
    }
}

/// Linker settings for the primary discovery lane (`build-dataset`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerSection {
    pub max_synonyms: usize,
    pub page_size: usize,
    pub max_pages_per_term: usize,
    pub min_score: i32,
    pub max_links_per_cid: usize,
}

impl Default for LinkerSection {
    fn default() -> Self {
        let defaults = LinkerConfig::default();
        Self {
            max_synonyms: defaults.max_synonyms,
            page_size: defaults.page_size,
            max_pages_per_term: defaults.max_pages_per_term,
            min_score: defaults.min_score,
            max_links_per_cid: defaults.max_links_per_cid,
        }
    }
}

impl LinkerSection {
    pub fn to_linker_config(&self) -> LinkerConfig {
        LinkerConfig {
            max_synonyms: self.max_synonyms,
            page_size: self.page_size,
            max_pages_per_term: self.max_pages_per_term,
            min_score: self.min_score,
            max_links_per_cid: self.max_links_per_cid,
        }
    }
}

/// Linker settings when it runs as the resolver's last-ditch fallback
/// (`map-cid-nct --use-fallback`, `collect-docs --use-fallback`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSection {
    pub max_synonyms: usize,
    pub page_size: usize,
    pub max_pages_per_term: usize,
    pub min_score: i32,
    pub max_links_per_cid: usize,
}

impl Default for FallbackSection {
    fn default() -> Self {
        let defaults = LinkerConfig::fallback_profile();
        Self {
            max_synonyms: defaults.max_synonyms,
            page_size: defaults.page_size,
            max_pages_per_term: defaults.max_pages_per_term,
            min_score: defaults.min_score,
            max_links_per_cid: defaults.max_links_per_cid,
        }
    }
}

impl FallbackSection {
    pub fn to_linker_config(&self) -> LinkerConfig {
        LinkerConfig {
            max_synonyms: self.max_synonyms,
            page_size: self.page_size,
            max_pages_per_term: self.max_pages_per_term,
            min_score: self.min_score,
            max_links_per_cid: self.max_links_per_cid,
        }
    }
}
