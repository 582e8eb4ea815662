//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.grantlens.toml` files.

use crate::cache::{DEFAULT_CACHE_DIR, DEFAULT_MAX_ENTRIES};
use crate::cleaner;
use crate::cli::OutputFormat;
use crate::counter::CounterStrategy;
use crate::loader::SourcePaths;
use crate::models::RecordScope;
use crate::pipeline::{DashboardVariant, PipelineSettings};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".grantlens.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input file locations.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// What the pipeline computes.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Result cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Input file locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_grants")]
    pub grants: PathBuf,

    #[serde(default = "default_cruz_list")]
    pub cruz_list: PathBuf,

    #[serde(default = "default_lexicon")]
    pub lexicon: PathBuf,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            grants: default_grants(),
            cruz_list: default_cruz_list(),
            lexicon: default_lexicon(),
        }
    }
}

impl SourcesConfig {
    pub fn paths(&self) -> SourcePaths {
        SourcePaths {
            grants: self.grants.clone(),
            cross_reference: self.cruz_list.clone(),
            lexicon: self.lexicon.clone(),
        }
    }
}

fn default_grants() -> PathBuf {
    PathBuf::from("data/raw/nsf_terminations_airtable.csv")
}

fn default_cruz_list() -> PathBuf {
    PathBuf::from("data/raw/cruz_list.csv")
}

fn default_lexicon() -> PathBuf {
    PathBuf::from("data/raw/flagged_words_trump_admin.csv")
}

/// Pipeline settings. Unset sizes fall back to the variant's preset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub variant: DashboardVariant,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_institutions: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_terms: Option<usize>,

    #[serde(default = "default_histogram_cap")]
    pub histogram_cap: usize,

    /// Records the histogram and term ranking cover.
    #[serde(default)]
    pub term_scope: RecordScope,

    #[serde(default)]
    pub strategy: CounterStrategy,

    /// Administrative columns removed before typing.
    #[serde(default = "cleaner::default_dropped_columns")]
    pub dropped_columns: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variant: DashboardVariant::default(),
            top_institutions: None,
            top_terms: None,
            histogram_cap: default_histogram_cap(),
            term_scope: RecordScope::default(),
            strategy: CounterStrategy::default(),
            dropped_columns: cleaner::default_dropped_columns(),
        }
    }
}

fn default_histogram_cap() -> usize {
    40
}

/// Result cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Entries kept in the cache directory; older ones are pruned.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: PathBuf,

    #[serde(default)]
    pub format: OutputFormat,

    /// States listed in the by-state table.
    #[serde(default = "default_top_states")]
    pub top_states: usize,

    /// Row limit for the budget table.
    #[serde(default = "default_max_table_rows")]
    pub max_table_rows: usize,

    /// Include the zero-filled state map table.
    #[serde(default = "default_true")]
    pub include_state_map: bool,

    /// Include coercion failures and merge status.
    #[serde(default = "default_true")]
    pub include_data_quality: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            format: OutputFormat::default(),
            top_states: default_top_states(),
            max_table_rows: default_max_table_rows(),
            include_state_map: true,
            include_data_quality: true,
        }
    }
}

fn default_output() -> PathBuf {
    PathBuf::from("grantlens_report.md")
}

fn default_top_states() -> usize {
    10
}

fn default_max_table_rows() -> usize {
    20
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Reject sizes the pipeline cannot use.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.top_institutions == Some(0) {
            bail!("pipeline.top_institutions must be at least 1");
        }
        if self.pipeline.top_terms == Some(0) {
            bail!("pipeline.top_terms must be at least 1");
        }
        if self.pipeline.histogram_cap == 0 {
            bail!("pipeline.histogram_cap must be at least 1");
        }
        if self.cache.max_entries == 0 {
            bail!("cache.max_entries must be at least 1");
        }
        Ok(())
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref grants) = args.grants {
            self.sources.grants = grants.clone();
        }
        if let Some(ref cruz_list) = args.cruz_list {
            self.sources.cruz_list = cruz_list.clone();
        }
        if let Some(ref lexicon) = args.lexicon {
            self.sources.lexicon = lexicon.clone();
        }

        if let Some(variant) = args.variant {
            self.pipeline.variant = variant;
        }
        if args.top_institutions.is_some() {
            self.pipeline.top_institutions = args.top_institutions;
        }
        if args.top_terms.is_some() {
            self.pipeline.top_terms = args.top_terms;
        }
        if let Some(cap) = args.histogram_cap {
            self.pipeline.histogram_cap = cap;
        }

        if args.no_cache {
            self.cache.enabled = false;
        }
        if let Some(ref dir) = args.cache_dir {
            self.cache.dir = dir.clone();
        }

        if let Some(ref output) = args.output {
            self.report.output = output.clone();
        }
        if let Some(format) = args.format {
            self.report.format = format;
        }
    }

    /// Pipeline settings: the variant preset with configured overrides.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let mut settings = PipelineSettings::for_variant(self.pipeline.variant);
        if let Some(top) = self.pipeline.top_institutions {
            settings.top_institutions = top;
        }
        if let Some(top) = self.pipeline.top_terms {
            settings.top_terms = top;
        }
        settings.histogram_cap = self.pipeline.histogram_cap;
        settings.term_scope = self.pipeline.term_scope;
        settings.strategy = self.pipeline.strategy;
        settings.dropped_columns = self.pipeline.dropped_columns.clone();
        settings
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::tests::make_args;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pipeline.variant, DashboardVariant::Overview);
        assert_eq!(config.pipeline.histogram_cap, 40);
        assert!(config.cache.enabled);
        assert_eq!(config.report.top_states, 10);
        assert!(config
            .pipeline
            .dropped_columns
            .contains(&"record_sha1".to_string()));
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[sources]
grants = "exports/grants.csv"

[pipeline]
variant = "focused"
top_terms = 5
term_scope = "all"
strategy = "per-term"

[cache]
enabled = false

[report]
format = "json"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.sources.grants, PathBuf::from("exports/grants.csv"));
        assert_eq!(config.sources.lexicon, default_lexicon());
        assert_eq!(config.pipeline.variant, DashboardVariant::Focused);
        assert_eq!(config.pipeline.strategy, CounterStrategy::PerTerm);
        assert!(!config.cache.enabled);
        assert_eq!(config.report.format, OutputFormat::Json);

        let settings = config.pipeline_settings();
        assert_eq!(settings.top_terms, 5);
        assert_eq!(settings.top_institutions, 15);
        assert_eq!(settings.term_scope, RecordScope::All);
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.pipeline.histogram_cap = 0;
        assert!(config.validate().is_err());

        config.pipeline.histogram_cap = 40;
        config.pipeline.top_terms = Some(0);
        assert!(config.validate().is_err());

        config.pipeline.top_terms = None;
        config.pipeline.top_institutions = Some(0);
        assert!(config.validate().is_err());

        config.pipeline.top_institutions = Some(3);
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_rejects_zero_histogram_cap() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "[pipeline]\nhistogram_cap = 0\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("histogram_cap"));
    }

    #[test]
    fn test_args_override_config() {
        let mut config = Config::default();
        let mut args = make_args();
        args.variant = Some(DashboardVariant::Focused);
        args.top_institutions = Some(5);
        args.no_cache = true;
        args.format = Some(OutputFormat::Json);

        config.merge_with_args(&args);

        assert_eq!(config.sources.grants, PathBuf::from("grants.csv"));
        assert_eq!(config.sources.paths().cross_reference, PathBuf::from("cruz.csv"));
        assert!(!config.cache.enabled);
        assert_eq!(config.report.format, OutputFormat::Json);
        assert_eq!(config.report.output, default_output());

        let settings = config.pipeline_settings();
        assert_eq!(settings.variant, DashboardVariant::Focused);
        assert_eq!(settings.top_institutions, 5);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[sources]"));
        assert!(toml_str.contains("[pipeline]"));
        assert!(toml_str.contains("[cache]"));
        assert!(toml_str.contains("[report]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.pipeline.histogram_cap, 40);
    }
}
