//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::pipeline::DashboardVariant;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// grantlens - NSF grant termination dashboards from CSV exports
///
/// Cleans the terminated-grant export, counts flagged language in titles
/// and abstracts, joins the Cruz list and writes the dashboard tables as a
/// Markdown or JSON report.
///
/// Examples:
///   grantlens --grants nsf_terminations_airtable.csv --cruz-list cruz_list.csv --lexicon flagged_words.csv
///   grantlens --variant focused --format json --output dashboard.json
///   grantlens --config team.toml --no-cache
///   grantlens --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Terminated-grant records (comma-delimited CSV)
    #[arg(long, value_name = "FILE", env = "GRANTLENS_GRANTS")]
    pub grants: Option<PathBuf>,

    /// Cruz-list cross-reference (semicolon-delimited CSV)
    #[arg(long, value_name = "FILE", env = "GRANTLENS_CRUZ_LIST")]
    pub cruz_list: Option<PathBuf>,

    /// Flagged-word lexicon (CSV with a flagged_word column)
    #[arg(long, value_name = "FILE", env = "GRANTLENS_LEXICON")]
    pub lexicon: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .grantlens.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Dashboard layout to compute
    #[arg(long, value_name = "VARIANT")]
    pub variant: Option<DashboardVariant>,

    /// Number of institutions in the cancelled-grant ranking
    #[arg(long, value_name = "COUNT")]
    pub top_institutions: Option<usize>,

    /// Number of terms in the flagged-word ranking
    #[arg(long, value_name = "COUNT")]
    pub top_terms: Option<usize>,

    /// Flagged-word counts at or above this share the last histogram bin
    #[arg(long, value_name = "COUNT")]
    pub histogram_cap: Option<usize>,

    /// Always recompute, ignoring and not writing the result cache
    #[arg(long)]
    pub no_cache: bool,

    /// Directory for cached dashboards
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .grantlens.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.top_institutions == Some(0) {
            return Err("--top-institutions must be at least 1".to_string());
        }
        if self.top_terms == Some(0) {
            return Err("--top-terms must be at least 1".to_string());
        }
        if self.histogram_cap == Some(0) {
            return Err("--histogram-cap must be at least 1".to_string());
        }

        if self.no_cache && self.cache_dir.is_some() {
            return Err("Cannot use both --no-cache and --cache-dir".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
