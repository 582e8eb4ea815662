//! Pipeline composition.
//!
//! load → clean → count → merge → aggregate, as plain function calls over
//! owned values. Dashboard variants are [`PipelineSettings`] values over the
//! same pipeline.

use crate::analysis;
use crate::cleaner;
use crate::counter::{self, CounterStrategy, Lexicon, TermCounter};
use crate::error::PipelineResult;
use crate::loader::{Sources, GRANT_KEY};
use crate::merger;
use crate::models::{
    CleaningReport, Dashboard, DashboardMetadata, GrantRecord, MergeReport, RecordScope,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// The aggregates a dashboard can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    ByState,
    ByInstitutionCount,
    ByInstitutionBudget,
    FlaggedWords,
    CruzStatus,
}

/// Preset dashboard layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DashboardVariant {
    /// All five questions, including the state map
    #[default]
    Overview,
    /// Institutions, flagged language and the Cruz list only
    Focused,
}

impl fmt::Display for DashboardVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DashboardVariant::Overview => write!(f, "overview"),
            DashboardVariant::Focused => write!(f, "focused"),
        }
    }
}

/// Everything that changes what the pipeline computes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    pub variant: DashboardVariant,
    pub aggregates: Vec<AggregateKind>,
    pub top_institutions: usize,
    pub top_terms: usize,
    pub histogram_cap: usize,
    pub term_scope: RecordScope,
    pub dropped_columns: Vec<String>,
    pub strategy: CounterStrategy,
}

impl PipelineSettings {
    /// Settings for a preset variant.
    pub fn for_variant(variant: DashboardVariant) -> Self {
        let (aggregates, top_institutions) = match variant {
            DashboardVariant::Overview => (
                vec![
                    AggregateKind::ByState,
                    AggregateKind::ByInstitutionCount,
                    AggregateKind::ByInstitutionBudget,
                    AggregateKind::FlaggedWords,
                    AggregateKind::CruzStatus,
                ],
                20,
            ),
            DashboardVariant::Focused => (
                vec![
                    AggregateKind::ByInstitutionCount,
                    AggregateKind::ByInstitutionBudget,
                    AggregateKind::FlaggedWords,
                    AggregateKind::CruzStatus,
                ],
                15,
            ),
        };

        Self {
            variant,
            aggregates,
            top_institutions,
            top_terms: 15,
            histogram_cap: 40,
            term_scope: RecordScope::Terminated,
            dropped_columns: cleaner::default_dropped_columns(),
            strategy: CounterStrategy::default(),
        }
    }

    pub fn includes(&self, kind: AggregateKind) -> bool {
        self.aggregates.contains(&kind)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::for_variant(DashboardVariant::default())
    }
}

/// Cleaned, counted and merged records with the stage reports.
pub struct Enriched {
    pub records: Vec<GrantRecord>,
    pub lexicon: Lexicon,
    pub counter: Box<dyn TermCounter>,
    pub cleaning: CleaningReport,
    pub merge: MergeReport,
}

/// Run every stage up to aggregation.
pub fn enrich(sources: &Sources, settings: &PipelineSettings) -> PipelineResult<Enriched> {
    let (cleaned, cleaning) = cleaner::clean(&sources.grants.table, &settings.dropped_columns);
    debug!("Cleaned {} grant records", cleaned.len());

    let lexicon = Lexicon::from_table(&sources.lexicon.table);
    let counter = counter::build_counter(&lexicon, settings.strategy)?;
    let counted = counter::annotate(&cleaned, counter.as_ref());
    debug!("Counted flagged terms with {} lexicon entries", lexicon.len());

    let entries = merger::entries_from_table(&sources.cross_reference.table);
    let grants_have_key = sources.grants.table.has_column(GRANT_KEY);
    let (records, merge) = merger::merge(&counted, entries.as_deref(), grants_have_key);

    Ok(Enriched {
        records,
        lexicon,
        counter,
        cleaning,
        merge,
    })
}

/// Compute the aggregates the settings ask for.
pub fn aggregate(enriched: &Enriched, settings: &PipelineSettings) -> Dashboard {
    let records = &enriched.records;
    let wants = |kind| settings.includes(kind);

    let metadata = DashboardMetadata {
        variant: settings.variant.to_string(),
        generated_at: Utc::now(),
        total_records: records.len(),
        terminated_records: analysis::terminated(records).count(),
        lexicon_terms: enriched.lexicon.len(),
        cache_key: None,
    };

    Dashboard {
        metadata,
        by_state: wants(AggregateKind::ByState).then(|| analysis::by_state(records)),
        by_institution_count: wants(AggregateKind::ByInstitutionCount)
            .then(|| analysis::by_institution_count(records, settings.top_institutions)),
        by_institution_budget: wants(AggregateKind::ByInstitutionBudget)
            .then(|| analysis::by_institution_budget(records)),
        flagged_words: wants(AggregateKind::FlaggedWords).then(|| {
            analysis::flagged_words_distribution(
                records,
                enriched.counter.as_ref(),
                settings.term_scope,
                settings.histogram_cap,
                settings.top_terms,
            )
        }),
        cruz_status: wants(AggregateKind::CruzStatus)
            .then(|| analysis::cruz_status_crosstab(records)),
        cleaning: enriched.cleaning.clone(),
        merge: enriched.merge.clone(),
    }
}

/// Run the whole pipeline over loaded sources.
pub fn run_pipeline(sources: &Sources, settings: &PipelineSettings) -> PipelineResult<Dashboard> {
    let enriched = enrich(sources, settings)?;
    let dashboard = aggregate(&enriched, settings);

    info!(
        "Built {} dashboard: {} grants, {} cancelled",
        settings.variant, dashboard.metadata.total_records, dashboard.metadata.terminated_records
    );
    Ok(dashboard)
}
