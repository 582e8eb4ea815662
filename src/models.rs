//! Data models for the grant pipeline.
//!
//! This module contains the tables and records that flow between the
//! pipeline stages, and the summary tables the dashboard is built from.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A delimited table as read from disk, before any typing.
///
/// Empty cells are stored as `None`. Rows may be shorter than the header;
/// missing trailing cells read as `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    /// Column names, trimmed.
    pub headers: Vec<String>,
    /// Row cells in header order.
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    /// Creates a table from headers and rows.
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { headers, rows }
    }

    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when the table has no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Whether the table has a column with this name.
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell value at a row and column position.
    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|c| c.as_deref())
    }

    /// All values of a named column, or `None` if the column is absent.
    pub fn column(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.column_index(name)?;
        Some((0..self.rows.len()).map(|r| self.cell(r, idx)).collect())
    }

    /// Returns a copy without the named columns, plus the names actually removed.
    pub fn without_columns(&self, names: &[String]) -> (RawTable, Vec<String>) {
        let keep: Vec<usize> = (0..self.headers.len())
            .filter(|&i| !names.contains(&self.headers[i]))
            .collect();
        let removed = self
            .headers
            .iter()
            .filter(|h| names.contains(h))
            .cloned()
            .collect();

        let headers = keep.iter().map(|&i| self.headers[i].clone()).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                keep.iter()
                    .map(|&i| row.get(i).cloned().flatten())
                    .collect()
            })
            .collect();

        (RawTable { headers, rows }, removed)
    }

    /// Returns a copy with one column renamed. No-op if `from` is absent.
    pub fn with_renamed_column(&self, from: &str, to: &str) -> RawTable {
        let mut table = self.clone();
        if let Some(idx) = table.column_index(from) {
            table.headers[idx] = to.to_string();
        }
        table
    }
}

/// One grant after cleaning and enrichment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub grant_id: Option<String>,
    pub org_name: Option<String>,
    pub org_state: Option<String>,
    pub terminated: bool,
    pub reinstated: bool,
    pub termination_date: Option<NaiveDate>,
    pub nsf_total_budget: Option<f64>,
    pub nsf_obligated: Option<f64>,
    pub usaspending_obligated: Option<f64>,
    pub usaspending_outlaid: Option<f64>,
    pub estimated_budget: Option<f64>,
    pub estimated_outlays: Option<f64>,
    pub estimated_remaining: Option<f64>,
    pub project_title: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    /// Set by the cross-reference merge; false when unmatched.
    pub in_cruz_list: bool,
    /// Flagged-term matches in the abstract.
    pub flagged_words_count: usize,
    /// Flagged-term matches in the title.
    pub title_flagged_words_count: usize,
    /// Source columns with no typed counterpart, passed through untouched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// One entry of the cross-reference list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReferenceEntry {
    /// Identifier as it appears in the list.
    pub grant_id: String,
    /// Membership flag; listing implies membership when the column is absent.
    pub in_cruz_list: bool,
}

/// Cancelled grants in one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCount {
    pub state: String,
    pub cancelled_grants: usize,
}

/// Cancelled grants at one institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstitutionCount {
    pub institution: String,
    pub cancelled_grants: usize,
}

/// Institutions ranked by number of cancelled grants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstitutionCountSummary {
    /// Number of institutions with at least one cancelled grant.
    pub institutions: usize,
    /// Highest-ranked institutions for display.
    pub top: Vec<InstitutionCount>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub max: Option<usize>,
}

/// Budget lost by one institution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionBudget {
    pub org_name: String,
    pub grant_count: usize,
    /// Sum of `nsf_total_budget`, `None` if no grant reported one.
    pub total_budget_sum: Option<f64>,
    pub avg_budget: Option<f64>,
    pub obligated_sum: Option<f64>,
    pub estimated_sum: Option<f64>,
    /// Primary sum, or the estimated sum when the primary is missing or zero.
    pub budget_impact: f64,
}

/// Institutions ranked by budget impact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetImpactSummary {
    pub institutions: Vec<InstitutionBudget>,
    pub total_budget_impact: f64,
}

/// One unit-width histogram bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub bin_start: usize,
    pub bin_end: usize,
    pub mid: f64,
    pub count: usize,
}

/// Total occurrences of one lexicon term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermFrequency {
    pub word: String,
    pub occurrences: usize,
}

/// Which records a distribution is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordScope {
    All,
    #[default]
    Terminated,
}

impl fmt::Display for RecordScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordScope::All => write!(f, "all grants"),
            RecordScope::Terminated => write!(f, "cancelled grants"),
        }
    }
}

/// Flagged-word histogram plus the most frequent terms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlaggedWordsDistribution {
    pub scope: RecordScope,
    pub cap: usize,
    pub bins: Vec<HistogramBin>,
    pub top_terms: Vec<TermFrequency>,
}

/// Row label of the cross tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CruzLabel {
    No,
    Yes,
}

impl From<bool> for CruzLabel {
    fn from(in_list: bool) -> Self {
        if in_list {
            CruzLabel::Yes
        } else {
            CruzLabel::No
        }
    }
}

impl fmt::Display for CruzLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CruzLabel::No => write!(f, "No"),
            CruzLabel::Yes => write!(f, "Yes"),
        }
    }
}

/// Column label of the cross tab. Ordering is the stack order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatusLabel {
    Terminated,
    Reinstated,
}

impl StatusLabel {
    /// Label for a record's `reinstated` flag.
    pub fn from_reinstated(reinstated: bool) -> Self {
        if reinstated {
            StatusLabel::Reinstated
        } else {
            StatusLabel::Terminated
        }
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLabel::Terminated => write!(f, "Terminated"),
            StatusLabel::Reinstated => write!(f, "Reinstated"),
        }
    }
}

/// One non-empty cell of the cross tab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossTabCell {
    pub cruz_label: CruzLabel,
    pub status_label: StatusLabel,
    pub count: usize,
    pub row_total: usize,
    /// Share of the row, rounded to one decimal.
    pub percentage: f64,
}

/// Total for one cruz label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossTabRowTotal {
    pub cruz_label: CruzLabel,
    pub row_total: usize,
}

/// Total for one status across all rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTotal {
    pub status_label: StatusLabel,
    pub count: usize,
    /// Share of the grand total, rounded to one decimal.
    pub percentage: f64,
}

/// Cruz-list membership against reinstatement status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CruzStatusCrossTab {
    pub cells: Vec<CrossTabCell>,
    pub row_totals: Vec<CrossTabRowTotal>,
    pub status_totals: Vec<StatusTotal>,
    pub grand_total: usize,
}

/// Coercion failures and column bookkeeping from the cleaning stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub rows: usize,
    /// Administrative columns that were present and removed.
    pub dropped_columns: Vec<String>,
    /// Typed columns the source did not provide.
    pub missing_columns: Vec<String>,
    /// Unparsable cells per column.
    pub coercion_failures: BTreeMap<String, usize>,
}

impl CleaningReport {
    /// Total number of cells that fell back to null.
    pub fn total_failures(&self) -> usize {
        self.coercion_failures.values().sum()
    }
}

/// How the cross-reference join went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Joined,
    /// The join key column was absent on one side.
    KeyMissing { side: String },
    /// Both sides had keys but none matched.
    NoOverlap,
}

/// Outcome of the cross-reference merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub status: MergeStatus,
    pub entries: usize,
    pub duplicates_dropped: usize,
    pub matched: usize,
    pub members: usize,
}

impl MergeReport {
    /// A report for a join that could not run.
    pub fn degraded(status: MergeStatus, entries: usize) -> Self {
        Self {
            status,
            entries,
            duplicates_dropped: 0,
            matched: 0,
            members: 0,
        }
    }
}

/// Metadata about one dashboard computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardMetadata {
    pub variant: String,
    pub generated_at: DateTime<Utc>,
    pub total_records: usize,
    pub terminated_records: usize,
    pub lexicon_terms: usize,
    pub cache_key: Option<String>,
}

/// All aggregates of one dashboard variant. Aggregates the variant does not
/// include are `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub metadata: DashboardMetadata,
    pub by_state: Option<Vec<StateCount>>,
    pub by_institution_count: Option<InstitutionCountSummary>,
    pub by_institution_budget: Option<BudgetImpactSummary>,
    pub flagged_words: Option<FlaggedWordsDistribution>,
    pub cruz_status: Option<CruzStatusCrossTab>,
    pub cleaning: CleaningReport,
    pub merge: MergeReport,
}
