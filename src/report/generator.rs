//! Markdown and JSON report generation.
//!
//! This module renders a computed [`Dashboard`] as a Markdown or JSON
//! report. Sections only appear for the aggregates the variant computed.

use super::state_map::{state_map_rows, StateMapRow};
use crate::config::ReportConfig;
use crate::models::{
    BudgetImpactSummary, CleaningReport, CruzLabel, CruzStatusCrossTab, Dashboard,
    DashboardMetadata, FlaggedWordsDistribution, InstitutionCountSummary, MergeReport,
    MergeStatus, StateCount, StatusLabel,
};
use anyhow::Result;
use serde::Serialize;

const NO_DATA: &str = "No data.\n\n";

/// Generate a complete Markdown report.
pub fn generate_markdown_report(dashboard: &Dashboard, options: &ReportConfig) -> String {
    let mut output = String::new();

    // Title
    output.push_str("# NSF Grant Terminations Dashboard\n\n");

    output.push_str(&generate_metadata_section(&dashboard.metadata));
    output.push_str(&generate_table_of_contents(dashboard, options));

    if let Some(ref by_state) = dashboard.by_state {
        output.push_str(&generate_state_section(by_state, options));
    }
    if let Some(ref summary) = dashboard.by_institution_count {
        output.push_str(&generate_institution_count_section(summary));
    }
    if let Some(ref summary) = dashboard.by_institution_budget {
        output.push_str(&generate_budget_section(summary, options.max_table_rows));
    }
    if let Some(ref distribution) = dashboard.flagged_words {
        output.push_str(&generate_flagged_words_section(distribution));
    }
    if let Some(ref crosstab) = dashboard.cruz_status {
        output.push_str(&generate_cruz_status_section(crosstab));
    }

    if options.include_data_quality {
        output.push_str(&generate_data_quality_section(
            &dashboard.cleaning,
            &dashboard.merge,
        ));
    }

    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &DashboardMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Variant:** {}\n", metadata.variant));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Grant Records:** {}\n", metadata.total_records));
    section.push_str(&format!(
        "- **Cancelled Grants:** {}\n",
        metadata.terminated_records
    ));
    section.push_str(&format!("- **Flagged Terms:** {}\n", metadata.lexicon_terms));
    if let Some(ref key) = metadata.cache_key {
        section.push_str(&format!("- **Cache Key:** `{}`\n", &key[..key.len().min(12)]));
    }
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(dashboard: &Dashboard, options: &ReportConfig) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");

    if dashboard.by_state.is_some() {
        toc.push_str("- [Cancellations by State](#cancellations-by-state)\n");
    }
    if dashboard.by_institution_count.is_some() {
        toc.push_str("- [Institutions by Cancelled Grants](#institutions-by-cancelled-grants)\n");
    }
    if dashboard.by_institution_budget.is_some() {
        toc.push_str("- [Budget Impact](#budget-impact)\n");
    }
    if dashboard.flagged_words.is_some() {
        toc.push_str("- [Flagged Language](#flagged-language)\n");
    }
    if dashboard.cruz_status.is_some() {
        toc.push_str("- [Cruz List and Reinstatement](#cruz-list-and-reinstatement)\n");
    }
    if options.include_data_quality {
        toc.push_str("- [Data Quality](#data-quality)\n");
    }

    toc.push('\n');

    toc
}

/// Generate the by-state section with the optional full map table.
fn generate_state_section(by_state: &[StateCount], options: &ReportConfig) -> String {
    let mut section = String::new();

    section.push_str("## Cancellations by State\n\n");

    if by_state.is_empty() {
        section.push_str(NO_DATA);
        return section;
    }

    section.push_str(&format!("### Top {} States\n\n", options.top_states));
    section.push_str("| State | Cancelled Grants |\n");
    section.push_str("|:---|:---:|\n");
    for state in by_state.iter().take(options.top_states) {
        section.push_str(&format!("| {} | {} |\n", state.state, state.cancelled_grants));
    }
    section.push('\n');

    if options.include_state_map {
        section.push_str("<details>\n<summary>State Map Data</summary>\n\n");
        section.push_str("| FIPS | State | Name | Cancelled Grants |\n");
        section.push_str("|:---:|:---:|:---|:---:|\n");
        for row in state_map_rows(by_state) {
            section.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                row.fips, row.state, row.name, row.cancelled_grants
            ));
        }
        section.push_str("\n</details>\n\n");
    }

    section
}

/// Generate the institution ranking section.
fn generate_institution_count_section(summary: &InstitutionCountSummary) -> String {
    let mut section = String::new();

    section.push_str("## Institutions by Cancelled Grants\n\n");

    if summary.top.is_empty() {
        section.push_str(NO_DATA);
        return section;
    }

    section.push_str(&format!(
        "*Institutions: {} | Mean: {} | Median: {} | Max: {}*\n\n",
        summary.institutions,
        format_optional(summary.mean.map(|v| format!("{:.1}", v))),
        format_optional(summary.median.map(|v| format!("{:.1}", v))),
        format_optional(summary.max.map(|v| v.to_string())),
    ));

    section.push_str("| Rank | Institution | Cancelled Grants |\n");
    section.push_str("|:---:|:---|:---:|\n");
    for (i, institution) in summary.top.iter().enumerate() {
        section.push_str(&format!(
            "| {} | {} | {} |\n",
            i + 1,
            institution.institution,
            institution.cancelled_grants
        ));
    }
    section.push('\n');

    section
}

/// Generate the budget impact section.
fn generate_budget_section(summary: &BudgetImpactSummary, max_rows: usize) -> String {
    let mut section = String::new();

    section.push_str("## Budget Impact\n\n");

    if summary.institutions.is_empty() {
        section.push_str(NO_DATA);
        return section;
    }

    section.push_str(&format!(
        "**Total impact:** {} across {} institutions\n\n",
        format_money(summary.total_budget_impact),
        summary.institutions.len()
    ));

    section.push_str("| Institution | Grants | Budget Impact | Avg Budget | Obligated |\n");
    section.push_str("|:---|:---:|---:|---:|---:|\n");
    for institution in summary.institutions.iter().take(max_rows) {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            institution.org_name,
            institution.grant_count,
            format_money(institution.budget_impact),
            format_optional(institution.avg_budget.map(format_money)),
            format_optional(institution.obligated_sum.map(format_money)),
        ));
    }
    if summary.institutions.len() > max_rows {
        section.push_str(&format!(
            "\n*{} more institutions not shown.*\n",
            summary.institutions.len() - max_rows
        ));
    }
    section.push('\n');

    section
}

/// Generate the flagged-word histogram and term ranking.
fn generate_flagged_words_section(distribution: &FlaggedWordsDistribution) -> String {
    let mut section = String::new();

    section.push_str("## Flagged Language\n\n");
    section.push_str(&format!(
        "*Computed over {}. Counts of {} or more share the last bin.*\n\n",
        distribution.scope, distribution.cap
    ));

    section.push_str("### Flagged Words per Abstract\n\n");
    let filled: Vec<_> = distribution.bins.iter().filter(|b| b.count > 0).collect();
    if filled.is_empty() {
        section.push_str(NO_DATA);
    } else {
        section.push_str("| Flagged Words | Grants |\n");
        section.push_str("|:---:|:---:|\n");
        for bin in filled {
            let label = if bin.bin_start >= distribution.cap {
                format!("{}+", bin.bin_start)
            } else {
                bin.bin_start.to_string()
            };
            section.push_str(&format!("| {} | {} |\n", label, bin.count));
        }
        section.push('\n');
    }

    section.push_str("### Most Frequent Terms\n\n");
    if distribution.top_terms.is_empty() {
        section.push_str(NO_DATA);
    } else {
        section.push_str("| Term | Occurrences |\n");
        section.push_str("|:---|:---:|\n");
        for term in &distribution.top_terms {
            section.push_str(&format!("| {} | {} |\n", term.word, term.occurrences));
        }
        section.push('\n');
    }

    section
}

/// Generate the Cruz-list by reinstatement cross tab.
fn generate_cruz_status_section(crosstab: &CruzStatusCrossTab) -> String {
    let mut section = String::new();

    section.push_str("## Cruz List and Reinstatement\n\n");

    if crosstab.grand_total == 0 {
        section.push_str(NO_DATA);
        return section;
    }

    let cell = |cruz: CruzLabel, status: StatusLabel| {
        crosstab
            .cells
            .iter()
            .find(|c| c.cruz_label == cruz && c.status_label == status)
            .map(|c| format!("{} ({:.1}%)", c.count, c.percentage))
            .unwrap_or_else(|| "0".to_string())
    };

    section.push_str(&format!(
        "| On Cruz List | {} | {} | Total |\n",
        StatusLabel::Terminated,
        StatusLabel::Reinstated
    ));
    section.push_str("|:---|:---:|:---:|:---:|\n");
    for row in &crosstab.row_totals {
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            row.cruz_label,
            cell(row.cruz_label, StatusLabel::Terminated),
            cell(row.cruz_label, StatusLabel::Reinstated),
            row.row_total
        ));
    }
    section.push('\n');

    for total in &crosstab.status_totals {
        section.push_str(&format!(
            "- **{}:** {} of {} ({:.1}%)\n",
            total.status_label, total.count, crosstab.grand_total, total.percentage
        ));
    }
    section.push('\n');

    section
}

/// Generate the data quality section.
fn generate_data_quality_section(cleaning: &CleaningReport, merge: &MergeReport) -> String {
    let mut section = String::new();

    section.push_str("## Data Quality\n\n");
    section.push_str(&format!("- **Rows cleaned:** {}\n", cleaning.rows));
    if !cleaning.dropped_columns.is_empty() {
        section.push_str(&format!(
            "- **Dropped columns:** {}\n",
            cleaning.dropped_columns.join(", ")
        ));
    }
    if !cleaning.missing_columns.is_empty() {
        section.push_str(&format!(
            "- **Missing columns:** {}\n",
            cleaning.missing_columns.join(", ")
        ));
    }

    let merge_line = match &merge.status {
        MergeStatus::Joined => format!(
            "joined, {} of {} list entries matched, {} grants on the list",
            merge.matched, merge.entries, merge.members
        ),
        MergeStatus::KeyMissing { side } => {
            format!("skipped, grant identifier missing from {}", side)
        }
        MergeStatus::NoOverlap => "skipped, no grant identifiers in common".to_string(),
    };
    section.push_str(&format!("- **Cross-reference merge:** {}\n", merge_line));
    if merge.duplicates_dropped > 0 {
        section.push_str(&format!(
            "- **Duplicate list entries:** {}\n",
            merge.duplicates_dropped
        ));
    }
    section.push('\n');

    if cleaning.total_failures() > 0 {
        section.push_str("### Unparsable Values\n\n");
        section.push_str("| Column | Cells |\n");
        section.push_str("|:---|:---:|\n");
        for (column, count) in &cleaning.coercion_failures {
            section.push_str(&format!("| {} | {} |\n", column, count));
        }
        section.push('\n');
    }

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by grantlens v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

fn format_optional(value: Option<String>) -> String {
    value.unwrap_or_else(|| "n/a".to_string())
}

/// Whole dollars with thousands separators.
pub fn format_money(amount: f64) -> String {
    let digits = format!("{:.0}", amount.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if amount < 0.0 {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}

/// JSON report body: the dashboard plus the zero-filled state map.
#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    dashboard: &'a Dashboard,

    #[serde(skip_serializing_if = "Option::is_none")]
    state_map: Option<Vec<StateMapRow>>,
}

/// Generate a JSON report.
pub fn generate_json_report(dashboard: &Dashboard, options: &ReportConfig) -> Result<String> {
    let state_map = dashboard
        .by_state
        .as_deref()
        .filter(|_| options.include_state_map)
        .map(state_map_rows);

    let report = JsonReport {
        dashboard,
        state_map,
    };
    serde_json::to_string_pretty(&report).map_err(Into::into)
}
