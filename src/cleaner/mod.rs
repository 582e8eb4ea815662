//! Cleaning of raw grant records.
//!
//! Turns the raw grant table into typed [`GrantRecord`]s. Every step is
//! tolerant of a missing column: an absent column leaves the field at its
//! default. Cells that fail to parse become `None` and are counted in the
//! [`CleaningReport`]; no row is ever dropped here.

use crate::error::PipelineError;
use crate::models::{CleaningReport, GrantRecord, RawTable};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Administrative columns never used downstream.
pub const DEFAULT_DROPPED_COLUMNS: &[&str] = &[
    "usa_start_date",
    "usa_end_date",
    "nsf_start_date",
    "nsf_end_date",
    "status",
    "suspended",
    "nsf_url",
    "usaspending_url",
    "org_city",
    "award_type",
    "nsf_primary_program",
    "record_sha1",
];

pub const GRANT_ID: &str = "grant_id";
pub const ORG_NAME: &str = "org_name";
pub const ORG_STATE: &str = "org_state";
pub const TERMINATED: &str = "terminated";
pub const REINSTATED: &str = "reinstated";
pub const IN_CRUZ_LIST: &str = "in_cruz_list";
pub const TERMINATION_DATE: &str = "termination_date";
pub const PROJECT_TITLE: &str = "project_title";
pub const ABSTRACT: &str = "abstract";

pub const NSF_TOTAL_BUDGET: &str = "nsf_total_budget";
pub const NSF_OBLIGATED: &str = "nsf_obligated";
pub const USASPENDING_OBLIGATED: &str = "usaspending_obligated";
pub const USASPENDING_OUTLAID: &str = "usaspending_outlaid";
pub const ESTIMATED_BUDGET: &str = "estimated_budget";
pub const ESTIMATED_OUTLAYS: &str = "estimated_outlays";
pub const ESTIMATED_REMAINING: &str = "estimated_remaining";

/// Monetary columns, in record field order.
pub const MONEY_COLUMNS: &[&str] = &[
    NSF_TOTAL_BUDGET,
    NSF_OBLIGATED,
    USASPENDING_OBLIGATED,
    USASPENDING_OUTLAID,
    ESTIMATED_BUDGET,
    ESTIMATED_OUTLAYS,
    ESTIMATED_REMAINING,
];

const TEXT_COLUMNS: &[&str] = &[GRANT_ID, ORG_NAME, ORG_STATE, PROJECT_TITLE, ABSTRACT];
const BOOL_COLUMNS: &[&str] = &[TERMINATED, REINSTATED, IN_CRUZ_LIST];

/// The default dropped-column list as owned strings.
pub fn default_dropped_columns() -> Vec<String> {
    DEFAULT_DROPPED_COLUMNS.iter().map(|c| c.to_string()).collect()
}

/// Clean a raw grant table.
pub fn clean(raw: &RawTable, dropped_columns: &[String]) -> (Vec<GrantRecord>, CleaningReport) {
    let (table, dropped) = raw.without_columns(dropped_columns);

    let mut report = CleaningReport {
        rows: table.len(),
        dropped_columns: dropped,
        ..Default::default()
    };

    let typed: Vec<&str> = TEXT_COLUMNS
        .iter()
        .chain(BOOL_COLUMNS)
        .chain(MONEY_COLUMNS)
        .chain(std::iter::once(&TERMINATION_DATE))
        .copied()
        .collect();
    report.missing_columns = typed
        .iter()
        .filter(|c| !table.has_column(c))
        .map(|c| c.to_string())
        .collect();
    if !report.missing_columns.is_empty() {
        debug!("Grant table lacks columns: {:?}", report.missing_columns);
    }

    let lookup = ColumnLookup::new(&table);
    let mut failures: BTreeMap<String, usize> = BTreeMap::new();

    let records = (0..table.len())
        .map(|row| clean_row(&table, &lookup, row, &mut failures))
        .collect();

    report.coercion_failures = failures;
    if report.total_failures() > 0 {
        info!(
            "{} cells could not be parsed and were set to null",
            report.total_failures()
        );
    }

    (records, report)
}

/// Column positions resolved once per table.
struct ColumnLookup {
    text: BTreeMap<&'static str, usize>,
    flags: BTreeMap<&'static str, usize>,
    money: BTreeMap<&'static str, usize>,
    termination_date: Option<usize>,
    extra: Vec<(usize, String)>,
}

impl ColumnLookup {
    fn new(table: &RawTable) -> Self {
        let resolve = |names: &[&'static str]| {
            names
                .iter()
                .filter_map(|&name| table.column_index(name).map(|idx| (name, idx)))
                .collect::<BTreeMap<_, _>>()
        };

        let extra = table
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| {
                !TEXT_COLUMNS
                    .iter()
                    .chain(BOOL_COLUMNS)
                    .chain(MONEY_COLUMNS)
                    .any(|typed| *typed == h.as_str())
                    && h.as_str() != TERMINATION_DATE
            })
            .map(|(i, h)| (i, h.clone()))
            .collect();

        Self {
            text: resolve(TEXT_COLUMNS),
            flags: resolve(BOOL_COLUMNS),
            money: resolve(MONEY_COLUMNS),
            termination_date: table.column_index(TERMINATION_DATE),
            extra,
        }
    }
}

fn clean_row(
    table: &RawTable,
    lookup: &ColumnLookup,
    row: usize,
    failures: &mut BTreeMap<String, usize>,
) -> GrantRecord {
    let text = |name: &str| {
        lookup
            .text
            .get(name)
            .and_then(|&idx| table.cell(row, idx))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let flag = |name: &str| {
        lookup
            .flags
            .get(name)
            .map(|&idx| parse_bool(table.cell(row, idx)))
            .unwrap_or(false)
    };
    let mut money = |name: &'static str| {
        let raw = lookup.money.get(name).and_then(|&idx| table.cell(row, idx))?;
        let parsed = parse_amount(raw);
        if parsed.is_none() {
            record_failure(failures, name, raw, "amount");
        }
        parsed
    };

    let nsf_total_budget = money(NSF_TOTAL_BUDGET);
    let nsf_obligated = money(NSF_OBLIGATED);
    let usaspending_obligated = money(USASPENDING_OBLIGATED);
    let usaspending_outlaid = money(USASPENDING_OUTLAID);
    let estimated_budget = money(ESTIMATED_BUDGET);
    let estimated_outlays = money(ESTIMATED_OUTLAYS);
    let estimated_remaining = money(ESTIMATED_REMAINING);

    let termination_date = lookup
        .termination_date
        .and_then(|idx| table.cell(row, idx))
        .and_then(|raw| {
            let parsed = parse_date(raw);
            if parsed.is_none() {
                record_failure(failures, TERMINATION_DATE, raw, "date");
            }
            parsed
        });

    let extra = lookup
        .extra
        .iter()
        .filter_map(|(idx, name)| table.cell(row, *idx).map(|v| (name.clone(), v.to_string())))
        .collect();

    GrantRecord {
        grant_id: text(GRANT_ID),
        org_name: text(ORG_NAME),
        org_state: text(ORG_STATE).map(|s| normalize_state(&s)),
        terminated: flag(TERMINATED),
        reinstated: flag(REINSTATED),
        termination_date,
        nsf_total_budget,
        nsf_obligated,
        usaspending_obligated,
        usaspending_outlaid,
        estimated_budget,
        estimated_outlays,
        estimated_remaining,
        project_title: text(PROJECT_TITLE),
        abstract_text: text(ABSTRACT),
        in_cruz_list: flag(IN_CRUZ_LIST),
        flagged_words_count: 0,
        title_flagged_words_count: 0,
        extra,
    }
}

/// Postal codes are compared upper-case.
pub fn normalize_state(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn record_failure(
    failures: &mut BTreeMap<String, usize>,
    column: &str,
    value: &str,
    expected: &'static str,
) {
    let err = PipelineError::FieldCoercion {
        column: column.to_string(),
        value: value.to_string(),
        expected,
    };
    debug!("{}", err);
    *failures.entry(column.to_string()).or_default() += 1;
}

/// Interpret a cell as a boolean. Only true-like values are `true`.
pub fn parse_bool(value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    let value = value.trim().to_lowercase();
    match value.as_str() {
        "true" | "t" | "yes" | "y" | "1" | "checked" | "x" => true,
        other => other
            .parse::<f64>()
            .map(|n| n.is_finite() && n != 0.0)
            .unwrap_or(false),
    }
}

/// Parse a monetary amount.
///
/// Accepts plain decimals with an optional leading `$` and thousands
/// separators. Negative or non-finite values are rejected.
pub fn parse_amount(value: &str) -> Option<f64> {
    let cleaned: String = value
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    let amount = cleaned.trim().parse::<f64>().ok()?;
    if amount.is_finite() && amount >= 0.0 {
        Some(amount)
    } else {
        None
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y"];
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a termination date in any of the formats the exports use.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable::new(
            headers.iter().map(|h| h.to_string()).collect(),
            rows.iter()
                .map(|r| {
                    r.iter()
                        .map(|c| if c.is_empty() { None } else { Some(c.to_string()) })
                        .collect()
                })
                .collect(),
        )
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool(Some("True")));
        assert!(parse_bool(Some(" yes ")));
        assert!(parse_bool(Some("1.0")));
        assert!(parse_bool(Some("checked")));
        assert!(!parse_bool(Some("False")));
        assert!(!parse_bool(Some("0")));
        assert!(!parse_bool(Some("maybe")));
        assert!(!parse_bool(None));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1000"), Some(1000.0));
        assert_eq!(parse_amount(" 2500.75 "), Some(2500.75));
        assert_eq!(parse_amount("$1,250,000"), Some(1_250_000.0));
        assert_eq!(parse_amount("0"), Some(0.0));
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount("-5"), None);
        assert_eq!(parse_amount("NaN"), None);
    }

    #[test]
    fn test_parse_date() {
        let expected = NaiveDate::from_ymd_opt(2025, 4, 18);
        assert_eq!(parse_date("2025-04-18"), expected);
        assert_eq!(parse_date("04/18/2025"), expected);
        assert_eq!(parse_date("2025-04-18T13:45:00Z"), expected);
        assert_eq!(parse_date("2025-04-18 13:45:00"), expected);
        assert_eq!(parse_date("April 18, 2025"), expected);
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date("2025-13-45"), None);
    }

    #[test]
    fn test_clean_coerces_fields() {
        let raw = table(
            &[
                "grant_id", "org_name", "org_state", "terminated", "reinstated",
                "termination_date", "nsf_total_budget", "estimated_budget", "status",
                "directorate",
            ],
            &[
                &["2401", "MIT", "MA", "True", "False", "2025-04-18", "1000", "", "open", "EDU"],
                &["2402", "", " ca ", "", "", "garbage", "lots", "500", "", ""],
            ],
        );

        let (records, report) = clean(&raw, &default_dropped_columns());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].grant_id.as_deref(), Some("2401"));
        assert!(records[0].terminated);
        assert!(!records[0].reinstated);
        assert_eq!(records[0].termination_date, NaiveDate::from_ymd_opt(2025, 4, 18));
        assert_eq!(records[0].nsf_total_budget, Some(1000.0));
        assert_eq!(records[0].estimated_budget, None);
        assert_eq!(records[0].extra.get("directorate").map(String::as_str), Some("EDU"));
        assert!(!records[0].extra.contains_key("status"));

        assert_eq!(records[1].org_name, None);
        assert_eq!(records[1].org_state.as_deref(), Some("CA"));
        assert!(!records[1].terminated);
        assert_eq!(records[1].termination_date, None);
        assert_eq!(records[1].nsf_total_budget, None);
        assert_eq!(records[1].estimated_budget, Some(500.0));

        assert_eq!(report.dropped_columns, vec!["status".to_string()]);
        assert_eq!(report.coercion_failures.get(NSF_TOTAL_BUDGET), Some(&1));
        assert_eq!(report.coercion_failures.get(TERMINATION_DATE), Some(&1));
        assert!(report.missing_columns.contains(&ABSTRACT.to_string()));
    }

    #[test]
    fn test_clean_without_any_known_columns() {
        let raw = table(&["something_else"], &[&["a"], &["b"], &[""]]);
        let (records, report) = clean(&raw, &default_dropped_columns());

        assert_eq!(records.len(), 3);
        assert_eq!(report.rows, 3);
        for record in &records {
            assert!(!record.terminated);
            assert!(!record.reinstated);
            assert!(!record.in_cruz_list);
            assert_eq!(record.nsf_total_budget, None);
        }
        assert_eq!(report.total_failures(), 0);
    }

    #[test]
    fn test_flags_never_null_for_any_input() {
        let values = ["True", "FALSE", "", "1", "0", "nan", "None", "checked", "??"];
        let rows: Vec<Vec<&str>> = values.iter().map(|v| vec![*v, *v]).collect();
        let row_refs: Vec<&[&str]> = rows.iter().map(|r| r.as_slice()).collect();
        let raw = table(&["terminated", "reinstated"], &row_refs);

        let (records, _) = clean(&raw, &[]);
        assert_eq!(records.len(), values.len());
        let terminated: Vec<bool> = records.iter().map(|r| r.terminated).collect();
        assert_eq!(
            terminated,
            vec![true, false, false, true, false, false, false, true, false]
        );
        assert!(records.iter().all(|r| r.terminated == r.reinstated));
    }
}
