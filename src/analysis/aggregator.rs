//! Grouped counts and sums over the enriched grant records.
//!
//! Every function here is pure: it reads records and returns a new summary
//! table. Groups with no contributing rows never appear in the output.

use crate::cleaner::normalize_state;
use crate::counter::{tally_terms, TermCounter};
use crate::models::{
    BudgetImpactSummary, CrossTabCell, CrossTabRowTotal, CruzLabel, CruzStatusCrossTab,
    FlaggedWordsDistribution, GrantRecord, HistogramBin, InstitutionBudget, InstitutionCount,
    InstitutionCountSummary, RecordScope, StateCount, StatusLabel, StatusTotal, TermFrequency,
};
use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

/// Records whose funding was cancelled.
pub fn terminated(records: &[GrantRecord]) -> impl Iterator<Item = &GrantRecord> {
    records.iter().filter(|r| r.terminated)
}

/// Records selected by a distribution scope.
pub fn in_scope(records: &[GrantRecord], scope: RecordScope) -> Vec<&GrantRecord> {
    records
        .iter()
        .filter(|r| scope == RecordScope::All || r.terminated)
        .collect()
}

/// Count records per key, skipping records without one. Sorted by count
/// descending, then key ascending.
fn count_by<'a, I, F>(records: I, key: F) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = &'a GrantRecord>,
    F: Fn(&'a GrantRecord) -> Option<Cow<'a, str>>,
{
    let mut counts: HashMap<Cow<'a, str>, usize> = HashMap::new();
    for record in records {
        if let Some(k) = key(record) {
            *counts.entry(k).or_default() += 1;
        }
    }

    let mut sorted: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(k, n)| (k.into_owned(), n))
        .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

/// Cancelled grants per state.
pub fn by_state(records: &[GrantRecord]) -> Vec<StateCount> {
    count_by(terminated(records), |r| {
        r.org_state
            .as_deref()
            .map(|state| Cow::Owned(normalize_state(state)))
    })
    .into_iter()
    .map(|(state, cancelled_grants)| StateCount {
        state,
        cancelled_grants,
    })
    .collect()
}

/// Cancelled grants per institution with summary statistics.
pub fn by_institution_count(records: &[GrantRecord], top_n: usize) -> InstitutionCountSummary {
    let counts = count_by(terminated(records), |r| r.org_name.as_deref().map(Cow::Borrowed));
    let values: Vec<usize> = counts.iter().map(|(_, n)| *n).collect();

    InstitutionCountSummary {
        institutions: counts.len(),
        mean: mean(&values),
        median: median(&values),
        max: values.iter().copied().max(),
        top: counts
            .into_iter()
            .take(top_n)
            .map(|(institution, cancelled_grants)| InstitutionCount {
                institution,
                cancelled_grants,
            })
            .collect(),
    }
}

fn mean(values: &[usize]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<usize>() as f64 / values.len() as f64)
}

fn median(values: &[usize]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) as f64 / 2.0
    } else {
        sorted[mid] as f64
    })
}

/// Running sums for one institution.
#[derive(Default)]
struct BudgetAccumulator {
    grant_count: usize,
    total_budget: Option<f64>,
    total_budget_rows: usize,
    obligated: Option<f64>,
    estimated: Option<f64>,
}

fn add(sum: &mut Option<f64>, value: Option<f64>) {
    if let Some(v) = value {
        *sum = Some(sum.unwrap_or(0.0) + v);
    }
}

/// Pick the impact for a group: the primary sum when present and nonzero,
/// otherwise the estimated sum.
pub fn budget_impact(primary: Option<f64>, estimated: Option<f64>) -> f64 {
    match primary {
        Some(p) if p != 0.0 => p,
        _ => estimated.unwrap_or(0.0),
    }
}

/// Budget lost per institution, largest first.
pub fn by_institution_budget(records: &[GrantRecord]) -> BudgetImpactSummary {
    let mut groups: HashMap<&str, BudgetAccumulator> = HashMap::new();

    for record in terminated(records) {
        let Some(name) = record.org_name.as_deref() else {
            continue;
        };
        let acc = groups.entry(name).or_default();
        acc.grant_count += 1;
        add(&mut acc.total_budget, record.nsf_total_budget);
        if record.nsf_total_budget.is_some() {
            acc.total_budget_rows += 1;
        }
        add(&mut acc.obligated, record.nsf_obligated);
        add(&mut acc.estimated, record.estimated_budget);
    }

    let mut institutions: Vec<InstitutionBudget> = groups
        .into_iter()
        .map(|(name, acc)| InstitutionBudget {
            org_name: name.to_string(),
            grant_count: acc.grant_count,
            avg_budget: acc
                .total_budget
                .map(|sum| sum / acc.total_budget_rows as f64),
            total_budget_sum: acc.total_budget,
            obligated_sum: acc.obligated,
            estimated_sum: acc.estimated,
            budget_impact: budget_impact(acc.total_budget, acc.estimated),
        })
        .filter(|b| b.budget_impact > 0.0)
        .collect();

    institutions.sort_by(|a, b| {
        b.budget_impact
            .total_cmp(&a.budget_impact)
            .then_with(|| a.org_name.cmp(&b.org_name))
    });

    BudgetImpactSummary {
        total_budget_impact: institutions.iter().map(|b| b.budget_impact).sum(),
        institutions,
    }
}

/// Unit-width histogram of flagged-word counts. Values at or above `cap`
/// land in the last bin; every bin from 0 to `cap` is present.
pub fn flagged_words_histogram<'a, I>(records: I, cap: usize) -> Vec<HistogramBin>
where
    I: IntoIterator<Item = &'a GrantRecord>,
{
    let mut counts = vec![0usize; cap + 1];
    for record in records {
        counts[record.flagged_words_count.min(cap)] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(start, count)| HistogramBin {
            bin_start: start,
            bin_end: start + 1,
            mid: start as f64 + 0.5,
            count,
        })
        .collect()
}

/// Most frequent lexicon terms, by occurrences then alphabetically.
pub fn top_terms<'a, I>(records: I, counter: &dyn TermCounter, top_n: usize) -> Vec<TermFrequency>
where
    I: IntoIterator<Item = &'a GrantRecord>,
{
    let mut tally = tally_terms(records, counter);
    tally.sort_by_key(|t| (Reverse(t.occurrences), t.word.clone()));
    tally.truncate(top_n);
    tally
}

/// Histogram and term ranking over one record scope.
pub fn flagged_words_distribution(
    records: &[GrantRecord],
    counter: &dyn TermCounter,
    scope: RecordScope,
    cap: usize,
    top_n: usize,
) -> FlaggedWordsDistribution {
    let scoped = in_scope(records, scope);
    FlaggedWordsDistribution {
        scope,
        cap,
        bins: flagged_words_histogram(scoped.iter().copied(), cap),
        top_terms: top_terms(scoped.iter().copied(), counter, top_n),
    }
}

/// Percentage rounded to one decimal.
fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 1000.0).round() / 10.0
}

/// Cruz-list membership against reinstatement status, over all records.
pub fn cruz_status_crosstab(records: &[GrantRecord]) -> CruzStatusCrossTab {
    let mut counts: BTreeMap<(CruzLabel, StatusLabel), usize> = BTreeMap::new();
    for record in records {
        let key = (
            CruzLabel::from(record.in_cruz_list),
            StatusLabel::from_reinstated(record.reinstated),
        );
        *counts.entry(key).or_default() += 1;
    }

    let mut row_totals: BTreeMap<CruzLabel, usize> = BTreeMap::new();
    let mut status_counts: BTreeMap<StatusLabel, usize> = BTreeMap::new();
    for (&(cruz, status), &n) in &counts {
        *row_totals.entry(cruz).or_default() += n;
        *status_counts.entry(status).or_default() += n;
    }
    let grand_total = records.len();

    let cells = counts
        .iter()
        .map(|(&(cruz_label, status_label), &count)| {
            let row_total = row_totals[&cruz_label];
            CrossTabCell {
                cruz_label,
                status_label,
                count,
                row_total,
                percentage: percent(count, row_total),
            }
        })
        .collect();

    CruzStatusCrossTab {
        cells,
        row_totals: row_totals
            .into_iter()
            .map(|(cruz_label, row_total)| CrossTabRowTotal {
                cruz_label,
                row_total,
            })
            .collect(),
        status_totals: status_counts
            .into_iter()
            .map(|(status_label, count)| StatusTotal {
                status_label,
                count,
                percentage: percent(count, grand_total),
            })
            .collect(),
        grand_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{AlternationCounter, Lexicon};

    fn grant(state: &str, org: &str, terminated: bool) -> GrantRecord {
        GrantRecord {
            org_state: Some(state.to_string()),
            org_name: Some(org.to_string()),
            terminated,
            ..Default::default()
        }
    }

    fn scenario() -> Vec<GrantRecord> {
        vec![
            GrantRecord {
                nsf_total_budget: Some(1000.0),
                ..grant("CA", "X", true)
            },
            GrantRecord {
                nsf_total_budget: None,
                estimated_budget: Some(500.0),
                ..grant("CA", "Y", true)
            },
            GrantRecord {
                nsf_total_budget: Some(9999.0),
                ..grant("TX", "Z", false)
            },
        ]
    }

    #[test]
    fn test_three_record_scenario() {
        let records = scenario();

        assert_eq!(
            by_state(&records),
            vec![StateCount {
                state: "CA".into(),
                cancelled_grants: 2
            }]
        );

        let budget = by_institution_budget(&records);
        let impacts: Vec<(&str, f64)> = budget
            .institutions
            .iter()
            .map(|b| (b.org_name.as_str(), b.budget_impact))
            .collect();
        assert_eq!(impacts, vec![("X", 1000.0), ("Y", 500.0)]);
        assert_eq!(budget.total_budget_impact, 1500.0);
    }

    #[test]
    fn test_by_state_ties_are_alphabetical() {
        let records = vec![
            grant("TX", "A", true),
            grant("CA", "B", true),
            grant("NY", "C", true),
            grant("NY", "D", true),
            GrantRecord {
                org_state: None,
                ..grant("", "E", true)
            },
        ];
        let states: Vec<(String, usize)> = by_state(&records)
            .into_iter()
            .map(|s| (s.state, s.cancelled_grants))
            .collect();
        assert_eq!(
            states,
            vec![("NY".into(), 2), ("CA".into(), 1), ("TX".into(), 1)]
        );
    }

    #[test]
    fn test_by_state_merges_code_case() {
        let records = vec![
            grant("CA", "A", true),
            grant("ca", "B", true),
            grant(" Ca", "C", true),
            grant("tx", "D", true),
        ];
        assert_eq!(
            by_state(&records),
            vec![
                StateCount {
                    state: "CA".into(),
                    cancelled_grants: 3
                },
                StateCount {
                    state: "TX".into(),
                    cancelled_grants: 1
                },
            ]
        );
    }

    #[test]
    fn test_budget_fallback() {
        assert_eq!(budget_impact(None, Some(5000.0)), 5000.0);
        assert_eq!(budget_impact(Some(0.0), Some(5000.0)), 5000.0);
        assert_eq!(budget_impact(Some(3000.0), Some(5000.0)), 3000.0);
        assert_eq!(budget_impact(None, None), 0.0);
    }

    #[test]
    fn test_budget_fallback_is_per_group() {
        let records = vec![
            GrantRecord {
                nsf_total_budget: Some(3000.0),
                estimated_budget: Some(100.0),
                ..grant("CA", "U", true)
            },
            GrantRecord {
                nsf_total_budget: None,
                estimated_budget: Some(5000.0),
                ..grant("CA", "U", true)
            },
            GrantRecord {
                nsf_total_budget: None,
                estimated_budget: None,
                ..grant("CA", "Nothing", true)
            },
        ];

        let budget = by_institution_budget(&records);
        assert_eq!(budget.institutions.len(), 1);
        let u = &budget.institutions[0];
        assert_eq!(u.budget_impact, 3000.0);
        assert_eq!(u.grant_count, 2);
        assert_eq!(u.avg_budget, Some(3000.0));
        assert_eq!(u.estimated_sum, Some(5100.0));
    }

    #[test]
    fn test_institution_count_stats() {
        let mut records = Vec::new();
        for _ in 0..3 {
            records.push(grant("CA", "Big U", true));
        }
        records.push(grant("CA", "Small U", true));
        records.push(grant("CA", "Mid U", true));
        records.push(grant("CA", "Mid U", true));
        records.push(grant("CA", "Untouched U", false));

        let summary = by_institution_count(&records, 2);
        assert_eq!(summary.institutions, 3);
        assert_eq!(summary.top.len(), 2);
        assert_eq!(summary.top[0].institution, "Big U");
        assert_eq!(summary.top[1].institution, "Mid U");
        assert_eq!(summary.mean, Some(2.0));
        assert_eq!(summary.median, Some(2.0));
        assert_eq!(summary.max, Some(3));
    }

    #[test]
    fn test_empty_aggregates() {
        let records = vec![grant("CA", "X", false)];
        assert!(by_state(&records).is_empty());
        let summary = by_institution_count(&records, 20);
        assert_eq!(summary.institutions, 0);
        assert_eq!(summary.mean, None);
        assert!(by_institution_budget(&records).institutions.is_empty());

        let crosstab = cruz_status_crosstab(&[]);
        assert!(crosstab.cells.is_empty());
        assert_eq!(crosstab.grand_total, 0);
    }

    #[test]
    fn test_histogram_clips_at_cap() {
        let records: Vec<GrantRecord> = [0, 1, 1, 39, 40, 120]
            .into_iter()
            .map(|n| GrantRecord {
                flagged_words_count: n,
                ..Default::default()
            })
            .collect();

        let bins = flagged_words_histogram(&records, 40);
        assert_eq!(bins.len(), 41);
        assert_eq!(bins[0].count, 1);
        assert_eq!(bins[1].count, 2);
        assert_eq!(bins[1].mid, 1.5);
        assert_eq!(bins[39].count, 1);
        assert_eq!(bins[40].count, 2);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), records.len());
    }

    #[test]
    fn test_distribution_scope() {
        let lexicon = Lexicon::new(["equity", "fraud"]);
        let counter = AlternationCounter::new(&lexicon).unwrap();
        let records = vec![
            GrantRecord {
                terminated: true,
                abstract_text: Some("equity equity fraud".into()),
                flagged_words_count: 3,
                ..Default::default()
            },
            GrantRecord {
                terminated: false,
                abstract_text: Some("fraud fraud fraud".into()),
                flagged_words_count: 3,
                ..Default::default()
            },
        ];

        let terminated_only =
            flagged_words_distribution(&records, &counter, RecordScope::Terminated, 40, 15);
        assert_eq!(terminated_only.bins[3].count, 1);
        assert_eq!(terminated_only.top_terms[0].word, "equity");
        assert_eq!(terminated_only.top_terms[0].occurrences, 2);

        let all = flagged_words_distribution(&records, &counter, RecordScope::All, 40, 1);
        assert_eq!(all.bins[3].count, 2);
        assert_eq!(all.top_terms.len(), 1);
        assert_eq!(all.top_terms[0].word, "fraud");
        assert_eq!(all.top_terms[0].occurrences, 4);
    }

    #[test]
    fn test_crosstab_row_totals_and_percentages() {
        let mut records = Vec::new();
        for i in 0..7 {
            records.push(GrantRecord {
                in_cruz_list: true,
                reinstated: i < 2,
                ..Default::default()
            });
        }
        for i in 0..3 {
            records.push(GrantRecord {
                in_cruz_list: false,
                reinstated: i == 0,
                ..Default::default()
            });
        }

        let crosstab = cruz_status_crosstab(&records);
        assert_eq!(crosstab.grand_total, 10);

        for row in &crosstab.row_totals {
            let cells: Vec<&CrossTabCell> = crosstab
                .cells
                .iter()
                .filter(|c| c.cruz_label == row.cruz_label)
                .collect();
            let sum: usize = cells.iter().map(|c| c.count).sum();
            assert_eq!(sum, row.row_total);
            let pct: f64 = cells.iter().map(|c| c.percentage).sum();
            assert!((99.5..=100.5).contains(&pct), "row {} sums to {}", row.cruz_label, pct);
        }

        let first = &crosstab.cells[0];
        assert_eq!(first.cruz_label, CruzLabel::No);
        assert_eq!(first.status_label, StatusLabel::Terminated);
        assert_eq!(first.count, 2);
        assert_eq!(first.percentage, 66.7);

        assert_eq!(crosstab.status_totals[0].status_label, StatusLabel::Terminated);
        assert_eq!(crosstab.status_totals[0].count, 7);
        assert_eq!(crosstab.status_totals[0].percentage, 70.0);
        assert_eq!(crosstab.status_totals[1].percentage, 30.0);
    }

    #[test]
    fn test_crosstab_omits_empty_cells() {
        let records = vec![GrantRecord::default(), GrantRecord::default()];
        let crosstab = cruz_status_crosstab(&records);
        assert_eq!(crosstab.cells.len(), 1);
        assert_eq!(crosstab.cells[0].percentage, 100.0);
        assert_eq!(crosstab.row_totals.len(), 1);
    }
}
