//! Cross-reference merge.
//!
//! Left-joins the cross-reference list onto the grant records by grant
//! identifier. Keys are compared after trimming and ASCII-lowercasing.
//! Duplicate list entries are collapsed before the join, so the record
//! count never changes and merging twice gives the same result.

use crate::error::PipelineError;
use crate::loader::GRANT_KEY;
use crate::models::{CrossReferenceEntry, GrantRecord, MergeReport, MergeStatus, RawTable};
use std::collections::HashMap;
use tracing::{info, warn};

/// Membership column in the cross-reference list.
pub const MEMBERSHIP: &str = "in_cruz_list";

/// Normalize a grant identifier for joining.
pub fn normalize_key(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

/// Read entries from the (already renamed) cross-reference table.
///
/// Returns `None` if the key column is absent. Rows without an identifier
/// are skipped. Without a membership column every listed grant is a member.
pub fn entries_from_table(table: &RawTable) -> Option<Vec<CrossReferenceEntry>> {
    let ids = table.column(GRANT_KEY)?;
    let membership = table.column(MEMBERSHIP);

    let entries = ids
        .into_iter()
        .enumerate()
        .filter_map(|(row, id)| {
            let id = id?.trim();
            if id.is_empty() {
                return None;
            }
            let in_list = match &membership {
                Some(values) => crate::cleaner::parse_bool(values[row]),
                None => true,
            };
            Some(CrossReferenceEntry {
                grant_id: id.to_string(),
                in_cruz_list: in_list,
            })
        })
        .collect();

    Some(entries)
}

/// Collapse entries sharing a normalized key. A key is a member if any of
/// its entries is. Returns the lookup and the number of dropped duplicates.
pub fn dedupe_entries(entries: &[CrossReferenceEntry]) -> (HashMap<String, bool>, usize) {
    let mut lookup: HashMap<String, bool> = HashMap::new();
    let mut duplicates = 0;

    for entry in entries {
        let key = normalize_key(&entry.grant_id);
        match lookup.get_mut(&key) {
            Some(member) => {
                duplicates += 1;
                *member |= entry.in_cruz_list;
            }
            None => {
                lookup.insert(key, entry.in_cruz_list);
            }
        }
    }

    (lookup, duplicates)
}

/// Merge cross-reference membership into the records.
///
/// `entries` is `None` when the list had no key column. `grants_have_key`
/// tells whether the grant table provided `grant_id` at all. In either
/// degraded case every record gets `in_cruz_list = false`.
pub fn merge(
    records: &[GrantRecord],
    entries: Option<&[CrossReferenceEntry]>,
    grants_have_key: bool,
) -> (Vec<GrantRecord>, MergeReport) {
    let degraded = |status: MergeStatus, entries: usize| {
        let reason = match &status {
            MergeStatus::KeyMissing { side } => format!("'{}' missing from {}", GRANT_KEY, side),
            MergeStatus::NoOverlap => "no grant identifiers in common".to_string(),
            MergeStatus::Joined => String::new(),
        };
        warn!("{}", PipelineError::JoinMismatch(reason));
        (clear_membership(records), MergeReport::degraded(status, entries))
    };

    if !grants_have_key {
        let count = entries.map(|e| e.len()).unwrap_or(0);
        return degraded(
            MergeStatus::KeyMissing {
                side: "grant records".to_string(),
            },
            count,
        );
    }
    let Some(entries) = entries else {
        return degraded(
            MergeStatus::KeyMissing {
                side: "cross-reference list".to_string(),
            },
            0,
        );
    };

    let (lookup, duplicates_dropped) = dedupe_entries(entries);
    if duplicates_dropped > 0 {
        warn!(
            "Cross-reference list has {} duplicate identifiers; keeping one entry per grant",
            duplicates_dropped
        );
    }

    let mut matched = 0;
    let mut members = 0;
    let merged: Vec<GrantRecord> = records
        .iter()
        .map(|record| {
            let hit = record
                .grant_id
                .as_deref()
                .and_then(|id| lookup.get(&normalize_key(id)).copied());
            if hit.is_some() {
                matched += 1;
            }
            let in_cruz_list = hit.unwrap_or(false);
            if in_cruz_list {
                members += 1;
            }
            GrantRecord {
                in_cruz_list,
                ..record.clone()
            }
        })
        .collect();

    if matched == 0 && !lookup.is_empty() && !records.is_empty() {
        return degraded(MergeStatus::NoOverlap, entries.len());
    }

    info!(
        "Cross-reference merge: {} of {} grants matched, {} on the list",
        matched,
        records.len(),
        members
    );

    let report = MergeReport {
        status: MergeStatus::Joined,
        entries: entries.len(),
        duplicates_dropped,
        matched,
        members,
    };
    (merged, report)
}

fn clear_membership(records: &[GrantRecord]) -> Vec<GrantRecord> {
    records
        .iter()
        .map(|r| GrantRecord {
            in_cruz_list: false,
            ..r.clone()
        })
        .collect()
}
