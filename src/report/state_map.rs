//! Choropleth rows for the state map.

use crate::cleaner::normalize_state;
use crate::models::StateCount;
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Postal code, FIPS code and name of the 50 states and DC.
const STATES: [(&str, &str, &str); 51] = [
    ("AL", "01", "Alabama"),
    ("AK", "02", "Alaska"),
    ("AZ", "04", "Arizona"),
    ("AR", "05", "Arkansas"),
    ("CA", "06", "California"),
    ("CO", "08", "Colorado"),
    ("CT", "09", "Connecticut"),
    ("DE", "10", "Delaware"),
    ("DC", "11", "District of Columbia"),
    ("FL", "12", "Florida"),
    ("GA", "13", "Georgia"),
    ("HI", "15", "Hawaii"),
    ("ID", "16", "Idaho"),
    ("IL", "17", "Illinois"),
    ("IN", "18", "Indiana"),
    ("IA", "19", "Iowa"),
    ("KS", "20", "Kansas"),
    ("KY", "21", "Kentucky"),
    ("LA", "22", "Louisiana"),
    ("ME", "23", "Maine"),
    ("MD", "24", "Maryland"),
    ("MA", "25", "Massachusetts"),
    ("MI", "26", "Michigan"),
    ("MN", "27", "Minnesota"),
    ("MS", "28", "Mississippi"),
    ("MO", "29", "Missouri"),
    ("MT", "30", "Montana"),
    ("NE", "31", "Nebraska"),
    ("NV", "32", "Nevada"),
    ("NH", "33", "New Hampshire"),
    ("NJ", "34", "New Jersey"),
    ("NM", "35", "New Mexico"),
    ("NY", "36", "New York"),
    ("NC", "37", "North Carolina"),
    ("ND", "38", "North Dakota"),
    ("OH", "39", "Ohio"),
    ("OK", "40", "Oklahoma"),
    ("OR", "41", "Oregon"),
    ("PA", "42", "Pennsylvania"),
    ("RI", "44", "Rhode Island"),
    ("SC", "45", "South Carolina"),
    ("SD", "46", "South Dakota"),
    ("TN", "47", "Tennessee"),
    ("TX", "48", "Texas"),
    ("UT", "49", "Utah"),
    ("VT", "50", "Vermont"),
    ("VA", "51", "Virginia"),
    ("WA", "53", "Washington"),
    ("WV", "54", "West Virginia"),
    ("WI", "55", "Wisconsin"),
    ("WY", "56", "Wyoming"),
];

/// One state on the map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateMapRow {
    pub state: &'static str,
    pub fips: &'static str,
    pub name: &'static str,
    pub cancelled_grants: usize,
}

/// Every state and DC with its count, 0 where nothing was cancelled.
///
/// Codes outside the table (territories, typos) are not mapped.
pub fn state_map_rows(by_state: &[StateCount]) -> Vec<StateMapRow> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for s in by_state {
        *counts.entry(normalize_state(&s.state)).or_default() += s.cancelled_grants;
    }

    let unmapped = counts
        .keys()
        .filter(|code| !STATES.iter().any(|(state, _, _)| state == code))
        .count();
    if unmapped > 0 {
        debug!("{} state codes have no map position", unmapped);
    }

    STATES
        .iter()
        .map(|&(state, fips, name)| StateMapRow {
            state,
            fips,
            name,
            cancelled_grants: counts.get(state).copied().unwrap_or(0),
        })
        .collect()
}
