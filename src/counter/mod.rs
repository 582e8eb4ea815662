//! Flagged-term counting.
//!
//! A [`Lexicon`] is the normalized list of flagged terms. Counting is
//! whole-word and case-insensitive: a term only matches where the text
//! switches between word and non-word characters on both sides, so `cat`
//! matches in "the cat sat" but not in "category" or "cats".
//!
//! Two strategies are provided behind [`TermCounter`]. [`PerTermCounter`]
//! scans the text once per term; [`AlternationCounter`] compiles one pattern
//! over the whole lexicon and resolves terms only where it matches. Both
//! produce the same counts for every text.

use crate::error::PipelineResult;
use crate::models::{GrantRecord, RawTable, TermFrequency};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Lexicon column name.
pub const FLAGGED_WORD: &str = "flagged_word";

/// Normalized, deduplicated flagged terms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lexicon {
    terms: Vec<String>,
}

impl Lexicon {
    /// Build a lexicon from raw entries.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let terms = entries
            .into_iter()
            .filter_map(|e| normalize_term(e.as_ref()))
            .filter(|t| seen.insert(t.clone()))
            .collect();
        Self { terms }
    }

    /// Build a lexicon from the `flagged_word` column. A missing column
    /// yields an empty lexicon.
    pub fn from_table(table: &RawTable) -> Self {
        match table.column(FLAGGED_WORD) {
            Some(values) => {
                let lexicon = Self::new(values.into_iter().flatten());
                debug!(
                    "Lexicon: {} raw entries, {} distinct terms",
                    table.len(),
                    lexicon.len()
                );
                lexicon
            }
            None => {
                warn!(
                    "Lexicon has no '{}' column; all flagged-word counts will be zero",
                    FLAGGED_WORD
                );
                Self::default()
            }
        }
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Normalize one lexicon entry: trim, lowercase, strip surrounding commas and
/// trailing punctuation. Returns `None` for entries that end up empty.
pub fn normalize_term(raw: &str) -> Option<String> {
    let term = raw
        .trim()
        .to_lowercase()
        .trim_matches(|c: char| c == ',' || c.is_whitespace())
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string();
    if term.is_empty() {
        None
    } else {
        Some(term)
    }
}

/// Counts whole-word lexicon matches in text.
pub trait TermCounter {
    /// The terms being counted, indexed as reported by [`Self::visit_matches`].
    fn terms(&self) -> &[String];

    /// Call `visit` with the term index of every match in already-lowercased
    /// text.
    fn visit_matches(&self, lowered: &str, visit: &mut dyn FnMut(usize));

    /// Total matches of all terms. Absent text counts zero.
    fn count(&self, text: Option<&str>) -> usize {
        let Some(text) = text else {
            return 0;
        };
        let mut total = 0;
        self.visit_matches(&text.to_lowercase(), &mut |_| total += 1);
        total
    }

    /// Matches per term, in lexicon order.
    fn count_per_term(&self, text: Option<&str>) -> Vec<usize> {
        let mut counts = vec![0; self.terms().len()];
        if let Some(text) = text {
            self.visit_matches(&text.to_lowercase(), &mut |idx| counts[idx] += 1);
        }
        counts
    }
}

fn term_pattern(term: &str) -> String {
    format!(r"\b{}\b", regex::escape(term))
}

/// One compiled pattern per term.
#[derive(Debug, Clone)]
pub struct PerTermCounter {
    terms: Vec<String>,
    patterns: Vec<Regex>,
}

impl PerTermCounter {
    pub fn new(lexicon: &Lexicon) -> PipelineResult<Self> {
        let patterns = lexicon
            .terms()
            .iter()
            .map(|t| Regex::new(&term_pattern(t)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            terms: lexicon.terms().to_vec(),
            patterns,
        })
    }
}

impl TermCounter for PerTermCounter {
    fn terms(&self) -> &[String] {
        &self.terms
    }

    fn visit_matches(&self, lowered: &str, visit: &mut dyn FnMut(usize)) {
        for (idx, pattern) in self.patterns.iter().enumerate() {
            for _ in pattern.find_iter(lowered) {
                visit(idx);
            }
        }
    }
}

fn word_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b").expect("word boundary pattern is valid"))
}

fn is_boundary_at(text: &str, pos: usize) -> bool {
    word_boundary()
        .find_at(text, pos)
        .is_some_and(|m| m.start() == pos)
}

/// One compiled alternation over the whole lexicon.
///
/// The alternation finds every position where at least one term starts;
/// each term is then checked at that position so nested terms (`climate`
/// inside `climate change`) are credited the same way a per-term scan
/// credits them. Per-term matches stay non-overlapping.
#[derive(Debug, Clone)]
pub struct AlternationCounter {
    terms: Vec<String>,
    pattern: Option<Regex>,
}

impl AlternationCounter {
    pub fn new(lexicon: &Lexicon) -> PipelineResult<Self> {
        let pattern = if lexicon.is_empty() {
            None
        } else {
            let alternatives: Vec<String> =
                lexicon.terms().iter().map(|t| regex::escape(t)).collect();
            Some(Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|")))?)
        };
        Ok(Self {
            terms: lexicon.terms().to_vec(),
            pattern,
        })
    }
}

impl TermCounter for AlternationCounter {
    fn terms(&self) -> &[String] {
        &self.terms
    }

    fn visit_matches(&self, lowered: &str, visit: &mut dyn FnMut(usize)) {
        let Some(pattern) = &self.pattern else {
            return;
        };

        // End of the last counted match per term.
        let mut last_end = vec![0usize; self.terms.len()];
        let mut pos = 0;

        while pos <= lowered.len() {
            let Some(m) = pattern.find_at(lowered, pos) else {
                break;
            };
            let start = m.start();
            let rest = &lowered[start..];

            for (idx, term) in self.terms.iter().enumerate() {
                if start < last_end[idx] || !rest.starts_with(term.as_str()) {
                    continue;
                }
                let end = start + term.len();
                if is_boundary_at(lowered, end) {
                    last_end[idx] = end;
                    visit(idx);
                }
            }

            pos = start
                + rest
                    .chars()
                    .next()
                    .map(char::len_utf8)
                    .unwrap_or(1);
        }
    }
}

/// Counting strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CounterStrategy {
    /// One pattern per term
    PerTerm,
    /// A single alternation over every term
    #[default]
    Alternation,
}

/// Build a counter with the chosen strategy.
pub fn build_counter(
    lexicon: &Lexicon,
    strategy: CounterStrategy,
) -> PipelineResult<Box<dyn TermCounter>> {
    Ok(match strategy {
        CounterStrategy::PerTerm => Box::new(PerTermCounter::new(lexicon)?),
        CounterStrategy::Alternation => Box::new(AlternationCounter::new(lexicon)?),
    })
}

/// Fill both flagged-word counts on copies of the records.
pub fn annotate(records: &[GrantRecord], counter: &dyn TermCounter) -> Vec<GrantRecord> {
    records
        .iter()
        .map(|r| GrantRecord {
            flagged_words_count: counter.count(r.abstract_text.as_deref()),
            title_flagged_words_count: counter.count(r.project_title.as_deref()),
            ..r.clone()
        })
        .collect()
}

/// Occurrences of each term across the abstracts of the given records.
/// Terms that never occur are omitted.
pub fn tally_terms<'a, I>(records: I, counter: &dyn TermCounter) -> Vec<TermFrequency>
where
    I: IntoIterator<Item = &'a GrantRecord>,
{
    let mut totals = vec![0usize; counter.terms().len()];
    for record in records {
        for (idx, n) in counter
            .count_per_term(record.abstract_text.as_deref())
            .into_iter()
            .enumerate()
        {
            totals[idx] += n;
        }
    }

    counter
        .terms()
        .iter()
        .zip(totals)
        .filter(|(_, n)| *n > 0)
        .map(|(word, occurrences)| TermFrequency {
            word: word.clone(),
            occurrences,
        })
        .collect()
}
