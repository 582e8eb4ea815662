//! Input loading.
//!
//! Reads the three delimited sources into [`RawTable`]s. Each file is read
//! once; its bytes are hashed for the result cache and then parsed.

use crate::error::{PipelineError, PipelineResult};
use crate::models::RawTable;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Column holding the identifier in the cross-reference list.
pub const CROSS_REFERENCE_KEY: &str = "grant_number";

/// Join key name shared by both tables after loading.
pub const GRANT_KEY: &str = "grant_id";

/// The three inputs the pipeline consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    Grants,
    CrossReference,
    Lexicon,
}

impl SourceKind {
    /// Field delimiter used by this source.
    pub fn delimiter(&self) -> u8 {
        match self {
            SourceKind::CrossReference => b';',
            SourceKind::Grants | SourceKind::Lexicon => b',',
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Grants => write!(f, "grant records"),
            SourceKind::CrossReference => write!(f, "cross-reference"),
            SourceKind::Lexicon => write!(f, "lexicon"),
        }
    }
}

/// Locations of the three inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePaths {
    pub grants: PathBuf,
    pub cross_reference: PathBuf,
    pub lexicon: PathBuf,
}

/// One loaded input.
#[derive(Debug, Clone)]
pub struct Source {
    pub kind: SourceKind,
    pub path: PathBuf,
    pub table: RawTable,
    /// Hex SHA-256 of the file contents.
    pub digest: String,
}

/// All three loaded inputs.
#[derive(Debug, Clone)]
pub struct Sources {
    pub grants: Source,
    pub cross_reference: Source,
    pub lexicon: Source,
}

impl Sources {
    /// Content digests in a fixed order: grants, cross-reference, lexicon.
    pub fn digests(&self) -> [&str; 3] {
        [
            &self.grants.digest,
            &self.cross_reference.digest,
            &self.lexicon.digest,
        ]
    }
}

/// Load all three inputs. Any unreadable source aborts the load.
pub fn load_sources(paths: &SourcePaths) -> PipelineResult<Sources> {
    let grants = load_source(SourceKind::Grants, &paths.grants)?;
    let mut cross_reference = load_source(SourceKind::CrossReference, &paths.cross_reference)?;
    let lexicon = load_source(SourceKind::Lexicon, &paths.lexicon)?;

    cross_reference.table = cross_reference
        .table
        .with_renamed_column(CROSS_REFERENCE_KEY, GRANT_KEY);

    for source in [&grants, &cross_reference, &lexicon] {
        if source.table.is_empty() {
            warn!("{} at {} has no data rows", source.kind, source.path.display());
        }
    }

    Ok(Sources {
        grants,
        cross_reference,
        lexicon,
    })
}

/// Load one input file with the delimiter of its kind.
pub fn load_source(kind: SourceKind, path: &Path) -> PipelineResult<Source> {
    let bytes = fs::read(path).map_err(|e| PipelineError::SourceUnavailable {
        kind,
        path: path.to_path_buf(),
        cause: e.to_string(),
    })?;

    let digest = format!("{:x}", Sha256::digest(&bytes));
    let table = parse_table(&bytes, kind.delimiter()).map_err(|e| {
        PipelineError::SourceUnavailable {
            kind,
            path: path.to_path_buf(),
            cause: e.to_string(),
        }
    })?;

    info!(
        "Loaded {} from {} ({} rows, {} columns)",
        kind,
        path.display(),
        table.len(),
        table.headers.len()
    );
    debug!("{} columns: {:?}", kind, table.headers);

    Ok(Source {
        kind,
        path: path.to_path_buf(),
        table,
        digest,
    })
}

/// Parse delimited text with a header row.
///
/// Rows may have fewer or more fields than the header; extra fields are
/// ignored and missing ones read as empty. Invalid UTF-8 is replaced rather
/// than rejected.
pub fn parse_table(bytes: &[u8], delimiter: u8) -> Result<RawTable, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|h| {
            String::from_utf8_lossy(h)
                .trim_start_matches('\u{feff}')
                .trim()
                .to_string()
        })
        .collect();

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        let row = (0..headers.len())
            .map(|i| record.get(i).and_then(decode_cell))
            .collect();
        rows.push(row);
    }

    Ok(RawTable::new(headers, rows))
}

fn decode_cell(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    if text.trim().is_empty() {
        None
    } else {
        Some(text.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_parse_comma_table() {
        let table = parse_table(b"grant_id, org_name ,terminated\nA1,MIT,True\nA2,,False\n", b',')
            .unwrap();

        assert_eq!(table.headers, vec!["grant_id", "org_name", "terminated"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(0, 1), Some("MIT"));
        assert_eq!(table.cell(1, 1), None);
    }

    #[test]
    fn test_parse_semicolon_table_with_quotes() {
        let table = parse_table(
            b"grant_number;in_cruz_list\n\"2401234\";True\n2405678;False\n",
            SourceKind::CrossReference.delimiter(),
        )
        .unwrap();

        assert_eq!(table.column("grant_number"), Some(vec![Some("2401234"), Some("2405678")]));
    }

    #[test]
    fn test_parse_ragged_rows() {
        let table = parse_table(b"a,b,c\n1\n1,2,3,4\n", b',').unwrap();
        assert_eq!(table.rows[0], vec![Some("1".to_string()), None, None]);
        assert_eq!(table.rows[1].len(), 3);
    }

    #[test]
    fn test_parse_strips_bom_and_survives_bad_utf8() {
        let mut bytes = "\u{feff}flagged_word\n".as_bytes().to_vec();
        bytes.extend_from_slice(b"equity\n\xff\xfeoops\n");
        let table = parse_table(&bytes, b',').unwrap();

        assert_eq!(table.headers, vec!["flagged_word"]);
        assert_eq!(table.len(), 2);
        assert!(table.cell(1, 0).unwrap().contains("oops"));
    }

    #[test]
    fn test_missing_source_is_unavailable() {
        let err = load_source(SourceKind::Lexicon, Path::new("/definitely/not/here.csv"))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SourceUnavailable {
                kind: SourceKind::Lexicon,
                ..
            }
        ));
    }

    #[test]
    fn test_load_sources_renames_cross_reference_key() {
        let dir = TempDir::new().unwrap();
        let paths = SourcePaths {
            grants: write_file(&dir, "grants.csv", "grant_id,terminated\nA1,True\n"),
            cross_reference: write_file(&dir, "cruz.csv", "grant_number;in_cruz_list\nA1;True\n"),
            lexicon: write_file(&dir, "words.csv", "flagged_word\nequity\n"),
        };

        let sources = load_sources(&paths).unwrap();

        assert!(sources.cross_reference.table.has_column(GRANT_KEY));
        assert!(!sources.cross_reference.table.has_column(CROSS_REFERENCE_KEY));
        assert_eq!(sources.grants.digest.len(), 64);
        assert_ne!(sources.grants.digest, sources.lexicon.digest);
    }

    #[test]
    fn test_digest_tracks_content() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "words.csv", "flagged_word\nequity\n");
        let first = load_source(SourceKind::Lexicon, &path).unwrap().digest;

        write_file(&dir, "words.csv", "flagged_word\nequity\nfraud\n");
        let second = load_source(SourceKind::Lexicon, &path).unwrap().digest;

        assert_ne!(first, second);
    }
}
