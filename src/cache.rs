//! Dashboard result cache.
//!
//! Entries are JSON files named by a content key over the source digests and
//! the pipeline settings, so any change to an input or setting is a miss.

use crate::loader::Sources;
use crate::models::Dashboard;
use crate::pipeline::PipelineSettings;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".grantlens-cache";

/// Entries kept after pruning, by default.
pub const DEFAULT_MAX_ENTRIES: usize = 16;

/// Hex SHA-256 identifying one pipeline computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(sources: &Sources, settings: &PipelineSettings) -> Result<Self> {
        let settings_json =
            serde_json::to_string(settings).context("Failed to serialize pipeline settings")?;
        let settings_digest = format!("{:x}", Sha256::digest(settings_json.as_bytes()));

        let mut parts: Vec<&str> = sources.digests().to_vec();
        parts.push(&settings_digest);
        parts.push(env!("CARGO_PKG_VERSION"));
        Ok(Self(fingerprint(&parts)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"|");
    }
    format!("{:x}", hasher.finalize())
}

/// File-backed store of computed dashboards.
#[derive(Debug, Clone)]
pub struct DashboardCache {
    dir: PathBuf,
}

impl DashboardCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Look up a dashboard. Missing entries are a miss; unreadable or
    /// corrupt ones are a miss with a warning.
    pub fn load(&self, key: &CacheKey) -> Option<Dashboard> {
        let path = self.entry_path(key);
        if !path.exists() {
            debug!("Cache miss for {}", key);
            return None;
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<Dashboard>(&content) {
            Ok(dashboard) => {
                debug!("Cache hit for {}", key);
                Some(dashboard)
            }
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write a dashboard under the given key.
    pub fn store(&self, key: &CacheKey, dashboard: &Dashboard) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create cache directory: {}", self.dir.display())
        })?;

        let path = self.entry_path(key);
        let json = serde_json::to_string_pretty(dashboard)
            .context("Failed to serialize dashboard for cache")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write cache entry: {}", path.display()))?;

        debug!("Cached dashboard at {}", path.display());
        Ok(path)
    }

    /// Delete the oldest entries beyond `max_entries`. Returns how many were
    /// removed.
    pub fn prune(&self, max_entries: usize) -> Result<usize> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to list cache directory: {}", self.dir.display())
                })
            }
        };

        let mut entries: Vec<(SystemTime, PathBuf)> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .map(|path| {
                let modified = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, path)
            })
            .collect();

        if entries.len() <= max_entries {
            return Ok(0);
        }

        // Newest first
        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let mut removed = 0;
        for (_, path) in entries.into_iter().skip(max_entries) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove cache entry {}: {}", path.display(), e),
            }
        }
        debug!("Pruned {} cache entries", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{Source, SourceKind};
    use crate::models::{CleaningReport, DashboardMetadata, MergeReport, MergeStatus, RawTable};
    use crate::pipeline::DashboardVariant;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn source(kind: SourceKind, digest: &str) -> Source {
        Source {
            kind,
            path: PathBuf::from("unused.csv"),
            table: RawTable::default(),
            digest: digest.to_string(),
        }
    }

    fn sources(grants_digest: &str) -> Sources {
        Sources {
            grants: source(SourceKind::Grants, grants_digest),
            cross_reference: source(SourceKind::CrossReference, "bbb"),
            lexicon: source(SourceKind::Lexicon, "ccc"),
        }
    }

    fn dashboard() -> Dashboard {
        Dashboard {
            metadata: DashboardMetadata {
                variant: "overview".to_string(),
                generated_at: Utc::now(),
                total_records: 3,
                terminated_records: 2,
                lexicon_terms: 2,
                cache_key: None,
            },
            by_state: Some(vec![]),
            by_institution_count: None,
            by_institution_budget: None,
            flagged_words: None,
            cruz_status: None,
            cleaning: CleaningReport::default(),
            merge: MergeReport::degraded(MergeStatus::NoOverlap, 0),
        }
    }

    #[test]
    fn test_key_changes_with_any_input() {
        let settings = PipelineSettings::default();
        let base = CacheKey::new(&sources("aaa"), &settings).unwrap();

        assert_eq!(base, CacheKey::new(&sources("aaa"), &settings).unwrap());
        assert_ne!(base, CacheKey::new(&sources("aab"), &settings).unwrap());

        let focused = PipelineSettings::for_variant(DashboardVariant::Focused);
        assert_ne!(base, CacheKey::new(&sources("aaa"), &focused).unwrap());

        let mut capped = settings.clone();
        capped.histogram_cap = 10;
        assert_ne!(base, CacheKey::new(&sources("aaa"), &capped).unwrap());
        assert_eq!(base.as_str().len(), 64);
    }

    #[test]
    fn test_store_then_load() {
        let dir = TempDir::new().unwrap();
        let cache = DashboardCache::new(dir.path().join("cache"));
        let key = CacheKey::new(&sources("aaa"), &PipelineSettings::default()).unwrap();

        assert!(cache.load(&key).is_none());
        cache.store(&key, &dashboard()).unwrap();

        let loaded = cache.load(&key).unwrap();
        assert_eq!(loaded.metadata.total_records, 3);
        assert_eq!(loaded.merge.status, MergeStatus::NoOverlap);
    }

    #[test]
    fn test_key_covers_crate_version() {
        let sources = sources("aaa");
        let settings = PipelineSettings::default();
        let settings_json = serde_json::to_string(&settings).unwrap();
        let settings_digest = format!("{:x}", Sha256::digest(settings_json.as_bytes()));

        let mut parts: Vec<&str> = sources.digests().to_vec();
        parts.push(&settings_digest);
        let unversioned = fingerprint(&parts);
        parts.push(env!("CARGO_PKG_VERSION"));

        let key = CacheKey::new(&sources, &settings).unwrap();
        assert_ne!(key.as_str(), unversioned);
        assert_eq!(key.as_str(), fingerprint(&parts));
    }

    #[test]
    fn test_prune_keeps_newest_entries() {
        let dir = TempDir::new().unwrap();
        let cache = DashboardCache::new(dir.path());
        let now = SystemTime::now();

        let mut keys = Vec::new();
        for (i, digest) in ["a1", "a2", "a3"].iter().enumerate() {
            let key = CacheKey::new(&sources(digest), &PipelineSettings::default()).unwrap();
            let path = cache.store(&key, &dashboard()).unwrap();
            let file = fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(now - Duration::from_secs(600 - 100 * i as u64))
                .unwrap();
            keys.push(key);
        }
        fs::write(dir.path().join("notes.txt"), "kept").unwrap();

        assert_eq!(cache.prune(2).unwrap(), 1);
        assert!(cache.load(&keys[0]).is_none());
        assert!(cache.load(&keys[1]).is_some());
        assert!(cache.load(&keys[2]).is_some());
        assert!(dir.path().join("notes.txt").exists());

        assert_eq!(cache.prune(2).unwrap(), 0);
    }

    #[test]
    fn test_prune_missing_dir() {
        let dir = TempDir::new().unwrap();
        let cache = DashboardCache::new(dir.path().join("absent"));
        assert_eq!(cache.prune(1).unwrap(), 0);
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = DashboardCache::new(dir.path());
        let key = CacheKey::new(&sources("aaa"), &PipelineSettings::default()).unwrap();

        fs::write(cache.entry_path(&key), "{ not json").unwrap();
        assert!(cache.load(&key).is_none());
    }
}
