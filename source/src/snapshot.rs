//! Directory snapshots used to turn file system activity into changes.
//!
//! The snapshot remembers every file seen under the root. Both the initial
//! listing and periodic resyncs are computed as a diff against it, and live
//! notifications are reconciled against it, so a path is never reported as
//! added twice or deleted when it was never seen.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;
use wildmatch::WildMatch;

use crate::change::Change;

/// Patterns that are never watched.
const DEFAULT_EXCLUDES: &[&str] = &[
    // Version control
    "*/.git/*",
    "*/.svn/*",
    "*/.hg/*",
    // Build output
    "*/target/*",
    "*/node_modules/*",
    // Editor and temporary files
    "*.swp",
    "*~",
    "*.tmp",
    "*/.DS_Store",
];

/// A file known to the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Full path to the file.
    pub path: PathBuf,

    /// File size in bytes.
    pub size: u64,

    /// When the file was last modified.
    pub modified: Option<DateTime<Utc>>,

    /// File extension (if any).
    pub extension: Option<String>,
}

impl FileEntry {
    /// Read the entry for a path. Returns `None` unless the path is a file.
    pub fn from_path(path: &Path) -> Option<Self> {
        let metadata = path.metadata().ok()?;
        if !metadata.is_file() {
            return None;
        }

        Some(Self {
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .map(String::from),
        })
    }

    /// JSON payload describing this file.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "path": self.path,
            "size": self.size,
            "modified": self.modified,
            "extension": self.extension,
        })
    }

    fn differs_from(&self, other: &FileEntry) -> bool {
        self.size != other.size || self.modified != other.modified
    }
}

/// Known files under one root directory.
pub struct DirectorySnapshot {
    root: PathBuf,
    entries: BTreeMap<PathBuf, FileEntry>,
    excludes: Vec<WildMatch>,
    follow_symlinks: bool,
}

impl DirectorySnapshot {
    /// Create an empty snapshot for a root directory.
    pub fn new(root: impl Into<PathBuf>, extra_excludes: &[String], follow_symlinks: bool) -> Self {
        let excludes = DEFAULT_EXCLUDES
            .iter()
            .copied()
            .chain(extra_excludes.iter().map(String::as_str))
            .map(WildMatch::new)
            .collect();

        Self {
            root: root.into(),
            entries: BTreeMap::new(),
            excludes,
            follow_symlinks,
        }
    }

    /// Check if a path should be excluded.
    pub fn should_exclude(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.excludes.iter().any(|pattern| pattern.matches(&path_str))
    }

    /// Walk the root and diff it against the snapshot.
    ///
    /// The first scan reports every file as added.
    pub fn rescan(&mut self) -> Vec<Change> {
        let start = std::time::Instant::now();
        let mut current = BTreeMap::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|entry| !self.should_exclude(entry.path()))
            .filter_map(std::result::Result::ok);

        for entry in walker {
            if !entry.file_type().is_file() && !entry.path().is_file() {
                continue;
            }
            if let Some(file) = FileEntry::from_path(entry.path()) {
                current.insert(file.path.clone(), file);
            }
        }

        let mut changes = Vec::new();
        let (mut added, mut updated, mut removed) = (0usize, 0usize, 0usize);

        for (path, file) in &current {
            match self.entries.get(path) {
                None => {
                    changes.push(Change::add(file.payload()));
                    added += 1;
                }
                Some(known) if known.differs_from(file) => {
                    changes.push(Change::update(file.payload()));
                    updated += 1;
                }
                Some(_) => {}
            }
        }

        for (path, known) in &self.entries {
            if !current.contains_key(path) {
                changes.push(Change::delete(known.payload()));
                removed += 1;
            }
        }

        self.entries = current;

        info!(
            "Scanned {} in {:?} ({} files, new: {}, updated: {}, removed: {})",
            self.root.display(),
            start.elapsed(),
            self.entries.len(),
            added,
            updated,
            removed
        );

        changes
    }

    /// Reconcile one path reported by the file system watcher.
    ///
    /// `force_update` reports an update for a known file even when its size
    /// and modification time look unchanged.
    pub fn observe(&mut self, path: &Path, force_update: bool) -> Vec<Change> {
        if self.should_exclude(path) {
            return Vec::new();
        }

        if let Some(file) = FileEntry::from_path(path) {
            let change = match self.entries.get(path) {
                None => Some(Change::add(file.payload())),
                Some(known) if force_update || known.differs_from(&file) => {
                    Some(Change::update(file.payload()))
                }
                Some(_) => None,
            };
            self.entries.insert(path.to_path_buf(), file);
            return change.into_iter().collect();
        }

        if path.is_dir() {
            return Vec::new();
        }

        // Gone: the path itself, or a directory that held known files.
        let gone: Vec<PathBuf> = self
            .entries
            .range(path.to_path_buf()..)
            .take_while(|(known, _)| known.starts_with(path))
            .map(|(known, _)| known.clone())
            .collect();

        if !gone.is_empty() {
            debug!("{} known files removed under {}", gone.len(), path.display());
        }

        gone.into_iter()
            .filter_map(|known| self.entries.remove(&known))
            .map(|file| Change::delete(file.payload()))
            .collect()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get a known file by path.
    pub fn get(&self, path: &Path) -> Option<&FileEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
