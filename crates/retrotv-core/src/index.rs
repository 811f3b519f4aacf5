//! Station index.
//!
//! One `index.tsv` per station (`absolute_path TAB integer_seconds`), rebuilt
//! by the external indexer.  The controller re-reads it on demand and never
//! writes it back.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub path: PathBuf,
    pub duration: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StationIndex {
    entries: Vec<IndexEntry>,
}

impl StationIndex {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Rows are kept in file order; pickers depend on that stability.
    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim_end();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split('\t');
            let (path, duration) = match (parts.next(), parts.next()) {
                (Some(p), Some(d)) => (p, d),
                _ => continue,
            };
            let Ok(duration) = duration.trim().parse::<u64>() else {
                continue;
            };
            entries.push(IndexEntry {
                path: PathBuf::from(path),
                duration,
            });
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_duration(&self) -> u64 {
        self.entries.iter().map(|e| e.duration).sum()
    }
}
