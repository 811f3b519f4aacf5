//! Deterministic content pickers.
//!
//! Everything here maps wall-clock seconds onto a station index so that two
//! observers asking at the same instant land in the same (file, offset),
//! which is what makes tuning away and back feel like a live broadcast.

use crate::index::IndexEntry;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Offset inside the last portion of a music video that is skipped to avoid
/// tuning into near-end frames where the player may hang.
const MTV_TAIL_GUARD_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct Pick {
    pub path: PathBuf,
    pub duration: u64,
    pub offset: u64,
}

/// Epoch pick: `pos = now mod total`, then walk the rows accumulating
/// durations until `acc + duration > pos`.  Fails when the index is empty or
/// all durations are zero.
pub fn epoch_pick(entries: &[IndexEntry], now: i64) -> Option<Pick> {
    let total: u64 = entries.iter().map(|e| e.duration).sum();
    if total == 0 {
        return None;
    }
    let pos = now.rem_euclid(total as i64) as u64;
    walk(entries.iter(), pos)
}

fn walk<'a>(entries: impl Iterator<Item = &'a IndexEntry>, pos: u64) -> Option<Pick> {
    let mut acc = 0u64;
    for entry in entries {
        if acc + entry.duration > pos {
            return Some(Pick {
                path: entry.path.clone(),
                duration: entry.duration,
                offset: pos - acc,
            });
        }
        acc += entry.duration;
    }
    None
}

fn show_entries<'a>(entries: &'a [IndexEntry], show_dir: &'a Path) -> Vec<&'a IndexEntry> {
    entries.iter().filter(|e| e.path.starts_with(show_dir)).collect()
}

/// Epoch pick restricted to files under `show_dir`.  Returns `None` when the
/// show has no indexed episodes, so the caller can fall back to the full
/// station index.
pub fn scheduled_pick(entries: &[IndexEntry], show_dir: &Path, now: i64) -> Option<Pick> {
    let subset = show_entries(entries, show_dir);
    let total: u64 = subset.iter().map(|e| e.duration).sum();
    if total == 0 {
        return None;
    }
    let pos = now.rem_euclid(total as i64) as u64;
    walk(subset.into_iter(), pos)
}

/// The episode after `current` within the show, at offset 0.  Wraps to the
/// first episode when `current` is the last (or is no longer indexed).
pub fn next_in_show(entries: &[IndexEntry], show_dir: &Path, current: &Path) -> Option<Pick> {
    let subset = show_entries(entries, show_dir);
    if subset.is_empty() {
        return None;
    }
    let next_idx = subset
        .iter()
        .position(|e| e.path == current)
        .map(|i| (i + 1) % subset.len())
        .unwrap_or(0);
    let entry = subset[next_idx];
    Some(Pick {
        path: entry.path.clone(),
        duration: entry.duration,
        offset: 0,
    })
}

/// Epoch-shuffled pick for music-video stations.
///
/// Each full pass over the index is one cycle (`cycle = now / total`).  Rows
/// are ordered by a stable hash of `(path, cycle)`, so the order is random
/// per cycle but identical for every caller within a cycle, so a mid-video
/// tune-in lands in the same video at the same offset.
pub fn mtv_pick(entries: &[IndexEntry], now: i64) -> Option<Pick> {
    let total: u64 = entries.iter().map(|e| e.duration).sum();
    if total == 0 {
        return None;
    }
    let cycle = now.div_euclid(total as i64);
    let pos = now.rem_euclid(total as i64) as u64;

    let mut shuffled: Vec<&IndexEntry> = entries.iter().collect();
    shuffled.sort_by_key(|e| (cycle_hash(&e.path, cycle), e.path.clone()));

    let mut pick = walk(shuffled.into_iter(), pos)?;
    if pick.duration > MTV_TAIL_GUARD_SECS && pick.offset > pick.duration - MTV_TAIL_GUARD_SECS {
        pick.offset = 0;
    }
    Some(pick)
}

fn cycle_hash(path: &Path, cycle: i64) -> u64 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    cycle.hash(&mut hasher);
    hasher.finish()
}
