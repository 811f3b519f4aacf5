//! File-backed runtime state.
//!
//! A tiny filesystem message bus under the state root.  The controller is the
//! single writer for everything here except the command triggers
//! (`channel_cmd`, `volume`, `mute`) and the pending-alert directory, which
//! external producers write and the controller consumes (read + delete).

use std::path::PathBuf;
use tracing::warn;

const CURRENT_CHANNEL: &str = "current_channel_number";
const CHANNEL_CMD: &str = "channel_cmd";
const VOLUME_CMD: &str = "volume";
const MUTE_CMD: &str = "mute";
const PARENTAL_UNLOCKED: &str = "parental_unlocked";
const EAS_ACTIVE: &str = "eas_active_flag";
const EAS_RESUME: &str = "eas_resume_channel";
const EAS_CRAWL_TEXT: &str = "eas_crawl_text";
const EAS_CRAWL_EXPIRY: &str = "eas_crawl_expiry";
const EAS_CRAWL_ACTIVE: &str = "eas_crawl_active";
const MTV_META: &str = "mtv_meta";

#[derive(Debug, Clone)]
pub struct StateRoot {
    root: PathBuf,
}

impl StateRoot {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.root.join("eas_pending"))?;
        std::fs::create_dir_all(self.root.join("eas_active"))?;
        Ok(())
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    // ── small helpers ────────────────────────────────────────────────────────

    fn read(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.path(name))
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn write(&self, name: &str, value: &str) {
        if let Err(e) = std::fs::write(self.path(name), value) {
            warn!("state write {} failed: {}", name, e);
        }
    }

    fn remove(&self, name: &str) {
        let _ = std::fs::remove_file(self.path(name));
    }

    fn flag(&self, name: &str) -> bool {
        self.path(name).exists()
    }

    fn set_flag(&self, name: &str, on: bool) {
        if on {
            self.write(name, "");
        } else {
            self.remove(name);
        }
    }

    /// Read-and-delete.  Removing the trigger before acting is what
    /// serializes rapid repeats.
    fn take(&self, name: &str) -> Option<String> {
        let value = self.read(name)?;
        self.remove(name);
        Some(value)
    }

    // ── current channel ──────────────────────────────────────────────────────

    pub fn current_channel(&self) -> Option<u32> {
        self.read(CURRENT_CHANNEL)?.parse().ok()
    }

    pub fn set_current_channel(&self, number: u32) {
        self.write(CURRENT_CHANNEL, &number.to_string());
    }

    // ── command triggers (externally written, consumed here) ─────────────────

    pub fn take_channel_cmd(&self) -> Option<String> {
        self.take(CHANNEL_CMD)
    }

    pub fn take_volume_delta(&self) -> Option<i64> {
        self.take(VOLUME_CMD)?.parse().ok()
    }

    pub fn take_mute_toggle(&self) -> bool {
        let present = self.flag(MUTE_CMD);
        if present {
            self.remove(MUTE_CMD);
        }
        present
    }

    // ── parental session unlock ──────────────────────────────────────────────

    pub fn parental_unlocked(&self) -> bool {
        self.flag(PARENTAL_UNLOCKED)
    }

    pub fn set_parental_unlocked(&self, on: bool) {
        self.set_flag(PARENTAL_UNLOCKED, on);
    }

    // ── per-channel off-air flags ────────────────────────────────────────────

    fn offair_name(number: u32) -> String {
        format!("offair_{number}")
    }

    pub fn offair(&self, number: u32) -> bool {
        self.flag(&Self::offair_name(number))
    }

    pub fn set_offair(&self, number: u32, on: bool) {
        self.set_flag(&Self::offair_name(number), on);
    }

    /// Drop off-air flags for every channel except `keep`.
    pub fn clear_other_offair(&self, keep: u32) {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return;
        };
        let keep_name = Self::offair_name(keep);
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with("offair_") && name != keep_name {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }

    // ── EAS ──────────────────────────────────────────────────────────────────

    pub fn eas_active(&self) -> bool {
        self.flag(EAS_ACTIVE)
    }

    pub fn set_eas_active(&self, on: bool) {
        self.set_flag(EAS_ACTIVE, on);
    }

    pub fn eas_resume_channel(&self) -> Option<u32> {
        self.read(EAS_RESUME)?.parse().ok()
    }

    pub fn set_eas_resume_channel(&self, number: u32) {
        self.write(EAS_RESUME, &number.to_string());
    }

    pub fn clear_eas_resume(&self) {
        self.remove(EAS_RESUME);
    }

    // ── crawl ────────────────────────────────────────────────────────────────

    pub fn crawl_text_path(&self) -> PathBuf {
        self.path(EAS_CRAWL_TEXT)
    }

    pub fn crawl_text(&self) -> Option<String> {
        self.read(EAS_CRAWL_TEXT)
    }

    pub fn set_crawl(&self, text: &str, expiry_epoch: i64) {
        self.write(EAS_CRAWL_TEXT, text);
        self.write(EAS_CRAWL_EXPIRY, &expiry_epoch.to_string());
    }

    pub fn crawl_expiry(&self) -> Option<i64> {
        self.read(EAS_CRAWL_EXPIRY)?.parse().ok()
    }

    pub fn crawl_active(&self) -> bool {
        self.flag(EAS_CRAWL_ACTIVE)
    }

    pub fn set_crawl_active(&self, on: bool) {
        self.set_flag(EAS_CRAWL_ACTIVE, on);
    }

    pub fn clear_crawl(&self) {
        self.remove(EAS_CRAWL_ACTIVE);
        self.remove(EAS_CRAWL_TEXT);
        self.remove(EAS_CRAWL_EXPIRY);
    }

    // ── MTV now-playing metadata ─────────────────────────────────────────────

    pub fn mtv_meta(&self) -> Option<MtvMeta> {
        self.read(MTV_META).map(|s| MtvMeta::from_tsv(&s))
    }

    pub fn set_mtv_meta(&self, meta: &MtvMeta) {
        self.write(MTV_META, &meta.to_tsv());
    }

    pub fn clear_mtv_meta(&self) {
        self.remove(MTV_META);
    }
}

/// Now-playing line for music-video stations, shared with the web remote as
/// a tab-separated row (`artist TAB title TAB album TAB year`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MtvMeta {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub year: String,
}

impl MtvMeta {
    pub fn from_tsv(line: &str) -> Self {
        let mut parts = line.split('\t');
        Self {
            artist: parts.next().unwrap_or_default().to_string(),
            title: parts.next().unwrap_or_default().to_string(),
            album: parts.next().unwrap_or_default().to_string(),
            year: parts.next().unwrap_or_default().to_string(),
        }
    }

    pub fn to_tsv(&self) -> String {
        format!("{}\t{}\t{}\t{}", self.artist, self.title, self.album, self.year)
    }

    /// Two-line overlay shown at the start and end of each video.
    pub fn overlay_text(&self) -> String {
        let mut lines = Vec::new();
        if !self.artist.is_empty() {
            lines.push(self.artist.clone());
        }
        if !self.title.is_empty() {
            lines.push(format!("\u{201c}{}\u{201d}", self.title));
        }
        let mut tail = String::new();
        if !self.album.is_empty() {
            tail.push_str(&self.album);
        }
        if !self.year.is_empty() {
            if !tail.is_empty() {
                tail.push_str(", ");
            }
            tail.push_str(&self.year);
        }
        if !tail.is_empty() {
            lines.push(tail);
        }
        lines.join("\n")
    }
}
