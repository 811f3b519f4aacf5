//! Emergency Alert System plumbing: configuration, pending alert
//! descriptors, and the crawl text shown after an interruption.
//!
//! Alerts arrive as JSON files dropped into the pending directory by the
//! external poller; the file's presence is the work-queue signal.

use chrono::{DateTime, Duration, Local};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Crawl lifetime when an alert carries no usable expiry.
pub const DEFAULT_EXPIRY_SECS: i64 = 120;

#[derive(Debug, Clone, Deserialize)]
pub struct EasConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// SAME code → enabled.  Consumed by the external poller; kept here so
    /// the whole document round-trips through one struct.
    #[serde(default)]
    pub alert_types: HashMap<String, bool>,
    /// Stations that never get interrupted (and never show the crawl).
    #[serde(default)]
    pub exempt_channels: Vec<String>,
}

impl Default for EasConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            latitude: 0.0,
            longitude: 0.0,
            poll_interval_seconds: default_poll_interval(),
            alert_types: HashMap::new(),
            exempt_channels: Vec::new(),
        }
    }
}

fn default_poll_interval() -> u64 {
    45
}

impl EasConfig {
    pub fn is_exempt(&self, station: &str) -> bool {
        self.exempt_channels
            .iter()
            .any(|s| s.eq_ignore_ascii_case(station))
    }
}

/// One pending alert as written by the poller.  Unknown producers may omit
/// anything; every field defaults to empty.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AlertDescriptor {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub event_code: String,
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub areas: String,
    /// ISO-8601 with offset, e.g. `2025-06-02T16:30:00-05:00`.
    #[serde(default)]
    pub expires: String,
}

impl AlertDescriptor {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn expires_at(&self) -> Option<DateTime<Local>> {
        DateTime::parse_from_rfc3339(&self.expires)
            .ok()
            .map(|t| t.with_timezone(&Local))
    }

    /// The crawl's wall-clock deadline: the alert's own expiry when present,
    /// otherwise `now + 120 s`.
    pub fn expiry_or_default(&self, now: DateTime<Local>) -> DateTime<Local> {
        self.expires_at()
            .unwrap_or_else(|| now + Duration::seconds(DEFAULT_EXPIRY_SECS))
    }

    /// `EVENT for AREAS until EXPIRES. HEADLINE`, omitting missing parts.
    pub fn crawl_text(&self) -> String {
        let mut text = if self.event.is_empty() {
            self.event_code.clone()
        } else {
            self.event.to_uppercase()
        };
        if !self.areas.is_empty() {
            text.push_str(&format!(" for {}", self.areas));
        }
        if let Some(expires) = self.expires_at() {
            text.push_str(&format!(" until {}", expires.format("%I:%M %p")));
        }
        text.push('.');
        if !self.headline.is_empty() {
            text.push(' ');
            text.push_str(&self.headline);
        }
        text
    }

    /// Filename stem for the rendered alert video.
    pub fn video_name(&self) -> String {
        format!("eas_{}.mp4", sanitize_id(&self.id))
    }
}

pub fn sanitize_id(id: &str) -> String {
    if id.is_empty() {
        return "alert".to_string();
    }
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Pending alert files in filename order.  A missing directory is an empty
/// queue, not an error.
pub fn list_pending(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
        .collect();
    files.sort();
    files
}
