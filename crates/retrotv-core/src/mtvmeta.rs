//! Now-playing metadata for music-video files.
//!
//! Downloads carry a `.info.json` sidecar with title/artist/album fields;
//! titles are routinely `Artist - Title (Official Video)` shaped and need
//! cleanup before they can go on screen.  When no sidecar exists the daemon
//! falls back to ffprobe tags and funnels them through the same cleanup.

use crate::state::MtvMeta;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SidecarInfo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub uploader: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub upload_date: String,
}

/// Read `<video>.info.json` next to the media file.  `None` when there is no
/// sidecar; the caller may then probe the file itself.
pub fn from_sidecar(media_path: &Path) -> Option<MtvMeta> {
    let sidecar = media_path.with_extension("info.json");
    let content = std::fs::read_to_string(sidecar).ok()?;
    let info: SidecarInfo = serde_json::from_str(&content).ok()?;

    let artist = [&info.artist, &info.uploader, &info.channel]
        .into_iter()
        .find(|s| !s.is_empty())
        .cloned()
        .unwrap_or_default();

    Some(build_meta(
        media_path,
        &info.title,
        &artist,
        &info.album,
        &info.upload_date,
    ))
}

/// Normalize raw tag fields into an [`MtvMeta`]: split `Artist - Title`
/// shapes, strip noise suffixes, derive the year.
pub fn build_meta(
    media_path: &Path,
    title: &str,
    artist: &str,
    album: &str,
    date_hint: &str,
) -> MtvMeta {
    let (artist, title) = split_artist_title(artist, title);
    MtvMeta {
        artist,
        title: clean_title(&title),
        album: album.to_string(),
        year: year_for(media_path, date_hint),
    }
}

fn split_artist_title(artist: &str, title: &str) -> (String, String) {
    if let Some((left, right)) = title.split_once(" - ") {
        let left = left.trim();
        if artist.is_empty() || artist == left {
            return (left.to_string(), right.trim().to_string());
        }
    }
    (artist.to_string(), title.to_string())
}

const NOISE_PREFIXES: [&str; 9] = [
    "official", "music", "hd", "4k", "remaster", "video", "lyric", "audio", "full",
];

/// Drop bracketed suffixes like `(Official Video)` or `[HD Remaster]`.
pub fn clean_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let chars: Vec<char> = title.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '(' || c == '[' {
            let closer = if c == '(' { ')' } else { ']' };
            if let Some(rel) = chars[i + 1..].iter().position(|&x| x == closer) {
                let inner: String = chars[i + 1..i + 1 + rel].iter().collect();
                let lower = inner.to_lowercase();
                if NOISE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
                    while out.ends_with(' ') {
                        out.pop();
                    }
                    i += rel + 2;
                    continue;
                }
            }
        }
        out.push(c);
        i += 1;
    }
    out.trim().to_string()
}

/// A four-digit parent directory names the year; otherwise the first four
/// characters of the upload date.
pub fn year_for(media_path: &Path, date_hint: &str) -> String {
    let parent = media_path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if parent.len() == 4 && parent.chars().all(|c| c.is_ascii_digit()) {
        return parent.to_string();
    }
    if date_hint.len() >= 4 {
        return date_hint[..4].to_string();
    }
    String::new()
}
