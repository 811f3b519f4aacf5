//! Controller configuration.
//!
//! The controller's own knobs live in a TOML file (created with defaults on
//! first run).  Everything the external collaborators write (the weekly
//! schedule, the parental policy, the EAS settings, the YouTube channel map)
//! is JSON under `config_dir` and is re-read through [`JsonCache`], which
//! reloads on file-mtime change instead of shelling out per lookup.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub stations: SpecialStations,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub epg: EpgConfig,
    #[serde(default)]
    pub eas: EasSection,
}

/// Knobs for the alert runner; the alert *source* settings live in the
/// collaborator-owned `eas_config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EasSection {
    /// External alert-video generator.  Invoked with the pending descriptor
    /// path; prints the rendered file on stdout.
    #[serde(default)]
    pub generator: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the head-end tree.  Media, state and config directories hang
    /// off this unless overridden individually.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default)]
    pub media_dir: Option<PathBuf>,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_player_binary")]
    pub binary: String,
    #[serde(default = "default_player_socket")]
    pub socket: PathBuf,
    /// How long the supervisor waits for the IPC socket before giving up.
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_fullscreen")]
    pub fullscreen: bool,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// Station names with hardwired playback rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialStations {
    #[serde(default = "default_epg_station")]
    pub epg: String,
    #[serde(default = "default_weather_station")]
    pub weather: String,
    #[serde(default = "default_mtv_prefix")]
    pub mtv_prefix: String,
    #[serde(default = "default_bumpers_station")]
    pub bumpers: String,
    #[serde(default = "default_commercials_station")]
    pub commercials: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_snow")]
    pub snow: PathBuf,
    #[serde(default = "default_countdown")]
    pub countdown: PathBuf,
    #[serde(default = "default_offair")]
    pub offair: PathBuf,
    #[serde(default = "default_test_pattern")]
    pub test_pattern: PathBuf,
    #[serde(default = "default_crawl_font")]
    pub crawl_font: PathBuf,
    #[serde(default = "default_weather_url")]
    pub weather_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpgConfig {
    /// External renderer re-invoked by the refresh loop.  Empty disables it.
    #[serde(default)]
    pub renderer: Option<String>,
    #[serde(default = "default_epg_refresh_secs")]
    pub refresh_secs: u64,
    #[serde(default = "default_epg_output")]
    pub output: PathBuf,
    /// Playlist or directory for the background music sidecar.
    #[serde(default)]
    pub music_source: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            media_dir: None,
            state_dir: None,
            config_dir: None,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            binary: default_player_binary(),
            socket: default_player_socket(),
            startup_timeout_secs: default_startup_timeout_secs(),
            fullscreen: default_fullscreen(),
            extra_args: Vec::new(),
        }
    }
}

impl Default for SpecialStations {
    fn default() -> Self {
        Self {
            epg: default_epg_station(),
            weather: default_weather_station(),
            mtv_prefix: default_mtv_prefix(),
            bumpers: default_bumpers_station(),
            commercials: default_commercials_station(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            snow: default_snow(),
            countdown: default_countdown(),
            offair: default_offair(),
            test_pattern: default_test_pattern(),
            crawl_font: default_crawl_font(),
            weather_url: default_weather_url(),
        }
    }
}

impl Default for EpgConfig {
    fn default() -> Self {
        Self {
            renderer: None,
            refresh_secs: default_epg_refresh_secs(),
            output: default_epg_output(),
            music_source: None,
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("retrotv")
}

fn default_player_binary() -> String {
    "mpv".to_string()
}

fn default_player_socket() -> PathBuf {
    PathBuf::from("/tmp/mpv-socket")
}

fn default_startup_timeout_secs() -> u64 {
    10
}

fn default_fullscreen() -> bool {
    true
}

fn default_epg_station() -> String {
    "EPG".to_string()
}

fn default_weather_station() -> String {
    "WEATHER".to_string()
}

fn default_mtv_prefix() -> String {
    "MTV".to_string()
}

fn default_bumpers_station() -> String {
    "BUMPERS".to_string()
}

fn default_commercials_station() -> String {
    "COMMERCIALS".to_string()
}

fn default_snow() -> PathBuf {
    PathBuf::from("snow.mp4")
}

fn default_countdown() -> PathBuf {
    PathBuf::from("countdown.mp4")
}

fn default_offair() -> PathBuf {
    PathBuf::from("offair.mp4")
}

fn default_test_pattern() -> PathBuf {
    PathBuf::from("testpattern.png")
}

fn default_crawl_font() -> PathBuf {
    PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSansMono-Bold.ttf")
}

fn default_weather_url() -> String {
    "udp://239.255.0.1:5004".to_string()
}

fn default_epg_refresh_secs() -> u64 {
    300
}

fn default_epg_output() -> PathBuf {
    PathBuf::from("epg.mp4")
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("retrotv")
            .join("config.toml")
    }

    // ── derived directories ──────────────────────────────────────────────────

    pub fn media_dir(&self) -> PathBuf {
        self.paths
            .media_dir
            .clone()
            .unwrap_or_else(|| self.paths.base_dir.join("media"))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.paths
            .state_dir
            .clone()
            .unwrap_or_else(|| self.paths.base_dir.join("state"))
    }

    pub fn config_dir(&self) -> PathBuf {
        self.paths
            .config_dir
            .clone()
            .unwrap_or_else(|| self.paths.base_dir.join("config"))
    }

    pub fn channels_tsv(&self) -> PathBuf {
        self.state_dir().join("channels.tsv")
    }

    pub fn station_index(&self, station: &str) -> PathBuf {
        self.media_dir().join("channels").join(station).join("index.tsv")
    }

    pub fn pending_alert_dir(&self) -> PathBuf {
        self.state_dir().join("eas_pending")
    }

    pub fn rendered_alert_dir(&self) -> PathBuf {
        self.state_dir().join("eas_active")
    }

    pub fn eas_generator_path(&self) -> PathBuf {
        self.eas
            .generator
            .clone()
            .unwrap_or_else(|| self.paths.base_dir.join("bin").join("eas_generate.py"))
    }

    // ── media artifacts (relative entries resolve against media_dir) ─────────

    pub fn snow_path(&self) -> PathBuf {
        self.resolve_media(&self.media.snow)
    }

    pub fn countdown_path(&self) -> PathBuf {
        self.resolve_media(&self.media.countdown)
    }

    pub fn offair_path(&self) -> PathBuf {
        self.resolve_media(&self.media.offair)
    }

    pub fn test_pattern_path(&self) -> PathBuf {
        self.resolve_media(&self.media.test_pattern)
    }

    pub fn epg_output_path(&self) -> PathBuf {
        self.resolve_media(&self.epg.output)
    }

    fn resolve_media(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.media_dir().join(p)
        }
    }

    // ── collaborator-owned JSON documents ────────────────────────────────────

    pub fn schedule_config_path(&self) -> PathBuf {
        self.config_dir().join("schedule_config.json")
    }

    pub fn schedule_state_path(&self) -> PathBuf {
        self.state_dir().join("schedule_state.json")
    }

    pub fn parental_config_path(&self) -> PathBuf {
        self.config_dir().join("parental_lock.json")
    }

    pub fn eas_config_path(&self) -> PathBuf {
        self.config_dir().join("eas_config.json")
    }

    pub fn youtube_config_path(&self) -> PathBuf {
        self.config_dir().join("youtube_channels.json")
    }
}

// ── mtime-cached JSON loader ──────────────────────────────────────────────────

/// Caches a deserialized JSON document, reloading only when the file's mtime
/// changes.  A missing or unparseable file yields `T::default()` so lookups
/// degrade instead of failing the watcher that asked.
pub struct JsonCache<T> {
    path: PathBuf,
    mtime: Option<SystemTime>,
    value: T,
}

impl<T: DeserializeOwned + Default> JsonCache<T> {
    pub fn new(path: PathBuf) -> Self {
        let mut cache = Self {
            path,
            mtime: None,
            value: T::default(),
        };
        cache.refresh();
        cache
    }

    pub fn get(&mut self) -> &T {
        self.refresh();
        &self.value
    }

    fn refresh(&mut self) {
        let mtime = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        if mtime == self.mtime && self.mtime.is_some() {
            return;
        }
        self.mtime = mtime;
        self.value = match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(v) => v,
                Err(e) => {
                    warn!("invalid JSON in {}: {}", self.path.display(), e);
                    T::default()
                }
            },
            Err(_) => T::default(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_derives_directories() {
        let config = Config::default();
        assert!(config.media_dir().ends_with("retrotv/media"));
        assert!(config.channels_tsv().ends_with("state/channels.tsv"));
        assert_eq!(config.player.startup_timeout_secs, 10);
        assert_eq!(config.stations.epg, "EPG");
    }

    #[test]
    fn relative_media_paths_resolve_against_media_dir() {
        let mut config = Config::default();
        config.paths.base_dir = PathBuf::from("/srv/tv");
        assert_eq!(config.snow_path(), PathBuf::from("/srv/tv/media/snow.mp4"));
        config.media.snow = PathBuf::from("/elsewhere/static.mp4");
        assert_eq!(config.snow_path(), PathBuf::from("/elsewhere/static.mp4"));
    }

    #[test]
    fn json_cache_reloads_on_mtime_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        let mut cache: JsonCache<std::collections::HashMap<String, u32>> =
            JsonCache::new(path.clone());
        assert!(cache.get().is_empty());

        std::fs::write(&path, r#"{"a": 1}"#).unwrap();
        assert_eq!(cache.get().get("a"), Some(&1));
    }
}
