//! Station tuner.
//!
//! `tune_number` is the single entry point every watcher funnels through.  It
//! tears down transient per-station state, then walks the dispatch ladder:
//! EPG, weather, MTV family, YouTube live, scheduled pseudo-shows, scheduled
//! content, epoch fallback, snow.

use crate::epg::EpgSession;
use crate::interstitial::Machine;
use crate::player::PlayerClient;
use chrono::Local;
use rand::seq::SliceRandom;
use retrotv_core::channels::ChannelMap;
use retrotv_core::config::{Config, JsonCache};
use retrotv_core::eas::EasConfig;
use retrotv_core::index::StationIndex;
use retrotv_core::mtvmeta;
use retrotv_core::parental::{self, ParentalConfig};
use retrotv_core::picker::{self, Pick};
use retrotv_core::schedule::{self, Resolved, ScheduleConfig, ScheduleState, SIGNOFF, SIGNON};
use retrotv_core::state::{MtvMeta, StateRoot};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const SCRAMBLE_LABEL: &str = "scramble";
/// Hue rotation + noise + RGB shift, the lockout look.
pub const SCRAMBLE_GRAPH: &str =
    "hue=H=t*90:s=3,noise=alls=80:allf=t,rgbashift=rh=30:bh=-30:gv=20";

const CHANNEL_OSD_MS: u64 = 3000;
const MTV_OVERLAY_MS: u64 = 4000;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct YoutubeEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

struct Caches {
    parental: JsonCache<ParentalConfig>,
    eas: JsonCache<EasConfig>,
    schedule_config: JsonCache<ScheduleConfig>,
    schedule_state: JsonCache<ScheduleState>,
    youtube: JsonCache<HashMap<String, YoutubeEntry>>,
}

pub struct Tuner {
    config: Config,
    player: PlayerClient,
    state: StateRoot,
    caches: Mutex<Caches>,
    machine: Arc<StdMutex<Machine>>,
    epg: Mutex<EpgSession>,
}

impl Tuner {
    pub fn new(
        config: Config,
        player: PlayerClient,
        state: StateRoot,
        machine: Arc<StdMutex<Machine>>,
    ) -> Self {
        let caches = Caches {
            parental: JsonCache::new(config.parental_config_path()),
            eas: JsonCache::new(config.eas_config_path()),
            schedule_config: JsonCache::new(config.schedule_config_path()),
            schedule_state: JsonCache::new(config.schedule_state_path()),
            youtube: JsonCache::new(config.youtube_config_path()),
        };
        Self {
            config,
            player,
            state,
            caches: Mutex::new(caches),
            machine,
            epg: Mutex::new(EpgSession::idle()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn player(&self) -> &PlayerClient {
        &self.player
    }

    pub fn state(&self) -> &StateRoot {
        &self.state
    }

    pub fn channels(&self) -> ChannelMap {
        ChannelMap::load(&self.config.channels_tsv()).unwrap_or_default()
    }

    /// Station for the currently tuned channel.
    pub fn current_station(&self) -> Option<(u32, String)> {
        let number = self.state.current_channel()?;
        let station = self.channels().resolve(number)?.station.clone();
        Some((number, station))
    }

    pub fn is_mtv(&self, station: &str) -> bool {
        let prefix = &self.config.stations.mtv_prefix;
        station == prefix.as_str()
            || (station.starts_with(prefix.as_str())
                && station.len() == prefix.len() + 4
                && station[prefix.len()..].chars().all(|c| c.is_ascii_digit()))
    }

    pub fn is_epg(&self, station: &str) -> bool {
        station == self.config.stations.epg
    }

    pub fn is_weather(&self, station: &str) -> bool {
        station == self.config.stations.weather
    }

    fn is_interstitial_station(&self, station: &str) -> bool {
        station == self.config.stations.bumpers || station == self.config.stations.commercials
    }

    pub async fn is_eas_exempt(&self, station: &str) -> bool {
        self.caches.lock().await.eas.get().is_exempt(station)
    }

    pub async fn parental(&self) -> ParentalConfig {
        self.caches.lock().await.parental.get().clone()
    }

    pub async fn resolve_schedule(&self, station: &str) -> Option<Resolved> {
        let mut caches = self.caches.lock().await;
        let state = caches.schedule_state.get().clone();
        let config = caches.schedule_config.get();
        schedule::resolve_now(config, &state, station, Local::now())
    }

    fn load_index(&self, station: &str) -> StationIndex {
        StationIndex::load(&self.config.station_index(station)).unwrap_or_default()
    }

    // ── entry points ─────────────────────────────────────────────────────────

    pub async fn tune_number(&self, number: u32) {
        let Some(channel) = self.channels().resolve(number).cloned() else {
            warn!("tune: channel {} not in lineup", number);
            self.play_snow().await;
            return;
        };
        self.state.set_current_channel(number);
        self.tune_station(&channel.station, number).await;
    }

    pub async fn retune_current(&self) {
        if let Some((number, station)) = self.current_station() {
            self.tune_station(&station, number).await;
        }
    }

    async fn tune_station(&self, station: &str, number: u32) {
        info!("tune: ch {} → {}", number, station);
        self.teardown(station, number).await;

        if self.is_epg(station) {
            self.epg
                .lock()
                .await
                .start(&self.config, self.player.clone())
                .await;
        } else if self.is_weather(station) {
            let url = self.config.media.weather_url.clone();
            if let Err(e) = self.player.load_url(&url).await {
                warn!("weather stream load failed: {}", e);
            }
        } else if self.is_mtv(station) {
            self.play_next_mtv(station).await;
        } else if let Some(entry) = self.youtube_entry(station).await {
            self.play_live(station, &entry).await;
        } else if let Some(resolved) = self.resolve_schedule(station).await {
            match resolved.show_id.as_str() {
                SIGNOFF => self.play_signoff(number).await,
                SIGNON => self.play_signon(number).await,
                _ => self.play_scheduled(station, &resolved).await,
            }
        } else {
            self.play_epoch(station).await;
        }

        self.apply_parental(number).await;
        self.player
            .show_text(&format!("{number:>3} {station}"), CHANNEL_OSD_MS)
            .await;
    }

    /// Pre-transition teardown: everything transient from the previous
    /// station goes before the first load of the next one.
    async fn teardown(&self, station: &str, number: u32) {
        self.state.set_parental_unlocked(false);
        self.player.remove_filter(SCRAMBLE_LABEL).await;
        self.player.show_text("", 1).await;
        self.state.clear_mtv_meta();
        if let Err(e) = parental::re_lock_auto(&self.config.parental_config_path()) {
            warn!("re-lock auto channels failed: {}", e);
        }
        self.state.clear_other_offair(number);
        self.machine.lock().unwrap_or_else(|p| p.into_inner()).reset();
        if !self.is_epg(station) {
            self.epg.lock().await.stop(&self.player).await;
        }
    }

    // ── dispatch targets ─────────────────────────────────────────────────────

    async fn youtube_entry(&self, station: &str) -> Option<YoutubeEntry> {
        self.caches.lock().await.youtube.get().get(station).cloned()
    }

    async fn play_live(&self, station: &str, entry: &YoutubeEntry) {
        match resolve_live_url(&entry.url).await {
            Some(url) => {
                info!("live: {} → {}", station, entry.name);
                if let Err(e) = self.player.load_url(&url).await {
                    warn!("live stream load failed: {}", e);
                    self.play_snow().await;
                }
            }
            None => {
                warn!("live: no stream for {}, falling back to snow", station);
                self.play_snow().await;
            }
        }
    }

    async fn play_signoff(&self, number: u32) {
        if self.state.offair(number) {
            self.play_looped(&self.config.test_pattern_path()).await;
        } else {
            let offair = self.config.offair_path();
            if let Err(e) = self.player.load(&offair, 0).await {
                warn!("off-air animation load failed: {}", e);
            }
            self.state.set_offair(number, true);
        }
    }

    async fn play_signon(&self, number: u32) {
        self.state.set_offair(number, false);
        let offair = self.config.offair_path();
        if let Err(e) = self.player.load(&offair, 0).await {
            warn!("sign-on animation load failed: {}", e);
        }
    }

    async fn play_scheduled(&self, station: &str, resolved: &Resolved) {
        let show_dir = resolved.show.as_ref().map(|s| s.path.clone());
        let index = self.load_index(station);
        let pick = show_dir
            .filter(|d| !d.as_os_str().is_empty())
            .and_then(|dir| picker::scheduled_pick(index.entries(), &dir, now_epoch()));
        match pick {
            Some(pick) => self.load_pick(&pick).await,
            // Show has no indexed episodes; the station carries on.
            None => self.play_epoch(station).await,
        }
    }

    async fn play_epoch(&self, station: &str) {
        let index = self.load_index(station);
        match picker::epoch_pick(index.entries(), now_epoch()) {
            Some(pick) => self.load_pick(&pick).await,
            None => {
                warn!("{}: empty index, loading snow", station);
                self.play_snow().await;
            }
        }
    }

    pub async fn play_snow(&self) {
        self.play_looped(&self.config.snow_path()).await;
    }

    async fn play_looped(&self, path: &Path) {
        let file = path.to_string_lossy();
        if let Err(e) = self
            .player
            .command(serde_json::json!(["loadfile", file, "replace", "loop-file=inf"]))
            .await
        {
            warn!("looped load {} failed: {}", path.display(), e);
        }
        self.player
            .set_property("pause", serde_json::json!(false))
            .await;
    }

    async fn load_pick(&self, pick: &Pick) {
        if let Err(e) = self.player.load(&pick.path, pick.offset).await {
            warn!("load {} failed: {}", pick.path.display(), e);
        }
    }

    // ── MTV ──────────────────────────────────────────────────────────────────

    pub async fn play_next_mtv(&self, station: &str) {
        let index = self.load_index(station);
        let Some(pick) = picker::mtv_pick(index.entries(), now_epoch()) else {
            warn!("{}: empty index, loading snow", station);
            self.play_snow().await;
            return;
        };
        self.load_pick(&pick).await;

        let meta = match mtvmeta::from_sidecar(&pick.path) {
            Some(meta) => meta,
            None => probe_meta(&pick.path).await.unwrap_or_default(),
        };
        self.state.set_mtv_meta(&meta);
        self.show_mtv_overlay().await;
    }

    pub async fn show_mtv_overlay(&self) {
        if let Some(meta) = self.state.mtv_meta() {
            let text = meta.overlay_text();
            if !text.is_empty() {
                self.player.show_text(&text, MTV_OVERLAY_MS).await;
            }
        }
    }

    // ── interstitial material ────────────────────────────────────────────────

    pub async fn play_bumper(&self) {
        self.play_random_from(&self.config.stations.bumpers).await;
    }

    pub async fn play_commercial(&self) {
        self.play_random_from(&self.config.stations.commercials).await;
    }

    async fn play_random_from(&self, station: &str) {
        let index = self.load_index(station);
        let pick = index.entries().choose(&mut rand::thread_rng()).cloned();
        match pick {
            Some(entry) => {
                if let Err(e) = self.player.load(&entry.path, 0).await {
                    warn!("interstitial load failed: {}", e);
                }
            }
            None => {
                warn!("{}: no interstitial material, retuning", station);
                self.retune_current().await;
            }
        }
    }

    pub async fn play_countdown(&self, seek: u64) {
        let countdown = self.config.countdown_path();
        if let Err(e) = self.player.load(&countdown, seek).await {
            warn!("countdown load failed: {}", e);
        }
    }

    /// End of an episode inside a scheduled block: the next file of the same
    /// show, from the top.
    pub async fn advance_episode(&self) {
        let Some((_, station)) = self.current_station() else {
            return;
        };
        let resolved = self.resolve_schedule(&station).await;
        let show_dir = resolved
            .filter(|r| !r.is_pseudo())
            .and_then(|r| r.show.map(|s| s.path));
        let Some(show_dir) = show_dir.filter(|d| !d.as_os_str().is_empty()) else {
            // Block ended while the episode played out; the regular ladder
            // decides what is on now.
            self.retune_current().await;
            return;
        };

        let current = self.player.current_path().await;
        let index = self.load_index(&station);
        match picker::next_in_show(index.entries(), &show_dir, Path::new(&current)) {
            Some(pick) => self.load_pick(&pick).await,
            None => self.retune_current().await,
        }
    }

    /// Whether the interstitial machine may insert bumpers after the current
    /// item ends.
    pub async fn interstitials_allowed(&self, station: &str, pseudo: bool) -> bool {
        !self.state.eas_active()
            && !pseudo
            && !self.is_epg(station)
            && !self.is_weather(station)
            && !self.is_mtv(station)
            && !self.is_interstitial_station(station)
    }

    // ── parental lockout ─────────────────────────────────────────────────────

    async fn apply_parental(&self, number: u32) {
        let policy = self.parental().await;
        if policy.is_locked(number) && !self.state.parental_unlocked() {
            self.scramble().await;
        } else if policy.is_always_mute(number) {
            self.player.set_mute(true).await;
        } else {
            self.player.set_mute(false).await;
        }
    }

    pub async fn scramble(&self) {
        self.player.add_filter(SCRAMBLE_LABEL, SCRAMBLE_GRAPH).await;
        self.player.set_mute(true).await;
    }

    /// PIN accepted: clear the lockout in place, no retune.
    pub async fn unscramble(&self) {
        self.state.set_parental_unlocked(true);
        self.player.remove_filter(SCRAMBLE_LABEL).await;
        self.player.set_mute(false).await;
    }
}

fn now_epoch() -> i64 {
    Local::now().timestamp()
}

/// Ask the external resolver for a playable URL.  Any failure reads as "no
/// stream" and the caller falls back to snow.
async fn resolve_live_url(page_url: &str) -> Option<String> {
    if page_url.is_empty() {
        return None;
    }
    let result = tokio::time::timeout(
        Duration::from_secs(20),
        tokio::process::Command::new("yt-dlp")
            .arg("-g")
            .arg(page_url)
            .output(),
    )
    .await;
    let output = match result {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            warn!("stream resolver exited with {}", output.status);
            return None;
        }
        Ok(Err(e)) => {
            warn!("stream resolver failed to run: {}", e);
            return None;
        }
        Err(_) => {
            warn!("stream resolver timed out");
            return None;
        }
    };
    let url = String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    (!url.is_empty()).then_some(url)
}

/// ffprobe fallback for files without a metadata sidecar.
async fn probe_meta(path: &Path) -> Option<MtvMeta> {
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        tokio::process::Command::new("ffprobe")
            .args(["-v", "error", "-show_entries", "format_tags", "-of", "json"])
            .arg(path)
            .output(),
    )
    .await;
    let output = result.ok()?.ok()?;
    if !output.status.success() {
        return None;
    }
    let doc: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
    let tags = doc.get("format")?.get("tags")?;
    let field = |name: &str| {
        tags.get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    Some(mtvmeta::build_meta(
        path,
        &field("title"),
        &field("artist"),
        &field("album"),
        &field("date"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use retrotv_core::config::Config;

    fn tuner_with_defaults() -> Tuner {
        let config = Config::default();
        let player = PlayerClient::new(std::path::PathBuf::from("/nowhere/mpv.sock"));
        let state = StateRoot::new(std::env::temp_dir().join("retrotv-tuner-test"));
        Tuner::new(config, player, state, Arc::new(StdMutex::new(Machine::new())))
    }

    #[test]
    fn mtv_family_matching() {
        let tuner = tuner_with_defaults();
        assert!(tuner.is_mtv("MTV"));
        assert!(tuner.is_mtv("MTV1985"));
        assert!(!tuner.is_mtv("MTV85"));
        assert!(!tuner.is_mtv("MTVXXXX"));
        assert!(!tuner.is_mtv("NICK"));
    }
}
