//! EPG channel lifecycle.
//!
//! The guide video itself comes from an external renderer; the controller
//! owns the refresh loop that re-invokes it and reloads the output, plus the
//! background-music sidecar, the one place a second player process exists.
//! The main player gives up its audio track while the sidecar runs and takes
//! it back on stop.

use crate::player::PlayerClient;
use retrotv_core::config::Config;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const MUSIC_PIDFILE: &str = "epg_music.pid";

pub struct EpgSession {
    refresh: Option<JoinHandle<()>>,
    music: Option<tokio::process::Child>,
    music_pidfile: Option<PathBuf>,
}

impl EpgSession {
    pub fn idle() -> Self {
        Self {
            refresh: None,
            music: None,
            music_pidfile: None,
        }
    }

    pub async fn start(&mut self, config: &Config, player: PlayerClient) {
        self.stop(&player).await;

        let output = config.epg_output_path();
        if let Err(e) = player.load(&output, 0).await {
            warn!("EPG load failed: {}", e);
        }
        player.set_property("loop-file", json!("inf")).await;

        let renderer = config.epg.renderer.clone();
        let refresh_secs = config.epg.refresh_secs.max(30);
        let refresh_player = player.clone();
        self.refresh = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(refresh_secs)).await;
                if let Some(cmd) = &renderer {
                    match tokio::process::Command::new("sh")
                        .arg("-c")
                        .arg(cmd)
                        .output()
                        .await
                    {
                        Ok(out) if out.status.success() => {}
                        Ok(out) => warn!("EPG renderer exited with {}", out.status),
                        Err(e) => warn!("EPG renderer failed to run: {}", e),
                    }
                }
                if let Err(e) = refresh_player.load(&output, 0).await {
                    warn!("EPG reload failed: {}", e);
                }
                refresh_player.set_property("loop-file", json!("inf")).await;
            }
        }));

        self.start_music(config, &player).await;
        info!("EPG session started (refresh every {}s)", refresh_secs);
    }

    async fn start_music(&mut self, config: &Config, player: &PlayerClient) {
        let Some(source) = config.epg.music_source.clone() else {
            return;
        };
        // Release the audio device so the sidecar can have it.
        player.set_property("aid", json!("no")).await;

        let spawned = tokio::process::Command::new(&config.player.binary)
            .arg("--no-video")
            .arg("--really-quiet")
            .arg("--loop-playlist=inf")
            .arg("--shuffle")
            .arg(&source)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn();
        match spawned {
            Ok(child) => {
                let pidfile = config.state_dir().join(MUSIC_PIDFILE);
                if let Some(pid) = child.id() {
                    if let Err(e) = std::fs::write(&pidfile, pid.to_string()) {
                        warn!("music pidfile write failed: {}", e);
                    }
                }
                self.music_pidfile = Some(pidfile);
                self.music = Some(child);
                info!("EPG music sidecar playing {}", source.display());
            }
            Err(e) => {
                warn!("music sidecar spawn failed: {}", e);
                player.set_property("aid", json!("auto")).await;
            }
        }
    }

    pub async fn stop(&mut self, player: &PlayerClient) {
        if let Some(handle) = self.refresh.take() {
            handle.abort();
        }
        if let Some(mut child) = self.music.take() {
            let _ = child.kill().await;
            // Reclaim the audio device the sidecar held.
            player.set_property("aid", json!("auto")).await;
        }
        if let Some(pidfile) = self.music_pidfile.take() {
            let _ = std::fs::remove_file(pidfile);
        }
    }
}
