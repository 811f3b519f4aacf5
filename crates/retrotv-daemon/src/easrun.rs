//! Emergency Alert preemption.
//!
//! Two cooperating watchers.  The alert runner drains the pending directory:
//! it parks the current channel, raises the EAS-active flag (which stalls the
//! interstitial machine), plays each rendered alert video, enforces a minimum
//! display time, retunes, and installs the crawl.  The crawl keeper re-applies
//! the crawl filter until its wall-clock expiry so a tune that rebuilds the
//! filter chain cannot shake it off.

use crate::player::PlayerClient;
use crate::tuner::Tuner;
use chrono::Local;
use retrotv_core::eas::{self, AlertDescriptor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{info, warn};

pub const CRAWL_LABEL: &str = "eascrawl";

const RUNNER_TICK: Duration = Duration::from_secs(1);
const KEEPER_TICK: Duration = Duration::from_secs(3);
/// An interruption never resolves faster than this, even for a short video.
const MIN_DISPLAY: Duration = Duration::from_secs(60);
const LOAD_SETTLE: Duration = Duration::from_secs(2);
const GENERATOR_TIMEOUT: Duration = Duration::from_secs(180);
/// Rendered alert videos kept for the web remote's archive view.
const KEEP_RENDERED: usize = 5;

/// Red band across the top plus the scrolling text strip.  The text rides in
/// a file so no escaping of the alert wording is ever needed.
pub fn crawl_graph(font: &Path, textfile: &Path) -> String {
    format!(
        "drawbox=x=0:y=0:w=iw:h=64:color=red@0.85:t=fill,\
         drawtext=fontfile={}:textfile={}:fontsize=40:fontcolor=white:y=14:\
         x=w-mod(160*t\\,w+tw)",
        font.display(),
        textfile.display()
    )
}

pub async fn install_crawl(tuner: &Tuner) {
    let graph = crawl_graph(
        &tuner.config().media.crawl_font,
        &tuner.state().crawl_text_path(),
    );
    tuner.player().add_filter(CRAWL_LABEL, &graph).await;
}

// ── alert runner ──────────────────────────────────────────────────────────────

pub async fn alert_runner(tuner: Arc<Tuner>) {
    info!("alert runner watching {}", tuner.config().pending_alert_dir().display());
    loop {
        tokio::time::sleep(RUNNER_TICK).await;
        if tuner.state().eas_active() {
            continue;
        }
        let pending = eas::list_pending(&tuner.config().pending_alert_dir());
        if pending.is_empty() {
            continue;
        }
        let Some((number, station)) = tuner.current_station() else {
            continue;
        };
        if tuner.is_eas_exempt(&station).await {
            info!("{}: exempt station, discarding {} alert(s)", station, pending.len());
            for path in pending {
                let _ = std::fs::remove_file(path);
            }
            continue;
        }
        run_interruption(&tuner, number, pending).await;
    }
}

enum PlayOutcome {
    Finished,
    UserOverride,
}

async fn run_interruption(tuner: &Tuner, resume_channel: u32, pending: Vec<PathBuf>) {
    let state = tuner.state();
    state.set_eas_resume_channel(resume_channel);
    state.set_eas_active(true);
    let start = Instant::now();
    info!("EAS interruption: {} pending alert(s)", pending.len());

    let mut queue = pending.into_iter();
    while let Some(path) = queue.next() {
        let alert = match AlertDescriptor::load(&path) {
            Ok(alert) => alert,
            Err(e) => {
                warn!("unreadable alert {}: {}", path.display(), e);
                let _ = std::fs::remove_file(&path);
                continue;
            }
        };

        let now = Local::now();
        state.set_crawl(&alert.crawl_text(), alert.expiry_or_default(now).timestamp());

        let video = match render_alert(tuner, &path, &alert).await {
            Some(video) => video,
            None => {
                warn!("alert generation failed for {}", path.display());
                let _ = std::fs::remove_file(&path);
                continue;
            }
        };
        let _ = std::fs::remove_file(&path);

        info!("playing alert video {}", video.display());
        if let Err(e) = tuner.player().load(&video, 0).await {
            warn!("alert video load failed: {}", e);
            continue;
        }
        tokio::time::sleep(LOAD_SETTLE).await;

        if let PlayOutcome::UserOverride = play_out(tuner.player(), &video).await {
            info!("user tuned away from alert, dropping the rest of the queue");
            for rest in queue.by_ref() {
                let _ = std::fs::remove_file(rest);
            }
            break;
        }
    }

    let elapsed = start.elapsed();
    if elapsed < MIN_DISPLAY {
        tokio::time::sleep(MIN_DISPLAY - elapsed).await;
    }

    state.set_eas_active(false);

    let resume = state.eas_resume_channel().unwrap_or(resume_channel);
    state.clear_eas_resume();
    tuner.tune_number(resume).await;

    if state.crawl_text().is_some() && state.crawl_expiry().is_some() {
        let exempt = match tuner.current_station() {
            Some((_, station)) => tuner.is_eas_exempt(&station).await,
            None => false,
        };
        if !exempt {
            state.set_crawl_active(true);
            install_crawl(tuner).await;
        }
    }

    prune_rendered(&tuner.config().rendered_alert_dir());
}

/// Watch the alert video until it finishes.  The viewer changing channels
/// mid-alert shows up as the player's `path` moving off the alert file.
async fn play_out(player: &PlayerClient, video: &Path) -> PlayOutcome {
    let wanted = video.to_string_lossy().to_string();
    loop {
        if player.eof_reached().await {
            return PlayOutcome::Finished;
        }
        let current = player.current_path().await;
        if !current.is_empty() && current != wanted {
            return PlayOutcome::UserOverride;
        }
        tokio::time::sleep(RUNNER_TICK).await;
    }
}

/// Hand the descriptor to the external generator; its stdout names the
/// rendered file.
async fn render_alert(tuner: &Tuner, pending: &Path, alert: &AlertDescriptor) -> Option<PathBuf> {
    let generator = tuner.config().eas_generator_path();
    let result = tokio::time::timeout(
        GENERATOR_TIMEOUT,
        Command::new(&generator).arg(pending).output(),
    )
    .await;
    let output = match result {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            warn!("alert generator exited with {}", output.status);
            return None;
        }
        Ok(Err(e)) => {
            warn!("alert generator {} failed to run: {}", generator.display(), e);
            return None;
        }
        Err(_) => {
            warn!("alert generator timed out");
            return None;
        }
    };

    let printed = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let video = if printed.is_empty() {
        tuner.config().rendered_alert_dir().join(alert.video_name())
    } else {
        PathBuf::from(printed)
    };
    video.exists().then_some(video)
}

fn prune_rendered(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut videos: Vec<(std::time::SystemTime, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "mp4").unwrap_or(false))
        .filter_map(|e| {
            let mtime = e.metadata().ok()?.modified().ok()?;
            Some((mtime, e.path()))
        })
        .collect();
    videos.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, path) in videos.into_iter().skip(KEEP_RENDERED) {
        let _ = std::fs::remove_file(path);
    }
}

// ── crawl keeper ──────────────────────────────────────────────────────────────

pub async fn crawl_keeper(tuner: Arc<Tuner>) {
    loop {
        tokio::time::sleep(KEEPER_TICK).await;
        let state = tuner.state();
        if !state.crawl_active() {
            continue;
        }
        let expired = match state.crawl_expiry() {
            Some(expiry) => Local::now().timestamp() >= expiry,
            // A crawl without an expiry file counts as expired.
            None => true,
        };
        if expired {
            info!("crawl expired, removing");
            tuner.player().remove_filter(CRAWL_LABEL).await;
            state.clear_crawl();
        } else {
            // Re-apply after any tune or load that rebuilt the filter chain.
            install_crawl(&tuner).await;
        }
    }
}
