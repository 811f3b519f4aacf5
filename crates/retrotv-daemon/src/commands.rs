//! Command dispatch.
//!
//! Three independent 10 Hz pollers over the trigger files the remotes write:
//! `channel_cmd` (up / down / digit string), `volume` (signed delta), `mute`
//! (empty, toggles).  Each trigger is deleted before acting, so rapid repeats
//! serialize on the poll cadence.

use crate::tuner::Tuner;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const POLL: Duration = Duration::from_millis(100);

pub async fn channel_watcher(tuner: Arc<Tuner>) {
    loop {
        tokio::time::sleep(POLL).await;
        let Some(cmd) = tuner.state().take_channel_cmd() else {
            continue;
        };
        handle_channel_cmd(&tuner, &cmd).await;
    }
}

async fn handle_channel_cmd(tuner: &Tuner, cmd: &str) {
    match cmd {
        "up" | "down" => {
            let channels = tuner.channels();
            let from = tuner.state().current_channel().unwrap_or(0);
            let next = if cmd == "up" {
                channels.up(from)
            } else {
                channels.down(from)
            };
            match next {
                Some(number) => tuner.tune_number(number).await,
                None => warn!("channel {}: no enabled channels", cmd),
            }
        }
        digits if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
            // On a locked channel a digit entry is tried as the PIN first;
            // a match unlocks in place, anything else tunes.
            if let Some(number) = tuner.state().current_channel() {
                let policy = tuner.parental().await;
                if policy.is_locked(number)
                    && !tuner.state().parental_unlocked()
                    && policy.pin_matches(digits)
                {
                    info!("PIN accepted, unlocking channel {}", number);
                    tuner.unscramble().await;
                    return;
                }
            }
            match digits.parse::<u32>() {
                Ok(number) => tuner.tune_number(number).await,
                Err(_) => warn!("channel command out of range: {}", digits),
            }
        }
        other => warn!("ignoring channel command {:?}", other),
    }
}

pub async fn volume_watcher(tuner: Arc<Tuner>) {
    loop {
        tokio::time::sleep(POLL).await;
        let Some(delta) = tuner.state().take_volume_delta() else {
            continue;
        };
        info!("volume {:+}", delta);
        tuner.player().set_mute(false).await;
        tuner.player().add_volume(delta).await;
    }
}

pub async fn mute_watcher(tuner: Arc<Tuner>) {
    loop {
        tokio::time::sleep(POLL).await;
        if tuner.state().take_mute_toggle() {
            info!("mute toggled");
            tuner.player().cycle_mute().await;
        }
    }
}
