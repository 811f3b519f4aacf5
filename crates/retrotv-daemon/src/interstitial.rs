//! Interstitial state machine.
//!
//! After each content item ends the machine decides what runs next: bumpers
//! and commercials, the countdown to the half-hour boundary, the next
//! episode, or a plain retune.  The pure transition logic lives in
//! [`Machine`]; the 1 Hz watcher wires it to the player and the tuner.
//!
//! The countdown artifact is a fixed 61-second video numbering 61→0, so for
//! `remaining` seconds to the boundary the displayed number equals the real
//! remainder when seeked to `61 − remaining`.

use crate::tuner::Tuner;
use chrono::Local;
use retrotv_core::schedule::{self, SIGNOFF, SIGNON};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const TICK: Duration = Duration::from_secs(1);
/// Commercials/bumpers per break in scheduled mode before the episode must
/// resume.
const SCHEDULED_BREAK_CAP: u32 = 4;
/// Enter the countdown instead of another clip this close to the boundary.
const COUNTDOWN_WINDOW_SECS: u64 = 60;
const COUNTDOWN_VIDEO_SECS: u64 = 61;
/// Re-show the now-playing overlay inside the last stretch of a music video.
const MTV_OVERLAY_TAIL_SECS: f64 = 7.0;
/// Unchanged integer position for this many consecutive ticks means the
/// player is wedged on the current video.
const MTV_STUCK_TICKS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Content,
    Interstitial,
    Countdown,
}

/// What the watcher observed at the moment the current item ended.
#[derive(Debug, Clone)]
pub struct EndContext {
    pub is_mtv: bool,
    /// SIGNOFF / SIGNON when the schedule resolves to a pseudo-show.
    pub pseudo: Option<&'static str>,
    /// A schedule block (real or pseudo) covers the current time.
    pub schedule_active: bool,
    pub interstitials_allowed: bool,
    pub secs_to_half_hour: u64,
    /// Pre-flipped fair coin for the unscheduled second-commercial decision.
    pub coin_heads: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NextMtv,
    /// Off-air animation finished: latch the off-air flag and hold the test
    /// pattern.
    SignoffEnded,
    NextEpisode,
    PlayBumper,
    PlayCommercial,
    PlayCountdown { seek: u64 },
    Retune,
}

#[derive(Debug)]
pub struct Machine {
    phase: Phase,
    /// Interstitials played since the last content item.
    k: u32,
    mtv_last_pos: Option<i64>,
    mtv_stuck_ticks: u32,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Content,
            k: 0,
            mtv_last_pos: None,
            mtv_stuck_ticks: 0,
        }
    }

    /// A tune supersedes whatever break was in progress.
    pub fn reset(&mut self) {
        self.phase = Phase::Content;
        self.k = 0;
        self.mtv_last_pos = None;
        self.mtv_stuck_ticks = 0;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn on_end(&mut self, ctx: &EndContext) -> Action {
        match self.phase {
            Phase::Content => self.end_of_content(ctx),
            Phase::Interstitial => self.end_of_interstitial(ctx),
            Phase::Countdown => {
                self.phase = Phase::Content;
                Action::NextEpisode
            }
        }
    }

    fn end_of_content(&mut self, ctx: &EndContext) -> Action {
        if ctx.is_mtv {
            return Action::NextMtv;
        }
        match ctx.pseudo {
            Some(SIGNOFF) => return Action::SignoffEnded,
            Some(SIGNON) => return Action::NextEpisode,
            _ => {}
        }
        if ctx.interstitials_allowed {
            self.phase = Phase::Interstitial;
            self.k = 0;
            return Action::PlayBumper;
        }
        Action::Retune
    }

    fn end_of_interstitial(&mut self, ctx: &EndContext) -> Action {
        self.k += 1;

        if ctx.schedule_active {
            if ctx.secs_to_half_hour <= COUNTDOWN_WINDOW_SECS {
                self.phase = Phase::Countdown;
                let seek = COUNTDOWN_VIDEO_SECS
                    .saturating_sub(ctx.secs_to_half_hour)
                    .min(COUNTDOWN_VIDEO_SECS - 1);
                return Action::PlayCountdown { seek };
            }
            if self.k < SCHEDULED_BREAK_CAP {
                return if self.k % 2 == 1 {
                    Action::PlayCommercial
                } else {
                    Action::PlayBumper
                };
            }
            self.phase = Phase::Content;
            return Action::NextEpisode;
        }

        // Unscheduled: short break, then back to the epoch stream.
        match self.k {
            1 => Action::PlayCommercial,
            2 if ctx.coin_heads => Action::PlayCommercial,
            _ => {
                self.phase = Phase::Content;
                Action::Retune
            }
        }
    }

    /// Track integer playback position on MTV stations; true once the
    /// position has not moved for [`MTV_STUCK_TICKS`] consecutive ticks.
    pub fn mtv_position_tick(&mut self, pos: Option<f64>) -> bool {
        let pos = pos.map(|p| p as i64);
        if pos.is_some() && pos == self.mtv_last_pos {
            self.mtv_stuck_ticks += 1;
        } else {
            self.mtv_stuck_ticks = if pos.is_some() { 1 } else { 0 };
            self.mtv_last_pos = pos;
        }
        if self.mtv_stuck_ticks >= MTV_STUCK_TICKS {
            self.mtv_stuck_ticks = 0;
            self.mtv_last_pos = None;
            return true;
        }
        false
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

// ── watcher ───────────────────────────────────────────────────────────────────

pub async fn run(tuner: Arc<Tuner>, machine: Arc<StdMutex<Machine>>) {
    info!("interstitial watcher running");
    loop {
        tokio::time::sleep(TICK).await;
        tick(&tuner, &machine).await;
    }
}

async fn tick(tuner: &Tuner, machine: &StdMutex<Machine>) {
    // The alert runner owns playback while the flag exists.
    if tuner.state().eas_active() {
        return;
    }
    let Some((number, station)) = tuner.current_station() else {
        return;
    };
    // EPG and weather manage their own refresh.
    if tuner.is_epg(&station) || tuner.is_weather(&station) {
        return;
    }

    if tuner.is_mtv(&station) {
        let eof = tuner.player().eof_reached().await;
        if !eof && mtv_tick(tuner, machine).await {
            return;
        }
        if eof || tuner.player().idle_active().await {
            debug!("{}: video ended, next pick", station);
            tuner.play_next_mtv(&station).await;
        }
        return;
    }

    let eof = tuner.player().eof_reached().await;
    let idle = !eof && tuner.player().idle_active().await;
    if !eof && !idle {
        return;
    }

    let resolved = tuner.resolve_schedule(&station).await;
    let pseudo = match resolved.as_ref().map(|r| r.show_id.as_str()) {
        Some(SIGNOFF) => Some(SIGNOFF),
        Some(SIGNON) => Some(SIGNON),
        _ => None,
    };
    let ctx = EndContext {
        is_mtv: false,
        pseudo,
        schedule_active: resolved.is_some(),
        interstitials_allowed: tuner.interstitials_allowed(&station, pseudo.is_some()).await,
        secs_to_half_hour: schedule::seconds_to_next_half_hour(Local::now()),
        coin_heads: rand::random(),
    };

    let action = machine
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .on_end(&ctx);
    debug!("{}: end of item → {:?}", station, action);

    match action {
        Action::NextMtv => tuner.play_next_mtv(&station).await,
        Action::SignoffEnded => {
            tuner.state().set_offair(number, true);
            tuner.retune_current().await;
        }
        Action::NextEpisode => tuner.advance_episode().await,
        Action::PlayBumper => tuner.play_bumper().await,
        Action::PlayCommercial => tuner.play_commercial().await,
        Action::PlayCountdown { seek } => tuner.play_countdown(seek).await,
        Action::Retune => tuner.retune_current().await,
    }
}

/// MTV per-tick extras: near-end overlay and stuck-playback detection.
/// Returns true when a stuck video was kicked to the next pick.
async fn mtv_tick(tuner: &Tuner, machine: &StdMutex<Machine>) -> bool {
    let pos = tuner.player().get_f64("time-pos").await;
    let duration = tuner.player().get_f64("duration").await.unwrap_or(0.0);

    if let Some(pos_val) = pos {
        if duration > 0.0 && duration - pos_val <= MTV_OVERLAY_TAIL_SECS {
            tuner.show_mtv_overlay().await;
        }
    }

    let stuck = machine
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .mtv_position_tick(pos);
    if stuck {
        if let Some((_, station)) = tuner.current_station() {
            warn!("{}: playback stuck, forcing next video", station);
            tuner.play_next_mtv(&station).await;
        }
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EndContext {
        EndContext {
            is_mtv: false,
            pseudo: None,
            schedule_active: true,
            interstitials_allowed: true,
            secs_to_half_hour: 600,
            coin_heads: false,
        }
    }

    #[test]
    fn content_end_starts_a_break_with_a_bumper() {
        let mut m = Machine::new();
        assert_eq!(m.on_end(&ctx()), Action::PlayBumper);
        assert_eq!(m.phase(), Phase::Interstitial);
    }

    #[test]
    fn scheduled_break_alternates_then_caps_at_four() {
        let mut m = Machine::new();
        assert_eq!(m.on_end(&ctx()), Action::PlayBumper); // enter break, k=0
        assert_eq!(m.on_end(&ctx()), Action::PlayCommercial); // k=1
        assert_eq!(m.on_end(&ctx()), Action::PlayBumper); // k=2
        assert_eq!(m.on_end(&ctx()), Action::PlayCommercial); // k=3
        assert_eq!(m.on_end(&ctx()), Action::NextEpisode); // k=4 → cap
        assert_eq!(m.phase(), Phase::Content);
    }

    #[test]
    fn countdown_seek_matches_seconds_remaining() {
        let mut m = Machine::new();
        let mut near = ctx();
        near.secs_to_half_hour = 16;
        assert_eq!(m.on_end(&near), Action::PlayBumper);
        assert_eq!(m.on_end(&near), Action::PlayCountdown { seek: 45 });
        assert_eq!(m.phase(), Phase::Countdown);
        // Countdown plays out to the boundary, then the next episode starts.
        assert_eq!(m.on_end(&near), Action::NextEpisode);
        assert_eq!(m.phase(), Phase::Content);
    }

    #[test]
    fn countdown_seek_is_clamped() {
        let mut m = Machine::new();
        let mut boundary = ctx();
        boundary.secs_to_half_hour = 0;
        m.on_end(&boundary);
        assert_eq!(m.on_end(&boundary), Action::PlayCountdown { seek: 60 });
    }

    #[test]
    fn unscheduled_break_flips_a_coin_on_the_second_slot() {
        let mut unsched = ctx();
        unsched.schedule_active = false;

        // Tails after the first commercial: straight back to content.
        let mut m = Machine::new();
        assert_eq!(m.on_end(&unsched), Action::PlayBumper);
        assert_eq!(m.on_end(&unsched), Action::PlayCommercial); // k=1
        unsched.coin_heads = false;
        assert_eq!(m.on_end(&unsched), Action::Retune); // k=2, tails
        assert_eq!(m.phase(), Phase::Content);

        // Heads buys one more commercial, then the break always ends.
        let mut m = Machine::new();
        unsched.coin_heads = true;
        m.on_end(&unsched);
        assert_eq!(m.on_end(&unsched), Action::PlayCommercial); // k=1
        assert_eq!(m.on_end(&unsched), Action::PlayCommercial); // k=2, heads
        assert_eq!(m.on_end(&unsched), Action::Retune); // k=3
    }

    #[test]
    fn mtv_end_stays_in_content() {
        let mut m = Machine::new();
        let mut mtv = ctx();
        mtv.is_mtv = true;
        assert_eq!(m.on_end(&mtv), Action::NextMtv);
        assert_eq!(m.phase(), Phase::Content);
    }

    #[test]
    fn pseudo_shows_bypass_interstitials() {
        let mut m = Machine::new();
        let mut off = ctx();
        off.pseudo = Some(SIGNOFF);
        assert_eq!(m.on_end(&off), Action::SignoffEnded);

        let mut on = ctx();
        on.pseudo = Some(SIGNON);
        assert_eq!(m.on_end(&on), Action::NextEpisode);
    }

    #[test]
    fn blocked_interstitials_fall_back_to_retune() {
        let mut m = Machine::new();
        let mut blocked = ctx();
        blocked.interstitials_allowed = false;
        assert_eq!(m.on_end(&blocked), Action::Retune);
        assert_eq!(m.phase(), Phase::Content);
    }

    #[test]
    fn stuck_detection_needs_five_flat_ticks() {
        let mut m = Machine::new();
        for _ in 0..4 {
            assert!(!m.mtv_position_tick(Some(12.4)));
        }
        assert!(m.mtv_position_tick(Some(12.9))); // same integer second
        // Counter resets after firing.
        assert!(!m.mtv_position_tick(Some(12.0)));
    }

    #[test]
    fn moving_position_never_reads_as_stuck() {
        let mut m = Machine::new();
        for i in 0..20 {
            assert!(!m.mtv_position_tick(Some(i as f64)));
        }
        // Missing position (IPC hiccup) does not accumulate either.
        for _ in 0..20 {
            assert!(!m.mtv_position_tick(None));
        }
    }

    #[test]
    fn reset_abandons_a_break_in_progress() {
        let mut m = Machine::new();
        m.on_end(&ctx());
        assert_eq!(m.phase(), Phase::Interstitial);
        m.reset();
        assert_eq!(m.phase(), Phase::Content);
        // Fresh break starts with a bumper again.
        assert_eq!(m.on_end(&ctx()), Action::PlayBumper);
    }
}
