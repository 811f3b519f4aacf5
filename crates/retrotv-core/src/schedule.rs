//! Weekly schedule resolver.
//!
//! The schedule editor owns `schedule_config.json` (shows + default weekly
//! grid) and `schedule_state.json` (per-day overrides).  A day present in the
//! overrides replaces that day of the default grid wholesale.  Blocks are
//! keyed by station name inside each day; channel numbers are resolved to
//! stations by the caller.

use chrono::{DateTime, Datelike, Local, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Pseudo-show ids.  Not backed by a directory; the tuner plays the off-air
/// animation and manages the per-channel off-air flag instead.
pub const SIGNOFF: &str = "SIGNOFF";
pub const SIGNON: &str = "SIGNON";

pub type DayGrid = HashMap<String, Vec<Block>>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub shows: Vec<Show>,
    #[serde(default)]
    pub default_schedule: HashMap<String, DayGrid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Show {
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Episode directory; index rows under it belong to this show.
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default)]
    pub station: String,
    #[serde(default)]
    pub channel: Option<u32>,
    #[serde(default)]
    pub runtime_min: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Block {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    pub show_id: String,
}

/// Overrides written by the schedule editor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScheduleState {
    #[serde(default)]
    pub schedule: HashMap<String, DayGrid>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub show_id: String,
    /// `None` for the SIGNOFF / SIGNON pseudo-shows and for ids missing from
    /// the shows table.
    pub show: Option<Show>,
}

impl Resolved {
    pub fn is_pseudo(&self) -> bool {
        self.show_id == SIGNOFF || self.show_id == SIGNON
    }
}

const DAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

fn day_name(day: Weekday) -> &'static str {
    DAYS[day.num_days_from_monday() as usize]
}

fn prev_day_name(day: Weekday) -> &'static str {
    DAYS[day.pred().num_days_from_monday() as usize]
}

/// "HH:MM" → minutes since midnight.  Anything unparseable reads as 00:00.
fn parse_hhmm(s: &str) -> u32 {
    let mut parts = s.splitn(2, ':');
    let h: u32 = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
    let m: u32 = parts.next().and_then(|p| p.trim().parse().ok()).unwrap_or(0);
    (h.min(24) * 60 + m.min(59)).min(24 * 60)
}

/// Effective end of a block: empty or "00:00" means end-of-day.
fn effective_end(block: &Block) -> u32 {
    if block.end.is_empty() || block.end == "00:00" {
        24 * 60
    } else {
        parse_hhmm(&block.end)
    }
}

fn day_grid<'a>(
    config: &'a ScheduleConfig,
    state: &'a ScheduleState,
    day: &str,
) -> Option<&'a DayGrid> {
    state
        .schedule
        .get(day)
        .or_else(|| config.default_schedule.get(day))
}

pub fn show_by_id<'a>(config: &'a ScheduleConfig, id: &str) -> Option<&'a Show> {
    config.shows.iter().find(|s| s.id == id)
}

/// What should be on `station` at `now`.  `None` means no block covers the
/// current time and the caller falls back to epoch playback.
pub fn resolve_now(
    config: &ScheduleConfig,
    state: &ScheduleState,
    station: &str,
    now: DateTime<Local>,
) -> Option<Resolved> {
    let minutes = now.hour() * 60 + now.minute();
    resolve_at(config, state, station, now.weekday(), minutes)
}

/// Pure form of [`resolve_now`] over (weekday, minutes-since-midnight).
///
/// Among all of today's blocks whose window contains the current time, the
/// one with the latest start wins.  Blocks from the previous day whose
/// window wraps past midnight into today are only consulted when nothing of
/// today's matched.
pub fn resolve_at(
    config: &ScheduleConfig,
    state: &ScheduleState,
    station: &str,
    day: Weekday,
    minutes: u32,
) -> Option<Resolved> {
    let station = station.to_uppercase();

    let mut best: Option<(u32, &str)> = None;
    if let Some(grid) = day_grid(config, state, day_name(day)) {
        if let Some(blocks) = grid.get(&station) {
            for block in blocks {
                let start = parse_hhmm(&block.start);
                let end = effective_end(block);
                let hit = if end > start {
                    start <= minutes && minutes < end
                } else {
                    // Wraps past midnight: tonight's half of the window.
                    minutes >= start
                };
                if hit && best.map(|(s, _)| start > s).unwrap_or(true) {
                    best = Some((start, &block.show_id));
                }
            }
        }
    }
    if let Some((_, show_id)) = best {
        return Some(make_resolved(config, show_id));
    }

    // Spill-over from the previous day's wrapping blocks.
    if let Some(grid) = day_grid(config, state, prev_day_name(day)) {
        if let Some(blocks) = grid.get(&station) {
            for block in blocks {
                let start = parse_hhmm(&block.start);
                let end = effective_end(block);
                if end <= start
                    && minutes < end
                    && best.map(|(s, _)| start > s).unwrap_or(true)
                {
                    best = Some((start, &block.show_id));
                }
            }
        }
    }

    best.map(|(_, show_id)| make_resolved(config, show_id))
}

fn make_resolved(config: &ScheduleConfig, show_id: &str) -> Resolved {
    Resolved {
        show_id: show_id.to_string(),
        show: if show_id == SIGNOFF || show_id == SIGNON {
            None
        } else {
            show_by_id(config, show_id).cloned()
        },
    }
}

/// Seconds until the nearest future wall-clock minute that is a multiple of
/// 30.  At a boundary the answer is a full window (1800), never 0.
pub fn seconds_to_next_half_hour(now: DateTime<Local>) -> u64 {
    let into_window = (now.minute() % 30) * 60 + now.second();
    (30 * 60 - into_window) as u64
}
