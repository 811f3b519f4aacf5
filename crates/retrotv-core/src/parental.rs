//! Parental lockout policy.
//!
//! `parental_lock.json` is shared with the web remote, which writes channel
//! numbers sometimes as integers and sometimes as strings; both spellings are
//! accepted everywhere.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumOrStr {
    Num(u64),
    Str(String),
}

impl NumOrStr {
    fn as_channel(&self) -> Option<u32> {
        match self {
            Self::Num(n) => u32::try_from(*n).ok(),
            Self::Str(s) => s.trim().parse().ok(),
        }
    }

    fn as_string(&self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Str(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ParentalConfig {
    #[serde(default)]
    pin: Option<NumOrStr>,
    #[serde(default)]
    locked_channels: Vec<NumOrStr>,
    #[serde(default)]
    auto_lock_channels: Vec<NumOrStr>,
    #[serde(default)]
    always_mute_channels: Vec<NumOrStr>,
}

impl ParentalConfig {
    pub fn is_locked(&self, channel: u32) -> bool {
        self.locked_channels
            .iter()
            .any(|c| c.as_channel() == Some(channel))
    }

    pub fn is_auto_lock(&self, channel: u32) -> bool {
        self.auto_lock_channels
            .iter()
            .any(|c| c.as_channel() == Some(channel))
    }

    pub fn is_always_mute(&self, channel: u32) -> bool {
        self.always_mute_channels
            .iter()
            .any(|c| c.as_channel() == Some(channel))
    }

    /// A digit entry only counts as a PIN attempt when a PIN is configured.
    pub fn pin_matches(&self, entry: &str) -> bool {
        match &self.pin {
            Some(pin) => {
                let pin = pin.as_string();
                !pin.is_empty() && pin == entry
            }
            None => false,
        }
    }
}

/// Re-add every auto-lock channel to `locked_channels`, editing the JSON
/// document in place so keys owned by the web remote survive.  Returns true
/// when the file was rewritten.
pub fn re_lock_auto(path: &Path) -> anyhow::Result<bool> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return Ok(false),
    };
    let mut doc: Value = serde_json::from_str(&content)?;

    let auto: Vec<Value> = doc
        .get("auto_lock_channels")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    if auto.is_empty() {
        return Ok(false);
    }

    let locked = doc
        .get("locked_channels")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    let locked_keys: Vec<String> = locked.iter().map(value_key).collect();

    let mut merged = locked;
    let mut changed = false;
    for ch in auto {
        if !locked_keys.contains(&value_key(&ch)) {
            merged.push(ch);
            changed = true;
        }
    }

    if changed {
        doc["locked_channels"] = Value::Array(merged);
        std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
        info!("re-locked auto-lock channels in {}", path.display());
    }
    Ok(changed)
}

fn value_key(v: &Value) -> String {
    match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
