//! Dump target profiles
//!
//! A profile bundles the serial settings and handshake strings for one
//! firmware build. The built-in `stm32f0` profile matches the reference
//! Pico-based SWD readout firmware; a custom TOML file covers modified
//! firmware without rebuilding the tool.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::protocol;

/// Complete dump target profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpProfile {
    /// Short identifier (e.g., "stm32f0")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Device description
    pub description: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-line read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Banner the device prints while waiting for the trigger
    pub ready_banner: String,
    /// Substring acknowledging the start of the dump
    pub starting_pattern: String,
    /// Substring marking end of transmission
    pub done_sentinel: String,
    /// Byte sent to trigger the dump
    pub trigger_byte: u8,
    /// Blind wait after the trigger, in milliseconds
    pub trigger_delay_ms: u64,
    /// Bytes written per data line (1-4, little-endian truncation)
    #[serde(default = "default_word_size")]
    pub word_size: u8,
}

fn default_word_size() -> u8 {
    4
}

impl Default for DumpProfile {
    fn default() -> Self {
        Self {
            id: "generic".to_string(),
            name: "Generic".to_string(),
            description: "Generic line-protocol dump target".to_string(),
            baud_rate: 115200,
            read_timeout_ms: 5000,
            ready_banner: protocol::READY_BANNER.to_string(),
            starting_pattern: protocol::STARTING_PATTERN.to_string(),
            done_sentinel: protocol::DONE_SENTINEL.to_string(),
            trigger_byte: protocol::START_TRIGGER,
            trigger_delay_ms: 1000,
            word_size: default_word_size(),
        }
    }
}

impl DumpProfile {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn trigger_delay(&self) -> Duration {
        Duration::from_millis(self.trigger_delay_ms)
    }

    /// Load a custom profile from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read profile file: {}", path.display()))?;
        let profile: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse profile file: {}", path.display()))?;
        anyhow::ensure!(
            (1..=4).contains(&profile.word_size),
            "word_size must be between 1 and 4, got {}",
            profile.word_size
        );
        Ok(profile)
    }
}

/// STM32F0 readout firmware profile (the reference target).
pub static STM32F0_PROFILE: Lazy<DumpProfile> = Lazy::new(|| DumpProfile {
    id: "stm32f0".to_string(),
    name: "STM32F0 SWD readout".to_string(),
    description: "Pico-based SWD flash readout firmware for STM32F0 targets".to_string(),
    ..DumpProfile::default()
});

/// Generic profile, identical handshake with default settings.
pub static GENERIC_PROFILE: Lazy<DumpProfile> = Lazy::new(DumpProfile::default);

/// Registry of built-in profiles.
static PROFILES: Lazy<HashMap<&'static str, &'static DumpProfile>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert("stm32f0", &*STM32F0_PROFILE);
    m.insert("stm32", &*STM32F0_PROFILE);
    m.insert("generic", &*GENERIC_PROFILE);
    m.insert("default", &*GENERIC_PROFILE);
    m
});

/// Get a built-in profile by name.
pub fn get_profile(name: &str) -> Option<&'static DumpProfile> {
    PROFILES.get(name.to_lowercase().as_str()).copied()
}

/// Built-in profile names: the canonical ids from the registry, with
/// aliases collapsed.
pub fn profile_names() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = PROFILES.values().map(|p| p.id.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    names
}
