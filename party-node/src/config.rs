//! Load config from file and environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::bitrate::BitrateConfig;
use crate::media::{Dimensions, MediaConfig};
use crate::search::{SearchConfig, DEFAULT_BASE_URL};

/// Node configuration. File: ~/.config/watchparty/config.toml or /etc/watchparty/config.toml.
/// Env overrides: WATCHPARTY_ADDRESS_PREFIX, WATCHPARTY_MAX_WIDTH, WATCHPARTY_MAX_HEIGHT,
/// WATCHPARTY_FRAME_RATE, WATCHPARTY_MAX_BITRATE, WATCHPARTY_TMDB_API_KEY.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Namespace prefix for rendezvous addresses (default "watchparty-").
    #[serde(default = "default_address_prefix")]
    pub address_prefix: String,
    /// Outbound video ceiling (default 1280x720).
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
    /// Framerate of the downscaled stream (default 30).
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Bits per second (default 2.5 Mbps).
    #[serde(default = "default_max_bitrate")]
    pub max_bitrate: u32,
    #[serde(default = "default_bitrate_retries")]
    pub bitrate_retries: u32,
    #[serde(default = "default_bitrate_backoff_ms")]
    pub bitrate_backoff_ms: u64,
    #[serde(default = "default_reaction_ttl_ms")]
    pub reaction_ttl_ms: u64,
    #[serde(default = "default_search_base_url")]
    pub search_base_url: String,
    #[serde(default)]
    pub search_api_key: Option<String>,
}

fn default_address_prefix() -> String {
    party_core::room::DEFAULT_ADDRESS_PREFIX.to_string()
}
fn default_max_width() -> u32 {
    1280
}
fn default_max_height() -> u32 {
    720
}
fn default_frame_rate() -> u32 {
    30
}
fn default_max_bitrate() -> u32 {
    2_500_000
}
fn default_bitrate_retries() -> u32 {
    5
}
fn default_bitrate_backoff_ms() -> u64 {
    500
}
fn default_reaction_ttl_ms() -> u64 {
    3000
}
fn default_search_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address_prefix: default_address_prefix(),
            max_width: default_max_width(),
            max_height: default_max_height(),
            frame_rate: default_frame_rate(),
            max_bitrate: default_max_bitrate(),
            bitrate_retries: default_bitrate_retries(),
            bitrate_backoff_ms: default_bitrate_backoff_ms(),
            reaction_ttl_ms: default_reaction_ttl_ms(),
            search_base_url: default_search_base_url(),
            search_api_key: None,
        }
    }
}

impl Config {
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).context("invalid watchparty config")
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&s).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn core(&self) -> party_core::Config {
        party_core::Config {
            address_prefix: self.address_prefix.clone(),
            reaction_ttl: Duration::from_millis(self.reaction_ttl_ms),
        }
    }

    pub fn media(&self) -> MediaConfig {
        MediaConfig {
            ceiling: Dimensions::new(self.max_width, self.max_height),
            frame_rate: self.frame_rate,
            ..MediaConfig::default()
        }
    }

    pub fn bitrate(&self) -> BitrateConfig {
        BitrateConfig {
            max_bitrate: self.max_bitrate,
            max_framerate: self.frame_rate as f64,
            max_retries: self.bitrate_retries,
            backoff: Duration::from_millis(self.bitrate_backoff_ms),
        }
    }

    pub fn search(&self) -> SearchConfig {
        SearchConfig {
            base_url: self.search_base_url.clone(),
            api_key: self.search_api_key.clone(),
            ..SearchConfig::default()
        }
    }

    /// Apply `WATCHPARTY_*` overrides from `var`. Unparseable values are ignored.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(s) = var("WATCHPARTY_ADDRESS_PREFIX") {
            if !s.is_empty() {
                self.address_prefix = s;
            }
        }
        if let Some(v) = var("WATCHPARTY_MAX_WIDTH").and_then(|s| s.parse().ok()) {
            self.max_width = v;
        }
        if let Some(v) = var("WATCHPARTY_MAX_HEIGHT").and_then(|s| s.parse().ok()) {
            self.max_height = v;
        }
        if let Some(v) = var("WATCHPARTY_FRAME_RATE").and_then(|s| s.parse().ok()) {
            self.frame_rate = v;
        }
        if let Some(v) = var("WATCHPARTY_MAX_BITRATE").and_then(|s| s.parse().ok()) {
            self.max_bitrate = v;
        }
        if let Some(s) = var("WATCHPARTY_TMDB_API_KEY") {
            self.search_api_key = Some(s);
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    c.apply_env(|k| std::env::var(k).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = std::env::var_os("HOME").map(PathBuf::from) {
        out.push(h.join(".config/watchparty/config.toml"));
    }
    out.push(PathBuf::from("/etc/watchparty/config.toml"));
    out
}

/// First existing file wins; a broken file falls back to defaults.
fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    match Config::from_file(&path) {
        Ok(c) => Some(c),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "ignoring config file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_is_defaults() {
        let c = Config::from_toml("").unwrap();
        assert_eq!(c.address_prefix, "watchparty-");
        assert_eq!((c.max_width, c.max_height), (1280, 720));
        assert_eq!(c.bitrate().max_retries, 5);
        assert_eq!(c.bitrate().backoff, Duration::from_millis(500));
        assert_eq!(c.core().reaction_ttl, Duration::from_secs(3));
    }

    #[test]
    fn file_overrides_fields() {
        let c = Config::from_toml(
            r#"
            address_prefix = "movienight-"
            max_width = 1920
            max_height = 1080
            max_bitrate = 4000000
            "#,
        )
        .unwrap();
        assert_eq!(c.core().address_prefix, "movienight-");
        assert_eq!(c.media().ceiling, Dimensions::new(1920, 1080));
        assert_eq!(c.bitrate().max_bitrate, 4_000_000);
        assert_eq!(c.frame_rate, 30);
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(Config::from_toml("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("WATCHPARTY_MAX_WIDTH", "854"),
            ("WATCHPARTY_MAX_HEIGHT", "480"),
            ("WATCHPARTY_FRAME_RATE", "not-a-number"),
            ("WATCHPARTY_TMDB_API_KEY", "k"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.media().ceiling, Dimensions::new(854, 480));
        assert_eq!(c.frame_rate, 30);
        assert_eq!(c.search().api_key.as_deref(), Some("k"));
    }
}
