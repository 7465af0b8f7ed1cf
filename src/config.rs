//! Run settings: serde defaults, overlaid by an optional TOML file and
//! `SITEMARK__SECTION__KEY` environment variables. CLI flags are applied last
//! in `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "sitemark.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub fetch: FetchSettings,
    pub extract: ExtractSettings,
    pub render: RenderSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Extra attempts per HTTP tier on transient errors.
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub initial_delay_secs: (f64, f64),
    pub fallback_delay_secs: (f64, f64),
    pub allow_insecure_tls: bool,
    pub browser_command: String,
    pub browser_helper: Option<PathBuf>,
    pub browser_timeout_secs: u64,
    /// Fixes User-Agent / delay selection for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 12,
            request_timeout_secs: 35,
            retries: 3,
            retry_backoff_ms: 2000,
            initial_delay_secs: (0.5, 1.5),
            fallback_delay_secs: (0.3, 0.8),
            allow_insecure_tls: false,
            browser_command: "node".into(),
            browser_helper: Some(PathBuf::from("scripts/fetch_html.js")),
            browser_timeout_secs: 70,
            seed: None,
        }
    }
}

impl FetchSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn browser_timeout(&self) -> Duration {
        Duration::from_secs(self.browser_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractSettings {
    pub min_content_chars: usize,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self { min_content_chars: 100 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub wrap_width: usize,
    pub title_max_chars: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            wrap_width: 80,
            title_max_chars: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Look up cached raw HTML before fetching. Fetched pages are cached either way.
    pub read: bool,
    /// Cached pages older than this are refetched. Unset means never.
    pub max_age_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            read: true,
            max_age_secs: None,
        }
    }
}

impl CacheSettings {
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

impl Settings {
    /// Load settings. An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        Config::builder()
            .add_source(File::from(file).required(path.is_some()))
            .add_source(
                Environment::with_prefix("SITEMARK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
