use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::input::keys::{codes, KeyCode, ModifierFamily};
use crate::tap::thresholds::{
    TrackingMode, DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_DURATION_MS, DEFAULT_MIN_DURATION_MS,
};

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub tap: TapConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TapConfig {
    pub family: ModifierFamily,
    pub mode: TrackingMode,
    pub min_duration_ms: u32,
    pub max_duration_ms: u32,
    pub debounce_ms: u32,
    pub intercept_key_code: KeyCode,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            family: ModifierFamily::Option,
            mode: TrackingMode::Either,
            min_duration_ms: DEFAULT_MIN_DURATION_MS,
            max_duration_ms: DEFAULT_MAX_DURATION_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            intercept_key_code: codes::ESCAPE,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub log_path: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_path: "~/.modifier-tap/tap.log".to_owned(),
        }
    }
}

const DEFAULT_CONFIG: &str = r#"[tap]
# Modifier to watch: "option", "command", "control" or "shift"
family = "option"
# Which side counts: "either", "left" or "right"
mode = "either"
min_duration_ms = 20
max_duration_ms = 450
debounce_ms = 250
# Key swallowed while interception is enabled (53 = Escape)
intercept_key_code = 53

[telemetry]
enabled = false
log_path = "~/.modifier-tap/tap.log"
"#;

impl Config {
    /// Load config from ~/.modifier-tap.toml, creating it if missing
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default(&config_path).context("failed to create default config")?;
        }

        Self::load_from(&config_path)
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;

        Self::parse(&contents)
    }

    /// Parse TOML; missing keys take their defaults
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse config TOML")
    }

    fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(".modifier-tap.toml"))
    }

    fn create_default(path: &Path) -> Result<()> {
        fs::write(path, DEFAULT_CONFIG).context("failed to write default config")?;
        Ok(())
    }
}
