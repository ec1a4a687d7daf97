//! User settings
//!
//! Settings are read from a TOML file where every field is optional. They cover
//! the distraction intervention mode, the sync destination, content-probe
//! timing, and the classification tables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::classifier::DomainPolicy;
use crate::collaborators::Intervention;
use crate::engine::probe::{ProbePolicy, DEFAULT_MIN_TEXT_LEN};
use crate::error::EngineError;

/// Environment variable overriding the session store location
pub const SESSIONS_FILE_ENV: &str = "DEEPSTUDY_SESSIONS_FILE";

/// Session store location when the environment does not override it
pub const DEFAULT_SESSIONS_FILE: &str = "data/sessions.json";

/// Path of the sync route below the dashboard base URL
const SYNC_PATH: &str = "/api/sync-session";

/// How distracting tabs are interrupted; the modes exclude each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionMode {
    #[default]
    Off,
    SoftDelay,
    HardBlock,
}

/// Content-probe timing in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub grace_ms: u64,
    pub retry_delay_ms: u64,
    pub min_text_len: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            grace_ms: 1000,
            retry_delay_ms: 2500,
            min_text_len: DEFAULT_MIN_TEXT_LEN,
        }
    }
}

impl ProbeSettings {
    pub fn policy(&self) -> ProbePolicy {
        ProbePolicy {
            grace: Duration::from_millis(self.grace_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            min_text_len: self.min_text_len,
        }
    }
}

/// Persisted user settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub intervention: InterventionMode,
    /// Countdown of the soft-delay overlay
    pub soft_delay_seconds: u32,
    /// Dashboard user id attached to synced sessions; empty means anonymous
    pub user_id: String,
    /// Dashboard base URL; empty disables sync
    pub dashboard_base_url: String,
    pub probe: ProbeSettings,
    pub policy: DomainPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            intervention: InterventionMode::Off,
            soft_delay_seconds: 10,
            user_id: String::new(),
            dashboard_base_url: String::new(),
            probe: ProbeSettings::default(),
            policy: DomainPolicy::default(),
        }
    }
}

/// Partial settings update, as sent by the popup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsUpdate {
    pub intervention: Option<InterventionMode>,
    /// Legacy toggle; `true` selects soft delay, `false` clears it
    pub soft_delay_mode: Option<bool>,
    /// Legacy toggle; `true` selects hard block, `false` clears it
    pub hard_block_mode: Option<bool>,
    pub soft_delay_seconds: Option<u32>,
    pub user_id: Option<String>,
    pub dashboard_base_url: Option<String>,
}

impl Settings {
    /// Parse settings from TOML text
    pub fn from_toml(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|e| EngineError::ConfigError(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self).map_err(|e| EngineError::ConfigError(e.to_string()))
    }

    /// Load settings from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(EngineError::Io(e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Apply a partial update on top of the current settings
    pub fn merge_update(&mut self, update: SettingsUpdate) {
        if let Some(mode) = update.intervention {
            self.intervention = mode;
        }
        match update.soft_delay_mode {
            Some(true) => self.intervention = InterventionMode::SoftDelay,
            Some(false) if self.intervention == InterventionMode::SoftDelay => {
                self.intervention = InterventionMode::Off
            }
            _ => {}
        }
        match update.hard_block_mode {
            Some(true) => self.intervention = InterventionMode::HardBlock,
            Some(false) if self.intervention == InterventionMode::HardBlock => {
                self.intervention = InterventionMode::Off
            }
            _ => {}
        }
        if let Some(seconds) = update.soft_delay_seconds {
            self.soft_delay_seconds = seconds;
        }
        if let Some(user_id) = update.user_id {
            self.user_id = user_id;
        }
        if let Some(base) = update.dashboard_base_url {
            self.dashboard_base_url = base;
        }
    }

    /// Intervention to apply to distracting tabs, if any
    pub fn intervention(&self) -> Option<Intervention> {
        match self.intervention {
            InterventionMode::Off => None,
            InterventionMode::SoftDelay => Some(Intervention::SoftDelay {
                countdown_seconds: self.soft_delay_seconds,
            }),
            InterventionMode::HardBlock => Some(Intervention::HardBlock),
        }
    }

    /// Full sync endpoint URL, or `None` when sync is not configured
    pub fn sync_endpoint(&self) -> Result<Option<Url>, EngineError> {
        let base = self.dashboard_base_url.trim();
        let base = base.strip_suffix('/').unwrap_or(base);
        if base.is_empty() {
            return Ok(None);
        }
        Url::parse(&format!("{}{}", base, SYNC_PATH))
            .map(Some)
            .map_err(|e| EngineError::ConfigError(format!("Invalid dashboard base URL: {}", e)))
    }

    /// User id for sync payloads; empty means none
    pub fn sync_user_id(&self) -> Option<String> {
        let id = self.user_id.trim();
        (!id.is_empty()).then(|| id.to_string())
    }
}

/// Location of the session store file
pub fn sessions_file() -> PathBuf {
    env::var_os(SESSIONS_FILE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSIONS_FILE))
}
