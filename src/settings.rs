use crate::error::SettingsError;
use crate::poller::{NotFoundPolicy, PollPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    /// Server-side directory the TTS output is written to.
    #[serde(default = "default_output_path")]
    pub output_path: String,
    #[serde(default = "default_true")]
    pub auto_play_audio: bool,
    /// Command line used to play a media URL; the URL is appended last.
    /// Empty means the platform default.
    #[serde(default)]
    pub player_command: String,
    #[serde(default = "default_poll_max_attempts")]
    pub poll_max_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub poll_deadline_secs: Option<u64>,
    #[serde(default)]
    pub not_found_policy: NotFoundPolicy,
    #[serde(default = "default_playback_delay_ms")]
    pub playback_delay_ms: u64,
    #[serde(default = "default_chat_timeout_secs")]
    pub chat_timeout_secs: u64,
    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,
}

impl Settings {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            max_attempts: self.poll_max_attempts,
            interval: Duration::from_millis(self.poll_interval_ms),
            deadline: self.poll_deadline_secs.map(Duration::from_secs),
            not_found: self.not_found_policy,
        }
    }

    pub fn playback_delay(&self) -> Duration {
        Duration::from_millis(self.playback_delay_ms)
    }

    pub fn chat_timeout(&self) -> Duration {
        Duration::from_secs(self.chat_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            llm_model: default_llm_model(),
            output_path: default_output_path(),
            auto_play_audio: true,
            player_command: String::new(),
            poll_max_attempts: default_poll_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_deadline_secs: None,
            not_found_policy: NotFoundPolicy::default(),
            playback_delay_ms: default_playback_delay_ms(),
            chat_timeout_secs: default_chat_timeout_secs(),
            status_timeout_secs: default_status_timeout_secs(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:8000".into()
}
fn default_llm_model() -> String {
    "deepseek-r1:latest".into()
}
fn default_output_path() -> String {
    "output".into()
}
fn default_true() -> bool {
    true
}
fn default_poll_max_attempts() -> u32 {
    100
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_playback_delay_ms() -> u64 {
    500
}
fn default_chat_timeout_secs() -> u64 {
    30
}
fn default_status_timeout_secs() -> u64 {
    10
}

pub fn settings_path() -> Result<PathBuf, SettingsError> {
    if let Some(dir) = dirs::data_local_dir() {
        return Ok(dir.join("WednesdayChat").join("settings.json"));
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(".wednesday-chat").join("settings.json"));
    }
    Err(SettingsError::NoDataDir)
}

/// Load settings, falling back to defaults when the file is missing or broken.
pub fn load_from(path: &Path) -> Settings {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return Settings::default(),
    };
    match serde_json::from_str(&text) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("[settings] ignoring unreadable {}: {}", path.display(), e);
            Settings::default()
        }
    }
}

pub fn save_to(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    Ok(())
}
