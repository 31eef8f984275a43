//! Configuration management for chat-speaker.
//!
//! Settings live in one YAML file, loaded at startup and rewritten whenever
//! they are edited through the HTTP API.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::filter::ExclusionRule;

pub const SPEED_RANGE: (f32, f32) = (0.25, 4.0);
pub const GAIN_RANGE: (f32, f32) = (-10.0, 10.0);
/// Formats the player can decode. The vendor also offers `opus`, which
/// rodio's default decoders cannot play.
pub const RESPONSE_FORMATS: [&str; 3] = ["mp3", "wav", "pcm"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub key: String,
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            url: "https://api.siliconflow.cn/v1".into(),
            timeout_secs: 60,
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.url.trim();
        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(())
        } else {
            Err(ConfigError::InvalidUrl(self.url.clone()))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub model: String,
    pub voice: String,
    pub speed: f32,
    pub gain: f32,
    pub response_format: String,
    /// Speak character messages as they arrive.
    pub auto_play: bool,
    /// Speak the user's own messages as they arrive.
    pub auto_play_user: bool,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            model: "FunAudioLLM/CosyVoice2-0.5B".into(),
            voice: "alex".into(),
            speed: 1.0,
            gain: 0.0,
            response_format: "mp3".into(),
            auto_play: true,
            auto_play_user: false,
        }
    }
}

impl TtsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("speed", self.speed, SPEED_RANGE)?;
        check_range("gain", self.gain, GAIN_RANGE)?;
        if !RESPONSE_FORMATS.contains(&self.response_format.as_str()) {
            return Err(ConfigError::ResponseFormat(self.response_format.clone()));
        }
        Ok(())
    }

    fn clamp(&mut self) {
        let defaults = Self::default();
        let speed = clamp_finite(self.speed, SPEED_RANGE, defaults.speed);
        let gain = clamp_finite(self.gain, GAIN_RANGE, defaults.gain);
        if speed != self.speed || gain != self.gain {
            warn!(
                "tts.speed/gain {}/{} out of range, using {speed}/{gain}",
                self.speed, self.gain
            );
        }
        self.speed = speed;
        self.gain = gain;
        if !RESPONSE_FORMATS.contains(&self.response_format.as_str()) {
            warn!("Unsupported tts.response_format '{}', using mp3", self.response_format);
            self.response_format = defaults.response_format;
        }
    }
}

/// NaN and infinities fall back to `default`; finite values are clamped.
fn clamp_finite(value: f32, (min, max): (f32, f32), default: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        default
    }
}

fn check_range(field: &'static str, value: f32, (min, max): (f32, f32)) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            min,
            max,
            value,
        })
    }
}

/// Raw comma-separated marker strings, exactly as the user typed them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Quiet period after the last render notification for a message.
    pub debounce_ms: u64,
    pub max_tracked_messages: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            max_tracked_messages: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8790 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub tts: TtsConfig,
    pub markers: MarkerConfig,
    pub exclusion_rules: Vec<ExclusionRule>,
    pub events: EventConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Pick the settings file.
    ///
    /// Uses `path` if given, otherwise the first existing of:
    /// 1. ./chat-speaker.yaml
    /// 2. ~/.config/chat-speaker/config.yaml
    ///
    /// Falls back to the second location so the first save creates it.
    pub fn resolve_path(path: Option<&Path>) -> PathBuf {
        if let Some(p) = path {
            return p.to_path_buf();
        }
        let user_path = dirs::home_dir().map(|h| h.join(".config/chat-speaker/config.yaml"));
        let candidates = [
            std::env::current_dir().ok().map(|d| d.join("chat-speaker.yaml")),
            user_path.clone(),
        ];
        candidates
            .into_iter()
            .flatten()
            .find(|p| p.exists())
            .or(user_path)
            .unwrap_or_else(|| PathBuf::from("chat-speaker.yaml"))
    }

    /// Load settings from `path`, falling back to defaults on any problem.
    pub fn load(path: &Path) -> Self {
        Self::try_load(path).unwrap_or_else(|e| {
            warn!("{e}, using defaults");
            Self::default()
        })
    }

    /// Load settings from `path`. A missing file gives defaults; an
    /// unreadable or malformed one is an error.
    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Self = serde_yml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loaded settings from {}", path.display());
        config.tts.clamp();
        Ok(config)
    }

    /// Write settings to `path` via a temp file and rename.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let yaml = serde_yml::to_string(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(write_err)?;
        }
        let tmp = path.with_extension("yaml.tmp");
        std::fs::write(&tmp, yaml).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)?;
        Ok(())
    }
}

struct Stored {
    config: Config,
    /// The file on disk could not be loaded; move it aside before the first
    /// save so its contents survive.
    keep_original: bool,
}

/// Current settings plus the file they persist to.
///
/// Edits and saves happen under one lock, so the file always holds the
/// latest edit.
pub struct SettingsStore {
    path: PathBuf,
    state: Mutex<Stored>,
}

impl SettingsStore {
    pub fn new(path: PathBuf, config: Config) -> Self {
        Self {
            path,
            state: Mutex::new(Stored {
                config,
                keep_original: false,
            }),
        }
    }

    /// Load settings from `path`. If the file exists but cannot be loaded,
    /// defaults are used and the file is renamed to `*.yaml.bak` on the
    /// first save.
    pub fn open(path: PathBuf) -> Self {
        let (config, keep_original) = match Config::try_load(&path) {
            Ok(config) => (config, false),
            Err(e) => {
                warn!("{e}, using defaults; the file will be kept as {}", backup_path(&path).display());
                (Config::default(), true)
            }
        };
        Self {
            path,
            state: Mutex::new(Stored {
                config,
                keep_original,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Config {
        self.lock().config.clone()
    }

    /// Apply `edit` and persist the result.
    ///
    /// The in-memory settings keep the edit even if writing the file fails.
    pub fn update<T>(&self, edit: impl FnOnce(&mut Config) -> T) -> Result<T, ConfigError> {
        self.try_update(|config| Ok::<T, ConfigError>(edit(config)))
    }

    /// Like [`update`](Self::update), but `edit` may refuse. A refused edit
    /// changes nothing and writes nothing.
    pub fn try_update<T, E>(&self, edit: impl FnOnce(&mut Config) -> Result<T, E>) -> Result<T, E>
    where
        E: From<ConfigError>,
    {
        let mut state = self.lock();
        let mut draft = state.config.clone();
        let out = edit(&mut draft)?;
        state.config = draft;
        self.persist(&mut state)?;
        Ok(out)
    }

    fn persist(&self, state: &mut Stored) -> Result<(), ConfigError> {
        if state.keep_original && self.path.exists() {
            let backup = backup_path(&self.path);
            std::fs::rename(&self.path, &backup).map_err(|source| ConfigError::Write {
                path: backup.display().to_string(),
                source,
            })?;
            warn!("Moved unreadable settings to {}", backup.display());
        }
        state.keep_original = false;
        state.config.save(&self.path)?;
        info!("Settings saved to {}", self.path.display());
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Stored> {
        // A panic while editing settings leaves them usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn backup_path(path: &Path) -> PathBuf {
    path.with_extension("yaml.bak")
}
