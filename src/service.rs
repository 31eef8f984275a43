//! Speaker service: live settings, the text filter and the speech requester
//! behind one handle shared by the HTTP API and the message adapter.

use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{ApiConfig, Config, SettingsStore};
use crate::error::{ConfigError, FilterError, SpeechError};
use crate::filter::{ExclusionRule, SpeakDecision, TextFilter};
use crate::speech::{SpeakOutcome, SpeechRequester};

/// Settings edits fail either validation or persistence.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Partial update for the `api` settings section.
#[derive(Debug, Default, Deserialize)]
pub struct ApiUpdate {
    pub key: Option<String>,
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Partial update for the `tts` settings section.
#[derive(Debug, Default, Deserialize)]
pub struct TtsUpdate {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub gain: Option<f32>,
    pub response_format: Option<String>,
    pub auto_play: Option<bool>,
    pub auto_play_user: Option<bool>,
}

pub struct Speaker {
    settings: Arc<SettingsStore>,
    filter: RwLock<TextFilter>,
    speech: SpeechRequester,
}

impl Speaker {
    pub fn new(settings: Arc<SettingsStore>, speech: SpeechRequester) -> Self {
        let config = settings.snapshot();
        let filter = TextFilter::from_settings(
            config.exclusion_rules,
            &config.markers.start,
            &config.markers.end,
        );
        info!(
            "Text filter ready: {} exclusion rules, {} marker pairs",
            filter.rules().len(),
            filter.markers().pairs().count()
        );
        Self {
            settings,
            filter: RwLock::new(filter),
            speech,
        }
    }

    pub fn settings(&self) -> Config {
        self.settings.snapshot()
    }

    pub fn is_busy(&self) -> bool {
        self.speech.is_busy()
    }

    pub fn stop(&self) {
        self.speech.stop();
    }

    /// What the pipeline would speak for `text` under current settings.
    pub fn preview(&self, text: &str) -> SpeakDecision {
        self.filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .decide(text)
    }

    /// Filter a chat message and speak whatever survives.
    ///
    /// Returns `Ok(None)` when the filter decides to stay silent.
    pub async fn speak_message(&self, text: &str) -> Result<Option<SpeakOutcome>, SpeechError> {
        let decision = self.preview(text);
        let Some(to_speak) = decision.text() else {
            debug!("Filter chose silence for message");
            return Ok(None);
        };
        let tts = self.settings.snapshot().tts;
        self.speech.speak(&tts, to_speak).await.map(Some)
    }

    /// Speak `text` as-is, bypassing the filter.
    pub async fn speak_raw(&self, text: &str) -> Result<SpeakOutcome, SpeechError> {
        let tts = self.settings.snapshot().tts;
        self.speech.speak(&tts, text).await
    }

    pub fn rules(&self) -> Vec<ExclusionRule> {
        self.filter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rules()
            .rules()
    }

    pub fn add_rule(&self, rule: ExclusionRule) -> Result<(), SettingsError> {
        self.edit_rules(|filter| filter.rules_mut().add(rule))
    }

    pub fn set_rule_enabled(&self, name: &str, enabled: bool) -> Result<(), SettingsError> {
        self.edit_rules(|filter| filter.rules_mut().set_enabled(name, enabled))
    }

    pub fn remove_rule(&self, name: &str) -> Result<ExclusionRule, SettingsError> {
        self.edit_rules(|filter| filter.rules_mut().remove(name))
    }

    /// Edit the live filter and save its rules as one step, so the file
    /// never falls behind the filter.
    fn edit_rules<T>(
        &self,
        edit: impl FnOnce(&mut TextFilter) -> Result<T, FilterError>,
    ) -> Result<T, SettingsError> {
        let mut filter = self.filter.write().unwrap_or_else(PoisonError::into_inner);
        let out = edit(&mut filter)?;
        let rules = filter.rules().rules();
        self.settings.update(|c| c.exclusion_rules = rules)?;
        Ok(out)
    }

    pub fn set_markers(&self, start: &str, end: &str) -> Result<(), SettingsError> {
        let mut filter = self.filter.write().unwrap_or_else(PoisonError::into_inner);
        filter.set_markers(start, end);
        self.settings.update(|c| {
            c.markers.start = start.to_string();
            c.markers.end = end.to_string();
        })?;
        Ok(())
    }

    /// Validate and apply a partial TTS update. Nothing changes if the
    /// result would be invalid.
    pub fn update_tts(&self, update: TtsUpdate) -> Result<(), SettingsError> {
        self.settings.try_update(|c| {
            let tts = &mut c.tts;
            if let Some(v) = update.model {
                tts.model = v;
            }
            if let Some(v) = update.voice {
                tts.voice = v;
            }
            if let Some(v) = update.speed {
                tts.speed = v;
            }
            if let Some(v) = update.gain {
                tts.gain = v;
            }
            if let Some(v) = update.response_format {
                tts.response_format = v;
            }
            if let Some(v) = update.auto_play {
                tts.auto_play = v;
            }
            if let Some(v) = update.auto_play_user {
                tts.auto_play_user = v;
            }
            tts.validate().map_err(SettingsError::from)
        })
    }

    /// Validate and save new API credentials. Returns the saved section.
    pub fn update_api(&self, update: ApiUpdate) -> Result<ApiConfig, SettingsError> {
        self.settings.try_update(|c| -> Result<ApiConfig, SettingsError> {
            if let Some(key) = update.key {
                c.api.key = key.trim().to_string();
            }
            if let Some(url) = update.url {
                c.api.url = url.trim().to_string();
            }
            if let Some(secs) = update.timeout_secs {
                c.api.timeout_secs = secs.max(1);
            }
            c.api.validate()?;
            info!("API settings updated: url={}", c.api.url);
            Ok(c.api.clone())
        })
    }
}
