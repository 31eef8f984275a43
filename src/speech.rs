//! Speech requests: synthesize text, then play it, one at a time.
//!
//! A single busy flag guards the synthesize-and-play sequence. Requests that
//! arrive while one is in flight are dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::TtsConfig;
use crate::error::{PlaybackError, SiliconFlowError, SpeechError};

/// Turns text into encoded audio.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, tts: &TtsConfig, text: &str) -> Result<Vec<u8>, SiliconFlowError>;
}

/// Plays encoded audio to completion.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn play(&self, audio: Vec<u8>, format: &str) -> Result<(), PlaybackError>;

    /// Interrupt the clip currently playing, if any.
    fn stop(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeakOutcome {
    Played { synth_ms: f64, play_ms: f64 },
    /// Another request was already in flight.
    Dropped,
}

pub struct SpeechRequester {
    synthesizer: Arc<dyn Synthesizer>,
    output: Arc<dyn AudioOutput>,
    busy: AtomicBool,
}

/// Clears the busy flag however the request ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub(crate) fn preview(text: &str) -> String {
    let head: String = text.chars().take(80).collect();
    let ellipsis = if text.chars().count() > 80 { "..." } else { "" };
    format!("{}{ellipsis}", head.replace('\n', " "))
}

impl SpeechRequester {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            synthesizer,
            output,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.output.stop();
    }

    pub async fn speak(&self, tts: &TtsConfig, text: &str) -> Result<SpeakOutcome, SpeechError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!("Speech busy, dropping: \"{}\"", preview(text));
            return Ok(SpeakOutcome::Dropped);
        }
        let _guard = BusyGuard(&self.busy);

        info!("Speaking ({} chars): \"{}\"", text.chars().count(), preview(text));

        let t_synth = Instant::now();
        let audio = self.synthesizer.synthesize(tts, text).await.map_err(|e| {
            warn!("Speech synthesis failed: {e}");
            e
        })?;
        let synth_ms = t_synth.elapsed().as_secs_f64() * 1000.0;

        let t_play = Instant::now();
        self.output
            .play(audio, &tts.response_format)
            .await
            .map_err(|e| {
                warn!("Playback failed: {e}");
                e
            })?;
        let play_ms = t_play.elapsed().as_secs_f64() * 1000.0;

        info!("Speech complete: synth={synth_ms:.0}ms play={play_ms:.0}ms");
        Ok(SpeakOutcome::Played { synth_ms, play_ms })
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every text it is asked to synthesize.
    #[derive(Default)]
    pub struct RecordingSynth {
        pub texts: Mutex<Vec<String>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Synthesizer for RecordingSynth {
        async fn synthesize(&self, _tts: &TtsConfig, text: &str) -> Result<Vec<u8>, SiliconFlowError> {
            self.texts.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(SiliconFlowError::Api {
                    status: 401,
                    message: "bad key".into(),
                });
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    /// "Plays" by sleeping for a fixed time.
    pub struct SleepyOutput {
        pub duration: Duration,
        pub played: Mutex<usize>,
    }

    impl SleepyOutput {
        pub fn new(duration: Duration) -> Self {
            Self {
                duration,
                played: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl AudioOutput for SleepyOutput {
        async fn play(&self, _audio: Vec<u8>, _format: &str) -> Result<(), PlaybackError> {
            tokio::time::sleep(self.duration).await;
            *self.played.lock().unwrap() += 1;
            Ok(())
        }
    }
}
