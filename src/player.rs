//! Audio playback through rodio with cancellation.
//!
//! Each clip opens the default output device on a blocking thread, plays the
//! decoded audio through a `Sink`, and polls for completion or a stop request.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStreamBuilder, Sink};
use tracing::{debug, info};

use crate::error::PlaybackError;
use crate::speech::AudioOutput;

/// Sample rate the vendor uses for raw `pcm` responses.
const PCM_SAMPLE_RATE: u32 = 44100;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct RodioPlayer {
    cancel_flag: Arc<AtomicBool>,
    active_sink: Arc<Mutex<Option<Sink>>>,
}

impl Default for RodioPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RodioPlayer {
    pub fn new() -> Self {
        Self {
            cancel_flag: Arc::new(AtomicBool::new(false)),
            active_sink: Arc::new(Mutex::new(None)),
        }
    }
}

/// Interpret raw 16-bit little-endian mono PCM.
fn pcm_samples(audio: &[u8]) -> Vec<f32> {
    audio
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect()
}

/// Block until `sink` drains or `cancel_flag` is raised. Returns true if
/// cancelled.
fn wait_for_sink(active_sink: &Mutex<Option<Sink>>, cancel_flag: &AtomicBool) -> bool {
    loop {
        let is_empty = {
            let guard = active_sink.lock().unwrap_or_else(PoisonError::into_inner);
            guard.as_ref().map_or(true, Sink::empty)
        };
        if is_empty {
            return false;
        }

        if cancel_flag.load(Ordering::Relaxed) {
            if let Some(sink) = active_sink.lock().unwrap_or_else(PoisonError::into_inner).take() {
                sink.stop();
            }
            return true;
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

#[async_trait]
impl AudioOutput for RodioPlayer {
    async fn play(&self, audio: Vec<u8>, format: &str) -> Result<(), PlaybackError> {
        self.cancel_flag.store(false, Ordering::Relaxed);
        let cancel_flag = self.cancel_flag.clone();
        let active_sink = self.active_sink.clone();
        let raw_pcm = format == "pcm";

        let cancelled = tokio::task::spawn_blocking(move || {
            let mut stream = OutputStreamBuilder::open_default_stream()
                .map_err(|e| PlaybackError::Output(e.to_string()))?;
            stream.log_on_drop(false);
            let sink = Sink::connect_new(stream.mixer());

            if raw_pcm {
                let samples = pcm_samples(&audio);
                debug!(
                    "Playing {} PCM samples ({:.1}s)",
                    samples.len(),
                    samples.len() as f32 / PCM_SAMPLE_RATE as f32
                );
                sink.append(SamplesBuffer::new(1, PCM_SAMPLE_RATE, samples));
            } else {
                let source =
                    Decoder::new(Cursor::new(audio)).map_err(|e| PlaybackError::Decode(e.to_string()))?;
                sink.append(source);
            }

            *active_sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
            let cancelled = wait_for_sink(&active_sink, &cancel_flag);
            *active_sink.lock().unwrap_or_else(PoisonError::into_inner) = None;
            // `stream` must outlive the sink; dropped here.
            drop(stream);
            Ok::<bool, PlaybackError>(cancelled)
        })
        .await
        .map_err(|e| PlaybackError::Output(format!("playback task failed: {e}")))??;

        if cancelled {
            info!("Playback stopped");
        }
        Ok(())
    }

    fn stop(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        if let Some(sink) = self
            .active_sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sink.stop();
        }
    }
}
