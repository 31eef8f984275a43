//! Chat message events → speech.
//!
//! The host reports "message rendered" for a message id, possibly many times
//! while the message streams in. The adapter keeps the latest text per id,
//! waits for the id to go quiet, then runs it through the speaker exactly
//! once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::debounce::Debouncer;
use crate::service::Speaker;
use crate::speech::SpeakOutcome;

#[derive(Debug, Clone)]
struct RenderedMessage {
    text: String,
    is_user: bool,
}

/// Latest rendered text per message id.
#[derive(Default)]
pub struct MessageStore {
    messages: Mutex<HashMap<String, RenderedMessage>>,
}

impl MessageStore {
    fn record(&self, id: &str, text: String, is_user: bool) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), RenderedMessage { text, is_user });
    }

    pub fn message_text(&self, id: &str) -> Option<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|m| m.text.clone())
    }

    fn take(&self, id: &str) -> Option<RenderedMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

/// Bounded set of ids already handled; oldest forgotten first.
struct ProcessedIds {
    capacity: usize,
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl ProcessedIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Returns false if `id` was already present.
    fn insert(&mut self, id: &str) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderVerdict {
    Scheduled,
    /// Auto-play is off for this message's author.
    Ignored,
    AlreadyProcessed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProcessOutcome {
    Spoken(SpeakOutcome),
    Silent,
    AlreadyProcessed,
    Missing,
    Failed,
}

pub struct MessageEventAdapter {
    speaker: Arc<Speaker>,
    messages: MessageStore,
    debouncer: Debouncer<String>,
    processed: Mutex<ProcessedIds>,
}

impl MessageEventAdapter {
    pub fn new(speaker: Arc<Speaker>, debounce: Duration, max_tracked: usize) -> Self {
        Self {
            speaker,
            messages: MessageStore::default(),
            debouncer: Debouncer::new(debounce),
            processed: Mutex::new(ProcessedIds::new(max_tracked)),
        }
    }

    pub fn speaker(&self) -> &Arc<Speaker> {
        &self.speaker
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Handle a render notification for message `id` carrying its current text.
    pub fn on_rendered(self: &Arc<Self>, id: &str, text: String, is_user: bool) -> RenderVerdict {
        if self
            .processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
        {
            debug!("Message {id} already processed, ignoring render");
            return RenderVerdict::AlreadyProcessed;
        }

        let tts = self.speaker.settings().tts;
        let enabled = if is_user { tts.auto_play_user } else { tts.auto_play };
        if !enabled {
            debug!("Auto-play off for {} messages, ignoring {id}", if is_user { "user" } else { "character" });
            return RenderVerdict::Ignored;
        }

        self.messages.record(id, text, is_user);
        let adapter = Arc::clone(self);
        let key = id.to_string();
        self.debouncer.schedule(key.clone(), move || async move {
            adapter.process(&key).await;
        });
        RenderVerdict::Scheduled
    }

    /// Speak message `id` now. Each id is handled at most once.
    pub async fn process(&self, id: &str) -> ProcessOutcome {
        if !self
            .processed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
        {
            return ProcessOutcome::AlreadyProcessed;
        }
        let Some(message) = self.messages.take(id) else {
            warn!("No text recorded for message {id}");
            return ProcessOutcome::Missing;
        };

        info!(
            "Processing {} message {id} ({} chars)",
            if message.is_user { "user" } else { "character" },
            message.text.chars().count()
        );
        match self.speaker.speak_message(&message.text).await {
            Ok(Some(outcome)) => ProcessOutcome::Spoken(outcome),
            Ok(None) => ProcessOutcome::Silent,
            Err(e) => {
                warn!("Failed to speak message {id}: {e}");
                ProcessOutcome::Failed
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.debouncer.pending_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SettingsStore};
    use crate::speech::fakes::{RecordingSynth, SleepyOutput};
    use crate::speech::SpeechRequester;

    struct Harness {
        adapter: Arc<MessageEventAdapter>,
        synth: Arc<RecordingSynth>,
        _dir: tempfile::TempDir,
    }

    fn harness(config: Config, playback: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(RecordingSynth::default());
        let output = Arc::new(SleepyOutput::new(playback));
        let store = Arc::new(SettingsStore::new(dir.path().join("config.yaml"), config));
        let speaker = Arc::new(Speaker::new(store, SpeechRequester::new(synth.clone(), output)));
        let adapter = Arc::new(MessageEventAdapter::new(speaker, Duration::from_millis(1000), 3));
        Harness {
            adapter,
            synth,
            _dir: dir,
        }
    }

    fn spoken(h: &Harness) -> Vec<String> {
        h.synth.texts.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn streamed_renders_speak_final_text_once() {
        let h = harness(Config::default(), Duration::ZERO);

        for partial in ["Hel", "Hello wor", "Hello world."] {
            assert_eq!(
                h.adapter.on_rendered("m1", partial.into(), false),
                RenderVerdict::Scheduled
            );
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        assert!(spoken(&h).is_empty());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(spoken(&h), vec!["Hello world.".to_string()]);

        assert_eq!(
            h.adapter.on_rendered("m1", "Hello world.".into(), false),
            RenderVerdict::AlreadyProcessed
        );
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(spoken(&h).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn user_messages_follow_their_own_switch() {
        let h = harness(Config::default(), Duration::ZERO);
        assert_eq!(
            h.adapter.on_rendered("u1", "my line".into(), true),
            RenderVerdict::Ignored
        );

        let mut config = Config::default();
        config.tts.auto_play = false;
        config.tts.auto_play_user = true;
        let h = harness(config, Duration::ZERO);
        assert_eq!(
            h.adapter.on_rendered("c1", "character".into(), false),
            RenderVerdict::Ignored
        );
        assert_eq!(
            h.adapter.on_rendered("u1", "my line".into(), true),
            RenderVerdict::Scheduled
        );
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(spoken(&h), vec!["my line".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn message_arriving_during_playback_is_dropped() {
        let h = harness(Config::default(), Duration::from_secs(10));

        h.adapter.on_rendered("m1", "first".into(), false);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        h.adapter.on_rendered("m2", "second".into(), false);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(spoken(&h), vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn silent_decision_is_not_sent() {
        let mut config = Config::default();
        config.markers.start = "(".into();
        config.markers.end = ")".into();
        let h = harness(config, Duration::ZERO);

        h.adapter.messages.record("m1", "nothing marked".into(), false);
        assert_eq!(h.adapter.process("m1").await, ProcessOutcome::Silent);
        assert_eq!(h.adapter.process("m1").await, ProcessOutcome::AlreadyProcessed);
        assert_eq!(h.adapter.process("m2").await, ProcessOutcome::Missing);
        assert!(spoken(&h).is_empty());
    }

    #[test]
    fn processed_ids_forget_oldest() {
        let mut ids = ProcessedIds::new(2);
        assert!(ids.insert("a"));
        assert!(!ids.insert("a"));
        assert!(ids.insert("b"));
        assert!(ids.insert("c"));
        assert!(!ids.contains("a"));
        assert!(ids.contains("b") && ids.contains("c"));
    }

    #[test]
    fn store_keeps_latest_text() {
        let store = MessageStore::default();
        store.record("x", "one".into(), false);
        store.record("x", "one two".into(), false);
        assert_eq!(store.message_text("x").as_deref(), Some("one two"));
        assert!(store.message_text("y").is_none());
    }
}
