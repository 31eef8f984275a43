//! chat-speaker: reads chat messages aloud through the SiliconFlow speech API.
//!
//! Components:
//! - `filter`: decides what part of a message is spoken (exclusion rules,
//!   start/end markers)
//! - `adapter`: render notifications → debounced, deduplicated speech
//! - `speech`: single-flight synthesize-then-play
//! - `siliconflow`: vendor HTTP client
//! - `player`: rodio playback
//! - `api`: axum server for the chat host
//! - `config`: YAML settings, loaded at startup and saved on edit

pub mod adapter;
pub mod api;
pub mod config;
pub mod debounce;
pub mod error;
pub mod filter;
pub mod player;
pub mod service;
pub mod siliconflow;
pub mod speech;

pub use filter::{filter_for_speech, ExclusionRule, SpeakDecision};
