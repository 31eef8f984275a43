//! chat-speaker: text-to-speech sidecar for a chat application.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_speaker::adapter::MessageEventAdapter;
use chat_speaker::api::{self, ApiState};
use chat_speaker::config::{Config, SettingsStore};
use chat_speaker::player::RodioPlayer;
use chat_speaker::service::Speaker;
use chat_speaker::siliconflow::{ClientHandle, SiliconFlowClient};
use chat_speaker::speech::SpeechRequester;

#[derive(Parser, Debug)]
#[command(name = "chat-speaker", about = "Read chat messages aloud via SiliconFlow TTS")]
struct Args {
    /// Path to the settings YAML file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API port (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// SiliconFlow API key (overrides api.key, not saved)
    #[arg(long)]
    api_key: Option<String>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy HTTP internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info,symphonia=warn")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn,symphonia=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("chat-speaker starting");

    let config_path = Config::resolve_path(args.config.as_deref());
    let settings = Arc::new(SettingsStore::open(config_path));
    let config = settings.snapshot();
    info!(
        "TTS: model={} voice={} speed={} gain={}",
        config.tts.model, config.tts.voice, config.tts.speed, config.tts.gain
    );

    let mut api_config = config.api.clone();
    if let Some(key) = args.api_key {
        api_config.key = key;
    }
    if api_config.key.trim().is_empty() {
        tracing::warn!("No API key configured; set one with PUT /api before speaking");
    }
    let client = Arc::new(ClientHandle::new(SiliconFlowClient::new(&api_config)?));

    let port = args.port.unwrap_or(config.server.port);
    let debounce = Duration::from_millis(config.events.debounce_ms);
    let max_tracked = config.events.max_tracked_messages;

    let speech = SpeechRequester::new(client.clone(), Arc::new(RodioPlayer::new()));
    let speaker = Arc::new(Speaker::new(settings, speech));
    let adapter = Arc::new(MessageEventAdapter::new(speaker, debounce, max_tracked));

    api::start_api(ApiState { adapter, client }, port).await?;
    info!("Ready (debounce {}ms), press Ctrl-C to stop", debounce.as_millis());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
