use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use vocord_audio::{
    AudioChunker, CaptureConfig, CaptureThread, ChunkerConfig, FrameRing, FrameReader,
    PlaybackConfig, PlaybackThread,
};
use vocord_engine::{
    AllowAllGate, Collaborators, ConversationEvent, EngineConfig, EnvTokenProvider, Role,
    TracingConversationLogger,
};
use vocord_foundation::ShutdownHandler;
use vocord_telemetry::PipelineMetrics;
use vocord_transport::{TransportConfig, WsTransport};

#[derive(Parser, Debug)]
#[command(name = "vocord", about = "Real-time duplex voice conversation client")]
struct Args {
    /// Realtime endpoint URL
    #[arg(long, env = "VOCORD_URL")]
    url: String,

    /// Environment variable holding the bearer token
    #[arg(long, default_value = "VOCORD_TOKEN")]
    token_env: String,

    /// Input device name (exact or substring); host default when omitted
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name; host default when omitted
    #[arg(long)]
    output_device: Option<String>,

    /// Assistant voice preset
    #[arg(long, env = "VOCORD_VOICE")]
    voice: Option<String>,

    /// System instructions for the assistant
    #[arg(long, env = "VOCORD_INSTRUCTIONS")]
    instructions: Option<String>,

    /// Disable server-side turn detection; the local VAD commits turns
    #[arg(long)]
    no_server_vad: bool,

    /// Disable talking over the assistant
    #[arg(long)]
    no_barge_in: bool,

    /// Local VAD margin above the noise floor, dB
    #[arg(long, default_value_t = 10.0)]
    vad_margin_db: f32,

    /// Local VAD trailing-silence hangover, ms
    #[arg(long, default_value_t = 1500)]
    vad_hangover_ms: u32,

    /// Server VAD sensitivity, 0.0 to 1.0
    #[arg(long, default_value_t = 0.5)]
    vad_threshold: f32,
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "vocord.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    std::mem::forget(guard);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging().map_err(|e| anyhow!("failed to initialize logging: {}", e))?;
    tracing::info!("Starting vocord");

    let shutdown = ShutdownHandler::new().install().await;
    let metrics = Arc::new(PipelineMetrics::default());

    // --- Capture: dedicated thread -> ring -> chunker -> wire frames ---
    let capture_ring = FrameRing::with_capacity(16384 * 4);
    let (capture_producer, capture_consumer) = capture_ring.split();
    let capture_config = CaptureConfig {
        device: args.input_device.clone(),
        ..Default::default()
    };
    let (capture, device_config) = CaptureThread::spawn(capture_config, capture_producer)
        .context("failed to start audio capture")?;
    tracing::info!(
        "Capture running at {} Hz, {} channel(s)",
        device_config.sample_rate,
        device_config.channels
    );

    let frame_reader = FrameReader::new(
        capture_consumer,
        device_config.sample_rate,
        device_config.channels,
        16384,
        Some(metrics.clone()),
    );
    let (frames_tx, frames_rx) = mpsc::channel(100);
    let (chunker_handle, chunker_running) =
        AudioChunker::new(frame_reader, frames_tx, ChunkerConfig::default())
            .with_metrics(metrics.clone())
            .spawn();

    // --- Playback ---
    let playback_config = PlaybackConfig {
        device: args.output_device.clone(),
        ..Default::default()
    };
    let (playback, playback_writer) =
        PlaybackThread::spawn(playback_config, Some(metrics.clone()))
            .context("failed to start audio playback")?;

    // --- Engine ---
    let mut engine_config = EngineConfig {
        server_vad: !args.no_server_vad,
        barge_in: !args.no_barge_in,
        vad_threshold: args.vad_threshold,
        voice: args.voice.clone(),
        instructions: args.instructions.clone(),
        ..Default::default()
    };
    engine_config.transport.url = args.url.clone();
    engine_config.vad.margin_db = args.vad_margin_db;
    engine_config.vad.hangover_ms = args.vad_hangover_ms;

    let transport = WsTransport::new(TransportConfig {
        url: args.url.clone(),
        ..Default::default()
    })
    .with_metrics(metrics.clone());

    let (handle, mut events, engine_task) = vocord_engine::spawn(
        engine_config,
        frames_rx,
        Box::new(playback_writer),
        Collaborators {
            transport: Arc::new(transport),
            tokens: Arc::new(EnvTokenProvider::new(args.token_env.clone())),
            logger: Arc::new(TracingConversationLogger),
            gate: Arc::new(AllowAllGate),
        },
        Some(metrics.clone()),
    )
    .map_err(|e| anyhow!("failed to start engine: {}", e))?;

    handle
        .start()
        .await
        .map_err(|e| anyhow!("failed to start session: {}", e))?;
    println!("Session started. Speak when ready; Ctrl-C to quit.");

    // --- Main loop ---
    let mut stats_interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Some(event) => {
                    if !handle_event(event) {
                        break;
                    }
                }
                None => {
                    tracing::warn!("Engine event stream ended");
                    break;
                }
            },
            _ = stats_interval.tick() => {
                tracing::info!(
                    "Pipeline: capture={} fps, chunker={} fps, forwarded={}, discarded={}, sent={}, received={}, underruns={}",
                    metrics.capture_fps.load(Ordering::Relaxed) as f64 / 10.0,
                    metrics.chunker_fps.load(Ordering::Relaxed) as f64 / 10.0,
                    metrics.frames_forwarded.load(Ordering::Relaxed),
                    metrics.frames_discarded.load(Ordering::Relaxed),
                    metrics.transport_sent.load(Ordering::Relaxed),
                    metrics.transport_received.load(Ordering::Relaxed),
                    metrics.playback_underruns.load(Ordering::Relaxed),
                );
            }
        }
    }

    // --- Graceful shutdown ---
    tracing::info!("Beginning graceful shutdown");
    if let Err(e) = handle.stop().await {
        tracing::warn!("Engine stop failed: {}", e);
    }
    drop(handle);
    let _ = engine_task.await;

    chunker_running.store(false, Ordering::SeqCst);
    let _ = chunker_handle.await;
    capture.stop();
    playback.stop();

    tracing::info!("vocord stopped");
    Ok(())
}

/// Render one event for the terminal. Returns false when the session is over
/// and the app should exit.
fn handle_event(event: ConversationEvent) -> bool {
    match event {
        ConversationEvent::SpeechStarted => {
            println!("* listening...");
        }
        ConversationEvent::SpeechStopped => {
            println!("* thinking...");
        }
        ConversationEvent::TranscriptDelta(seg) if seg.is_final => {
            let who = match seg.role {
                Role::User => "you",
                Role::Assistant => "assistant",
            };
            println!("[{}] {}", who, seg.text);
        }
        ConversationEvent::Reconnecting => {
            println!("* connection lost, reconnecting...");
        }
        ConversationEvent::Connected => {
            println!("* connected");
        }
        ConversationEvent::Disconnected => {
            println!("* session closed");
            return false;
        }
        ConversationEvent::Error { kind, detail } => {
            eprintln!("error ({:?}): {}", kind, detail);
            // Protocol errors leave the session running; everything else
            // lands the engine in a terminal state
            if kind != vocord_engine::ErrorKind::Protocol {
                return false;
            }
        }
        _ => {}
    }
    true
}
