use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use futures::future::BoxFuture;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use voyage_realtime::{
    AudioDevices, AudioFormat, EngineConfig, EngineObservers, EngineStatus, MemoryDevices,
    MemoryTransport, NoTools, PhaseChange, StaticCredentialProvider, TranscriptEntry, VoiceEngine,
    WavDevices,
};

/// Voyage Realtime - voice conversation engine for the travel assistant
#[derive(Parser, Debug)]
#[command(name = "voyage-realtime")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a recorded server-frame log through the engine
    Replay {
        /// JSON lines file, one server event per line
        frames: PathBuf,

        /// Write the assistant audio to this WAV file
        #[arg(long = "wav", value_name = "FILE")]
        wav: Option<PathBuf>,

        /// Delay between frames in milliseconds
        #[arg(long = "delay-ms", default_value_t = 0)]
        delay_ms: u64,

        /// Time to let playback settle after the last frame
        #[arg(long = "settle-ms", default_value_t = 500)]
        settle_ms: u64,
    },

    /// Live session with the default microphone and speaker
    #[cfg(feature = "device-audio")]
    Talk,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        EngineConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        let config = EngineConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
        config.validate().map_err(|e| anyhow!(e.to_string()))?;
        config
    };

    match cli.command {
        Commands::Replay {
            frames,
            wav,
            delay_ms,
            settle_ms,
        } => {
            replay(
                config,
                frames,
                wav,
                Duration::from_millis(delay_ms),
                Duration::from_millis(settle_ms),
            )
            .await
        }
        #[cfg(feature = "device-audio")]
        Commands::Talk => talk(config).await,
    }
}

fn printing_observers() -> EngineObservers {
    EngineObservers::default()
        .on_phase_changed(Arc::new(|change: PhaseChange| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                println!("[phase] {} -> {}", change.from, change.to);
            })
        }))
        .on_transcript_appended(Arc::new(|entry: TranscriptEntry| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                if !entry.is_streaming {
                    println!("[{}] {}", entry.role, entry.text);
                }
            })
        }))
        .on_status(Arc::new(|status: EngineStatus| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                println!("[status] {status:?}");
            })
        }))
}

async fn replay(
    config: EngineConfig,
    frames: PathBuf,
    wav: Option<PathBuf>,
    delay: Duration,
    settle: Duration,
) -> anyhow::Result<()> {
    let log = tokio::fs::read_to_string(&frames)
        .await
        .with_context(|| format!("Failed to read {}", frames.display()))?;
    let lines: Vec<String> = log
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    info!(frames = lines.len(), "Replaying server frames");

    let devices: Arc<dyn AudioDevices> = match wav {
        Some(path) => {
            println!("Writing assistant audio to {}", path.display());
            Arc::new(WavDevices::new(path, AudioFormat::wire()))
        }
        None => Arc::new(MemoryDevices::silent()),
    };

    let (transport, mut server) = MemoryTransport::new();
    let engine = VoiceEngine::new(
        config,
        Arc::new(StaticCredentialProvider::new("replay")),
        Box::new(transport),
        Arc::new(NoTools),
        devices,
        printing_observers(),
    );

    let feeder = tokio::spawn(async move {
        if server.complete_handshake().await.is_none() {
            return;
        }
        for line in lines {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !server.send_text(line).await {
                break;
            }
        }
        while let Some(event) = server.recv_event().await {
            println!("[client] {}", event.event_type());
        }
    });

    engine.connect().await?;
    tokio::time::sleep(settle).await;
    if let Some(stats) = engine.playback_stats().await {
        debug!(?stats, "Playback stats");
    }
    engine.disconnect().await;
    feeder.abort();
    Ok(())
}

#[cfg(feature = "device-audio")]
async fn talk(config: EngineConfig) -> anyhow::Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};
    use voyage_realtime::core::audio::CpalDevices;
    use voyage_realtime::core::realtime::session::credential_session;
    use voyage_realtime::{
        HttpCredentialProvider, PeerTransport, RealtimeTransport, TransportKind, WebSocketTransport,
    };

    let api_key = config.require_api_key().map_err(|e| anyhow!(e))?.to_string();
    let credentials = HttpCredentialProvider::new(
        &config.api_base_url,
        api_key,
        credential_session(&config),
    )?;
    let transport: Box<dyn RealtimeTransport> = match config.transport {
        TransportKind::Socket => Box::new(WebSocketTransport::new()),
        TransportKind::Peer => Box::new(
            PeerTransport::new(None)?.with_negotiation_timeout(config.negotiation_timeout()),
        ),
    };

    let engine = VoiceEngine::new(
        config,
        Arc::new(credentials),
        transport,
        Arc::new(NoTools),
        Arc::new(CpalDevices::new()),
        printing_observers(),
    );
    engine.connect().await?;
    println!("Connected. Speak, or type a message (/lang <language>, /stop, /quit).");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line {
                    "" => continue,
                    "/quit" => break,
                    "/stop" => engine.interrupt().await?,
                    _ => match line.strip_prefix("/lang ") {
                        Some(language) => engine.set_language(language.trim()).await?,
                        None => engine.send_text(line).await?,
                    },
                }
            }
        }
    }

    engine.disconnect().await;
    Ok(())
}
