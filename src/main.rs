use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use loqa_interpreter::audio::{list_devices, CaptureMode, PlatformBackendFactory};
use loqa_interpreter::config::{Config, DEFAULT_CONFIG_PATH};
use loqa_interpreter::playback::{AudioPlayer, CpalPlayer, NullPlayer};
use loqa_interpreter::session::{Session, SessionDeps, SessionEvent};
use loqa_interpreter::transport::WebSocketConnector;
use loqa_interpreter::{create_router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "loqa-interpreter")]
#[command(about = "Real-time speech-to-speech translation client", version)]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: String,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream one session in the terminal
    Run(SessionArgs),
    /// Serve the HTTP control API
    Serve {
        #[command(flatten)]
        session: SessionArgs,

        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// List audio input and output devices
    Devices,
}

#[derive(Args)]
struct SessionArgs {
    /// Translation service websocket URL
    #[arg(long)]
    url: Option<String>,

    /// What to capture
    #[arg(short, long, value_enum)]
    mode: Option<CaptureMode>,

    /// Source language tag
    #[arg(short, long)]
    source: Option<String>,

    /// Target language tag
    #[arg(short, long)]
    target: Option<String>,

    /// Replay a WAV file instead of capturing from a device
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Input device name
    #[arg(short, long)]
    device: Option<String>,

    /// Discard synthesized audio instead of playing it
    #[arg(long)]
    no_playback: bool,
}

impl SessionArgs {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.url {
            config.transport.url = url;
        }
        if let Some(mode) = self.mode {
            config.audio.mode = mode;
        }
        if let Some(source) = self.source {
            config.session.source_lang = source;
        }
        if let Some(target) = self.target {
            config.session.target_lang = target;
        }
        if let Some(file) = self.file {
            config.audio.file = Some(file);
        }
        if let Some(device) = self.device {
            config.audio.input_device = Some(device);
        }
        if self.no_playback {
            config.playback.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut cfg = Config::load(&cli.config)?;
    info!("Loqa Interpreter v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Run(args) => {
            args.apply(&mut cfg);
            run_session(cfg).await
        }
        Command::Serve {
            session,
            bind,
            port,
        } => {
            session.apply(&mut cfg);
            if let Some(bind) = bind {
                cfg.http.bind = bind;
            }
            if let Some(port) = port {
                cfg.http.port = port;
            }
            serve(cfg).await
        }
        Command::Devices => print_devices(),
    }
}

fn build_deps(cfg: &Config) -> SessionDeps {
    let audio = match &cfg.audio.file {
        Some(path) => {
            info!("Audio source: {}", path.display());
            PlatformBackendFactory::with_file(path.clone())
        }
        None => PlatformBackendFactory::new(),
    };
    let player: Arc<dyn AudioPlayer> = if cfg.playback.enabled {
        Arc::new(CpalPlayer::new(cfg.playback.output_device.clone()))
    } else {
        Arc::new(NullPlayer)
    };

    SessionDeps {
        connector: Arc::new(WebSocketConnector::new(
            cfg.transport.url.clone(),
            cfg.transport.outbound_capacity,
        )),
        audio: Arc::new(audio),
        player,
    }
}

async fn run_session(cfg: Config) -> Result<()> {
    let session_config = cfg.session_config();
    let mut source = session_config.source_lang.clone();
    let mut target = session_config.target_lang.clone();

    let handle = Session::spawn(session_config, build_deps(&cfg));
    let mut events = handle.subscribe();

    handle.start().await.context("Failed to start session")?;
    println!(
        "Streaming {} ({} -> {}). Type 'swap' to swap languages, 'quit' to stop.",
        cfg.audio.mode, source, target
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) => match line.trim() {
                    "swap" => {
                        if let Err(e) = handle.swap_languages().await {
                            warn!("Swap failed: {}", e);
                        }
                    }
                    "quit" | "q" => break,
                    "" => {}
                    other => println!("Unknown command '{}' (swap, quit)", other),
                },
                None => stdin_open = false,
            },
            event = events.recv() => match event {
                Ok(SessionEvent::Transcript { text, .. }) => println!("[{}] {}", source, text),
                Ok(SessionEvent::Translation { text }) => println!("[{}] {}", target, text),
                Ok(SessionEvent::LanguagesChanged { source_lang, target_lang }) => {
                    println!("-- {} -> {} --", source_lang, target_lang);
                    source = source_lang;
                    target = target_lang;
                }
                Ok(SessionEvent::Ended { reason }) => {
                    info!("Session ended: {}", reason);
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} session events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let stats = handle.stop().await?;
    info!(
        "Session {} finished: {:.1}s, {} chunks sent, {} dropped, {} clips played",
        stats.session_id,
        stats.duration_secs,
        stats.chunks_sent,
        stats.chunks_dropped,
        stats.clips_played
    );
    Ok(())
}

async fn serve(cfg: Config) -> Result<()> {
    let state = AppState::new(cfg.session_config(), build_deps(&cfg));
    let app = create_router(state);

    let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP control API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;
    Ok(())
}

fn print_devices() -> Result<()> {
    let devices = list_devices()?;

    println!("Input devices:");
    for name in &devices.inputs {
        println!("  {}", name);
    }
    println!("Output devices:");
    for name in &devices.outputs {
        println!("  {}", name);
    }
    Ok(())
}
