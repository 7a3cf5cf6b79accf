use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voice_relay::api::ApiServerBuilder;
use voice_relay::config::REQUIRED_KEYS;
use voice_relay::pipeline::Pipeline;
use voice_relay::session::InMemorySessionStore;
use voice_relay::voice::{AssemblyAiTranscriber, GeminiGenerator, MurfSynthesizer};
use voice_relay::Config;

/// Voice relay - real-time voice conversations over STT, LLM and TTS providers
#[derive(Parser)]
#[command(name = "voice-relay", version, about)]
struct Cli {
    /// Port to listen on (overrides config and environment)
    #[arg(long)]
    port: Option<u16>,

    /// Path to a TOML config file
    #[arg(short, long, env = "VOICE_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay server (default)
    Serve,
    /// Check that provider API keys are configured
    CheckEnv,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,voice_relay=info",
        1 => "info,voice_relay=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::CheckEnv => check_env(&config),
    }
}

/// Run the relay until interrupted
async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::debug!(?config, "loaded configuration");

    let missing = config.api_keys.missing();
    if !missing.is_empty() {
        anyhow::bail!(
            "missing API keys: {} (run `voice-relay check-env` for details)",
            missing.join(", ")
        );
    }

    let Config {
        server,
        api_keys,
        stt,
        llm,
        tts,
        stream_timeout,
    } = config;

    let voice = tts.voice.clone();
    let transcriber = AssemblyAiTranscriber::new(
        api_keys.assemblyai.context("AssemblyAI key not set")?,
        stt,
    )?;
    let generator = GeminiGenerator::new(api_keys.gemini.context("Gemini key not set")?, llm)?;
    let synthesizer = MurfSynthesizer::new(api_keys.murf.context("Murf key not set")?, tts)?;

    let pipeline = Pipeline::new(
        Arc::new(transcriber),
        Arc::new(generator),
        Arc::new(synthesizer),
        Arc::new(InMemorySessionStore::new()),
    )
    .voice(voice)
    .stream_timeout(stream_timeout);

    tracing::info!(
        port = server.port,
        audio_mode = ?server.audio_mode,
        stream_timeout = ?stream_timeout,
        "starting voice relay"
    );

    let server_handle = ApiServerBuilder::new(Arc::new(pipeline), server.port)
        .static_dir(server.static_dir)
        .audio_mode(server.audio_mode)
        .build()
        .spawn();

    tokio::select! {
        result = server_handle => {
            result.context("API server task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }

    Ok(())
}

/// Report which provider keys are missing or still placeholders
fn check_env(config: &Config) -> anyhow::Result<()> {
    let missing = config.api_keys.missing();

    for key in REQUIRED_KEYS {
        let status = if missing.contains(&key.env) { "missing" } else { "ok" };
        println!("{:<20} {status}", key.env);
    }

    if missing.is_empty() {
        println!("\nAll API keys are configured.");
        Ok(())
    } else {
        anyhow::bail!(
            "set {} in the environment or in {}",
            missing.join(", "),
            voice_relay::config::file::config_file_path()
                .map_or_else(|| "the config file".to_string(), |p| p.display().to_string())
        )
    }
}
