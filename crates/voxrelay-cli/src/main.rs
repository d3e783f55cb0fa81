use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use voxrelay_core::config::Config;
use voxrelay_core::types::ChatTurn;
use voxrelay_gateway::{start_gateway, GatewayState};
use voxrelay_media::{stt_from_config, tts_from_config, AudioClip};
use voxrelay_providers::{
    build_contents, credentials_from_config, provider_from_config, Credentials, GenerateRequest,
    LlmProvider,
};

mod logging;

#[derive(Parser)]
#[command(
    name = "voxrelay",
    about = "Chat and voice relay between a browser and Gemini, with optional speech in and out",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Port to listen on (default: 5000)
        #[arg(long)]
        port: Option<u16>,

        /// Don't serve the browser client
        #[arg(long)]
        no_ui: bool,
    },

    /// Chat with the model (one-shot or interactive)
    Chat {
        /// Message to send (omit for interactive mode)
        #[arg(short, long)]
        message: Option<String>,

        /// Model to use
        #[arg(long)]
        model: Option<String>,
    },

    /// Synthesize text to an audio file
    Speak {
        #[arg(long)]
        text: String,

        /// Output file
        #[arg(long)]
        out: PathBuf,
    },

    /// Transcribe an audio file
    Transcribe { file: PathBuf },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show system status
    Status,

    /// Diagnose common issues
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);

    let config = Config::load(&config_path)?;
    logging::init(config.logging.as_ref(), cli.verbose);

    match cli.command {
        Commands::Serve { port, no_ui } => serve(config, port, no_ui).await?,
        Commands::Chat { message, model } => chat(&config, message, model).await?,
        Commands::Speak { text, out } => speak(&config, &text, &out).await?,
        Commands::Transcribe { file } => transcribe(&config, &file).await?,
        Commands::Status => status(&config, &config_path).await,
        Commands::Doctor => doctor(&config, &config_path).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("No config value at '{key}'"),
            },
            ConfigAction::Set { key, value } => {
                let mut config = config;
                // Accept JSON literals (numbers, booleans, objects); anything else is a string.
                let value = serde_json::from_str(&value)
                    .unwrap_or(serde_json::Value::String(value));
                config.set_path(&key, value)?;
                config.save(&config_path)?;
                println!("Set {key} in {}", config_path.display());
            }
        },
    }

    Ok(())
}

async fn serve(config: Config, port: Option<u16>, no_ui: bool) -> anyhow::Result<()> {
    let port = port.unwrap_or_else(|| config.gateway_port());
    let ui = !no_ui && config.ui_enabled();

    let (warnings, errors) = config.validate();
    for w in &warnings {
        tracing::warn!("{w}");
    }
    if !errors.is_empty() {
        anyhow::bail!("Invalid configuration:\n  {}", errors.join("\n  "));
    }

    #[allow(unused_mut)]
    let mut state = GatewayState::from_config(Arc::new(config))?;

    #[cfg(feature = "metrics")]
    {
        state.metrics = Some(voxrelay_gateway::metrics::install_prometheus_recorder()?);
        tracing::info!("Prometheus metrics at /metrics");
    }

    tracing::info!("Starting VoxRelay on port {port}");
    start_gateway(Arc::new(state), port, ui).await
}

/// A conversation held in memory for the `chat` command.
struct ChatSession<'a> {
    config: &'a Config,
    provider: Arc<dyn LlmProvider>,
    credentials: Credentials,
    model: String,
    history: Vec<ChatTurn>,
}

impl ChatSession<'_> {
    async fn ask(&mut self, prompt: &str) -> anyhow::Result<String> {
        let request = GenerateRequest {
            model: self.model.clone(),
            contents: build_contents(&self.history, prompt),
            system: self.config.system_prompt(),
            max_output_tokens: self.config.max_output_tokens(),
            temperature: self.config.temperature(),
        };
        let generation = self.provider.generate(&request, &self.credentials).await?;
        self.history.push(ChatTurn::user(prompt));
        self.history.push(ChatTurn::model(generation.text.clone()));
        Ok(generation.text)
    }
}

async fn chat(config: &Config, message: Option<String>, model: Option<String>) -> anyhow::Result<()> {
    let mut session = ChatSession {
        config,
        provider: provider_from_config(config)?,
        credentials: credentials_from_config(config)
            .context("No Gemini API key configured (set llm.api_key or GEMINI_API_KEY)")?,
        model: model.unwrap_or_else(|| config.model()),
        history: Vec::new(),
    };

    if let Some(message) = message {
        println!("{}", session.ask(&message).await?);
        return Ok(());
    }

    println!("Chatting with {}. Empty line or Ctrl-D to quit.", session.model);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        match session.ask(line).await {
            Ok(reply) => println!("{reply}\n"),
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}

async fn speak(config: &Config, text: &str, out: &Path) -> anyhow::Result<()> {
    let timeout = Duration::from_secs(config.llm_timeout_secs());
    let tts = tts_from_config(config.tts.as_ref(), timeout)?
        .context("TTS is not configured (add a \"tts\" section)")?;

    let clip = tts.synthesize(text).await?;
    tokio::fs::write(out, &clip.data)
        .await
        .with_context(|| format!("writing {}", out.display()))?;
    println!("Wrote {} bytes of {} to {}", clip.data.len(), clip.essence(), out.display());
    Ok(())
}

async fn transcribe(config: &Config, file: &Path) -> anyhow::Result<()> {
    let timeout = Duration::from_secs(config.llm_timeout_secs());
    let stt = stt_from_config(config.stt.as_ref(), timeout)?
        .context("STT is not configured (add an \"stt\" section)")?;

    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let name = file.file_name().and_then(|n| n.to_str()).unwrap_or("audio");
    let clip = AudioClip::from_file_bytes(data, name);

    let transcript = stt.transcribe(&clip).await?;
    if transcript.trim().is_empty() {
        eprintln!("No speech detected");
    } else {
        println!("{transcript}");
    }
    Ok(())
}

async fn status(config: &Config, config_path: &Path) {
    let port = config.gateway_port();
    println!("VoxRelay v{}", env!("CARGO_PKG_VERSION"));
    println!("Config: {}", config_path.display());
    println!("Gateway port: {port}");
    println!("Model: {}", config.model());
    println!(
        "STT: {}",
        config.stt.as_ref().map(|s| s.provider.as_str()).unwrap_or("disabled")
    );
    println!(
        "TTS: {}",
        config.tts.as_ref().map(|t| t.provider.as_str()).unwrap_or("disabled")
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap_or_default();
    let running = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .is_ok_and(|r| r.status().is_success());
    println!("Status: {}", if running { "running" } else { "not running" });
}

async fn doctor(config: &Config, config_path: &Path) {
    println!("Config file: {}", config_path.display());
    if !config_path.exists() {
        println!("  (not found, using defaults)");
    }

    let (mut warnings, errors) = config.validate();
    if let Some(warning) = check_model(config).await {
        warnings.push(warning);
    }
    for w in &warnings {
        println!("  warning: {w}");
    }
    for e in &errors {
        println!("  error: {e}");
    }

    let upload_dir = config.upload_dir();
    match std::fs::create_dir_all(&upload_dir) {
        Ok(()) => println!("Upload dir: {} (ok)", upload_dir.display()),
        Err(e) => println!("  error: upload dir {} is not writable: {e}", upload_dir.display()),
    }

    if warnings.is_empty() && errors.is_empty() {
        println!("All checks passed.");
    } else {
        println!("{} warning(s), {} error(s).", warnings.len(), errors.len());
    }
}

/// Warn when the configured model is not one the provider lists.
async fn check_model(config: &Config) -> Option<String> {
    let credentials = credentials_from_config(config)?;
    let provider = provider_from_config(config).ok()?;
    let model = config.model();
    match provider.list_models(&credentials).await {
        Ok(models) if models.iter().any(|m| m.id == model) => {
            println!("Model: {model} (ok)");
            None
        }
        Ok(models) => {
            let known: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
            Some(format!(
                "model '{model}' is not a known {} model (known: {})",
                provider.id(),
                known.join(", ")
            ))
        }
        Err(e) => Some(format!("could not list {} models: {e}", provider.id())),
    }
}
