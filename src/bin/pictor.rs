//! pictor: one-shot image generation from the command line.
//!
//! Runs a prompt through the full coordinator (limits, validation, cache,
//! retries) against the configured hosted backend and writes the image to
//! disk.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use pictor::{Config, Fingerprint, GenerationParams, PictorError, Secrets};

/// Pictor CLI
#[derive(Parser)]
#[command(name = "pictor")]
#[command(version = pictor::PKG_VERSION)]
#[command(about = "Coordinated image generation")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "PICTOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an image
    Generate {
        /// Prompt (or omit to read from stdin)
        prompt: Option<String>,
        /// Generation parameter, repeatable (e.g. `-p steps=30 -p quality=hd`)
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,
        /// User id the request is charged to
        #[arg(short, long, default_value_t = 0)]
        user: i64,
        /// Output file
        #[arg(short, long, default_value = "image.png")]
        out: PathBuf,
    },

    /// Print the cache fingerprint of a request
    Fingerprint {
        /// Prompt (or omit to read from stdin)
        prompt: Option<String>,
        /// Generation parameter, repeatable
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,
    },

    /// Show the effective limits and cache settings
    Limits,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Generate {
            prompt,
            params,
            user,
            out,
        } => {
            let prompt = resolve_text(prompt, "generate")?;
            let secrets = Secrets::load()?;
            let coordinator = config
                .builder()
                .backend(config.openai_backend(&secrets)?)
                .background_maintenance(false)
                .build()?;
            info!(version = pictor::version_string(), user, "pictor starting");

            let image = coordinator
                .handle(user, &prompt, params.into_iter().collect())
                .await?;
            std::fs::write(&out, image.bytes())?;
            println!("wrote {} bytes ({}) to {}", image.len(), image.content_type, out.display());
            if let Some(revised) = &image.revised_prompt {
                println!("revised prompt: {revised}");
            }
        }

        Command::Fingerprint { prompt, params } => {
            let prompt = resolve_text(prompt, "fingerprint")?;
            let params: GenerationParams = params.into_iter().collect();
            let merged = params.merged_over(&config.generation.defaults);
            println!("{}", Fingerprint::of(&prompt, &merged));
        }

        Command::Limits => {
            let limits = config.rate_limits();
            let cache = config.cache_config();
            let retry = config.retry();
            println!("per minute: {}", limits.max_requests_per_minute);
            println!("per day: {}", limits.max_requests_per_day);
            println!("cooldown: {}s", limits.cooldown.as_secs());
            println!("cache: {} entries, ttl {}s", cache.max_size, cache.ttl.as_secs());
            println!(
                "retries: {} attempts, base delay {}ms",
                retry.max_attempts,
                retry.initial_delay.as_millis()
            );
            println!("backend timeout: {}s", config.backend_timeout().as_secs());
        }
    }

    Ok(())
}

/// Parse `key=value`; the value is read as JSON when it parses, otherwise
/// as a plain string.
fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in {raw:?}"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Use the positional argument, or read stdin when it is piped.
fn resolve_text(text: Option<String>, command: &str) -> Result<String, PictorError> {
    if let Some(text) = text {
        return Ok(text);
    }
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Err(PictorError::Configuration(format!(
            "{command}: provide a prompt or pipe one on stdin"
        )));
    }
    let mut buf = String::new();
    stdin
        .lock()
        .read_to_string(&mut buf)
        .map_err(|e| PictorError::Configuration(format!("failed to read stdin: {e}")))?;
    Ok(buf)
}
