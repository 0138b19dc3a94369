//! doxa CLI - send prompts to a configured chat-completion backend.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doxa::{Config, Message, Sampler};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "doxa")]
#[command(author = "Infernet <dev@infernet.org>")]
#[command(version)]
#[command(about = "Resilient client for chat-completion APIs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a prompt and print the reply
    Ask {
        /// The user prompt
        prompt: String,

        /// Also print token usage
        #[arg(long)]
        usage: bool,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# doxa configuration file

[sampler]
backend = "openai"          # "openai" or "gigachat"
model = "gpt-4o"
temperature = 0.0
# max_tokens = 2048         # omitted from requests when unset
# system_prompt = "You are a careful assistant."
request_delay_secs = 0.0    # minimum spacing per backend x model

[openai]
# api_key = "sk-..."        # or set OPENAI_API_KEY
base_url = "https://api.openai.com/v1"
timeout_secs = 60

[gigachat]
# credentials = "..."       # or set GIGACHAT_CREDENTIALS
scope = "GIGACHAT_API_CORP"
profanity_check = true
timeout_secs = 60

[retry]
max_attempts = 17           # GigaChat unified budget
retry_sleep_secs = 7.0
decode_max_attempts = 12    # OpenAI-compatible decode/structural budget
decode_retry_delay_secs = 5.0
"#;
    println!("{example}");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            config
                .validate()
                .context("Failed to resolve backend credentials")?;

            info!("Configuration is valid");
            info!("  Backend: {}", config.sampler.backend);
            info!("  Model:   {}", config.sampler.model);
            info!(
                "  Request delay: {:.2}s",
                config.sampler.request_delay_secs
            );
            return Ok(());
        }

        Commands::Ask { prompt, usage } => {
            let config = Config::from_file(&cli.config)
                .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

            let sampler = Sampler::from_config(&config).context("Failed to build sampler")?;
            let messages = vec![Message::user(prompt)];

            let (text, metadata) = sampler
                .call_with_metadata(&messages)
                .await
                .context("Call failed")?;

            println!("{text}");
            if usage {
                println!();
                println!(
                    "tokens: prompt={} completion={} total={}",
                    metadata.prompt_tokens, metadata.completion_tokens, metadata.total_tokens
                );
            }
        }
    }

    Ok(())
}
