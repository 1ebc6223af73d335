use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use chat_runtime::chat::ChatOrchestrator;
use chat_runtime::config::RuntimeConfig;
use chat_runtime::core::error::ProviderError;
use chat_runtime::core::traits::StreamHandler;
use chat_runtime::core::types::{MessageRole, RequestOptions};
use chat_runtime::registry::ProviderRegistry;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "warn";

struct CliConfig {
    provider: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    stream: bool,
}

/// Writes tokens to stdout as they arrive.
struct StdoutHandler;

impl StreamHandler for StdoutHandler {
    fn on_token(&self, text: &str) {
        print!("{text}");
        let _ = io::stdout().flush();
    }

    fn on_complete(&self, _full_text: &str) {
        println!();
    }

    fn on_error(&self, error: &ProviderError) {
        println!();
        eprintln!("error: {error}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(io::stderr)
        .init();

    let cli = parse_config(std::env::args().skip(1).collect())?;
    let config = RuntimeConfig::from_env()?;
    let registry = Arc::new(ProviderRegistry::from_config(&config)?);
    let _monitor =
        registry.spawn_health_monitor(Duration::from_secs(config.health_check_interval_secs));

    let orchestrator = ChatOrchestrator::new(Arc::clone(&registry), config.chat.clone());
    let mut conversation = orchestrator.create_conversation();
    let options = RequestOptions {
        provider: cli.provider.clone(),
        model: cli.model.clone(),
        max_tokens: cli.max_tokens,
        ..RequestOptions::default()
    };

    eprintln!(
        "chat_cli: providers={:?}, default={}, fallback={}, stream={}, commands=/exit /quit /clear /health /history",
        registry.available_names(),
        cli.provider
            .clone()
            .or_else(|| registry.default_name())
            .unwrap_or_default(),
        config.chat.fallback_provider.as_deref().unwrap_or("none"),
        cli.stream,
    );

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        let bytes = stdin.read_line(&mut input)?;
        if bytes == 0 {
            break;
        }

        let user_text = input.trim();
        if user_text.is_empty() {
            continue;
        }

        if user_text.eq_ignore_ascii_case("/exit") || user_text.eq_ignore_ascii_case("/quit") {
            break;
        }

        if user_text.eq_ignore_ascii_case("/clear") {
            orchestrator.clear_conversation(&conversation);
            conversation = orchestrator.create_conversation();
            println!("(history cleared)");
            continue;
        }

        if user_text.eq_ignore_ascii_case("/health") {
            for (name, status) in registry.check_all_health().await {
                println!(
                    "{name}: {} ({} ms){}",
                    if status.is_healthy { "healthy" } else { "degraded" },
                    status.average_response_time_ms.unwrap_or_default(),
                    status
                        .message
                        .map(|message| format!(" - {message}"))
                        .unwrap_or_default()
                );
            }
            continue;
        }

        if user_text.eq_ignore_ascii_case("/history") {
            for message in orchestrator.history(&conversation) {
                let role = match message.role {
                    MessageRole::User => "you",
                    MessageRole::Assistant => "ai",
                    MessageRole::System => "system",
                };
                println!("[{role}] {}", message.content);
            }
            continue;
        }

        if cli.stream {
            stream_turn(&orchestrator, &conversation, user_text, options.clone()).await?;
        } else {
            let exchange = orchestrator
                .send_message(&conversation, user_text, options.clone())
                .await?;
            if exchange.ai_message.is_error {
                eprintln!("error: {}", exchange.ai_message.content);
            } else {
                println!("{}", exchange.ai_message.content);
            }
        }
    }

    Ok(())
}

/// Streams one reply. Ctrl-C stops the generation and keeps what arrived.
async fn stream_turn(
    orchestrator: &ChatOrchestrator,
    conversation: &str,
    text: &str,
    options: RequestOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let reply = orchestrator
        .send_streaming_message(conversation, text, Arc::new(StdoutHandler), options)
        .await?;
    let message_id = reply.placeholder.id.clone();
    let mut task = reply.task;

    let message = tokio::select! {
        finished = &mut task => finished?,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.stop_streaming(&message_id);
            let message = task.await?;
            println!("\n(stopped)");
            message
        }
    };

    if message.is_error {
        eprintln!("error: {}", message.content);
    }
    Ok(())
}

fn parse_config(args: Vec<String>) -> Result<CliConfig, Box<dyn std::error::Error>> {
    let mut provider = None;
    let mut model = None;
    let mut max_tokens = None;
    let mut stream = true;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--provider" => {
                let value = args
                    .get(i + 1)
                    .ok_or("missing value for --provider (anthropic|openai)")?;
                provider = Some(value.trim().to_ascii_lowercase());
                i += 2;
            }
            "--model" => {
                let value = args
                    .get(i + 1)
                    .ok_or("missing value for --model")?
                    .trim()
                    .to_string();
                if value.is_empty() {
                    return Err("--model must be non-empty".into());
                }
                model = Some(value);
                i += 2;
            }
            "--max-tokens" => {
                let value = args.get(i + 1).ok_or("missing value for --max-tokens")?;
                max_tokens = Some(
                    value
                        .parse::<u32>()
                        .map_err(|_| "--max-tokens must be a positive integer")?,
                );
                i += 2;
            }
            "--no-stream" => {
                stream = false;
                i += 1;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    Ok(CliConfig {
        provider,
        model,
        max_tokens,
        stream,
    })
}

fn print_help() {
    println!(
        "Usage:\n  cargo run --bin chat_cli -- [--provider anthropic|openai] [--model MODEL] [--max-tokens N] [--no-stream]\n\nEnv:\n  ANTHROPIC_API_KEY / ANTHROPIC_BASE_URL / ANTHROPIC_MODEL\n  OPENAI_API_KEY / OPENAI_BASE_URL / OPENAI_MODEL\n  CHAT_DEFAULT_PROVIDER\n  CHAT_FALLBACK_PROVIDER\n  CHAT_SYSTEM_PROMPT\n  CHAT_REQUEST_TIMEOUT_MS\n  CHAT_HEALTH_CHECK_INTERVAL_SECS (0 disables)\n  RUST_LOG (default: warn)\n\nCommands:\n  /clear    start a new conversation\n  /health   probe every provider\n  /history  print the conversation\n  /exit     quit\n  /quit     quit"
    );
}
