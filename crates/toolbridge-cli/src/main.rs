//! Toolbridge CLI - interactive chat with a tool provider
//!
//! Usage:
//!   toolbridge <provider>     Launch <provider> from TOOLBRIDGE_SCRIPTS_DIR and chat
//!
//! Type `quit` to leave. Ctrl-C cancels the current turn and exits; the
//! provider process is shut down either way.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use toolbridge::config::WORKSPACE_ROOT_VAR;
use toolbridge::{
    ChatModel, Config, Conversation, HttpChatModel, ProviderLaunch, SessionState, ToolInvoker,
    ToolSession,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chat with a local model that can call tools from a provider
#[derive(Parser, Debug)]
#[command(name = "toolbridge")]
#[command(about = "Chat with a local model that can call sandboxed tools")]
struct Args {
    /// Provider executable, relative to TOOLBRIDGE_SCRIPTS_DIR
    provider: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let mut launch = ProviderLaunch::validate(&args.provider, &config.scripts_dir)
        .with_context(|| format!("refusing to launch {}", args.provider.display()))?
        .env(WORKSPACE_ROOT_VAR, &config.workspace_root);
    if let Ok(filter) = std::env::var("RUST_LOG") {
        launch = launch.env("RUST_LOG", filter);
    }

    let model = HttpChatModel::new(&config.model_url, &config.model, config.model_timeout)?;
    let mut session = ToolSession::connect(&launch, config.tool_timeout)
        .await
        .context("failed to connect to tool provider")?;
    println!(
        "Connected to provider with tools: {}",
        session.catalog().names().join(", ")
    );

    let mut conversation = Conversation::from_config(model, &config);
    let result = tokio::select! {
        r = chat_loop(&mut conversation, &mut session) => r,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted");
            Ok(())
        }
    };

    session.close().await;
    result
}

async fn chat_loop<M: ChatModel>(
    conversation: &mut Conversation<M>,
    session: &mut ToolSession,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Type your queries or 'quit' to exit.");

    loop {
        print!("\nQuery: ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query.eq_ignore_ascii_case("quit") || query.eq_ignore_ascii_case("exit") {
            break;
        }

        match conversation.run_turn(session, query).await {
            Ok(outcome) => println!("\n{}", outcome.render()),
            Err(e) => eprintln!("\nError: {}", e),
        }

        if session.state() == SessionState::Closed {
            eprintln!("Tool provider connection lost; exiting.");
            break;
        }
    }
    Ok(())
}
