use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use chatcart_agent::{ChatRuntime, OpenAiCompletionClient};
use chatcart_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use chatcart_db::{connect_with_settings, fixtures, migrations, SqlCartBackend};

#[derive(Debug, Parser)]
#[command(
    name = "chatcart",
    about = "Chat-driven shopping assistant",
    long_about = "Operate the chatcart assistant: run database migrations, load the demo \
                  catalog, and chat with the assistant from the terminal."
)]
struct Cli {
    /// Path to a chatcart.toml config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the database url
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Override the log level (trace|debug|info|warn|error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Load the deterministic demo catalog")]
    Seed,
    #[command(about = "Chat with the assistant on stdin/stdout")]
    Chat {
        /// Resume an existing session instead of starting a new one
        #[arg(long)]
        session: Option<String>,
    },
}

fn init_logging(config: &AppConfig) {
    use chatcart_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(LoadOptions {
        config_path: cli.config.clone(),
        require_file: cli.config.is_some(),
        overrides: ConfigOverrides {
            database_url: cli.database_url.clone(),
            log_level: cli.log_level.clone(),
            ..ConfigOverrides::default()
        },
    })
    .context("loading configuration")?;
    init_logging(&config);

    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .with_context(|| format!("connecting to {}", config.database.url))?;
    migrations::run_pending(&pool).await.context("applying migrations")?;

    match cli.command {
        Command::Migrate => {
            println!("migrations applied");
        }
        Command::Seed => {
            let inserted = fixtures::seed_demo_catalog(&pool).await.context("seeding catalog")?;
            println!("seeded {inserted} products");
        }
        Command::Chat { session } => {
            let oracle = Arc::new(
                OpenAiCompletionClient::from_config(&config.llm)
                    .context("building completion client")?,
            );
            let backend = Arc::new(SqlCartBackend::new(pool.clone()));
            let runtime = ChatRuntime::new(oracle, backend, &config.session);

            chat_loop(&runtime, session).await?;
        }
    }

    Ok(())
}

async fn chat_loop(
    runtime: &ChatRuntime<OpenAiCompletionClient, SqlCartBackend>,
    mut session_id: Option<String>,
) -> Result<()> {
    println!("chatcart is listening. Empty line or ctrl-d exits.");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let mut line = String::new();
        let read = stdin.lock().read_line(&mut line).context("reading stdin")?;
        let text = line.trim();
        if read == 0 || text.is_empty() {
            break;
        }

        let reply = runtime.process_user_message(text, session_id.as_deref()).await;
        session_id = Some(reply.session_id.clone());
        println!("{}", reply.text);
    }

    if let Some(id) = session_id {
        tracing::info!(session_id = %id, "chat session ended");
    }
    Ok(())
}
