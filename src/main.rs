//! Dialog Bot CLI.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

use clap::{Args, Parser, Subcommand};
use dialog_bot::chat::{ChatClient, EchoClient, GeminiClient};
use dialog_bot::config::{config_path, init_config, load_config};
use dialog_bot::error::{BotError, Result};
use dialog_bot::gateway::GatewayBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Dialog Bot - per-user AI dialog sessions over CLI and Telegram
#[derive(Parser)]
#[command(name = "dialog-bot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "DIALOG_BOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration file
    Init(InitArgs),

    /// Run the bot (all enabled channels)
    Run(RunArgs),

    /// Show configuration and environment status
    Status,

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the init command
#[derive(Args)]
struct InitArgs {
    /// Force overwrite existing configuration
    #[arg(short, long)]
    force: bool,
}

/// Arguments for the run command
#[derive(Args)]
struct RunArgs {
    /// Disable the CLI channel
    #[arg(long)]
    no_cli: bool,

    /// Disable the Telegram channel
    #[arg(long)]
    no_telegram: bool,

    /// Answer with a local echo model instead of the Gemini API
    #[arg(long)]
    echo: bool,

    /// Model to use (overrides config)
    #[arg(short, long, env = "DIALOG_BOT_MODEL")]
    model: Option<String>,
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
    /// Validate configuration
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rt.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "dialog_bot={level},{}",
            if verbosity >= 2 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let config_file = cli.config.unwrap_or_else(config_path);

    match cli.command {
        Commands::Init(args) => cmd_init(&config_file, args).await,
        Commands::Run(args) => cmd_run(&config_file, args).await,
        Commands::Status => cmd_status(&config_file).await,
        Commands::Config(args) => cmd_config(&config_file, args).await,
    }
}

/// Create a configuration file.
async fn cmd_init(config_file: &std::path::Path, args: InitArgs) -> Result<()> {
    init_config(config_file, args.force).await?;

    println!("Configuration created: {}", config_file.display());
    println!();
    println!("Next steps:");
    println!("  1. export GEMINI_API_KEY=<key>");
    println!("  2. export TELEGRAM_BOT_TOKEN=<token>   (optional)");
    println!("  3. dialog-bot run");

    Ok(())
}

/// Run the bot.
async fn cmd_run(config_file: &std::path::Path, args: RunArgs) -> Result<()> {
    let mut config = load_config(config_file).await?;

    if let Some(model) = args.model {
        if !config.chat.models.contains(&model) {
            config.chat.models.push(model.clone());
        }
        config.chat.default_model = model;
    }
    if args.no_telegram {
        config.channels.telegram.enabled = false;
    }
    config.validate()?;

    let client: Arc<dyn ChatClient> = if args.echo {
        println!("Running with the local echo model.\n");
        Arc::new(EchoClient::new())
    } else {
        Arc::new(GeminiClient::from_env()?)
    };

    let gateway = GatewayBuilder::new()
        .client(client)
        .bot_config(config)
        .enable_cli(!args.no_cli)
        .build()?;

    gateway.run().await
}

/// Show status.
async fn cmd_status(config_file: &std::path::Path) -> Result<()> {
    println!("Dialog Bot Status\n");

    println!("Configuration:");
    println!("  Path:   {}", config_file.display());
    println!(
        "  Exists: {}",
        if config_file.exists() { "yes" } else { "no" }
    );

    match load_config(config_file).await {
        Ok(config) => {
            println!("  Valid:  yes");
            println!();
            println!("Channels:");
            println!(
                "  Telegram: {}",
                if config.channels.telegram.enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!();
            println!("Chat:");
            println!("  Default model: {}", config.chat.default_model);
            println!("  Models:        {}", config.chat.models.join(", "));
            println!();
            println!("Sessions:");
            println!("  Timeout:      {} min", config.session.timeout_minutes);
            println!("  Max messages: {}", config.session.max_messages);
            println!();
            println!("Persistence:");
            println!("  Data dir: {}", config.persistence.data_dir().display());
            println!("  Max file: {} MB", config.persistence.max_file_size_mb);
        }
        Err(e) => {
            println!("  Valid:  no ({e})");
        }
    }

    println!();
    println!("Environment:");
    print_env_status("GEMINI_API_KEY");
    print_env_status("GOOGLE_API_KEY");
    print_env_status("TELEGRAM_BOT_TOKEN");

    Ok(())
}

/// Configuration management.
async fn cmd_config(config_file: &std::path::Path, args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Path => {
            println!("{}", config_file.display());
        }
        ConfigCommands::Show => {
            if config_file.exists() {
                let content = tokio::fs::read_to_string(config_file)
                    .await
                    .map_err(|e| BotError::config(format!("failed to read config: {e}")))?;
                println!("{content}");
            } else {
                println!("Configuration file does not exist.");
                println!("Run 'dialog-bot init' to create one.");
            }
        }
        ConfigCommands::Validate => {
            if !config_file.exists() {
                println!("error: configuration file does not exist");
                return Ok(());
            }
            match load_config(config_file).await {
                Ok(config) => match config.validate() {
                    Ok(()) => println!("Configuration is valid"),
                    Err(e) => println!("error: {e}"),
                },
                Err(e) => println!("error: {e}"),
            }
        }
    }

    Ok(())
}

/// Print environment variable status.
fn print_env_status(name: &str) {
    let status = if std::env::var(name).is_ok() {
        "set"
    } else {
        "-"
    };
    println!("  {name}: {status}");
}
