//! dpscope - data product scoping chat with persistent sessions.

#![allow(clippy::print_stdout)] // CLI program intentionally uses stdout

use clap::{Args, Parser, Subcommand};
use dpscope::config::{config_path, init_config, load_config_from};
use dpscope::prelude::*;
use dpscope_cli::{ChatLoop, OpenAiCompatibleAgent, print_session_state};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Scope a data product through conversation; sessions survive restarts.
#[derive(Parser)]
#[command(name = "dpscope")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, env = "DPSCOPE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Session directory (overrides config)
    #[arg(long, env = "DPSCOPE_SESSIONS_DIR", global = true)]
    sessions_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init(InitArgs),

    /// Chat with the scoping agent
    Chat(ChatArgs),

    /// Inspect and manage stored sessions
    Sessions(SessionsArgs),

    /// Show configuration
    Config(ConfigArgs),

    /// Show configuration and credential status
    Status,
}

/// Arguments for the init command
#[derive(Args)]
struct InitArgs {
    /// Overwrite an existing configuration
    #[arg(short, long)]
    force: bool,
}

/// Arguments for the chat command
#[derive(Args)]
struct ChatArgs {
    /// Session id to resume; a new session is started when omitted
    #[arg(short, long)]
    session: Option<String>,

    /// Send a single message and exit
    #[arg(short, long)]
    message: Option<String>,

    /// Model to use (overrides config)
    #[arg(short = 'M', long, env = "DPSCOPE_MODEL")]
    model: Option<String>,

    /// Prompt shown before each input line
    #[arg(short, long, default_value = "You: ")]
    prompt: String,
}

/// Arguments for the sessions command
#[derive(Args)]
struct SessionsArgs {
    #[command(subcommand)]
    command: SessionCommands,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List stored sessions, most recent first
    List,
    /// Print a session's transcript and fields
    Show {
        /// Session id
        id: String,
    },
    /// Delete a session file
    Delete {
        /// Session id
        id: String,
    },
    /// Replace a session with a fresh one
    Reset {
        /// Session id
        id: String,
    },
}

/// Arguments for the config command
#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Show the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            println!("{}", DisplayError(&e));
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging with the given verbosity level.
///
/// Logs go to stderr so they do not interleave with the chat transcript.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "dpscope={level},dpscope_cli={level},{}",
            if verbosity >= 3 { "debug" } else { "warn" }
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let config_file = cli.config.clone().unwrap_or_else(config_path);

    match cli.command {
        Commands::Init(args) => cmd_init(args, &config_file).await,
        Commands::Config(args) => cmd_config(args, &config_file).await,
        Commands::Status => cmd_status(&config_file, cli.sessions_dir).await,
        Commands::Chat(args) => {
            let config = load(&config_file, cli.sessions_dir).await?;
            cmd_chat(args, config).await
        }
        Commands::Sessions(args) => {
            let config = load(&config_file, cli.sessions_dir).await?;
            cmd_sessions(args, &config).await
        }
    }
}

/// Load the config file and apply command-line overrides.
async fn load(path: &std::path::Path, sessions_dir: Option<PathBuf>) -> Result<ScopeConfig> {
    let mut config = load_config_from(path).await?;
    if sessions_dir.is_some() {
        config.sessions_dir = sessions_dir;
    }
    Ok(config)
}

/// Write a default configuration.
async fn cmd_init(args: InitArgs, config_file: &std::path::Path) -> Result<()> {
    if init_config(config_file, args.force).await? {
        println!("Configuration created: {}", config_file.display());
        println!();
        println!("Next steps:");
        println!("  1. export OPENAI_API_KEY=<key>");
        println!("  2. dpscope chat");
    } else {
        println!("Configuration already exists at: {}", config_file.display());
        println!("Use --force to overwrite.");
    }
    Ok(())
}

/// Start or resume a chat.
async fn cmd_chat(args: ChatArgs, mut config: ScopeConfig) -> Result<()> {
    if let Some(model) = args.model {
        config = config.with_model(model)?;
    }

    // Checked before any session file is touched.
    let agent = OpenAiCompatibleAgent::from_config(&config.agent)?;
    tracing::info!(model = %agent.model(), "agent ready");

    let store = SessionStore::new(config.session_config());
    let resumed = store.resume_or_create(args.session.as_deref()).await?;
    match &resumed.origin {
        SessionOrigin::Resumed => {
            println!(
                "Resumed session {} ({} messages)",
                resumed.session.id(),
                resumed.session.messages().len()
            );
        }
        SessionOrigin::Created => {}
        SessionOrigin::Replaced { requested, reason } => {
            println!("Could not resume session {requested}: {reason}");
            println!("Starting a new session instead.");
        }
    }

    let mut conversation = Conversation::new(store, agent);
    if let Some(done) = config.completion_message {
        conversation = conversation.completion_message(done);
    }

    let mut chat = ChatLoop::new(conversation, resumed.session).prompt(args.prompt);
    match args.message {
        Some(message) => {
            chat.send(&message).await?;
            println!("Session: {}", chat.session().id());
            Ok(())
        }
        None => chat.run().await,
    }
}

/// Session administration.
async fn cmd_sessions(args: SessionsArgs, config: &ScopeConfig) -> Result<()> {
    let store = SessionStore::new(config.session_config());

    match args.command {
        SessionCommands::List => {
            let sessions = store.list().await?;
            if sessions.is_empty() {
                println!("No sessions in {}", store.dir().display());
                return Ok(());
            }
            println!("{:<36}  {:<10}  {:>8}  {:>13}", "ID", "STATUS", "MESSAGES", "UPDATED (ms)");
            for summary in sessions {
                println!(
                    "{:<36}  {:<10}  {:>8}  {:>13}",
                    summary.id,
                    summary.status.to_string(),
                    summary.message_count,
                    summary.updated_at
                );
            }
        }
        SessionCommands::Show { id } => {
            let session = store.load_str(&id).await?;
            println!("Session {}", session.id());
            println!();
            for msg in session.messages() {
                println!("[{}] {}", msg.role, msg.content);
            }
            println!();
            print_session_state(&session, store.required_fields());
        }
        SessionCommands::Delete { id } => {
            if store.delete(parse_session_id(&id)?).await? {
                println!("Deleted session {id}");
            } else {
                println!("No session {id}");
            }
        }
        SessionCommands::Reset { id } => {
            let fresh = store.reset(parse_session_id(&id)?).await?;
            println!("Session {id} replaced by {}", fresh.id());
        }
    }

    Ok(())
}

/// Configuration inspection.
async fn cmd_config(args: ConfigArgs, config_file: &std::path::Path) -> Result<()> {
    match args.command {
        ConfigCommands::Path => println!("{}", config_file.display()),
        ConfigCommands::Show => {
            let config = load_config_from(config_file).await?;
            let rendered = serde_json::to_string_pretty(&config)
                .map_err(|e| ScopeError::config(e.to_string()))?;
            println!("{rendered}");
        }
    }
    Ok(())
}

/// Show status.
async fn cmd_status(config_file: &std::path::Path, sessions_dir: Option<PathBuf>) -> Result<()> {
    println!("dpscope status\n");

    println!("Configuration:");
    println!("  Path:   {}", config_file.display());
    println!(
        "  Exists: {}",
        if config_file.exists() { "yes" } else { "no" }
    );

    let config = match load(config_file, sessions_dir).await {
        Ok(config) => {
            println!("  Valid:  yes");
            config
        }
        Err(e) => {
            println!("  Valid:  no ({e})");
            return Ok(());
        }
    };

    let store = SessionStore::new(config.session_config());
    println!();
    println!("Sessions:");
    println!("  Directory: {}", store.dir().display());
    match store.list().await {
        Ok(sessions) => {
            let complete = sessions
                .iter()
                .filter(|s| s.status == SessionStatus::Complete)
                .count();
            println!("  Stored:    {} ({complete} complete)", sessions.len());
        }
        Err(e) => println!("  Stored:    unreadable ({e})"),
    }

    println!();
    println!("Agent:");
    println!("  Endpoint: {}", config.agent.base_url);
    println!("  Model:    {}", config.agent.model);
    print_env_status(&config.agent.api_key_env);

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
