use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context};
use chat_core::paths::sessions_dir;
use chat_core::{ChatSession, Config, MessageId};
use chat_engine::{ChatController, EngineConfig, SendHandle, SendOutcome};
use chat_llm::OpenRouterProvider;
use clap::{Parser, Subcommand};
use colored::Colorize;
use session_manager::{hydrate, FileSessionStorage, SessionPersister, SessionStore, StoreEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_USER: &str = "default";

#[derive(Parser)]
#[command(name = "chat-cli")]
#[command(about = "Chat with a language model from the terminal")]
#[command(version)]
struct Cli {
    /// Model to send to (overrides config)
    #[arg(long, env = "CHAT_MODEL")]
    model: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Ask for a single response instead of a stream
    #[arg(long)]
    no_stream: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive chat
    Chat {
        /// Continue the session with this slug
        #[arg(long)]
        session: Option<String>,
    },
    /// Send a single message
    Send {
        /// Message content
        message: String,
        /// Continue the session with this slug
        #[arg(long)]
        session: Option<String>,
    },
    /// List stored sessions
    List,
}

struct App {
    controller: ChatController,
    model: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();

    let mut config = Config::new();
    if let Some(model) = cli.model {
        config.model = model;
    }
    if cli.no_stream {
        config.stream = false;
    }
    let user_id = config.user_id.clone().unwrap_or_else(|| DEFAULT_USER.to_string());

    let store = Arc::new(SessionStore::new());
    let storage = Arc::new(FileSessionStorage::new(sessions_dir()));
    let loaded = hydrate(&store, storage.as_ref(), &user_id)
        .await
        .context("Failed to load stored sessions")?;
    tracing::debug!(sessions = loaded, "Sessions loaded");

    if let Commands::List = cli.command {
        list_sessions(&store);
        return Ok(());
    }

    let provider = OpenRouterProvider::from_config(&config)
        .context("Set OPENROUTER_API_KEY or api_key in the config file")?;
    let persister = SessionPersister::spawn(store.clone(), storage, user_id);
    let app = App {
        controller: ChatController::new(store, Arc::new(provider), EngineConfig::from(&config)),
        model: config.model.clone(),
    };

    let result = match cli.command {
        Commands::Chat { session } => run_interactive_chat(&app, session).await,
        Commands::Send { message, session } => send_once(&app, &message, session).await,
        Commands::List => Ok(()),
    };

    persister.shutdown().await;
    result
}

fn list_sessions(store: &SessionStore) {
    let sessions = store.list();
    if sessions.is_empty() {
        println!("{}", "No sessions yet".dimmed());
        return;
    }
    for session in sessions {
        println!(
            "{}  {}  {}",
            session.slug.cyan(),
            session.title.bold(),
            format!(
                "{} messages, {}",
                session.messages.len(),
                session.updated_at.format("%Y-%m-%d %H:%M")
            )
            .dimmed()
        );
    }
}

fn find_session(app: &App, slug: &str) -> anyhow::Result<Arc<ChatSession>> {
    match app.controller.store().get_by_slug(slug) {
        Some(session) => Ok(session),
        None => bail!("No session with slug {slug}"),
    }
}

/// Send `content`, creating a session when there is none yet.
async fn send_to(app: &App, session: &mut Option<Arc<ChatSession>>, content: &str) -> anyhow::Result<()> {
    let events = app.controller.store().subscribe();
    let handle = match session {
        Some(current) => app.controller.send(current.id, content, &app.model)?,
        None => {
            let (created, handle) = app.controller.start_chat(content, &app.model, None)?;
            println!("{}", format!("Session: {} ({})", created.title, created.slug).dimmed());
            *session = Some(created);
            handle
        }
    };

    println!("{}", "Assistant:".green().bold());
    match print_reply(app, handle, events).await? {
        SendOutcome::Completed { .. } => {}
        SendOutcome::Cancelled => println!("{}", "[cancelled]".yellow()),
        SendOutcome::Failed { error, .. } => println!("{}", format!("Error: {error}").red()),
    }
    Ok(())
}

async fn send_once(app: &App, message: &str, slug: Option<String>) -> anyhow::Result<()> {
    let mut session = slug.map(|s| find_session(app, &s)).transpose()?;
    send_to(app, &mut session, message).await
}

/// Print fragments as they land and the thinking stage until the first one.
/// Ctrl-C cancels the reply.
async fn print_reply(
    app: &App,
    handle: SendHandle,
    mut events: broadcast::Receiver<StoreEvent>,
) -> anyhow::Result<SendOutcome> {
    let session_id = handle.session_id;
    let message_id = handle.assistant_message_id;
    let mut thinking = handle.thinking();
    let mut stage = None;
    let mut printed = 0usize;

    let wait = handle.wait();
    tokio::pin!(wait);

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            _ = tokio::signal::ctrl_c() => {
                app.controller.cancel(session_id);
            }
            Ok(()) = thinking.changed() => {
                let active = thinking.borrow_and_update().active_step().map(|s| s.title.clone());
                if printed == 0 && active.is_some() && active != stage {
                    if let Some(title) = &active {
                        println!("{}", format!("  … {title}").dimmed());
                    }
                }
                stage = active;
            }
            event = events.recv() => match event {
                Ok(StoreEvent::MessageUpdated { message, .. }) if message.id == message_id => {
                    printed = print_new(&message.content, printed)?;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    printed = print_current(app, session_id, message_id, printed)?;
                }
                Err(RecvError::Closed) => {}
            }
        }
    };

    // Anything committed after the last event we handled.
    print_current(app, session_id, message_id, printed)?;
    println!();
    Ok(outcome)
}

fn print_current(
    app: &App,
    session_id: chat_core::SessionId,
    message_id: MessageId,
    printed: usize,
) -> anyhow::Result<usize> {
    match app.controller.store().message(session_id, message_id) {
        Some(message) => print_new(&message.content, printed),
        None => Ok(printed),
    }
}

fn print_new(content: &str, printed: usize) -> anyhow::Result<usize> {
    if let Some(tail) = content.get(printed..) {
        print!("{tail}");
        std::io::stdout().flush()?;
    }
    Ok(content.len().max(printed))
}

async fn run_interactive_chat(app: &App, slug: Option<String>) -> anyhow::Result<()> {
    let mut session = slug.map(|s| find_session(app, &s)).transpose()?;

    println!("{}", "Chat".cyan().bold());
    if let Some(current) = &session {
        println!("{}", format!("Session: {} ({})", current.title, current.slug).dimmed());
    }
    println!(
        "{}",
        "Commands: /rename <title>, /delete, /new, /list, /quit. Ctrl-C cancels a reply.".dimmed()
    );
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "You:".cyan().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let (command, rest) = input.split_once(' ').unwrap_or((input, ""));
        match command {
            "/quit" | "/exit" => break,
            "/new" => {
                session = None;
                println!("{}", "Next message starts a new session".dimmed());
            }
            "/list" => list_sessions(app.controller.store()),
            "/rename" => match &session {
                Some(current) => match app.controller.rename_chat(current.id, rest) {
                    Ok(renamed) => {
                        println!("{}", format!("Renamed to {}", renamed.title).green());
                        session = Some(renamed);
                    }
                    Err(e) => println!("{}", format!("Error: {e}").red()),
                },
                None => println!("{}", "No session yet".yellow()),
            },
            "/delete" => match session.take() {
                Some(current) => match app.controller.delete_chat(current.id) {
                    Ok(deleted) => println!("{}", format!("Deleted {}", deleted.slug).green()),
                    Err(e) => println!("{}", format!("Error: {e}").red()),
                },
                None => println!("{}", "No session yet".yellow()),
            },
            _ => {
                if let Err(e) = send_to(app, &mut session, input).await {
                    println!("{}", format!("Error: {e}").red());
                }
            }
        }
        println!();
    }

    println!("{}", "Goodbye!".cyan());
    Ok(())
}
