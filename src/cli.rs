//! Headless CLI front end: `run`, `chat`, `config`, `doctor`, `init`.
//!
//! This binary wires together everything the library exposes — config
//! loading, the provider factory, the workspace sandbox, the event bus and
//! its four subscribers, and the turn engine — into something a terminal
//! user can drive directly.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use myclaw::agent::turn_engine::{run_turn, SYSTEM_PROMPT};
use myclaw::ai::providers::build_provider;
use myclaw::config::{loader, Config};
use myclaw::event_bus::{AgentEvent, EventBus};
use myclaw::security::{ApprovalCallback, AlwaysDeny};
use myclaw::session::{
    list_persisted_sessions_for_workspace, pick_session, resume, Session, SessionStore,
    SharedSession,
};
use myclaw::subscribers::{AsyncCheckSubscriber, MetricsSubscriber, SessionLogSubscriber, UserProfileSubscriber};
use myclaw::workspace::Workspace;

#[derive(Parser)]
#[command(name = "myclaw", about = "A sandboxed coding-agent runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single task to completion and print the final answer.
    Run { task: String },
    /// Start an interactive chat session.
    Chat {
        /// Resume a prior session: "latest", a 1-based index, or an id prefix.
        #[arg(long)]
        resume: Option<String>,
    },
    /// Print the effective configuration.
    Config,
    /// Exercise the pipeline end-to-end with the mock provider.
    Doctor,
    /// Create the home directory and a default config file.
    Init,
}

#[tokio::main]
async fn main() {
    let log_dir = Config::default().resolved_home_dir().join("logs");
    myclaw::logging::init(log_dir);

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run { task } => run_command(&task).await,
        Command::Chat { resume } => chat_command(resume).await,
        Command::Config => config_command(),
        Command::Doctor => doctor_command().await,
        Command::Init => init_command(),
    };
    std::process::exit(code);
}

/// Reads approval answers from stdin; used by `run` and `chat`, where a
/// human is actually present to answer.
struct TerminalApproval;

#[async_trait]
impl ApprovalCallback for TerminalApproval {
    async fn approve(&self, command: &str) -> bool {
        let command = command.to_string();
        tokio::task::spawn_blocking(move || {
            print!("approve destructive command `{command}`? [y/N] ");
            let _ = std::io::stdout().flush();
            let mut answer = String::new();
            if std::io::stdin().read_line(&mut answer).is_err() {
                return false;
            }
            matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
        })
        .await
        .unwrap_or(false)
    }
}

/// Everything a turn needs, built once per process invocation.
struct Runtime {
    config: Arc<Config>,
    workspace: Workspace,
    event_bus: EventBus,
    session_store: Arc<SessionStore>,
    session_log: Arc<SessionLogSubscriber>,
}

fn build_runtime(config: Config) -> Runtime {
    let config = Arc::new(config);
    let workspace_root = resolve_workspace_root(&config.workspace);
    let workspace = Workspace::new(workspace_root);

    let event_bus = EventBus::new();
    let session_store = Arc::new(SessionStore::new());

    let session_log = SessionLogSubscriber::new();
    session_log.attach(&event_bus);

    let metrics = MetricsSubscriber::new(config.metrics_dir());
    metrics.attach(&event_bus);

    let async_check = AsyncCheckSubscriber::new(config.clone(), session_store.clone());
    async_check.attach(&event_bus);

    let user_profile = UserProfileSubscriber::new(config.user_profile_path());
    user_profile.attach(&event_bus);

    Runtime { config, workspace, event_bus, session_store, session_log }
}

fn resolve_workspace_root(workspace: &str) -> PathBuf {
    std::fs::canonicalize(workspace).unwrap_or_else(|_| PathBuf::from(workspace))
}

async fn new_session(runtime: &Runtime) -> Result<Session, String> {
    let provider = build_provider(&runtime.config)?;
    let log_path = runtime.config.sessions_dir().join("pending.jsonl");
    let session = Session::new(
        runtime.workspace.root().to_path_buf(),
        log_path,
        provider,
        runtime.config.model.clone(),
        runtime.config.runtime.max_steps,
        runtime.config.runtime.context_window_size,
    );
    Ok(relocate_log_path(session, &runtime.config))
}

/// `Session::new` doesn't know its own id ahead of time, so the log path is
/// fixed up once the id is assigned.
fn relocate_log_path(mut session: Session, config: &Config) -> Session {
    session.log_path = config.sessions_dir().join(format!("{}.jsonl", session.id));
    session
}

fn publish_start(runtime: &Runtime, session: &Session) {
    runtime.event_bus.publish(AgentEvent::Start {
        session_id: session.id,
        workspace: session.workspace.to_string_lossy().into_owned(),
        log_path: session.log_path.to_string_lossy().into_owned(),
        model: session.model.clone(),
    });
    // The log records this right after `session_start`; a later resume
    // synthesizes the same message if the log predates this record.
    runtime.event_bus.publish(AgentEvent::Message {
        session_id: session.id,
        role: "system".to_string(),
        content: SYSTEM_PROMPT.to_string(),
        tool_call_id: None,
        tool_name: None,
        tool_calls: Vec::new(),
    });
}

async fn flush_all(runtime: &Runtime, session_id: Uuid) {
    runtime.session_log.flush(session_id).await;
    runtime.event_bus.publish(AgentEvent::SessionEnd { session_id });
}

/// Register `session` with the store and return the shared handle every
/// turn is driven through. Registering here (rather than letting the turn
/// loop own the `Session` directly) is what lets [`AsyncCheckSubscriber`]'s
/// background tasks reach back in and enqueue a `LINT_FAIL` interrupt onto
/// the same instance the next turn will read from.
fn register(runtime: &Runtime, session: Session) -> SharedSession {
    runtime.session_store.insert(session)
}

// ─── run ──────────────────────────────────────────────────────────────────

async fn run_command(task: &str) -> i32 {
    let config = loader::load_default_config();
    let runtime = build_runtime(config);

    let session = match new_session(&runtime).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("failed to build provider: {e}");
            return 1;
        }
    };
    let session_id = session.id;
    publish_start(&runtime, &session);
    let shared = register(&runtime, session);

    let result = {
        let mut guard = shared.lock().await;
        run_turn(&mut guard, task, &runtime.workspace, &runtime.event_bus, &TerminalApproval).await
    };
    flush_all(&runtime, session_id).await;

    match result {
        Ok(text) => {
            println!("{text}");
            0
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

// ─── chat ─────────────────────────────────────────────────────────────────

async fn chat_command(resume_selector: Option<String>) -> i32 {
    let config = loader::load_default_config();
    let runtime = build_runtime(config);

    let (session, resumed) = match resume_selector {
        Some(selector) => match load_resumed_session(&runtime, &selector) {
            Ok(s) => (s, true),
            Err(e) => {
                eprintln!("resume failed: {e}");
                return 1;
            }
        },
        None => match new_session(&runtime).await {
            Ok(s) => (s, false),
            Err(e) => {
                eprintln!("failed to build provider: {e}");
                return 1;
            }
        },
    };

    if resumed {
        runtime.event_bus.publish(AgentEvent::SessionResume {
            session_id: session.id,
            workspace: session.workspace.to_string_lossy().into_owned(),
            log_path: session.log_path.to_string_lossy().into_owned(),
            message_count: session.messages.len(),
        });
    } else {
        publish_start(&runtime, &session);
    }

    println!("myclaw chat — session {}. Type /help for commands.", session.id);
    let mut session_id = session.id;
    let mut shared = register(&runtime, session);

    let mut input = String::new();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        input.clear();
        if std::io::stdin().read_line(&mut input).unwrap_or(0) == 0 {
            break;
        }
        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            match handle_slash_command(command, &shared, &runtime).await {
                SlashOutcome::Continue => continue,
                SlashOutcome::Exit => break,
                SlashOutcome::Switch(new_shared) => {
                    runtime.session_store.delete(session_id);
                    session_id = new_shared.lock().await.id;
                    shared = new_shared;
                    continue;
                }
            }
        }

        let mut guard = shared.lock().await;
        match run_turn(&mut guard, line, &runtime.workspace, &runtime.event_bus, &TerminalApproval).await {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("error: {e}"),
        }
    }

    flush_all(&runtime, session_id).await;
    0
}

fn load_resumed_session(runtime: &Runtime, selector: &str) -> Result<Session, String> {
    let workspace_str = runtime.workspace.root().to_string_lossy().into_owned();
    let summaries = list_persisted_sessions_for_workspace(&runtime.config.sessions_dir(), &workspace_str)
        .map_err(|e| e.to_string())?;
    let chosen = pick_session(&summaries, selector)
        .ok_or_else(|| format!("no session matches selector '{selector}'"))?;
    let replayed = resume(&chosen.log_path).map_err(|e| e.to_string())?;

    let provider = build_provider(&runtime.config)?;
    let mut session = Session::new(
        PathBuf::from(&replayed.workspace),
        chosen.log_path.clone(),
        provider,
        replayed.model,
        runtime.config.runtime.max_steps,
        runtime.config.runtime.context_window_size,
    );
    session.id = replayed.session_id;
    session.messages = replayed.messages;
    session.summaries = replayed.summaries;
    session.system_message = replayed.system_message;
    Ok(session)
}

enum SlashOutcome {
    Continue,
    Exit,
    /// `/use` resolved to a different session; the chat loop should drive
    /// this handle from now on instead of the one it was driving before.
    Switch(SharedSession),
}

async fn handle_slash_command(
    command: &str,
    shared: &SharedSession,
    runtime: &Runtime,
) -> SlashOutcome {
    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or("");
    let arg = parts.next();

    match name {
        "help" => {
            println!(
                "/help /exit /quit /clear /history [n] /config /session /summary [n] /sessions [n] /use <id|index|latest>"
            );
        }
        "exit" | "quit" => return SlashOutcome::Exit,
        "clear" => {
            let mut session = shared.lock().await;
            session.messages.clear();
            session.summaries.clear();
            session.read_paths.clear();
            session.explored_signatures.clear();
            println!("conversation cleared");
        }
        "history" => {
            let session = shared.lock().await;
            let n: usize = arg.and_then(|a| a.parse().ok()).unwrap_or(20);
            for message in session.messages.iter().rev().take(n).collect::<Vec<_>>().into_iter().rev() {
                println!("{:?}: {}", message.role, message.content);
            }
        }
        "config" => print_config(&runtime.config),
        "session" => {
            let session = shared.lock().await;
            println!(
                "id={} workspace={} model={} messages={}",
                session.id,
                session.workspace.display(),
                session.model,
                session.messages.len()
            );
        }
        "summary" => {
            let session = shared.lock().await;
            let n: usize = arg.and_then(|a| a.parse().ok()).unwrap_or(5);
            for block in session.summaries.iter().rev().take(n).collect::<Vec<_>>().into_iter().rev() {
                println!("[{}..{}] {}", block.from, block.to, block.content);
            }
        }
        "sessions" => {
            let n: usize = arg.and_then(|a| a.parse().ok()).unwrap_or(10);
            let workspace_str = {
                let session = shared.lock().await;
                session.workspace.to_string_lossy().into_owned()
            };
            match list_persisted_sessions_for_workspace(&runtime.config.sessions_dir(), &workspace_str) {
                Ok(summaries) => {
                    for (i, s) in summaries.iter().take(n).enumerate() {
                        println!("{}. {} ({})", i + 1, s.session_id, s.started_at);
                    }
                }
                Err(e) => eprintln!("failed to list sessions: {e}"),
            }
        }
        "use" => {
            let Some(selector) = arg else {
                eprintln!("usage: /use <id|index|latest>");
                return SlashOutcome::Continue;
            };
            match load_resumed_session(runtime, selector) {
                Ok(resumed) => {
                    runtime.event_bus.publish(AgentEvent::SessionResume {
                        session_id: resumed.id,
                        workspace: resumed.workspace.to_string_lossy().into_owned(),
                        log_path: resumed.log_path.to_string_lossy().into_owned(),
                        message_count: resumed.messages.len(),
                    });
                    let id = resumed.id;
                    let new_shared = runtime.session_store.insert(resumed);
                    println!("switched to session {id}");
                    return SlashOutcome::Switch(new_shared);
                }
                Err(e) => eprintln!("failed to switch session: {e}"),
            }
        }
        other => eprintln!("unknown command: /{other}"),
    }
    SlashOutcome::Continue
}

// ─── config ───────────────────────────────────────────────────────────────

fn print_config(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}

fn config_command() -> i32 {
    let config = loader::load_default_config();
    print_config(&config);
    0
}

// ─── doctor ───────────────────────────────────────────────────────────────

async fn doctor_command() -> i32 {
    let mut config = loader::load_default_config();
    config.provider = myclaw::config::ProviderKind::Mock;
    let runtime = build_runtime(config);

    println!("checking workspace root: {}", runtime.workspace.root().display());
    let workspace_ok = runtime.workspace.exists(".").await.unwrap_or(false);
    println!("  {}", if workspace_ok { "ok" } else { "FAILED (not readable)" });

    println!("checking provider factory (mock)");
    let mut session = match new_session(&runtime).await {
        Ok(s) => s,
        Err(e) => {
            println!("  FAILED: {e}");
            return 1;
        }
    };
    publish_start(&runtime, &session);

    println!("running a scripted turn end-to-end");
    let result = run_turn(&mut session, "doctor check", &runtime.workspace, &runtime.event_bus, &AlwaysDeny).await;
    flush_all(&runtime, session.id).await;

    match result {
        Ok(text) => {
            println!("  ok: \"{text}\"");
            println!("all checks passed");
            0
        }
        Err(e) => {
            println!("  FAILED: {e}");
            1
        }
    }
}

// ─── init ─────────────────────────────────────────────────────────────────

fn init_command() -> i32 {
    let config = Config::default();
    let home = config.resolved_home_dir();

    for dir in [home.clone(), config.sessions_dir(), config.metrics_dir()] {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            eprintln!("failed to create {}: {e}", dir.display());
            return 1;
        }
    }

    let config_path = home.join("config.toml");
    if config_path.exists() {
        println!("config already exists at {}", config_path.display());
        return 0;
    }
    match loader::save_config(&config_path, &config) {
        Ok(()) => {
            println!("initialized {} with a default config.toml", home.display());
            0
        }
        Err(e) => {
            eprintln!("failed to write default config: {e}");
            1
        }
    }
}
