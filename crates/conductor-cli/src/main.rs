//! conductor - run coding-agent turns from the terminal
//!
//! Streams the agent's reply, asks before file edits when the permission
//! mode requires it, and keeps the conversation in the data directory.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use conductor_core::paths;
use conductor_core::persistence::Role;
use conductor_core::{
    EventBus, FileStore, MessageStore, PermissionMode, SessionStore, Settings, TurnEvent,
    TurnOrchestrator, TurnOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Run coding-agent turns against a workspace")]
#[command(version)]
struct Cli {
    /// Directory holding settings.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Directory holding session data
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a message and stream the agent's reply
    Send(SendArgs),

    /// Print the stored messages of a session
    Show {
        /// Session ID
        session: String,
    },
}

#[derive(clap::Args)]
struct SendArgs {
    /// Workspace the agent works in
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Session to continue (a new one is created if omitted or unknown)
    #[arg(short, long)]
    session: Option<String>,

    /// Model override
    #[arg(long)]
    model: Option<String>,

    /// Permission mode override: default, plan, acceptEdits, bypassPermissions
    #[arg(long)]
    permission_mode: Option<PermissionMode>,

    /// Spend ceiling in USD
    #[arg(long)]
    max_budget: Option<String>,

    /// Path to the agent binary
    #[arg(long)]
    agent_path: Option<PathBuf>,

    /// Show thinking output
    #[arg(short, long)]
    verbose: bool,

    /// Message to send
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => paths::config_dir().map_err(anyhow::Error::msg)?,
    };
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => paths::data_dir().map_err(anyhow::Error::msg)?,
    };

    match cli.command {
        Command::Send(args) => send(args, &config_dir, &data_dir).await,
        Command::Show { session } => show(&session, &data_dir),
    }
}

async fn send(args: SendArgs, config_dir: &Path, data_dir: &Path) -> Result<()> {
    let mut settings = Settings::load(config_dir).context("failed to load settings")?;
    if let Some(model) = args.model {
        settings.model = model;
    }
    if let Some(mode) = args.permission_mode {
        settings.permission_mode = mode;
    }
    if let Some(ceiling) = args.max_budget {
        settings.spend_ceiling = Some(ceiling);
    }
    if let Some(path) = args.agent_path {
        settings.agent_path = Some(path);
    }

    let store = Arc::new(FileStore::open(data_dir).context("failed to open session store")?);

    let session_id = args
        .session
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    if store.session(&session_id)?.is_none() {
        let workspace = args
            .workspace
            .canonicalize()
            .with_context(|| format!("workspace not found: {}", args.workspace.display()))?;
        store.create_session(&session_id, &workspace)?;
        eprintln!("Session {}", session_id);
    }

    let bus = Arc::new(EventBus::new());
    let mut events = bus.subscribe();
    let orchestrator = TurnOrchestrator::new(store.clone(), Arc::new(settings), bus.clone());

    let mut completion = orchestrator.send(&session_id, &args.message).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut awaiting_answer = false;

    let outcome = loop {
        tokio::select! {
            biased;
            received = events.recv() => match received {
                Ok(event) => {
                    if let Some(event) = event.turn_event(&session_id) {
                        if render(event, args.verbose) {
                            awaiting_answer = true;
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => log::warn!("Missed {} events", missed),
                Err(RecvError::Closed) => break completion.await,
            },
            outcome = &mut completion => break outcome,
            line = stdin.next_line(), if awaiting_answer => {
                awaiting_answer = false;
                let approved = matches!(
                    line.ok().flatten().as_deref().map(str::trim),
                    Some("y") | Some("Y") | Some("yes")
                );
                if approved {
                    if let Err(err) = orchestrator.resume_current().await {
                        log::warn!("Cannot resume: {}", err);
                    }
                } else {
                    orchestrator.cancel_current().await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nCancelling...");
                orchestrator.cancel_current().await;
            },
        }
    };

    // Pick up the title, if one is being generated.
    orchestrator.wait_background().await;
    while let Ok(event) = events.try_recv() {
        if let Some(event) = event.turn_event(&session_id) {
            render(event, args.verbose);
        }
    }

    match outcome {
        TurnOutcome::Completed | TurnOutcome::Exited => Ok(()),
        TurnOutcome::Cancelled => bail!("turn cancelled"),
        TurnOutcome::Errored => bail!("turn failed"),
    }
}

/// Print one event. Returns true if it asks the user for permission.
fn render(event: TurnEvent, verbose: bool) -> bool {
    let mut stdout = std::io::stdout();
    match event {
        TurnEvent::TextDelta { text } => {
            print!("{}", text);
            let _ = stdout.flush();
        }
        TurnEvent::ThinkingDelta { text } => {
            if verbose {
                eprint!("{}", text);
            }
        }
        TurnEvent::ToolCall {
            name,
            display_target,
            ..
        } => {
            eprintln!("\n> {} {}", name, display_target.unwrap_or_default());
        }
        TurnEvent::PermissionRequired {
            name,
            display_target,
            ..
        } => {
            eprint!(
                "\nAllow {} on {}? [y/N] ",
                name,
                display_target.as_deref().unwrap_or("(unknown)")
            );
            let _ = std::io::stderr().flush();
            return true;
        }
        TurnEvent::ArtifactCreated { path, operation } => {
            eprintln!("  {:?}: {}", operation, path);
        }
        TurnEvent::TitleUpdated { title } => eprintln!("Title: {}", title),
        TurnEvent::Done { .. } => println!(),
        TurnEvent::Error { message } => eprintln!("\nerror: {}", message),
    }
    false
}

fn show(session_id: &str, data_dir: &Path) -> Result<()> {
    let store = FileStore::open(data_dir).context("failed to open session store")?;
    let Some(session) = store.session(session_id)? else {
        bail!("No session found with id '{}'", session_id);
    };

    println!(
        "{} ({})",
        session.title.as_deref().unwrap_or("Untitled"),
        session.workspace_path.display()
    );
    println!("Last active: {}\n", session.last_activity_at.format("%Y-%m-%d %H:%M"));

    for message in store.messages(session_id)? {
        let label = match message.role {
            Role::User => "you",
            Role::Assistant => "agent",
            Role::Tool => "tool",
        };
        println!("[{}] {}", label, message.content);
        for call in message.decoded_tool_calls() {
            println!("    > {}", call.name);
        }
        if let Some(tokens) = message.tokens {
            println!(
                "    ({} tokens, ${:.4})",
                tokens,
                message.cost_usd.unwrap_or_default()
            );
        }
        if message.is_streaming {
            println!("    (incomplete)");
        }
        println!();
    }

    let artifacts = store.artifacts(session_id)?;
    if !artifacts.is_empty() {
        println!("Files:");
        for artifact in artifacts {
            println!("  {:?} {}", artifact.operation, artifact.path);
        }
    }
    Ok(())
}
