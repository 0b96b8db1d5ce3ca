//! Chat Session Client - Terminal front end
//!
//! Interactive and one-shot access to the streaming chat backend.

use anyhow::{Context, Result};
use chat_session_client::chat::{ChatClient, ChatClientError};
use chat_session_client::events::{ChatNotification, ErrorKind};
use chat_session_client::preferences::{ChatMode, PreferencesStore};
use chat_session_client::ClientConfig;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chat-client")]
#[command(about = "Terminal client for the streaming chat backend")]
struct Cli {
    /// YAML config file (defaults to ./config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Chat server base URL
    #[arg(long, env = "CHAT_SERVER_URL", global = true)]
    server: Option<String>,

    /// Model for this run (does not change the saved preference)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Seconds to wait for the connection to open
    #[arg(long, default_value = "10", global = true)]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,

    /// Send one message, print the reply and exit
    Send {
        /// Message text
        message: String,

        /// Files to upload and attach
        #[arg(short, long)]
        attach: Vec<PathBuf>,
    },

    /// Upload a file and print the server's record of it
    Upload {
        /// File to upload
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Logs go to stderr so they do not interleave with the transcript
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chat_session_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = ClientConfig::from_yaml_and_env(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.chat.server_url = server;
    }

    let mut prefs = PreferencesStore::load(&config.preferences_path);
    let model = cli
        .model
        .or_else(|| prefs.get().selected_model.clone())
        .unwrap_or_else(|| config.chat.default_model.clone());
    config.chat.default_model = model;

    let client = ChatClient::new(config.chat.clone()).context("Failed to create chat client")?;
    let connect_timeout = Duration::from_secs(cli.connect_timeout);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(&client, &mut prefs, connect_timeout).await,
        Commands::Send { message, attach } => {
            run_send(&client, &message, &attach, connect_timeout).await
        }
        Commands::Upload { path } => run_upload(&client, &path).await,
    }
}

async fn run_chat(
    client: &ChatClient,
    prefs: &mut PreferencesStore,
    connect_timeout: Duration,
) -> Result<()> {
    let show_tools = Arc::new(AtomicBool::new(prefs.get().mode == ChatMode::Agent));
    let printer = tokio::spawn(print_notifications(
        client.subscribe(),
        show_tools.clone(),
    ));

    client.connect().await;
    if client.wait_connected(connect_timeout).await.is_err() {
        eprintln!("[not connected yet; will keep retrying in the background]");
    }
    println!(
        "Session {} | model {} | /help for commands",
        client.session_id().await,
        client.active_model().await
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, arg) = match line.split_once(' ') {
            Some((c, a)) => (c, a.trim()),
            None => (line, ""),
        };

        match command {
            "/quit" | "/exit" => break,
            "/help" => print_help(),
            "/cancel" => {
                if let Err(e) = client.cancel_stream().await {
                    eprintln!("[cancel not sent: {}]", e);
                }
            }
            "/clear" => client.clear_messages().await,
            "/new" => {
                if let Err(e) = client.new_session().await {
                    eprintln!("[new session failed: {}]", e);
                }
            }
            "/model" if !arg.is_empty() => {
                client.set_model(arg).await;
                prefs.update(|p| p.selected_model = Some(arg.to_string()))?;
                println!("[model: {}]", arg);
            }
            "/model" => println!("[model: {}]", client.active_model().await),
            "/mode" => match arg.parse::<ChatMode>() {
                Ok(mode) => {
                    prefs.update(|p| p.mode = mode)?;
                    show_tools.store(mode == ChatMode::Agent, Ordering::Relaxed);
                    println!("[mode: {:?}]", mode);
                }
                Err(e) => eprintln!("[{}]", e),
            },
            "/attach" if !arg.is_empty() => {
                match client.upload_attachment(Path::new(arg)).await {
                    Ok(file) => println!("[attached {} ({} bytes)]", file.name, file.size),
                    Err(e) => eprintln!("[upload failed: {}]", e),
                }
            }
            "/history" => print_history(client).await,
            _ if command.starts_with('/') => eprintln!("[unknown command: {}]", command),
            _ => {
                // Attachments stay queued if the send is rejected
                let files = client.pending_attachments().await;
                match client.send_message(line, files).await {
                    Ok(_) => {
                        client.take_attachments().await;
                    }
                    Err(ChatClientError::NotConnected) => {
                        eprintln!("[not connected: message not sent]")
                    }
                    Err(e) => eprintln!("[send failed: {}]", e),
                }
            }
        }
    }

    client.disconnect().await;
    printer.abort();
    Ok(())
}

async fn run_send(
    client: &ChatClient,
    message: &str,
    attach: &[PathBuf],
    connect_timeout: Duration,
) -> Result<()> {
    client.connect().await;
    client
        .wait_connected(connect_timeout)
        .await
        .context("Could not connect to chat server")?;

    let mut files = Vec::with_capacity(attach.len());
    for path in attach {
        let file = client
            .upload_attachment(path)
            .await
            .with_context(|| format!("Failed to upload {}", path.display()))?;
        files.push(file);
    }
    client.take_attachments().await;

    let mut rx = client.subscribe();
    client.send_message(message, files).await?;

    let result = loop {
        match rx.recv().await {
            Ok(ChatNotification::TextAppended { delta, .. }) => {
                print!("{}", delta);
                std::io::stdout().flush().ok();
            }
            Ok(ChatNotification::StreamFinished { .. }) => {
                println!();
                break Ok(());
            }
            Ok(ChatNotification::Error {
                kind: ErrorKind::Server,
                message,
            }) => break Err(anyhow::anyhow!("server error: {}", message)),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => break Ok(()),
        }
    };

    client.disconnect().await;
    result
}

async fn run_upload(client: &ChatClient, path: &Path) -> Result<()> {
    let file = client.upload_attachment(path).await?;
    println!("{}", serde_json::to_string_pretty(&file)?);
    Ok(())
}

async fn print_notifications(
    mut rx: broadcast::Receiver<ChatNotification>,
    show_tools: Arc<AtomicBool>,
) {
    loop {
        let notification = match rx.recv().await {
            Ok(n) => n,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Printer lagged behind notifications");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match notification {
            ChatNotification::ConnectionChanged { state } => {
                eprintln!("[connection: {:?}]", state)
            }
            ChatNotification::SessionInitialized {
                conversation_id: Some(id),
                ..
            } => eprintln!("[conversation {}]", id),
            ChatNotification::SessionReset { session_id } => {
                println!("[new session {}]", session_id)
            }
            ChatNotification::ModelSwitched { display_name, .. } => {
                println!("--- Switched to {} ---", display_name)
            }
            ChatNotification::StreamStarted { model_name, .. } => {
                print!("\n{}> ", model_name.as_deref().unwrap_or("assistant"));
            }
            ChatNotification::TextAppended { delta, .. } => print!("{}", delta),
            ChatNotification::ToolStarted { name, .. } if show_tools.load(Ordering::Relaxed) => {
                println!("\n[tool {} running]", name)
            }
            ChatNotification::ToolFinished {
                tool_id, status, ..
            } if show_tools.load(Ordering::Relaxed) => {
                println!("[tool {} {:?}]", tool_id, status)
            }
            ChatNotification::StreamFinished { .. } => println!(),
            ChatNotification::StreamCancelled { .. } => println!("\n[cancelled]"),
            ChatNotification::TranscriptCleared => println!("[transcript cleared]"),
            ChatNotification::Error { kind, message } => {
                eprintln!("[{:?} error: {}]", kind, message)
            }
            _ => {}
        }
        std::io::stdout().flush().ok();
    }
}

async fn print_history(client: &ChatClient) {
    for message in client.messages().await {
        let marker = if message.is_streaming { "…" } else { "" };
        println!("{:?}: {}{}", message.role, message.content, marker);
        for tool in &message.tools {
            println!("    [{} {:?}]", tool.name, tool.status);
        }
    }
}

fn print_help() {
    println!(
        "Commands:
  /cancel           stop the current response
  /clear            clear the transcript
  /new              start a new session
  /model [id]       show or set the model
  /mode agent|chat  show tool activity (agent) or hide it (chat)
  /attach <path>    upload a file for the next message
  /history          print the transcript
  /quit             exit"
    );
}
