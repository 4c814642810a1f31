// crates/client/src/main.rs
//! `proposal-stream`: drive the streaming endpoints and the chat playground
//! from a terminal.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use proposal_stream_client::{
    ChatKind, ClientConfig, DisconnectReason, InboundEnvelope, LogNotifier,
    RefreshingAuthenticator, SessionCallbacks, SocketClient, StreamCallbacks, StreamClient,
    StreamError, StreamRequest, Tool,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "proposal-stream", version, about = "Streaming client for the proposal drafting backend")]
struct Cli {
    /// TOML config file. Env vars override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Call one NDJSON streaming endpoint and print the result. Ctrl-C cancels.
    Stream {
        /// Path relative to the API base, e.g. `proposals/42/generate`.
        endpoint: String,

        /// Send a GET instead of a POST.
        #[arg(long)]
        get: bool,

        /// JSON request body.
        #[arg(long)]
        data: Option<String>,

        /// Treat the stream as a batch and stop after this many results.
        #[arg(long)]
        expect: Option<usize>,
    },

    /// Interactive chat over the playground WebSocket.
    ///
    /// Commands: /cancel, /retry, /reconnect [thread], /quit
    Chat {
        #[arg(long)]
        user: String,

        /// Existing thread to resume. Empty starts a new one.
        #[arg(long, default_value = "")]
        thread: String,

        /// Send turns as deep research.
        #[arg(long)]
        research: bool,

        /// Enable the web search tool.
        #[arg(long)]
        web: bool,

        /// Context tags attached to every turn.
        #[arg(long = "context")]
        contexts: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Both reqwest and tungstenite pull in rustls; pin the provider.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    proposal_stream_observability::init_tracing("warn,proposal_stream_client=info")
        .context("init tracing")?;

    let cli = Cli::parse();
    let config = ClientConfig::load(cli.config.as_deref()).context("load config")?;

    match cli.command {
        Command::Stream {
            endpoint,
            get,
            data,
            expect,
        } => run_stream(config, endpoint, get, data, expect).await,
        Command::Chat {
            user,
            thread,
            research,
            web,
            contexts,
        } => {
            let kind = if research {
                ChatKind::DeepResearch
            } else {
                ChatKind::Chat
            };
            let tool = web.then_some(Tool::Web);
            run_chat(config, user, thread, kind, tool, contexts).await
        }
    }
}

async fn run_stream(
    config: ClientConfig,
    endpoint: String,
    get: bool,
    data: Option<String>,
    expect: Option<usize>,
) -> Result<()> {
    let http = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .build()
        .context("build HTTP client")?;
    let auth = RefreshingAuthenticator::from_config(&config, http.clone())?;
    let client = StreamClient::with_http_client(http, config, Arc::new(auth), Arc::new(LogNotifier));

    let cancel = CancellationToken::new();
    let request = if get {
        StreamRequest::get(endpoint).with_cancellation(cancel.clone())
    } else {
        let payload: Value = match data {
            Some(raw) => serde_json::from_str(&raw).context("--data is not valid JSON")?,
            None => Value::Object(Default::default()),
        };
        StreamRequest::post(endpoint, payload).with_cancellation(cancel.clone())
    };

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let callbacks = StreamCallbacks::new().on_processing(|message| eprintln!("… {message}"));

    let output = match expect {
        Some(expected) => client
            .stream_batch(request, expected, callbacks)
            .await
            .map(Value::Array),
        None => client.stream(request, callbacks).await,
    };

    match output {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(StreamError::Cancelled) => {
            eprintln!("cancelled");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_chat(
    config: ClientConfig,
    user: String,
    thread: String,
    kind: ChatKind,
    tool: Option<Tool>,
    contexts: Vec<String>,
) -> Result<()> {
    let current_thread = Arc::new(Mutex::new(thread.clone()));

    let seen_thread = current_thread.clone();
    let callbacks = SessionCallbacks::new(move |envelope| match envelope {
        InboundEnvelope::Start => {}
        InboundEnvelope::Chunk { content } => {
            print!("{content}");
            let _ = std::io::stdout().flush();
        }
        InboundEnvelope::Interrupted {
            accumulated_content,
            content,
        } => {
            if let Some(text) = content.or(accumulated_content) {
                println!("{text}");
            }
            println!("[interrupted]");
        }
        InboundEnvelope::ResearchInitiated { content } => {
            println!("[research started] {}", content.unwrap_or_default());
        }
        InboundEnvelope::WebhookResult { content } => {
            println!("{}", content.unwrap_or_default());
        }
        InboundEnvelope::Complete { thread_id } => {
            println!();
            if let Some(id) = thread_id.filter(|id| !id.is_empty()) {
                *seen_thread.lock().unwrap_or_else(|e| e.into_inner()) = id;
            }
        }
        InboundEnvelope::Unknown => {}
    })
    .on_connect(|| eprintln!("[connected]"))
    .on_disconnect(|reason: DisconnectReason| eprintln!("[{}]", reason.describe()))
    .on_error(|e| eprintln!("[error] {e}"));

    let mut client = SocketClient::new(config);
    client.initialize(user, thread, callbacks).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/quit" => break,
            "/cancel" => {
                client.cancel_ongoing_request().await;
            }
            "/retry" => client.retry_connection().await?,
            "/reconnect" => {
                let thread = Some(rest.trim().to_string()).filter(|t| !t.is_empty());
                if let Some(t) = &thread {
                    *current_thread.lock().unwrap_or_else(|e| e.into_inner()) = t.clone();
                }
                client.reconnect(thread).await?;
            }
            _ => {
                let thread_id = current_thread
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                if let Err(e) = client.send_message(&thread_id, line, kind, tool, &contexts) {
                    eprintln!("[error] {e}");
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
