//! Terminal chat client over the completions channel.
//!
//! Reads prompts from stdin and streams responses to stdout. Logs go to
//! stderr. Lines starting with `/` are commands: `/cancel`, `/history`,
//! `/quit`.

use std::io::Write as _;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use streamchat::config::{COMPLETIONS_PATH, DEFAULT_BASE_URL, DEFAULT_PING_MS, DEFAULT_RECONNECT_MS};
use streamchat::{
    ChannelConfig, ConfigError, ConnectionState, ErrorListener, Hub, Role, Session, SessionError, SessionObserver,
    Transcript, TranscriptView, TransportError,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("stdin read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "streamchat", about = "Chat with a streaming completions server")]
struct Cli {
    #[arg(long, env = "STREAMCHAT_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    #[arg(long, env = "STREAMCHAT_PATH", default_value = COMPLETIONS_PATH)]
    path: String,

    /// Delay before reconnecting after a lost connection.
    #[arg(long, env = "STREAMCHAT_RECONNECT_MS", default_value_t = DEFAULT_RECONNECT_MS)]
    reconnect_ms: u64,

    /// Delay between a pong and the next ping.
    #[arg(long, env = "STREAMCHAT_PING_MS", default_value_t = DEFAULT_PING_MS)]
    ping_ms: u64,
}

impl Cli {
    fn channel_config(&self) -> Result<ChannelConfig, ConfigError> {
        Ok(ChannelConfig::resolve(&self.base_url, &self.path)?
            .with_reconnect_interval(Duration::from_millis(self.reconnect_ms))
            .with_ping_interval(Duration::from_millis(self.ping_ms)))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Prompt(&'a str),
    Cancel,
    History,
    Quit,
    Unknown(&'a str),
    Blank,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    match line {
        "" => Input::Blank,
        "/cancel" => Input::Cancel,
        "/history" => Input::History,
        "/quit" | "/exit" => Input::Quit,
        _ if line.starts_with('/') => Input::Unknown(line),
        _ => Input::Prompt(line),
    }
}

// =============================================================================
// CONSOLE OBSERVER
// =============================================================================

/// Prints the stream as it arrives and keeps the transcript.
struct Console {
    transcript: Transcript,
}

impl Console {
    fn print(text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

impl SessionObserver for Console {
    fn on_queued(&self) {
        self.transcript.on_queued();
        Self::print("[queued]\n");
    }

    fn on_started(&self) {
        self.transcript.on_started();
    }

    fn on_token(&self, fragment: &str) {
        self.transcript.on_token(fragment);
        Self::print(fragment);
    }

    fn on_ended(&self, final_text: &str) {
        self.transcript.on_ended(final_text);
        Self::print("\n");
    }

    fn on_error(&self, message: &str) {
        self.transcript.on_error(message);
        eprintln!("\nerror: {message}");
    }

    fn on_aborted(&self, reason: &str) {
        self.transcript.on_aborted(reason);
        eprintln!("\nerror: {reason}");
    }
}

fn print_history(view: &TranscriptView) {
    for message in &view.messages {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
            Role::Error => "error",
        };
        println!("#{} {who}: {}", message.id, message.text);
    }
    if !view.current.is_empty() {
        println!("... {}", view.current);
    }
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("streamchat: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = cli.channel_config()?;
    tracing::info!(endpoint = %config.endpoint, "streamchat starting");

    let hub = Hub::connect(&config);
    let console = Arc::new(Console { transcript: Transcript::new() });
    let session = Session::attach(&hub, console.clone());

    let on_error: ErrorListener = Arc::new(|error: &TransportError| {
        eprintln!("connection: {error}");
    });
    hub.add_error_listener(&on_error);

    let mut states = hub.watch_state();
    let watched = Arc::clone(&console);
    tokio::spawn(async move {
        loop {
            let state = *states.borrow_and_update();
            watched.transcript.set_connected(state == ConnectionState::Open);
            tracing::debug!(%state, "connection state changed");
            if states.changed().await.is_err() {
                break;
            }
        }
    });

    hub.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match parse_input(&line) {
            Input::Blank => {}
            Input::Quit => break,
            Input::Cancel => {
                session.cancel();
                console.transcript.discard_current();
                Console::print("[cancelled]\n");
            }
            Input::History => print_history(&console.transcript.snapshot()),
            Input::Unknown(command) => eprintln!("unknown command {command}; try /cancel, /history or /quit"),
            Input::Prompt(text) => {
                if !console.transcript.snapshot().input_enabled {
                    eprintln!("not connected yet, try again shortly");
                    continue;
                }
                match session.request(text) {
                    Ok(()) => {
                        console.transcript.push_user(text);
                    }
                    Err(SessionError::Busy(_)) => eprintln!("still answering; /cancel to stop it"),
                    Err(e) => eprintln!("{e}"),
                }
            }
        }
    }

    hub.remove_error_listener(&on_error);
    drop(session);
    hub.stop();
    tracing::info!("streamchat stopped");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
