mod artifact;
mod binder;
mod client;
mod error;
mod playback;
mod poller;
mod session;
mod settings;
mod state;

use binder::MessageBinder;
use clap::Parser;
use client::ApiClient;
use error::SessionError;
use playback::{CommandPlayer, PlaybackTrigger, Player};
use poller::Poller;
use session::{ChatSession, SessionConfig};
use settings::Settings;
use state::{AppEvent, AudioStatus, ChatMessage, MessageLog, Role};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};

#[derive(Debug, Parser)]
#[command(name = "wednesday-chat", version, about = "Terminal chat client with speech playback")]
struct Cli {
    /// Assistant service address, e.g. http://localhost:8000
    #[arg(long)]
    api_url: Option<String>,
    /// LLM model name sent with every chat request.
    #[arg(long)]
    model: Option<String>,
    /// Do not play speech automatically in this run.
    #[arg(long)]
    no_autoplay: bool,
    /// Settings file to use instead of the per-user one.
    #[arg(long)]
    settings: Option<PathBuf>,
}

enum Command {
    Quit,
    Handled,
    Chat(String),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let settings_path = match cli.settings.clone() {
        Some(path) => Some(path),
        None => match settings::settings_path() {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("[wednesday] {}; using default settings", e);
                None
            }
        },
    };
    let mut settings = settings_path
        .as_deref()
        .map(settings::load_from)
        .unwrap_or_default();
    if let Some(url) = cli.api_url {
        settings.api_url = url;
    }
    if let Some(model) = cli.model {
        settings.llm_model = model;
    }

    let client = match ApiClient::new(
        &settings.api_url,
        settings.chat_timeout(),
        settings.status_timeout(),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("[wednesday] {}", e);
            std::process::exit(2);
        }
    };

    let player = if settings.player_command.trim().is_empty() {
        CommandPlayer::platform_default()
    } else {
        CommandPlayer::from_command_line(&settings.player_command)
    };
    if let Some(p) = &player {
        log::info!("[wednesday] audio player: {}", p.command_line());
    }
    let playback = PlaybackTrigger::new(
        client.base().clone(),
        player.map(|p| Arc::new(p) as Arc<dyn Player>),
    );

    let runtime = Arc::new(
        tokio::runtime::Runtime::new().expect("Failed to create tokio runtime"),
    );
    let (event_tx, event_rx) = mpsc::channel::<AppEvent>();
    let auto_play = Arc::new(AtomicBool::new(
        settings.auto_play_audio && !cli.no_autoplay,
    ));
    let message_log = Arc::new(Mutex::new(MessageLog::new()));

    let binder = Arc::new(MessageBinder::new(
        message_log.clone(),
        event_tx.clone(),
        playback,
        auto_play.clone(),
        settings.playback_delay(),
    ));
    let poller = Arc::new(Poller::new(client.clone(), settings.poll_policy()));
    let session = Arc::new(ChatSession::new(
        message_log,
        client,
        poller,
        binder,
        event_tx.clone(),
        SessionConfig {
            model: settings.llm_model.clone(),
            output_path: settings.output_path.clone(),
            ..SessionConfig::default()
        },
    ));

    spawn_stdin_reader(event_tx);
    println!(
        "[wednesday] connected to {} (model {}), /help for commands",
        settings.api_url, settings.llm_model
    );

    for event in event_rx.iter() {
        match event {
            AppEvent::Input(line) => {
                match handle_command(&line, &session, &auto_play, &mut settings, settings_path.as_deref()) {
                    Command::Quit => break,
                    Command::Handled => {}
                    Command::Chat(text) if session.is_busy() => {
                        println!("[wednesday] still waiting for the previous reply, dropped: {}", text);
                    }
                    Command::Chat(text) => {
                        let session = session.clone();
                        runtime.spawn(async move {
                            match session.send(&text).await {
                                Ok(_) | Err(SessionError::EmptyInput) | Err(SessionError::Chat(_)) => {}
                                Err(SessionError::Busy) => {
                                    println!("[wednesday] still waiting for the previous reply");
                                }
                            }
                        });
                    }
                }
            }
            AppEvent::InputClosed => break,
            AppEvent::MessageAppended(message) => {
                if message.role == Role::Assistant {
                    println!("{}", format_message(&message));
                }
            }
            AppEvent::AudioStatusChanged {
                message_id,
                status,
                artifact,
            } => {
                let name = artifact.as_ref().map(|a| a.filename()).unwrap_or("");
                println!("  ♪ #{} {} {}", message_id, status.label(), name);
            }
            AppEvent::ChatFailed(reason) => {
                eprintln!("[wednesday] chat failed: {}", reason);
            }
        }
    }

    let pending = session.live_polls();
    if pending > 0 {
        println!("[wednesday] dropping {} pending speech job(s)", pending);
    }
    session.shutdown();
    println!("[wednesday] bye");
}

fn spawn_stdin_reader(tx: Sender<AppEvent>) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(AppEvent::Input(line)).is_err() {
                return;
            }
        }
        let _ = tx.send(AppEvent::InputClosed);
    });
}

fn handle_command(
    line: &str,
    session: &ChatSession,
    auto_play: &AtomicBool,
    settings: &mut Settings,
    settings_path: Option<&std::path::Path>,
) -> Command {
    let line = line.trim();
    if !line.starts_with('/') {
        return Command::Chat(line.to_string());
    }
    let mut parts = line.split_whitespace();
    let cmd = parts.next().unwrap_or("");
    let arg = parts.next();
    match (cmd, arg) {
        ("/quit" | "/exit", _) => Command::Quit,
        ("/history", _) => {
            for message in session.messages() {
                println!("{}", format_message(&message));
            }
            Command::Handled
        }
        ("/play", Some(id)) => {
            match id.trim_start_matches('#').parse::<u64>() {
                Ok(id) => {
                    if let Err(e) = session.replay(id) {
                        println!("[wednesday] {}", e);
                    }
                }
                Err(_) => println!("[wednesday] usage: /play <message id>"),
            }
            Command::Handled
        }
        ("/autoplay", Some(value @ ("on" | "off"))) => {
            let enabled = value == "on";
            auto_play.store(enabled, Ordering::SeqCst);
            settings.auto_play_audio = enabled;
            if let Some(path) = settings_path {
                if let Err(e) = settings::save_to(path, settings) {
                    log::error!("[wednesday] failed to save settings: {}", e);
                }
            }
            println!("[wednesday] auto-play {}", value);
            Command::Handled
        }
        _ => {
            println!("commands: /history, /play <id>, /autoplay on|off, /quit");
            Command::Handled
        }
    }
}

fn format_message(message: &ChatMessage) -> String {
    let mut line = format!(
        "[{}] #{} {}: {}",
        message.created_at.format("%H:%M"),
        message.id,
        message.role.label(),
        message.text
    );
    if message.audio_status != AudioStatus::None {
        line.push_str(&format!("  ({})", message.audio_status.label()));
    }
    line
}
