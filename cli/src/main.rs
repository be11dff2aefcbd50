//! Hearth CLI - line-oriented front end for the conversation engine.
//!
//! # Event Loop
//!
//! A single-threaded runtime multiplexes two sources:
//!
//! 1. Lines from stdin, parsed into [`commands::Command`]s
//! 2. A frame tick that pumps stream events, commits buffered text, and
//!    echoes the foreground answer as it grows
//!
//! The engine is torn down explicitly on exit so in-flight answers are
//! sealed and saved before the process ends.

mod commands;
mod transcript;

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::{Write, stdout},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::{Command, HELP};
use hearth_engine::{
    ChatEngine, ConfigError, FileStore, HearthConfig, SessionId, hearth_providers::HttpTransport,
};
use transcript::Transcript;

fn init_tracing(data_dir: &Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file(data_dir);

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Without a log file, stay silent rather than interleave logs with answers.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file(data_dir: &Path) -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let candidates = [
        data_dir.join("hearth.log"),
        // Fallback for read-only homes.
        PathBuf::from(".hearth").join("hearth.log"),
    ];
    let mut warnings = Vec::new();

    for candidate in candidates {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => warnings.push(format!(
                "Failed to open log file {}: {e}",
                candidate.display()
            )),
        }
    }

    (None, warnings)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let (config, config_error) = match HearthConfig::load() {
        Ok(config) => (config.unwrap_or_default(), None),
        Err(e) => (HearthConfig::default(), Some(e)),
    };
    let data_dir = config
        .data_dir()
        .context("could not determine a data directory; set [app] data_dir")?;
    init_tracing(&data_dir);
    if let Some(e) = &config_error {
        report_config_error(e);
    }

    let transport = HttpTransport::new(&config.api_base_url(), config.api_token())
        .context("invalid backend URL")?;
    tracing::info!(base_url = %transport.base_url(), "Using assistant backend");

    // Frame commits skip fsync; teardown flushes them.
    let store = FileStore::new(data_dir.join("sessions")).without_sync();
    let mut engine = ChatEngine::new(Arc::new(transport), Box::new(store), config.engine_settings());

    println!("hearth - type a message, or /help");
    if let Some(session) = engine.active_session() {
        transcript::write_session(session, &mut stdout())?;
    }

    let result = run(&mut engine, config.frame_interval()).await;
    engine.teardown();
    result
}

fn report_config_error(e: &ConfigError) {
    eprintln!("Ignoring config at {}: {e}", e.path().display());
    tracing::warn!("Using default configuration: {e}");
}

async fn run(engine: &mut ChatEngine, frame_interval: Duration) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut frames = tokio::time::interval(frame_interval);
    frames.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut view = Transcript::default();
    let mut out = stdout();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if handle_line(engine, &mut view, &line, &mut out)? == Flow::Quit {
                    break;
                }
            }
            _ = frames.tick() => {
                engine.pump();
                engine.on_frame();
                view.render(engine, &mut out)?;
            }
        }
    }
    Ok(())
}

fn handle_line(
    engine: &mut ChatEngine,
    view: &mut Transcript,
    line: &str,
    out: &mut impl Write,
) -> Result<Flow> {
    let command = match commands::parse(line) {
        None => return Ok(Flow::Continue),
        Some(Ok(command)) => command,
        Some(Err(e)) => {
            writeln!(out, "{e}")?;
            return Ok(Flow::Continue);
        }
    };

    match command {
        Command::Send(text) => send(engine, view, &text, out)?,
        Command::New => {
            engine.new_session();
            view.unfollow();
            writeln!(out, "== new conversation ==")?;
        }
        Command::List => transcript::write_list(engine, out)?,
        Command::Switch(n) => match session_at(engine, n) {
            Some(id) => {
                engine.switch_to(&id);
                view.unfollow();
                if let Some(session) = engine.session(&id) {
                    transcript::write_session(session, out)?;
                    if let Some(index) = session.streaming_index() {
                        view.follow(id, index);
                    }
                }
            }
            None => writeln!(out, "no conversation {n}")?,
        },
        Command::Delete(n) => match session_at(engine, n) {
            Some(id) => {
                engine.delete_session(&id);
                writeln!(out, "deleted conversation {n}")?;
            }
            None => writeln!(out, "no conversation {n}")?,
        },
        Command::Rename(title) => match engine.active_id().cloned() {
            Some(id) => {
                engine.rename_session(&id, &title);
                if let Some(session) = engine.session(&id) {
                    writeln!(out, "renamed to {}", session.title)?;
                }
            }
            None => writeln!(out, "no active conversation")?,
        },
        Command::Stop => {
            let stopped = match engine.active_id().cloned() {
                Some(id) if engine.is_streaming(&id) => engine.stop(&id),
                _ => engine.stop_owner(),
            };
            if !stopped {
                writeln!(out, "nothing is streaming")?;
            }
        }
        Command::Retry => match engine.active_id().cloned() {
            Some(id) => match engine.retry(&id) {
                Ok(id) => follow_streaming(engine, view, id, out)?,
                Err(e) => writeln!(out, "{e}")?,
            },
            None => writeln!(out, "no active conversation")?,
        },
        Command::Model(None) => writeln!(out, "model: {}", engine.selected_model())?,
        Command::Model(Some(model)) => {
            engine.set_model(&model);
            writeln!(out, "model set to {model}")?;
        }
        Command::Feedback(feedback) => {
            let target = engine.active_session().and_then(|s| {
                s.last_assistant_index().map(|index| (s.id.clone(), index))
            });
            match target {
                Some((id, index)) => match engine.submit_feedback(&id, index, feedback) {
                    Ok(()) => writeln!(out, "thanks for the feedback")?,
                    Err(e) => writeln!(out, "{e}")?,
                },
                None => writeln!(out, "no answer to rate yet")?,
            }
        }
        Command::Pick(n) => {
            let value = engine
                .active_session()
                .and_then(|s| s.last_assistant_index().map(|i| &s.messages[i]))
                .and_then(|m| m.clarification())
                .and_then(|options| options.get(n - 1))
                .map(|option| option.value.clone());
            match value {
                Some(value) => {
                    writeln!(out, "you> {value}")?;
                    send(engine, view, &value, out)?;
                }
                None => writeln!(out, "no option {n}")?,
            }
        }
        Command::Help => writeln!(out, "{HELP}")?,
        Command::Quit => return Ok(Flow::Quit),
    }
    out.flush()?;
    Ok(Flow::Continue)
}

fn send(
    engine: &mut ChatEngine,
    view: &mut Transcript,
    text: &str,
    out: &mut impl Write,
) -> Result<()> {
    match engine.send(text) {
        Ok(id) => follow_streaming(engine, view, id, out)?,
        Err(e) => writeln!(out, "{e}")?,
    }
    Ok(())
}

fn follow_streaming(
    engine: &ChatEngine,
    view: &mut Transcript,
    id: SessionId,
    out: &mut impl Write,
) -> Result<()> {
    if let Some(index) = engine.session(&id).and_then(|s| s.streaming_index()) {
        view.follow(id, index);
        write!(out, "hearth> ")?;
    }
    Ok(())
}

fn session_at(engine: &ChatEngine, n: usize) -> Option<SessionId> {
    engine.sessions().get(n - 1).map(|s| s.id.clone())
}
