//! Slash-command parsing for the line-oriented front end.
//!
//! Anything that does not start with `/` is a chat message.

use anyhow::{Result, bail};
use hearth_engine::Feedback;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    List,
    /// 1-based position in the session list.
    Switch(usize),
    Delete(usize),
    Rename(String),
    Stop,
    Retry,
    /// Show the model, or select a new one.
    Model(Option<String>),
    Feedback(Feedback),
    /// 1-based clarification option of the last answer.
    Pick(usize),
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  /new               start a new conversation
  /list              list conversations
  /switch <n>        switch to conversation n
  /delete <n>        delete conversation n
  /rename <title>    rename the current conversation
  /stop              stop the streaming answer
  /retry             ask the last question again
  /model [name]      show or select the model
  /good, /bad        rate the last answer
  /pick <n>          answer with suggested option n
  /quit              exit";

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Option<Result<Command>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Ok(Command::Send(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    Some(parse_command(&name.to_ascii_lowercase(), arg))
}

fn parse_command(name: &str, arg: &str) -> Result<Command> {
    let command = match name {
        "new" => Command::New,
        "list" | "ls" => Command::List,
        "switch" | "s" => Command::Switch(position(arg)?),
        "delete" | "rm" => Command::Delete(position(arg)?),
        "rename" => Command::Rename(arg.to_string()),
        "stop" => Command::Stop,
        "retry" => Command::Retry,
        "model" => Command::Model((!arg.is_empty()).then(|| arg.to_string())),
        "good" | "+1" => Command::Feedback(Feedback::Positive),
        "bad" | "-1" => Command::Feedback(Feedback::Negative),
        "pick" => Command::Pick(position(arg)?),
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => bail!("unknown command /{other} (try /help)"),
    };
    Ok(command)
}

fn position(arg: &str) -> Result<usize> {
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => bail!("expected a number starting at 1, got {arg:?}"),
    }
}
