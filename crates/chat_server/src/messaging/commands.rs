//! Slash-command interpretation.
//!
//! Commands are answered to the issuing session only and never touch the
//! registry or the broadcaster; the caller passes in the user count.

use crate::protocol::{COMMAND_MARKER, QUIT_TOKEN};
use chrono::{DateTime, Local};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Users,
    Time,
    /// Any other word after the marker, lower-cased
    Unknown(String),
}

impl Command {
    /// Parses a command line. Returns `None` if the line does not start
    /// with the command marker. Only the first word counts; anything after
    /// it is ignored.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix(COMMAND_MARKER)?;
        let word = rest.split_whitespace().next().unwrap_or("").to_lowercase();

        Some(match word.as_str() {
            "help" => Command::Help,
            "users" => Command::Users,
            "time" => Command::Time,
            _ => Command::Unknown(word),
        })
    }

    /// Renders the reply for this command.
    pub fn reply(&self, user_count: usize, now: DateTime<Local>) -> String {
        match self {
            Command::Help => help_text(),
            Command::Users => format!("Connected users: {user_count}"),
            Command::Time => format!("Server time: {}", now.format("%Y-%m-%d %H:%M:%S %:z")),
            Command::Unknown(_) => {
                format!("Unknown command. Type {COMMAND_MARKER}help for available commands.")
            }
        }
    }
}

fn help_text() -> String {
    [
        "Available commands:".to_string(),
        format!("{COMMAND_MARKER}help - Show this help message"),
        format!("{COMMAND_MARKER}users - Show connected users count"),
        format!("{COMMAND_MARKER}time - Show current server time"),
        format!("{QUIT_TOKEN} - Leave the chat"),
    ]
    .join("\n")
}

/// Answers a command line using the current local time.
///
/// A line without the marker is answered like an unknown command.
pub fn interpret(line: &str, user_count: usize) -> String {
    Command::parse(line)
        .unwrap_or_else(|| Command::Unknown(String::new()))
        .reply(user_count, Local::now())
}
