//! Client-visible protocol text.
//!
//! Every line the server writes to a client, apart from command replies,
//! is built here so the wording lives in one place.

/// Sent on connect, before the display name is read.
pub const NAME_PROMPT: &str = "Enter your username:";

/// Display name used when the client supplies an empty or blank one.
pub const PLACEHOLDER_NAME: &str = "Anonymous";

/// Reserved line that ends a session, compared case-insensitively.
pub const QUIT_TOKEN: &str = "QUIT";

/// Leading character that marks a line as a command.
pub const COMMAND_MARKER: char = '/';

/// Sent instead of the prompt when the server is at capacity.
pub const SERVER_FULL: &str = "Server is full, try again later.";

/// Returns true if `line` is the quit token.
pub fn is_quit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case(QUIT_TOKEN)
}

/// Returns true if `line` should be handed to the command interpreter.
pub fn is_command(line: &str) -> bool {
    line.starts_with(COMMAND_MARKER)
}

/// Maps the raw handshake line to a display name.
pub fn display_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        PLACEHOLDER_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn welcome(name: &str) -> String {
    format!("Welcome to the chat, {name}!")
}

pub fn usage_hint() -> String {
    format!("Type '{QUIT_TOKEN}' to leave the chat")
}

pub fn joined(name: &str) -> String {
    format!("{name} joined the chat")
}

pub fn left(name: &str) -> String {
    format!("{name} left the chat")
}

pub fn chat_line(name: &str, text: &str) -> String {
    format!("[{name}]: {text}")
}
