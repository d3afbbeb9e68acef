//! Outbound message formatting
//!
//! Output is sent as plain text fenced as a code block. Anything larger than
//! the chat message limit is split into consecutive chunks, with the action
//! buttons moved to a trailing message of their own.

use serde::Serialize;

/// Named controls the presentation layer renders as buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Leave console mode
    Exit,
    /// Refresh the idle timer without running a command
    ExtendSession,
    /// Re-enter console mode after leaving it
    ResumeConsole,
    /// Back to the main menu
    MainMenu,
    /// Open the console for the registered server
    Console,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Exit => "Exit",
            Action::ExtendSession => "Extend session",
            Action::ResumeConsole => "Resume console",
            Action::MainMenu => "Main menu",
            Action::Console => "Console",
        }
    }
}

/// One chat message worth of text plus optional actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub text: String,
    pub actions: Vec<Action>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_actions(text: impl Into<String>, actions: &[Action]) -> Self {
        Self {
            text: text.into(),
            actions: actions.to_vec(),
        }
    }
}

/// Actions offered under command output in console mode
pub const CONSOLE_ACTIONS: &[Action] = &[Action::Exit, Action::ExtendSession];

const FENCE: &str = "```";
const NO_OUTPUT: &str = "(no output)";

pub fn fence(output: &str) -> String {
    let body = output.trim_end_matches('\n');
    let body = if body.trim().is_empty() { NO_OUTPUT } else { body };
    format!("{FENCE}\n{body}\n{FENCE}")
}

/// Split on character boundaries into chunks of at most `limit` characters
///
/// Concatenating the chunks gives back `text`; there are
/// `ceil(chars / limit)` of them. Empty text yields no chunks.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::with_capacity(text.len() / limit + 1);
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        if count == limit {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(ch);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Messages for one result: inline actions when it fits, otherwise chunks
/// followed by a separate actions message
pub fn render(text: &str, actions: &[Action], limit: usize) -> Vec<OutboundMessage> {
    if text.chars().count() <= limit {
        return vec![OutboundMessage::with_actions(text, actions)];
    }

    let mut messages: Vec<OutboundMessage> = split_message(text, limit)
        .into_iter()
        .map(OutboundMessage::text)
        .collect();
    if !actions.is_empty() {
        messages.push(OutboundMessage::with_actions("Choose an action:", actions));
    }
    messages
}
