use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Operator command, parsed once from the control text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    /// Effect name, matched against effect file names
    InsertEffect(String),
}

impl FromStr for Command {
    type Err = Error;

    /// Case-insensitive: text containing `start` starts, text containing
    /// `stop` stops, any other non-blank text names an effect.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(Error::InvalidCommand(text.to_string()));
        }
        Ok(if normalized.contains("start") {
            Command::Start
        } else if normalized.contains("stop") {
            Command::Stop
        } else {
            Command::InsertEffect(normalized)
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Start => f.write_str("start"),
            Command::Stop => f.write_str("stop"),
            Command::InsertEffect(name) => write!(f, "effect {}", name),
        }
    }
}
