//! Error kinds surfaced by the client.
//!
//! Each kind has its own propagation policy:
//! - `LoadError` replaces the log view on a primary load, and is only logged
//!   for a background prefetch.
//! - `StreamError` never reaches the user; the event channel reconnects.
//! - `ActionError` is shown as a blocking alert and leaves task state alone.

use thiserror::Error;

/// Failure while fetching a task page or a range of log lines
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP error! status: {status}{}", reason(.message))]
    Status { status: u16, message: String },

    #[error("{0}")]
    Rejected(String),

    #[error("no log data returned")]
    NoData,

    #[error("invalid line range {from}-{to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("malformed response: {0}")]
    Decode(String),
}

/// The server's explanation appended to a status line, when it sent one
fn reason(message: &str) -> String {
    match message.trim() {
        "" => String::new(),
        text => format!(" ({})", text),
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LoadError::Decode(err.to_string())
        } else {
            LoadError::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for LoadError {
    fn from(err: url::ParseError) -> Self {
        LoadError::Transport(format!("invalid URL: {}", err))
    }
}

/// Failure on the live event channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("event stream transport error: {0}")]
    Transport(String),

    #[error("event stream closed by server")]
    Closed,

    #[error("undecodable event: {0}")]
    Decode(String),
}

/// Failure of a user-initiated action (create, cancel, download)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP error! status: {status}{}", reason(.message))]
    Status { status: u16, message: String },

    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    Invalid(String),

    #[error("could not write file: {0}")]
    Io(String),
}

impl From<reqwest::Error> for ActionError {
    fn from(err: reqwest::Error) -> Self {
        ActionError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for ActionError {
    fn from(err: url::ParseError) -> Self {
        ActionError::Transport(format!("invalid URL: {}", err))
    }
}

impl From<std::io::Error> for ActionError {
    fn from(err: std::io::Error) -> Self {
        ActionError::Io(err.to_string())
    }
}
