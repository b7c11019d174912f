//! Wire types exchanged between broker and satellites.

use serde::{Deserialize, Serialize};

use crate::config::split_list;

/// First-payload-string sentinels understood by the core.
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";
pub const STATUS_FULL: &str = "full";
pub const STATUS_SESSION_EXPIRED: &str = "session expired";

/// Kind of brokered work. Travels as an integer: login 0, list 1, elect 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SubtaskKind {
    Login,
    List,
    Elect,
}

impl From<SubtaskKind> for u8 {
    fn from(kind: SubtaskKind) -> Self {
        match kind {
            SubtaskKind::Login => 0,
            SubtaskKind::List => 1,
            SubtaskKind::Elect => 2,
        }
    }
}

impl TryFrom<u8> for SubtaskKind {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Login),
            1 => Ok(Self::List),
            2 => Ok(Self::Elect),
            other => Err(format!("unknown subtask type {other}")),
        }
    }
}

impl std::fmt::Display for SubtaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Login => "login",
            Self::List => "list",
            Self::Elect => "elect",
        };
        write!(f, "{s}")
    }
}

/// One unit of brokered work addressed to a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    /// Assigned by the dispatcher on submission; leave at zero.
    #[serde(default)]
    pub id: u64,
    pub handler: String,
    #[serde(rename = "type")]
    pub kind: SubtaskKind,
    pub data: Vec<String>,
}

impl Subtask {
    pub fn new(handler: impl Into<String>, kind: SubtaskKind, data: Vec<String>) -> Self {
        Self {
            id: 0,
            handler: handler.into(),
            kind,
            data,
        }
    }
}

/// Positional string payload returned by a worker.
///
/// The first string is a status sentinel; the rest is a private convention
/// between a handler and its worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskResult {
    pub data: Vec<String>,
}

impl SubtaskResult {
    pub fn new(data: Vec<String>) -> Self {
        Self { data }
    }

    /// The leading status sentinel, if any.
    pub fn status(&self) -> Option<&str> {
        self.data.first().map(String::as_str)
    }
}

/// Satellite → broker: ask for work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Comma-joined handler names the satellite can run.
    pub accepts: String,
    /// Base64 RSA-sealed symmetric key.
    pub cipher: String,
}

impl TaskRequest {
    pub fn accepted_handlers(&self) -> Vec<String> {
        split_list(&self.accepts)
    }
}

/// Broker → satellite: work, or nothing available right now.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResponse {
    pub ok: bool,
    /// Base64 encrypted `Subtask`; present only when `ok`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
}

impl TaskResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_content(content: String) -> Self {
        Self { ok: true, content }
    }
}

/// Satellite → broker: an encrypted `SubtaskResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkResponse {
    pub content: String,
    pub task_id: u64,
}
