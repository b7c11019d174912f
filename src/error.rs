//! Error types for seatrelay.

use std::time::Duration;

/// Configuration-related errors. These are the only fatal conditions.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read key material at {path}: {source}")]
    KeyUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No usable key found in {path}: {reason}")]
    KeyInvalid { path: String, reason: String },
}

/// Cipher channel errors.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// Ciphertext too short, or checksum mismatch after decryption.
    #[error("validation error")]
    Validation,

    #[error("invalid symmetric key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("unsupported key encoding: {0}")]
    KeyFormat(String),

    #[error("decrypted content is not UTF-8")]
    Utf8,
}

/// Broker-level errors, on both sides of the wire.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Push, pull or result-wait window elapsed.
    #[error("subtask timeout after {0:?}")]
    Timeout(Duration),

    /// A result arrived for an id whose submitter already gave up.
    #[error("task vanished")]
    Vanished,

    #[error("no new tasks")]
    NoNewTasks,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server responded HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for DispatchError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Errors surfaced by `User` / `Course` collaborators to the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The worker reported the session is no longer valid.
    #[error("session expired")]
    SessionExpired,

    #[error("failed to login: {0}")]
    LoginRejected(String),

    #[error("invalid data from worker: {0:?}")]
    InvalidData(Vec<String>),

    /// Opaque message from the worker payload.
    #[error("{0}")]
    Domain(String),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Name registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handle name too long: {len} > {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("Handle exists: {0}")]
    Exists(String),

    #[error("Handle not found: {0}")]
    NotFound(String),
}

/// Task configuration storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Task {0} not found")]
    NotFound(i64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Task manager errors.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("task ID not found: {0}")]
    NotFound(i64),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
