use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by the host surface and the activation shim.
///
/// Nothing here is recovered from locally; callers propagate these to
/// whatever reports errors to the user.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no active text editor")]
    NoActiveEditor,
    #[error("command '{0}' already exists")]
    CommandAlreadyRegistered(String),
    #[error("command '{0}' not found")]
    UnknownCommand(String),
    #[error("language client is not running")]
    ClientNotRunning,
    #[error("invalid file watch pattern '{pattern}'")]
    InvalidWatchPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("cannot express '{}' as a file URI", .0.display())]
    InvalidDocumentPath(PathBuf),
    #[error("path '{}' is not valid UTF-8", .0.display())]
    NonUtf8Path(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Client(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
