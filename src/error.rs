use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("cannot read image folder {}: {source}", .path.display())]
    FolderRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read log file {}: {source}", .path.display())]
    LogRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot save {}: {}", .path.display(), persist_hint(.source))]
    Persist {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("cannot load {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("unknown image: {0}")]
    UnknownImage(String),

    #[error("False NoRead can only be set on a 'read failure' image ({image} is '{label}')")]
    FalseNoReadNotAllowed { image: String, label: &'static str },

    #[error("invalid log pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid config {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Turns a write failure into something the operator can act on.
fn persist_hint(err: &csv::Error) -> String {
    match err.kind() {
        csv::ErrorKind::Io(io_err) if io_err.kind() == io::ErrorKind::PermissionDenied => format!(
            "the file is locked or read-only, close any program using it (e.g. a spreadsheet) and retry ({io_err})"
        ),
        _ => err.to_string(),
    }
}
