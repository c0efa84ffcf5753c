use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// The git binary could not be started at all
    Spawn {
        operation: String,
        source: std::io::Error,
    },
    /// git ran but exited with a status the caller does not accept
    Exit {
        operation: String,
        code: Option<i32>,
    },
    /// git succeeded but printed something we cannot interpret
    Output {
        operation: String,
        message: String,
    },
    Persisted(String),
    InvalidSharePath(String),
    AlreadyShared(String),
    /// Nothing is shared at this group or path
    UnknownCasefile(String),
    /// An action needs a setting (remote, share path) that has not been chosen
    NotSelected(&'static str),
    Locked {
        requested: String,
        in_flight: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Json(e) => write!(f, "JSON error: {}", e),
            Error::Spawn { operation, .. } => {
                write!(f, "Unable to run git while trying to {}", operation)
            }
            Error::Exit { operation, code } => match code {
                Some(code) => write!(f, "Unable to {} (git exited with code {})", operation, code),
                None => write!(f, "Unable to {} (git terminated by signal)", operation),
            },
            Error::Output { operation, message } => {
                write!(f, "Unexpected git output while trying to {}: {}", operation, message)
            }
            Error::Persisted(msg) => write!(f, "Invalid casefile data: {}", msg),
            Error::InvalidSharePath(path) => write!(f, "Invalid share path: {}", path),
            Error::AlreadyShared(path) => {
                write!(f, "Current casefile contents already shared in {}", path)
            }
            Error::UnknownCasefile(path) => write!(f, "No shared casefile at {}", path),
            Error::NotSelected(what) => write!(f, "No {} selected", what),
            Error::Locked {
                requested,
                in_flight,
            } => write!(
                f,
                "{} not possible while waiting for {}",
                requested, in_flight
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
