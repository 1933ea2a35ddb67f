use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used when rendering results and deciding recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    SecurityViolation,
    CryptoFailure,
    IoFailure,
    ProtocolFailure,
}

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("No such file or directory: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Cannot encrypt/decrypt system file: {}", .0.display())]
    SecurityViolation(PathBuf),

    /// Padding check failed on finalize: wrong password or corrupted data.
    #[error("Invalid password or file is corrupted: {}", .0.display())]
    CryptoFailure(PathBuf),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not create output file {}: {source}", .path.display())]
    OutputUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("service unreachable: {0}")]
    Protocol(String),

    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl WardenError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WardenError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WardenError::NotFound(_) => ErrorKind::NotFound,
            WardenError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            WardenError::SecurityViolation(_) => ErrorKind::SecurityViolation,
            WardenError::CryptoFailure(_) => ErrorKind::CryptoFailure,
            WardenError::Io { .. } | WardenError::OutputUnavailable { .. } => ErrorKind::IoFailure,
            WardenError::Protocol(_) | WardenError::Serialisation(_) => ErrorKind::ProtocolFailure,
        }
    }

    /// Conditions that terminate the process instead of producing a result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WardenError::OutputUnavailable { .. })
    }
}

pub type Result<T, E = WardenError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_output_creation_is_fatal() {
        let err = WardenError::OutputUnavailable {
            path: PathBuf::from("/nope/out.bin"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.is_fatal());
        assert_eq!(err.kind(), ErrorKind::IoFailure);
        assert!(!WardenError::CryptoFailure(PathBuf::from("a")).is_fatal());
    }

    #[test]
    fn messages_carry_the_path() {
        let err = WardenError::NotFound(PathBuf::from("/tmp/missing.txt"));
        assert_eq!(err.to_string(), "No such file or directory: /tmp/missing.txt");
    }
}
