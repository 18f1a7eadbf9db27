use std::fmt;
use std::io;
use std::path::PathBuf;

/// File operation that failed, used to decide recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Read,
    Write,
    Rename,
    CreateDir,
    Remove,
    List,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileOp::Read => "read",
            FileOp::Write => "write",
            FileOp::Rename => "rename",
            FileOp::CreateDir => "create directory",
            FileOp::Remove => "remove",
            FileOp::List => "list",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error("cannot {op} {}: {source}", path.display())]
    FileAccess {
        op: FileOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("registry at {} is corrupt: {reason}", path.display())]
    RegistryCorruption { path: PathBuf, reason: String },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no section '{heading}' in {}", path.display())]
    UnknownSection { path: PathBuf, heading: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Whether a batch may carry on past an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recoverability {
    /// Skip or reinitialise and keep going.
    Recoverable,
    /// Abort the operation for this document.
    Fatal,
}

impl DocError {
    pub fn file_access(op: FileOp, path: impl Into<PathBuf>, source: io::Error) -> Self {
        DocError::FileAccess {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn recoverability(&self) -> Recoverability {
        match self {
            // An unreadable existing file is treated as a create.
            DocError::FileAccess { op: FileOp::Read, .. } => Recoverability::Recoverable,
            DocError::RegistryCorruption { .. } => Recoverability::Recoverable,
            DocError::UnknownSection { .. } => Recoverability::Recoverable,
            DocError::FileAccess { .. } | DocError::Serialization(_) | DocError::Io(_) => {
                Recoverability::Fatal
            }
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverability() == Recoverability::Recoverable
    }
}

pub type Result<T> = std::result::Result<T, DocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_failures_are_recoverable() {
        let err = DocError::file_access(
            FileOp::Read,
            "docs/api.md",
            io::Error::new(io::ErrorKind::InvalidData, "stream did not contain valid UTF-8"),
        );
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "cannot read docs/api.md: stream did not contain valid UTF-8"
        );
    }

    #[test]
    fn test_write_failures_are_fatal() {
        let err = DocError::file_access(
            FileOp::Rename,
            "docs/api.md",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.recoverability(), Recoverability::Fatal);
    }
}
