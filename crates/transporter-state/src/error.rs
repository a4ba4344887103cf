//! Error types for the durability subsystem.

use std::path::PathBuf;

/// Errors produced by [`StateStore`](crate::StateStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias for state store results.
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Errors produced by commit/error log operations.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// File-system I/O failure.
    #[error("log i/o error{}: {source}", path_suffix(.path))]
    Io {
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// Frame header carried the wrong magic number.
    #[error("log frame magic mismatch (got {got:#010x})")]
    MagicMismatch { got: u32 },

    /// Frame body failed its checksum.
    #[error("log frame crc mismatch (expected {expected:#010x}, got {got:#010x})")]
    CrcMismatch { expected: u32, got: u32 },

    /// Frame length field was zero or otherwise unusable.
    #[error("log frame length invalid: {reason}")]
    LengthInvalid { reason: String },

    /// Frame body exceeds the configured ceiling.
    #[error("log frame too large (max {max_bytes} bytes, got {got_bytes})")]
    FrameTooLarge { max_bytes: usize, got_bytes: usize },

    /// The file ended in the middle of a frame.
    #[error("log frame truncated mid-record")]
    Truncated,

    /// Frame payload failed to encode or decode.
    #[error("log payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A commit marker referenced an offset past the log head.
    #[error("commit marker past log head (upto {upto}, head {head:?})")]
    MarkPastHead { upto: u64, head: Option<u64> },
}

impl LogError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: Some(path.to_path_buf()),
            source,
        }
    }

    /// Returns `true` for errors a recovery scan treats as a torn tail:
    /// the remainder of the file is discarded rather than failing startup.
    #[must_use]
    pub fn is_tail_corruption(&self) -> bool {
        matches!(
            self,
            Self::MagicMismatch { .. }
                | Self::CrcMismatch { .. }
                | Self::LengthInvalid { .. }
                | Self::Truncated
        )
    }
}

/// Convenience alias for log results.
pub type LogResult<T> = std::result::Result<T, LogError>;

fn path_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" ({})", p.display()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_error_displays() {
        let err = StateError::LockPoisoned;
        assert_eq!(err.to_string(), "state store lock poisoned");
        let io = StateError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io.to_string().contains("i/o"));
    }

    #[test]
    fn log_error_io_includes_path() {
        let err = LogError::io(
            std::path::Path::new("/tmp/w1.commitlog"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("w1.commitlog"), "got: {msg}");
        assert!(msg.contains("denied"), "got: {msg}");
    }

    #[test]
    fn tail_corruption_classification() {
        assert!(LogError::Truncated.is_tail_corruption());
        assert!(LogError::MagicMismatch { got: 7 }.is_tail_corruption());
        assert!(LogError::CrcMismatch {
            expected: 1,
            got: 2
        }
        .is_tail_corruption());
        assert!(!LogError::MarkPastHead {
            upto: 9,
            head: Some(3)
        }
        .is_tail_corruption());
    }
}
