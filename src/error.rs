//! WolfElect Error Types

use thiserror::Error;

/// Result type alias for WolfElect operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfElect error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Session errors
    #[error("Connection failed to {servers}: {reason}")]
    ConnectionFailed { servers: String, reason: String },

    #[error("Connection to coordination service lost")]
    ConnectionLoss,

    #[error("Session {0:#x} expired")]
    SessionExpired(u64),

    #[error("Lost connectivity to coordination service after {disconnects} disconnects")]
    SessionLost { disconnects: u32 },

    // Node errors
    #[error("Node does not exist: {0}")]
    NoNode(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Node has children: {0}")]
    NotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // Election errors
    #[error("Registration under {path} failed: {reason}")]
    Registration { path: String, reason: String },

    #[error("Resignation of {candidate_id} failed: {reason}")]
    Resignation { candidate_id: String, reason: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error invalidates the whole run.
    ///
    /// Session-level failures mean any leadership belief may be stale, so
    /// they must reach the process boundary instead of being absorbed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConnectionFailed { .. }
                | Error::SessionExpired(_)
                | Error::SessionLost { .. }
                | Error::Config(_)
                | Error::ConfigParse(_)
        )
    }

    /// Process exit code for an error surfacing at the binary
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            2
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::SessionLost { disconnects: 6 }.is_fatal());
        assert!(Error::SessionExpired(1).is_fatal());
        assert!(Error::ConnectionFailed {
            servers: "127.0.0.1:2181".into(),
            reason: "refused".into(),
        }
        .is_fatal());

        let resign = Error::Resignation {
            candidate_id: "n_0000000001".into(),
            reason: "gone".into(),
        };
        assert!(!resign.is_fatal());
        assert_eq!(resign.exit_code(), 1);
        assert_eq!(Error::SessionLost { disconnects: 6 }.exit_code(), 2);
    }

    #[test]
    fn test_error_display() {
        let err = Error::SessionLost { disconnects: 6 };
        assert_eq!(
            err.to_string(),
            "Lost connectivity to coordination service after 6 disconnects"
        );
        assert_eq!(Error::SessionExpired(0x1f).to_string(), "Session 0x1f expired");
    }
}
