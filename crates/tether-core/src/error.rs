use std::fmt;

use crate::adapter::remote::RemoteError;

/// Machine-readable error codes for callers that branch on failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    RemoteUnreachable,
    AuthRejected,
    SessionMissing,
    ReplayRejected,
    LocalEngineFailed,
    RemoteStatus,
    ResourceNotFound,
    StateDbFailed,
    PayloadCodec,
    ConfigParseError,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::RemoteUnreachable => "E1001",
            Self::AuthRejected => "E1002",
            Self::SessionMissing => "E1003",
            Self::ReplayRejected => "E2001",
            Self::LocalEngineFailed => "E3001",
            Self::RemoteStatus => "E3002",
            Self::ResourceNotFound => "E3003",
            Self::StateDbFailed => "E4001",
            Self::PayloadCodec => "E4002",
            Self::ConfigParseError => "E5001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::RemoteUnreachable => "Remote authority unreachable",
            Self::AuthRejected => "Remote authority rejected credentials",
            Self::SessionMissing => "Remote session not configured",
            Self::ReplayRejected => "Queued offline batch rejected",
            Self::LocalEngineFailed => "Local engine call failed",
            Self::RemoteStatus => "Remote authority returned an error status",
            Self::ResourceNotFound => "Resource not found",
            Self::StateDbFailed => "Local state database failure",
            Self::PayloadCodec => "Payload encode/decode failure",
            Self::ConfigParseError => "Config file parse error",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::RemoteUnreachable => {
                Some("Changes are kept locally and replayed on the next read.")
            }
            Self::AuthRejected => Some("Sign in again; credentials are renewed automatically."),
            Self::SessionMissing => Some("Configure remote.base_url and remote.token."),
            Self::ReplayRejected => Some("The batch stays queued and is retried on the next read."),
            Self::LocalEngineFailed | Self::RemoteStatus | Self::ResourceNotFound => None,
            Self::StateDbFailed => Some("Check disk space and permissions of the state database."),
            Self::PayloadCodec => Some("Check that local and remote schema versions match."),
            Self::ConfigParseError => Some("Fix syntax in tether/config.toml and retry."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failures of the local state database (history, offline queue, pack cache).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state database: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("state codec: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("state database lock poisoned")]
    Poisoned,
    #[error("state database setup: {0}")]
    Setup(String),
}

/// Error taxonomy shared by every accessor, pipeline and resource call.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Remote authority unreachable. Mutations are queued, reads fall back to local.
    #[error("remote unreachable: {0}")]
    Connectivity(String),

    /// Remote rejected credentials (HTTP 401). Renewal has already been requested.
    #[error("remote rejected credentials: {0}")]
    Auth(String),

    /// Required context (remote session, profile) is missing for this call.
    #[error("missing configuration: {0}")]
    Configuration(&'static str),

    /// A queued offline batch was rejected during replay.
    #[error("replay of {command_id} rejected: {reason}")]
    Replay { command_id: String, reason: String },

    /// The local engine rejected the call.
    #[error("local engine: {0}")]
    Local(String),

    /// The remote returned a non-auth error status.
    #[error("remote status {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Return the machine-readable error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Connectivity(_) => ErrorCode::RemoteUnreachable,
            Self::Auth(_) => ErrorCode::AuthRejected,
            Self::Configuration(_) => ErrorCode::SessionMissing,
            Self::Replay { .. } => ErrorCode::ReplayRejected,
            Self::Local(_) => ErrorCode::LocalEngineFailed,
            Self::Remote { .. } => ErrorCode::RemoteStatus,
            Self::NotFound { .. } => ErrorCode::ResourceNotFound,
            Self::Store(_) => ErrorCode::StateDbFailed,
            Self::Serialization(_) => ErrorCode::PayloadCodec,
        }
    }

    /// `true` when the failure means "remote not reachable right now".
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// `true` when a failed remote delivery should fall into the offline queue.
    ///
    /// Network failures and server-side errors (5xx) are queued; auth and
    /// client errors are not retried blindly.
    #[must_use]
    pub const fn is_deliverable_later(&self) -> bool {
        match self {
            Self::Connectivity(_) => true,
            Self::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transport(message) => Self::Connectivity(message),
            RemoteError::Unauthorized(message) => Self::Auth(message),
            RemoteError::Status { status, body } => Self::Remote { status, body },
            RemoteError::Decode(message) => Self::Remote {
                status: 200,
                body: format!("undecodable response: {message}"),
            },
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::{ErrorCode, SyncError};
    use crate::adapter::remote::RemoteError;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::RemoteUnreachable,
            ErrorCode::AuthRejected,
            ErrorCode::SessionMissing,
            ErrorCode::ReplayRejected,
            ErrorCode::LocalEngineFailed,
            ErrorCode::RemoteStatus,
            ErrorCode::ResourceNotFound,
            ErrorCode::StateDbFailed,
            ErrorCode::PayloadCodec,
            ErrorCode::ConfigParseError,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::ReplayRejected.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn remote_errors_map_onto_taxonomy() {
        let err: SyncError = RemoteError::Transport("connection refused".into()).into();
        assert!(err.is_connectivity());
        assert!(err.is_deliverable_later());

        let err: SyncError = RemoteError::Unauthorized("expired".into()).into();
        assert_eq!(err.code(), ErrorCode::AuthRejected);
        assert!(!err.is_deliverable_later());

        let err: SyncError = RemoteError::Status {
            status: 503,
            body: "busy".into(),
        }
        .into();
        assert!(err.is_deliverable_later());

        let err: SyncError = RemoteError::Status {
            status: 422,
            body: "bad".into(),
        }
        .into();
        assert!(!err.is_deliverable_later());
    }
}
