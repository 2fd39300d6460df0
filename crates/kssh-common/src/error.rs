use serde::{Deserialize, Serialize};

/// Machine-readable error codes carried in CA denials.
/// Shared by the CA and the client so a denial survives the channel hop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The requester's teams grant no principals.
    Unauthorized,
    /// The request names a team this CA does not serve.
    UnknownTeam,
    /// The request body could not be used (bad key, bad validity).
    InvalidRequest,
    /// The self-declared requester differs from the channel sender.
    IdentityMismatch,
    Internal,
}

impl ErrorCode {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Internal)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unauthorized => "unauthorized",
            Self::UnknownTeam => "unknown_team",
            Self::InvalidRequest => "invalid_request",
            Self::IdentityMismatch => "identity_mismatch",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}
