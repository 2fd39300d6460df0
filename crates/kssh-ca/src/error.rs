//! CA domain error types.

use kssh_common::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("CA key not found at {}; run `keybaseca generate` first", .0.display())]
    KeyNotInitialized(std::path::PathBuf),

    #[error("team {0} is not served by this CA")]
    UnknownTeam(String),

    #[error("{requester} is not authorized for any principals via team {team}")]
    Unauthorized { requester: String, team: String },

    #[error("requester {declared} does not match channel sender {sender}")]
    IdentityMismatch { declared: String, sender: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("channel error: {0}")]
    Channel(#[from] kssh_channel::ChannelError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl From<kssh_crypto::keys::CryptoError> for CaError {
    fn from(e: kssh_crypto::keys::CryptoError) -> Self {
        match e {
            kssh_crypto::keys::CryptoError::KeyNotFound(path) => Self::KeyNotInitialized(path),
            other => Self::Crypto(other.to_string()),
        }
    }
}

impl From<&CaError> for ErrorCode {
    fn from(e: &CaError) -> Self {
        match e {
            CaError::UnknownTeam(_) => ErrorCode::UnknownTeam,
            CaError::Unauthorized { .. } => ErrorCode::Unauthorized,
            CaError::IdentityMismatch { .. } => ErrorCode::IdentityMismatch,
            CaError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            CaError::KeyNotInitialized(_)
            | CaError::Config(_)
            | CaError::Crypto(_)
            | CaError::Channel(_)
            | CaError::Io(_)
            | CaError::Internal(_) => ErrorCode::Internal,
        }
    }
}
