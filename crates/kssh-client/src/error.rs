use kssh_common::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Did not find any config files in any team you belong to. Is the CA bot running?")]
    NoTeams,

    #[error(
        "Found {count} config files ({}). No default team is configured. Either specify a team via `kssh --team teamname` or set a default team via `kssh --set-default-team teamname`",
        .teams.join(", ")
    )]
    AmbiguousTeam { count: usize, teams: Vec<String> },

    #[error("Team {0} is not running a reachable CA (no kssh config found in that team)")]
    UnknownTeam(String),

    #[error("Bad client config in team {team}: {reason}")]
    BadTeamConfig { team: String, reason: String },

    #[error("The CA for team {team} did not grant you any principals")]
    Unauthorized { team: String },

    #[error("CA denied the request ({code}): {message}")]
    Denied { code: ErrorCode, message: String },

    #[error("Timed out after {secs}s waiting for the CA to answer")]
    RequestTimeout { secs: u64 },

    #[error("Corrupt cached key bundle: {0}")]
    CacheCorruption(String),

    #[error("Untrusted certificate from CA: {0}")]
    UntrustedCertificate(String),

    #[error("Another kssh is holding the key lock at {0}")]
    LockTimeout(String),

    #[error("Failed to load key into ssh-agent: {0}")]
    Agent(String),

    #[error("Channel error: {0}")]
    Channel(#[from] kssh_channel::ChannelError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] kssh_crypto::keys::CryptoError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoTeams => 2,
            Self::AmbiguousTeam { .. } => 3,
            Self::UnknownTeam(_) => 4,
            Self::BadTeamConfig { .. } => 5,
            Self::Unauthorized { .. } => 6,
            Self::Denied { .. } => 7,
            Self::RequestTimeout { .. } => 8,
            Self::CacheCorruption(_) => 9,
            Self::UntrustedCertificate(_) => 10,
            Self::LockTimeout(_) => 11,
            Self::Agent(_) => 12,
            Self::Channel(_) => 13,
            Self::Crypto(_) => 14,
            Self::Io(_) => 15,
            Self::Internal(_) => 1,
        }
    }

    /// Map a CA denial back into a client error.
    pub fn from_denial(team: &str, code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::Unauthorized => Self::Unauthorized {
                team: team.to_string(),
            },
            ErrorCode::UnknownTeam => Self::UnknownTeam(team.to_string()),
            code => Self::Denied { code, message },
        }
    }
}
