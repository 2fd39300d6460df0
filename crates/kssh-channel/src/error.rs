#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("{identity} is not a member of team {team}")]
    NotMember { team: String, identity: String },

    #[error("invalid channel name: {0}")]
    InvalidName(String),

    #[error("corrupt channel data: {0}")]
    Corrupt(String),

    #[error("channel io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel task failed: {0}")]
    Task(String),
}
