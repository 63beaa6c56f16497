use crate::ntp::NetError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("No network interface bound")]
    NoInterface,

    #[error("Failed to resolve NTP server: {0}")]
    Resolve(NetError),

    #[error("NTP transport failed: {0}")]
    Transport(NetError),

    #[error("NTP reply too short ({received} bytes)")]
    InsufficientData { received: usize },

    #[error("NTP query task aborted: {0}")]
    Aborted(String),
}

impl QueryError {
    pub const INSUFFICIENT_DATA: i32 = -1;
    pub const NO_INTERFACE: i32 = -2;
    pub const ABORTED: i32 = -3;

    /// Integer status for callers that speak codes; collaborator codes pass through
    pub fn code(&self) -> i32 {
        match self {
            QueryError::NoInterface => Self::NO_INTERFACE,
            QueryError::Resolve(e) | QueryError::Transport(e) => e.code(),
            QueryError::InsufficientData { .. } => Self::INSUFFICIENT_DATA,
            QueryError::Aborted(_) => Self::ABORTED,
        }
    }
}
