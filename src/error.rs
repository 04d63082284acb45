use crate::ride::RideStatus;

/// The failure classes a caller can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    Unauthorized,
    NotFound,
    InvalidTransition,
    AlreadyClaimed,
    VersionMismatch,
    InvalidRequest,
    Infrastructure,
}

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("No identity could be resolved for the credential")]
    Unauthenticated,
    #[error("User {user_id} is not permitted: {reason}")]
    Unauthorized { user_id: String, reason: String },
    #[error("Ride {0} does not exist")]
    NotFound(String),
    #[error("Connection {0} is not registered")]
    ConnectionNotFound(String),
    #[error("Ride {ride_id} cannot move from {from} to {to}")]
    InvalidTransition {
        ride_id: String,
        from: RideStatus,
        to: RideStatus,
    },
    #[error("Ride {0} is no longer available to claim")]
    AlreadyClaimed(String),
    #[error("Ride {0} kept changing underneath the update")]
    VersionMismatch(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Failed to generate identifier: {0}")]
    Identifier(String),
    #[error("Failed to encode ride record: {0}")]
    Encode(String),
    #[error("Failed to decode ride record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("Ride store failure: {0}")]
    Store(#[from] sled::Error),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Unauthenticated => ErrorKind::Unauthenticated,
            DispatchError::Unauthorized { .. } => ErrorKind::Unauthorized,
            DispatchError::NotFound(_) | DispatchError::ConnectionNotFound(_) => ErrorKind::NotFound,
            DispatchError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            DispatchError::AlreadyClaimed(_) => ErrorKind::AlreadyClaimed,
            DispatchError::VersionMismatch(_) => ErrorKind::VersionMismatch,
            DispatchError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            DispatchError::Identifier(_)
            | DispatchError::Encode(_)
            | DispatchError::Decode(_)
            | DispatchError::Store(_) => ErrorKind::Infrastructure,
        }
    }

    pub(crate) fn unauthorized(user_id: &str, reason: impl Into<String>) -> Self {
        DispatchError::Unauthorized {
            user_id: user_id.to_string(),
            reason: reason.into(),
        }
    }
}
