//! Error taxonomy for gateway operations.
//!
//! Sender-facing failures are `ChatError` and travel back to the session that
//! caused them as an ERROR dispatch. Recipient-facing failures are
//! `DeliveryError` and never leave the fan-out loop.

use thiserror::Error;

use crate::identity::IdentityError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("session is not authenticated")]
    Unauthenticated,

    #[error("session is not a member of room {0}")]
    NotAMember(String),

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("message storage is unavailable; sends are paused")]
    StorageUnavailable,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("message not found: {0}")]
    MessageNotFound(i64),

    #[error("session is closed")]
    SessionClosed,
}

impl ChatError {
    /// Stable machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Unauthenticated => "UNAUTHENTICATED",
            ChatError::NotAMember(_) => "NOT_A_MEMBER",
            ChatError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            ChatError::Storage(_) => "STORAGE_ERROR",
            ChatError::StorageUnavailable => "STORAGE_UNAVAILABLE",
            ChatError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ChatError::InvalidCredentials => "INVALID_CREDENTIALS",
            ChatError::MessageNotFound(_) => "MESSAGE_NOT_FOUND",
            ChatError::SessionClosed => "SESSION_CLOSED",
        }
    }

    /// Message safe to show to the client. Storage internals are not leaked.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Storage(_) => "Message could not be stored".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<IdentityError> for ChatError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Unauthorized => ChatError::InvalidCredentials,
            IdentityError::AlreadyExists => {
                ChatError::InvalidPayload("account already exists".to_string())
            }
            IdentityError::Internal(e) => {
                tracing::error!(error = %e, "identity provider failure");
                ChatError::InvalidCredentials
            }
        }
    }
}

/// Failure delivering one event to one session.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("session channel is closed")]
    Closed,

    #[error("session outbound queue is full")]
    Full,
}
