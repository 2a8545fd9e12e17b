use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sequencer::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Transport,
    Validation,
    PermissionDenied,
    InvalidPayload,
    Config,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Transport => "TRANSPORT_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::PermissionDenied => "FORBIDDEN",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::Config => "CONFIG_ERROR",
        }
    }

    /// Nothing in the core retries on its own; this only tells the shell
    /// whether offering a manual retry makes sense.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transport)
    }
}

/// A single inline validation message returned by the address editor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: Option<String>,
    pub message: String,
}

impl FieldError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("transport failure{}: {message}", channel_suffix(.channel))]
    Transport {
        channel: Option<Channel>,
        message: String,
    },

    #[error("validation failed with {} error(s)", .errors.len())]
    Validation { errors: Vec<FieldError> },

    #[error("permission denied for {action}")]
    PermissionDenied { action: String },

    #[error("invalid payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

fn channel_suffix(channel: &Option<Channel>) -> String {
    channel.map(|c| format!(" on {c} channel")).unwrap_or_default()
}

impl SyncError {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            channel: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn on_channel(self, channel: Channel) -> Self {
        match self {
            Self::Transport { message, .. } => Self::Transport {
                channel: Some(channel),
                message,
            },
            other => other,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::InvalidPayload { .. } => ErrorKind::InvalidPayload,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind().code()
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self {
            Self::Transport {
                channel: Some(Channel::List),
                ..
            } => "Loading addresses failed. Scroll or refresh to try again.".into(),
            Self::Transport {
                channel: Some(Channel::Parcels),
                ..
            } => "Loading parcels failed. Move the map to try again.".into(),
            Self::Transport { channel: None, .. } => {
                "The request failed. Please try again.".into()
            }
            Self::Validation { errors } => errors
                .iter()
                .map(|e| match &e.field {
                    Some(field) => format!("{field}: {}", e.message),
                    None => e.message.clone(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Self::PermissionDenied { .. } => {
                "You don't have permission to perform this action.".into()
            }
            Self::InvalidPayload { .. } => {
                "The server sent data that could not be read.".into()
            }
            Self::Config { reason } => reason.clone(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::invalid_payload(e.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_message_names_channel() {
        let err = SyncError::transport("timeout").on_channel(Channel::Parcels);
        assert_eq!(err.to_string(), "transport failure on parcels channel: timeout");
        assert!(err.user_facing_message().contains("parcels"));
    }

    #[test]
    fn on_channel_leaves_other_kinds_alone() {
        let err = SyncError::invalid_payload("bad").on_channel(Channel::List);
        assert_eq!(err.kind(), ErrorKind::InvalidPayload);
    }

    #[test]
    fn validation_message_lists_fields() {
        let err = SyncError::Validation {
            errors: vec![
                FieldError::for_field("street", "required"),
                FieldError::new("zip code is malformed"),
            ],
        };
        assert_eq!(
            err.user_facing_message(),
            "street: required\nzip code is malformed"
        );
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn only_transport_is_retryable() {
        assert!(ErrorKind::Transport.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::PermissionDenied.is_retryable());
    }
}
