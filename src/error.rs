use thiserror::Error;

use crate::models::OperationKind;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Malformed feed at line {line}: {reason} (near {context:?})")]
    MalformedFeed {
        line: usize,
        context: String,
        reason: String,
    },

    #[error("Invalid event block at line {line}: {reason}")]
    InvalidEventBlock { line: usize, reason: String },

    #[error("Invalid recurrence rule for {uid}: {reason}")]
    InvalidRecurrenceRule { uid: String, reason: String },

    #[error("Ambiguous identity for {uid}: {detail}")]
    IdentityAmbiguous { uid: String, detail: String },

    #[error("{kind} failed for {uid}: {detail}")]
    StoreOperationFailed {
        uid: String,
        kind: OperationKind,
        detail: String,
    },

    #[error("State store unavailable: {0}")]
    StateStoreUnavailable(String),

    #[error("Feed unavailable: {0}")]
    FeedUnavailable(String),

    #[error("A reconciliation pass is already running")]
    PassInProgress,

    #[error("Reconciliation pass cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

impl SyncError {
    pub fn malformed<C: Into<String>, R: Into<String>>(line: usize, context: C, reason: R) -> Self {
        Self::MalformedFeed {
            line,
            context: context.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_block<S: Into<String>>(line: usize, reason: S) -> Self {
        Self::InvalidEventBlock {
            line,
            reason: reason.into(),
        }
    }

    pub fn state_store<S: Into<String>>(msg: S) -> Self {
        Self::StateStoreUnavailable(msg.into())
    }

    pub fn feed_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::FeedUnavailable(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Errors that abort the whole pass before any snapshot mutation.
    pub fn is_pass_fatal(&self) -> bool {
        match self {
            Self::MalformedFeed { .. }
            | Self::StateStoreUnavailable(_)
            | Self::FeedUnavailable(_)
            | Self::PassInProgress
            | Self::Cancelled
            | Self::Config(_)
            | Self::Database(_)
            | Self::Anyhow(_) => true,
            Self::InvalidEventBlock { .. }
            | Self::InvalidRecurrenceRule { .. }
            | Self::IdentityAmbiguous { .. }
            | Self::StoreOperationFailed { .. } => false,
        }
    }

    pub fn is_pii_safe(&self) -> bool {
        match self {
            // context carries raw feed text
            Self::MalformedFeed { .. } | Self::Database(_) | Self::Anyhow(_) => false,
            Self::FeedUnavailable(_) => false,
            _ => true,
        }
    }

    pub fn to_safe_string(&self) -> String {
        if self.is_pii_safe() {
            self.to_string()
        } else {
            match self {
                Self::MalformedFeed { line, .. } => format!("Malformed feed at line {}", line),
                Self::FeedUnavailable(_) => "Calendar feed could not be fetched".to_string(),
                Self::Database(_) => "Database operation failed".to_string(),
                Self::Anyhow(_) => "Operation failed".to_string(),
                _ => self.to_string(),
            }
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_fatal_classification() {
        assert!(SyncError::malformed(1, "BEGIN:VEVENT", "missing VCALENDAR").is_pass_fatal());
        assert!(SyncError::state_store("locked").is_pass_fatal());
        assert!(!SyncError::invalid_block(4, "missing UID").is_pass_fatal());
        assert!(!SyncError::StoreOperationFailed {
            uid: "a".to_string(),
            kind: OperationKind::Create,
            detail: "timeout".to_string(),
        }
        .is_pass_fatal());
    }

    #[test]
    fn test_safe_string_hides_feed_content() {
        let err = SyncError::malformed(12, "SUMMARY:Private dinner", "unterminated VEVENT");
        let safe = err.to_safe_string();
        assert!(safe.contains("line 12"));
        assert!(!safe.contains("Private dinner"));
    }

    #[test]
    fn test_store_failure_message_names_operation() {
        let err = SyncError::StoreOperationFailed {
            uid: "abc".to_string(),
            kind: OperationKind::Delete,
            detail: "not permitted".to_string(),
        };
        assert_eq!(err.to_string(), "delete failed for abc: not permitted");
    }
}
