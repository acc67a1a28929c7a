//! Error taxonomy for the synchronization engine.
//!
//! Every component contract returns [`SyncError`]; external collaborators'
//! failures are carried as typed values (`TaggedError`, `ChannelError`,
//! `RepoError`) and never escape as panics.

use crate::db::DbError;
use crate::model::customer::{CustomerValidationError, LocalId};
use crate::repo::customer_repo::RepoError;
use crate::repo::identity_repo::IdentityConflict;
use crate::sync::channel::ChannelError;
use crate::sync::envelope::{Direction, Operation};
use crate::sync::remote::TaggedError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug)]
pub enum SyncError {
    /// Rejected before publish (blank name, bad or duplicate email).
    Validation(CustomerValidationError),
    /// The local record addressed by a mutation does not exist.
    NotFound(LocalId),
    /// The remote directory returned a tagged error.
    RemoteUnavailable(TaggedError),
    /// The channel did not acknowledge a publish.
    PublishFailure(ChannelError),
    /// Unknown lane/direction or unparseable payload.
    MalformedEnvelope(String),
    /// Webhook kind outside `customer.created|updated|deleted`.
    UnsupportedEvent(String),
    /// Identity map double-mapping.
    Conflict(IdentityConflict),
    /// An update whose counterpart identifier has no mapping yet.
    UnresolvedReference {
        direction: Direction,
        operation: Operation,
        reference: String,
    },
    /// Channel transport failure while consuming or committing.
    Transport(ChannelError),
    /// Local store transport failure.
    Store(RepoError),
}

impl SyncError {
    /// Stable short code used in log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::RemoteUnavailable(_) => "remote_unavailable",
            Self::PublishFailure(_) => "publish_failure",
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::UnsupportedEvent(_) => "unsupported_event",
            Self::Conflict(_) => "conflict",
            Self::UnresolvedReference { .. } => "unresolved_reference",
            Self::Transport(_) => "transport",
            Self::Store(_) => "store",
        }
    }

    /// Display text for log lines; validation details can carry emails.
    pub fn log_detail(&self) -> String {
        match self {
            Self::Validation(CustomerValidationError::EmptyName) => "empty name".to_string(),
            Self::Validation(CustomerValidationError::InvalidEmail(_)) => {
                "invalid email".to_string()
            }
            Self::Validation(CustomerValidationError::DuplicateEmail(_)) => {
                "duplicate email".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "validation failed: {err}"),
            Self::NotFound(id) => write!(f, "customer not found: {id}"),
            Self::RemoteUnavailable(err) => write!(f, "remote directory call failed: {err}"),
            Self::PublishFailure(err) => write!(f, "publish not acknowledged: {err}"),
            Self::MalformedEnvelope(reason) => write!(f, "malformed envelope: {reason}"),
            Self::UnsupportedEvent(kind) => write!(f, "unsupported webhook event `{kind}`"),
            Self::Conflict(conflict) => write!(f, "{conflict}"),
            Self::UnresolvedReference {
                direction,
                operation,
                reference,
            } => write!(
                f,
                "no identity mapping for {reference} ({direction}/{operation})"
            ),
            Self::Transport(err) => write!(f, "channel transport error: {err}"),
            Self::Store(err) => write!(f, "local store error: {err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::RemoteUnavailable(err) => Some(err),
            Self::PublishFailure(err) | Self::Transport(err) => Some(err),
            Self::Conflict(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::NotFound(_)
            | Self::MalformedEnvelope(_)
            | Self::UnsupportedEvent(_)
            | Self::UnresolvedReference { .. } => None,
        }
    }
}

impl From<RepoError> for SyncError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Validation(err) => Self::Validation(err),
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::Conflict(conflict) => Self::Conflict(conflict),
            other => Self::Store(other),
        }
    }
}

impl From<DbError> for SyncError {
    fn from(value: DbError) -> Self {
        Self::Store(RepoError::Db(value))
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(RepoError::from(value))
    }
}
