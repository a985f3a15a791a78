use crm_effects::Recovery;
use crm_schema::{EntityKind, EnvelopeError, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    /// No session token. Raised before any request is made.
    #[error("not signed in")]
    NotAuthenticated,

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: EntityKind, id: String },

    /// Blocked client-side; never sent.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("{action} is not available for {kind} records")]
    Unsupported { action: &'static str, kind: EntityKind },

    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    #[error("no records selected")]
    EmptySelection,

    #[error("invalid filter: {0}")]
    Filter(String),

    #[error("superseded by a newer request")]
    Cancelled,

    /// Aggregate view of a bulk action with at least one failed item.
    #[error("{action}: {failed} of {total} records failed")]
    BulkFailed {
        action: &'static str,
        failed: usize,
        total: usize,
    },

    #[error("export failed: {0}")]
    Export(String),
}

impl From<serde_json::Error> for CrmError {
    fn from(err: serde_json::Error) -> Self {
        CrmError::Decode(err.to_string())
    }
}

impl CrmError {
    /// Whether the failure happened in the client before anything was sent.
    pub fn is_client_side(&self) -> bool {
        matches!(
            self,
            CrmError::NotAuthenticated
                | CrmError::Validation(_)
                | CrmError::Unsupported { .. }
                | CrmError::UnknownStage(_)
                | CrmError::EmptySelection
                | CrmError::Filter(_)
        )
    }

    /// Recovery hint for a failed request of the given effect recovery class.
    /// Client-side failures need the input fixed, so they never suggest a retry.
    pub fn recovery_hint(&self, default: Recovery) -> Recovery {
        if self.is_client_side() {
            Recovery::ManualReview
        } else {
            default
        }
    }
}

pub type CrmResult<T> = Result<T, CrmError>;
