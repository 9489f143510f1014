use thiserror::Error;

/// Typed error taxonomy for the exchange core.
///
/// Every failure in the query engine, consent ledger, RBAC resolver and
/// create pipeline is one of these; the handler layer maps them to HTTP
/// statuses and the batch processor maps them to per-entry status lines.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Malformed or missing structural fields, bad references, wrong coding
    /// cardinality. Client input fault.
    #[error("{0}")]
    Validation(String),

    /// A referenced patient, device, scope or enrollment is absent.
    #[error("{0}")]
    NotFound(String),

    /// RBAC deny, missing consent, or subject/actor mismatch. Existence is
    /// not hidden behind this error.
    #[error("{0}")]
    PermissionDenied(String),

    /// Duplicate external identifier. Never an upsert.
    #[error("{0}")]
    Conflict(String),

    /// Anything else. Server fault, always logged with full context.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl ExchangeError {
    pub fn validation(message: impl Into<String>) -> Self {
        ExchangeError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ExchangeError::NotFound(message.into())
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        ExchangeError::PermissionDenied(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ExchangeError::Conflict(message.into())
    }

    /// FHIR issue-type code used when rendering an OperationOutcome.
    pub fn issue_code(&self) -> &'static str {
        match self {
            ExchangeError::Validation(_) => "invalid",
            ExchangeError::NotFound(_) => "not-found",
            ExchangeError::PermissionDenied(_) => "forbidden",
            ExchangeError::Conflict(_) => "conflict",
            ExchangeError::Unexpected(_) => "exception",
        }
    }
}

impl From<sqlx::Error> for ExchangeError {
    fn from(err: sqlx::Error) -> Self {
        ExchangeError::Unexpected(err.into())
    }
}
