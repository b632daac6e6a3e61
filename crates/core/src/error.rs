use thiserror::Error;
use uuid::Uuid;

pub type AgencyResult<T> = Result<T, AgencyError>;

/// Platform error taxonomy. Every variant carries a stable `code()` used by
/// tests and observability events; the dispatch worker is the only component
/// that recovers locally, everything else surfaces these to its caller.
#[derive(Error, Debug)]
pub enum AgencyError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Recipient suppressed: {reason}")]
    Suppressed { reason: String },

    #[error("Rate limit exhausted for resource {resource}")]
    RateLimited { resource: String },

    #[error("Assignment collision: lead held by client {other_client}")]
    Collision { other_client: Uuid },

    #[error("Transient provider error: {0}")]
    ProviderTransient(String),

    #[error("Permanent provider error: {0}")]
    ProviderPermanent(String),

    #[error("Bounce/complaint for {0}")]
    Bounce(String),

    #[error("Classifier ambiguous (confidence {confidence:.2})")]
    ClassifierAmbiguous { confidence: f64 },

    #[error("Budget exhausted: {scope}")]
    BudgetExhausted { scope: String },

    #[error("Store consistency conflict: {0}")]
    Consistency(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgencyError {
    /// Stable identifier for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            AgencyError::Validation(_) => "validation",
            AgencyError::Suppressed { .. } => "suppressed",
            AgencyError::RateLimited { .. } => "rate_limited",
            AgencyError::Collision { .. } => "collision",
            AgencyError::ProviderTransient(_) => "provider_transient",
            AgencyError::ProviderPermanent(_) => "provider_permanent",
            AgencyError::Bounce(_) => "bounce",
            AgencyError::ClassifierAmbiguous { .. } => "classifier_ambiguous",
            AgencyError::BudgetExhausted { .. } => "budget_exhausted",
            AgencyError::Consistency(_) => "consistency",
            AgencyError::NotFound(_) => "not_found",
            AgencyError::Config(_) => "config",
            AgencyError::Serialization(_) => "serialization",
            AgencyError::Io(_) => "io",
            AgencyError::Internal(_) => "internal",
        }
    }

    /// Whether the dispatch worker should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgencyError::ProviderTransient(_) | AgencyError::Consistency(_)
        )
    }
}
