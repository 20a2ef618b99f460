use super::*;

/// Control-plane error taxonomy.
///
/// Every variant has a stable HTTP mapping via [`Error::status`]; the
/// request façade relies on it rather than matching variants itself.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<&'static str>,
    },

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("activation {0} timed out")]
    Timeout(uuid::Uuid),

    #[error("entity store error: {0}")]
    Storage(storage::Error),

    #[error("broker error: {0}")]
    Broker(broker::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(message: impl Into<String>, field: Option<&'static str>) -> Self {
        Self::Validation {
            message: message.into(),
            field,
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// HTTP status code for this error kind.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Auth(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::ServiceUnavailable(_) | Self::Broker(_) => 503,
            Self::Timeout(_) => 504,
            Self::Storage(_) | Self::Internal(_) => 500,
        }
    }
}
