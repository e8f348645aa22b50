//! Domain error types.

/// Top-level error type for bondledger.
#[derive(Debug, thiserror::Error)]
pub enum BondError {
    #[error("invalid amount: {reason}")]
    Validation { reason: String },

    #[error("out of bounds: {reason}")]
    Bounds { reason: String },

    #[error("chain call {method} failed: {reason}")]
    Chain { method: String, reason: String },

    #[error("chain call {method} has unknown outcome (request {request_id})")]
    ChainUnknownOutcome { method: String, request_id: String },

    #[error("concurrent update on {entity} {id}: {reason}")]
    ConcurrencyConflict {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("custodial key decryption failed")]
    Decryption,

    #[error("sponsor wallet {sponsor} has {available} gas units, needs {required}")]
    InsufficientSponsorFunds {
        sponsor: String,
        available: u64,
        required: u64,
    },

    #[error("{actor} may not {action}")]
    Forbidden { actor: String, action: &'static str },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("export failed: {reason}")]
    Export { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BondError {
    pub fn validation(reason: impl Into<String>) -> Self {
        BondError::Validation {
            reason: reason.into(),
        }
    }

    pub fn bounds(reason: impl Into<String>) -> Self {
        BondError::Bounds {
            reason: reason.into(),
        }
    }

    pub fn chain(method: impl Into<String>, reason: impl Into<String>) -> Self {
        BondError::Chain {
            method: method.into(),
            reason: reason.into(),
        }
    }

    pub fn conflict(entity: &'static str, id: impl Into<String>, reason: impl Into<String>) -> Self {
        BondError::ConcurrencyConflict {
            entity,
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        BondError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// True for errors a caller may retry after refreshing state.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BondError::ConcurrencyConflict { .. } | BondError::ChainUnknownOutcome { .. }
        )
    }
}

impl From<&BondError> for std::process::ExitCode {
    fn from(err: &BondError) -> Self {
        let code: u8 = match err {
            BondError::Io(_) | BondError::Export { .. } => 1,
            BondError::ConfigParse { .. }
            | BondError::ConfigMissing { .. }
            | BondError::ConfigInvalid { .. } => 2,
            BondError::Database { .. } | BondError::DatabaseQuery { .. } => 3,
            BondError::Validation { .. }
            | BondError::Bounds { .. }
            | BondError::Forbidden { .. }
            | BondError::NotFound { .. } => 4,
            BondError::Chain { .. }
            | BondError::ChainUnknownOutcome { .. }
            | BondError::InsufficientSponsorFunds { .. } => 5,
            BondError::ConcurrencyConflict { .. } => 6,
            BondError::Decryption => 7,
        };
        std::process::ExitCode::from(code)
    }
}
