use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::nisab::Metal;
use crate::record::RecordStatus;

/// Every failure the tracking engine can report.
///
/// Domain-rule violations carry enough context (current status, days remaining,
/// minimum length, ...) for the caller to correct the input. They serialize with
/// a stable `code` tag so the presentation layer can forward them unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NisabError {
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: RecordStatus, to: String },

    #[error("Record {record_id} is finalized; unlock it before editing")]
    RecordLocked { record_id: Uuid },

    #[error("Record {record_id} cannot be deleted while {status}")]
    DeleteForbidden { record_id: Uuid, status: RecordStatus },

    #[error("Unlock reason must be at least {min_length} characters (got {actual_length})")]
    UnlockReasonTooShort { min_length: usize, actual_length: usize },

    #[error("Hawl for record {record_id} is not complete: {days_remaining} day(s) remaining")]
    PrematureFinalization { record_id: Uuid, days_remaining: i64 },

    #[error("Wealth aggregation failed for user {user_id}: {reason}")]
    AggregationFailed { user_id: Uuid, reason: String },

    #[error("No usable {metal} price is available")]
    PriceUnavailable { metal: Metal },

    #[error("Record {record_id} not found")]
    RecordNotFound { record_id: Uuid },

    #[error("Record {record_id} was modified concurrently (expected version {expected_version}, found {actual_version})")]
    ConcurrentModification {
        record_id: Uuid,
        expected_version: u64,
        actual_version: u64,
    },

    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Encryption error: {message}")]
    Encryption { message: String },

    #[error("Network error: {message}")]
    Network { message: String },
}

impl NisabError {
    /// Stable machine-readable code, identical to the serialized `code` tag.
    pub fn code(&self) -> &'static str {
        match self {
            NisabError::InvalidTransition { .. } => "INVALID_TRANSITION",
            NisabError::RecordLocked { .. } => "RECORD_LOCKED",
            NisabError::DeleteForbidden { .. } => "DELETE_FORBIDDEN",
            NisabError::UnlockReasonTooShort { .. } => "UNLOCK_REASON_TOO_SHORT",
            NisabError::PrematureFinalization { .. } => "PREMATURE_FINALIZATION",
            NisabError::AggregationFailed { .. } => "AGGREGATION_FAILED",
            NisabError::PriceUnavailable { .. } => "PRICE_UNAVAILABLE",
            NisabError::RecordNotFound { .. } => "RECORD_NOT_FOUND",
            NisabError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            NisabError::InvalidInput { .. } => "INVALID_INPUT",
            NisabError::Configuration { .. } => "CONFIGURATION",
            NisabError::Storage { .. } => "STORAGE",
            NisabError::Encryption { .. } => "ENCRYPTION",
            NisabError::Network { .. } => "NETWORK",
        }
    }

    /// True for recoverable domain-rule violations the user can act on.
    /// Storage, encryption and configuration failures are infrastructure faults.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            NisabError::Storage { .. }
                | NisabError::Encryption { .. }
                | NisabError::Configuration { .. }
                | NisabError::Network { .. }
        )
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NisabError::AggregationFailed { .. }
                | NisabError::PriceUnavailable { .. }
                | NisabError::Network { .. }
                | NisabError::ConcurrentModification { .. }
        )
    }

    pub(crate) fn storage(message: impl Into<String>) -> Self {
        NisabError::Storage { message: message.into() }
    }

    pub(crate) fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        NisabError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Category of a zakatable holding, used to group the asset breakdown.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize, Display, EnumString, AsRefStr, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "snake_case")]
pub enum AssetCategory {
    Cash,
    Gold,
    Silver,
    Crypto,
    Business,
    Investment,
    Property,
    Other,
}

/// Who performed a lifecycle action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum Actor {
    /// An authenticated user acting on their own record.
    User(Uuid),
    /// The background detection sweep.
    System,
}

impl Actor {
    /// Identifier persisted with audit entries; the system actor maps to the nil UUID.
    pub fn id(&self) -> Uuid {
        match self {
            Actor::User(id) => *id,
            Actor::System => Uuid::nil(),
        }
    }

    pub fn from_id(id: Uuid) -> Self {
        if id.is_nil() { Actor::System } else { Actor::User(id) }
    }
}
