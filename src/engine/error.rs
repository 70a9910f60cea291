use ulid::Ulid;

use crate::model::Ms;

/// How a provider was looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Id(Ulid),
    Identity(String),
}

impl std::fmt::Display for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lookup::Id(id) => write!(f, "id {id}"),
            Lookup::Identity(identity) => write!(f, "identity {identity:?}"),
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    /// Missing field, blank identity, or an unknown slot handle.
    InvalidRequest(&'static str),
    ProviderNotFound(Lookup),
    RequesterNotFound(Ulid),
    PastTime(Ms),
    SlotConflict {
        provider_id: Ulid,
        time: Ms,
    },
    SlotUnavailable(Ulid),
    RequesterConflict {
        requester_id: Ulid,
        slot_id: Ulid,
    },
    IdentityTaken(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidRequest(_) => "invalid_request",
            EngineError::ProviderNotFound(_) => "provider_not_found",
            EngineError::RequesterNotFound(_) => "requester_not_found",
            EngineError::PastTime(_) => "past_time",
            EngineError::SlotConflict { .. } => "slot_conflict",
            EngineError::SlotUnavailable(_) => "slot_unavailable",
            EngineError::RequesterConflict { .. } => "requester_conflict",
            EngineError::IdentityTaken(_) => "identity_taken",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::ProviderNotFound(lookup) => write!(f, "provider not found: {lookup}"),
            EngineError::RequesterNotFound(id) => write!(f, "requester not found: {id}"),
            EngineError::PastTime(t) => write!(f, "slot time {t} is not in the future"),
            EngineError::SlotConflict { provider_id, time } => {
                write!(f, "provider {provider_id} already has a slot at {time}")
            }
            EngineError::SlotUnavailable(id) => write!(f, "slot {id} is already booked"),
            EngineError::RequesterConflict {
                requester_id,
                slot_id,
            } => write!(f, "requester {requester_id} already holds slot {slot_id}"),
            EngineError::IdentityTaken(identity) => {
                write!(f, "identity already registered: {identity}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
