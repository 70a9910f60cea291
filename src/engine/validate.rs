use crate::limits::*;
use crate::model::Ms;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Creation time must lie strictly after `now`, and inside the accepted range.
pub(crate) fn validate_slot_time(time: Ms, now: Ms) -> Result<(), EngineError> {
    if time <= now {
        return Err(EngineError::PastTime(time));
    }
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&time) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_identity(identity: &str) -> Result<(), EngineError> {
    if identity.trim().is_empty() {
        return Err(EngineError::InvalidRequest("identity is required"));
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(EngineError::LimitExceeded("identity too long"));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}
