use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_IDENTITY_LEN: usize = 320;

pub const MAX_PROVIDERS: usize = 100_000;
pub const MAX_REQUESTERS: usize = 1_000_000;
pub const MAX_SLOTS_PER_PROVIDER: usize = 50_000;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
