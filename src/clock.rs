//! Single place that reaches for wall-clock time, so every "now" comparison
//! in the cache/verifier/decision pipeline goes through one definition of
//! "unix seconds".

use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
