//! Correlation token generation.
//!
//! A token is `{PREFIX}-{YYYYmmddHHMMSS}-{16 alphanumerics}`. The random
//! suffix carries ~95 bits from the thread RNG, which is seeded from the OS;
//! if the OS source is unavailable the RNG panics, which is fatal for the
//! whole process rather than a per-call error.

use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};

/// Prefix used for performance-audit requests.
pub const DEFAULT_PREFIX: &str = "PERF";

const SUFFIX_LEN: usize = 16;

/// Generate a fresh correlation token.
pub fn generate(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{prefix}-{}-{suffix}", Utc::now().format("%Y%m%d%H%M%S"))
}
