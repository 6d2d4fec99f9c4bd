//! Environment variable parsing utilities.
//!
//! Tunables that are not worth a CLI flag (gas margins and the like) are read
//! through these helpers instead of repeating the
//! `std::env::var(..).ok().and_then(|v| v.parse().ok())` dance.
//!
//! # Example
//!
//! ```
//! use rollout_types::env_utils::env_var_or;
//!
//! let margin: u64 = env_var_or("ROLLOUT_EXECUTION_GAS_MARGIN", 2_000_000);
//! # let _ = margin;
//! ```

use std::str::FromStr;

/// Parse an environment variable; `None` when unset or unparsable.
pub fn env_var<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse an environment variable, falling back to `default`.
pub fn env_var_or<T: FromStr>(key: &str, default: T) -> T {
    env_var(key).unwrap_or(default)
}
