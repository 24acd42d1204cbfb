//! Utility module
//!
//! Wall-clock helpers and logging setup shared by the binary and tests.

use chrono::Utc;
use tracing::Level;

use crate::core::{Error, Result};

/// Microseconds since the Unix epoch, as carried in sync messages
pub fn epoch_micros() -> u64 {
    u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0)
}

/// Installs a fmt subscriber filtered at `level`.
///
/// Calling this again after a subscriber is installed is a no-op.
pub fn init_tracing(level: &str) -> Result<()> {
    let level: Level = level
        .parse()
        .map_err(|_| Error::config(format!("invalid log level `{}`", level)))?;

    // try_init only fails when a global subscriber already exists
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_micros_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(epoch_micros() > 1_577_836_800_000_000);
        let a = epoch_micros();
        let b = epoch_micros();
        assert!(b >= a);
    }

    #[test]
    fn test_init_tracing_idempotent() {
        assert!(init_tracing("debug").is_ok());
        assert!(init_tracing("info").is_ok());
        assert!(matches!(init_tracing("loud"), Err(Error::Config(_))));
    }
}
