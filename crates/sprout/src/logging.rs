//! Logging setup.
//!
//! The core logs through `tracing`: lifecycle transitions and patches at
//! `debug`, the fallbacks for unhandled warnings and callback errors at
//! `warn`/`error`. These helpers install a `tracing-subscriber` formatter
//! for applications that do not bring their own subscriber.

use tracing::Level;

/// Install the default formatter. Later calls are ignored.
pub fn init() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// Install a formatter capped at `level`. Later calls are ignored.
pub fn init_with_level(level: Level) {
    let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_with_level(Level::DEBUG);
        init();
        init_with_level(Level::WARN);
        tracing::debug!("still logging");
    }
}
