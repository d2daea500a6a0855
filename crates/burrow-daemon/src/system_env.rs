//! Production [`Environment`] backed by the operating system.
//!
//! Wall clock comes from `SystemTime`, randomness from getrandom. Nothing
//! here is reproducible; tests use `MockEnv` instead.

use burrow_core::Environment;

/// Environment using the system clock and OS randomness.
///
/// # Panics
///
/// Panics if the OS RNG fails. A worker without working randomness would
/// produce predictable nonces and keys, so there is nothing to fall back to.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::disallowed_methods)]
    #[allow(clippy::expect_used)]
    fn wall_clock_millis(&self) -> u64 {
        let elapsed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after Unix epoch (1970-01-01)");
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - worker cannot operate securely");
    }
}
