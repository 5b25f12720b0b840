//! Production environment: system time and OS randomness.

use std::time::Duration;

use weir_core::env::Environment;

/// Production [`Environment`] backed by the OS.
///
/// Monotonic time is `std::time::Instant`, sleeping is tokio's timer, and
/// randomness comes from the OS entropy source via getrandom.
///
/// # Panics
///
/// Panics if the OS RNG fails. A gateway that cannot obtain entropy cannot
/// produce collision-free record names; refusing to run is the safe failure.
#[derive(Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }

    #[allow(clippy::disallowed_methods)]
    #[allow(clippy::expect_used)]
    fn wall_clock_nanos(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("invariant: system clock is after the Unix epoch")
            .as_nanos() as u64
    }
}
