//! Airtime budget for the shared radio using the governor crate
//!
//! BLE advertising slots are scarce. Routine frames draw from a per-second
//! budget; emergency frames are sent regardless and never consume it.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Frame rate limiter for outbound transmissions
#[derive(Clone, Default)]
pub struct AirtimeLimiter {
    /// `None` means unlimited
    frames: Option<Arc<DirectLimiter>>,
}

impl AirtimeLimiter {
    /// # Arguments
    /// * `frames_per_second` - Sustained frame budget (0 = unlimited)
    /// * `burst` - Frames allowed back to back (0 = same as the rate)
    pub fn new(frames_per_second: u32, burst: u32) -> Self {
        let frames = NonZeroU32::new(frames_per_second).map(|rate| {
            let burst = NonZeroU32::new(burst).unwrap_or(rate);
            Arc::new(RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)))
        });
        Self { frames }
    }

    pub fn unlimited() -> Self {
        Self { frames: None }
    }

    /// Take one frame of budget if available
    pub fn try_acquire(&self) -> bool {
        match &self.frames {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.frames.is_some()
    }
}

impl std::fmt::Debug for AirtimeLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirtimeLimiter")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_refuses() {
        let limiter = AirtimeLimiter::unlimited();
        assert!(!limiter.is_enabled());
        assert!((0..1000).all(|_| limiter.try_acquire()));
        assert!(AirtimeLimiter::new(0, 5).try_acquire());
    }

    #[test]
    fn test_burst_then_refused() {
        let limiter = AirtimeLimiter::new(1, 2);
        assert!(limiter.is_enabled());

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
