//! Chaos testing utilities: injected write failures, dropped echoes, delays.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Fault injector for transports under test.
///
/// Uses a `StdRng` so a monkey can live inside a `Send` transport, and so a
/// failing run can be replayed with [`ChaosMonkey::with_seed`].
///
/// # Example
///
/// ```
/// use tally_ws_test_support::ChaosMonkey;
///
/// let mut monkey = ChaosMonkey::new()
///     .with_seed(7)
///     .with_write_failure_probability(0.1);
///
/// let failures = (0..100).filter(|_| monkey.should_fail_write()).count();
/// assert!(failures < 100);
/// ```
pub struct ChaosMonkey {
    delay_probability: f64,
    delay_min_us: u64,
    delay_max_us: u64,
    write_failure_probability: f64,
    drop_probability: f64,
    rng: StdRng,
    events_triggered: usize,
}

impl Default for ChaosMonkey {
    fn default() -> Self {
        Self::new()
    }
}

impl ChaosMonkey {
    pub fn new() -> Self {
        Self {
            delay_probability: 0.0,
            delay_min_us: 100,
            delay_max_us: 2_000,
            write_failure_probability: 0.0,
            drop_probability: 0.0,
            rng: StdRng::from_entropy(),
            events_triggered: 0,
        }
    }

    /// Frequent failures, for stress runs.
    pub fn aggressive() -> Self {
        Self::new()
            .with_delay_probability(0.05)
            .with_write_failure_probability(0.1)
            .with_drop_probability(0.05)
    }

    pub fn mild() -> Self {
        Self::new()
            .with_delay_probability(0.01)
            .with_write_failure_probability(0.01)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn with_delay_probability(mut self, prob: f64) -> Self {
        self.delay_probability = prob.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay_range(mut self, min_us: u64, max_us: u64) -> Self {
        self.delay_min_us = min_us;
        self.delay_max_us = max_us.max(min_us);
        self
    }

    pub fn with_write_failure_probability(mut self, prob: f64) -> Self {
        self.write_failure_probability = prob.clamp(0.0, 1.0);
        self
    }

    pub fn with_drop_probability(mut self, prob: f64) -> Self {
        self.drop_probability = prob.clamp(0.0, 1.0);
        self
    }

    /// Maybe sleep for a random delay.
    pub fn maybe_delay(&mut self) {
        if self.rng.gen::<f64>() < self.delay_probability {
            let delay_us = self.rng.gen_range(self.delay_min_us..=self.delay_max_us);
            std::thread::sleep(Duration::from_micros(delay_us));
            self.events_triggered += 1;
        }
    }

    pub fn should_fail_write(&mut self) -> bool {
        self.roll(self.write_failure_probability)
    }

    pub fn should_drop(&mut self) -> bool {
        self.roll(self.drop_probability)
    }

    fn roll(&mut self, probability: f64) -> bool {
        let hit = self.rng.gen::<f64>() < probability;
        if hit {
            self.events_triggered += 1;
        }
        hit
    }

    pub fn events_triggered(&self) -> usize {
        self.events_triggered
    }

    pub fn reset_stats(&mut self) {
        self.events_triggered = 0;
    }
}
