//! Seeded scheduling perturbation for stress tests.

use std::sync::Mutex;
use std::thread;

/// Injects random yields between container operations so stress runs
/// explore more interleavings than the OS scheduler produces on its own.
///
/// The random stream is seeded, so a failing run can be replayed with the
/// same seed (thread interleaving itself stays nondeterministic).
pub struct FaultInjector {
    rng: Mutex<fastrand::Rng>,
    probability: Mutex<f64>,
}

impl FaultInjector {
    pub fn new(seed: u64, probability: f64) -> Self {
        FaultInjector {
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
            probability: Mutex::new(probability.clamp(0.0, 1.0)),
        }
    }

    /// An injector that never fires.
    pub fn disabled() -> Self {
        Self::new(0, 0.0)
    }

    pub fn set_fault_probability(&self, probability: f64) {
        *self
            .probability
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = probability.clamp(0.0, 1.0);
    }

    /// Returns true with the configured probability.
    pub fn fault(&self) -> bool {
        let threshold = *self
            .probability
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if threshold <= 0.0 {
            return false;
        }
        self.rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .f64()
            < threshold
    }

    /// Yield the current thread if a fault fires.
    pub fn maybe_yield(&self) {
        if self.fault() {
            thread::yield_now();
        }
    }
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_fires() {
        let faults = FaultInjector::disabled();
        assert!((0..1_000).all(|_| !faults.fault()));
    }

    #[test]
    fn test_always_fires() {
        let faults = FaultInjector::new(7, 1.0);
        assert!((0..1_000).all(|_| faults.fault()));
    }

    #[test]
    fn test_same_seed_same_stream() {
        let a = FaultInjector::new(42, 0.5);
        let b = FaultInjector::new(42, 0.5);
        let xs: Vec<bool> = (0..64).map(|_| a.fault()).collect();
        let ys: Vec<bool> = (0..64).map(|_| b.fault()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_probability_is_adjustable() {
        let faults = FaultInjector::new(1, 0.0);
        assert!(!faults.fault());
        faults.set_fault_probability(1.0);
        assert!(faults.fault());
    }
}
