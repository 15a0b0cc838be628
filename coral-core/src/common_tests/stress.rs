//! Barrier-started multi-actor runner for stress scenarios.

use std::sync::{Arc, Barrier};
use std::thread;

/// A body run by `actors` threads, `iters` times each.
pub struct Operation {
    runner: Arc<dyn Fn(usize) + Send + Sync>,
    actors: usize,
}

impl Operation {
    /// `runner` receives the actor index (unique per operation).
    pub fn new<F>(actors: usize, runner: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        Operation {
            runner: Arc::new(runner),
            actors,
        }
    }
}

/// Run every operation's actors at once and wait for all of them.
///
/// All threads block on a shared barrier before their first iteration so the
/// operations overlap as much as possible. A panic in any actor fails the
/// calling test.
pub fn stress(iters: usize, operations: Vec<Operation>) {
    let total: usize = operations.iter().map(|op| op.actors).sum();
    let start = Arc::new(Barrier::new(total));

    let handles: Vec<_> = operations
        .iter()
        .flat_map(|op| (0..op.actors).map(move |actor| (Arc::clone(&op.runner), actor)))
        .map(|(runner, actor)| {
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    runner(actor);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_every_actor_runs_every_iteration() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&calls);
        let b = Arc::clone(&calls);

        stress(
            10,
            vec![
                Operation::new(3, move |_| {
                    a.fetch_add(1, Ordering::Relaxed);
                }),
                Operation::new(2, move |_| {
                    b.fetch_add(100, Ordering::Relaxed);
                }),
            ],
        );

        assert_eq!(calls.load(Ordering::Relaxed), 3 * 10 + 2 * 10 * 100);
    }

    #[test]
    #[should_panic]
    fn test_actor_panic_propagates() {
        stress(1, vec![Operation::new(2, |actor| assert_ne!(actor, 1))]);
    }
}
