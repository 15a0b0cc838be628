use std::sync::Arc;

use coral_core::common_tests::fault::FaultInjector;
use coral_core::common_tests::ordered_set_tests::*;
use coral_core::{DeferredGuard, SkipList};
use serial_test::serial;
use tracing_subscriber::EnvFilter;

type DeferredSkipList = SkipList<i64, DeferredGuard>;

/// `RUST_LOG=coral_core=trace` shows link races and waits on towers.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn faults() -> Arc<FaultInjector> {
    Arc::new(FaultInjector::new(0xC0FFEE, 0.1))
}

#[test]
fn test_basic() {
    test_basic_operations(&DeferredSkipList::new());
}

#[test]
fn test_basic_single_level() {
    test_basic_operations(&DeferredSkipList::with_max_level(1).unwrap());
}

#[test]
fn test_order() {
    test_iteration_order::<DeferredSkipList>();
}

#[test]
#[serial(stress_tests)]
fn stress_lookup_lookup() {
    init_tracing();
    test_lookup_lookup::<DeferredSkipList>(200);
}

#[test]
#[serial(stress_tests)]
fn stress_insert_insert() {
    init_tracing();
    test_insert_insert::<DeferredSkipList>(50);
}

#[test]
#[serial(stress_tests)]
fn stress_insert_lookup() {
    init_tracing();
    test_insert_lookup::<DeferredSkipList>(50, faults());
}

#[test]
#[serial(stress_tests)]
fn stress_delete_delete() {
    init_tracing();
    test_delete_delete::<DeferredSkipList>(50);
}

#[test]
#[serial(stress_tests)]
fn stress_delete_lookup() {
    init_tracing();
    test_delete_lookup::<DeferredSkipList>(50, faults());
}

#[test]
#[serial(stress_tests)]
fn stress_insert_delete() {
    init_tracing();
    test_insert_delete::<DeferredSkipList>(200, faults());
}

#[test]
#[serial(stress_tests)]
fn stress_delete_insert() {
    init_tracing();
    test_delete_insert::<DeferredSkipList>(200, faults());
}

#[test]
#[serial(stress_tests)]
fn stress_concurrent_delete_same_value() {
    init_tracing();
    for _ in 0..20 {
        test_concurrent_delete_same_value::<DeferredSkipList>();
    }
}

#[test]
#[serial(stress_tests)]
fn stress_lookup_during_modifications() {
    init_tracing();
    test_lookup_during_modifications::<DeferredSkipList>(20);
}
