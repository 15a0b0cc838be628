//! Generic test suites shared by the integration tests of both crates.
//!
//! Each suite is a plain function generic over the container (and therefore
//! over its `Guard`), so `tests/` files only pick the concrete types.

pub mod channel_tests;
pub mod fault;
pub mod stress;
