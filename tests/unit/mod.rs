//! Integration test umbrella, one module per subsystem.

mod invariant_props;
mod recovery_tests;
mod ring_tests;
mod wal_tests;
