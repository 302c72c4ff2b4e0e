//! Test module for dashboard-sync
//!
//! This module contains property-based tests using proptest
//! to validate correctness properties of the synchronization client.

#[cfg(test)]
pub mod backoff_tests;
