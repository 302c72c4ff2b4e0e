//! Backoff tests - Property-based tests for the reconnect schedule

use proptest::prelude::*;
use std::time::Duration;

use crate::connection::Backoff;

proptest! {
    /// The delay never exceeds the configured maximum and never drops below
    /// the base (when the base itself is within the maximum).
    #[test]
    fn prop_delay_is_bounded(
        base in 1u64..5_000,
        extra in 0u64..60_000,
        failures in 0u32..200,
    ) {
        let max = base + extra;
        let backoff = Backoff::new(Duration::from_millis(base), Duration::from_millis(max), 10);
        let delay = backoff.delay_for(failures).as_millis() as u64;

        prop_assert!(delay <= max);
        prop_assert!(delay >= base);
    }

    /// Delays never shrink as failures accumulate.
    #[test]
    fn prop_delay_is_monotonic(
        base in 1u64..5_000,
        max in 1u64..120_000,
        failures in 1u32..100,
    ) {
        let backoff = Backoff::new(Duration::from_millis(base), Duration::from_millis(max), 0);
        prop_assert!(backoff.delay_for(failures) <= backoff.delay_for(failures + 1));
    }

    /// Below the cap the delay doubles exactly.
    #[test]
    fn prop_delay_doubles_below_cap(base in 1u64..1_000, failures in 1u32..10) {
        let backoff = Backoff::new(
            Duration::from_millis(base),
            Duration::from_millis(u64::MAX / 4),
            0,
        );
        prop_assert_eq!(
            backoff.delay_for(failures + 1),
            backoff.delay_for(failures) * 2
        );
    }

    /// A bound of zero retries forever; otherwise retries stop strictly after
    /// the bound.
    #[test]
    fn prop_retry_bound(max_attempts in 0u32..50, failures in 0u32..100) {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), max_attempts);
        let expected = max_attempts == 0 || failures <= max_attempts;
        prop_assert_eq!(backoff.should_retry(failures), expected);
    }
}

#[test]
fn test_default_schedule() {
    let backoff = Backoff::default();
    let delays: Vec<u64> = (1..=6)
        .map(|n| backoff.delay_for(n).as_millis() as u64)
        .collect();
    assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 10_000, 10_000]);
    assert_eq!(backoff.delay_for(0), backoff.delay_for(1));
}
