//! Property-based tests for retry scheduling and queue bounds.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use proptest::prelude::*;
use stagecast_delivery::{DeliveryError, DeliveryQueue, RetryDecision, RetryPolicy};
use stagecast_testing::EventBuilder;

fn retryable_error() -> impl Strategy<Value = DeliveryError> {
    prop_oneof![
        "[a-z ]{1,20}".prop_map(DeliveryError::network),
        (1u64..120).prop_map(DeliveryError::timeout),
        (300u16..600).prop_map(DeliveryError::unexpected_status),
    ]
}

proptest! {
    /// The policy allows exactly R retries, each waiting twice the last.
    #[test]
    fn schedule_doubles_and_stops_after_max_retries(
        max_retries in 0u32..8,
        initial_secs in 1u64..10,
        error in retryable_error(),
    ) {
        let policy = RetryPolicy {
            max_retries,
            initial_delay: Duration::from_secs(initial_secs),
        };

        let mut delays = Vec::new();
        let mut attempts = 1;
        while let RetryDecision::Retry { delay } = policy.decide(attempts, &error) {
            delays.push(delay);
            attempts += 1;
        }

        prop_assert_eq!(attempts, max_retries + 1);
        prop_assert_eq!(delays.len(), max_retries as usize);
        for (k, delay) in delays.iter().enumerate() {
            prop_assert_eq!(*delay, Duration::from_secs(initial_secs << k));
        }

        let total: Duration = delays.iter().sum();
        let expected = initial_secs * ((1u64 << max_retries) - 1);
        prop_assert_eq!(total, Duration::from_secs(expected));
    }

    /// Occupancy never exceeds capacity and every refusal happens when full.
    #[test]
    fn queue_occupancy_stays_within_capacity(
        capacity in 1usize..32,
        offers in 0usize..64,
    ) {
        let queue = DeliveryQueue::new(capacity);

        for i in 0..offers {
            let was_full = queue.len() == capacity;
            let accepted = queue.enqueue(EventBuilder::new().node(i.to_string()).start());

            prop_assert_eq!(accepted, !was_full);
            prop_assert!(queue.len() <= capacity);
        }

        prop_assert_eq!(queue.len(), offers.min(capacity));
    }
}
