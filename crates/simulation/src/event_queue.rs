//! Deterministic event ordering.

use cascade_core::EventPriority;
use std::time::Duration;

/// Total order over queued events: time, then priority, then insertion
/// sequence. Two runs with the same seed produce the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub time: Duration,
    pub priority: EventPriority,
    pub sequence: u64,
}

impl EventKey {
    pub fn new(time: Duration, priority: EventPriority, sequence: u64) -> Self {
        EventKey {
            time,
            priority,
            sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_time_then_priority_then_sequence() {
        let early = EventKey::new(Duration::from_millis(1), EventPriority::Network, 9);
        let late = EventKey::new(Duration::from_millis(2), EventPriority::Internal, 0);
        assert!(early < late);

        let internal = EventKey::new(Duration::from_millis(2), EventPriority::Internal, 5);
        let network = EventKey::new(Duration::from_millis(2), EventPriority::Network, 1);
        assert!(internal < network);

        let first = EventKey::new(Duration::from_millis(2), EventPriority::Network, 1);
        let second = EventKey::new(Duration::from_millis(2), EventPriority::Network, 2);
        assert!(first < second);
    }
}
