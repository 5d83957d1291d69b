//! Forwarder counters.
//!
//! Counters are plain cells, not atomics: every increment happens on the
//! reactor thread that owns the forwarding tables, so there is nothing to
//! synchronize. The `stats` control command reads them through `snapshot`.

use std::cell::Cell;

#[derive(Debug, Default)]
pub struct Counter {
    value: Cell<u64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.value.set(self.value.get() + 1);
    }

    pub fn add(&self, value: u64) {
        self.value.set(self.value.get() + value);
    }

    pub fn value(&self) -> u64 {
        self.value.get()
    }

    pub fn reset(&self) {
        self.value.set(0);
    }
}

/// Aggregate counters for the forwarding engine.
#[derive(Debug, Default)]
pub struct ForwarderMetrics {
    // Packet path
    pub interests_received: Counter,
    pub objects_received: Counter,
    pub interest_returns_received: Counter,
    pub control_received: Counter,
    pub interests_forwarded: Counter,
    pub objects_forwarded: Counter,
    pub interest_returns_sent: Counter,

    // Drop causes
    pub malformed_packets: Counter,
    pub hop_limit_exceeded: Counter,
    pub unsolicited_objects: Counter,
    pub send_would_block: Counter,

    // PIT
    pub pit_created: Counter,
    pub pit_aggregated: Counter,
    pub pit_satisfied: Counter,
    pub pit_expired: Counter,
    pub pit_full: Counter,

    // FIB
    pub fib_misses: Counter,
}

impl ForwarderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("interests_received", self.interests_received.value()),
            ("objects_received", self.objects_received.value()),
            ("interest_returns_received", self.interest_returns_received.value()),
            ("control_received", self.control_received.value()),
            ("interests_forwarded", self.interests_forwarded.value()),
            ("objects_forwarded", self.objects_forwarded.value()),
            ("interest_returns_sent", self.interest_returns_sent.value()),
            ("malformed_packets", self.malformed_packets.value()),
            ("hop_limit_exceeded", self.hop_limit_exceeded.value()),
            ("unsolicited_objects", self.unsolicited_objects.value()),
            ("send_would_block", self.send_would_block.value()),
            ("pit_created", self.pit_created.value()),
            ("pit_aggregated", self.pit_aggregated.value()),
            ("pit_satisfied", self.pit_satisfied.value()),
            ("pit_expired", self.pit_expired.value()),
            ("pit_full", self.pit_full.value()),
            ("fib_misses", self.fib_misses.value()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_accumulates() {
        let c = Counter::new();
        c.increment();
        c.add(4);
        assert_eq!(c.value(), 5);
        c.reset();
        assert_eq!(c.value(), 0);
    }

    #[test]
    fn snapshot_reflects_increments() {
        let m = ForwarderMetrics::new();
        m.interests_received.increment();
        let snap = m.snapshot();
        assert_eq!(
            snap.iter().find(|(k, _)| *k == "interests_received"),
            Some(&("interests_received", 1))
        );
    }
}
