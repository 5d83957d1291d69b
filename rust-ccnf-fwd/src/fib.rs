//! Forwarding Information Base.
//!
//! A hash table keyed by name prefix. Lookup probes prefixes of the target
//! name from longest to shortest, using the name's memoized cumulative
//! hashes, so each probe is O(1) and a lookup is O(name depth). The default
//! route is the empty prefix and only wins when nothing longer matches.

use crate::strategy::{RttEstimate, StrategyTag};
use log::debug;
use rust_ccnf_common::{name::Name, types::ConnId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextHop {
    pub conn: ConnId,
    pub cost: u8,
}

#[derive(Debug, Default)]
pub struct FibEntry {
    // Sorted by connection id; no duplicates.
    nexthops: Vec<NextHop>,
    strategy: StrategyTag,
    rtt: HashMap<ConnId, RttEstimate>,
}

impl FibEntry {
    pub fn next_hops(&self) -> &[NextHop] {
        &self.nexthops
    }

    pub fn strategy(&self) -> StrategyTag {
        self.strategy
    }

    pub fn rtt_state(&self) -> &HashMap<ConnId, RttEstimate> {
        &self.rtt
    }

    pub fn rtt_state_mut(&mut self) -> &mut HashMap<ConnId, RttEstimate> {
        &mut self.rtt
    }
}

#[derive(Debug, Default)]
pub struct Fib {
    entries: HashMap<Name, FibEntry>,
    // Deepest installed prefix; lookups never probe deeper than this.
    max_depth: usize,
}

impl Fib {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `next_hop` under `prefix`. Adding a next hop that is already
    /// present refreshes its cost but is otherwise a no-op; `strategy`
    /// replaces the entry's strategy when given.
    pub fn add(&mut self, prefix: Name, next_hop: ConnId, cost: u8, strategy: Option<StrategyTag>) {
        let depth = prefix.segment_count();
        let entry = self.entries.entry(prefix).or_default();
        if let Some(tag) = strategy {
            entry.strategy = tag;
        }
        match entry.nexthops.binary_search_by_key(&next_hop, |h| h.conn) {
            Ok(i) => entry.nexthops[i].cost = cost,
            Err(i) => entry.nexthops.insert(i, NextHop { conn: next_hop, cost }),
        }
        self.max_depth = self.max_depth.max(depth);
    }

    /// Removes one next hop; the entry disappears with its last next hop.
    /// Returns `false` when the route was not installed.
    pub fn remove(&mut self, prefix: &Name, next_hop: ConnId) -> bool {
        let Some(entry) = self.entries.get_mut(prefix) else {
            return false;
        };
        let Ok(i) = entry.nexthops.binary_search_by_key(&next_hop, |h| h.conn) else {
            return false;
        };
        entry.nexthops.remove(i);
        entry.rtt.remove(&next_hop);
        if entry.nexthops.is_empty() {
            self.entries.remove(prefix);
            self.recompute_depth();
            debug!("route {} removed (last next hop gone)", prefix);
        }
        true
    }

    /// Longest-prefix match. Returns the matched prefix (sharing the segment
    /// storage of `name`) together with its entry; falls back to the default
    /// route when no proper prefix matches.
    pub fn lookup(&self, name: &Name) -> Option<(Name, &FibEntry)> {
        let start = name.segment_count().min(self.max_depth);
        for k in (0..=start).rev() {
            let prefix = name.slice(k);
            if let Some(entry) = self.entries.get(&prefix) {
                return Some((prefix, entry));
            }
        }
        None
    }

    pub fn get_mut(&mut self, prefix: &Name) -> Option<&mut FibEntry> {
        self.entries.get_mut(prefix)
    }

    /// Strips `id` out of every next-hop set; entries left empty disappear.
    pub fn remove_connection(&mut self, id: ConnId) {
        let emptied: Vec<Name> = self
            .entries
            .iter_mut()
            .filter_map(|(prefix, entry)| {
                if let Ok(i) = entry.nexthops.binary_search_by_key(&id, |h| h.conn) {
                    entry.nexthops.remove(i);
                    entry.rtt.remove(&id);
                }
                entry.nexthops.is_empty().then(|| prefix.clone())
            })
            .collect();
        for prefix in &emptied {
            self.entries.remove(prefix);
        }
        if !emptied.is_empty() {
            self.recompute_depth();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Name, &FibEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn recompute_depth(&mut self) {
        self.max_depth = self
            .entries
            .keys()
            .map(Name::segment_count)
            .max()
            .unwrap_or(0);
    }

    #[cfg(test)]
    pub(crate) fn take_entry(&mut self, prefix: &Name) -> Option<FibEntry> {
        let entry = self.entries.remove(prefix);
        self.recompute_depth();
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(uri: &str) -> Name {
        Name::from_uri(uri).unwrap()
    }

    #[test]
    fn longest_prefix_wins() {
        let mut fib = Fib::new();
        fib.add(name("/a"), ConnId(1), 1, None);
        fib.add(name("/a/b"), ConnId(2), 1, None);
        fib.add(name("/a/b/c"), ConnId(3), 1, None);

        let target = name("/a/b/c/d/e");
        let (prefix, entry) = fib.lookup(&target).unwrap();
        assert_eq!(prefix, name("/a/b/c"));
        assert_eq!(entry.next_hops()[0].conn, ConnId(3));

        let (prefix, _) = fib.lookup(&name("/a/x")).unwrap();
        assert_eq!(prefix, name("/a"));
    }

    #[test]
    fn default_route_is_terminal_fallback() {
        let mut fib = Fib::new();
        assert!(fib.lookup(&name("/q")).is_none());

        fib.add(Name::root(), ConnId(9), 1, None);
        let (prefix, entry) = fib.lookup(&name("/q")).unwrap();
        assert!(prefix.is_root());
        assert_eq!(entry.next_hops()[0].conn, ConnId(9));

        // A longer prefix still beats the default route.
        fib.add(name("/q"), ConnId(4), 1, None);
        let (prefix, _) = fib.lookup(&name("/q/r")).unwrap();
        assert_eq!(prefix, name("/q"));
    }

    #[test]
    fn add_is_idempotent_per_next_hop() {
        let mut fib = Fib::new();
        fib.add(name("/a"), ConnId(1), 1, None);
        fib.add(name("/a"), ConnId(1), 5, None);
        let (_, entry) = fib.lookup(&name("/a")).unwrap();
        assert_eq!(entry.next_hops().len(), 1);
        assert_eq!(entry.next_hops()[0].cost, 5);
    }

    #[test]
    fn removing_last_next_hop_deletes_entry() {
        let mut fib = Fib::new();
        fib.add(name("/a/b"), ConnId(1), 1, None);
        fib.add(name("/a/b"), ConnId(2), 1, None);
        assert!(fib.remove(&name("/a/b"), ConnId(1)));
        assert!(fib.lookup(&name("/a/b")).is_some());
        assert!(fib.remove(&name("/a/b"), ConnId(2)));
        assert!(fib.lookup(&name("/a/b")).is_none());
        assert!(fib.is_empty());
        assert!(!fib.remove(&name("/a/b"), ConnId(2)));
    }

    #[test]
    fn connection_teardown_purges_next_hops() {
        let mut fib = Fib::new();
        fib.add(name("/a"), ConnId(1), 1, None);
        fib.add(name("/a"), ConnId(2), 1, None);
        fib.add(name("/b/c"), ConnId(1), 1, None);

        fib.remove_connection(ConnId(1));

        let (_, entry) = fib.lookup(&name("/a")).unwrap();
        assert_eq!(entry.next_hops().len(), 1);
        assert_eq!(entry.next_hops()[0].conn, ConnId(2));
        assert!(fib.lookup(&name("/b/c")).is_none());
        // Depth shrank with the removed /b/c entry.
        assert_eq!(fib.max_depth, 1);
    }
}
