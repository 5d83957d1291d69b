//! Pending Interest Table.
//!
//! Entries are keyed by fingerprint: the name plus whichever restrictions
//! the Interest carried. Besides the primary map the table keeps an index
//! per ingress connection (for teardown) and an ordered expiry index (for
//! the sweep), all maintained together. The reverse-path set of a live
//! entry is never empty, and its deadline only tightens as Interests
//! aggregate.

use bytes::Bytes;
use log::debug;
use rust_ccnf_common::{
    message::{MessageView, MsgRef},
    name::Name,
    types::{ms_to_ticks, ConnId, Tick},
};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Key under which a pending Interest is aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    name: Name,
    keyid: Option<Bytes>,
    objhash: Option<Bytes>,
}

impl Fingerprint {
    pub fn of_interest(msg: &MessageView) -> Option<Self> {
        Some(Self {
            name: msg.name()?.clone(),
            keyid: msg.keyid_restriction().cloned(),
            objhash: msg.object_hash_restriction().cloned(),
        })
    }

    pub fn name(&self) -> &Name {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new entry was created; the Interest must be forwarded.
    Created,
    /// Folded into an existing entry; nothing further to do.
    Aggregated,
    /// The table is at capacity; the Interest is refused.
    Full,
}

/// What became of a pending entry after an upstream refusal.
#[derive(Debug)]
pub enum ReturnDisposition {
    /// No entry matches, or the refusing hop was never sent this Interest.
    Unknown,
    /// Other egresses may still answer; the entry stays.
    StillPending { prefix: Name },
    /// That was the last outstanding egress; the entry is gone.
    Abandoned { prefix: Name, entry: PitEntry },
}

/// Where the Interest was sent once the FIB and strategy decided.
#[derive(Debug, Clone)]
pub struct ForwardRecord {
    pub prefix: Name,
    pub egress: Vec<ConnId>,
    pub sent_at: Tick,
}

#[derive(Debug)]
pub struct PitEntry {
    /// Reverse path: every connection still waiting for the object.
    pub ingress: Vec<ConnId>,
    pub created: Tick,
    pub expiry: Tick,
    pub msg: MsgRef,
    pub forwarded: Option<ForwardRecord>,
    seq: u64,
}

#[derive(Debug)]
pub struct Pit {
    entries: HashMap<Fingerprint, PitEntry>,
    by_ingress: HashMap<ConnId, HashSet<Fingerprint>>,
    by_expiry: BTreeMap<(Tick, u64), Fingerprint>,
    // Number of live entries carrying an object-hash restriction; while
    // zero, received objects are never hashed.
    hash_restricted: usize,
    capacity: usize,
    tick_ms: u64,
    default_lifetime_ticks: u64,
    max_lifetime_ticks: u64,
    seq: u64,
}

impl Pit {
    pub fn new(
        capacity: usize,
        tick_ms: u64,
        default_lifetime_ms: u64,
        max_lifetime_ms: u64,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            by_ingress: HashMap::new(),
            by_expiry: BTreeMap::new(),
            hash_restricted: 0,
            capacity,
            tick_ms,
            default_lifetime_ticks: ms_to_ticks(default_lifetime_ms, tick_ms),
            max_lifetime_ticks: ms_to_ticks(max_lifetime_ms, tick_ms),
            seq: 0,
        }
    }

    /// Aggregates `msg` into an existing entry or creates a fresh one. An
    /// existing entry whose deadline has already passed is purged first, so
    /// the caller sees `Created` and forwards again.
    pub fn insert_or_aggregate(&mut self, msg: &MsgRef, now: Tick) -> InsertOutcome {
        let Some(fp) = Fingerprint::of_interest(msg) else {
            return InsertOutcome::Full;
        };
        let deadline = now + self.lifetime_ticks(msg);

        let mut aggregated = false;
        let mut new_ingress = false;
        let mut reindex = None;
        let mut lapsed = false;
        if let Some(entry) = self.entries.get_mut(&fp) {
            if entry.expiry > now {
                aggregated = true;
                let ingress = msg.ingress_id();
                if !entry.ingress.contains(&ingress) {
                    entry.ingress.push(ingress);
                    new_ingress = true;
                }
                // A repeated ingress leaves the set unchanged, but the
                // deadline still tightens.
                if deadline < entry.expiry {
                    reindex = Some((entry.expiry, entry.seq));
                    entry.expiry = deadline;
                }
            } else {
                lapsed = true;
            }
        }
        if aggregated {
            if new_ingress {
                self.by_ingress
                    .entry(msg.ingress_id())
                    .or_default()
                    .insert(fp.clone());
            }
            if let Some((old_expiry, seq)) = reindex {
                self.by_expiry.remove(&(old_expiry, seq));
                self.by_expiry.insert((deadline, seq), fp);
            }
            return InsertOutcome::Aggregated;
        }
        if lapsed {
            // Lapsed but not yet swept: replace it.
            self.detach(&fp);
        }

        if self.entries.len() >= self.capacity {
            return InsertOutcome::Full;
        }

        self.seq += 1;
        let seq = self.seq;
        self.by_expiry.insert((deadline, seq), fp.clone());
        self.by_ingress
            .entry(msg.ingress_id())
            .or_default()
            .insert(fp.clone());
        if fp.objhash.is_some() {
            self.hash_restricted += 1;
        }
        self.entries.insert(
            fp,
            PitEntry {
                ingress: vec![msg.ingress_id()],
                created: now,
                expiry: deadline,
                msg: msg.clone(),
                forwarded: None,
                seq,
            },
        );
        InsertOutcome::Created
    }

    /// Records where the Interest went, for strategy feedback later.
    pub fn note_forwarded(
        &mut self,
        msg: &MessageView,
        prefix: Name,
        egress: Vec<ConnId>,
        now: Tick,
    ) {
        let Some(fp) = Fingerprint::of_interest(msg) else {
            return;
        };
        if let Some(entry) = self.entries.get_mut(&fp) {
            entry.forwarded = Some(ForwardRecord {
                prefix,
                egress,
                sent_at: now,
            });
        }
    }

    /// Removes the entry for this exact Interest, if any. Used when the
    /// Interest was answered from the cache or could not be forwarded.
    pub fn remove_interest(&mut self, msg: &MessageView) -> Option<PitEntry> {
        let fp = Fingerprint::of_interest(msg)?;
        self.detach(&fp)
    }

    /// Records that `from` refused the Interest (sent an InterestReturn
    /// back). While other egresses are still outstanding the entry stays;
    /// when the last one gives up, the entry is removed and returned so the
    /// refusal can be propagated along the reverse paths.
    pub fn interest_returned(&mut self, msg: &MessageView, from: ConnId) -> ReturnDisposition {
        let Some(fp) = Fingerprint::of_interest(msg) else {
            return ReturnDisposition::Unknown;
        };
        let Some(entry) = self.entries.get_mut(&fp) else {
            return ReturnDisposition::Unknown;
        };
        let Some(record) = entry.forwarded.as_mut() else {
            // Nothing was sent out, so nothing can legitimately return.
            return ReturnDisposition::Unknown;
        };
        if !record.egress.contains(&from) {
            return ReturnDisposition::Unknown;
        }
        record.egress.retain(|&c| c != from);
        let prefix = record.prefix.clone();
        if record.egress.is_empty() {
            match self.detach(&fp) {
                Some(entry) => ReturnDisposition::Abandoned { prefix, entry },
                None => ReturnDisposition::Unknown,
            }
        } else {
            ReturnDisposition::StillPending { prefix }
        }
    }

    /// Removes and returns every entry the object satisfies. An object
    /// matches an entry when the names are equal and each restriction the
    /// entry carries equals the object's corresponding attribute (on a
    /// Content Object, field 0x0001 is its KeyId).
    pub fn satisfy(&mut self, obj: &MessageView) -> Vec<PitEntry> {
        let Some(name) = obj.name() else {
            return Vec::new();
        };
        let keyid = obj.keyid_restriction().cloned();

        let mut probes: Vec<Fingerprint> = Vec::with_capacity(4);
        probes.push(Fingerprint {
            name: name.clone(),
            keyid: None,
            objhash: None,
        });
        if keyid.is_some() {
            probes.push(Fingerprint {
                name: name.clone(),
                keyid: keyid.clone(),
                objhash: None,
            });
        }
        if self.hash_restricted > 0 {
            let hash = Some(obj.object_hash().clone());
            probes.push(Fingerprint {
                name: name.clone(),
                keyid: None,
                objhash: hash.clone(),
            });
            if keyid.is_some() {
                probes.push(Fingerprint {
                    name: name.clone(),
                    keyid,
                    objhash: hash,
                });
            }
        }

        probes.iter().filter_map(|fp| self.detach(fp)).collect()
    }

    /// Expires every entry whose deadline has passed and returns them for
    /// timeout feedback.
    pub fn tick(&mut self, now: Tick) -> Vec<PitEntry> {
        let mut expired = Vec::new();
        while let Some((&(deadline, _), fp)) = self.by_expiry.first_key_value() {
            if deadline > now {
                break;
            }
            let fp = fp.clone();
            if let Some(entry) = self.detach(&fp) {
                debug!("pit entry {} expired at tick {}", fp.name, now);
                expired.push(entry);
            }
        }
        expired
    }

    /// Drops `id` from every reverse-path set; entries for which it was the
    /// sole remaining ingress are deleted. Returns the number of entries
    /// deleted outright.
    pub fn remove_connection(&mut self, id: ConnId) -> usize {
        let Some(fps) = self.by_ingress.remove(&id) else {
            return 0;
        };
        let mut deleted = 0;
        for fp in fps {
            let Some(entry) = self.entries.get_mut(&fp) else {
                continue;
            };
            entry.ingress.retain(|&c| c != id);
            if entry.ingress.is_empty() {
                let seq = entry.seq;
                let expiry = entry.expiry;
                let objhash = fp.objhash.is_some();
                self.entries.remove(&fp);
                self.by_expiry.remove(&(expiry, seq));
                if objhash {
                    self.hash_restricted -= 1;
                }
                deleted += 1;
            }
        }
        deleted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lifetime_ticks(&self, msg: &MessageView) -> u64 {
        let ticks = match msg.lifetime_ms() {
            Some(ms) => ms_to_ticks(ms, self.tick_ms),
            None => self.default_lifetime_ticks,
        };
        ticks.min(self.max_lifetime_ticks)
    }

    /// Unlinks one entry from every index and returns it.
    fn detach(&mut self, fp: &Fingerprint) -> Option<PitEntry> {
        let entry = self.entries.remove(fp)?;
        self.by_expiry.remove(&(entry.expiry, entry.seq));
        for ingress in &entry.ingress {
            if let Some(set) = self.by_ingress.get_mut(ingress) {
                set.remove(fp);
                if set.is_empty() {
                    self.by_ingress.remove(ingress);
                }
            }
        }
        if fp.objhash.is_some() {
            self.hash_restricted -= 1;
        }
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_ccnf_common::name::Name;
    use rust_ccnf_common::tlv::{self, PacketBuilder};
    use std::rc::Rc;

    fn pit() -> Pit {
        // One-millisecond ticks so test numbers read as ticks directly.
        Pit::new(16, 1, 4000, 60_000)
    }

    fn interest_with(
        uri: &str,
        lifetime_ms: Option<u64>,
        keyid: Option<&[u8]>,
        objhash: Option<&[u8]>,
        ingress: ConnId,
        now: Tick,
    ) -> MsgRef {
        let name = Name::from_uri(uri).unwrap();
        let mut b = PacketBuilder::new(tlv::PT_INTEREST).hop_limit(32).name(&name);
        if let Some(ms) = lifetime_ms {
            b = b.u64_field(tlv::TLV_INTEREST_LIFETIME, ms);
        }
        if let Some(k) = keyid {
            b = b.field(tlv::TLV_KEYID_RESTRICTION, k);
        }
        if let Some(h) = objhash {
            b = b.field(tlv::TLV_OBJHASH_RESTRICTION, h);
        }
        Rc::new(MessageView::parse(b.build(), ingress, now, 1).unwrap())
    }

    fn interest(uri: &str, lifetime_ms: u64, ingress: ConnId, now: Tick) -> MsgRef {
        interest_with(uri, Some(lifetime_ms), None, None, ingress, now)
    }

    fn object_with(uri: &str, keyid: Option<&[u8]>, ingress: ConnId, now: Tick) -> MsgRef {
        let name = Name::from_uri(uri).unwrap();
        let mut b = PacketBuilder::new(tlv::PT_CONTENT_OBJECT)
            .name(&name)
            .field(tlv::TLV_PAYLOAD, b"payload");
        if let Some(k) = keyid {
            b = b.field(tlv::TLV_KEYID_RESTRICTION, k);
        }
        Rc::new(MessageView::parse(b.build(), ingress, now, 1).unwrap())
    }

    #[test]
    fn aggregation_unions_ingress_and_tightens_deadline() {
        let mut pit = pit();
        let m1 = interest("/a/b", 4000, ConnId(7), 0);
        assert_eq!(pit.insert_or_aggregate(&m1, 0), InsertOutcome::Created);

        let m2 = interest("/a/b", 2000, ConnId(9), 100);
        assert_eq!(pit.insert_or_aggregate(&m2, 100), InsertOutcome::Aggregated);

        assert_eq!(pit.len(), 1);
        let fp = Fingerprint::of_interest(&m1).unwrap();
        let entry = pit.entries.get(&fp).unwrap();
        assert_eq!(entry.ingress, vec![ConnId(7), ConnId(9)]);
        assert_eq!(entry.expiry, 2100);
    }

    #[test]
    fn deadline_never_grows() {
        let mut pit = pit();
        let m1 = interest("/a", 1000, ConnId(1), 0);
        pit.insert_or_aggregate(&m1, 0);
        let m2 = interest("/a", 9000, ConnId(2), 10);
        pit.insert_or_aggregate(&m2, 10);
        let fp = Fingerprint::of_interest(&m1).unwrap();
        assert_eq!(pit.entries.get(&fp).unwrap().expiry, 1000);
    }

    #[test]
    fn same_ingress_twice_keeps_singleton_set() {
        let mut pit = pit();
        pit.insert_or_aggregate(&interest("/a", 4000, ConnId(7), 0), 0);
        pit.insert_or_aggregate(&interest("/a", 2000, ConnId(7), 0), 0);
        let fp = Fingerprint::of_interest(&interest("/a", 1, ConnId(7), 0)).unwrap();
        let entry = pit.entries.get(&fp).unwrap();
        assert_eq!(entry.ingress, vec![ConnId(7)]);
        assert_eq!(entry.expiry, 2000);
    }

    #[test]
    fn satisfy_returns_reverse_paths_and_clears() {
        let mut pit = pit();
        pit.insert_or_aggregate(&interest("/a/b", 4000, ConnId(7), 0), 0);
        pit.insert_or_aggregate(&interest("/a/b", 4000, ConnId(9), 0), 0);

        let removed = pit.satisfy(&object_with("/a/b", None, ConnId(3), 500));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].ingress, vec![ConnId(7), ConnId(9)]);
        assert!(pit.is_empty());
        assert!(pit.by_expiry.is_empty());
        assert!(pit.by_ingress.is_empty());

        // A second object for the same name is unsolicited.
        assert!(pit.satisfy(&object_with("/a/b", None, ConnId(3), 501)).is_empty());
    }

    #[test]
    fn keyid_restriction_must_match() {
        let mut pit = pit();
        let restricted =
            interest_with("/a", Some(4000), Some(b"key-1"), None, ConnId(7), 0);
        pit.insert_or_aggregate(&restricted, 0);

        assert!(pit.satisfy(&object_with("/a", Some(b"key-2"), ConnId(3), 1)).is_empty());
        assert!(pit.satisfy(&object_with("/a", None, ConnId(3), 1)).is_empty());
        let removed = pit.satisfy(&object_with("/a", Some(b"key-1"), ConnId(3), 1));
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn object_hash_restriction_must_match() {
        let mut pit = pit();
        let obj = object_with("/a", None, ConnId(3), 0);
        let hash = obj.object_hash().clone();

        let restricted = interest_with("/a", Some(4000), None, Some(&hash), ConnId(7), 0);
        pit.insert_or_aggregate(&restricted, 0);
        let wrong = interest_with("/a", Some(4000), None, Some(b"bogus"), ConnId(8), 0);
        pit.insert_or_aggregate(&wrong, 0);

        let removed = pit.satisfy(&obj);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].ingress, vec![ConnId(7)]);
        assert_eq!(pit.len(), 1);
    }

    #[test]
    fn matching_entries_are_all_satisfied() {
        let mut pit = pit();
        let plain = interest("/a", 4000, ConnId(1), 0);
        let keyed = interest_with("/a", Some(4000), Some(b"k"), None, ConnId(2), 0);
        pit.insert_or_aggregate(&plain, 0);
        pit.insert_or_aggregate(&keyed, 0);

        let removed = pit.satisfy(&object_with("/a", Some(b"k"), ConnId(3), 1));
        assert_eq!(removed.len(), 2);
        assert!(pit.is_empty());
    }

    #[test]
    fn sweep_expires_due_entries() {
        let mut pit = pit();
        pit.insert_or_aggregate(&interest("/a", 100, ConnId(1), 0), 0);
        pit.insert_or_aggregate(&interest("/b", 300, ConnId(2), 0), 0);

        assert!(pit.tick(99).is_empty());
        let expired = pit.tick(100);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].msg.name().unwrap(), &Name::from_uri("/a").unwrap());
        assert_eq!(pit.len(), 1);
        assert_eq!(pit.tick(1000).len(), 1);
        assert!(pit.is_empty());
    }

    #[test]
    fn lapsed_entry_is_replaced_on_insert() {
        let mut pit = pit();
        pit.insert_or_aggregate(&interest("/a", 100, ConnId(1), 0), 0);
        // Past the deadline but before any sweep ran.
        let outcome = pit.insert_or_aggregate(&interest("/a", 100, ConnId(2), 200), 200);
        assert_eq!(outcome, InsertOutcome::Created);
        let fp = Fingerprint::of_interest(&interest("/a", 1, ConnId(1), 0)).unwrap();
        assert_eq!(pit.entries.get(&fp).unwrap().ingress, vec![ConnId(2)]);
    }

    #[test]
    fn capacity_bound_refuses_new_entries() {
        let mut pit = Pit::new(2, 1, 4000, 60_000);
        pit.insert_or_aggregate(&interest("/a", 4000, ConnId(1), 0), 0);
        pit.insert_or_aggregate(&interest("/b", 4000, ConnId(1), 0), 0);
        assert_eq!(
            pit.insert_or_aggregate(&interest("/c", 4000, ConnId(1), 0), 0),
            InsertOutcome::Full
        );
        // Aggregation into existing entries still works at capacity.
        assert_eq!(
            pit.insert_or_aggregate(&interest("/a", 4000, ConnId(2), 0), 0),
            InsertOutcome::Aggregated
        );
    }

    #[test]
    fn connection_teardown_prunes_reverse_paths() {
        let mut pit = pit();
        pit.insert_or_aggregate(&interest("/only", 4000, ConnId(5), 0), 0);
        pit.insert_or_aggregate(&interest("/shared", 4000, ConnId(5), 0), 0);
        pit.insert_or_aggregate(&interest("/shared", 4000, ConnId(6), 0), 0);

        assert_eq!(pit.remove_connection(ConnId(5)), 1);
        assert_eq!(pit.len(), 1);
        let fp = Fingerprint::of_interest(&interest("/shared", 1, ConnId(6), 0)).unwrap();
        assert_eq!(pit.entries.get(&fp).unwrap().ingress, vec![ConnId(6)]);
        // No index still mentions the removed connection.
        assert!(!pit.by_ingress.contains_key(&ConnId(5)));
    }

    #[test]
    fn lifetime_is_capped() {
        let mut pit = Pit::new(16, 1, 4000, 10_000);
        pit.insert_or_aggregate(&interest("/a", 99_999, ConnId(1), 0), 0);
        let fp = Fingerprint::of_interest(&interest("/a", 1, ConnId(1), 0)).unwrap();
        assert_eq!(pit.entries.get(&fp).unwrap().expiry, 10_000);
    }
}
