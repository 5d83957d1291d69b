//! Content store: the in-network object cache.
//!
//! The primary table owns one entry per (name, object hash). Around it sit
//! the lookup indexes (by name, by name+KeyId), two time-ordered indexes
//! (expiry and recommended cache time, finite timestamps only), and an LRU
//! order. Every mutation keeps all of them in step.
//!
//! When a put needs room the eviction policy runs in strict order: an entry
//! past its expiry, else an entry past its recommended cache time, else the
//! least recently used. Exactly one entry goes per put.

use bytes::Bytes;
use log::debug;
use rust_ccnf_common::{
    message::{MessageView, MsgRef},
    name::Name,
    types::Tick,
};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CsKey {
    name: Name,
    objhash: Bytes,
}

#[derive(Debug)]
struct CsEntry {
    msg: MsgRef,
    expiry: Option<Tick>,
    rct: Option<Tick>,
    keyid: Option<Bytes>,
    seq: u64,
    lru_stamp: u64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CsStats {
    pub adds: u64,
    pub hits: u64,
    pub misses: u64,
    pub expiry_evictions: u64,
    pub rct_evictions: u64,
    pub lru_evictions: u64,
    pub expired_removed: u64,
}

impl CsStats {
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            ("cs_adds", self.adds),
            ("cs_hits", self.hits),
            ("cs_misses", self.misses),
            ("cs_expiry_evictions", self.expiry_evictions),
            ("cs_rct_evictions", self.rct_evictions),
            ("cs_lru_evictions", self.lru_evictions),
            ("cs_expired_removed", self.expired_removed),
        ]
    }
}

#[derive(Debug)]
pub struct ContentStore {
    capacity: usize,
    entries: HashMap<CsKey, CsEntry>,
    by_name: HashMap<Name, CsKey>,
    by_name_keyid: HashMap<(Name, Bytes), CsKey>,
    by_expiry: BTreeMap<(Tick, u64), CsKey>,
    by_rct: BTreeMap<(Tick, u64), CsKey>,
    // Stamp-ordered recency: the smallest stamp is the LRU tail.
    lru: BTreeMap<u64, CsKey>,
    seq: u64,
    stamp: u64,
    stats: CsStats,
}

impl ContentStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            by_name: HashMap::new(),
            by_name_keyid: HashMap::new(),
            by_expiry: BTreeMap::new(),
            by_rct: BTreeMap::new(),
            lru: BTreeMap::new(),
            seq: 0,
            stamp: 0,
            stats: CsStats::default(),
        }
    }

    /// Admits one object. Returns `false` without touching the store when
    /// the store holds nothing (`capacity == 0`) or the object is already
    /// past its expiry or recommended cache time. A newer object with the
    /// same (name, object hash) replaces the older one.
    pub fn put(&mut self, msg: MsgRef, now: Tick) -> bool {
        if self.capacity == 0 {
            return false;
        }
        let Some(name) = msg.name().cloned() else {
            return false;
        };
        let expiry = msg.expiry_tick();
        let rct = msg.recommended_cache_tick();
        if expiry.is_some_and(|t| t <= now) || rct.is_some_and(|t| t <= now) {
            return false;
        }

        let key = CsKey {
            name: name.clone(),
            objhash: msg.object_hash().clone(),
        };
        // Replacement does not need room; only a net-new insert can evict.
        if self.purge(&key).is_none() && self.entries.len() >= self.capacity {
            self.evict_one(now);
        }

        self.seq += 1;
        self.stamp += 1;
        let seq = self.seq;
        let stamp = self.stamp;
        if let Some(t) = expiry {
            self.by_expiry.insert((t, seq), key.clone());
        }
        if let Some(t) = rct {
            self.by_rct.insert((t, seq), key.clone());
        }
        self.lru.insert(stamp, key.clone());
        self.by_name.insert(name.clone(), key.clone());
        let keyid = msg.keyid_restriction().cloned();
        if let Some(kid) = &keyid {
            self.by_name_keyid
                .insert((name, kid.clone()), key.clone());
        }
        self.entries.insert(
            key,
            CsEntry {
                msg,
                expiry,
                rct,
                keyid,
                seq,
                lru_stamp: stamp,
            },
        );
        self.stats.adds += 1;
        true
    }

    /// Probes the most restrictive index the Interest allows: object-hash
    /// restriction pins the primary table, a KeyId restriction the
    /// name+KeyId index, anything else the name index. A hit refreshes the
    /// entry's recency; an entry past its expiry is a miss and is purged.
    pub fn match_interest(&mut self, interest: &MessageView, now: Tick) -> Option<MsgRef> {
        let Some(name) = interest.name() else {
            return None;
        };
        let key = if let Some(hash) = interest.object_hash_restriction() {
            let key = CsKey {
                name: name.clone(),
                objhash: hash.clone(),
            };
            self.entries.contains_key(&key).then_some(key)
        } else if let Some(kid) = interest.keyid_restriction() {
            self.by_name_keyid
                .get(&(name.clone(), kid.clone()))
                .cloned()
        } else {
            self.by_name.get(name).cloned()
        };

        let Some(key) = key else {
            self.stats.misses += 1;
            return None;
        };
        let Some(entry) = self.entries.get(&key) else {
            self.stats.misses += 1;
            return None;
        };
        if entry.expiry.is_some_and(|t| t <= now) {
            self.purge(&key);
            self.stats.expired_removed += 1;
            self.stats.misses += 1;
            return None;
        }

        let msg = entry.msg.clone();
        let old_stamp = entry.lru_stamp;
        self.stamp += 1;
        let stamp = self.stamp;
        self.lru.remove(&old_stamp);
        self.lru.insert(stamp, key.clone());
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.lru_stamp = stamp;
        }
        self.stats.hits += 1;
        Some(msg)
    }

    /// Drops one object by its exact (name, object hash) key.
    pub fn remove(&mut self, name: &Name, objhash: &Bytes) -> bool {
        let key = CsKey {
            name: name.clone(),
            objhash: objhash.clone(),
        };
        self.purge(&key).is_some()
    }

    /// Removes every entry past its expiry, up to `budget` of them.
    pub fn purge_expired(&mut self, now: Tick, budget: usize) -> usize {
        let mut removed = 0;
        while removed < budget {
            let Some((&(t, _), key)) = self.by_expiry.first_key_value() else {
                break;
            };
            if t > now {
                break;
            }
            let key = key.clone();
            self.purge(&key);
            self.stats.expired_removed += 1;
            removed += 1;
        }
        removed
    }

    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.by_name.clear();
        self.by_name_keyid.clear();
        self.by_expiry.clear();
        self.by_rct.clear();
        self.lru.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &CsStats {
        &self.stats
    }

    /// Frees exactly one slot: expired entry first, then one past its
    /// recommended cache time, then the LRU tail.
    fn evict_one(&mut self, now: Tick) {
        if let Some((&(t, _), key)) = self.by_expiry.first_key_value() {
            if t <= now {
                let key = key.clone();
                debug!("cs evicting {} (expired)", key.name);
                self.purge(&key);
                self.stats.expiry_evictions += 1;
                return;
            }
        }
        if let Some((&(t, _), key)) = self.by_rct.first_key_value() {
            if t <= now {
                let key = key.clone();
                debug!("cs evicting {} (past recommended cache time)", key.name);
                self.purge(&key);
                self.stats.rct_evictions += 1;
                return;
            }
        }
        if let Some((_, key)) = self.lru.first_key_value() {
            let key = key.clone();
            debug!("cs evicting {} (least recently used)", key.name);
            self.purge(&key);
            self.stats.lru_evictions += 1;
        }
    }

    /// Unlinks one entry from the primary table and every index.
    fn purge(&mut self, key: &CsKey) -> Option<CsEntry> {
        let entry = self.entries.remove(key)?;
        if let Some(t) = entry.expiry {
            self.by_expiry.remove(&(t, entry.seq));
        }
        if let Some(t) = entry.rct {
            self.by_rct.remove(&(t, entry.seq));
        }
        self.lru.remove(&entry.lru_stamp);
        if self.by_name.get(&key.name) == Some(key) {
            self.by_name.remove(&key.name);
        }
        if let Some(kid) = &entry.keyid {
            let idx = (key.name.clone(), kid.clone());
            if self.by_name_keyid.get(&idx) == Some(key) {
                self.by_name_keyid.remove(&idx);
            }
        }
        Some(entry)
    }
}
