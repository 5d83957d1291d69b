//! The per-packet forwarding pipeline.
//!
//! `Engine` owns every forwarding table and runs the Interest and
//! ContentObject state machines synchronously. It never blocks: egress
//! goes through bounded per-connection queues, and a full queue is a
//! counted drop. The async dispatcher is just a shell around this type;
//! keeping the engine synchronous is what lets the scenario tests drive it
//! without a runtime.

use crate::config::ForwarderConfig;
use crate::conn::{ConnTable, Connection, SendFailure};
use crate::cs::ContentStore;
use crate::fib::Fib;
use crate::pit::{InsertOutcome, Pit, ReturnDisposition};
use crate::{strategy, wire};
use bytes::Bytes;
use log::{debug, trace};
use rust_ccnf_common::{
    message::{MessageView, MsgRef, PacketType},
    metrics::ForwarderMetrics,
    tlv::{self, PacketBuilder},
    types::{ConnId, Tick},
};
use std::collections::BTreeSet;
use std::rc::Rc;

/// What the dispatcher must do after a packet went through the engine.
#[derive(Debug, PartialEq, Eq)]
pub enum PacketVerdict {
    /// Fully handled inside the engine.
    Handled,
    /// A control command line to hand to the control handler.
    Control(String),
}

pub struct Engine {
    pub conns: ConnTable,
    pub fib: Fib,
    pub pit: Pit,
    pub cs: ContentStore,
    pub metrics: ForwarderMetrics,
    cache_store_enabled: bool,
    cache_serve_enabled: bool,
    now: Tick,
    tick_ms: u64,
}

impl Engine {
    pub fn new(config: &ForwarderConfig) -> Self {
        Self {
            conns: ConnTable::new(),
            fib: Fib::new(),
            pit: Pit::new(
                config.pit_capacity,
                config.tick_ms,
                config.default_interest_lifetime_ms,
                config.max_interest_lifetime_ms,
            ),
            cs: ContentStore::new(config.cs_capacity),
            metrics: ForwarderMetrics::new(),
            cache_store_enabled: true,
            cache_serve_enabled: true,
            now: 0,
            tick_ms: config.tick_ms,
        }
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn advance_to(&mut self, tick: Tick) {
        self.now = tick;
    }

    pub fn set_cache_store(&mut self, enabled: bool) {
        self.cache_store_enabled = enabled;
    }

    pub fn set_cache_serve(&mut self, enabled: bool) {
        self.cache_serve_enabled = enabled;
    }

    pub fn cache_store_enabled(&self) -> bool {
        self.cache_store_enabled
    }

    pub fn cache_serve_enabled(&self) -> bool {
        self.cache_serve_enabled
    }

    /// Entry point for one received buffer.
    pub fn handle_packet(&mut self, ingress: ConnId, buf: Bytes) -> PacketVerdict {
        let msg = match wire::decode(buf, ingress, self.now, self.tick_ms) {
            Ok(msg) => Rc::new(msg),
            Err(e) => {
                self.metrics.malformed_packets.increment();
                debug!("dropping malformed packet from {ingress}: {e}");
                return PacketVerdict::Handled;
            }
        };
        trace!("{} from {} at tick {}", msg.packet_type(), ingress, self.now);
        match msg.packet_type() {
            PacketType::Interest => {
                self.handle_interest(msg);
                PacketVerdict::Handled
            }
            PacketType::ContentObject => {
                self.handle_object(msg);
                PacketVerdict::Handled
            }
            PacketType::InterestReturn => {
                self.metrics.interest_returns_received.increment();
                self.handle_interest_return(msg);
                PacketVerdict::Handled
            }
            PacketType::Control => {
                self.metrics.control_received.increment();
                let line = msg
                    .payload()
                    .map(|p| String::from_utf8_lossy(p).into_owned())
                    .unwrap_or_default();
                PacketVerdict::Control(line)
            }
        }
    }

    fn handle_interest(&mut self, msg: MsgRef) {
        self.metrics.interests_received.increment();

        match self.pit.insert_or_aggregate(&msg, self.now) {
            InsertOutcome::Aggregated => {
                self.metrics.pit_aggregated.increment();
                return;
            }
            InsertOutcome::Full => {
                self.metrics.pit_full.increment();
                self.emit_interest_return(&msg, tlv::RET_NO_RESOURCES);
                return;
            }
            InsertOutcome::Created => self.metrics.pit_created.increment(),
        }

        if self.cache_serve_enabled {
            if let Some(obj) = self.cs.match_interest(&msg, self.now) {
                self.pit.remove_interest(&msg);
                if self.send_to(msg.ingress_id(), wire::encode(&obj)) {
                    self.metrics.objects_forwarded.increment();
                }
                return;
            }
        }

        let Some(name) = msg.name() else {
            return;
        };
        let chosen = self
            .fib
            .lookup(name)
            .map(|(prefix, entry)| (prefix, strategy::choose(entry, msg.ingress_id())));
        match chosen {
            None => {
                self.metrics.fib_misses.increment();
                self.pit.remove_interest(&msg);
                self.emit_interest_return(&msg, tlv::RET_NO_ROUTE);
            }
            Some((_, egress)) if egress.is_empty() => {
                self.pit.remove_interest(&msg);
                self.emit_interest_return(&msg, tlv::RET_NO_ROUTE);
            }
            Some((prefix, egress)) => {
                if !msg.decrement_hop_limit() {
                    self.metrics.hop_limit_exceeded.increment();
                    self.pit.remove_interest(&msg);
                    return;
                }
                let out = wire::encode(&msg);
                let mut sent = Vec::with_capacity(egress.len());
                for conn in egress {
                    if self.send_to(conn, out.clone()) {
                        sent.push(conn);
                    }
                }
                self.metrics.interests_forwarded.increment();
                self.pit.note_forwarded(&msg, prefix, sent, self.now);
            }
        }
    }

    fn handle_object(&mut self, msg: MsgRef) {
        self.metrics.objects_received.increment();

        let satisfied = self.pit.satisfy(&msg);
        if satisfied.is_empty() {
            self.metrics.unsolicited_objects.increment();
            debug!("unsolicited object from {}", msg.ingress_id());
            return;
        }
        self.metrics.pit_satisfied.add(satisfied.len() as u64);

        let mut reverse: BTreeSet<ConnId> = BTreeSet::new();
        for entry in &satisfied {
            reverse.extend(entry.ingress.iter().copied());
        }
        let out = wire::encode(&msg);
        for conn in reverse {
            if self.send_to(conn, out.clone()) {
                self.metrics.objects_forwarded.increment();
            }
        }

        if self.cache_store_enabled {
            self.cs.put(msg.clone(), self.now);
        }

        // Round-trip feedback for the next hop that answered.
        let responder = msg.ingress_id();
        for entry in &satisfied {
            let Some(record) = &entry.forwarded else {
                continue;
            };
            if !record.egress.contains(&responder) {
                continue;
            }
            if let Some(fib_entry) = self.fib.get_mut(&record.prefix) {
                let rtt = self.now.saturating_sub(record.sent_at).max(1);
                strategy::on_satisfied(fib_entry, responder, rtt);
            }
        }
    }

    /// An upstream refused an Interest we forwarded. The refusing hop gets
    /// timeout feedback either way; the refusal only travels down the
    /// reverse paths once every egress has given up, since another next hop
    /// may still produce the object.
    fn handle_interest_return(&mut self, msg: MsgRef) {
        let from = msg.ingress_id();
        match self.pit.interest_returned(&msg, from) {
            ReturnDisposition::Unknown => {
                debug!("unmatched interest return from {from} (code {})", msg.return_code());
            }
            ReturnDisposition::StillPending { prefix } => {
                if let Some(fib_entry) = self.fib.get_mut(&prefix) {
                    strategy::on_timeout(fib_entry, from);
                }
            }
            ReturnDisposition::Abandoned { prefix, entry } => {
                if let Some(fib_entry) = self.fib.get_mut(&prefix) {
                    strategy::on_timeout(fib_entry, from);
                }
                let out = wire::encode(&msg);
                for conn in entry.ingress {
                    if self.send_to(conn, out.clone()) {
                        self.metrics.interest_returns_sent.increment();
                    }
                }
            }
        }
    }

    /// Expires due PIT entries and feeds the timeouts back to the strategy
    /// state of the prefixes they were forwarded under.
    pub fn sweep_pit(&mut self) {
        let expired = self.pit.tick(self.now);
        if expired.is_empty() {
            return;
        }
        self.metrics.pit_expired.add(expired.len() as u64);
        for entry in expired {
            let Some(record) = entry.forwarded else {
                continue;
            };
            if let Some(fib_entry) = self.fib.get_mut(&record.prefix) {
                for egress in record.egress {
                    strategy::on_timeout(fib_entry, egress);
                }
            }
        }
    }

    pub fn housekeep_cs(&mut self, budget: usize) {
        let removed = self.cs.purge_expired(self.now, budget);
        if removed > 0 {
            trace!("cs housekeeping removed {removed} lapsed entries");
        }
    }

    /// Purges all PIT and FIB state naming `id` before dropping the handle,
    /// so no later packet can resolve the dead connection.
    pub fn remove_connection(&mut self, id: ConnId) -> Option<Connection> {
        self.pit.remove_connection(id);
        self.fib.remove_connection(id);
        self.conns.remove(id)
    }

    /// Non-blocking egress. A full queue drops the copy and counts it;
    /// other copies of the same packet proceed.
    pub fn send_to(&self, conn: ConnId, out: Bytes) -> bool {
        let Some(connection) = self.conns.get(conn) else {
            debug!("send to unknown connection {conn}");
            return false;
        };
        match connection.try_send(out) {
            Ok(()) => true,
            Err(SendFailure::WouldBlock) => {
                self.metrics.send_would_block.increment();
                false
            }
            Err(SendFailure::Closed) => {
                debug!("send on closed connection {conn}");
                false
            }
        }
    }

    fn emit_interest_return(&self, msg: &MessageView, code: u8) {
        let out = tlv::into_interest_return(&wire::encode(msg), code);
        if self.send_to(msg.ingress_id(), out) {
            self.metrics.interest_returns_sent.increment();
        }
    }

    /// Wraps a control reply in a Control packet back to the requester.
    pub fn send_control_reply(&self, conn: ConnId, reply: &str) {
        let out = PacketBuilder::new(tlv::PT_CONTROL)
            .field(tlv::TLV_PAYLOAD, reply.as_bytes())
            .build();
        self.send_to(conn, out);
    }
}
