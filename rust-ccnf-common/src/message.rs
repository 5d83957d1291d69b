//! Read-only packet views.
//!
//! A `MessageView` wraps one received wire buffer and pins the handful of
//! fields the forwarding path consumes. Field access is O(1) after parse;
//! the buffer itself is never copied. Views are reference-counted with `Rc`
//! because the PIT, the content store, and an in-flight send may all hold
//! the same view; counts are non-atomic because every holder lives on the
//! one reactor thread.

use crate::error::Error;
use crate::name::Name;
use crate::tlv::{self, FixedHeader, TlvCursor};
use crate::types::{ms_to_ticks, ConnId, Tick};
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::cell::{Cell, OnceCell};
use std::fmt;
use std::rc::Rc;

/// Shared handle to a parsed packet.
pub type MsgRef = Rc<MessageView>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Interest,
    ContentObject,
    InterestReturn,
    Control,
}

impl PacketType {
    pub fn from_wire(octet: u8) -> Result<Self, Error> {
        match octet {
            tlv::PT_INTEREST => Ok(Self::Interest),
            tlv::PT_CONTENT_OBJECT => Ok(Self::ContentObject),
            tlv::PT_INTEREST_RETURN => Ok(Self::InterestReturn),
            tlv::PT_CONTROL => Ok(Self::Control),
            other => Err(Error::MalformedPacket(format!(
                "unknown packet type 0x{:02x}",
                other
            ))),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Interest => "Interest",
            Self::ContentObject => "ContentObject",
            Self::InterestReturn => "InterestReturn",
            Self::Control => "Control",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct MessageView {
    wire: Bytes,
    packet_type: PacketType,
    return_code: u8,
    hop_limit: Cell<u8>,
    name: Option<Name>,
    keyid: Option<Bytes>,
    objhash_restriction: Option<Bytes>,
    payload: Option<Bytes>,
    lifetime_ms: Option<u64>,
    expiry_tick: Option<Tick>,
    rct_tick: Option<Tick>,
    ingress: ConnId,
    received_at: Tick,
    // SHA-256 over the body, computed on first use for object-hash matching.
    object_hash: OnceCell<Bytes>,
}

impl MessageView {
    /// Parses a received buffer. `now` is the receive tick; wire-format
    /// millisecond durations (lifetime, expiry, RCT) are converted to
    /// absolute ticks here and never consulted again as raw durations.
    pub fn parse(wire: Bytes, ingress: ConnId, now: Tick, tick_ms: u64) -> Result<Self, Error> {
        let header = FixedHeader::parse(&wire)?;
        let packet_type = PacketType::from_wire(header.packet_type)?;
        let packet_len = header.packet_length as usize;
        if wire.len() < packet_len {
            return Err(Error::MalformedPacket(format!(
                "buffer of {} bytes shorter than declared length {}",
                wire.len(),
                packet_len
            )));
        }

        let mut name = None;
        let mut keyid = None;
        let mut objhash_restriction = None;
        let mut payload = None;
        let mut lifetime_ms = None;
        let mut expiry_tick = None;
        let mut rct_tick = None;

        let mut cursor = TlvCursor::new(wire.slice(header.header_length as usize..packet_len));
        while let Some((typ, value)) = cursor.next()? {
            match typ {
                tlv::TLV_NAME => name = Some(Name::from_wire(value)?),
                tlv::TLV_KEYID_RESTRICTION => keyid = Some(value),
                tlv::TLV_OBJHASH_RESTRICTION => objhash_restriction = Some(value),
                tlv::TLV_PAYLOAD => payload = Some(value),
                tlv::TLV_INTEREST_LIFETIME => lifetime_ms = Some(tlv::read_be_u64(&value)?),
                tlv::TLV_EXPIRY_TIME => {
                    expiry_tick = Some(now + ms_to_ticks(tlv::read_be_u64(&value)?, tick_ms));
                }
                tlv::TLV_RECOMMENDED_CACHE_TIME => {
                    rct_tick = Some(now + ms_to_ticks(tlv::read_be_u64(&value)?, tick_ms));
                }
                // Unrecognized fields stay in `wire` and ride through encode.
                _ => {}
            }
        }

        if name.is_none() && packet_type != PacketType::Control {
            return Err(Error::MalformedPacket(format!(
                "{packet_type} packet without a name"
            )));
        }

        Ok(Self {
            wire,
            packet_type,
            return_code: header.return_code,
            hop_limit: Cell::new(header.hop_limit),
            name,
            keyid,
            objhash_restriction,
            payload,
            lifetime_ms,
            expiry_tick,
            rct_tick,
            ingress,
            received_at: now,
            object_hash: OnceCell::new(),
        })
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn name(&self) -> Option<&Name> {
        self.name.as_ref()
    }

    pub fn keyid_restriction(&self) -> Option<&Bytes> {
        self.keyid.as_ref()
    }

    pub fn object_hash_restriction(&self) -> Option<&Bytes> {
        self.objhash_restriction.as_ref()
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn lifetime_ms(&self) -> Option<u64> {
        self.lifetime_ms
    }

    pub fn expiry_tick(&self) -> Option<Tick> {
        self.expiry_tick
    }

    pub fn recommended_cache_tick(&self) -> Option<Tick> {
        self.rct_tick
    }

    pub fn hop_limit(&self) -> u8 {
        self.hop_limit.get()
    }

    pub fn return_code(&self) -> u8 {
        self.return_code
    }

    pub fn ingress_id(&self) -> ConnId {
        self.ingress
    }

    pub fn received_at(&self) -> Tick {
        self.received_at
    }

    /// Decrements the hop limit in place. Returns `false` (and leaves the
    /// packet untouched) when the limit is already zero; such a packet must
    /// be dropped rather than forwarded.
    pub fn decrement_hop_limit(&self) -> bool {
        let hl = self.hop_limit.get();
        if hl == 0 {
            return false;
        }
        self.hop_limit.set(hl - 1);
        true
    }

    /// Digest of the message body (everything past the per-hop header),
    /// memoized on first use. This is the object-hash attribute matched
    /// against `ContentObjectHashRestriction`.
    pub fn object_hash(&self) -> &Bytes {
        self.object_hash.get_or_init(|| {
            let body = self.wire.slice(tlv::FIXED_HEADER_LEN..);
            Bytes::copy_from_slice(&Sha256::digest(&body))
        })
    }

    /// Serializes the view back to wire form. All fields the forwarder does
    /// not pin are emitted verbatim; only the hop-limit byte may differ from
    /// the received buffer.
    pub fn to_wire(&self) -> Bytes {
        if self.wire[tlv::HOP_LIMIT_OFFSET] == self.hop_limit.get() {
            self.wire.clone()
        } else {
            tlv::patch_hop_limit(&self.wire, self.hop_limit.get())
        }
    }
}
