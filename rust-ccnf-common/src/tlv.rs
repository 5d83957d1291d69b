//! Wire format primitives: the fixed packet header and TLV field codec.
//!
//! Every packet starts with an 8-byte fixed header followed by a flat
//! sequence of TLV fields, each with a 16-bit big-endian type and length.
//! The forwarder pins only the fields it consumes; everything else rides
//! along untouched inside the original buffer.

use crate::error::Error;
use crate::name::Name;
use bytes::{BufMut, Bytes, BytesMut};

/// Wire format version understood by this forwarder.
pub const WIRE_VERSION: u8 = 1;
/// Size of the fixed header in bytes.
pub const FIXED_HEADER_LEN: usize = 8;
/// Largest packet the forwarder will receive or frame (the packet-length
/// field is 16 bits).
pub const MAX_PACKET_SIZE: usize = 64 * 1024;

/// Byte offset of the hop-limit field within the fixed header.
pub const HOP_LIMIT_OFFSET: usize = 4;
/// Byte offset of the return-code field within the fixed header.
pub const RETURN_CODE_OFFSET: usize = 5;

pub const PT_INTEREST: u8 = 0x01;
pub const PT_CONTENT_OBJECT: u8 = 0x02;
pub const PT_INTEREST_RETURN: u8 = 0x03;
pub const PT_CONTROL: u8 = 0xA4;

pub const RET_NONE: u8 = 0x00;
pub const RET_HOP_LIMIT_EXCEEDED: u8 = 0x01;
pub const RET_NO_ROUTE: u8 = 0x02;
pub const RET_NO_RESOURCES: u8 = 0x03;

pub const TLV_NAME: u16 = 0x0000;
pub const TLV_KEYID_RESTRICTION: u16 = 0x0001;
pub const TLV_OBJHASH_RESTRICTION: u16 = 0x0002;
pub const TLV_INTEREST_LIFETIME: u16 = 0x0004;
pub const TLV_EXPIRY_TIME: u16 = 0x0005;
pub const TLV_RECOMMENDED_CACHE_TIME: u16 = 0x0006;
pub const TLV_PAYLOAD: u16 = 0x0007;

/// The 8-byte header at the front of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub version: u8,
    pub packet_type: u8,
    pub packet_length: u16,
    pub hop_limit: u8,
    pub return_code: u8,
    pub flags: u8,
    pub header_length: u8,
}

impl FixedHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(Error::MalformedPacket(format!(
                "buffer of {} bytes is shorter than the fixed header",
                buf.len()
            )));
        }
        let header = Self {
            version: buf[0],
            packet_type: buf[1],
            packet_length: u16::from_be_bytes([buf[2], buf[3]]),
            hop_limit: buf[4],
            return_code: buf[5],
            flags: buf[6],
            header_length: buf[7],
        };
        if header.version != WIRE_VERSION {
            return Err(Error::MalformedPacket(format!(
                "unsupported version {}",
                header.version
            )));
        }
        if (header.header_length as usize) < FIXED_HEADER_LEN
            || header.header_length as u16 > header.packet_length
        {
            return Err(Error::MalformedPacket(format!(
                "header length {} out of range for packet length {}",
                header.header_length, header.packet_length
            )));
        }
        Ok(header)
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.packet_type);
        buf.put_u16(self.packet_length);
        buf.put_u8(self.hop_limit);
        buf.put_u8(self.return_code);
        buf.put_u8(self.flags);
        buf.put_u8(self.header_length);
    }
}

/// Zero-copy walk over a flat TLV sequence. Values are slices of the source
/// buffer, not copies.
pub struct TlvCursor {
    buf: Bytes,
    pos: usize,
}

impl TlvCursor {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the next `(type, value)` field, or `None` at end of buffer.
    pub fn next(&mut self) -> Result<Option<(u16, Bytes)>, Error> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        if self.buf.len() - self.pos < 4 {
            return Err(Error::MalformedPacket(format!(
                "truncated TLV header at offset {}",
                self.pos
            )));
        }
        let typ = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        let len = u16::from_be_bytes([self.buf[self.pos + 2], self.buf[self.pos + 3]]) as usize;
        let start = self.pos + 4;
        if self.buf.len() - start < len {
            return Err(Error::MalformedPacket(format!(
                "TLV value of {} bytes overruns buffer at offset {}",
                len, self.pos
            )));
        }
        self.pos = start + len;
        Ok(Some((typ, self.buf.slice(start..start + len))))
    }
}

/// Decodes a big-endian unsigned integer field of one to eight bytes.
pub fn read_be_u64(value: &[u8]) -> Result<u64, Error> {
    if value.is_empty() || value.len() > 8 {
        return Err(Error::MalformedPacket(format!(
            "integer field of {} bytes",
            value.len()
        )));
    }
    Ok(value.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

/// Builds one packet: fixed header plus TLV fields in insertion order.
pub struct PacketBuilder {
    packet_type: u8,
    hop_limit: u8,
    return_code: u8,
    fields: BytesMut,
}

impl PacketBuilder {
    pub fn new(packet_type: u8) -> Self {
        Self {
            packet_type,
            hop_limit: 255,
            return_code: RET_NONE,
            fields: BytesMut::new(),
        }
    }

    pub fn hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    pub fn return_code(mut self, return_code: u8) -> Self {
        self.return_code = return_code;
        self
    }

    pub fn field(mut self, typ: u16, value: &[u8]) -> Self {
        self.fields.put_u16(typ);
        self.fields.put_u16(value.len() as u16);
        self.fields.put_slice(value);
        self
    }

    pub fn u64_field(self, typ: u16, value: u64) -> Self {
        let bytes = value.to_be_bytes();
        self.field(typ, &bytes)
    }

    pub fn name(self, name: &Name) -> Self {
        let wire = name.to_wire();
        self.field(TLV_NAME, &wire)
    }

    pub fn build(self) -> Bytes {
        let total = FIXED_HEADER_LEN + self.fields.len();
        let header = FixedHeader {
            version: WIRE_VERSION,
            packet_type: self.packet_type,
            packet_length: total as u16,
            hop_limit: self.hop_limit,
            return_code: self.return_code,
            flags: 0,
            header_length: FIXED_HEADER_LEN as u8,
        };
        let mut buf = BytesMut::with_capacity(total);
        header.encode(&mut buf);
        buf.put_slice(&self.fields);
        buf.freeze()
    }
}

/// Re-emits a packet buffer with a new hop limit; every other byte is
/// preserved verbatim.
pub fn patch_hop_limit(wire: &Bytes, hop_limit: u8) -> Bytes {
    let mut buf = BytesMut::from(wire.as_ref());
    buf[HOP_LIMIT_OFFSET] = hop_limit;
    buf.freeze()
}

/// Turns a received Interest buffer into an InterestReturn carrying `code`.
/// The body is passed through untouched.
pub fn into_interest_return(wire: &Bytes, code: u8) -> Bytes {
    let mut buf = BytesMut::from(wire.as_ref());
    buf[1] = PT_INTEREST_RETURN;
    buf[RETURN_CODE_OFFSET] = code;
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_header_round_trip() {
        let header = FixedHeader {
            version: WIRE_VERSION,
            packet_type: PT_INTEREST,
            packet_length: 42,
            hop_limit: 7,
            return_code: RET_NONE,
            flags: 0,
            header_length: FIXED_HEADER_LEN as u8,
        };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(FixedHeader::parse(&buf).unwrap(), header);
    }

    #[test]
    fn rejects_bad_version_and_lengths() {
        let mut buf = BytesMut::new();
        FixedHeader {
            version: 9,
            packet_type: PT_INTEREST,
            packet_length: 8,
            hop_limit: 1,
            return_code: 0,
            flags: 0,
            header_length: 8,
        }
        .encode(&mut buf);
        assert!(FixedHeader::parse(&buf).is_err());
        assert!(FixedHeader::parse(&[0u8; 4]).is_err());
    }

    #[test]
    fn cursor_walks_fields() {
        let wire = PacketBuilder::new(PT_INTEREST)
            .field(TLV_PAYLOAD, b"hello")
            .u64_field(TLV_INTEREST_LIFETIME, 4000)
            .build();
        let mut cursor = TlvCursor::new(wire.slice(FIXED_HEADER_LEN..));
        let (typ, value) = cursor.next().unwrap().unwrap();
        assert_eq!((typ, value.as_ref()), (TLV_PAYLOAD, &b"hello"[..]));
        let (typ, value) = cursor.next().unwrap().unwrap();
        assert_eq!(typ, TLV_INTEREST_LIFETIME);
        assert_eq!(read_be_u64(&value).unwrap(), 4000);
        assert!(cursor.next().unwrap().is_none());
    }

    #[test]
    fn cursor_rejects_overrun() {
        let mut buf = BytesMut::new();
        buf.put_u16(TLV_PAYLOAD);
        buf.put_u16(10);
        buf.put_slice(b"abc");
        let mut cursor = TlvCursor::new(buf.freeze());
        assert!(cursor.next().is_err());
    }

    #[test]
    fn hop_limit_patch_touches_one_byte() {
        let wire = PacketBuilder::new(PT_INTEREST)
            .hop_limit(32)
            .field(TLV_PAYLOAD, b"x")
            .build();
        let patched = patch_hop_limit(&wire, 31);
        assert_eq!(patched[HOP_LIMIT_OFFSET], 31);
        let mut diff = 0;
        for (a, b) in wire.iter().zip(patched.iter()) {
            if a != b {
                diff += 1;
            }
        }
        assert_eq!(diff, 1);
    }

    #[test]
    fn interest_return_carries_code() {
        let wire = PacketBuilder::new(PT_INTEREST).hop_limit(3).build();
        let ret = into_interest_return(&wire, RET_NO_ROUTE);
        let header = FixedHeader::parse(&ret).unwrap();
        assert_eq!(header.packet_type, PT_INTEREST_RETURN);
        assert_eq!(header.return_code, RET_NO_ROUTE);
        assert_eq!(header.hop_limit, 3);
    }
}
