//! Wire adapter: the only place bytes become message views and back.
//!
//! Both directions are pure functions. Encode preserves every field the
//! forwarder does not pin; after a hop-limit decrement, only that one byte
//! differs from the received buffer.

use bytes::Bytes;
use rust_ccnf_common::{
    message::MessageView,
    tlv::FixedHeader,
    types::{ConnId, Tick},
    Error,
};

/// Parses a received buffer into a message view.
pub fn decode(buf: Bytes, ingress: ConnId, now: Tick, tick_ms: u64) -> Result<MessageView, Error> {
    MessageView::parse(buf, ingress, now, tick_ms)
}

/// Serializes a view for transmission.
pub fn encode(msg: &MessageView) -> Bytes {
    msg.to_wire()
}

/// Total packet length declared by a fixed header, for stream framing.
pub fn declared_length(header: &[u8]) -> Result<usize, Error> {
    Ok(FixedHeader::parse(header)?.packet_length as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_ccnf_common::name::Name;
    use rust_ccnf_common::tlv::{self, PacketBuilder};

    #[test]
    fn encode_decode_round_trip() {
        let name = Name::from_uri("/round/trip").unwrap();
        let wire = PacketBuilder::new(tlv::PT_INTEREST)
            .hop_limit(16)
            .name(&name)
            .u64_field(tlv::TLV_INTEREST_LIFETIME, 4000)
            .field(0x0BEE, b"unknown-field")
            .build();
        let view = decode(wire.clone(), ConnId(1), 0, 1).unwrap();
        assert_eq!(encode(&view), wire);
    }

    #[test]
    fn framing_length_comes_from_header() {
        let wire = PacketBuilder::new(tlv::PT_CONTROL)
            .field(tlv::TLV_PAYLOAD, b"seq=1 cmd=stats")
            .build();
        assert_eq!(declared_length(&wire).unwrap(), wire.len());
        assert!(declared_length(&[1, 2, 3]).is_err());
    }
}
