//! One-shot control client.
//!
//! Each request opens a control connection, sends a single Control packet
//! whose payload is the command line, and reads back one reply packet.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use log::debug;
use rust_ccnf_common::tlv::{self, FixedHeader, PacketBuilder, TlvCursor, FIXED_HEADER_LEN};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Sends `cmd=...` (the sequence number is added here) and returns the
/// reply payload.
pub async fn request(forwarder: SocketAddr, line: String) -> Result<String> {
    let line = format!("seq=1 {line}");
    debug!("-> {forwarder}: {line}");

    let mut stream = TcpStream::connect(forwarder)
        .await
        .with_context(|| format!("connecting to forwarder at {forwarder}"))?;

    let packet = PacketBuilder::new(tlv::PT_CONTROL)
        .field(tlv::TLV_PAYLOAD, line.as_bytes())
        .build();
    stream.write_all(&packet).await.context("sending command")?;

    let mut header = [0u8; FIXED_HEADER_LEN];
    stream
        .read_exact(&mut header)
        .await
        .context("reading reply header")?;
    let total = FixedHeader::parse(&header)?.packet_length as usize;
    if total < FIXED_HEADER_LEN {
        bail!("reply declared an impossible length {total}");
    }
    let mut body = vec![0u8; total - FIXED_HEADER_LEN];
    stream
        .read_exact(&mut body)
        .await
        .context("reading reply body")?;

    let mut cursor = TlvCursor::new(Bytes::from(body));
    while let Some((typ, value)) = cursor.next()? {
        if typ == tlv::TLV_PAYLOAD {
            let reply = String::from_utf8_lossy(&value).into_owned();
            debug!("<- {reply}");
            return Ok(reply);
        }
    }
    bail!("reply carried no payload")
}

/// Fails when the status line is not an ack; the reply text becomes the
/// error the user sees.
pub fn expect_ack(reply: &str) -> Result<()> {
    let status = reply.lines().next().unwrap_or_default();
    if status.contains("status=ack") {
        Ok(())
    } else {
        bail!("forwarder refused: {status}")
    }
}

/// Everything after the status line (list rows, stats body).
pub fn body(reply: &str) -> Option<&str> {
    reply.split_once('\n').map(|(_, rest)| rest)
}
