//! Express a single Interest against a running forwarder.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use log::debug;
use rust_ccnf_common::{
    message::{MessageView, PacketType},
    name::Name,
    tlv::{self, PacketBuilder, MAX_PACKET_SIZE},
    types::ConnId,
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;

pub async fn handle(data: SocketAddr, uri: &str, lifetime_ms: u64, timeout_ms: u64) -> Result<()> {
    let name = Name::from_uri(uri).with_context(|| format!("invalid name '{uri}'"))?;
    let wire = PacketBuilder::new(tlv::PT_INTEREST)
        .hop_limit(32)
        .name(&name)
        .u64_field(tlv::TLV_INTEREST_LIFETIME, lifetime_ms)
        .build();

    let local = SocketAddr::new(unspecified_for(data), 0);
    let socket = UdpSocket::bind(local).await.context("binding local socket")?;
    socket
        .connect(data)
        .await
        .with_context(|| format!("connecting to forwarder at {data}"))?;

    debug!("expressing {name} toward {data}");
    let start = Instant::now();
    socket.send(&wire).await.context("sending Interest")?;

    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    let n = match timeout(Duration::from_millis(timeout_ms), socket.recv(&mut buf)).await {
        Ok(n) => n.context("receiving reply")?,
        Err(_) => bail!("timed out after {timeout_ms} ms"),
    };
    let elapsed = start.elapsed();

    let view = MessageView::parse(Bytes::copy_from_slice(&buf[..n]), ConnId(0), 0, 1)
        .context("parsing reply")?;
    match view.packet_type() {
        PacketType::ContentObject => {
            let payload = view.payload().cloned().unwrap_or_default();
            println!(
                "{} ({} bytes, {}.{:03} ms)",
                view.name().map(ToString::to_string).unwrap_or_default(),
                payload.len(),
                elapsed.as_millis(),
                elapsed.subsec_micros() % 1000,
            );
            if !payload.is_empty() {
                println!("{}", String::from_utf8_lossy(&payload));
            }
            Ok(())
        }
        PacketType::InterestReturn => {
            bail!("interest returned (code 0x{:02x})", view.return_code())
        }
        other => bail!("unexpected {other} reply"),
    }
}

fn unspecified_for(peer: SocketAddr) -> IpAddr {
    if peer.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    }
}
