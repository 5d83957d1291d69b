//! Smoke tests for the running reactor: real sockets, the control channel,
//! and the data plane end to end.

use bytes::Bytes;
use rust_ccnf_common::{
    name::Name,
    tlv::{self, FixedHeader, PacketBuilder, TlvCursor, FIXED_HEADER_LEN},
};
use rust_ccnf_fwd::{Dispatcher, ForwarderConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::task::LocalSet;
use tokio::time::timeout;

fn test_config() -> ForwarderConfig {
    ForwarderConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        control: "127.0.0.1:0".parse().unwrap(),
        tick_ms: 5,
        ..ForwarderConfig::default()
    }
}

async fn control_request(control: SocketAddr, line: &str) -> String {
    let mut stream = TcpStream::connect(control).await.unwrap();
    let packet = PacketBuilder::new(tlv::PT_CONTROL)
        .field(tlv::TLV_PAYLOAD, line.as_bytes())
        .build();
    stream.write_all(&packet).await.unwrap();

    let mut header = [0u8; FIXED_HEADER_LEN];
    stream.read_exact(&mut header).await.unwrap();
    let total = FixedHeader::parse(&header).unwrap().packet_length as usize;
    let mut body = vec![0u8; total - FIXED_HEADER_LEN];
    stream.read_exact(&mut body).await.unwrap();

    let mut cursor = TlvCursor::new(Bytes::from(body));
    while let Some((typ, value)) = cursor.next().unwrap() {
        if typ == tlv::TLV_PAYLOAD {
            return String::from_utf8_lossy(&value).into_owned();
        }
    }
    panic!("reply without payload");
}

#[tokio::test(flavor = "current_thread")]
async fn reactor_serves_control_and_data() {
    let (mut dispatcher, handle) = Dispatcher::new(test_config());
    let local = LocalSet::new();
    local
        .run_until(async move {
            dispatcher.bind().await.unwrap();
            let (data_addr, control_addr) = dispatcher.local_addrs().unwrap();
            tokio::task::spawn_local(dispatcher.run());

            // Admin path round-trips with the sequence number echoed.
            let reply = handle.control_line("seq=7 cmd=list-connections").await.unwrap();
            assert!(reply.starts_with("seq=7 status=ack"), "got: {reply}");

            let reply = handle.control_line("seq=8 cmd=flux-capacitor").await.unwrap();
            assert!(reply.starts_with("seq=8 status=nack"), "got: {reply}");

            // A tunnel to a local discard port, then a route over it.
            let reply = handle
                .control_line("seq=9 cmd=add-connection type=udp peer=127.0.0.1:9 name=sink")
                .await
                .unwrap();
            assert!(reply.starts_with("seq=9 status=ack id="), "got: {reply}");
            let reply = handle
                .control_line("seq=10 cmd=add-route prefix=/discard nexthop=sink")
                .await
                .unwrap();
            assert_eq!(reply, "seq=10 status=ack");
            let reply = handle.control_line("seq=11 cmd=list-routes").await.unwrap();
            assert!(reply.contains("/discard"), "got: {reply}");

            // Control over TCP behaves the same as the admin queue.
            let reply = control_request(control_addr, "seq=3 cmd=stats").await;
            assert!(reply.starts_with("seq=3 status=ack"), "got: {reply}");
            assert!(reply.contains("\"connections\""));

            // Data plane: a routeless Interest bounces an InterestReturn to
            // the connection the forwarder created for this peer.
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            socket.connect(data_addr).await.unwrap();
            let name = Name::from_uri("/no/such/route").unwrap();
            let interest = PacketBuilder::new(tlv::PT_INTEREST)
                .hop_limit(8)
                .name(&name)
                .u64_field(tlv::TLV_INTEREST_LIFETIME, 1000)
                .build();
            socket.send(&interest).await.unwrap();

            let mut buf = [0u8; 2048];
            let n = timeout(Duration::from_secs(2), socket.recv(&mut buf))
                .await
                .expect("reply before timeout")
                .unwrap();
            let header = FixedHeader::parse(&buf[..n]).unwrap();
            assert_eq!(header.packet_type, tlv::PT_INTEREST_RETURN);
            assert_eq!(header.return_code, tlv::RET_NO_ROUTE);

            // The peer now shows up as an admitted connection.
            let reply = handle.control_line("seq=12 cmd=list-connections").await.unwrap();
            assert!(reply.contains("udp-127.0.0.1"), "got: {reply}");

            handle.shutdown().await;
        })
        .await;
}
