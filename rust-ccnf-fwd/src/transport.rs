//! Connection I/O tasks.
//!
//! Each connection splits into a reader task that feeds received buffers to
//! the dispatcher and a writer task that drains the connection's bounded
//! egress queue. Only `Bytes` crosses these task boundaries; parsing and
//! every table access stay on the dispatcher. Writer tasks end on their own
//! when the connection handle (and with it the queue sender) is dropped;
//! reader tasks are aborted by the dispatcher at teardown.

use crate::dispatcher::Event;
use crate::wire;
use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use rust_ccnf_common::tlv::{FIXED_HEADER_LEN, MAX_PACKET_SIZE};
use rust_ccnf_common::types::ConnId;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::{spawn_local, JoinHandle};

/// Receives datagrams on the shared data-plane socket. Unknown peers are
/// admitted by the dispatcher on first contact.
pub fn spawn_udp_listener(socket: Arc<UdpSocket>, events: mpsc::Sender<Event>) -> JoinHandle<()> {
    spawn_local(async move {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, peer)) => {
                    let wire = Bytes::copy_from_slice(&buf[..n]);
                    if events.send(Event::Datagram { peer, wire }).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("data socket receive error: {e}"),
            }
        }
    })
}

/// Writer for a connection admitted through the shared data socket.
pub fn spawn_udp_peer_writer(
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    mut queue: mpsc::Receiver<Bytes>,
) -> JoinHandle<()> {
    spawn_local(async move {
        while let Some(wire) = queue.recv().await {
            if let Err(e) = socket.send_to(&wire, peer).await {
                debug!("send to {peer} failed: {e}");
            }
        }
    })
}

/// Reader and writer for a dedicated (connected) UDP tunnel. Returns the
/// reader handle for teardown.
pub fn spawn_udp_tunnel(
    conn: ConnId,
    socket: Arc<UdpSocket>,
    events: mpsc::Sender<Event>,
    mut queue: mpsc::Receiver<Bytes>,
) -> JoinHandle<()> {
    let writer_socket = Arc::clone(&socket);
    spawn_local(async move {
        while let Some(wire) = queue.recv().await {
            if let Err(e) = writer_socket.send(&wire).await {
                debug!("{conn} tunnel send failed: {e}");
            }
        }
    });
    spawn_local(async move {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            match socket.recv(&mut buf).await {
                Ok(n) => {
                    let wire = Bytes::copy_from_slice(&buf[..n]);
                    if events.send(Event::Packet { conn, wire }).await.is_err() {
                        break;
                    }
                }
                Err(e) => debug!("{conn} tunnel receive error: {e}"),
            }
        }
    })
}

/// Reader and writer for a TCP connection, framed by the fixed header's
/// packet-length field. Returns the reader handle for teardown.
pub fn spawn_tcp_conn(
    conn: ConnId,
    stream: TcpStream,
    events: mpsc::Sender<Event>,
    mut queue: mpsc::Receiver<Bytes>,
) -> JoinHandle<()> {
    let (mut read, mut write) = stream.into_split();
    spawn_local(async move {
        while let Some(wire) = queue.recv().await {
            if let Err(e) = write.write_all(&wire).await {
                debug!("{conn} stream send failed: {e}");
                break;
            }
        }
    });
    spawn_local(async move {
        loop {
            let mut header = [0u8; FIXED_HEADER_LEN];
            if read.read_exact(&mut header).await.is_err() {
                break;
            }
            let total = match wire::declared_length(&header) {
                Ok(total) if (FIXED_HEADER_LEN..=MAX_PACKET_SIZE).contains(&total) => total,
                Ok(total) => {
                    debug!("{conn} framed a packet of {total} bytes; closing");
                    break;
                }
                Err(e) => {
                    debug!("{conn} stream framing error: {e}");
                    break;
                }
            };
            let mut packet = BytesMut::zeroed(total);
            packet[..FIXED_HEADER_LEN].copy_from_slice(&header);
            if read.read_exact(&mut packet[FIXED_HEADER_LEN..]).await.is_err() {
                break;
            }
            if events
                .send(Event::Packet {
                    conn,
                    wire: packet.freeze(),
                })
                .await
                .is_err()
            {
                return;
            }
        }
        let _ = events.send(Event::Closed { conn }).await;
    })
}

/// Accepts local control connections and hands the streams to the
/// dispatcher for registration.
pub fn spawn_control_listener(
    listener: TcpListener,
    events: mpsc::Sender<Event>,
) -> JoinHandle<()> {
    spawn_local(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    if events
                        .send(Event::ControlAccepted { stream, peer })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => warn!("control accept error: {e}"),
            }
        }
    })
}
