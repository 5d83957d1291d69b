//! Connection handles and the connection table.
//!
//! A connection is a bidirectional transport to a neighbor or a local
//! application. The pipeline only reads the table; connections are created
//! and destroyed by the control handler, and every egress send goes through
//! the connection's bounded queue. A full queue is a drop, never a stall.

use bytes::Bytes;
use log::debug;
use rust_ccnf_common::{types::ConnId, Error};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// What kind of transport backs a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    /// UDP tunnel to a fixed peer (one datagram per packet).
    Udp { peer: SocketAddr },
    /// TCP stream to a peer, framed by the fixed header's packet length.
    Tcp { peer: SocketAddr },
    /// Locally connected application (control channel).
    Local { peer: SocketAddr },
}

impl fmt::Display for ConnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Udp { peer } => write!(f, "udp:{peer}"),
            Self::Tcp { peer } => write!(f, "tcp:{peer}"),
            Self::Local { peer } => write!(f, "local:{peer}"),
        }
    }
}

/// Why a send did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The egress queue is full; the caller drops this copy.
    WouldBlock,
    /// The writer task is gone; the connection is effectively dead.
    Closed,
}

#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    symbolic: String,
    kind: ConnKind,
    sender: mpsc::Sender<Bytes>,
}

impl Connection {
    pub fn new(id: ConnId, symbolic: String, kind: ConnKind, sender: mpsc::Sender<Bytes>) -> Self {
        Self {
            id,
            symbolic,
            kind,
            sender,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn symbolic(&self) -> &str {
        &self.symbolic
    }

    pub fn kind(&self) -> ConnKind {
        self.kind
    }

    /// Non-blocking send toward the writer task.
    pub fn try_send(&self, wire: Bytes) -> Result<(), SendFailure> {
        self.sender.try_send(wire).map_err(|e| match e {
            TrySendError::Full(_) => SendFailure::WouldBlock,
            TrySendError::Closed(_) => SendFailure::Closed,
        })
    }
}

/// Bidirectional map of live connections: by id, by symbolic name, and (for
/// UDP tunnels) by remote address for ingress demux.
#[derive(Debug, Default)]
pub struct ConnTable {
    by_id: HashMap<ConnId, Connection>,
    by_symbolic: HashMap<String, ConnId>,
    by_peer: HashMap<SocketAddr, ConnId>,
    next_id: u32,
}

impl ConnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&mut self) -> ConnId {
        let id = ConnId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, conn: Connection) -> Result<(), Error> {
        if self.by_id.contains_key(&conn.id) {
            return Err(Error::DuplicateConnection(conn.id.to_string()));
        }
        if self.by_symbolic.contains_key(&conn.symbolic) {
            return Err(Error::DuplicateConnection(conn.symbolic.clone()));
        }
        if let ConnKind::Udp { peer } = conn.kind {
            self.by_peer.insert(peer, conn.id);
        }
        self.by_symbolic.insert(conn.symbolic.clone(), conn.id);
        debug!("connection {} ({}) added as {}", conn.id, conn.kind, conn.symbolic);
        self.by_id.insert(conn.id, conn);
        Ok(())
    }

    /// Drops the handle from every index. The caller is responsible for
    /// purging PIT and FIB state first.
    pub fn remove(&mut self, id: ConnId) -> Option<Connection> {
        let conn = self.by_id.remove(&id)?;
        self.by_symbolic.remove(&conn.symbolic);
        if let ConnKind::Udp { peer } = conn.kind {
            self.by_peer.remove(&peer);
        }
        debug!("connection {} removed", id);
        Some(conn)
    }

    pub fn get(&self, id: ConnId) -> Option<&Connection> {
        self.by_id.get(&id)
    }

    pub fn lookup_peer(&self, peer: SocketAddr) -> Option<ConnId> {
        self.by_peer.get(&peer).copied()
    }

    /// Resolves a symbolic name or a numeric id string to a connection id.
    pub fn resolve(&self, name_or_id: &str) -> Option<ConnId> {
        if let Some(id) = self.by_symbolic.get(name_or_id) {
            return Some(*id);
        }
        let id = ConnId(name_or_id.parse().ok()?);
        self.by_id.contains_key(&id).then_some(id)
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(table: &mut ConnTable, symbolic: &str, port: u16) -> ConnId {
        let id = table.allocate_id();
        let (tx, _rx) = mpsc::channel(4);
        let peer: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        table
            .insert(Connection::new(id, symbolic.into(), ConnKind::Udp { peer }, tx))
            .unwrap();
        id
    }

    #[test]
    fn indexes_stay_in_sync() {
        let mut table = ConnTable::new();
        let id = conn(&mut table, "peer0", 9000);
        assert_eq!(table.resolve("peer0"), Some(id));
        assert_eq!(table.resolve(&id.0.to_string()), Some(id));
        assert_eq!(
            table.lookup_peer("127.0.0.1:9000".parse().unwrap()),
            Some(id)
        );

        table.remove(id).unwrap();
        assert!(table.get(id).is_none());
        assert_eq!(table.resolve("peer0"), None);
        assert_eq!(table.lookup_peer("127.0.0.1:9000".parse().unwrap()), None);
    }

    #[test]
    fn duplicate_symbolic_name_rejected() {
        let mut table = ConnTable::new();
        conn(&mut table, "peer0", 9000);
        let id = table.allocate_id();
        let (tx, _rx) = mpsc::channel(4);
        let peer: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        let err = table
            .insert(Connection::new(id, "peer0".into(), ConnKind::Udp { peer }, tx))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateConnection(_)));
    }

    #[test]
    fn full_queue_reports_would_block() {
        let (tx, mut rx) = mpsc::channel(1);
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let c = Connection::new(ConnId(1), "x".into(), ConnKind::Udp { peer }, tx);
        assert!(c.try_send(Bytes::from_static(b"a")).is_ok());
        assert_eq!(
            c.try_send(Bytes::from_static(b"b")),
            Err(SendFailure::WouldBlock)
        );
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"a"));
    }
}
