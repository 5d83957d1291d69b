//! The single-threaded reactor around the forwarding engine.
//!
//! One dispatcher task owns the engine and with it every forwarding table;
//! connection readers and writers are separate tasks that exchange only
//! byte buffers with it over channels. Control commands posted from outside
//! the reactor (the startup command file, shutdown) arrive on a dedicated
//! command queue that is drained ahead of packet I/O every iteration. A
//! timer wheel advanced once per tick drives PIT expiry and content-store
//! housekeeping.

use crate::config::ForwarderConfig;
use crate::conn::{ConnKind, Connection};
use crate::control::{self, AddConnKind, ControlOutcome};
use crate::pipeline::{Engine, PacketVerdict};
use crate::timer::{TimerEvent, TimerWheel};
use crate::transport;
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use log::{info, warn};
use rust_ccnf_common::types::{ConnId, Tick};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const WHEEL_SLOTS: usize = 512;
const EVENT_QUEUE_DEPTH: usize = 1024;
const CMD_QUEUE_DEPTH: usize = 16;

/// I/O-side input to the reactor.
#[derive(Debug)]
pub enum Event {
    /// A framed packet from an established connection.
    Packet { conn: ConnId, wire: Bytes },
    /// A datagram on the shared data socket, possibly from a new peer.
    Datagram { peer: SocketAddr, wire: Bytes },
    /// A local control connection was accepted.
    ControlAccepted { stream: TcpStream, peer: SocketAddr },
    /// A connection's transport went away.
    Closed { conn: ConnId },
}

/// Commands posted from outside the reactor.
#[derive(Debug)]
pub enum AdminCmd {
    ControlLine {
        line: String,
        reply: oneshot::Sender<String>,
    },
    Shutdown,
}

/// Cloneable handle for posting commands into a running dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    cmd_tx: mpsc::Sender<AdminCmd>,
}

impl DispatcherHandle {
    /// Runs one control command line and waits for its reply.
    pub async fn control_line(&self, line: impl Into<String>) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(AdminCmd::ControlLine {
                line: line.into(),
                reply: tx,
            })
            .await
            .map_err(|_| anyhow!("dispatcher is not running"))?;
        rx.await.map_err(|_| anyhow!("dispatcher dropped the reply"))
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(AdminCmd::Shutdown).await;
    }
}

pub struct Dispatcher {
    engine: Engine,
    config: ForwarderConfig,
    wheel: TimerWheel,
    tick: Tick,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    cmd_rx: mpsc::Receiver<AdminCmd>,
    // Held so the command queue never closes while the reactor runs.
    _cmd_tx: mpsc::Sender<AdminCmd>,
    // Reader tasks, aborted when their connection is torn down.
    io_tasks: HashMap<ConnId, JoinHandle<()>>,
    data_socket: Option<Arc<UdpSocket>>,
    control_listener: Option<TcpListener>,
}

impl Dispatcher {
    pub fn new(config: ForwarderConfig) -> (Self, DispatcherHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (cmd_tx, cmd_rx) = mpsc::channel(CMD_QUEUE_DEPTH);
        let handle = DispatcherHandle {
            cmd_tx: cmd_tx.clone(),
        };
        let dispatcher = Self {
            engine: Engine::new(&config),
            config,
            wheel: TimerWheel::new(WHEEL_SLOTS),
            tick: 0,
            events_tx,
            events_rx,
            cmd_rx,
            _cmd_tx: cmd_tx,
            io_tasks: HashMap::new(),
            data_socket: None,
            control_listener: None,
        };
        (dispatcher, handle)
    }

    /// Binds the data and control sockets. A failure here is a fatal
    /// initialization failure, distinct from anything that happens once the
    /// reactor is running.
    pub async fn bind(&mut self) -> Result<()> {
        let data = Arc::new(
            UdpSocket::bind(self.config.listen)
                .await
                .with_context(|| format!("binding data socket {}", self.config.listen))?,
        );
        let control = TcpListener::bind(self.config.control)
            .await
            .with_context(|| format!("binding control socket {}", self.config.control))?;
        info!("data plane on udp://{}", self.config.listen);
        info!("control on tcp://{}", self.config.control);
        self.data_socket = Some(data);
        self.control_listener = Some(control);
        Ok(())
    }

    /// The (data, control) addresses actually bound; available after
    /// [`bind`](Self::bind), and the way to learn the ports when the
    /// configuration asked for port 0.
    pub fn local_addrs(&self) -> Option<(SocketAddr, SocketAddr)> {
        let data = self.data_socket.as_ref()?.local_addr().ok()?;
        let control = self.control_listener.as_ref()?.local_addr().ok()?;
        Some((data, control))
    }

    /// The reactor loop. Must run inside a `LocalSet` on a current-thread
    /// runtime; every forwarding structure stays on this one task.
    pub async fn run(mut self) -> Result<()> {
        if self.data_socket.is_none() {
            self.bind().await?;
        }
        let data = self
            .data_socket
            .clone()
            .ok_or_else(|| anyhow!("dispatcher has no data socket"))?;
        let control = self
            .control_listener
            .take()
            .ok_or_else(|| anyhow!("dispatcher has no control listener"))?;

        transport::spawn_udp_listener(data, self.events_tx.clone());
        transport::spawn_control_listener(control, self.events_tx.clone());

        self.wheel.schedule(self.tick, 1, TimerEvent::PitSweep);
        self.wheel.schedule(
            self.tick,
            self.config.cs_sweep_interval_ticks,
            TimerEvent::CsHousekeeping,
        );

        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.tick_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            // Commands drain ahead of packet I/O every iteration.
            while let Ok(cmd) = self.cmd_rx.try_recv() {
                if !self.handle_admin(cmd).await {
                    return Ok(());
                }
            }
            tokio::select! {
                biased;
                Some(cmd) = self.cmd_rx.recv() => {
                    if !self.handle_admin(cmd).await {
                        return Ok(());
                    }
                }
                _ = ticker.tick() => self.on_tick(),
                Some(event) = self.events_rx.recv() => self.on_event(event).await,
            }
        }
    }

    fn on_tick(&mut self) {
        self.tick += 1;
        self.engine.advance_to(self.tick);
        for event in self.wheel.advance(self.tick) {
            match event {
                TimerEvent::PitSweep => {
                    self.engine.sweep_pit();
                    self.wheel.schedule(self.tick, 1, TimerEvent::PitSweep);
                }
                TimerEvent::CsHousekeeping => {
                    self.engine.housekeep_cs(self.config.cs_sweep_budget);
                    self.wheel.schedule(
                        self.tick,
                        self.config.cs_sweep_interval_ticks,
                        TimerEvent::CsHousekeeping,
                    );
                }
            }
        }
    }

    /// Returns `false` when the reactor should stop.
    async fn handle_admin(&mut self, cmd: AdminCmd) -> bool {
        match cmd {
            AdminCmd::ControlLine { line, reply } => {
                let outcome = control::handle_line(&mut self.engine, &line);
                let text = self.complete(outcome).await;
                let _ = reply.send(text);
                true
            }
            AdminCmd::Shutdown => {
                info!("shutdown requested");
                false
            }
        }
    }

    async fn on_event(&mut self, event: Event) {
        match event {
            Event::Packet { conn, wire } => self.process(conn, wire).await,
            Event::Datagram { peer, wire } => {
                let conn = match self.engine.conns.lookup_peer(peer) {
                    Some(conn) => conn,
                    None => match self.admit_udp_peer(peer) {
                        Some(conn) => conn,
                        None => return,
                    },
                };
                self.process(conn, wire).await;
            }
            Event::ControlAccepted { stream, peer } => {
                let id = self.engine.conns.allocate_id();
                let (tx, rx) = mpsc::channel(self.config.send_queue_depth);
                let handle = transport::spawn_tcp_conn(id, stream, self.events_tx.clone(), rx);
                let conn = Connection::new(id, format!("local-{}", id.0), ConnKind::Local { peer }, tx);
                if let Err(e) = self.engine.conns.insert(conn) {
                    warn!("refusing control connection from {peer}: {e}");
                    handle.abort();
                    return;
                }
                self.io_tasks.insert(id, handle);
                info!("control connection {id} accepted from {peer}");
            }
            Event::Closed { conn } => {
                if self.engine.remove_connection(conn).is_some() {
                    info!("connection {conn} closed by peer");
                }
                if let Some(handle) = self.io_tasks.remove(&conn) {
                    handle.abort();
                }
            }
        }
    }

    async fn process(&mut self, conn: ConnId, wire: Bytes) {
        if let PacketVerdict::Control(line) = self.engine.handle_packet(conn, wire) {
            let outcome = control::handle_line(&mut self.engine, &line);
            let reply = self.complete(outcome).await;
            self.engine.send_control_reply(conn, &reply);
        }
    }

    /// Creates a connection for an unknown peer that reached the shared
    /// data socket; replies to it go out through the same socket.
    fn admit_udp_peer(&mut self, peer: SocketAddr) -> Option<ConnId> {
        let socket = Arc::clone(self.data_socket.as_ref()?);
        let id = self.engine.conns.allocate_id();
        let (tx, rx) = mpsc::channel(self.config.send_queue_depth);
        transport::spawn_udp_peer_writer(socket, peer, rx);
        let conn = Connection::new(id, format!("udp-{peer}"), ConnKind::Udp { peer }, tx);
        match self.engine.conns.insert(conn) {
            Ok(()) => {
                info!("connection {id} admitted for {peer}");
                Some(id)
            }
            Err(e) => {
                warn!("could not admit {peer}: {e}");
                None
            }
        }
    }

    async fn complete(&mut self, outcome: ControlOutcome) -> String {
        match outcome {
            ControlOutcome::Reply(reply) => reply,
            ControlOutcome::AddConnection {
                seq,
                kind,
                peer,
                symbolic,
            } => match self.connect(kind, peer, symbolic).await {
                Ok(id) => format!("{} id={}", control::ack(seq), id.0),
                Err(e) => control::nack(seq, &e.to_string()),
            },
            ControlOutcome::ConnectionRemoved { id, reply } => {
                if let Some(handle) = self.io_tasks.remove(&id) {
                    handle.abort();
                }
                reply
            }
        }
    }

    async fn connect(
        &mut self,
        kind: AddConnKind,
        peer: SocketAddr,
        symbolic: String,
    ) -> Result<ConnId> {
        let id = self.engine.conns.allocate_id();
        let (tx, rx) = mpsc::channel(self.config.send_queue_depth);
        let (conn, handle) = match kind {
            AddConnKind::Udp => {
                let local = SocketAddr::new(unspecified_for(peer), 0);
                let socket = UdpSocket::bind(local).await.context("binding tunnel socket")?;
                socket
                    .connect(peer)
                    .await
                    .with_context(|| format!("connecting tunnel to {peer}"))?;
                let handle = transport::spawn_udp_tunnel(
                    id,
                    Arc::new(socket),
                    self.events_tx.clone(),
                    rx,
                );
                (
                    Connection::new(id, symbolic, ConnKind::Udp { peer }, tx),
                    handle,
                )
            }
            AddConnKind::Tcp => {
                let stream = TcpStream::connect(peer)
                    .await
                    .with_context(|| format!("connecting to {peer}"))?;
                let handle = transport::spawn_tcp_conn(id, stream, self.events_tx.clone(), rx);
                (
                    Connection::new(id, symbolic, ConnKind::Tcp { peer }, tx),
                    handle,
                )
            }
        };
        if let Err(e) = self.engine.conns.insert(conn) {
            handle.abort();
            return Err(e.into());
        }
        self.io_tasks.insert(id, handle);
        info!("connection {id} to {peer} established");
        Ok(id)
    }
}

fn unspecified_for(peer: SocketAddr) -> IpAddr {
    if peer.is_ipv4() {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    }
}
