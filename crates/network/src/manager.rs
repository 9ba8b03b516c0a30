//! The connection manager: one tokio task owning the listener, every peer
//! connection, and the send/dial request queues.

use crate::connection::{read_loop, write_loop, ConnEvent};
use crate::processor::{ProcessorQueue, QueueItem};
use pqledger_storage::AddressStore;
use pqledger_types::error::NetworkError;
use pqledger_types::message::{
    ConnectionRequest, Message, MessageRequest, NodeType, Payload, SendMode, VersionPayload,
    PROTOCOL_VERSION,
};
use pqledger_types::Digest;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, trace, warn};

/// Listen backlog of the server socket.
const LISTEN_BACKLOG: u32 = 30;

/// Bound on connect attempts to one endpoint.
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection outbound frame queue depth.
const WRITE_QUEUE_DEPTH: usize = 256;

/// Static configuration of the connection manager.
#[derive(Clone)]
pub struct NetworkConfig {
    pub listen_port: u16,
    pub local_id: Digest,
    pub node_type: NodeType,
    /// Peers whose connections are flagged as UNL links.
    pub unl: HashSet<Digest>,
    /// Endpoints from configuration, used when the address store has none.
    pub bootstrap_addresses: HashMap<Digest, Vec<String>>,
}

struct PeerConn {
    /// Remote endpoint, for logs while the peer is still anonymous.
    label: String,
    peer: Option<Digest>,
    confirmed: bool,
    is_unl: bool,
    writer: mpsc::Sender<Vec<u8>>,
    reader_task: JoinHandle<()>,
}

struct Manager {
    config: NetworkConfig,
    addresses: Arc<AddressStore>,
    queue: Arc<ProcessorQueue>,
    events_tx: mpsc::Sender<ConnEvent>,
    conns: HashMap<u64, PeerConn>,
    by_peer: HashMap<Digest, u64>,
    next_conn_id: u64,
}

impl Manager {
    fn version_frame(&self) -> Option<Vec<u8>> {
        let message = Message::new(Payload::Version(VersionPayload {
            version: PROTOCOL_VERSION,
            node_type: self.config.node_type,
            peer_id: self.config.local_id,
        }));
        match message.encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(target: "net", "failed to encode VERSION: {e}");
                None
            }
        }
    }

    fn ack_frame(&self) -> Option<Vec<u8>> {
        match Message::new(Payload::Ack).encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(target: "net", "failed to encode ACK: {e}");
                None
            }
        }
    }

    /// Register a stream as a connection and start its reader and writer.
    fn adopt_stream(
        &mut self,
        stream: TcpStream,
        peer: Option<Digest>,
        is_unl: bool,
        label: String,
    ) -> u64 {
        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;

        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        tokio::spawn(write_loop(conn_id, write_half, writer_rx));
        let reader_task = tokio::spawn(read_loop(conn_id, read_half, self.events_tx.clone()));

        if let Some(peer) = peer {
            self.by_peer.insert(peer, conn_id);
        }
        self.conns.insert(
            conn_id,
            PeerConn {
                label,
                peer,
                confirmed: false,
                is_unl,
                writer: writer_tx,
                reader_task,
            },
        );
        conn_id
    }

    fn remove_connection(&mut self, conn_id: u64) {
        if let Some(conn) = self.conns.remove(&conn_id) {
            conn.reader_task.abort();
            if let Some(peer) = conn.peer {
                if self.by_peer.get(&peer) == Some(&conn_id) {
                    self.by_peer.remove(&peer);
                }
            }
            debug!(target: "net", "connection {conn_id} ({}) removed", conn.label);
        }
    }

    fn send_to_conn(&mut self, conn_id: u64, bytes: Vec<u8>) {
        let dead = match self.conns.get(&conn_id) {
            Some(conn) => conn.writer.try_send(bytes).is_err(),
            None => false,
        };
        if dead {
            warn!(target: "net", "connection {conn_id}: write queue unavailable, dropping link");
            self.remove_connection(conn_id);
        }
    }

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        let label = addr.to_string();
        let conn_id = self.adopt_stream(stream, None, false, label.clone());
        debug!(target: "net", "accepted connection {conn_id} from {label}");
    }

    /// Handle a VERSION frame: name the connection, resolve duplicates
    /// deterministically, answer with ACK.
    fn handle_version(&mut self, conn_id: u64, version: VersionPayload) {
        let already_confirmed = match self.conns.get(&conn_id) {
            Some(conn) => conn.confirmed,
            None => return,
        };
        if already_confirmed {
            trace!(target: "net", "connection {conn_id}: duplicate VERSION ignored");
            return;
        }
        let peer_id = version.peer_id;

        // Symmetric simultaneous dials leave both sides with two links. The
        // node with the smaller id keeps the newer one; both agree.
        let mut inherited_unl = false;
        if let Some(&existing) = self.by_peer.get(&peer_id) {
            if existing != conn_id {
                if self.config.local_id > peer_id {
                    debug!(target: "net",
                        "duplicate connection to {}: keeping the established link",
                        peer_id.short());
                    self.remove_connection(conn_id);
                    return;
                }
                inherited_unl = self
                    .conns
                    .get(&existing)
                    .map(|c| c.is_unl)
                    .unwrap_or(false);
                debug!(target: "net",
                    "duplicate connection to {}: replacing the established link",
                    peer_id.short());
                self.remove_connection(existing);
            }
        }

        let ack = self.ack_frame();
        if let Some(conn) = self.conns.get_mut(&conn_id) {
            conn.peer = Some(peer_id);
            conn.confirmed = true;
            conn.is_unl = conn.is_unl || inherited_unl || self.config.unl.contains(&peer_id);
            info!(target: "net",
                "peer {} confirmed on connection {conn_id} ({:?})",
                peer_id.short(), version.node_type);
        }
        self.by_peer.insert(peer_id, conn_id);
        if let Some(bytes) = ack {
            self.send_to_conn(conn_id, bytes);
        }
    }

    fn handle_frame(&mut self, conn_id: u64, message: Message) {
        match message.payload {
            Payload::Version(version) => self.handle_version(conn_id, version),
            Payload::Ack => {
                // Idempotent: repeated ACKs on a confirmed link are no-ops.
                if let Some(conn) = self.conns.get_mut(&conn_id) {
                    if !conn.confirmed {
                        conn.confirmed = true;
                        info!(target: "net",
                            "outbound connection {conn_id} to {} confirmed", conn.label);
                    }
                }
            }
            payload => {
                let Some(conn) = self.conns.get(&conn_id) else {
                    return;
                };
                if !conn.confirmed {
                    debug!(target: "net",
                        "connection {conn_id}: {} before VERSION, dropped",
                        payload.message_type());
                    return;
                }
                let Some(peer) = conn.peer else {
                    return;
                };
                self.queue.push(QueueItem {
                    peer,
                    is_unl: conn.is_unl,
                    message: Message::new(payload),
                });
            }
        }
    }

    fn handle_message_request(&mut self, request: MessageRequest) {
        let bytes = match request.message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target: "net", "failed to encode outbound {}: {e}",
                    request.message.message_type());
                return;
            }
        };
        let targets: Vec<u64> = match request.mode {
            SendMode::One(peer) => self
                .by_peer
                .get(&peer)
                .filter(|&&cid| self.conns.get(&cid).map(|c| c.confirmed).unwrap_or(false))
                .into_iter()
                .copied()
                .collect(),
            SendMode::Broadcast { exclude } => self
                .conns
                .iter()
                .filter(|(_, c)| {
                    c.confirmed && exclude.map(|x| c.peer != Some(x)).unwrap_or(true)
                })
                .map(|(&cid, _)| cid)
                .collect(),
            SendMode::UnlCast { exclude } => self
                .conns
                .iter()
                .filter(|(_, c)| c.confirmed && c.is_unl && exclude.map(|x| c.peer != Some(x)).unwrap_or(true))
                .map(|(&cid, _)| cid)
                .collect(),
        };
        for conn_id in targets {
            self.send_to_conn(conn_id, bytes.clone());
        }
    }

    /// Open a connection to a peer: address store first, configuration
    /// fallback second, endpoints tried in order.
    async fn handle_connection_request(&mut self, request: ConnectionRequest) {
        let peer = request.peer;
        if self.by_peer.contains_key(&peer) {
            trace!(target: "net", "already connected to {}", peer.short());
            return;
        }
        let endpoints = match self.addresses.get(&peer) {
            Ok(Some(stored)) if !stored.is_empty() => stored,
            _ => self
                .config
                .bootstrap_addresses
                .get(&peer)
                .cloned()
                .unwrap_or_default(),
        };
        if endpoints.is_empty() {
            warn!(target: "net", "no known endpoints for {}", peer.short());
            return;
        }

        for endpoint in endpoints {
            // Bare hosts get the default port; resolution (including DNS)
            // happens inside connect.
            let target = resolve_endpoint(&endpoint, self.config.listen_port);
            match timeout(DIAL_TIMEOUT, TcpStream::connect(target.as_str())).await {
                Ok(Ok(stream)) => {
                    let is_unl = request.unl || self.config.unl.contains(&peer);
                    let conn_id = self.adopt_stream(stream, Some(peer), is_unl, target.clone());
                    info!(target: "net", "dialed {} on connection {conn_id}", peer.short());
                    if let Some(version) = self.version_frame() {
                        self.send_to_conn(conn_id, version);
                    }
                    return;
                }
                Ok(Err(e)) => debug!(target: "net", "connect {target} failed: {e}"),
                Err(_) => debug!(target: "net", "connect {target} timed out"),
            }
        }
        warn!(target: "net", "all endpoints for {} failed", peer.short());
    }

    fn shutdown(&mut self) {
        let ids: Vec<u64> = self.conns.keys().copied().collect();
        for conn_id in ids {
            self.remove_connection(conn_id);
        }
    }
}

/// Endpoints may be `host`, `host:port`, or a literal socket address; a
/// bare host gets the default port appended.
fn resolve_endpoint(endpoint: &str, default_port: u16) -> String {
    if endpoint.parse::<SocketAddr>().is_ok() {
        return endpoint.to_string();
    }
    if let Ok(ip) = endpoint.parse::<std::net::IpAddr>() {
        return SocketAddr::new(ip, default_port).to_string();
    }
    if endpoint.rsplit(':').next().is_some_and(|p| p.parse::<u16>().is_ok())
        && endpoint.contains(':')
    {
        return endpoint.to_string();
    }
    format!("{endpoint}:{default_port}")
}

/// Bind the server socket and run the connection manager until shutdown.
pub async fn run_network(
    config: NetworkConfig,
    addresses: Arc<AddressStore>,
    queue: Arc<ProcessorQueue>,
    mut message_requests: mpsc::Receiver<MessageRequest>,
    mut connection_requests: mpsc::Receiver<ConnectionRequest>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), NetworkError> {
    let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(bind_addr)?;
    let listener = socket.listen(LISTEN_BACKLOG)?;
    info!(target: "net", "listening on {bind_addr}");

    let (events_tx, mut events_rx) = mpsc::channel::<ConnEvent>(1024);
    let mut manager = Manager {
        config,
        addresses,
        queue,
        events_tx,
        conns: HashMap::new(),
        by_peer: HashMap::new(),
        next_conn_id: 1,
    };

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => manager.accept(stream, addr),
                Err(e) => warn!(target: "net", "accept failed: {e}"),
            },
            Some(event) = events_rx.recv() => match event {
                ConnEvent::Frame { conn, message } => manager.handle_frame(conn, message),
                ConnEvent::Closed { conn } => manager.remove_connection(conn),
            },
            Some(request) = message_requests.recv() => manager.handle_message_request(request),
            Some(request) = connection_requests.recv() => manager.handle_connection_request(request).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    manager.shutdown();
    info!(target: "net", "connection manager stopped");
    Ok(())
}
