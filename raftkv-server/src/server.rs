use std::sync::Arc;

use futures::Future;

use raftkv_core::codec::Request;
use raftkv_core::Connection;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc, oneshot, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::raft::{Address, ClientHandle, Log, Message, Node, TICK_INTERVAL};

/// Maximum number of concurrently served client sessions.
const MAX_CLIENT_CONNECTIONS: usize = 250;

/// Maximum size of an inbound peer datagram.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Splits a node identity into its host and port parts. The split is on the
/// last ':' so IPv6 hosts keep their inner colons.
pub fn split_address(address: &str) -> Result<(String, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| Error::Address(format!("missing port in {}", address)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::Address(format!("invalid port in {}", address)))?;
    Ok((host.to_string(), port))
}

/// A single node of the replicated key-value store. Peers talk over UDP
/// datagrams, clients over TCP sessions; both transports share the node's
/// host:port endpoint.
pub struct Server {
    address: String,
    peers: Vec<String>,
}

impl Server {
    /// Creates a server for a node of the given cluster. The network lists
    /// every member; this node's own address is filtered out of its peers.
    pub fn new(address: &str, network: Vec<String>) -> Self {
        let peers = network
            .into_iter()
            .filter(|peer| peer != address)
            .collect();
        Self {
            address: address.to_owned(),
            peers,
        }
    }

    /// Runs the node until the shutdown future completes, then waits for
    /// the open client sessions to drain.
    pub async fn run(self, shutdown: impl Future) -> Result<()> {
        let (host, port) = split_address(&self.address)?;
        let udp = Arc::new(UdpSocket::bind((host.as_str(), port)).await?);
        let tcp = TcpListener::bind((host.as_str(), port)).await?;
        info!(address = %self.address, peers = ?self.peers, "node starting");

        let (node_tx, node_rx) = mpsc::unbounded_channel::<Message>();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel::<Message>();
        let (client_tx, client_rx) = mpsc::unbounded_channel::<(Request, ClientHandle)>();

        let node = Node::new(&self.address, self.peers.clone(), Log::new(), node_tx);

        tokio::spawn(send_peer_messages(
            udp.clone(),
            node_rx,
            self.address.clone(),
            self.peers.clone(),
        ));
        tokio::spawn(receive_peer_messages(udp, peer_tx));

        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::unbounded_channel();
        let mut listener = Listener {
            listener: tcp,
            limit_connections: Arc::new(Semaphore::new(MAX_CLIENT_CONNECTIONS)),
            client_tx,
            notify_shutdown,
            shutdown_complete_tx,
        };

        tokio::select! {
            res = drive(node, peer_rx, client_rx) => {
                if let Err(err) = res {
                    error!(cause = %err, "consensus loop failed");
                }
            }
            res = listener.run() => {
                if let Err(err) = res {
                    error!(cause = %err, "failed to accept");
                }
            }
            _ = shutdown => {
                info!("shutting down");
            }
        }

        let Listener {
            notify_shutdown,
            shutdown_complete_tx,
            ..
        } = listener;
        drop(notify_shutdown);
        drop(shutdown_complete_tx);
        let _ = shutdown_complete_rx.recv().await;
        Ok(())
    }
}

/// The single consensus task: every timer tick, peer message and client
/// request is handled here, one at a time, so no consensus state is ever
/// touched concurrently.
async fn drive(
    mut node: Node,
    mut peer_rx: mpsc::UnboundedReceiver<Message>,
    mut client_rx: mpsc::UnboundedReceiver<(Request, ClientHandle)>,
) -> Result<()> {
    let mut ticker = time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => node = node.tick()?,
            Some(msg) = peer_rx.recv() => node = node.step(msg)?,
            Some((request, client)) = client_rx.recv() => {
                node = node.client_request(request, client)?
            }
        }
    }
}

/// Forwards the node's outbound messages onto the wire, expanding
/// broadcasts into one datagram per peer. Send failures are logged and the
/// message abandoned; the next heartbeat retransmits whatever mattered.
async fn send_peer_messages(
    socket: Arc<UdpSocket>,
    mut node_rx: mpsc::UnboundedReceiver<Message>,
    address: String,
    peers: Vec<String>,
) {
    let mut endpoints = std::collections::HashMap::new();
    for peer in &peers {
        match split_address(peer) {
            Ok(endpoint) => {
                endpoints.insert(peer.clone(), endpoint);
            }
            Err(err) => error!(%peer, "skipping unaddressable peer: {}", err),
        }
    }

    while let Some(mut msg) = node_rx.recv().await {
        msg.from = Address::Peer(address.clone());
        let targets: Vec<&String> = match &msg.to {
            Address::Peers => peers.iter().collect(),
            Address::Peer(peer) => vec![peer],
            Address::Local => {
                warn!("dropping outbound message to the local address");
                continue;
            }
        };
        for target in targets {
            let endpoint = match endpoints.get(target) {
                Some((host, port)) => (host.as_str(), *port),
                None => {
                    warn!(peer = %target, "dropping message to unknown peer");
                    continue;
                }
            };
            match bincode::serialize(&msg) {
                Ok(data) => {
                    if let Err(err) = socket.send_to(&data, endpoint).await {
                        warn!(peer = %target, "peer send failed: {}", err);
                    }
                }
                Err(err) => {
                    error!("failed to encode peer message: {}", err);
                    break;
                }
            }
        }
    }
}

/// Decodes inbound peer datagrams and feeds them to the consensus task.
/// Malformed datagrams are logged and dropped; they never stop the loop.
async fn receive_peer_messages(socket: Arc<UdpSocket>, peer_tx: mpsc::UnboundedSender<Message>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => match bincode::deserialize::<Message>(&buf[..n]) {
                Ok(msg) => {
                    debug!(%from, "received peer message {:?}", msg.event);
                    if peer_tx.send(msg).is_err() {
                        return;
                    }
                }
                Err(err) => warn!(%from, "dropping malformed peer datagram: {}", err),
            },
            Err(err) => warn!("peer socket receive error: {}", err),
        }
    }
}

struct Listener {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    client_tx: mpsc::UnboundedSender<(Request, ClientHandle)>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::UnboundedSender<()>,
}

struct Handler {
    connection: Connection,
    client_tx: mpsc::UnboundedSender<(Request, ClientHandle)>,
    /// Fires (or closes) when the server shuts down; either way the
    /// session ends.
    shutdown: broadcast::Receiver<()>,
    _shutdown_complete: mpsc::UnboundedSender<()>,
}

impl Listener {
    async fn run(&mut self) -> Result<()> {
        info!("accepting client connections");

        loop {
            let permit = self.limit_connections.clone().acquire_owned().await?;
            let (socket, addr) = self.accept().await?;
            let mut handler = Handler {
                connection: Connection::new(socket),
                client_tx: self.client_tx.clone(),
                shutdown: self.notify_shutdown.subscribe(),
                _shutdown_complete: self.shutdown_complete_tx.clone(),
            };

            tokio::spawn(async move {
                if let Err(err) = handler.run().await {
                    error!(cause = ?err, "client session error, address is {}", addr);
                }
                drop(permit);
            });
        }
    }

    async fn accept(&mut self) -> Result<(TcpStream, std::net::SocketAddr)> {
        let mut backoff = 1;
        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => return Ok((socket, addr)),
                Err(err) => {
                    if backoff > 64 {
                        return Err(err.into());
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

impl Handler {
    /// Serves one session: one request, one response, close. A session that
    /// never gets a response (e.g. because leadership moved without a
    /// verdict) is simply closed and the client retries.
    async fn run(&mut self) -> Result<()> {
        let maybe_request = tokio::select! {
            res = self.connection.read_message::<Request>() => res?,
            _ = self.shutdown.recv() => return Ok(()),
        };
        let request = match maybe_request {
            Some(request) => request,
            None => return Ok(()),
        };
        debug!("received client request {:?}", request);

        let (response_tx, response_rx) = oneshot::channel();
        self.client_tx
            .send((request, ClientHandle::new(response_tx)))?;
        let response = tokio::select! {
            res = response_rx => match res {
                Ok(response) => response,
                Err(_) => return Ok(()),
            },
            _ = self.shutdown.recv() => return Ok(()),
        };
        self.connection.write_message(&response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_split_address() {
        assert_eq!(
            split_address("127.0.0.1:9001"),
            Ok(("127.0.0.1".to_string(), 9001))
        );
        assert_eq!(
            split_address("::1:9001"),
            Ok(("::1".to_string(), 9001))
        );
        assert!(matches!(split_address("localhost"), Err(Error::Address(_))));
        assert!(matches!(
            split_address("localhost:port"),
            Err(Error::Address(_))
        ));
        assert!(matches!(
            split_address("localhost:70000"),
            Err(Error::Address(_))
        ));
    }

    #[test]
    fn test_server_excludes_itself_from_peers() {
        let server = Server::new(
            "a:1",
            vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()],
        );
        assert_eq!(server.peers, vec!["b:2".to_string(), "c:3".to_string()]);
    }
}
