mod candidate;
mod follower;
mod leader;

use std::time::Duration;

use rand::Rng;
use raftkv_core::codec::{Request, Response};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::raft::log::Log;
use crate::raft::message::{Address, Event, Message};
use crate::raft::node::candidate::Candidate;
use crate::raft::node::follower::Follower;
use crate::raft::node::leader::Leader;

/// The interval between consensus timer ticks; one tick is the base unit
/// for election timeouts and heartbeat intervals.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Election timeouts are a uniform draw from {1, 2, 3} times this, in ticks.
const ELECTION_TIMEOUT_UNIT: u64 = 5;

/// Heartbeat intervals are a uniform draw from {1..=MAX}, in ticks; always
/// below the election timeout floor.
const HEARTBEAT_INTERVAL_MAX: u64 = 3;

/// The maximum number of entries in one AppendEntries batch.
const REPLICATION_BATCH: u64 = 100;

/// Draws a randomized election timeout, uniform over {5, 10, 15} ticks, so
/// that peers rarely time out in the same tick.
fn election_timeout() -> u64 {
    rand::thread_rng().gen_range(1..=3) * ELECTION_TIMEOUT_UNIT
}

/// Draws a randomized heartbeat interval, uniform over {1, 2, 3} ticks.
fn heartbeat_interval() -> u64 {
    rand::thread_rng().gen_range(1..=HEARTBEAT_INTERVAL_MAX)
}

/// A handle for responding to a connected client session. Each session gets
/// at most one response; dropping the handle leaves the client to retry.
#[derive(Debug)]
pub struct ClientHandle(oneshot::Sender<Response>);

impl ClientHandle {
    pub fn new(tx: oneshot::Sender<Response>) -> Self {
        Self(tx)
    }

    pub fn respond(self, response: Response) {
        // The session may already be gone; the client retries on its own.
        let _ = self.0.send(response);
    }
}

/// The local Raft node, in one of its three roles.
pub enum Node {
    Follower(RoleNode<Follower>),
    Candidate(RoleNode<Candidate>),
    Leader(RoleNode<Leader>),
}

impl Node {
    /// Creates a new node, starting as a follower with an empty log.
    pub fn new(
        id: &str,
        peers: Vec<String>,
        log: Log,
        node_tx: mpsc::UnboundedSender<Message>,
    ) -> Self {
        let node = RoleNode {
            id: id.to_owned(),
            peers,
            term: 0,
            voted_for: None,
            leader: None,
            log,
            node_tx,
            role: Follower::new(),
        };
        info!(id = %node.id, "starting as follower");
        node.into()
    }

    /// Processes an inbound peer message, in the current role. Transitions
    /// forced by the message re-dispatch it to the new role, so the caller
    /// delivers each message exactly once.
    pub fn step(self, msg: Message) -> Result<Self> {
        debug!("stepping {:?}", msg);
        match self {
            Node::Follower(n) => n.step(msg),
            Node::Candidate(n) => n.step(msg),
            Node::Leader(n) => n.step(msg),
        }
    }

    /// Processes an inbound client request. Non-leaders redirect to the
    /// last known leader.
    pub fn client_request(self, request: Request, client: ClientHandle) -> Result<Self> {
        match self {
            Node::Follower(n) => {
                n.redirect(client);
                Ok(n.into())
            }
            Node::Candidate(n) => {
                n.redirect(client);
                Ok(n.into())
            }
            Node::Leader(n) => n.client_request(request, client),
        }
    }

    /// Moves time forward by one tick.
    pub fn tick(self) -> Result<Self> {
        match self {
            Node::Follower(n) => n.tick(),
            Node::Candidate(n) => n.tick(),
            Node::Leader(n) => n.tick(),
        }
    }
}

impl From<RoleNode<Follower>> for Node {
    fn from(rn: RoleNode<Follower>) -> Self {
        Node::Follower(rn)
    }
}

impl From<RoleNode<Candidate>> for Node {
    fn from(rn: RoleNode<Candidate>) -> Self {
        Node::Candidate(rn)
    }
}

impl From<RoleNode<Leader>> for Node {
    fn from(rn: RoleNode<Leader>) -> Self {
        Node::Leader(rn)
    }
}

/// A Raft node with role R. The shared fields persist across every role
/// change; the role carries only role-specific state, and swapping it is
/// also what cancels the outgoing role's timers.
pub struct RoleNode<R> {
    /// This node's host:port identity
    id: String,
    /// The other cluster members, excluding this node
    peers: Vec<String>,
    /// The highest term this node has observed
    term: u64,
    /// The candidate granted this node's vote in the current term, if any
    voted_for: Option<String>,
    /// The last known leader for the current term, used to redirect clients
    leader: Option<String>,
    log: Log,
    node_tx: mpsc::UnboundedSender<Message>,
    role: R,
}

impl<R> RoleNode<R> {
    /// Transforms the node into another role.
    fn become_role<T>(self, role: T) -> RoleNode<T> {
        RoleNode {
            id: self.id,
            peers: self.peers,
            term: self.term,
            voted_for: self.voted_for,
            leader: self.leader,
            log: self.log,
            node_tx: self.node_tx,
            role,
        }
    }

    /// The number of votes or replicas that forms a strict majority of the
    /// cluster, this node included.
    fn quorum(&self) -> u64 {
        (self.peers.len() as u64 + 1) / 2 + 1
    }

    fn send(&self, to: Address, event: Event) -> Result<()> {
        let msg = Message {
            term: self.term,
            from: Address::Local,
            to,
            event,
        };
        debug!("sending {:?}", msg);
        Ok(self.node_tx.send(msg)?)
    }

    /// Discards messages that cannot be meaningful in any role.
    fn validate(&self, msg: &Message) -> Result<()> {
        match &msg.from {
            Address::Peers => Err(Error::Internal("message from broadcast address".into())),
            Address::Local => Err(Error::Internal("message from local node".into())),
            Address::Peer(_) => Ok(()),
        }
    }

    /// Answers a client with a redirect to the last known leader, if any.
    fn redirect(&self, client: ClientHandle) {
        client.respond(Response::Redirect {
            leader: self.leader.clone(),
        });
    }
}

/// Logs and drops a message that carries no meaning in the current role.
fn drop_unexpected(role: &str, msg: &Message) {
    warn!("{} received unexpected message {:?}", role, msg.event);
}

/// A bare three-node RoleNode for role unit tests, with the outbound
/// receiver to observe what the role sends.
#[cfg(test)]
fn test_node(term: u64, log: Log) -> (RoleNode<()>, mpsc::UnboundedReceiver<Message>) {
    let (node_tx, node_rx) = mpsc::unbounded_channel();
    (
        RoleNode {
            id: "a:1".to_string(),
            peers: vec!["b:2".to_string(), "c:3".to_string()],
            term,
            voted_for: None,
            leader: None,
            log,
            node_tx,
            role: (),
        },
        node_rx,
    )
}
