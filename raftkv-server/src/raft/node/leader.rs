use std::cmp::min;
use std::collections::HashMap;

use raftkv_core::codec::{Command, Request, Response};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::raft::message::{Address, Event, Message};
use crate::raft::node::follower::Follower;
use crate::raft::node::{
    drop_unexpected, heartbeat_interval, ClientHandle, Node, RoleNode, REPLICATION_BATCH,
};

/// A leader orders client commands into the log, replicates them to the
/// followers, and acknowledges a client once a majority holds its entry.
#[derive(Debug)]
pub struct Leader {
    /// Ticks since the last replication broadcast
    heartbeat_ticks: u64,
    /// The randomized interval between broadcasts, in ticks
    heartbeat_interval: u64,
    /// The next log index to send to each node
    next_index: HashMap<String, u64>,
    /// The highest log index known replicated on each node
    match_index: HashMap<String, u64>,
    /// Clients waiting for the entry at their index to commit
    waiting_clients: HashMap<u64, ClientHandle>,
}

impl Leader {
    /// Creates a new leader role. Replication bookkeeping covers the peers
    /// and this node itself, so majority arithmetic is uniform.
    pub fn new(peers: &[String], id: &str, last_index: u64) -> Self {
        let mut leader = Self {
            heartbeat_ticks: 0,
            heartbeat_interval: heartbeat_interval(),
            next_index: HashMap::new(),
            match_index: HashMap::new(),
            waiting_clients: HashMap::new(),
        };
        for node in peers.iter().map(String::as_str).chain([id]) {
            leader.next_index.insert(node.to_string(), last_index + 1);
            leader.match_index.insert(node.to_string(), 0);
        }
        leader
    }
}

impl RoleNode<Leader> {
    /// Steps down on discovering a newer term. Every waiting client is
    /// failed: whether its entry survives is for the next leader to decide,
    /// so the outcome is unknown and the client must re-query.
    fn become_follower(mut self, term: u64) -> RoleNode<Follower> {
        info!(term, "discovered newer term, stepping down");
        self.term = term;
        self.voted_for = None;
        self.leader = None;
        for (_, client) in self.role.waiting_clients.drain() {
            client.respond(Response::Result {
                success: false,
                state: None,
            });
        }
        self.become_role(Follower::new())
    }

    /// Sends the next batch of entries to a peer. With nothing pending this
    /// is an empty batch, which serves as the heartbeat.
    fn replicate(&self, peer: &str) -> Result<()> {
        let next = self
            .role
            .next_index
            .get(peer)
            .copied()
            .ok_or_else(|| Error::Internal(format!("unknown peer {}", peer)))?;
        let prev_log_index = min(self.log.last_index, next.saturating_sub(1));
        let prev_log_term = self.log.get(prev_log_index).map(|e| e.term).unwrap_or(0);
        let entries = self
            .log
            .slice(prev_log_index + 1, prev_log_index + 1 + REPLICATION_BATCH);
        self.send(
            Address::Peer(peer.to_string()),
            Event::AppendEntries {
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit: self.log.commit_index,
            },
        )
    }

    pub(super) fn replicate_all(&self) -> Result<()> {
        for peer in &self.peers {
            self.replicate(peer)?;
        }
        Ok(())
    }

    /// The lower median of all match indexes: the highest index replicated
    /// on a strict majority of the cluster, this node included.
    fn majority_index(&self) -> u64 {
        let mut indexes: Vec<u64> = self.role.match_index.values().copied().collect();
        indexes.sort_unstable();
        indexes[(indexes.len() - 1) / 2]
    }

    /// Records a follower's replication progress and advances the commit
    /// cursor where a majority allows. Our own progress flows through here
    /// too, so a cluster of one commits without any peer traffic.
    pub(super) fn append_entries_response(
        &mut self,
        from: &str,
        success: bool,
        last_index: u64,
    ) -> Result<()> {
        if success {
            self.role.match_index.insert(from.to_string(), last_index);
            self.role.next_index.insert(from.to_string(), last_index + 1);
            self.role
                .match_index
                .insert(self.id.clone(), self.log.last_index);
            self.role
                .next_index
                .insert(self.id.clone(), self.log.last_index + 1);
            let majority_index = self.majority_index();
            // Entries are only committed by counting replicas when the top
            // of the majority range is from our own term; older entries
            // then commit transitively.
            if majority_index > self.log.commit_index
                && self.log.get(majority_index).map(|e| e.term) == Some(self.term)
            {
                self.log.commit(majority_index);
                info!(commit_index = self.log.commit_index, "advanced commit index");
            }
            self.respond_committed();
        } else {
            // Walk one entry back and retry; prev_log_index 0 always
            // resolves against the sentinel, so the floor is 1.
            let next = self.role.next_index.entry(from.to_string()).or_insert(1);
            if *next > 1 {
                *next -= 1;
            }
        }
        Ok(())
    }

    /// Releases every waiting client whose entry has committed.
    fn respond_committed(&mut self) {
        let commit_index = self.log.commit_index;
        let ready: Vec<u64> = self
            .role
            .waiting_clients
            .keys()
            .copied()
            .filter(|index| *index <= commit_index)
            .collect();
        for index in ready {
            if let Some(client) = self.role.waiting_clients.remove(&index) {
                client.respond(Response::Result {
                    success: true,
                    state: None,
                });
            }
        }
    }

    pub fn step(mut self, msg: Message) -> Result<Node> {
        if let Err(err) = self.validate(&msg) {
            warn!("ignoring invalid message: {}", err);
            return Ok(self.into());
        }
        let from = match &msg.from {
            Address::Peer(peer) => peer.clone(),
            _ => return Ok(self.into()),
        };
        if msg.term > self.term {
            return self.become_follower(msg.term).step(msg);
        }

        match msg.event {
            Event::AppendEntriesResponse {
                success,
                last_index,
            } => self.append_entries_response(&from, success, last_index)?,

            // Stray votes from the election we already won.
            Event::RequestVote { .. } | Event::RequestVoteResponse { .. } => {}

            Event::AppendEntries { .. } => drop_unexpected("leader", &msg),
        }
        Ok(self.into())
    }

    pub fn client_request(mut self, request: Request, client: ClientHandle) -> Result<Node> {
        match request {
            Request::Get => {
                client.respond(Response::Result {
                    success: true,
                    state: Some(self.log.state.snapshot()),
                });
            }
            Request::Replicate(command) => {
                // Deleting a key absent from the applied state is refused
                // up front; apply itself stays total.
                if let Command::Delete { key } = &command {
                    if !self.log.state.contains_key(key) {
                        client.respond(Response::Result {
                            success: false,
                            state: None,
                        });
                        return Ok(self.into());
                    }
                }
                let index = self.log.append(self.term, command);
                self.role.waiting_clients.insert(index, client);
                let (id, last_index) = (self.id.clone(), self.log.last_index);
                self.append_entries_response(&id, true, last_index)?;
            }
        }
        Ok(self.into())
    }

    /// Broadcasts replication batches whenever the heartbeat interval
    /// elapses, then draws a fresh interval.
    pub fn tick(mut self) -> Result<Node> {
        self.role.heartbeat_ticks += 1;
        if self.role.heartbeat_ticks >= self.role.heartbeat_interval {
            self.role.heartbeat_ticks = 0;
            self.role.heartbeat_interval = heartbeat_interval();
            self.replicate_all()?;
        }
        Ok(self.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raft::log::Log;
    use crate::raft::node::test_node;
    use raftkv_core::codec::Entry;
    use tokio::sync::{mpsc, oneshot};

    /// A leader of term 2 with its no-op entry appended, as it looks right
    /// after winning an election in a three-node cluster.
    fn leader() -> (RoleNode<Leader>, mpsc::UnboundedReceiver<Message>) {
        let (node, node_rx) = test_node(2, Log::new());
        let role = Leader::new(&node.peers, "a:1", node.log.last_index);
        let mut node = node.become_role(role);
        node.leader = Some("a:1".to_string());
        node.voted_for = Some("a:1".to_string());
        node.log.append(2, Command::NoOp);
        let last_index = node.log.last_index;
        node.append_entries_response("a:1", true, last_index).unwrap();
        (node, node_rx)
    }

    fn response(from: &str, success: bool, last_index: u64) -> Message {
        Message {
            term: 2,
            from: Address::Peer(from.to_string()),
            to: Address::Peer("a:1".to_string()),
            event: Event::AppendEntriesResponse {
                success,
                last_index,
            },
        }
    }

    fn set(key: &str, value: &str) -> Request {
        Request::Replicate(Command::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    #[test]
    fn test_commits_once_a_majority_confirms() {
        let (node, _rx) = leader();
        let (tx, mut client_rx) = oneshot::channel();
        let node = node
            .client_request(set("x", "1"), ClientHandle::new(tx))
            .unwrap();
        // Only this node holds the entry so far.
        assert!(client_rx.try_recv().is_err());

        let node = node.step(response("b:2", true, 2)).unwrap();
        match &node {
            Node::Leader(n) => {
                assert_eq!(n.log.commit_index, 2);
                assert_eq!(n.log.state.snapshot().get("x"), Some(&"1".to_string()));
            }
            _ => panic!("expected leader"),
        }
        assert_eq!(
            client_rx.try_recv().unwrap(),
            Response::Result {
                success: true,
                state: None
            }
        );
    }

    #[test]
    fn test_does_not_commit_entries_of_an_older_term_by_counting() {
        // A log carrying an uncommitted entry from term 1, taken over by a
        // term 3 leader that has not yet replicated its own no-op.
        let mut log = Log::new();
        log.append(1, Command::Set {
            key: "x".to_string(),
            value: "1".to_string(),
        });
        let (node, _rx) = test_node(3, log);
        let role = Leader::new(&node.peers, "a:1", node.log.last_index);
        let mut node = node.become_role(role);
        node.log.append(3, Command::NoOp);

        // A majority holds the term 1 entry, but not our no-op yet.
        node.append_entries_response("b:2", true, 1).unwrap();
        assert_eq!(node.log.commit_index, 0);

        // Once the majority holds the no-op, everything below commits too.
        node.append_entries_response("b:2", true, 2).unwrap();
        assert_eq!(node.log.commit_index, 2);
    }

    #[test]
    fn test_walks_next_index_back_for_a_lagging_follower() {
        let (mut node, mut rx) = leader();
        while rx.try_recv().is_ok() {}
        node.role.next_index.insert("b:2".to_string(), 3);

        let node = node.step(response("b:2", false, 0)).unwrap();
        let node = match node {
            Node::Leader(n) => n,
            _ => panic!("expected leader"),
        };
        assert_eq!(node.role.next_index["b:2"], 2);
        let node = node.step(response("b:2", false, 0)).unwrap();
        let node = match node {
            Node::Leader(n) => n,
            _ => panic!("expected leader"),
        };
        assert_eq!(node.role.next_index["b:2"], 1);
        // The floor is 1: the sentinel always matches.
        let node = node.step(response("b:2", false, 0)).unwrap();
        match &node {
            Node::Leader(n) => assert_eq!(n.role.next_index["b:2"], 1),
            _ => panic!("expected leader"),
        }
    }

    #[test]
    fn test_replicates_from_next_index() {
        let (mut node, mut rx) = leader();
        while rx.try_recv().is_ok() {}
        node.log.append(2, Command::Set {
            key: "x".to_string(),
            value: "1".to_string(),
        });
        node.role.next_index.insert("b:2".to_string(), 1);

        node.replicate("b:2").unwrap();
        let msg = rx.try_recv().unwrap();
        match msg.event {
            Event::AppendEntries {
                prev_log_index,
                prev_log_term,
                entries,
                ..
            } => {
                assert_eq!(prev_log_index, 0);
                assert_eq!(prev_log_term, 0);
                assert_eq!(
                    entries,
                    vec![
                        Entry {
                            term: 2,
                            command: Command::NoOp
                        },
                        Entry {
                            term: 2,
                            command: Command::Set {
                                key: "x".to_string(),
                                value: "1".to_string()
                            }
                        }
                    ]
                );
            }
            event => panic!("unexpected event {:?}", event),
        }
    }

    #[test]
    fn test_stepping_down_fails_waiting_clients() {
        let (node, _rx) = leader();
        let (tx, mut client_rx) = oneshot::channel();
        let node = node
            .client_request(set("x", "1"), ClientHandle::new(tx))
            .unwrap();

        let node = node
            .step(Message {
                term: 3,
                from: Address::Peer("b:2".to_string()),
                to: Address::Peer("a:1".to_string()),
                event: Event::RequestVoteResponse { vote_granted: false },
            })
            .unwrap();
        assert!(matches!(node, Node::Follower(_)));
        assert_eq!(
            client_rx.try_recv().unwrap(),
            Response::Result {
                success: false,
                state: None
            }
        );
    }

    #[test]
    fn test_heartbeat_fires_within_its_interval() {
        let (node, mut rx) = leader();
        while rx.try_recv().is_ok() {}
        let mut node: Node = node.into();
        for _ in 0..3 {
            node = node.tick().unwrap();
        }
        // Two peers, at least one broadcast.
        let mut heartbeats = 0;
        while let Ok(msg) = rx.try_recv() {
            assert!(matches!(msg.event, Event::AppendEntries { .. }));
            heartbeats += 1;
        }
        assert!(heartbeats >= 2);
    }

    #[test]
    fn test_get_returns_a_snapshot_immediately() {
        let (node, _rx) = leader();
        let (tx, mut client_rx) = oneshot::channel();
        let _ = node.client_request(Request::Get, ClientHandle::new(tx)).unwrap();
        match client_rx.try_recv().unwrap() {
            Response::Result {
                success: true,
                state: Some(state),
            } => assert!(state.is_empty()),
            response => panic!("unexpected response {:?}", response),
        }
    }
}
