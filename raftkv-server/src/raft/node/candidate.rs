use raftkv_core::codec::Command;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::raft::message::{Address, Event, Message};
use crate::raft::node::follower::Follower;
use crate::raft::node::leader::Leader;
use crate::raft::node::{drop_unexpected, election_timeout, Node, RoleNode};

/// A candidate campaigns to become leader, re-running the election for the
/// next term if the current one times out without a winner.
#[derive(Debug)]
pub struct Candidate {
    /// Ticks elapsed since the election started
    election_ticks: u64,
    /// The randomized timeout before giving up on this election, in ticks
    election_timeout: u64,
    /// Votes received, including our own
    votes: u64,
}

impl Candidate {
    pub fn new() -> Self {
        Self {
            election_ticks: 0,
            election_timeout: election_timeout(),
            votes: 1,
        }
    }
}

impl RoleNode<Candidate> {
    /// Steps down, e.g. on discovering a current leader or a newer term.
    fn become_follower(mut self, term: u64, leader: Option<&str>) -> RoleNode<Follower> {
        if term > self.term {
            info!(term, "discovered newer term, stepping down");
            self.term = term;
            self.voted_for = None;
            self.leader = None;
        }
        if let Some(leader) = leader {
            info!(term = self.term, leader = %leader, "discovered leader, following");
            self.leader = Some(leader.to_string());
        }
        self.become_role(Follower::new())
    }

    /// Takes leadership of the current term. The no-op entry gives the
    /// commit calculation an entry of our own term to count; everything
    /// before it commits transitively.
    fn become_leader(mut self) -> Result<Node> {
        info!(term = self.term, "won election, becoming leader");
        self.leader = Some(self.id.clone());
        let role = Leader::new(&self.peers, &self.id, self.log.last_index);
        let mut node = self.become_role(role);
        node.log.append(node.term, Command::NoOp);
        node.replicate_all()?;
        let (id, last_index) = (node.id.clone(), node.log.last_index);
        node.append_entries_response(&id, true, last_index)?;
        Ok(node.into())
    }

    /// Becomes leader once the votes reach a strict majority.
    pub(super) fn check_election(self) -> Result<Node> {
        if self.role.votes >= self.quorum() {
            self.become_leader()
        } else {
            Ok(self.into())
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
            return self.become_follower(msg.term, None).step(msg);
        }

        match msg.event {
            Event::AppendEntries { .. } => {
                if msg.term >= self.term {
                    // Another node won this election; the new follower
                    // processes the same message.
                    return self.become_follower(msg.term, Some(&from)).step(msg);
                }
                // A stale leader; answer so it learns our term.
                self.send(
                    Address::Peer(from),
                    Event::AppendEntriesResponse {
                        success: false,
                        last_index: self.log.last_index,
                    },
                )?;
            }

            Event::RequestVoteResponse { vote_granted } => {
                if vote_granted {
                    self.role.votes += 1;
                    debug!(votes = self.role.votes, term = self.term, "received vote");
                }
                return self.check_election();
            }

            // Another candidate campaigning for the same term; our own vote
            // is already cast for ourselves.
            Event::RequestVote { .. } => {}

            Event::AppendEntriesResponse { .. } => drop_unexpected("candidate", &msg),
        }
        Ok(self.into())
    }

    pub fn tick(mut self) -> Result<Node> {
        self.role.election_ticks += 1;
        if self.role.election_ticks >= self.role.election_timeout {
            info!(term = self.term + 1, "election timed out, starting a new one");
            self.term += 1;
            self.voted_for = Some(self.id.clone());
            self.role = Candidate::new();
            self.send(
                Address::Peers,
                Event::RequestVote {
                    last_log_index: self.log.last_index,
                    last_log_term: self.log.last_term,
                },
            )?;
        }
        Ok(self.into())
    }
}
