use tracing::{info, warn};

use crate::error::Result;
use crate::raft::message::{Address, Event, Message};
use crate::raft::node::candidate::Candidate;
use crate::raft::node::{drop_unexpected, election_timeout, Node, RoleNode};

/// A follower passively replicates the leader's log and campaigns for
/// leadership itself if the leader goes quiet for too long.
#[derive(Debug)]
pub struct Follower {
    /// Ticks since the last timer reset event
    leader_seen_ticks: u64,
    /// The randomized timeout before starting an election, in ticks
    leader_seen_timeout: u64,
}

impl Follower {
    pub fn new() -> Self {
        Self {
            leader_seen_ticks: 0,
            leader_seen_timeout: election_timeout(),
        }
    }
}

impl RoleNode<Follower> {
    /// Restarts the election timer with a fresh randomized timeout.
    fn restart_election_timer(&mut self) {
        self.role.leader_seen_ticks = 0;
        self.role.leader_seen_timeout = election_timeout();
    }

    /// Starts an election for the next term, voting for ourselves. In a
    /// cluster of one the self-vote is already a majority.
    fn become_candidate(mut self) -> Result<Node> {
        self.term += 1;
        self.voted_for = Some(self.id.clone());
        self.leader = None;
        info!(term = self.term, "election timeout, starting election");
        let (last_log_index, last_log_term) = (self.log.last_index, self.log.last_term);
        let node = self.become_role(Candidate::new());
        node.send(
            Address::Peers,
            Event::RequestVote {
                last_log_index,
                last_log_term,
            },
        )?;
        node.check_election()
    }

    pub fn step(mut self, msg: Message) -> Result<Node> {
        if let Err(err) = self.validate(&msg) {
            warn!("ignoring invalid message: {}", err);
            return Ok(self.into());
        }
        if msg.term > self.term {
            self.term = msg.term;
            self.voted_for = None;
            self.leader = None;
        }
        let from = match &msg.from {
            Address::Peer(peer) => peer.clone(),
            _ => return Ok(self.into()),
        };

        match msg.event {
            Event::AppendEntries {
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
            } => {
                let term_is_current = msg.term >= self.term;
                let prev_match = self.log.last_index >= prev_log_index
                    && self.log.get(prev_log_index).map(|e| e.term) == Some(prev_log_term);
                let success = term_is_current && prev_match;
                if term_is_current {
                    self.restart_election_timer();
                    self.leader = Some(from.clone());
                }
                if success {
                    self.log.splice(prev_log_index, entries);
                    self.log.commit(leader_commit);
                }
                self.send(
                    Address::Peer(from),
                    Event::AppendEntriesResponse {
                        success,
                        last_index: self.log.last_index,
                    },
                )?;
            }

            Event::RequestVote {
                last_log_index,
                last_log_term,
            } => {
                let term_is_current = msg.term >= self.term;
                let can_vote =
                    self.voted_for.is_none() || self.voted_for.as_deref() == Some(from.as_str());
                let log_ok = last_log_term > self.log.last_term
                    || (last_log_term == self.log.last_term
                        && last_log_index >= self.log.last_index);
                let vote_granted = term_is_current && can_vote && log_ok;
                if vote_granted {
                    info!(term = self.term, candidate = %from, "voting");
                    self.voted_for = Some(from.clone());
                    self.restart_election_timer();
                }
                self.send(Address::Peer(from), Event::RequestVoteResponse { vote_granted })?;
            }

            Event::AppendEntriesResponse { .. } | Event::RequestVoteResponse { .. } => {
                drop_unexpected("follower", &msg);
            }
        }
        Ok(self.into())
    }

    pub fn tick(mut self) -> Result<Node> {
        self.role.leader_seen_ticks += 1;
        if self.role.leader_seen_ticks >= self.role.leader_seen_timeout {
            self.become_candidate()
        } else {
            Ok(self.into())
        }
    }
}
