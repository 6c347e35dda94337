use raftkv_core::codec::Entry;
use serde_derive::{Deserialize, Serialize};

/// A peer message address
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Address {
    /// Broadcast to all peers
    Peers,
    /// A single peer, by its host:port identity
    Peer(String),
    /// The local node; rewritten to its identity by the outbound transport
    Local,
}

/// A message passed between Raft nodes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The current term of the sender
    pub term: u64,
    /// The sender address
    pub from: Address,
    /// The recipient address
    pub to: Address,
    /// The message event
    pub event: Event,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// Leaders replicate entries to followers; an empty batch doubles as a
    /// heartbeat.
    AppendEntries {
        /// The index of the entry immediately preceding the batch
        prev_log_index: u64,
        /// The term of the entry immediately preceding the batch
        prev_log_term: u64,
        /// Entries to place after prev_log_index
        entries: Vec<Entry>,
        /// The leader's commit cursor
        leader_commit: u64,
    },
    /// Followers answer every AppendEntries, successful or not
    AppendEntriesResponse {
        /// Whether the batch was accepted
        success: bool,
        /// The responder's last log index
        last_index: u64,
    },
    /// Candidates solicit votes from all peers
    RequestVote {
        /// The index of the candidate's last log entry
        last_log_index: u64,
        /// The term of the candidate's last log entry
        last_log_term: u64,
    },
    /// Peers answer every RequestVote
    RequestVoteResponse {
        /// Whether the vote was granted
        vote_granted: bool,
    },
}
