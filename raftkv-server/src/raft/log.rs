use std::cmp::{max, min};

use raftkv_core::codec::{Command, Entry};
use tracing::debug;

use crate::raft::state::StateMachine;

/// The replicated log. Index 0 always holds a no-op sentinel entry of term
/// 0, so a prev_log_index of 0 resolves on every node and the first real
/// entry lives at index 1.
pub struct Log {
    entries: Vec<Entry>,
    /// The index of the last entry
    pub last_index: u64,
    /// The term of the last entry
    pub last_term: u64,
    /// The highest index known safe to apply
    pub commit_index: u64,
    /// The state machine fed by committed entries
    pub state: StateMachine,
}

impl Log {
    pub fn new() -> Self {
        Self {
            entries: vec![Entry {
                term: 0,
                command: Command::NoOp,
            }],
            last_index: 0,
            last_term: 0,
            commit_index: 0,
            state: StateMachine::new(),
        }
    }

    /// Fetches the entry at an index.
    pub fn get(&self, index: u64) -> Option<&Entry> {
        self.entries.get(index as usize)
    }

    /// Appends a command in the given term, returning its index.
    pub fn append(&mut self, term: u64, command: Command) -> u64 {
        self.entries.push(Entry { term, command });
        self.last_index = self.entries.len() as u64 - 1;
        self.last_term = term;
        debug!(index = self.last_index, term, "appended entry");
        self.last_index
    }

    /// Splices entries onto the position after `base_index`, truncating any
    /// existing tail beyond it first. The sentinel and committed entries are
    /// never removed; by the log matching property a batch overlapping the
    /// committed prefix restates it, so the overlap is skipped instead.
    pub fn splice(&mut self, base_index: u64, entries: Vec<Entry>) {
        let base = max(base_index, self.commit_index);
        let skip = (base - base_index) as usize;
        if self.last_index > base {
            debug!(from = base + 1, "truncating conflicting tail");
            self.entries.truncate(base as usize + 1);
        }
        self.entries.extend(entries.into_iter().skip(skip));
        self.last_index = self.entries.len() as u64 - 1;
        self.last_term = self.entries[self.last_index as usize].term;
    }

    /// Advances the commit cursor to min(leader_commit, last_index) and
    /// applies the newly committed entries to the state machine in order.
    /// The cursor is monotonic: a stale leader_commit is ignored.
    pub fn commit(&mut self, leader_commit: u64) {
        if leader_commit <= self.commit_index {
            return;
        }
        self.commit_index = min(leader_commit, self.last_index);
        for index in (self.state.last_applied + 1)..=self.commit_index {
            let entry = &self.entries[index as usize];
            self.state.apply(index, entry);
        }
    }

    /// A half-open slice [lo, hi) of the log for outbound batches, clamped
    /// to the entries that exist.
    pub fn slice(&self, lo: u64, hi: u64) -> Vec<Entry> {
        let hi = min(hi, self.last_index + 1);
        if lo >= hi {
            return Vec::new();
        }
        self.entries[lo as usize..hi as usize].to_vec()
    }
}
