use std::collections::HashMap;

use raftkv_core::codec::{Command, Entry};
use tracing::debug;

/// The key-value state machine, advanced by applying committed log entries
/// in strict index order.
#[derive(Debug, Default)]
pub struct StateMachine {
    data: HashMap<String, String>,
    /// The highest log index reflected in the data
    pub last_applied: u64,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a committed entry. Apply is total: deleting an absent key is
    /// a no-op, so replicas that replay the same committed prefix can never
    /// diverge.
    pub fn apply(&mut self, index: u64, entry: &Entry) {
        match &entry.command {
            Command::NoOp => {}
            Command::Set { key, value } => {
                self.data.insert(key.clone(), value.clone());
            }
            Command::Delete { key } => {
                self.data.remove(key);
            }
        }
        self.last_applied = index;
        debug!(index, "applied {:?}", entry.command);
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// A copy of the applied key-value mapping.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.data.clone()
    }
}
