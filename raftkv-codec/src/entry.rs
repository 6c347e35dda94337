use serde_derive::{Deserialize, Serialize};

/// A state machine command carried by a log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Advances the log without touching the state machine; used for the
    /// index 0 sentinel and for the first entry of a new leader's term.
    NoOp,
    /// Assigns a value to a key, overwriting any previous value.
    Set { key: String, value: String },
    /// Removes a key.
    Delete { key: String },
}

/// A replicated log entry. Immutable once appended; its identity is the
/// pair of its log index and its term.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The term in which the entry was appended
    pub term: u64,
    /// The state machine command
    pub command: Command,
}
