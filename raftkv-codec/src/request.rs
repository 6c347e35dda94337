use serde_derive::{Deserialize, Serialize};

use crate::entry::Command;

/// A client request. Each request is sent on a fresh connection and
/// answered with exactly one `Response`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    /// Fetches a snapshot of the whole key-value mapping from the leader.
    Get,
    /// Submits a command for replication; acknowledged once the command is
    /// durable on a majority of the cluster.
    Replicate(Command),
}
