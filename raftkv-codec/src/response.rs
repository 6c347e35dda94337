use std::collections::HashMap;

use serde_derive::{Deserialize, Serialize};

/// A server response to a client request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    /// The outcome of a request served by the leader. `state` carries the
    /// key-value snapshot for `Get` requests. An unsuccessful result means
    /// the outcome is unknown; clients re-query before retrying.
    Result {
        success: bool,
        state: Option<HashMap<String, String>>,
    },
    /// The receiving node is not the leader; retry against `leader`, or any
    /// other member when no leader is known yet.
    Redirect { leader: Option<String> },
}
