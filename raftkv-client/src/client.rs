use std::collections::HashMap;

use rand::seq::SliceRandom;
use raftkv_core::codec::{Command, Request, Response};
use raftkv_core::Connection;
use tokio::net::TcpStream;
use tracing::debug;

use crate::{Error, Result};

/// Replicate requests are retried this many times before giving up.
const REPLICATE_ATTEMPTS: usize = 3;

/// A client for the replicated key-value store. Requests go to any member;
/// redirects are followed and the discovered leader is cached between
/// requests.
pub struct Client {
    network: Vec<String>,
    server: Option<String>,
}

impl Client {
    /// Creates a client for the cluster with the given members.
    pub fn new(network: Vec<String>) -> Client {
        Client {
            network,
            server: None,
        }
    }

    /// The cached target, or a randomly chosen member.
    fn server(&mut self) -> Result<String> {
        if self.server.is_none() {
            self.server = self
                .network
                .choose(&mut rand::thread_rng())
                .cloned();
        }
        self.server
            .clone()
            .ok_or_else(|| Error::from("no cluster members to connect to"))
    }

    /// Sends the request on a fresh connection and reads the one response,
    /// following redirects. A full cycle of redirects means nobody knows a
    /// leader yet, which surfaces as an error so the caller may retry.
    async fn attempt(&mut self, request: &Request) -> Result<Response> {
        for _ in 0..=self.network.len() {
            let server = self.server()?;
            let socket = TcpStream::connect(server.as_str()).await?;
            let mut connection = Connection::new(socket);
            connection.write_message(request).await?;
            let response = connection
                .read_message::<Response>()
                .await?
                .ok_or("server closed the connection without responding")?;
            match response {
                Response::Redirect { leader } => {
                    debug!(from = %server, ?leader, "redirected");
                    self.server = leader;
                }
                response => return Ok(response),
            }
        }
        Err("no leader discovered".into())
    }

    /// Issues a request, retrying transport failures and unsuccessful
    /// results against freshly chosen members.
    async fn request(&mut self, request: Request, attempts: usize) -> Result<Response> {
        let mut last_error: Error = "no request attempts were made".into();
        for _ in 0..attempts {
            match self.attempt(&request).await {
                Ok(Response::Result { success: false, .. }) => {
                    self.server = None;
                    last_error = "request was not successful".into();
                }
                Ok(response) => return Ok(response),
                Err(err) => {
                    debug!("request attempt failed: {}", err);
                    self.server = None;
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// Fetches a snapshot of the whole key-value mapping from the leader.
    pub async fn get(&mut self) -> Result<HashMap<String, String>> {
        match self.request(Request::Get, 1).await? {
            Response::Result {
                state: Some(state), ..
            } => Ok(state),
            response => Err(format!("unexpected response {:?}", response).into()),
        }
    }

    /// Replicates an assignment of `value` to `key`.
    pub async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.replicate(Command::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
        .await
    }

    /// Replicates removal of a key. Failure means the outcome is unknown
    /// (or the key was absent); callers re-query before retrying.
    pub async fn delete(&mut self, key: &str) -> Result<()> {
        self.replicate(Command::Delete {
            key: key.to_string(),
        })
        .await
    }

    async fn replicate(&mut self, command: Command) -> Result<()> {
        self.request(Request::Replicate(command), REPLICATE_ATTEMPTS)
            .await
            .map(|_| ())
    }
}
