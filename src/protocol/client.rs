//! Client for driving an `escape-cal` server process.
//!
//! `CalClient` spawns the server with piped stdin/stdout and exchanges one
//! request line for one reply line, with a timeout on each exchange.
//! Callers that want parallelism run one client per worker; the protocol
//! itself never has more than one request in flight.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::debug;

use crate::protocol::framing::{read_line, write_line, Frame};
use crate::protocol::message::{CalCommand, CalReply, Command as Request, MalformedReply, Reply};

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client-side error types.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Failed to start the server process.
    #[error("Failed to spawn server: {0}")]
    Spawn(#[source] std::io::Error),

    /// Request timed out waiting for a reply.
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// The server answered `BAD_CMD`.
    #[error("Server rejected command: {0}")]
    Rejected(String),

    /// The server closed its output or sent something off-grammar.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<MalformedReply> for ClientError {
    fn from(err: MalformedReply) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

/// Client for one `escape-cal` server process.
///
/// # Example
///
/// ```ignore
/// use escape_cal::protocol::{CalClient, CalCommand};
///
/// let mut client = CalClient::spawn("escape-cal").await?;
/// let reply = client.call(&CalCommand {
///     precision: 64,
///     za: "0".into(), zb: "0".into(),
///     ca: "5".into(), cb: "0".into(),
///     max_iterations: 10,
///     escape_radius: "2".into(),
/// }).await?;
/// assert!(reply.escaped);
/// client.exit().await?;
/// ```
pub struct CalClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    timeout: Duration,
}

impl CalClient {
    /// Start `program` as a server process.
    ///
    /// The child's stderr is discarded and the child is killed if the client
    /// is dropped without [`CalClient::exit`].
    pub async fn spawn<S: AsRef<OsStr>>(program: S) -> Result<Self, ClientError> {
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(ClientError::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Protocol("Child stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Protocol("Child stdout not captured".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Set the per-request timeout. Default is 30 seconds.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send one `CAL` request and wait for its reply.
    ///
    /// # Errors
    ///
    /// - `ClientError::Rejected` if the server answers `BAD_CMD`
    /// - `ClientError::Timeout` if no reply arrives in time
    /// - `ClientError::Protocol` for an unexpected or missing reply
    pub async fn call(&mut self, command: &CalCommand) -> Result<CalReply, ClientError> {
        let line = command.to_string();
        match self.exchange(&line).await? {
            Reply::Cal(reply) => Ok(reply),
            Reply::BadCommand => Err(ClientError::Rejected(line)),
            Reply::Exit => Err(ClientError::Protocol(
                "Server answered EXIT to a CAL request".to_string(),
            )),
        }
    }

    /// Send `EXIT`, wait for the acknowledgement and for the process to end.
    pub async fn exit(mut self) -> Result<(), ClientError> {
        match self.exchange(&Request::Exit.to_string()).await? {
            Reply::Exit => {}
            other => {
                return Err(ClientError::Protocol(format!(
                    "Expected EXIT acknowledgement, got {}",
                    other
                )))
            }
        }

        let status = timeout(self.timeout, self.child.wait())
            .await
            .map_err(|_| ClientError::Timeout(self.timeout.as_secs()))?
            .map_err(ClientError::Io)?;
        debug!(%status, "Server exited");
        Ok(())
    }

    /// Write one line and read one reply, under the client timeout.
    async fn exchange(&mut self, line: &str) -> Result<Reply, ClientError> {
        let secs = self.timeout.as_secs();
        timeout(self.timeout, self.send_receive(line))
            .await
            .map_err(|_| ClientError::Timeout(secs))?
    }

    async fn send_receive(&mut self, line: &str) -> Result<Reply, ClientError> {
        write_line(&mut self.stdin, line)
            .await
            .map_err(|e| ClientError::Protocol(format!("Failed to send request: {:#}", e)))?;

        match read_line(&mut self.stdout)
            .await
            .map_err(|e| ClientError::Protocol(format!("Failed to read reply: {:#}", e)))?
        {
            Frame::Line(reply) => Ok(reply.parse()?),
            Frame::Oversized => Err(ClientError::Protocol("Reply line too long".to_string())),
            Frame::Closed => Err(ClientError::Protocol(
                "Connection closed by server".to_string(),
            )),
        }
    }
}
