//! Line-oriented command protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐        stdin / stdout        ┌─────────────────────┐
//! │   CalClient     │  ◄──────────────────────────►│  escape-cal serve   │
//! │  (any driver)   │    one line in, one line out │  (engine + codec)   │
//! └─────────────────┘                              └─────────────────────┘
//! ```
//!
//! # Protocol
//!
//! ```text
//! > CAL 64 0 0 5 0 10 2
//! < CAL Y 5@1 0 1
//! > CAL 64 0 0 0
//! < BAD_CMD
//! > EXIT
//! < EXIT
//! ```
//!
//! Every reply is flushed before the next request is read. End of input
//! without `EXIT` ends the session silently.

mod client;
mod framing;
mod message;
mod server;

pub use client::{CalClient, ClientError};
pub use framing::{read_line, write_line, Frame, MAX_LINE_BYTES};
pub use message::{CalCommand, CalReply, Command, CommandError, MalformedReply, Reply};
pub use server::{calculate, respond, respond_with, serve, SessionSummary, Shutdown};
