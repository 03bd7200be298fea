//! Wire grammar for the line protocol, shared by server and client.
//!
//! ```text
//! request:  EXIT
//!           CAL <precision> <za> <zb> <ca> <cb> <maxIter> <escapeRadius>
//! response: EXIT
//!           CAL <Y|N> <finalReal> <finalImag> <iterations>
//!           BAD_CMD
//! ```
//!
//! Numeric fields stay as text here. Decoding them needs the request
//! precision and happens in the server.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::codec::CodecError;
use crate::numeric::NumericError;

/// Tokens after `CAL` in a request.
const CAL_REQUEST_FIELDS: usize = 7;

/// Tokens after `CAL` in a reply.
const CAL_REPLY_FIELDS: usize = 4;

/// Reasons a line is answered with `BAD_CMD`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0:?}")]
    Unknown(String),

    #[error("Expected {expected} fields after CAL, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("Invalid {field}: {value:?}")]
    InvalidInteger { field: &'static str, value: String },

    #[error("{field} {value} exceeds configured limit {limit}")]
    LimitExceeded {
        field: &'static str,
        value: u64,
        limit: u64,
    },

    #[error("Invalid {field}: {source}")]
    Number {
        field: &'static str,
        #[source]
        source: CodecError,
    },

    #[error("{0} must be finite")]
    NonFinite(&'static str),

    #[error("Escape radius must not be negative")]
    NegativeRadius,

    #[error("Iteration failed: {0}")]
    Numeric(#[from] NumericError),

    #[error("Failed to format {field}: {source}")]
    Format {
        field: &'static str,
        #[source]
        source: CodecError,
    },

    #[error("Line exceeds {0} bytes")]
    Oversized(usize),
}

/// A `CAL` request with its numeric fields still in base-32 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalCommand {
    pub precision: u32,
    pub za: String,
    pub zb: String,
    pub ca: String,
    pub cb: String,
    pub max_iterations: u64,
    pub escape_radius: String,
}

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Cal(CalCommand),
}

/// Parse a signed integer field, then require it to fit the target range.
fn parse_integer<T: TryFrom<i64>>(field: &'static str, value: &str) -> Result<T, CommandError> {
    let invalid = || CommandError::InvalidInteger {
        field,
        value: value.to_string(),
    };
    let parsed: i64 = value.parse().map_err(|_| invalid())?;
    T::try_from(parsed).map_err(|_| invalid())
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        if line == "EXIT" {
            return Ok(Command::Exit);
        }

        let rest = line
            .strip_prefix("CAL ")
            .ok_or_else(|| CommandError::Unknown(line.to_string()))?;

        let fields: Vec<&str> = rest.split_whitespace().collect();
        let [precision, za, zb, ca, cb, max_iterations, escape_radius] = fields[..] else {
            return Err(CommandError::FieldCount {
                expected: CAL_REQUEST_FIELDS,
                found: fields.len(),
            });
        };

        let precision: u32 = parse_integer("precision", precision)?;
        if precision == 0 {
            return Err(CommandError::InvalidInteger {
                field: "precision",
                value: "0".to_string(),
            });
        }

        Ok(Command::Cal(CalCommand {
            precision,
            za: za.to_string(),
            zb: zb.to_string(),
            ca: ca.to_string(),
            cb: cb.to_string(),
            max_iterations: parse_integer("max iterations", max_iterations)?,
            escape_radius: escape_radius.to_string(),
        }))
    }
}

impl fmt::Display for CalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CAL {} {} {} {} {} {} {}",
            self.precision,
            self.za,
            self.zb,
            self.ca,
            self.cb,
            self.max_iterations,
            self.escape_radius
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Exit => f.write_str("EXIT"),
            Command::Cal(cal) => fmt::Display::fmt(cal, f),
        }
    }
}

/// Result line of a successful `CAL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalReply {
    pub escaped: bool,
    /// Final real component, compact-scientific base-32.
    pub real: String,
    /// Final imaginary component, compact-scientific base-32.
    pub imag: String,
    pub iterations: u64,
}

/// A response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Exit,
    Cal(CalReply),
    BadCommand,
}

/// A response line that does not match the reply grammar.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unrecognized reply: {0:?}")]
pub struct MalformedReply(pub String);

impl FromStr for Reply {
    type Err = MalformedReply;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || MalformedReply(line.to_string());
        match line {
            "EXIT" => return Ok(Reply::Exit),
            "BAD_CMD" => return Ok(Reply::BadCommand),
            _ => {}
        }

        let rest = line.strip_prefix("CAL ").ok_or_else(malformed)?;
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() != CAL_REPLY_FIELDS {
            return Err(malformed());
        }

        let escaped = match fields[0] {
            "Y" => true,
            "N" => false,
            _ => return Err(malformed()),
        };

        Ok(Reply::Cal(CalReply {
            escaped,
            real: fields[1].to_string(),
            imag: fields[2].to_string(),
            iterations: fields[3].parse().map_err(|_| malformed())?,
        }))
    }
}

impl fmt::Display for CalReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CAL {} {} {} {}",
            if self.escaped { "Y" } else { "N" },
            self.real,
            self.imag,
            self.iterations
        )
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Exit => f.write_str("EXIT"),
            Reply::Cal(cal) => fmt::Display::fmt(cal, f),
            Reply::BadCommand => f.write_str("BAD_CMD"),
        }
    }
}
