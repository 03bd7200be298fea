//! Request/response loop for the line protocol.
//!
//! The loop is strictly half-duplex: read one line, compute, write and flush
//! one reply, then read the next line. Nothing is carried between lines
//! except the read-only [`Config`].

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tracing::{debug, warn};

use crate::codec::{decode, encode_scientific, CodecError, Radix};
use crate::config::Config;
use crate::engine::{iterate, ComplexPoint, IterationRequest};
use crate::numeric::{MpFloat, Numeric};
use crate::protocol::framing::{read_line, write_line, Frame, MAX_LINE_BYTES};
use crate::protocol::message::{CalCommand, CalReply, Command, CommandError, Reply};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The peer sent `EXIT`.
    Exit,
    /// The input stream ended without `EXIT`.
    EndOfInput,
}

/// Counters for one session, logged on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub shutdown: Shutdown,
    pub calculated: u64,
    pub rejected: u64,
}

/// Serve the protocol until `EXIT` or end of input.
///
/// # Errors
///
/// Only I/O failures on `reader` or `writer` end the session with an error.
/// Bad commands are answered with `BAD_CMD` and the loop continues.
pub async fn serve<R, W>(mut reader: R, mut writer: W, config: &Config) -> Result<SessionSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut calculated = 0;
    let mut rejected = 0;

    let shutdown = loop {
        let reply = match read_line(&mut reader).await? {
            Frame::Closed => break Shutdown::EndOfInput,
            Frame::Oversized => {
                debug!("Rejected command: {}", CommandError::Oversized(MAX_LINE_BYTES));
                Reply::BadCommand
            }
            Frame::Line(line) => respond(&line, config),
        };

        write_line(&mut writer, &reply.to_string()).await?;

        match reply {
            Reply::Exit => break Shutdown::Exit,
            Reply::Cal(_) => calculated += 1,
            Reply::BadCommand => rejected += 1,
        }
    };

    Ok(SessionSummary {
        shutdown,
        calculated,
        rejected,
    })
}

/// Compute the reply for one request line.
pub fn respond(line: &str, config: &Config) -> Reply {
    respond_with::<MpFloat>(line, config)
}

/// [`respond`] over an arbitrary numeric backend.
pub fn respond_with<N: Numeric>(line: &str, config: &Config) -> Reply {
    let outcome = line
        .parse::<Command>()
        .and_then(|command| match command {
            Command::Exit => Ok(Reply::Exit),
            Command::Cal(cal) => calculate::<N>(&cal, config).map(Reply::Cal),
        });

    match outcome {
        Ok(reply) => reply,
        Err(err @ CommandError::Format { .. }) => {
            warn!("Computed result could not be rendered: {}", err);
            Reply::BadCommand
        }
        Err(err) => {
            debug!("Rejected command: {}", err);
            Reply::BadCommand
        }
    }
}

/// Validate, iterate and render one `CAL` request.
pub fn calculate<N: Numeric>(cal: &CalCommand, config: &Config) -> Result<CalReply, CommandError> {
    check_limits(cal, config)?;

    let request = build_request::<N>(cal)?;
    debug!(
        precision = request.precision,
        max_iterations = request.max_iterations,
        "CAL"
    );

    let result = iterate(&request)?;
    let render = |field: &'static str, value: &N| {
        encode_scientific(value, Radix::Base32)
            .map_err(|source| CommandError::Format { field, source })
    };

    Ok(CalReply {
        escaped: result.escaped,
        real: render("final real", &result.final_point.real)?,
        imag: render("final imag", &result.final_point.imag)?,
        iterations: result.iterations_run,
    })
}

fn check_limits(cal: &CalCommand, config: &Config) -> Result<(), CommandError> {
    if cal.precision > config.max_precision {
        return Err(CommandError::LimitExceeded {
            field: "precision",
            value: u64::from(cal.precision),
            limit: u64::from(config.max_precision),
        });
    }
    if let Some(limit) = config.max_iterations {
        if cal.max_iterations > limit {
            return Err(CommandError::LimitExceeded {
                field: "max iterations",
                value: cal.max_iterations,
                limit,
            });
        }
    }
    Ok(())
}

/// Decode the five numeric fields at the request precision.
fn build_request<N: Numeric>(cal: &CalCommand) -> Result<IterationRequest<N>, CommandError> {
    let precision = cal.precision;
    let number = |field: &'static str, text: &str| -> Result<N, CommandError> {
        let value: N = decode(text, Radix::Base32, precision)
            .map_err(|source: CodecError| CommandError::Number { field, source })?;
        if !value.is_finite() {
            return Err(CommandError::NonFinite(field));
        }
        Ok(value)
    };

    let z0 = ComplexPoint::new(number("za", &cal.za)?, number("zb", &cal.zb)?);
    let c = ComplexPoint::new(number("ca", &cal.ca)?, number("cb", &cal.cb)?);
    let escape_radius = number("escape radius", &cal.escape_radius)?;

    // -0 passes: it compares equal to zero.
    let zero = N::zero(precision)?;
    if escape_radius < zero {
        return Err(CommandError::NegativeRadius);
    }

    Ok(IterationRequest {
        precision,
        z0,
        c,
        max_iterations: cal.max_iterations,
        escape_radius,
    })
}
