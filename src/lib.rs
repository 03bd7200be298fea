//! escape-cal library
//!
//! Arbitrary-precision services built on MPFR:
//!
//! - `numeric` - the `Numeric` backend trait and its MPFR implementation
//! - `codec` - base-32 / decimal text codec with scientific and positional output
//! - `engine` - escape-time iteration of `z <- z^2 + c`
//! - `protocol` - the `CAL`/`EXIT` line protocol, its server loop and client
//! - `box_calc` - adaptive grid survey over a pool of protocol servers
//! - `config` - limits and logging defaults from file and environment
//!
//! # Example
//!
//! ```ignore
//! use escape_cal::config::Config;
//! use escape_cal::protocol::respond;
//!
//! let reply = respond("CAL 64 0 0 5 0 10 2", &Config::default());
//! assert_eq!(reply.to_string(), "CAL Y 5@1 0 1");
//! ```

pub mod box_calc;
pub mod codec;
pub mod config;
pub mod engine;
pub mod numeric;
pub mod protocol;
