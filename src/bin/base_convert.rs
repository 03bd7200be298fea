//! base-convert - one-shot decimal <-> base-32 conversion.
//!
//! ```text
//! base-convert 10TO32 <precision> <base10_number>
//! base-convert 32TO10 <precision> <base32_number>
//! ```
//!
//! Usage errors exit with status 1. A number that fails to parse or format
//! is reported as `ERROR: ...` on stdout and still exits 0.

use std::ffi::{OsStr, OsString};
use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use escape_cal::codec::{base32_to_decimal, decimal_to_base32, CodecError, Radix};
use escape_cal::numeric::check_precision;

/// Conversion direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    DecimalToBase32,
    Base32ToDecimal,
}

impl Direction {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "10TO32" => Some(Direction::DecimalToBase32),
            "32TO10" => Some(Direction::Base32ToDecimal),
            _ => None,
        }
    }

    fn input_radix(self) -> Radix {
        match self {
            Direction::DecimalToBase32 => Radix::Decimal,
            Direction::Base32ToDecimal => Radix::Base32,
        }
    }

    fn convert(self, number: &str, precision: u32) -> Result<String, CodecError> {
        match self {
            Direction::DecimalToBase32 => decimal_to_base32(number, precision),
            Direction::Base32ToDecimal => base32_to_decimal(number, precision),
        }
    }

    /// Convert a raw argument; text that is not UTF-8 is an invalid number.
    fn convert_arg(self, number: &OsStr, precision: u32) -> Result<String, CodecError> {
        match number.to_str() {
            Some(number) => self.convert(number, precision),
            None => Err(CodecError::Invalid {
                radix: self.input_radix(),
                text: number.to_string_lossy().into_owned(),
            }),
        }
    }
}

fn print_usage(program: &str) {
    println!("Usage: {} <command> [options]\n", program);
    println!("Commands:");
    println!("  10TO32 <precision> <base10_number>  Convert base-10 to base-32");
    println!("  32TO10 <precision> <base32_number>  Convert base-32 to base-10\n");
    println!("Options:");
    println!("  <precision>     Precision in bits (e.g., 64, 128, 256)");
    println!("  <base10_number> Number in base-10 format (e.g., -0.5, 123.456, 1e-10)");
    println!("  <base32_number> Number in base-32 format (e.g., -0.g, a, 0.8@-1)\n");
    println!("Examples:");
    println!("  {} 10TO32 64 -0.5", program);
    println!("  {} 32TO10 64 -0.g", program);
    println!("  {} 10TO32 128 0.25", program);
    println!("  {} 32TO10 128 0.8", program);
}

/// Positive precision in bits that the backend can represent.
fn parse_precision(arg: &str) -> Option<u32> {
    let bits: u32 = arg.parse().ok()?;
    check_precision(bits).ok()
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "escape_cal=warn".into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let args: Vec<OsString> = std::env::args_os().collect();
    let program = args
        .first()
        .map(|arg| arg.to_string_lossy().into_owned())
        .unwrap_or_else(|| "base-convert".to_string());

    let [_, command, precision, number, ..] = args.as_slice() else {
        print_usage(&program);
        return ExitCode::FAILURE;
    };

    let Some(precision) = precision.to_str().and_then(parse_precision) else {
        println!("ERROR: Invalid precision");
        print_usage(&program);
        return ExitCode::FAILURE;
    };

    let Some(direction) = command.to_str().and_then(Direction::from_arg) else {
        println!("ERROR: Unknown command '{}'", command.to_string_lossy());
        print_usage(&program);
        return ExitCode::FAILURE;
    };

    tracing::debug!(?direction, precision, number = ?number, "Converting");

    match direction.convert_arg(number, precision) {
        Ok(text) => println!("{}", text),
        Err(err @ CodecError::Invalid { .. }) => println!("ERROR: {}", err),
        Err(CodecError::Numeric(err)) => {
            tracing::warn!("Conversion of {:?} failed: {}", number, err);
            println!("ERROR: Conversion failed");
        }
    }

    ExitCode::SUCCESS
}
