//! Escape-time iteration of `z <- z^2 + c`.
//!
//! Every sub-operation runs at exactly the request precision with
//! round-to-nearest-even, and the escape test uses the true Euclidean
//! magnitude `sqrt(re^2 + im^2)`. The extra rounding of the square root is
//! part of the observable result, so comparing squared magnitudes instead
//! would change which iteration escapes near the boundary.

use tracing::trace;

use crate::numeric::{Numeric, NumericError};

/// Complex value as a pair of numbers at one precision.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexPoint<N> {
    pub real: N,
    pub imag: N,
}

impl<N: Numeric> ComplexPoint<N> {
    pub fn new(real: N, imag: N) -> Self {
        Self { real, imag }
    }

    /// `z^2 + c` componentwise: `(re^2 - im^2 + c.re, 2*re*im + c.im)`.
    fn square_add(&self, c: &Self, precision: u32) -> Result<Self, NumericError> {
        let re_sq = self.real.square(precision)?;
        let im_sq = self.imag.square(precision)?;
        let cross = self.real.mul(&self.imag, precision)?.double(precision)?;

        Ok(Self {
            real: re_sq.sub(&im_sq, precision)?.add(&c.real, precision)?,
            imag: cross.add(&c.imag, precision)?,
        })
    }

    /// `sqrt(re^2 + im^2)` at `precision`.
    pub fn magnitude(&self, precision: u32) -> Result<N, NumericError> {
        let re_sq = self.real.square(precision)?;
        let im_sq = self.imag.square(precision)?;
        re_sq.add(&im_sq, precision)?.sqrt(precision)
    }

    pub fn is_finite(&self) -> bool {
        self.real.is_finite() && self.imag.is_finite()
    }
}

/// One validated iteration request.
///
/// Validation (finite inputs, non-negative radius) happens where the
/// request is built; [`iterate`] trusts it.
#[derive(Debug, Clone)]
pub struct IterationRequest<N> {
    pub precision: u32,
    pub z0: ComplexPoint<N>,
    pub c: ComplexPoint<N>,
    pub max_iterations: u64,
    pub escape_radius: N,
}

/// Outcome of an iteration run.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationResult<N> {
    pub escaped: bool,
    pub final_point: ComplexPoint<N>,
    pub iterations_run: u64,
}

/// Run `z <- z^2 + c` from `z0` for at most `max_iterations` steps.
///
/// The escape test runs only after a completed step, so with
/// `max_iterations == 0` the result is `z0`, not escaped, whatever its
/// magnitude.
///
/// # Errors
///
/// Any backend failure aborts this request and is returned as-is.
pub fn iterate<N: Numeric>(
    request: &IterationRequest<N>,
) -> Result<IterationResult<N>, NumericError> {
    let precision = request.precision;
    let mut z = request.z0.clone();

    for i in 1..=request.max_iterations {
        z = z.square_add(&request.c, precision)?;

        if z.magnitude(precision)?.exceeds(&request.escape_radius) {
            trace!(iteration = i, "point escaped");
            return Ok(IterationResult {
                escaped: true,
                final_point: z,
                iterations_run: i,
            });
        }
    }

    Ok(IterationResult {
        escaped: false,
        final_point: z,
        iterations_run: request.max_iterations,
    })
}
