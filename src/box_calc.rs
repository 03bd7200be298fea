//! Escape-time survey of a rectangular box of `c` values.
//!
//! The box is sampled on a `resolution x resolution` grid and every point
//! starts at `z0 = 0`. Each round submits the points that have not escaped
//! yet, resuming from the `z` the previous round ended on, and doubles the
//! per-request iteration budget for the next round. The survey stops when
//! every point has escaped or the budget passes `max_total_iterations`.
//!
//! Requests go to a [`WorkerPool`] of `escape-cal` server processes, one
//! [`CalClient`] per tokio task.
//!
//! ```text
//!   BoxRun::next_round ──► Vec<Job> ──► WorkerPool::run ──► Vec<Finished>
//!         ▲                                                     │
//!         └──────────────── BoxRun::finish_round ◄──────────────┘
//! ```

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::ffi::OsStr;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use rug::Float;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::codec::{decode, encode_scientific, CodecError, Radix};
use crate::numeric::{check_precision, MpFloat, Numeric, NumericError};
use crate::protocol::{CalClient, CalCommand, CalReply, ClientError};

/// Cumulative iteration budget per point.
pub const MAX_TOTAL_ITERATIONS: u64 = 10_000_000;

/// Smallest precision a survey runs at.
pub const MIN_PRECISION: u32 = 64;

/// Header row of the CSV report.
pub const CSV_HEADER: &str = "CA,CB,ESCAPED,ITERATIONS,FINAL_ZA,FINAL_ZB";

/// Bits kept beyond the grid step.
const PRECISION_MARGIN_BITS: i64 = 32;

/// Survey precisions are multiples of this.
const PRECISION_STEP: i64 = 64;

const BITS_PER_BASE32_DIGIT: u32 = 5;

/// Survey errors.
#[derive(Debug, Error)]
pub enum BoxError {
    #[error("Invalid {field}: {source}")]
    Bound {
        field: &'static str,
        source: CodecError,
    },

    #[error("{0} must be finite")]
    NonFinite(&'static str),

    #[error("Invalid box: {0}")]
    InvalidSpec(String),

    #[error(transparent)]
    Numeric(#[from] NumericError),

    #[error("Failed to render grid point: {0}")]
    Codec(#[from] CodecError),

    #[error("Worker failed: {0}")]
    Worker(#[from] ClientError),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Survey parameters. Bounds and radius are base-32 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxSpec {
    pub min_ca: String,
    pub min_cb: String,
    pub max_ca: String,
    pub max_cb: String,
    /// Points per axis.
    pub resolution: u32,
    /// Iteration budget of the first round.
    pub start_max_iterations: u64,
    pub escape_radius: String,
    /// Points stop being resubmitted once they have run this many iterations.
    pub max_total_iterations: u64,
}

impl BoxSpec {
    /// Check everything that would otherwise fail later, per point.
    pub fn validate(&self) -> Result<(), BoxError> {
        if self.resolution == 0 {
            return Err(BoxError::InvalidSpec("resolution must be at least 1".to_string()));
        }
        if self.start_max_iterations == 0 {
            return Err(BoxError::InvalidSpec(
                "start max iterations must be at least 1".to_string(),
            ));
        }
        self.resolution
            .checked_mul(self.resolution)
            .and_then(|points| usize::try_from(points).ok())
            .ok_or_else(|| BoxError::InvalidSpec(format!("resolution {} too large", self.resolution)))?;

        let radius = decode_finite("escape radius", &self.escape_radius)?;
        if radius < MpFloat::zero(MIN_PRECISION)? {
            return Err(BoxError::InvalidSpec("escape radius must not be negative".to_string()));
        }

        Bounds::decode(self).map(|_| ())
    }
}

/// Decoded box corners.
struct Bounds {
    min_ca: MpFloat,
    min_cb: MpFloat,
    max_ca: MpFloat,
    max_cb: MpFloat,
}

impl Bounds {
    fn decode(spec: &BoxSpec) -> Result<Self, BoxError> {
        Ok(Self {
            min_ca: decode_finite("min ca", &spec.min_ca)?,
            min_cb: decode_finite("min cb", &spec.min_cb)?,
            max_ca: decode_finite("max ca", &spec.max_ca)?,
            max_cb: decode_finite("max cb", &spec.max_cb)?,
        })
    }
}

/// Decode base-32 text with enough bits to hold every digit exactly.
fn decode_finite(field: &'static str, text: &str) -> Result<MpFloat, BoxError> {
    let digits = u32::try_from(text.len()).unwrap_or(u32::MAX);
    let bits = digits
        .saturating_mul(BITS_PER_BASE32_DIGIT)
        .clamp(MIN_PRECISION, rug::float::prec_max());

    let value: MpFloat =
        decode(text, Radix::Base32, bits).map_err(|source| BoxError::Bound { field, source })?;
    if !value.is_finite() {
        return Err(BoxError::NonFinite(field));
    }
    Ok(value)
}

/// `|max - min| / intervals`, a little wider than both operands.
fn grid_step(min: &MpFloat, max: &MpFloat, intervals: u32) -> Float {
    let working = min
        .as_float()
        .prec()
        .max(max.as_float().prec())
        .saturating_add(PRECISION_STEP as u32)
        .min(rug::float::prec_max());

    let mut step = Float::with_val(working, max.as_float() - min.as_float());
    step /= intervals;
    step.abs()
}

/// Bits needed to tell neighbouring grid points apart.
///
/// `ceil(log2(1 / step)) + 32`, rounded up to a multiple of 64 and never
/// below [`MIN_PRECISION`], where `step` is the smaller nonzero grid step of
/// the two axes. A single-point grid or a box with no extent on either
/// axis runs at [`MIN_PRECISION`].
pub fn calculate_precision(spec: &BoxSpec) -> Result<u32, BoxError> {
    if spec.resolution <= 1 {
        return Ok(MIN_PRECISION);
    }

    let bounds = Bounds::decode(spec)?;
    let intervals = spec.resolution - 1;
    let smallest = [
        grid_step(&bounds.min_ca, &bounds.max_ca, intervals),
        grid_step(&bounds.min_cb, &bounds.max_cb, intervals),
    ]
    .into_iter()
    .filter(|step| !step.is_zero())
    .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let Some(step) = smallest else {
        return Ok(MIN_PRECISION);
    };

    let log2 = Float::with_val(53, step.log2_ref()).to_f64();
    let required = (-log2).ceil() as i64 + PRECISION_MARGIN_BITS;
    let rounded = (required + PRECISION_STEP - 1).div_euclid(PRECISION_STEP) * PRECISION_STEP;
    let bits = u32::try_from(rounded.max(i64::from(MIN_PRECISION))).unwrap_or(u32::MAX);

    Ok(check_precision(bits)?)
}

/// One `c` value of the grid, as base-32 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridPoint {
    pub ca: String,
    pub cb: String,
}

/// `resolution` evenly spaced values from `min` to `max` inclusive.
fn axis(min: &MpFloat, max: &MpFloat, resolution: u32, precision: u32) -> Result<Vec<String>, BoxError> {
    if resolution <= 1 {
        let only = MpFloat::from_float(Float::with_val(precision, min.as_float()));
        return Ok(vec![encode_scientific(&only, Radix::Base32)?]);
    }

    let span = Float::with_val(precision, max.as_float() - min.as_float());
    (0..resolution)
        .map(|i| -> Result<String, BoxError> {
            let mut value = Float::with_val(precision, &span * i);
            value /= resolution - 1;
            value += min.as_float();
            Ok(encode_scientific(&MpFloat::from_float(value), Radix::Base32)?)
        })
        .collect()
}

/// The `resolution x resolution` grid, `ca` major, at `precision`.
pub fn generate_grid(spec: &BoxSpec, precision: u32) -> Result<Vec<GridPoint>, BoxError> {
    let precision = check_precision(precision)?;
    let bounds = Bounds::decode(spec)?;
    let cas = axis(&bounds.min_ca, &bounds.max_ca, spec.resolution, precision)?;
    let cbs = axis(&bounds.min_cb, &bounds.max_cb, spec.resolution, precision)?;

    Ok(cas
        .iter()
        .flat_map(|ca| {
            cbs.iter().map(move |cb| GridPoint {
                ca: ca.clone(),
                cb: cb.clone(),
            })
        })
        .collect())
}

/// Progress of one grid point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointState {
    pub ca: String,
    pub cb: String,
    /// Where the next round resumes; the final `z` once the survey ends.
    pub za: String,
    pub zb: String,
    pub escaped: bool,
    /// Iterations run across all rounds.
    pub iterations: u64,
}

impl PointState {
    fn start(point: GridPoint) -> Self {
        Self {
            ca: point.ca,
            cb: point.cb,
            za: "0".to_string(),
            zb: "0".to_string(),
            escaped: false,
            iterations: 0,
        }
    }
}

/// One request for the pool, tagged with its grid index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub index: usize,
    pub command: CalCommand,
}

/// A reply for the job with the same index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub index: usize,
    pub reply: CalReply,
}

/// State of a survey between rounds.
#[derive(Debug, Clone)]
pub struct BoxRun {
    precision: u32,
    escape_radius: String,
    budget: u64,
    max_total_iterations: u64,
    points: Vec<PointState>,
    done: bool,
}

impl BoxRun {
    pub fn new(spec: &BoxSpec) -> Result<Self, BoxError> {
        spec.validate()?;
        let precision = calculate_precision(spec)?;
        let points: Vec<PointState> = generate_grid(spec, precision)?
            .into_iter()
            .map(PointState::start)
            .collect();

        info!(
            precision,
            resolution = spec.resolution,
            points = points.len(),
            "Grid ready"
        );

        Ok(Self {
            precision,
            escape_radius: spec.escape_radius.clone(),
            budget: spec.start_max_iterations,
            max_total_iterations: spec.max_total_iterations,
            points,
            done: false,
        })
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Iteration budget of the next round.
    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn points(&self) -> &[PointState] {
        &self.points
    }

    /// Requests for the next round, or `None` once the survey is over.
    pub fn next_round(&mut self) -> Option<Vec<Job>> {
        if self.done {
            return None;
        }

        let jobs: Vec<Job> = self
            .points
            .iter()
            .enumerate()
            .filter(|(_, point)| !point.escaped && point.iterations < self.max_total_iterations)
            .map(|(index, point)| Job {
                index,
                command: CalCommand {
                    precision: self.precision,
                    za: point.za.clone(),
                    zb: point.zb.clone(),
                    ca: point.ca.clone(),
                    cb: point.cb.clone(),
                    max_iterations: self.budget,
                    escape_radius: self.escape_radius.clone(),
                },
            })
            .collect();

        if jobs.is_empty() {
            info!("All points processed");
            self.done = true;
            return None;
        }

        info!(max_iterations = self.budget, points = jobs.len(), "Iteration round");
        Some(jobs)
    }

    /// Fold a round's replies in and double the budget.
    pub fn finish_round<I>(&mut self, results: I)
    where
        I: IntoIterator<Item = Finished>,
    {
        for Finished { index, reply } in results {
            let Some(point) = self.points.get_mut(index) else {
                debug!(index, "Reply for unknown grid index");
                continue;
            };
            point.escaped = reply.escaped;
            point.iterations = point.iterations.saturating_add(reply.iterations);
            point.za = reply.real;
            point.zb = reply.imag;
        }

        match self.budget.checked_mul(2) {
            Some(next) if next <= self.max_total_iterations => self.budget = next,
            _ => {
                info!("Reached maximum iteration limit");
                self.done = true;
            }
        }
    }

    /// Write one CSV row per grid point, in grid order.
    pub fn write_csv<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(writer, "{}", CSV_HEADER)?;
        for point in &self.points {
            writeln!(
                writer,
                "{},{},{},{},{},{}",
                point.ca,
                point.cb,
                if point.escaped { "Y" } else { "N" },
                point.iterations,
                point.za,
                point.zb
            )?;
        }
        writer.flush()
    }
}

/// A fixed set of server processes sharing one job queue per round.
pub struct WorkerPool {
    clients: Vec<CalClient>,
}

impl WorkerPool {
    /// Start `workers` copies of `program` (at least one).
    pub async fn spawn<S: AsRef<OsStr>>(
        program: S,
        workers: usize,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let mut clients = Vec::with_capacity(workers.max(1));
        for _ in 0..workers.max(1) {
            let mut client = CalClient::spawn(program.as_ref()).await?;
            client.set_timeout(timeout);
            clients.push(client);
        }
        Ok(Self { clients })
    }

    pub fn workers(&self) -> usize {
        self.clients.len()
    }

    /// Run every job and return the replies in completion order.
    ///
    /// # Errors
    ///
    /// The first failed request fails the round. The remaining workers are
    /// aborted and their processes killed, so the pool is spent.
    pub async fn run(&mut self, jobs: Vec<Job>) -> Result<Vec<Finished>, BoxError> {
        let total = jobs.len();
        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));

        let mut tasks = JoinSet::new();
        for client in self.clients.drain(..) {
            tasks.spawn(work_queue(client, Arc::clone(&queue)));
        }

        let mut finished = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            let (client, done) = joined??;
            self.clients.push(client);
            finished.extend(done);
        }
        Ok(finished)
    }

    /// Send `EXIT` to every worker and wait for them.
    pub async fn shutdown(self) -> Result<(), ClientError> {
        for client in self.clients {
            client.exit().await?;
        }
        Ok(())
    }
}

async fn work_queue(
    mut client: CalClient,
    queue: Arc<Mutex<VecDeque<Job>>>,
) -> Result<(CalClient, Vec<Finished>), ClientError> {
    let mut done = Vec::new();
    loop {
        let Some(job) = queue.lock().await.pop_front() else {
            break;
        };
        let reply = client.call(&job.command).await?;
        done.push(Finished {
            index: job.index,
            reply,
        });
    }
    Ok((client, done))
}

/// Drive `run` to completion on `pool`.
pub async fn survey(run: &mut BoxRun, pool: &mut WorkerPool) -> Result<(), BoxError> {
    while let Some(jobs) = run.next_round() {
        let results = pool.run(jobs).await?;
        run.finish_round(results);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decimal_to_base32;
    use crate::config::Config;
    use crate::protocol::{calculate, respond};
    use pretty_assertions::assert_eq;

    fn spec(ca: (&str, &str), cb: (&str, &str), resolution: u32) -> BoxSpec {
        BoxSpec {
            min_ca: ca.0.to_string(),
            max_ca: ca.1.to_string(),
            min_cb: cb.0.to_string(),
            max_cb: cb.1.to_string(),
            resolution,
            start_max_iterations: 10,
            escape_radius: "2".to_string(),
            max_total_iterations: MAX_TOTAL_ITERATIONS,
        }
    }

    /// Run every round in-process, returning the number of rounds.
    fn survey_locally(run: &mut BoxRun) -> usize {
        let mut rounds = 0;
        while let Some(jobs) = run.next_round() {
            rounds += 1;
            let results: Vec<Finished> = jobs
                .into_iter()
                .map(|job| Finished {
                    index: job.index,
                    reply: calculate::<MpFloat>(&job.command, &Config::default())
                        .expect("grid request should be valid"),
                })
                .collect();
            run.finish_round(results);
        }
        rounds
    }

    #[test]
    fn test_precision_single_point_and_coarse_grid() {
        assert_eq!(calculate_precision(&spec(("-2", "2"), ("-2", "2"), 1)).unwrap(), 64);
        // Step 1: 0 + 32 bits rounds up to 64.
        assert_eq!(calculate_precision(&spec(("-4", "4"), ("-4", "4"), 9)).unwrap(), 64);
    }

    #[test]
    fn test_precision_follows_smallest_step() {
        // 1@-7 is 2^-40: 40 + 32 = 72 bits, rounded up to 128.
        assert_eq!(calculate_precision(&spec(("0", "1@-7"), ("0", "1"), 2)).unwrap(), 128);
        // 1@-19 is 2^-100: 132 bits, rounded up to 192.
        assert_eq!(calculate_precision(&spec(("0", "1"), ("0", "1@-19"), 2)).unwrap(), 192);
        // Reversed bounds step the same distance.
        assert_eq!(calculate_precision(&spec(("1@-7", "0"), ("1", "0"), 2)).unwrap(), 128);
    }

    #[test]
    fn test_precision_ignores_flat_axis() {
        assert_eq!(calculate_precision(&spec(("0", "1@-7"), ("1", "1"), 2)).unwrap(), 128);
        assert_eq!(calculate_precision(&spec(("1", "1"), ("1", "1"), 4)).unwrap(), 64);
    }

    #[test]
    fn test_grid_is_ca_major() {
        let grid = generate_grid(&spec(("-1", "1"), ("0", "g"), 3), 64).unwrap();
        let pairs: Vec<(&str, &str)> = grid.iter().map(|p| (p.ca.as_str(), p.cb.as_str())).collect();
        assert_eq!(
            pairs,
            vec![
                ("-1@1", "0"),
                ("-1@1", "8@1"),
                ("-1@1", "g@1"),
                ("0", "0"),
                ("0", "8@1"),
                ("0", "g@1"),
                ("1@1", "0"),
                ("1@1", "8@1"),
                ("1@1", "g@1"),
            ]
        );
    }

    #[test]
    fn test_single_point_grid_uses_min_corner() {
        let grid = generate_grid(&spec(("a", "v"), ("-1", "5"), 1), 64).unwrap();
        assert_eq!(
            grid,
            vec![GridPoint {
                ca: "a@1".to_string(),
                cb: "-1@1".to_string(),
            }]
        );
    }

    #[test]
    fn test_invalid_specs() {
        let bad_resolution = spec(("0", "1"), ("0", "1"), 0);
        assert!(matches!(bad_resolution.validate(), Err(BoxError::InvalidSpec(_))));

        let no_budget = BoxSpec {
            start_max_iterations: 0,
            ..spec(("0", "1"), ("0", "1"), 2)
        };
        assert!(matches!(no_budget.validate(), Err(BoxError::InvalidSpec(_))));

        let negative_radius = BoxSpec {
            escape_radius: "-2".to_string(),
            ..spec(("0", "1"), ("0", "1"), 2)
        };
        assert!(matches!(negative_radius.validate(), Err(BoxError::InvalidSpec(_))));

        let bad_bound = spec(("0", "xyz"), ("0", "1"), 2);
        assert!(matches!(
            bad_bound.validate(),
            Err(BoxError::Bound { field: "max ca", .. })
        ));

        let infinite = spec(("0", "1"), ("-@Inf@", "1"), 2);
        assert!(matches!(infinite.validate(), Err(BoxError::NonFinite("min cb"))));
    }

    #[test]
    fn test_bounded_point_runs_until_budget_spent() {
        let mut run = BoxRun::new(&BoxSpec {
            max_total_iterations: 100,
            ..spec(("0", "0"), ("0", "0"), 1)
        })
        .unwrap();

        // Budgets 10, 20, 40, 80; doubling to 160 passes the cap.
        assert_eq!(survey_locally(&mut run), 4);
        assert_eq!(
            run.points(),
            &[PointState {
                ca: "0".to_string(),
                cb: "0".to_string(),
                za: "0".to_string(),
                zb: "0".to_string(),
                escaped: false,
                iterations: 150,
            }]
        );
        assert_eq!(run.next_round(), None);
    }

    #[test]
    fn test_resumed_rounds_match_one_long_request() {
        let ca = decimal_to_base32("0.26", 64).unwrap();
        let mut run = BoxRun::new(&BoxSpec {
            start_max_iterations: 2,
            max_total_iterations: 1000,
            ..spec((ca.as_str(), ca.as_str()), ("0", "0"), 1)
        })
        .unwrap();

        let rounds = survey_locally(&mut run);
        assert!(rounds > 1, "expected several rounds, got {}", rounds);

        let line = format!("CAL 64 0 0 {} 0 1000 2", ca);
        let expected = respond(&line, &Config::default()).to_string();
        let point = &run.points()[0];
        assert!(point.escaped);
        assert_eq!(
            format!("CAL Y {} {} {}", point.za, point.zb, point.iterations),
            expected
        );
    }

    #[test]
    fn test_escaped_points_are_not_resubmitted() {
        let mut run = BoxRun::new(&spec(("0", "5"), ("0", "0"), 2)).unwrap();

        // ca in {0, 5}, cb in {0}: the two c = 5 points escape at once.
        let first = run.next_round().unwrap();
        assert_eq!(first.len(), 4);
        assert_eq!(first[2].command.to_string(), "CAL 64 0 0 5@1 0 10 2");

        let results = first
            .into_iter()
            .map(|job| Finished {
                index: job.index,
                reply: calculate::<MpFloat>(&job.command, &Config::default()).unwrap(),
            })
            .collect::<Vec<_>>();
        run.finish_round(results);

        let second = run.next_round().unwrap();
        let indices: Vec<usize> = second.iter().map(|job| job.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(second[0].command.max_iterations, 20);
        assert_eq!(run.points()[2].za, "5@1");
        assert_eq!(run.points()[3].iterations, 1);
    }

    #[test]
    fn test_csv_report() {
        let mut run = BoxRun::new(&spec(("0", "5"), ("0", "0"), 2)).unwrap();
        run.finish_round(vec![Finished {
            index: 2,
            reply: CalReply {
                escaped: true,
                real: "5@1".to_string(),
                imag: "0".to_string(),
                iterations: 1,
            },
        }]);

        let mut out = Vec::new();
        run.write_csv(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "CA,CB,ESCAPED,ITERATIONS,FINAL_ZA,FINAL_ZB\n\
             0,0,N,0,0,0\n\
             0,0,N,0,0,0\n\
             5@1,0,Y,1,5@1,0\n\
             5@1,0,N,0,0,0\n"
        );
    }

    #[test]
    fn test_error_display() {
        let err = BoxError::NonFinite("max cb");
        assert_eq!(err.to_string(), "max cb must be finite");

        let err = BoxError::Worker(ClientError::Timeout(30));
        assert_eq!(err.to_string(), "Worker failed: Request timed out after 30s");
    }
}
