/*!
 * A measurement session and the byte estimator that drives it.
 */

use crate::calibrate::{calibrate, Cutoff};
use crate::channel::ProbeChannel;
use crate::config::Tuning;
use crate::error::Result;
use crate::histogram::{collect, Histogram};
use crate::timing::{run_once, Assessment};
use std::fmt;
use tracing::debug;

/// Outcome of decoding one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteResult {
    Value(u8),
    /// The retry budget ran out before the uncertainty threshold was met.
    Unknown,
}

impl fmt::Display for ByteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteResult::Value(v) => write!(f, "{:02x}", v),
            ByteResult::Unknown => write!(f, "??"),
        }
    }
}

/**
 * The running belief about one byte.
 *
 * Agreement multiplies uncertainties, as if runs were independent.
 * Disagreement throws the old belief away entirely.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub candidate: Option<u8>,
    pub uncertainty: f64,
}

impl From<Assessment> for Estimate {
    fn from(a: Assessment) -> Self {
        Self { candidate: a.candidate, uncertainty: a.uncertainty }
    }
}

impl Estimate {
    pub fn merge(&mut self, next: Assessment) {
        if next.candidate == self.candidate {
            self.uncertainty *= next.uncertainty;
        } else {
            *self = next.into();
        }
    }

    /// A run without a winner means the byte is zero: region 0 is where the
    /// default value lands and is never a candidate.
    pub fn value(&self) -> u8 {
        self.candidate.unwrap_or(0)
    }
}

/**
 * Keep running until the belief is certain enough or the budget is spent.
 *
 * # Arguments
 * * `tuning`: Supplies `max_uncertainty` and `max_retries`.
 * * `run`: Produces one timing run's assessment per call.
 *
 * # Return Value
 * The byte, or `ByteResult::Unknown` once more than `max_retries` runs
 * followed the first without reaching the threshold.
 */
pub fn estimate<F: FnMut() -> Assessment>(tuning: &Tuning, mut run: F) -> ByteResult {
    let mut estimate = Estimate::from(run());
    let mut retries = 0usize;
    while estimate.uncertainty > tuning.max_uncertainty {
        estimate.merge(run());
        retries += 1;
        if retries > tuning.max_retries {
            return ByteResult::Unknown;
        }
    }
    ByteResult::Value(estimate.value())
}

/**
 * Everything one decoding pass needs: the channel, the tuning and the
 * calibrated cutoff. Owned by the top-level scan loop.
 */
pub struct Session<C: ProbeChannel> {
    channel: C,
    tuning: Tuning,
    cutoff: Cutoff,
}

impl<C: ProbeChannel> Session<C> {
    /**
     * Validate `tuning` and calibrate the cutoff on `channel`.
     *
     * # Return Value
     * `Error::InvalidTuning` if the tuning cannot drive an estimator.
     */
    pub fn new(mut channel: C, tuning: Tuning) -> Result<Self> {
        tuning.validate()?;
        let cutoff = calibrate(&mut channel, &tuning);
        Ok(Self { channel, tuning, cutoff })
    }

    pub fn cutoff(&self) -> Cutoff {
        self.cutoff
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn read_byte(&mut self, address: usize) -> ByteResult {
        let channel = &mut self.channel;
        let cutoff = self.cutoff;
        let tuning = &self.tuning;
        let mut runs = 0usize;
        let result = estimate(tuning, || {
            runs += 1;
            run_once(&mut *channel, address, cutoff, tuning).assessment
        });
        if result == ByteResult::Unknown {
            debug!("Byte at 0x{:X} still uncertain after {} runs", address, runs);
        }
        result
    }

    /// A calibration-sized histogram of `address`, for visualization.
    pub fn histogram(&mut self, address: usize) -> Histogram {
        collect(&mut self.channel, address, self.tuning.calibration_trials, &self.tuning)
    }
}
