/*!
 * Tuning parameters for the measurement loop.
 *
 * Every value here was tuned empirically against real hardware. The defaults
 * are what the decoder was calibrated with; changing them shifts the
 * accuracy/throughput trade-off in ways that have to be re-measured.
 */

use crate::error::{Error, Result};

/// Number of trials in one timing run
pub const ITERATIONS : usize = 500;

/// Trials per histogram collection (calibration and visualization)
pub const CALIBRATION_TRIALS : usize = ITERATIONS * 10;

/// Width of one histogram bucket in cycles
pub const BUCKET_WIDTH : u64 = 8;

/// Number of histogram buckets; samples at or beyond `BUCKET_WIDTH * TIME_BUCKETS` are dropped
pub const TIME_BUCKETS : usize = 50;

/// Probability that one accidental hit on the wrong region looks like a real one
pub const PROB_HIT_ACCIDENTAL : f64 = 0.85;

/// Probability that a real signal fails to register during a single trial
pub const PROB_HIT_FAILS : f64 = 0.99;

/// A byte is accepted once its uncertainty drops to this value
pub const MAX_UNCERTAINTY : f64 = 8.636e-78;

/// Timing runs allowed after the first before a byte is reported unknown
pub const MAX_RETRIES : usize = 500;

/// Lowest region that can win a timing run. Region 0 is where the
/// architecturally safe default value lands, so it is never a candidate.
pub const FIRST_CANDIDATE_REGION : usize = 1;

/**
 * The knobs of one measurement session.
 *
 * `Default` gives the calibrated values above. The command line overrides
 * individual fields.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct Tuning {
    pub iterations: usize,
    pub calibration_trials: usize,
    pub bucket_width: u64,
    pub time_buckets: usize,
    pub p_accidental: f64,
    pub p_no_signal: f64,
    pub max_uncertainty: f64,
    pub max_retries: usize,
    /// Time the probe regions in a freshly shuffled order every trial.
    pub shuffle: bool,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            iterations: ITERATIONS,
            calibration_trials: CALIBRATION_TRIALS,
            bucket_width: BUCKET_WIDTH,
            time_buckets: TIME_BUCKETS,
            p_accidental: PROB_HIT_ACCIDENTAL,
            p_no_signal: PROB_HIT_FAILS,
            max_uncertainty: MAX_UNCERTAINTY,
            max_retries: MAX_RETRIES,
            shuffle: false,
        }
    }
}

impl Tuning {
    /// Upper bound (exclusive) of the histogram's time axis in cycles.
    pub fn time_range(&self) -> u64 {
        self.bucket_width * self.time_buckets as u64
    }

    /**
     * Reject parameter combinations the estimator cannot work with.
     *
     * # Return Value
     * `Err(Error::InvalidTuning)` naming the first offending field.
     */
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::InvalidTuning("iterations must be at least 1".into()));
        }
        if self.calibration_trials == 0 {
            return Err(Error::InvalidTuning("calibration_trials must be at least 1".into()));
        }
        if self.bucket_width == 0 || self.time_buckets == 0 {
            return Err(Error::InvalidTuning("histogram needs a non-zero bucket width and bucket count".into()));
        }
        for (name, p) in [("p_accidental", self.p_accidental), ("p_no_signal", self.p_no_signal)] {
            if !(p > 0.0 && p < 1.0) {
                return Err(Error::InvalidTuning(format!("{} must lie in (0, 1), got {}", name, p)));
            }
        }
        if !(self.max_uncertainty > 0.0 && self.max_uncertainty < 1.0) {
            return Err(Error::InvalidTuning(format!(
                "max_uncertainty must lie in (0, 1), got {}",
                self.max_uncertainty
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let tuning = Tuning::default();
        assert!(tuning.validate().is_ok());
        assert_eq!(tuning.time_range(), 400);
        assert_eq!(tuning.calibration_trials, 5000);
    }

    #[test]
    fn rejects_zero_iterations() {
        let tuning = Tuning { iterations: 0, ..Tuning::default() };
        assert!(matches!(tuning.validate(), Err(Error::InvalidTuning(_))));
    }

    #[test]
    fn rejects_degenerate_probabilities() {
        for p in [0.0, 1.0, -0.5, f64::NAN] {
            let tuning = Tuning { p_accidental: p, ..Tuning::default() };
            assert!(tuning.validate().is_err(), "p_accidental = {} accepted", p);
        }
        let tuning = Tuning { p_no_signal: 1.5, ..Tuning::default() };
        assert!(tuning.validate().is_err());
    }

    #[test]
    fn rejects_empty_histogram_shape() {
        let tuning = Tuning { bucket_width: 0, ..Tuning::default() };
        assert!(tuning.validate().is_err());
        let tuning = Tuning { time_buckets: 0, ..Tuning::default() };
        assert!(tuning.validate().is_err());
    }
}
