/*!
 * Hit/miss cutoff calibration.
 */

use crate::channel::ProbeChannel;
use crate::config::Tuning;
use crate::histogram::{collect, median, Histogram};
use tracing::{debug, info, warn};

/**
 * How a trigger turns reference histograms into a cutoff.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutoffRule {
    /// Halfway between the median of a region that always hits and the
    /// median of a region that never does.
    Midpoint { hit_region: usize, miss_region: usize },

    /// Two thirds of the median of a region that never hits. Used when no
    /// region is guaranteed to hit.
    FractionOfMiss { miss_region: usize },
}

/// Reference address to collect against, and the rule to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationPlan {
    pub reference: usize,
    pub rule: CutoffRule,
}

/**
 * Latency threshold in cycles. Anything strictly below it is a cache hit.
 *
 * Computed once per session and never changed afterwards.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cutoff(u64);

impl Cutoff {
    pub fn from_cycles(cycles: u64) -> Self {
        Self(cycles)
    }

    pub fn cycles(&self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub fn is_hit(&self, cycles: u64) -> bool {
        cycles < self.0
    }
}

/// Median of one region in cycles (bucket index times bucket width).
fn median_cycles(histogram: &Histogram, region: usize) -> u64 {
    let counts = histogram.region(region);
    let bucket = median(counts);
    if bucket == counts.len() {
        warn!("Calibration region {} recorded no samples in range", region);
    }
    bucket as u64 * histogram.width()
}

/**
 * Apply `rule` to a collected histogram.
 *
 * # Return Value
 * The cutoff in cycles.
 */
pub fn cutoff_from(histogram: &Histogram, rule: CutoffRule) -> Cutoff {
    match rule {
        CutoffRule::Midpoint { hit_region, miss_region } => {
            let hit = median_cycles(histogram, hit_region);
            let miss = median_cycles(histogram, miss_region);
            info!("Median hit time {} cycles, median miss time {} cycles", hit, miss);
            Cutoff((hit + miss) / 2)
        }
        CutoffRule::FractionOfMiss { miss_region } => {
            let miss = median_cycles(histogram, miss_region);
            info!("Median miss time {} cycles", miss);
            Cutoff(miss * 2 / 3)
        }
    }
}

/**
 * Derive the session's cutoff from the channel's own reference measurements.
 *
 * # Arguments
 * * `channel`: The channel to calibrate; its trigger picks the reference
 *   address and the rule.
 * * `tuning`: Trial count and histogram shape.
 */
pub fn calibrate<C: ProbeChannel>(channel: &mut C, tuning: &Tuning) -> Cutoff {
    let plan = channel.calibration();
    let histogram = collect(channel, plan.reference, tuning.calibration_trials, tuning);
    debug!("Calibrated against 0x{:X} with {} samples in range", plan.reference, histogram.total());
    let cutoff = cutoff_from(&histogram, plan.rule);
    info!("Cutoff is {} cycles", cutoff.cycles());
    return cutoff;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedChannel, HIT_CYCLES, MISS_CYCLES};

    fn synthetic(hit_cycles: &[u64], miss_cycles: &[u64]) -> Histogram {
        let mut histogram = Histogram::new(50, 8);
        for &t in hit_cycles {
            histogram.record(0, t);
        }
        for &t in miss_cycles {
            histogram.record(2, t);
        }
        histogram
    }

    #[test]
    fn midpoint_lands_between_disjoint_distributions() {
        let hits : Vec<u64> = (0..1000).map(|i| 24 + i % 20).collect();
        let misses : Vec<u64> = (0..1000).map(|i| 200 + i % 60).collect();
        let histogram = synthetic(&hits, &misses);

        let cutoff = cutoff_from(&histogram, CutoffRule::Midpoint { hit_region: 0, miss_region: 2 });
        assert!(cutoff.cycles() > *hits.iter().max().unwrap());
        assert!(cutoff.cycles() < *misses.iter().min().unwrap());
    }

    #[test]
    fn midpoint_of_spikes_is_exact() {
        let histogram = synthetic(&[24; 10], &[240; 10]);
        let cutoff = cutoff_from(&histogram, CutoffRule::Midpoint { hit_region: 0, miss_region: 2 });
        assert_eq!(cutoff.cycles(), (24 + 240) / 2);
    }

    #[test]
    fn fraction_of_miss_is_two_thirds() {
        let mut histogram = Histogram::new(50, 8);
        for _ in 0..10 {
            histogram.record(1, 300);
        }
        // bucket 37 -> 296 cycles -> 197
        let cutoff = cutoff_from(&histogram, CutoffRule::FractionOfMiss { miss_region: 1 });
        assert_eq!(cutoff.cycles(), 296 * 2 / 3);
    }

    #[test]
    fn cutoff_is_strict() {
        let cutoff = Cutoff::from_cycles(100);
        assert!(cutoff.is_hit(99));
        assert!(!cutoff.is_hit(100));
    }

    #[test]
    fn calibrates_simulated_channel_between_hit_and_miss() {
        let tuning = Tuning { calibration_trials: 200, ..Tuning::default() };
        let mut channel = SimulatedChannel::new(0, Vec::new());
        let cutoff = calibrate(&mut channel, &tuning);

        assert_eq!(cutoff.cycles(), (HIT_CYCLES + MISS_CYCLES) / 2);
        assert_eq!(channel.triggers(), 200);
    }
}
