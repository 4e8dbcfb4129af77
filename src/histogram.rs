/*!
 * Latency histograms over (region, time bucket).
 */

use crate::cache::REGIONS;
use crate::channel::{trial, ProbeChannel, ProbeOrder};
use crate::config::Tuning;

/**
 * Trial counts per probe region and time bucket.
 *
 * Bucket `b` holds latencies in `[b * width, (b + 1) * width)`. Latencies past
 * the last bucket are dropped, not clamped.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    buckets: usize,
    width: u64,
    counts: Vec<u32>,
}

impl Histogram {
    pub fn new(buckets: usize, width: u64) -> Self {
        Self { buckets, width, counts: vec![0; REGIONS * buckets] }
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    pub fn width(&self) -> u64 {
        self.width
    }

    /**
     * Count one latency sample for `region`.
     *
     * # Return Value
     * `false` if the sample fell outside the histogram and was dropped.
     */
    #[inline(always)]
    pub fn record(&mut self, region: usize, cycles: u64) -> bool {
        let bucket = cycles / self.width;
        if bucket >= self.buckets as u64 {
            return false;
        }
        self.counts[region * self.buckets + bucket as usize] += 1;
        return true;
    }

    /// Counts for one region, indexed by bucket.
    pub fn region(&self, region: usize) -> &[u32] {
        let start = region * self.buckets;
        &self.counts[start..start + self.buckets]
    }

    pub fn count(&self, region: usize, bucket: usize) -> u32 {
        self.region(region)[bucket]
    }

    /// Number of samples recorded across all regions.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|&c| c as u64).sum()
    }
}

/**
 * Smallest index at which the running sum reaches half of the total.
 *
 * # Return Value
 * The median bucket, or `counts.len()` when every count is zero.
 */
pub fn median(counts: &[u32]) -> usize {
    let total : u64 = counts.iter().map(|&c| c as u64).sum();
    if total == 0 {
        return counts.len();
    }
    let mut running = 0u64;
    for (i, &c) in counts.iter().enumerate() {
        running += c as u64;
        if 2 * running >= total {
            return i;
        }
    }
    return counts.len();
}

/**
 * Run `trials` evict/trigger/time cycles against `address` and bucket every
 * region's latency.
 *
 * # Arguments
 * * `channel`: The channel to drive.
 * * `address`: Target handed to the trigger on every trial.
 * * `trials`: Number of trials to run.
 * * `tuning`: Supplies the bucket width, bucket count and probe order.
 */
pub fn collect<C: ProbeChannel>(channel: &mut C, address: usize, trials: usize, tuning: &Tuning) -> Histogram {
    let mut histogram = Histogram::new(tuning.time_buckets, tuning.bucket_width);
    let mut order = ProbeOrder::new(tuning.shuffle);
    let mut times = [0u64; REGIONS];

    for _ in 0..trials {
        trial(channel, address, &mut order, &mut times);
        for (region, &t) in times.iter().enumerate() {
            histogram.record(region, t);
        }
    }
    return histogram;
}
