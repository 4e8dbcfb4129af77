/*!
 * The measurement channel: a probe array plus a way to make the CPU touch it.
 *
 * The collector, the calibrator and the estimator only ever talk to
 * [`ProbeChannel`], so they run the same against real hardware and against
 * the simulated channel used in tests.
 */

use crate::cache::{CacheProbe, REGIONS};
use crate::calibrate::CalibrationPlan;
use crate::error::Result;
use crate::triggers::SpeculationTrigger;
use rand::prelude::SliceRandom;
use rand::rngs::ThreadRng;
use rand::thread_rng;
use tracing::debug;

/**
 * Flush+reload primitives for one measurement session.
 */
pub trait ProbeChannel {
    /// Remove every probe region from the cache.
    fn evict_all(&mut self);

    /// Issue one speculative probe of `address`. The only effect is on
    /// the cache state of the probe regions.
    fn run_trigger(&mut self, address: usize);

    /// Cycles taken by exactly one access to `region`.
    fn time_access(&mut self, region: usize) -> u64;

    /// Reference address and cutoff rule for this channel's trigger.
    fn calibration(&self) -> CalibrationPlan;
}

/**
 * A real channel: the probe mapping and the build's trigger.
 */
pub struct HardwareChannel<T: SpeculationTrigger> {
    probe: CacheProbe,
    trigger: T,
    aimed_at: Option<usize>,
}

impl<T: SpeculationTrigger> HardwareChannel<T> {
    /**
     * Map the probe regions and set up the trigger.
     *
     * # Return Value
     * Fails if any mapping cannot be created or the trigger cannot install
     * its fault handler.
     */
    pub fn open() -> Result<Self> {
        let probe = CacheProbe::new()?;
        let trigger = T::open()?;
        debug!("Opened channel with {} trigger", T::NAME);
        Ok(Self { probe, trigger, aimed_at: None })
    }
}

impl<T: SpeculationTrigger> ProbeChannel for HardwareChannel<T> {
    #[inline(always)]
    fn evict_all(&mut self) {
        self.probe.evict_all();
    }

    #[inline(always)]
    fn run_trigger(&mut self, address: usize) {
        if self.aimed_at != Some(address) {
            self.trigger.aim(address);
            self.aimed_at = Some(address);
        }
        self.trigger.fire(address, &self.probe);
    }

    #[inline(always)]
    fn time_access(&mut self, region: usize) -> u64 {
        self.probe.time_access(region)
    }

    fn calibration(&self) -> CalibrationPlan {
        self.trigger.calibration()
    }
}

/**
 * The order in which regions are timed after each trigger.
 *
 * Sequential matches the calibrated behaviour. Shuffled draws a new
 * permutation per trial so the prefetchers cannot learn the walk.
 */
pub struct ProbeOrder {
    regions: [usize; REGIONS],
    rng: Option<ThreadRng>,
}

impl ProbeOrder {
    pub fn new(shuffle: bool) -> Self {
        let mut regions = [0usize; REGIONS];
        for (i, r) in regions.iter_mut().enumerate() {
            *r = i;
        }
        Self { regions, rng: shuffle.then(thread_rng) }
    }

    fn walk(&mut self) -> &[usize; REGIONS] {
        if let Some(rng) = self.rng.as_mut() {
            self.regions.shuffle(rng);
        }
        &self.regions
    }
}

/**
 * One trial: evict everything, fire the trigger once, time every region.
 *
 * # Arguments
 * * `channel`: The channel to drive.
 * * `address`: Target of the speculative access.
 * * `order`: Order in which regions are timed.
 * * `times`: Receives the latency of each region, indexed by region.
 */
#[inline]
pub fn trial<C: ProbeChannel>(channel: &mut C, address: usize, order: &mut ProbeOrder, times: &mut [u64; REGIONS]) {
    channel.evict_all();
    channel.run_trigger(address);
    for &region in order.walk() {
        times[region] = channel.time_access(region);
    }
}
