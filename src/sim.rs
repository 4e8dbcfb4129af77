/*!
 * A deterministic stand-in for the hardware channel.
 *
 * Behaves like a perfectly leaky CPU running the guarded-poison trigger:
 * region 0 is always touched by the default value, and the region equal to
 * the target byte is touched whenever the target lies in the simulated
 * memory. Optionally sprinkles spurious hits with a seeded RNG.
 */

use crate::cache::REGIONS;
use crate::calibrate::{CalibrationPlan, CutoffRule};
use crate::channel::ProbeChannel;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const HIT_CYCLES : u64 = 40;
pub const MISS_CYCLES : u64 = 240;

/// Address whose simulated value is 1, used as the calibration reference
pub const REFERENCE_ADDRESS : usize = usize::MAX - 0xFFF;

pub struct SimulatedChannel {
    base: usize,
    memory: Vec<u8>,
    cached: [bool; REGIONS],
    spurious: f64,
    rng: StdRng,
    timed: usize,
    triggers: usize,
}

impl SimulatedChannel {
    /// `memory` is readable at `base..base + memory.len()`; every other
    /// address behaves like an inaccessible byte that never leaks.
    pub fn new(base: usize, memory: Vec<u8>) -> Self {
        Self {
            base,
            memory,
            cached: [false; REGIONS],
            spurious: 0.0,
            rng: StdRng::seed_from_u64(0x5eed),
            timed: 0,
            triggers: 0,
        }
    }

    /// Each trial additionally caches one random region with probability `p`.
    pub fn with_noise(mut self, p: f64, seed: u64) -> Self {
        self.spurious = p;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn byte_at(&self, address: usize) -> Option<u8> {
        if address == REFERENCE_ADDRESS {
            return Some(1);
        }
        address
            .checked_sub(self.base)
            .and_then(|offset| self.memory.get(offset).copied())
    }

    pub fn timed(&self) -> usize {
        self.timed
    }

    pub fn triggers(&self) -> usize {
        self.triggers
    }
}

impl ProbeChannel for SimulatedChannel {
    fn evict_all(&mut self) {
        self.cached = [false; REGIONS];
    }

    fn run_trigger(&mut self, address: usize) {
        self.triggers += 1;
        self.cached[0] = true;
        if let Some(value) = self.byte_at(address) {
            self.cached[value as usize] = true;
        }
        if self.spurious > 0.0 && self.rng.gen_bool(self.spurious) {
            let region = self.rng.gen_range(0..REGIONS);
            self.cached[region] = true;
        }
    }

    fn time_access(&mut self, region: usize) -> u64 {
        self.timed += 1;
        if self.cached[region] {
            HIT_CYCLES
        } else {
            MISS_CYCLES
        }
    }

    fn calibration(&self) -> CalibrationPlan {
        CalibrationPlan {
            reference: REFERENCE_ADDRESS,
            rule: CutoffRule::Midpoint { hit_region: 0, miss_region: 2 },
        }
    }
}
