/*!
 * Ways of making the CPU touch `probe[value(target) * PAGE_SIZE]` without
 * ever committing the load of `target`.
 */

use crate::cache::CacheProbe;
use crate::calibrate::CalibrationPlan;
use crate::error::Result;

// Trap-and-resume: let the load fault, recover in the SIGSEGV handler
#[cfg_attr(feature = "guarded-poison", allow(dead_code))]
pub mod fault_recover;

// Branch misprediction racing a flushed guard flag; never faults
#[cfg_attr(not(feature = "guarded-poison"), allow(dead_code))]
pub mod guarded_poison;

pub use fault_recover::FaultRecoverTrigger;
pub use guarded_poison::GuardedPoisonTrigger;

/**
 * One speculative dereference strategy.
 *
 * A trigger never returns a value. Its only observable effect is which probe
 * regions end up cached.
 */
pub trait SpeculationTrigger: Sized {
    /// Short name for logs.
    const NAME : &'static str;

    /// Acquire whatever tables or handlers the trigger needs.
    fn open() -> Result<Self>;

    /// Point the trigger at a new target. Called before the first `fire`
    /// for each distinct target, not before every trial.
    fn aim(&mut self, _target: usize) {}

    /// Issue one speculative probe of `target` into `probe`.
    fn fire(&mut self, target: usize, probe: &CacheProbe);

    /// How to derive the hit/miss cutoff for this trigger.
    fn calibration(&self) -> CalibrationPlan;
}
