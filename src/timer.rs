/*!
 * Fenced cycle-counter reads and cache line flushes.
 *
 * Everything here is x86_64 only: `rdtsc` for time, `clflush` for eviction.
 * The fences keep the out-of-order engine from moving the timed load
 * outside of the two counter reads.
 */

use core::arch::asm;
use core::ptr;

/**
 * Returns the number of cycles it takes to load one byte from `addr`.
 *
 * The sequence is `mfence; lfence; rdtsc; lfence; load; lfence; rdtsc`, so
 * both counter reads are ordered against the load and against anything
 * still in flight from before the call.
 *
 * # Safety
 * `addr` must be readable.
 */
#[inline(always)]
pub unsafe fn time_access(addr: *const u8) -> u64 {
    let lo1 : u32;
    let hi1 : u32;
    let lo2 : u32;
    let hi2 : u32;
    asm!{
        "mfence",
        "lfence",
        "rdtsc",
        "lfence",
        "mov {lo1:e}, eax",
        "mov {hi1:e}, edx",
        "movzx {val:e}, byte ptr [{addr}]",
        "lfence",
        "rdtsc",
        addr = in(reg) addr,
        val = out(reg) _,
        lo1 = out(reg) lo1,
        hi1 = out(reg) hi1,
        out("eax") lo2,
        out("edx") hi2,
        options(nostack),
    }
    let t1 = ((hi1 as u64) << 32) | lo1 as u64;
    let t2 = ((hi2 as u64) << 32) | lo2 as u64;
    return t2.wrapping_sub(t1);
}

/**
 * Evict the line holding `addr` from every level of the cache hierarchy.
 *
 * # Safety
 * `addr` must be mapped.
 */
#[inline(always)]
pub unsafe fn flush(addr: *const u8) {
    asm!{
        "mfence",
        "clflush byte ptr [{addr}]",
        addr = in(reg) addr,
        options(nostack, preserves_flags),
    }
}

/**
 * Returns the constant time offset of a measurement with nothing in between.
 * Useful as a floor when reading the hit/miss numbers below.
 */
pub fn timer_overhead() -> u64 {
    let lo1 : u32;
    let hi1 : u32;
    let lo2 : u32;
    let hi2 : u32;
    unsafe {
        asm!{
            "mfence",
            "lfence",
            "rdtsc",
            "lfence",
            "mov {lo1:e}, eax",
            "mov {hi1:e}, edx",
            "lfence",
            "rdtsc",
            lo1 = out(reg) lo1,
            hi1 = out(reg) hi1,
            out("eax") lo2,
            out("edx") hi2,
            options(nostack),
        }
    }
    let t1 = ((hi1 as u64) << 32) | lo1 as u64;
    let t2 = ((hi2 as u64) << 32) | lo2 as u64;
    return t2.wrapping_sub(t1);
}

/**
 * Reports the time for a cache hit.
 *
 * # Arguments
 * * `line`: Any readable byte.
 *
 * # Return Value
 * Cycles for the second of two back-to-back loads.
 */
pub fn time_hit(line: &u8) -> u64 {
    unsafe {
        ptr::read_volatile(line);
        time_access(line);
        return time_access(line);
    }
}

/**
 * Reports the time for a cache miss.
 *
 * # Arguments
 * * `line`: Any readable byte. It is flushed before being timed.
 *
 * # Return Value
 * Cycles for a load that has to go all the way to memory.
 */
pub fn time_miss(line: &u8) -> u64 {
    unsafe {
        ptr::read_volatile(line);
        flush(line);
        return time_access(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_moves_forward() {
        let byte = 7u8;
        // A load always costs something; a wrapped subtraction would be huge.
        let t = unsafe { time_access(&byte) };
        assert!(t > 0 && t < 1 << 40, "implausible latency {}", t);
    }

    #[test]
    fn flushed_line_is_not_faster_than_cached_line_on_average() {
        let data = Box::new([1u8; 4096]);
        let mut hit = 0u64;
        let mut miss = 0u64;
        for _ in 0..256 {
            hit += time_hit(&data[64]);
            miss += time_miss(&data[64]);
        }
        assert!(miss >= hit, "miss {} < hit {}", miss, hit);
    }
}
