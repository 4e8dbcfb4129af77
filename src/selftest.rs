/*!
 * Hardware sanity checks: are hits and misses distinguishable on this machine,
 * and does the channel decode memory we are allowed to read?
 */

use crate::channel::HardwareChannel;
use crate::config::Tuning;
use crate::dump::ROW_BYTES;
use crate::error::Result;
use crate::session::{ByteResult, Session};
use crate::timer;
use crate::triggers::SpeculationTrigger;
use tracing::warn;

/// Known pattern decoded by `check_known_bytes`
pub const PATTERN : [u8; ROW_BYTES] = *b"specread\x00\x01\x7f\x80\xfe\xff\x10\x20";

/// Number of samples averaged for the latency report
const LATENCY_SAMPLES : u64 = 1000;

/**
 * Report timer overhead and the average hit and miss latency.
 */
pub fn report_platform_info() {
    let page = Box::new([0x41u8; 4096]);
    let mut hit = 0u64;
    let mut miss = 0u64;
    for _ in 0..LATENCY_SAMPLES {
        hit += timer::time_hit(&page[128]);
        miss += timer::time_miss(&page[128]);
    }

    println!("Timer overhead is {} cycles", timer::timer_overhead());
    println!("Hit took {} cycles", hit / LATENCY_SAMPLES);
    println!("Miss took {} cycles", miss / LATENCY_SAMPLES);
}

/**
 * Decode `PATTERN` out of our own memory through the real channel.
 *
 * The bytes are readable. With the fault-recover trigger this exercises the
 * probe, the timer and the estimator without relying on speculation at all;
 * the guarded-poison trigger only ever reaches the target speculatively, so
 * there it also checks that the misprediction race is being won.
 *
 * # Return Value
 * `Ok(true)` if every byte decoded correctly.
 */
pub fn check_known_bytes<T: SpeculationTrigger>(tuning: Tuning) -> Result<bool> {
    let channel = HardwareChannel::<T>::open()?;
    let mut session = Session::new(channel, tuning)?;
    println!("Calibrated cutoff is {} cycles ({} trigger)", session.cutoff().cycles(), T::NAME);

    let pattern = Box::new(PATTERN);
    let mut mismatches = 0;
    for (i, &expected) in pattern.iter().enumerate() {
        let address = &pattern[i] as *const u8 as usize;
        let got = session.read_byte(address);
        if got != ByteResult::Value(expected) {
            warn!("Byte {} at 0x{:X}: expected {:02x}, decoded {}", i, address, expected, got);
            mismatches += 1;
        }
    }

    println!("{} / {} bytes decoded correctly", ROW_BYTES - mismatches, ROW_BYTES);
    return Ok(mismatches == 0);
}
