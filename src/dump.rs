/*!
 * Hex dump of a target range, one byte at a time through the side channel.
 */

use crate::channel::ProbeChannel;
use crate::session::Session;
use std::io::{self, Write};

/// Bytes per printed row
pub const ROW_BYTES : usize = 16;

/// Default amount of memory to dump
pub const DEFAULT_LENGTH : usize = 4096;

/**
 * Decode `len` bytes starting at `start` and print them as rows of
 * `ROW_BYTES`: the row address, then each byte as two hex digits or `??`.
 *
 * The output is flushed after every byte; a byte can take seconds.
 *
 * # Arguments
 * * `session`: A calibrated session.
 * * `start`: First address to decode.
 * * `len`: Number of bytes, rounded up to whole rows.
 * * `out`: Where to print.
 */
pub fn dump<C: ProbeChannel, W: Write>(session: &mut Session<C>, start: usize, len: usize, out: &mut W) -> io::Result<()> {
    let rows = (len + ROW_BYTES - 1) / ROW_BYTES;
    for row in 0..rows {
        let row_address = start.wrapping_add(row * ROW_BYTES);
        write!(out, "{:#x} | ", row_address)?;
        for column in 0..ROW_BYTES {
            let byte = session.read_byte(row_address.wrapping_add(column));
            write!(out, "{} ", byte)?;
            out.flush()?;
        }
        writeln!(out)?;
    }
    Ok(())
}
