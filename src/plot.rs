/*!
 * Live latency heatmap through a gnuplot pipe.
 *
 * Each frame is a `time_buckets x 256` integer matrix drawn with
 * `matrix with image`, x = probe region, y = latency.
 */

use crate::cache::REGIONS;
use crate::channel::ProbeChannel;
use crate::config::Tuning;
use crate::error::{Error, Result};
use crate::histogram::Histogram;
use crate::session::Session;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use tracing::info;

/// Upper end of the color scale; buckets with more samples saturate
pub const COLOR_RANGE : u32 = 10;

pub fn write_header<W: Write>(out: &mut W, tuning: &Tuning) -> io::Result<()> {
    writeln!(out, "set yrange [0:{}]", tuning.time_range())?;
    writeln!(out, "set xrange [0:{}]", REGIONS - 1)?;
    writeln!(out, "set cbrange [0:{}]", COLOR_RANGE)?;
    writeln!(out, "set terminal qt size 1024,256")?;
    Ok(())
}

/// One inline-data plot command: a row per time bucket, a column per region.
pub fn write_frame<W: Write>(out: &mut W, histogram: &Histogram) -> io::Result<()> {
    writeln!(out, "plot '-' u 1:($2*{}):3 matrix with image pixels", histogram.width())?;
    for bucket in 0..histogram.buckets() {
        for region in 0..REGIONS {
            write!(out, "{} ", histogram.count(region, bucket))?;
        }
        writeln!(out)?;
    }
    writeln!(out, "e")?;
    writeln!(out, "e")?;
    out.flush()
}

/**
 * Stream histograms of `address` to a freshly spawned gnuplot, forever.
 *
 * # Return Value
 * Only returns on failure: gnuplot could not be started or closed its input.
 */
pub fn stream<C: ProbeChannel>(session: &mut Session<C>, address: usize) -> Result<()> {
    let mut gnuplot = Command::new("gnuplot")
        .stdin(Stdio::piped())
        .spawn()
        .map_err(Error::Plot)?;
    let mut pipe = gnuplot
        .stdin
        .take()
        .ok_or_else(|| Error::Plot(io::Error::new(io::ErrorKind::BrokenPipe, "gnuplot has no stdin")))?;

    info!("Streaming histograms of 0x{:X} to gnuplot (pid {})", address, gnuplot.id());
    write_header(&mut pipe, session.tuning()).map_err(Error::Plot)?;
    loop {
        let histogram = session.histogram(address);
        write_frame(&mut pipe, &histogram).map_err(Error::Plot)?;
    }
}
