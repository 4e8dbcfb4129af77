/*!
 * Error types shared by the channel, the triggers and the front ends.
 */

use std::io;
use thiserror::Error;

/// Everything that can go wrong outside of the measurement loop itself.
///
/// Low-confidence measurements and exhausted retry budgets are not errors;
/// they surface as [`crate::session::ByteResult::Unknown`].
#[derive(Debug, Error)]
pub enum Error {
    /// A probe region or trigger table could not be mapped.
    #[error("failed to map {what} ({len} bytes)")]
    Map {
        what: &'static str,
        len: usize,
        #[source]
        source: io::Error,
    },

    /// Installing or restoring the fault handler failed.
    #[error("failed to install fault handler for signal {signal}")]
    SignalHandler {
        signal: i32,
        #[source]
        source: io::Error,
    },

    /// Only one fault-recover trigger may own the process-wide handler.
    #[error("a fault-recover trigger is already active in this process")]
    TriggerInUse,

    #[error("invalid target address {0:?} (expected a hex pointer such as 0xffff888000000000)")]
    InvalidAddress(String),

    #[error("invalid tuning: {0}")]
    InvalidTuning(String),

    /// The plotting process could not be started or went away.
    #[error("plot pipe failed")]
    Plot(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
