//! Common functionality.

use byte_unit::{Byte, UnitType};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Resident set size of the current process in bytes.
fn rss_bytes() -> Result<u64, procfs::ProcError> {
    let me = procfs::process::Process::myself()?;
    Ok(me.stat()?.rss * procfs::page_size())
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    match rss_bytes() {
        Ok(rss) => tracing::debug!(
            "RSS now: {:.2}",
            Byte::from_u64(rss).get_appropriate_unit(UnitType::Binary)
        ),
        Err(e) => tracing::debug!("could not determine RSS: {}", e),
    }
}
