//! Baud-rate fallback for flashing.
//!
//! Fast links fail on some USB-UART bridges and long cables, so a flash is
//! attempted at each rate of a fastest-first list until one succeeds.

use crate::error::{Error, Result};
use log::{info, warn};

/// Baud rates tried by default: fast first, then the rate every bridge supports.
pub const DEFAULT_BAUD_RATES: &[u32] = &[921_600, 115_200];

/// Run `attempt` at each baud rate until one succeeds.
///
/// Per-rate failures are logged and swallowed. When every rate fails the
/// returned [`Error::Flash`] wraps the failure of the *last* rate; earlier
/// failures are only visible in the log.
pub fn flash_with_retry<F>(baud_rates: &[u32], mut attempt: F) -> Result<()>
where
    F: FnMut(u32) -> Result<()>,
{
    if baud_rates.is_empty() {
        return Err(Error::Config("baud rate list is empty".into()));
    }

    let total = baud_rates.len();
    let mut last_error = None;

    for (i, &baud) in baud_rates.iter().enumerate() {
        match attempt(baud) {
            Ok(()) => {
                if i > 0 {
                    info!("Flashed at {baud} baud (attempt {}/{total})", i + 1);
                }
                return Ok(());
            },
            Err(e) => {
                warn!("Flashing at {baud} baud failed (attempt {}/{total}): {e}", i + 1);
                last_error = Some((baud, e));
            },
        }
    }

    match last_error {
        Some((baud, source)) => Err(Error::Flash {
            baud,
            source: Box::new(source),
        }),
        None => Err(Error::Config("baud rate list is empty".into())),
    }
}
