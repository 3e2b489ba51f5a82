// Clip Sentry - Library Entry Point
//
// Stages communicate only through the filesystem under the base directory:
// source tree -> inbox -> processed, with alerts, media and the GIF job
// queue alongside. The processor and the GIF worker run as separate
// processes built from the pieces below.

pub mod alerts;
pub mod config;
pub mod constants;
pub mod detect;
pub mod error;
pub mod fsutil;
pub mod ingest;
pub mod processor;
pub mod queue;
pub mod tools;
pub mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Sleep for `duration`, waking early once `shutdown` is set.
/// Returns true if shutdown was requested.
pub fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(50);
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        std::thread::sleep(SLICE.min(deadline - now));
    }
}
