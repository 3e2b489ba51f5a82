// Stability gate: is an externally written file finished?
//
// A file being written grows; once the writer closes it the size holds.
// We treat "same size at every poll across the window" as finished.

use std::path::Path;
use std::thread;
use std::time::Duration;

/// True when `path` keeps the same size for every poll across
/// `stable_window`. A file that is missing at any poll is simply not stable.
/// Blocks the caller for the whole window.
pub fn is_stable(path: &Path, stable_window: Duration, poll_interval: Duration) -> bool {
    stable_by(
        || std::fs::metadata(path).ok().map(|m| m.len()),
        stable_window,
        poll_interval,
        thread::sleep,
    )
}

/// Core of [`is_stable`] with the size probe and sleeper injected.
pub fn stable_by<P, S>(mut size: P, stable_window: Duration, poll_interval: Duration, mut sleep: S) -> bool
where
    P: FnMut() -> Option<u64>,
    S: FnMut(Duration),
{
    let initial = match size() {
        Some(s) => s,
        None => return false,
    };

    // A zero poll would spin forever; take one step covering the whole window.
    let step = if poll_interval.is_zero() { stable_window } else { poll_interval };
    let mut waited = Duration::ZERO;

    while waited < stable_window {
        sleep(step);
        waited += step;

        match size() {
            Some(s) if s == initial => {}
            _ => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    fn run(sizes: Vec<Option<u64>>, window: u64, poll: u64) -> (bool, usize) {
        let sizes = RefCell::new(sizes.into_iter());
        let polls = RefCell::new(0);
        let stable = stable_by(
            || {
                *polls.borrow_mut() += 1;
                sizes.borrow_mut().next().flatten()
            },
            Duration::from_secs(window),
            Duration::from_secs(poll),
            |_| {},
        );
        let count = *polls.borrow();
        (stable, count)
    }

    #[test]
    fn test_unchanged_size_is_stable() {
        // initial read + 4 polls for an 8s window at 2s
        let (stable, polls) = run(vec![Some(10); 5], 8, 2);
        assert!(stable);
        assert_eq!(polls, 5);
    }

    #[test]
    fn test_growth_at_any_poll_is_unstable() {
        let (stable, _) = run(vec![Some(10), Some(10), Some(10), Some(12), Some(12)], 8, 2);
        assert!(!stable);
    }

    #[test]
    fn test_vanished_file_is_unstable_not_error() {
        let (stable, polls) = run(vec![Some(10), Some(10), None], 8, 2);
        assert!(!stable);
        assert_eq!(polls, 3);

        let (stable, polls) = run(vec![None], 8, 2);
        assert!(!stable);
        assert_eq!(polls, 1);
    }

    #[test]
    fn test_zero_poll_does_not_spin() {
        let (stable, polls) = run(vec![Some(1), Some(1)], 8, 0);
        assert!(stable);
        assert_eq!(polls, 2);
    }

    #[test]
    fn test_real_file_with_concurrent_writer() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("growing.mp4");
        std::fs::write(&path, b"start").unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&writer_path).unwrap();
            for _ in 0..10 {
                std::thread::sleep(Duration::from_millis(20));
                f.write_all(b"more").unwrap();
                f.flush().unwrap();
            }
        });

        assert!(!is_stable(&path, Duration::from_millis(150), Duration::from_millis(10)));
        writer.join().unwrap();
        assert!(is_stable(&path, Duration::from_millis(60), Duration::from_millis(20)));
    }

    #[test]
    fn test_missing_file() {
        let tmp = TempDir::new().unwrap();
        assert!(!is_stable(&tmp.path().join("nope.mp4"), Duration::from_millis(10), Duration::from_millis(5)));
    }
}
