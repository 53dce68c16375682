//! Stability detection over a noisy hashrate stream.
//!
//! Raw hashrate readings are short-term averages and jump around right after
//! a clock change. Requiring the current sample to agree with the previous
//! three acts as a cheap low-pass filter: it avoids measuring mid-transient
//! without waiting longer than the stream actually needs.

use std::time::Duration;

use log::debug;

use crate::error::Result;

/// Samples the current sample must agree with before it counts as stable.
pub const STABILITY_SAMPLE_COUNT: usize = 3;

/// Maximum spread (khash/s) between the current sample and each window entry.
pub const STABILITY_MAX_DIFF: f64 = 1.0;

/// Attempt ceiling for [`wait_for_stable`], one attempt per second.
pub const MAX_WAIT_ATTEMPTS: usize = 30;

/// Sleep between samples in production use.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Window
// ---------------------------------------------------------------------------

/// Bounded FIFO of the most recent hashrate samples.
///
/// Lives only for the duration of one stability-detection call.
#[derive(Debug, Default)]
pub struct StabilityWindow {
    samples: Vec<f64>,
}

impl StabilityWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample, evicting the oldest one first when the window is
    /// already at capacity.
    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == STABILITY_SAMPLE_COUNT {
            self.samples.remove(0);
        }
        self.samples.push(sample);
    }

    /// True iff the window is full and `current` lies within
    /// [`STABILITY_MAX_DIFF`] of every held sample.
    pub fn agrees_with(&self, current: f64) -> bool {
        self.samples.len() == STABILITY_SAMPLE_COUNT
            && self
                .samples
                .iter()
                .all(|&past| (current - past).abs() <= STABILITY_MAX_DIFF)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.samples.len()
    }

    #[cfg(test)]
    fn as_slice(&self) -> &[f64] {
        &self.samples
    }
}

// ---------------------------------------------------------------------------
// Wait loop
// ---------------------------------------------------------------------------

/// Poll `sampler` once per `interval` until a sample agrees with the three
/// before it, or `max_attempts` samples have been taken.
///
/// On timeout this returns the most recent sample rather than failing: a
/// never-settling stream degrades to a best-effort reading. A sampler error
/// (any protocol failure) propagates and is fatal to the caller.
///
/// The agreeing sample is returned without being pushed into the window; the
/// loop stops the moment agreement is observed.
pub fn wait_for_stable<S>(mut sampler: S, max_attempts: usize, interval: Duration) -> Result<f64>
where
    S: FnMut() -> Result<f64>,
{
    let mut window = StabilityWindow::new();
    let mut current = 0.0;

    for attempt in 0..max_attempts {
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }

        current = sampler()?;

        if window.agrees_with(current) {
            debug!("hashrate stable at {current:.1} khash/s after {} samples", attempt + 1);
            return Ok(current);
        }
        window.push(current);
    }

    debug!("hashrate never settled; using last sample {current:.1} khash/s");
    Ok(current)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Sampler over a fixed script that panics if drained past its end.
    fn scripted(samples: Vec<f64>) -> impl FnMut() -> Result<f64> {
        let mut iter = samples.into_iter();
        move || Ok(iter.next().expect("sampler polled past end of script"))
    }

    // -----------------------------------------------------------------------
    // Window behavior
    // -----------------------------------------------------------------------

    #[test]
    fn window_never_exceeds_capacity() {
        let mut w = StabilityWindow::new();
        for i in 0..10 {
            w.push(f64::from(i));
            assert!(w.len() <= STABILITY_SAMPLE_COUNT);
        }
    }

    #[test]
    fn window_evicts_oldest_first() {
        let mut w = StabilityWindow::new();
        for i in 0..7 {
            w.push(f64::from(i));
        }
        // After 7 pushes, the last 3 remain in push order.
        assert_eq!(w.as_slice(), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn partial_window_never_agrees() {
        let mut w = StabilityWindow::new();
        w.push(500.0);
        w.push(500.0);
        assert!(!w.agrees_with(500.0));
    }

    #[test]
    fn agreement_is_within_tolerance_of_every_sample() {
        let mut w = StabilityWindow::new();
        w.push(500.0);
        w.push(500.5);
        w.push(499.5);
        assert!(w.agrees_with(500.0));
        // 501.0 differs from 499.5 by 1.5 > tolerance.
        assert!(!w.agrees_with(501.0));
    }

    // -----------------------------------------------------------------------
    // Wait loop
    // -----------------------------------------------------------------------

    #[test]
    fn returns_on_fourth_sample_when_first_three_agree() {
        // Exactly 4 samples in the script: a 5th pull would panic.
        let sampler = scripted(vec![500.0, 500.3, 499.8, 500.1]);
        let rate = wait_for_stable(sampler, MAX_WAIT_ATTEMPTS, Duration::ZERO).unwrap();
        assert_eq!(rate, 500.1);
    }

    #[test]
    fn transient_then_stable() {
        // Big swings first; agreement only once 700.x fills the window.
        let sampler = scripted(vec![100.0, 400.0, 700.0, 700.4, 699.9, 700.2]);
        let rate = wait_for_stable(sampler, MAX_WAIT_ATTEMPTS, Duration::ZERO).unwrap();
        assert_eq!(rate, 700.2);
    }

    #[test]
    fn timeout_returns_sample_from_final_attempt() {
        // Strictly increasing by 2.0: never within tolerance.
        let samples: Vec<f64> = (0..MAX_WAIT_ATTEMPTS).map(|i| 2.0 * i as f64).collect();
        let last = *samples.last().unwrap();

        let sampler = scripted(samples);
        let rate = wait_for_stable(sampler, MAX_WAIT_ATTEMPTS, Duration::ZERO).unwrap();
        assert_eq!(rate, last);
    }

    #[test]
    fn sampler_error_propagates() {
        let mut calls = 0;
        let sampler = move || {
            calls += 1;
            if calls == 3 {
                Err(crate::error::Error::UnexpectedResponse("boom".into()))
            } else {
                Ok(500.0)
            }
        };
        assert!(wait_for_stable(sampler, MAX_WAIT_ATTEMPTS, Duration::ZERO).is_err());
    }
}
