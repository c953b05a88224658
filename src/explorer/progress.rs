//! Progress meter (C8): a windowed moving-average ETA estimator. Samples a
//! `(completed, total)` reading at each tick and reports an estimated
//! completion `Instant`, averaged over the last `WINDOW` ticks so a single
//! slow or fast point doesn't whipsaw the estimate.
//!
//! Grounded in the same "don't trust a single sample" shape as
//! `execution/timeout.rs`'s deadline tracking, generalized to a moving
//! window.

use std::time::{Duration, Instant};

const WINDOW: usize = 4;
/// If the freshest rate estimate diverges from the windowed average by more
/// than this factor, the window is discarded and restarted — a burst of
/// cache-hit-fast points (or a stall) shouldn't drag the ETA for many ticks.
const DIVERGENCE_FACTOR: f64 = 2.0;

/// How many ticks (from construction or from a divergence reset) count as
/// *warmup*, during which every tick refreshes and reports.
const WARMUP_TICKS: u32 = 10;
/// Steady-state report cadence.
const REPORT_SEC: f64 = 2.0;
/// Steady-state refresh cadence — finer-grained than reporting so the window
/// average stays current between the reports actually surfaced to a caller.
const REFRESH_SEC: f64 = REPORT_SEC / 8.0;

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    completed: usize,
}

#[derive(Debug)]
pub struct ProgressMeter {
    total: usize,
    samples: Vec<Sample>,
    started: Instant,
    tick_count: u32,
    last_refresh: Instant,
    last_report: Instant,
    last_estimate: Option<Estimate>,
}

impl ProgressMeter {
    pub fn new(total: usize) -> Self {
        let now = Instant::now();
        ProgressMeter {
            total,
            samples: vec![Sample { at: now, completed: 0 }],
            started: now,
            tick_count: 0,
            last_refresh: now,
            last_report: now,
            last_estimate: None,
        }
    }

    /// Records that `completed` points (out of `total`) are now done.
    /// Returns `Some(estimate)` only when the warmup/steady-state cadence
    /// (spec §4.10) says this tick should actually be reported; during
    /// warmup (the first `WARMUP_TICKS` ticks, or right after a divergence
    /// reset) that's every tick, afterward only every `REPORT_SEC`.
    pub fn tick(&mut self, completed: usize) -> Option<Estimate> {
        let now = Instant::now();
        let latest = Sample { at: now, completed };

        let mut diverged = false;
        if let Some(first) = self.samples.first() {
            let elapsed = now.duration_since(first.at).as_secs_f64();
            let done = (completed.saturating_sub(first.completed)) as f64;
            if elapsed > 0.0 && done > 0.0 {
                let windowed_rate = done / elapsed;
                if let Some(prev) = self.samples.last() {
                    let instant_elapsed = now.duration_since(prev.at).as_secs_f64();
                    let instant_done = (completed.saturating_sub(prev.completed)) as f64;
                    if instant_elapsed > 0.0 && instant_done > 0.0 {
                        let instant_rate = instant_done / instant_elapsed;
                        diverged = instant_rate > windowed_rate * DIVERGENCE_FACTOR || instant_rate * DIVERGENCE_FACTOR < windowed_rate;
                        if diverged {
                            self.samples.clear();
                        }
                    }
                }
            }
        }

        self.samples.push(latest);
        if self.samples.len() > WINDOW + 1 {
            self.samples.remove(0);
        }

        self.tick_count = if diverged { 0 } else { self.tick_count + 1 };
        let warmup = self.tick_count <= WARMUP_TICKS;

        if warmup || now.duration_since(self.last_refresh).as_secs_f64() >= REFRESH_SEC {
            self.last_estimate = Some(self.estimate(completed, now));
            self.last_refresh = now;
        }

        if warmup || now.duration_since(self.last_report).as_secs_f64() >= REPORT_SEC {
            self.last_report = now;
            Some(self.last_estimate.unwrap_or_else(|| self.estimate(completed, now)))
        } else {
            None
        }
    }

    fn estimate(&self, completed: usize, now: Instant) -> Estimate {
        let remaining = self.total.saturating_sub(completed);
        let first = self.samples.first().copied().unwrap_or(Sample { at: self.started, completed: 0 });
        let elapsed = now.duration_since(first.at).as_secs_f64();
        let done = (completed.saturating_sub(first.completed)) as f64;

        let eta = if done > 0.0 && elapsed > 0.0 {
            let rate = done / elapsed;
            Some(Duration::from_secs_f64(remaining as f64 / rate))
        } else {
            None
        };

        Estimate {
            completed,
            total: self.total,
            elapsed_total: now.duration_since(self.started),
            eta_remaining: eta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub completed: usize,
    pub total: usize,
    pub elapsed_total: Duration,
    pub eta_remaining: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn no_progress_yields_no_eta() {
        let mut meter = ProgressMeter::new(10);
        let estimate = meter.tick(0).unwrap();
        assert_eq!(estimate.eta_remaining, None);
    }

    #[test]
    fn steady_progress_yields_a_decreasing_eta() {
        let mut meter = ProgressMeter::new(100);
        sleep(Duration::from_millis(5));
        let first = meter.tick(10).unwrap().eta_remaining.unwrap();
        sleep(Duration::from_millis(5));
        let second = meter.tick(50).unwrap().eta_remaining.unwrap();
        assert!(second < first);
    }

    #[test]
    fn completion_reports_zero_remaining_estimate_window() {
        let mut meter = ProgressMeter::new(10);
        sleep(Duration::from_millis(2));
        let estimate = meter.tick(10).unwrap();
        assert_eq!(estimate.completed, 10);
        assert_eq!(estimate.total, 10);
    }

    #[test]
    fn warmup_ticks_always_report() {
        let mut meter = ProgressMeter::new(1000);
        for i in 1..=WARMUP_TICKS {
            assert!(meter.tick(i as usize).is_some(), "tick {i} should report during warmup");
        }
    }

    #[test]
    fn steady_state_suppresses_reports_faster_than_report_sec() {
        let mut meter = ProgressMeter::new(1_000_000);
        for i in 1..=WARMUP_TICKS {
            meter.tick(i as usize);
        }
        let suppressed = meter.tick(WARMUP_TICKS as usize + 1);
        assert_eq!(suppressed, None);
    }

    #[test]
    fn divergence_resets_to_warmup_and_reports_immediately() {
        let mut meter = ProgressMeter::new(1_000_000);
        for i in 1..=WARMUP_TICKS {
            meter.tick(i as usize * 10);
            sleep(Duration::from_millis(1));
        }
        let suppressed = meter.tick(WARMUP_TICKS as usize * 10 + 1);
        assert_eq!(suppressed, None);

        sleep(Duration::from_millis(5));
        let reported = meter.tick(WARMUP_TICKS as usize * 10 + 100_000);
        assert!(reported.is_some(), "a sharp rate divergence should force an immediate report");
        assert_eq!(meter.tick_count, 0);
    }
}
