use crate::error::{CoreError, Result};
use crate::types::{sample_count, Event};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

/// Scores one window (`window[channel][sample]`) with a probability in `[0, 1]`.
///
/// Implementations must be stateless with respect to call order, since windows
/// may be scored concurrently. Any `Fn(&[Vec<f64>]) -> f64 + Sync` closure is
/// an oracle.
pub trait Oracle: Sync {
    fn score(&self, window: &[Vec<f64>]) -> f64;
}

impl<F> Oracle for F
where
    F: Fn(&[Vec<f64>]) -> f64 + Sync,
{
    fn score(&self, window: &[Vec<f64>]) -> f64 {
        self(window)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Samples per window
    pub window_size: usize,
    /// Samples between consecutive window starts
    pub step_width: usize,
    /// A window is positive when its score is strictly greater than this
    pub threshold: f64,
    /// Score windows on the rayon pool
    pub parallel: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: 250,
            step_width: 200,
            threshold: 0.5,
            parallel: true,
        }
    }
}

/// Progress message broadcast while windows are scored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionProgress {
    pub session_id: String,
    pub percent: u8,
    pub windows_done: usize,
    pub windows_total: usize,
}

/// Publishes strictly increasing percentages for one detection run
pub struct ProgressReporter {
    session_id: String,
    sender: broadcast::Sender<DetectionProgress>,
    done: AtomicUsize,
    last_percent: Mutex<Option<u8>>,
}

impl ProgressReporter {
    pub fn new(session_id: impl Into<String>, sender: broadcast::Sender<DetectionProgress>) -> Self {
        Self {
            session_id: session_id.into(),
            sender,
            done: AtomicUsize::new(0),
            last_percent: Mutex::new(None),
        }
    }

    fn window_finished(&self, total: usize) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        self.publish(done, total);
    }

    fn publish(&self, done: usize, total: usize) {
        let percent = if total == 0 {
            100
        } else {
            (done.min(total) * 100 / total) as u8
        };

        // Sending under the lock keeps the channel order monotonic
        let mut last = self.last_percent.lock();
        if last.map_or(true, |last| last < percent) {
            *last = Some(percent);
            // No subscribers is fine
            let _ = self.sender.send(DetectionProgress {
                session_id: self.session_id.clone(),
                percent,
                windows_done: done,
                windows_total: total,
            });
        }
    }
}

/// Sliding-window detector that merges positive windows into events
#[derive(Debug, Clone, Default)]
pub struct WindowedEventDetector {
    config: DetectorConfig,
}

impl WindowedEventDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn detect<O: Oracle + ?Sized>(
        &self,
        data: &[Vec<f64>],
        sample_rate: f64,
        oracle: &O,
    ) -> Result<Vec<Event>> {
        self.detect_with_progress(data, sample_rate, oracle, None)
    }

    /// Score every window of `data` and merge the positives into events.
    ///
    /// Windows start at `0, step, 2*step, ...` while the whole window fits.
    /// Events come back sorted by onset and never overlap.
    pub fn detect_with_progress<O: Oracle + ?Sized>(
        &self,
        data: &[Vec<f64>],
        sample_rate: f64,
        oracle: &O,
        progress: Option<&ProgressReporter>,
    ) -> Result<Vec<Event>> {
        let DetectorConfig {
            window_size,
            step_width,
            threshold,
            parallel,
        } = self.config;

        if window_size == 0 {
            return Err(CoreError::InvalidParameter("window size must be positive".into()));
        }
        if step_width == 0 {
            return Err(CoreError::InvalidParameter("step width must be positive".into()));
        }
        if !(sample_rate > 0.0) {
            return Err(CoreError::InvalidParameter(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }

        let n = sample_count(data);
        let starts: Vec<usize> = (0..)
            .map(|k| k * step_width)
            .take_while(|i| i + window_size <= n)
            .collect();
        let total = starts.len();

        log::debug!(
            "Scoring {} windows of {} samples over {} channels",
            total,
            window_size,
            data.len()
        );

        let score = |&start: &usize| {
            let window: Vec<Vec<f64>> = data
                .iter()
                .map(|channel| channel[start..start + window_size].to_vec())
                .collect();
            let p = oracle.score(&window);
            if let Some(reporter) = progress {
                reporter.window_finished(total);
            }
            (start, p)
        };

        let scores: Vec<(usize, f64)> = if parallel {
            starts.par_iter().map(score).collect()
        } else {
            starts.iter().map(score).collect()
        };

        if total == 0 {
            if let Some(reporter) = progress {
                reporter.publish(0, 0);
            }
        }

        // NaN compares false, so an undefined score is never positive
        let positives: Vec<(usize, f64)> = scores
            .into_iter()
            .filter(|(_, p)| *p > threshold)
            .collect();

        let events = merge_positives(&positives, window_size, sample_rate);
        log::info!(
            "Detection finished: {} of {} windows positive, {} events",
            positives.len(),
            total,
            events.len()
        );
        Ok(events)
    }
}

/// Merge ascending `(window start, score)` positives into events.
///
/// A positive joins the current event while its start is at most
/// `window_size` samples after the previous positive's start.
pub fn merge_positives(positives: &[(usize, f64)], window_size: usize, sample_rate: f64) -> Vec<Event> {
    let mut events = Vec::new();
    let mut iter = positives.iter().copied();

    let Some((first, p)) = iter.next() else {
        return events;
    };

    let close = |start: usize, last: usize, confidence: f64| {
        let onset = start as f64 / sample_rate;
        Event {
            onset,
            duration: (last as f64 / sample_rate - onset) + window_size as f64 / sample_rate,
            confidence,
        }
    };

    let (mut start, mut last, mut confidence) = (first, first, p);
    for (index, p) in iter {
        if index - last <= window_size {
            last = index;
            confidence = confidence.max(p);
        } else {
            events.push(close(start, last, confidence));
            (start, last, confidence) = (index, index, p);
        }
    }
    events.push(close(start, last, confidence));

    events
}
