//! Fixed-capacity sample ring for one statistic of one MSU.

use std::collections::VecDeque;

use flowmesh_proto::TimedValue;
use tracing::trace;

/// Samples retained per statistic. Older samples are overwritten.
pub const WINDOW_CAPACITY: usize = 240;

/// A bounded ring of timestamped samples, newest last.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    samples: VecDeque<TimedValue>,
    capacity: usize,
}

impl Default for TimeSeries {
    fn default() -> Self {
        Self::with_capacity(WINDOW_CAPACITY)
    }
}

impl TimeSeries {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append one sample. Samples with a zero timestamp mark unset
    /// slots in the reporting runtime's own ring and are dropped.
    pub fn append(&mut self, sample: TimedValue) {
        if sample.secs == 0 {
            trace!("dropping unset sample");
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn append_all(&mut self, samples: impl IntoIterator<Item = TimedValue>) {
        for sample in samples {
            self.append(sample);
        }
    }

    /// The most recent sample, if any.
    pub fn latest(&self) -> Option<&TimedValue> {
        self.samples.back()
    }

    fn window(&self, n: usize) -> impl Iterator<Item = f64> + '_ {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).map(|s| s.value)
    }

    /// Smallest value among the last `n` samples.
    pub fn min_over(&self, n: usize) -> Option<f64> {
        self.window(n).reduce(f64::min)
    }

    /// Largest value among the last `n` samples.
    pub fn max_over(&self, n: usize) -> Option<f64> {
        self.window(n).reduce(f64::max)
    }

    /// Mean of the last `n` samples.
    pub fn average_over(&self, n: usize) -> Option<f64> {
        let mut count = 0usize;
        let mut sum = 0.0;
        for value in self.window(n) {
            count += 1;
            sum += value;
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}
