use crate::sample::Sample;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub len: usize,
    pub dropped: usize,
    pub threshold_reached: bool,
}

/// Ordered samples waiting for a successful flush.
///
/// The lock only ever covers in-memory work. A flush takes the whole sequence
/// out with [`SampleBuffer::take`] and hands it back with
/// [`SampleBuffer::restore`] if the remote side did not accept it, so a batch
/// is only gone once it has been delivered.
#[derive(Debug)]
pub struct SampleBuffer {
    samples: Mutex<Vec<Sample>>,
    threshold: usize,
    max_samples: usize,
}

impl SampleBuffer {
    pub fn new(threshold: usize, max_samples: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            samples: Mutex::new(Vec::with_capacity(threshold)),
            threshold,
            max_samples: max_samples.max(threshold),
        }
    }

    pub fn append(&self, sample: Sample) -> AppendOutcome {
        let mut samples = self.lock();
        samples.push(sample);
        let dropped = drop_oldest(&mut samples, self.max_samples);
        AppendOutcome {
            len: samples.len(),
            dropped,
            threshold_reached: samples.len() >= self.threshold,
        }
    }

    pub fn take(&self) -> Vec<Sample> {
        std::mem::take(&mut *self.lock())
    }

    /// Puts an undelivered batch back ahead of anything appended since it was
    /// taken. Returns how many samples the cap forced out.
    pub fn restore(&self, mut batch: Vec<Sample>) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let mut samples = self.lock();
        batch.append(&mut samples);
        *samples = batch;
        drop_oldest(&mut samples, self.max_samples)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn threshold_reached(&self) -> bool {
        self.len() >= self.threshold
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sample>> {
        // A panic while holding the lock can't leave the Vec half-written, so keep going.
        self.samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn drop_oldest(samples: &mut Vec<Sample>, max_samples: usize) -> usize {
    let excess = samples.len().saturating_sub(max_samples);
    if excess > 0 {
        samples.drain(..excess);
        tracing::warn!(dropped = excess, max_samples, "sample buffer full; dropped oldest samples");
    }
    excess
}
