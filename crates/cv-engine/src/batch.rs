//! Bounded-memory batch processing
//!
//! [`BatchProcessor::process`] wraps a lazy input sequence and a transform,
//! yielding the transformed items in chunks of at most `batch_size`. Only one
//! chunk is buffered at a time. The first transform failure ends the stream
//! with a [`EngineError::Processing`]; chunks already yielded stay yielded.

use crate::error::EngineError;

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct BatchProcessor {
    batch_size: usize,
}

impl BatchProcessor {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn process<I, F, U>(&self, input: I, transform: F) -> Batches<I::IntoIter, F>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Result<U, EngineError>,
    {
        Batches {
            input: input.into_iter(),
            transform,
            batch_size: self.batch_size,
            finished: false,
            stats: BatchStats::default(),
        }
    }
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

/// Advisory counters for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub batches: u64,
    pub items: u64,
    /// Largest number of transformed items held at once
    pub peak_buffered: usize,
}

/// Iterator returned by [`BatchProcessor::process`]
pub struct Batches<I, F> {
    input: I,
    transform: F,
    batch_size: usize,
    finished: bool,
    stats: BatchStats,
}

impl<I, F> Batches<I, F> {
    pub fn stats(&self) -> BatchStats {
        self.stats
    }
}

impl<I, F, U> Iterator for Batches<I, F>
where
    I: Iterator,
    F: FnMut(I::Item) -> Result<U, EngineError>,
{
    type Item = Result<Vec<U>, EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut buffer = Vec::with_capacity(self.batch_size);
        while buffer.len() < self.batch_size {
            let Some(input) = self.input.next() else {
                self.finished = true;
                break;
            };
            match (self.transform)(input) {
                Ok(output) => buffer.push(output),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(EngineError::processing(e)));
                },
            }
        }

        if buffer.is_empty() {
            return None;
        }

        self.stats.batches += 1;
        self.stats.items += buffer.len() as u64;
        self.stats.peak_buffered = self.stats.peak_buffered.max(buffer.len());
        Some(Ok(buffer))
    }
}
