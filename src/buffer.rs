//! Bounded rolling buffers for candles and predictions.
//!
//! [`RollingBuffer`] is the single-owner ring; [`BoundedStore`] wraps it in a
//! mutex so the ingest task, the scheduler and display consumers can share
//! it. Locks are only held while copying in or out.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::candle::{Candle, PredictionRecord};

/// A generic rolling buffer with fixed capacity.
///
/// Pushing into a full buffer evicts the oldest element.
#[derive(Debug, Clone)]
pub struct RollingBuffer<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingBuffer<T> {
    /// Create a new rolling buffer with the specified capacity.
    ///
    /// # Example
    /// ```
    /// use candle_forecast::RollingBuffer;
    /// let buffer: RollingBuffer<f64> = RollingBuffer::new(100);
    /// assert_eq!(buffer.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add a new element, evicting the oldest one when full.
    pub fn push(&mut self, value: T) {
        if self.capacity == 0 {
            return;
        }
        if self.is_full() {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Most recent element, if any.
    pub fn last(&self) -> Option<&T> {
        self.buffer.back()
    }

    /// The `min(n, len)` most recent elements, oldest first.
    pub fn last_n(&self, n: usize) -> impl Iterator<Item = &T> {
        self.buffer.iter().skip(self.buffer.len().saturating_sub(n))
    }

    /// Iterator over all elements (oldest to newest).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffer.iter()
    }
}

impl<T: Clone> RollingBuffer<T> {
    /// Get a vector of all elements (oldest to newest).
    pub fn to_vec(&self) -> Vec<T> {
        self.buffer.iter().cloned().collect()
    }
}

/// Thread-safe bounded FIFO store shared by reference between tasks.
#[derive(Debug)]
pub struct BoundedStore<T> {
    inner: Mutex<RollingBuffer<T>>,
}

impl<T: Clone> BoundedStore<T> {
    /// Create an empty store.
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of elements kept; older ones are evicted
    ///
    /// # Example
    /// ```
    /// use candle_forecast::ResultStore;
    /// let results = ResultStore::new(300);
    /// assert!(results.is_empty());
    /// assert_eq!(results.capacity(), 300);
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RollingBuffer::new(capacity)),
        }
    }

    // A panic while holding the lock cannot leave the ring half-updated, so a
    // poisoned guard is still usable.
    fn lock(&self) -> MutexGuard<'_, RollingBuffer<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one element, evicting the oldest at capacity.
    pub fn push(&self, value: T) {
        self.lock().push(value);
    }

    /// Copy of the `min(n, len)` most recent elements, oldest first.
    pub fn get_last_n(&self, n: usize) -> Vec<T> {
        self.lock().last_n(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn last(&self) -> Option<T> {
        self.lock().last().cloned()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.lock().to_vec()
    }

    /// Atomically clear the store and load `values` in order.
    ///
    /// Only the most recent `capacity` values survive. Returns the new length.
    pub fn replace(&self, values: impl IntoIterator<Item = T>) -> usize {
        // Collect before locking so a lazy iterator never runs under the lock.
        let values: Vec<T> = values.into_iter().collect();
        let mut guard = self.lock();
        guard.clear();
        for value in values {
            guard.push(value);
        }
        guard.len()
    }
}

/// Rolling window of finalized candles.
pub type CandleStore = BoundedStore<Candle>;

/// Bounded log of published predictions.
pub type ResultStore = BoundedStore<PredictionRecord>;

impl BoundedStore<Candle> {
    /// Window of `lookback + margin` candles, never smaller than the
    /// `lookback + 1` a forecast consumes.
    pub fn for_lookback(lookback: usize, margin: usize) -> Self {
        Self::new((lookback + margin).max(lookback + 1))
    }
}

/// Column-wise copy of the prediction log for rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionSnapshot {
    pub timestamps: Vec<DateTime<Utc>>,
    pub prices: Vec<f64>,
}

impl PredictionSnapshot {
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DateTime<Utc>, f64)> + '_ {
        self.timestamps.iter().copied().zip(self.prices.iter().copied())
    }
}

impl BoundedStore<PredictionRecord> {
    /// Consistent copy of all predictions taken under a single lock.
    pub fn snapshot(&self) -> PredictionSnapshot {
        let guard = self.lock();
        let mut snapshot = PredictionSnapshot {
            timestamps: Vec::with_capacity(guard.len()),
            prices: Vec::with_capacity(guard.len()),
        };
        for record in guard.iter() {
            snapshot.timestamps.push(record.target_timestamp);
            snapshot.prices.push(record.price);
        }
        snapshot
    }
}
