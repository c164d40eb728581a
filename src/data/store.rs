//! Bounded, time-ordered record store with closest and interpolated lookup.
//!
//! A [`TimestampedStore`] holds the most recent samples from one sensor
//! in timestamp order. Producers normally emit non-decreasing
//! timestamps, but a logical-offset adjustment can move the clock
//! backwards mid-stream; such records are inserted at their sorted
//! position so lookups stay correct. Once capacity is exceeded the
//! oldest record is evicted (FIFO).
//!
//! The store itself is single-owner and synchronous: it is owned by its
//! store actor and mutated only there. The actor serializes appends and
//! reads, so lookups can never observe a half-applied eviction; the
//! blocking "wait for future data" behaviour lives in the actor, which is
//! why lookups here report [`Lookup::Pending`] instead of blocking.

use crate::core::{Sample, StorePayload};
use std::collections::VecDeque;

/// Outcome of a point lookup against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// A record satisfied the query.
    Hit(Sample<T>),
    /// The query lies beyond the data acquired so far (or the store is
    /// still empty); the caller should wait for new data.
    Pending,
    /// The payload type does not support this query style.
    Unsupported,
}

struct StoredRecord<T> {
    sample: Sample<T>,
    /// Set once a `new_only` range query has handed this record out.
    retrieved: bool,
}

/// Bounded FIFO of timestamped samples with binary-search lookup.
pub struct TimestampedStore<T> {
    records: VecDeque<StoredRecord<T>>,
    capacity: usize,
}

impl<T: StorePayload> TimestampedStore<T> {
    /// Create an empty store holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "store capacity must be at least 1");
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Timestamp of the newest record, if any.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.records.back().map(|r| r.sample.timestamp_us)
    }

    /// Append a record, evicting the oldest once over capacity.
    ///
    /// Timestamps are usually non-decreasing, but an offset adjustment
    /// on the producer can legitimately back-date a record; it is then
    /// inserted at its sorted position instead of the tail.
    pub fn append(&mut self, timestamp_us: i64, payload: T) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        let record = StoredRecord {
            sample: Sample::new(timestamp_us, payload),
            retrieved: false,
        };
        match self.last_timestamp() {
            Some(last) if timestamp_us < last => {
                let idx = self.insertion_point(timestamp_us);
                self.records.insert(idx, record);
            }
            _ => self.records.push_back(record),
        }
    }

    /// Index of the first record with timestamp >= `timestamp_us`.
    fn insertion_point(&self, timestamp_us: i64) -> usize {
        self.records
            .partition_point(|r| r.sample.timestamp_us < timestamp_us)
    }

    /// Closest-match query: the first record at or after `timestamp_us`.
    ///
    /// Queries beyond the newest record report [`Lookup::Pending`] so the
    /// owner can wait for fresh data instead of answering with a stale
    /// record.
    pub fn get_closest(&self, timestamp_us: i64) -> Lookup<T> {
        let idx = self.insertion_point(timestamp_us);
        match self.records.get(idx) {
            Some(record) => Lookup::Hit(record.sample.clone()),
            None => Lookup::Pending,
        }
    }

    /// Interpolated query: linear blend of the two records bracketing
    /// `timestamp_us`.
    ///
    /// A query before the first record returns the first record verbatim
    /// (no backward extrapolation). A query beyond the newest record
    /// reports [`Lookup::Pending`], identical to `get_closest`.
    pub fn get_interpolated(&self, timestamp_us: i64) -> Lookup<T> {
        let Some(last) = self.records.back() else {
            return Lookup::Pending;
        };
        if timestamp_us > last.sample.timestamp_us {
            return Lookup::Pending;
        }

        let idx = self.insertion_point(timestamp_us);
        if idx == 0 {
            // At or before the first sample: return it unchanged.
            return Lookup::Hit(self.records[0].sample.clone());
        }

        let before = &self.records[idx - 1].sample;
        let after = &self.records[idx].sample;
        let span = after.timestamp_us - before.timestamp_us;
        let frac = if span == 0 {
            0.0
        } else {
            (timestamp_us - before.timestamp_us) as f64 / span as f64
        };

        match T::lerp(&before.payload, &after.payload, frac) {
            Some(payload) => Lookup::Hit(Sample::new(timestamp_us, payload)),
            None => Lookup::Unsupported,
        }
    }

    /// Range query: all records with timestamp in `[start_us, end_us]`
    /// (`end_us = None` means "up to the newest record").
    ///
    /// With `new_only`, only records not yet handed out by a previous
    /// `new_only` query are returned; returned records are marked as
    /// retrieved either way, supporting "give me only unseen data since
    /// last call" consumers.
    pub fn range(&mut self, start_us: i64, end_us: Option<i64>, new_only: bool) -> Vec<Sample<T>> {
        let mut out = Vec::new();
        for record in self.records.iter_mut() {
            let ts = record.sample.timestamp_us;
            if ts < start_us {
                continue;
            }
            if let Some(end) = end_us {
                if ts > end {
                    break;
                }
            }
            if new_only && record.retrieved {
                continue;
            }
            record.retrieved = true;
            out.push(record.sample.clone());
        }
        out
    }
}
