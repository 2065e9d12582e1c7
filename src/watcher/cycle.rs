use crate::common::{AdapterError, StoreError};

/// Where the next cycle starts exploring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// The store has not been consulted yet.
    Unresolved,
    /// Nothing is known about the chain: start at the first finalized watermark observed.
    FirstFinalized,
    /// Explore from this watermark on.
    Next(u64),
}

/// Local progress of a watcher. Only ever advanced after a successful merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainState {
    /// Start of the next range to explore.
    pub cursor: Cursor,
    /// Failed cycles since the last successful one.
    pub consecutive_failures: u32,
}

impl Default for ChainState {
    fn default() -> Self {
        Self { cursor: Cursor::Unresolved, consecutive_failures: 0 }
    }
}

/// A retryable failure that ended a cycle early. The cursor did not move.
#[derive(Debug)]
pub enum CycleFailure {
    /// Reading the last observed message to seed the cursor failed.
    Seed(StoreError),
    /// The finalized watermark could not be fetched.
    Watermark(AdapterError),
    /// Fetching the messages of `[from, to]` failed.
    Messages {
        /// Range start.
        from: u64,
        /// Range end, inclusive.
        to: u64,
        /// Cause.
        error: AdapterError,
    },
    /// Merging the messages of `[from, to]` failed.
    Store {
        /// Range start.
        from: u64,
        /// Range end, inclusive.
        to: u64,
        /// Cause.
        error: StoreError,
    },
}

/// The result of a single watcher cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The finalized watermark has not reached the cursor.
    NothingNew {
        /// Finalized watermark reported by the adapter.
        finalized: u64,
    },
    /// `[from, to]` was explored and its messages merged.
    Explored {
        /// Range start.
        from: u64,
        /// Range end, inclusive.
        to: u64,
        /// Finalized watermark reported by the adapter.
        finalized: u64,
        /// Messages merged.
        stored: usize,
    },
    /// The cycle ended early and will be retried.
    Failed(CycleFailure),
}

impl CycleOutcome {
    /// Returns true if finalized watermarks remain beyond the explored range.
    pub fn is_behind(&self) -> bool {
        matches!(self, CycleOutcome::Explored { to, finalized, .. } if to < finalized)
    }
}
