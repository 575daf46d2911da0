//! Diagnostic byte-credit accounting.
//!
//! Two independent ledgers ride alongside each inspected connection:
//!
//! - [`StreamCredits`] mirrors HTTP/2 flow-control windows per stream and for
//!   the connection (stream 0) so the timeline can show how much the sender
//!   may still transmit. The real client owns flow control; nothing here
//!   gates I/O.
//! - [`SerializeCredit`] caps how many DATA bytes are rendered to text over
//!   the connection lifetime, bounding memory held by the event consumer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Per-stream and connection-level window mirror for one sending direction.
#[derive(Debug)]
pub struct StreamCredits {
    inner: Mutex<CreditsInner>,
}

#[derive(Debug)]
struct CreditsInner {
    /// Window a newly seen stream starts with.
    initial_window: i64,
    /// Keyed by stream id; 0 is the connection.
    windows: HashMap<u32, i64>,
}

impl CreditsInner {
    fn window(&mut self, stream_id: u32, connection_initial: i64) -> &mut i64 {
        let initial = if stream_id == 0 {
            connection_initial
        } else {
            self.initial_window
        };
        self.windows.entry(stream_id).or_insert(initial)
    }
}

impl StreamCredits {
    /// Create a ledger where every window starts at `initial_window`.
    pub fn new(initial_window: u32) -> Self {
        let mut windows = HashMap::new();
        windows.insert(0, initial_window as i64);
        Self {
            inner: Mutex::new(CreditsInner {
                initial_window: initial_window as i64,
                windows,
            }),
        }
    }

    /// Record a DATA frame of `len` flow-controlled bytes on `stream_id`.
    ///
    /// Returns the remaining `(stream, connection)` windows. Windows may go
    /// negative when the observed peer overruns them.
    pub fn consume(&self, stream_id: u32, len: u32) -> (i64, i64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let initial = inner.initial_window;
        let connection = {
            let window = inner.window(0, initial);
            *window -= len as i64;
            *window
        };
        if stream_id == 0 {
            return (connection, connection);
        }
        let stream = inner.window(stream_id, initial);
        *stream -= len as i64;
        (*stream, connection)
    }

    /// Start tracking `stream_id` at the initial window, if not tracked yet.
    pub fn open(&self, stream_id: u32) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let initial = inner.initial_window;
        inner.window(stream_id, initial);
    }

    /// Record a WINDOW_UPDATE, returning the new window.
    ///
    /// Updates for a stream that is not tracked (never opened, or already
    /// forgotten) do not create an entry; the initial window is returned.
    pub fn replenish(&self, stream_id: u32, increment: u32) -> i64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let initial = inner.initial_window;
        match inner.windows.get_mut(&stream_id) {
            Some(window) => {
                *window += increment as i64;
                *window
            }
            None => initial,
        }
    }

    /// Apply a SETTINGS_INITIAL_WINDOW_SIZE change (RFC 9113 Section 6.9.2):
    /// every stream window shifts by the delta, the connection window does not.
    pub fn apply_initial_window(&self, new_initial: u32) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let delta = new_initial as i64 - inner.initial_window;
        inner.initial_window = new_initial as i64;
        for (stream_id, window) in inner.windows.iter_mut() {
            if *stream_id != 0 {
                *window += delta;
            }
        }
    }

    /// Remaining window for a stream (the initial window if unseen).
    pub fn remaining(&self, stream_id: u32) -> i64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.windows.get(&stream_id) {
            Some(window) => *window,
            None => inner.initial_window,
        }
    }

    /// Number of streams with a window entry, not counting the connection.
    pub fn tracked_streams(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.windows.len().saturating_sub(1)
    }

    /// Drop the entry for a finished stream.
    pub fn forget(&self, stream_id: u32) {
        if stream_id == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.windows.remove(&stream_id);
    }
}

/// Budget of DATA bytes that may still be rendered for one direction.
#[derive(Debug)]
pub struct SerializeCredit {
    remaining: AtomicUsize,
    lock: Mutex<()>,
}

impl SerializeCredit {
    pub fn new(limit: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(limit),
            lock: Mutex::new(()),
        }
    }

    /// Take up to `requested` bytes of budget, returning how many were granted.
    ///
    /// The budget is clamped at zero; once exhausted every call grants 0.
    pub fn take(&self, requested: usize) -> usize {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let available = self.remaining.load(Ordering::Acquire);
        let granted = available.min(requested);
        self.remaining.store(available - granted, Ordering::Release);
        granted
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_consume_tracks_stream_and_connection() {
        let credits = StreamCredits::new(65535);
        assert_eq!(credits.consume(1, 1000), (64535, 64535));
        assert_eq!(credits.consume(3, 535), (65000, 64000));
        assert_eq!(credits.remaining(0), 64000);
        assert_eq!(credits.remaining(1), 64535);
        assert_eq!(credits.remaining(7), 65535);
    }

    #[test]
    fn test_replenish() {
        let credits = StreamCredits::new(65535);
        credits.consume(1, 65535);
        assert_eq!(credits.replenish(1, 100), 100);
        assert_eq!(credits.replenish(0, 15663105), 15663105);
    }

    #[test]
    fn test_forgotten_stream_is_not_recreated() {
        let credits = StreamCredits::new(65535);
        credits.open(1);
        credits.consume(3, 10);
        assert_eq!(credits.tracked_streams(), 2);

        credits.forget(1);
        credits.forget(3);
        credits.forget(0);
        assert_eq!(credits.replenish(1, 100), 65535);
        assert_eq!(credits.tracked_streams(), 0);
        assert_eq!(credits.remaining(0), 65525);
    }

    #[test]
    fn test_initial_window_delta_skips_connection() {
        let credits = StreamCredits::new(65535);
        credits.consume(1, 35);
        credits.apply_initial_window(100);
        // 65500 - 65435
        assert_eq!(credits.remaining(1), 65);
        assert_eq!(credits.remaining(0), 65500);
        assert_eq!(credits.remaining(9), 100);
    }

    #[test]
    fn test_window_can_go_negative() {
        let credits = StreamCredits::new(10);
        assert_eq!(credits.consume(1, 25), (-15, -15));
    }

    #[test]
    fn test_serialize_credit_clamps_at_zero() {
        let credit = SerializeCredit::new(10);
        assert_eq!(credit.take(100), 10);
        assert_eq!(credit.remaining(), 0);
        assert!(credit.is_exhausted());
        assert_eq!(credit.take(5), 0);
        assert_eq!(credit.remaining(), 0);
    }

    #[test]
    fn test_serialize_credit_concurrent_takes() {
        let credit = Arc::new(SerializeCredit::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let credit = Arc::clone(&credit);
                std::thread::spawn(move || (0..50).map(|_| credit.take(7)).sum::<usize>())
            })
            .collect();
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1000);
        assert_eq!(credit.remaining(), 0);
    }
}
