//! # Audio Ring Buffer
//!
//! A bounded byte buffer sitting between inbound network reads and pipeline
//! consumption. The WebSocket read loop must never stall behind a slow
//! consumer, so the write side drops overflow instead of blocking, and the
//! read side returns whatever is available instead of waiting.
//!
//! ## Key Properties:
//! - **Non-blocking writes**: data beyond the remaining capacity is truncated
//! - **Non-blocking reads**: an empty buffer yields an empty result
//! - **Coalesced wakeup**: each successful write fires a single-slot notify;
//!   repeated writes before the consumer wakes collapse into one signal
//! - **Idempotent close**: once closed, writes are no-ops and waiters wake

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::audio::{BYTES_PER_SAMPLE, SAMPLE_RATE};

/// Default capacity: 30 seconds of 16kHz 16-bit mono audio.
pub const DEFAULT_CAPACITY: usize = (SAMPLE_RATE * BYTES_PER_SAMPLE) as usize * 30;

struct RingState {
    data: VecDeque<u8>,
    closed: bool,
}

/// Bounded audio byte buffer shared by one producer/consumer pair.
///
/// ## Thread Safety:
/// All state lives behind a Mutex held only for short copy operations; the
/// wake signal is a separate `Notify` so a consumer can await new data
/// without holding the lock.
pub struct AudioRingBuffer {
    state: Mutex<RingState>,
    capacity: usize,
    notify: Arc<Notify>,
}

impl AudioRingBuffer {
    /// Create a buffer holding at most `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RingState {
                data: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Append up to the remaining capacity from `chunk`, returning the number
    /// of bytes accepted. Returns 0 when the buffer is full or closed; the
    /// remainder of the chunk is dropped, never queued.
    pub fn write(&self, chunk: &[u8]) -> usize {
        let accepted = {
            let mut state = self.state.lock().unwrap();

            if state.closed {
                return 0;
            }

            let available = self.capacity.saturating_sub(state.data.len());
            let to_write = chunk.len().min(available);
            state.data.extend(&chunk[..to_write]);
            to_write
        };

        if accepted > 0 {
            // Single-slot semantics: notify_one stores at most one permit,
            // so bursts of writes coalesce into one wakeup.
            self.notify.notify_one();
        }

        accepted
    }

    /// Remove and return up to `max` bytes in FIFO order. Returns an empty
    /// vector when no data is buffered; never blocks, never errors.
    pub fn read(&self, max: usize) -> Vec<u8> {
        let mut state = self.state.lock().unwrap();
        let to_read = max.min(state.data.len());
        state.data.drain(..to_read).collect()
    }

    /// Number of bytes currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake handle for the consumer side. Await `notified()` on it to sleep
    /// until the next successful write or until close.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.notify)
    }

    /// Mark the buffer closed and wake any waiter. Idempotent; subsequent
    /// writes are no-ops, reads continue to drain what is left.
    pub fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

impl Default for AudioRingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read_fifo() {
        let buf = AudioRingBuffer::new(16);
        assert_eq!(buf.write(&[1, 2, 3, 4]), 4);
        assert_eq!(buf.write(&[5, 6]), 2);
        assert_eq!(buf.read(3), vec![1, 2, 3]);
        assert_eq!(buf.read(10), vec![4, 5, 6]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overflow_is_truncated_not_queued() {
        let buf = AudioRingBuffer::new(8);
        assert_eq!(buf.write(&[0; 6]), 6);
        // Only 2 bytes of capacity remain; the rest of the chunk is dropped.
        assert_eq!(buf.write(&[1, 2, 3, 4]), 2);
        assert_eq!(buf.write(&[9]), 0);
        assert_eq!(buf.len(), 8);
        // FIFO retention: exactly the first `capacity` bytes survive.
        assert_eq!(buf.read(100), vec![0, 0, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn test_read_from_empty_never_blocks() {
        let buf = AudioRingBuffer::new(8);
        assert_eq!(buf.read(4), Vec::<u8>::new());
        buf.close();
        assert_eq!(buf.read(4), Vec::<u8>::new());
    }

    #[test]
    fn test_close_is_idempotent_and_stops_writes() {
        let buf = AudioRingBuffer::new(8);
        assert_eq!(buf.write(&[1, 2]), 2);
        buf.close();
        buf.close();
        assert!(buf.is_closed());
        assert_eq!(buf.write(&[3, 4]), 0);
        // Data written before close is still drainable.
        assert_eq!(buf.read(8), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_write_wakes_waiter() {
        let buf = Arc::new(AudioRingBuffer::new(64));
        let wake = buf.wake_handle();
        let notified = wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        assert_eq!(buf.write(&[1, 2, 3]), 3);
        // Must complete without a writer on the other side racing us.
        tokio::time::timeout(std::time::Duration::from_secs(1), notified)
            .await
            .expect("waiter was not woken by write");
    }

    #[tokio::test]
    async fn test_close_wakes_waiter() {
        let buf = Arc::new(AudioRingBuffer::new(64));
        let wake = buf.wake_handle();
        let notified = wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        buf.close();
        tokio::time::timeout(std::time::Duration::from_secs(1), notified)
            .await
            .expect("waiter was not woken by close");
    }
}
