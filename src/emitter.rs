//! Wire-event emitter and flush scheduler.
//!
//! Observed traffic leaves the transport through two unbounded channels, one
//! per direction, so a slow consumer can never stall socket I/O.
//!
//! Outbound payloads are queued and released by [`WireEmitter::flush`] as one
//! batch sharing a single flush instant: several small frames written by the
//! codec usually leave in one socket write, and the timeline should show them
//! together in their original order. Inbound payloads are emitted as soon as
//! they are reconstructed.
//!
//! Instants are clamped per direction so that the consumer always sees
//! non-decreasing timestamps, even when the wall clock steps backwards.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::payload::{Direction, RawPayload};

/// Receiving side handed to the timeline consumer.
#[derive(Debug)]
pub struct WireEvents {
    pub outgoing: UnboundedReceiver<RawPayload>,
    pub incoming: UnboundedReceiver<RawPayload>,
}

#[derive(Debug, Default)]
struct OutboundQueue {
    pending: VecDeque<RawPayload>,
    last_instant: Option<DateTime<Utc>>,
    /// Only set under the queue lock, together with the final drain.
    closed: bool,
}

/// Emits observed payloads for one connection.
#[derive(Debug)]
pub struct WireEmitter {
    outgoing: UnboundedSender<RawPayload>,
    incoming: UnboundedSender<RawPayload>,
    outbound: Mutex<OutboundQueue>,
    inbound_last: Mutex<Option<DateTime<Utc>>>,
    closed: AtomicBool,
}

/// Never go back in time relative to the previous instant on a direction.
fn clamp(last: &mut Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> DateTime<Utc> {
    let instant = match *last {
        Some(previous) if previous > candidate => previous,
        _ => candidate,
    };
    *last = Some(instant);
    instant
}

impl WireEmitter {
    pub fn new() -> (Self, WireEvents) {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let emitter = Self {
            outgoing: outgoing_tx,
            incoming: incoming_tx,
            outbound: Mutex::new(OutboundQueue::default()),
            inbound_last: Mutex::new(None),
            closed: AtomicBool::new(false),
        };
        (
            emitter,
            WireEvents {
                outgoing: outgoing_rx,
                incoming: incoming_rx,
            },
        )
    }

    /// Route a payload by direction: outbound is queued, inbound is emitted.
    pub fn emit(&self, direction: Direction, payload: RawPayload) {
        match direction {
            Direction::Outbound => self.enqueue(payload),
            Direction::Inbound => self.emit_inbound(payload),
        }
    }

    /// Queue an outbound payload until the next [`flush`](Self::flush).
    pub fn enqueue(&self, payload: RawPayload) {
        let mut queue = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        if queue.closed {
            return;
        }
        queue.pending.push_back(payload);
    }

    /// Emit an inbound payload immediately, keeping its observation instant
    /// unless that would go backwards.
    pub fn emit_inbound(&self, payload: RawPayload) {
        if self.is_closed() {
            return;
        }
        let mut last = self.inbound_last.lock().unwrap_or_else(|e| e.into_inner());
        let instant = clamp(&mut last, payload.instant());
        if self.incoming.send(payload.with_instant(instant)).is_err() {
            tracing::debug!("Incoming wire event consumer dropped");
        }
    }

    /// Release every queued outbound payload with one shared instant.
    ///
    /// Returns the batch size; an empty queue is a no-op. The queue lock is
    /// held for the whole drain, so payloads enqueued concurrently land either
    /// in this batch or in the next one.
    pub fn flush(&self) -> usize {
        let mut queue = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        self.drain(&mut queue)
    }

    fn drain(&self, queue: &mut OutboundQueue) -> usize {
        if queue.pending.is_empty() {
            return 0;
        }
        let instant = clamp(&mut queue.last_instant, Utc::now());
        let batch = queue.pending.len();
        let mut consumer_gone = false;
        while let Some(payload) = queue.pending.pop_front() {
            if !consumer_gone && self.outgoing.send(payload.with_instant(instant)).is_err() {
                consumer_gone = true;
            }
        }
        if consumer_gone {
            tracing::debug!("Outgoing wire event consumer dropped, discarded {} payloads", batch);
        } else {
            tracing::trace!("Flushed {} outgoing payloads", batch);
        }
        batch
    }

    /// Number of outbound payloads waiting for a flush.
    pub fn pending(&self) -> usize {
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pending
            .len()
    }

    /// Flush what is queued, then stop emitting. Idempotent.
    pub fn close(&self) {
        let mut queue = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        if queue.closed {
            return;
        }
        self.drain(&mut queue);
        queue.closed = true;
        self.closed.store(true, Ordering::Release);
        tracing::debug!("Wire emitter closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
