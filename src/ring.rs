//! The 512-slot sequence-addressed jitter ring buffer.
//!
//! Rather than a timestamp- or sequence-keyed map, this ring is a fixed
//! array of `NUM_SLOTS` pre-allocated frame slots addressed by `seq mod
//! NUM_SLOTS`. Two cursors, `ab_read` and
//! `ab_write`, track the oldest unread and newest written sequence number;
//! both live behind one mutex, while each slot's "is this frame decoded
//! yet" flag is a separate lock-free `AtomicBool` so the writer can publish
//! a frame without holding the cursor lock across the (comparatively
//! expensive) codec call.
//!
//! Only one task ever writes (the RTP ingestor) and only one task ever
//! reads (the consumer), so the unsynchronized slot payload access below is
//! sound the same way a single-producer/single-consumer ring is: the
//! `AtomicBool` with Release/Acquire ordering is the handoff.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::sequence::{seq_diff, seq_order, slot_index};

/// Number of addressable ring slots.
pub const NUM_SLOTS: usize = 512;

/// Fill level (in frames) at which the ring stops buffering and lets
/// playback start.
pub const START_FILL: u16 = 282;

struct Slot {
    ready: AtomicBool,
    data: UnsafeCell<Vec<i16>>,
}

// SAFETY: a slot's `data` is written only by the ingestor (via `mark_ready`,
// before the Release store to `ready`) and read only by the consumer (via
// `take_slot`, after observing `ready` with Acquire) so there is never
// concurrent access to the same slot from two threads.
unsafe impl Sync for Slot {}

impl Slot {
    fn empty() -> Self {
        Self {
            ready: AtomicBool::new(false),
            data: UnsafeCell::new(Vec::new()),
        }
    }
}

struct Cursors {
    ab_read: u16,
    ab_write: u16,
    synced: bool,
    buffering: bool,
}

/// Outcome of handing a newly-arrived sequence number to the ring.
#[derive(Debug, Clone, Copy)]
pub enum Accept {
    /// The ring is shutting down; the caller should stop ingesting.
    Closed,
    /// `seq` was too far behind `ab_read` to be useful and was dropped.
    Dropped,
    /// `seq` was accepted into `slot`. If `resend` is set, every sequence
    /// number in the (inclusive) range was skipped over and should be
    /// requested from the sender.
    Slot {
        /// Ring slot index the caller should decode the frame into.
        index: usize,
        /// Inclusive range of sequence numbers to request a resend for,
        /// because accepting `seq` jumped `ab_write` forward over them.
        resend: Option<(u16, u16)>,
    },
}

/// Outcome of pulling the next frame for playback.
#[derive(Debug, Clone, Copy)]
pub enum Frame {
    /// The ring is shutting down.
    Stopped,
    /// A decoded frame is ready at this slot index. The fill level is the
    /// ring occupancy observed at the moment this frame was taken, handed
    /// back so the rate controller doesn't need a second lock acquisition.
    Ready(usize, i16),
    /// The expected frame never arrived (lost packet); the consumer should
    /// conceal it (typically with silence) rather than stall.
    Concealed(i16),
}

/// The fixed-size jitter ring shared between the ingestor and the consumer.
pub struct Ring {
    slots: Box<[Slot]>,
    cursors: Mutex<Cursors>,
    closed: AtomicBool,
    muted: AtomicBool,
    notify: Notify,
    frame_len: usize,
    start_fill: i16,
}

impl Ring {
    /// Creates a ring sized for `frame_len` samples (`frame_size *
    /// channels`) per slot, buffering until `start_fill` frames have
    /// accumulated before releasing the first one to the consumer.
    #[must_use]
    pub fn new(frame_len: usize, start_fill: i16) -> Arc<Self> {
        let slots = (0..NUM_SLOTS).map(|_| Slot::empty()).collect();
        Arc::new(Self {
            slots,
            cursors: Mutex::new(Cursors {
                ab_read: 0,
                ab_write: 0,
                synced: false,
                buffering: false,
            }),
            closed: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            notify: Notify::new(),
            frame_len,
            start_fill,
        })
    }

    /// Sets or clears the global mute flag the ingestor consults before
    /// accepting a datagram (see [`Ring::is_muted`]). A single-word atomic,
    /// mutated by the control surface and read from the ingestor's hot path
    /// without taking the cursor lock.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    /// Whether the ingestor should currently drop incoming datagrams
    /// silently rather than accepting them into the ring.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Samples expected per slot.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Decides what to do with an arriving packet's sequence number. Does
    /// not touch slot data; call [`Ring::publish`] afterwards to store the
    /// decoded frame and [`Ring::after_publish`] to check for a buffering
    /// transition and a last-chance resend.
    pub async fn accept(&self, seq: u16) -> Accept {
        if self.closed.load(Ordering::Acquire) {
            return Accept::Closed;
        }
        let mut cursors = self.cursors.lock().await;
        let resend = if !cursors.synced {
            cursors.ab_write = seq;
            cursors.ab_read = seq;
            cursors.synced = true;
            cursors.buffering = true;
            tracing::info!(seq, "ring syncing to first packet");
            None
        } else if seq == cursors.ab_write.wrapping_add(1) {
            cursors.ab_write = seq;
            None
        } else if seq_order(cursors.ab_write, seq) {
            let gap = (cursors.ab_write.wrapping_add(1), seq.wrapping_sub(1));
            cursors.ab_write = seq;
            Some(gap)
        } else if seq_order(cursors.ab_read, seq) {
            None
        } else {
            tracing::debug!(seq, ab_read = cursors.ab_read, "dropping too-late packet");
            return Accept::Dropped;
        };
        Accept::Slot {
            index: slot_index(seq, NUM_SLOTS),
            resend,
        }
    }

    /// Stores a decoded frame into `index` and publishes it to the
    /// consumer. Must only be called by the ingestor, and only once per
    /// accepted packet.
    pub fn publish(&self, index: usize, samples: Vec<i16>) {
        let slot = &self.slots[index];
        // SAFETY: single writer, and the slot is not yet marked ready so no
        // reader can be looking at `data` concurrently.
        unsafe {
            *slot.data.get() = samples;
        }
        slot.ready.store(true, Ordering::Release);
    }

    /// Checks whether buffering has just completed (waking the consumer)
    /// and whether the frame 10 slots ahead of `ab_read` is still missing
    /// (a last-chance resend opportunity) as post-insert housekeeping.
    pub async fn after_publish(&self) -> Option<u16> {
        let mut cursors = self.cursors.lock().await;
        let fill = seq_diff(cursors.ab_read, cursors.ab_write) + 1;
        if cursors.buffering && fill >= self.start_fill {
            cursors.buffering = false;
            tracing::info!(fill, "buffering complete, waking consumer");
            self.notify.notify_waiters();
        }
        let ab_read = cursors.ab_read;
        drop(cursors);

        let lookahead = ab_read.wrapping_add(10);
        let idx = slot_index(lookahead, NUM_SLOTS);
        if self.slots[idx].ready.load(Ordering::Acquire) {
            None
        } else {
            Some(lookahead)
        }
    }

    /// Pulls the next frame for playback, blocking (asynchronously) while
    /// the ring is still buffering or underrunning. Returns
    /// [`Frame::Concealed`] rather than stalling when the expected frame
    /// never arrived, so the caller can fill in silence and keep the
    /// playback clock moving.
    ///
    /// The second element of the returned pair is `true` exactly when this
    /// call just resumed playback after waiting (initial sync, an
    /// underrun, or a flush): the caller must treat buffer-fill history
    /// from before the wait as stale and reset its rate controller on
    /// recovery.
    pub async fn pull(&self) -> (Frame, bool) {
        let mut resuming = false;
        loop {
            let mut cursors = self.cursors.lock().await;
            if self.closed.load(Ordering::Acquire) {
                return (Frame::Stopped, resuming);
            }
            if !cursors.synced {
                drop(cursors);
                resuming = true;
                self.notify.notified().await;
                continue;
            }
            if cursors.buffering {
                drop(cursors);
                resuming = true;
                self.notify.notified().await;
                continue;
            }
            let fill = seq_diff(cursors.ab_read, cursors.ab_write) + 1;
            if fill < 1 {
                // Underrun. Do not advance `ab_read`: re-check the fill
                // level after every wake instead, so a spurious or
                // unrelated notification can never skip a frame.
                cursors.buffering = true;
                drop(cursors);
                resuming = true;
                self.notify.notified().await;
                continue;
            }
            if fill as usize >= NUM_SLOTS {
                // `ab_read` here is the next sequence number to pull (one
                // ahead of the spec's "last consumed" cursor), so landing
                // on the same first-consumed frame as `ab_write -
                // start_fill` takes one more step forward than the raw
                // subtraction.
                cursors.ab_read = cursors.ab_write.wrapping_sub(self.start_fill as u16).wrapping_add(1);
                tracing::warn!(fill, "ring overrun, fast-forwarding");
            }
            let seq = cursors.ab_read;
            cursors.ab_read = cursors.ab_read.wrapping_add(1);
            drop(cursors);

            let idx = slot_index(seq, NUM_SLOTS);
            let was_ready = self.slots[idx].ready.swap(false, Ordering::AcqRel);
            return if was_ready {
                (Frame::Ready(idx, fill), resuming)
            } else {
                tracing::debug!(seq, "concealing missing frame");
                (Frame::Concealed(fill), resuming)
            };
        }
    }

    /// Reads out the samples stored at `index`. Only valid to call on the
    /// slot index [`Ring::pull`] just returned as [`Frame::Ready`], before
    /// any later packet wraps around to reuse that slot.
    #[must_use]
    pub fn take(&self, index: usize) -> Vec<i16> {
        // SAFETY: the consumer only reads a slot after `pull` observed its
        // ready flag with Acquire ordering, which happens-after the
        // ingestor's Release store in `publish`.
        unsafe { (*self.slots[index].data.get()).clone() }
    }

    /// Discards all buffered frames and returns the ring to the
    /// not-yet-synced state, as if freshly created. Used on stream
    /// flush/seek.
    pub async fn flush(&self) {
        let mut cursors = self.cursors.lock().await;
        cursors.synced = false;
        cursors.buffering = false;
        for slot in self.slots.iter() {
            slot.ready.store(false, Ordering::Release);
        }
    }

    /// Signals shutdown and wakes any task blocked in [`Ring::pull`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Current fill level (frames buffered but not yet read), for metrics.
    pub async fn fill(&self) -> i16 {
        let cursors = self.cursors.lock().await;
        if cursors.synced {
            seq_diff(cursors.ab_read, cursors.ab_write) + 1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_packet_syncs_and_sets_cursors() {
        let ring = Ring::new(4, 5);
        let decision = ring.accept(100).await;
        match decision {
            Accept::Slot { index, resend } => {
                assert_eq!(index, 100);
                assert!(resend.is_none());
            }
            other => panic!("expected Slot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sequential_packets_need_no_resend() {
        let ring = Ring::new(4, 5);
        ring.accept(1).await;
        let decision = ring.accept(2).await;
        assert!(matches!(decision, Accept::Slot { resend: None, .. }));
    }

    #[tokio::test]
    async fn gap_triggers_resend_range() {
        let ring = Ring::new(4, 5);
        ring.accept(1).await;
        let decision = ring.accept(5).await;
        match decision {
            Accept::Slot { resend: Some((from, to)), .. } => {
                assert_eq!((from, to), (2, 4));
            }
            other => panic!("expected resend range, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn too_late_packet_is_dropped() {
        let ring = Ring::new(4, 5);
        ring.accept(10).await;
        for s in 11..=15u16 {
            ring.accept(s).await;
        }
        // ab_read is still 10; anything at or before it is too old once
        // ab_write has moved well ahead and ab_read itself has not.
        let decision = ring.accept(5).await;
        assert!(matches!(decision, Accept::Dropped));
    }

    #[tokio::test]
    async fn publish_and_pull_round_trip() {
        let ring = Ring::new(4, 3);
        for s in 1..=5u16 {
            if let Accept::Slot { index, .. } = ring.accept(s).await {
                ring.publish(index, vec![s as i16; 4]);
            }
            ring.after_publish().await;
        }
        let (frame, resuming) = ring.pull().await;
        assert!(resuming, "first pull after buffering should signal a rate-controller reset");
        match frame {
            Frame::Ready(index, _) => assert_eq!(ring.take(index), vec![1i16; 4]),
            other => panic!("expected Ready, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn overrun_snaps_ab_read_to_start_fill_behind_ab_write() {
        let ring = Ring::new(4, 282);
        let start = 1000u16;
        for i in 0..600u16 {
            let seq = start.wrapping_add(i);
            if let Accept::Slot { index, .. } = ring.accept(seq).await {
                ring.publish(index, vec![seq as i16; 4]);
            }
            ring.after_publish().await;
        }
        let (frame, _resuming) = ring.pull().await;
        let idx = match frame {
            Frame::Ready(idx, _) => idx,
            other => panic!("expected Ready, got {other:?}"),
        };
        let expected_seq = start.wrapping_add(600).wrapping_sub(282);
        assert_eq!(ring.take(idx), vec![expected_seq as i16; 4]);
    }

    #[tokio::test]
    async fn close_wakes_blocked_pull() {
        let ring = Ring::new(4, 5);
        ring.close();
        let (frame, _resuming) = ring.pull().await;
        assert!(matches!(frame, Frame::Stopped));
    }

    #[tokio::test]
    async fn pull_stays_pending_until_start_fill_is_reached() {
        let ring = Ring::new(4, 3);
        let mut task = tokio_test::task::spawn(ring.pull());
        tokio_test::assert_pending!(task.poll());

        if let Accept::Slot { index, .. } = ring.accept(1).await {
            ring.publish(index, vec![1i16; 4]);
        }
        ring.after_publish().await;
        tokio_test::assert_pending!(task.poll(), "below start_fill, pull must not resolve");

        for s in 2..=3u16 {
            if let Accept::Slot { index, .. } = ring.accept(s).await {
                ring.publish(index, vec![s as i16; 4]);
            }
            ring.after_publish().await;
        }
        tokio_test::assert_ready!(task.poll());
    }

    #[tokio::test]
    async fn steady_state_pull_does_not_report_resuming() {
        let ring = Ring::new(4, 1);
        for s in 1..=3u16 {
            if let Accept::Slot { index, .. } = ring.accept(s).await {
                ring.publish(index, vec![s as i16; 4]);
            }
            ring.after_publish().await;
        }
        let (_, first_resuming) = ring.pull().await;
        assert!(first_resuming);
        let (_, second_resuming) = ring.pull().await;
        assert!(!second_resuming, "steady-state pulls must not force a controller reset");
    }
}
