//! Frame emission: pulls decoded frames from the ring, applies the rate
//! controller's correction by probabilistically stuffing (inserting or
//! dropping) one stereo sample per frame, then applies dithered volume.
//!
//! This is deliberately not a true sample-rate converter (no polyphase
//! filtering, no FFT): RAOP's corrections are small enough (a few hundred
//! parts per million) that splicing at most one sample per frame, at a
//! random position, is inaudible and far cheaper than real resampling.

use std::sync::Arc;

use rand::RngCore;

use crate::rate_controller::RateController;
use crate::ring::{Frame, Ring};
use crate::volume::Volume;

/// Probability that at least one sample should be stuffed (inserted or
/// dropped) this frame, treating each of the `frame_size` samples as
/// independently having `|rate - 1|` chance of needing a nudge:
/// `p = 1 - (1 - |rate - 1|) ^ frame_size`.
#[must_use]
pub fn stuffing_probability(rate: f64, frame_size: usize) -> f64 {
    let deviation = (rate - 1.0).abs().min(1.0);
    1.0 - (1.0 - deviation).powi(frame_size as i32)
}

/// Result of pulling and processing the next frame.
#[derive(Debug)]
pub enum ConsumedFrame {
    /// The session has been closed.
    Stopped,
    /// Interleaved PCM samples ready for output. The sample count is
    /// `channels * frame_size` on the common path, `channels * (frame_size
    /// + 1)` when a sample was stuffed in, or `channels * (frame_size - 1)`
    /// when one was dropped.
    Frame(Vec<i16>),
}

/// Turns ring frames into a steady stream of volume-scaled, rate-corrected
/// PCM ready for an audio sink.
pub struct Consumer {
    ring: Arc<Ring>,
    rate_controller: RateController,
    volume: Volume,
    channels: usize,
    frame_size: usize,
}

impl Consumer {
    /// Builds a consumer for a ring carrying `channels`-channel audio at
    /// `frame_size` samples per channel per packet. The rate controller's
    /// own `desired_fill` setpoint is learned from the first 1000 pulls
    /// rather than supplied up front; see [`RateController::new`].
    #[must_use]
    pub fn new(ring: Arc<Ring>, channels: usize, frame_size: usize, initial_db: f64) -> Self {
        Self {
            ring,
            rate_controller: RateController::new(),
            volume: Volume::from_db(initial_db),
            channels,
            frame_size,
        }
    }

    /// Sets output gain in decibels.
    pub fn set_volume_db(&mut self, db: f64) {
        self.volume.set_db(db);
    }

    /// Mutes output.
    pub fn mute(&mut self) {
        self.volume.mute();
    }

    /// Clears a previous [`Consumer::mute`].
    pub fn unmute(&mut self) {
        self.volume.unmute();
    }

    /// Pulls and processes the next frame, looping internally over ring
    /// "gap ticks" (underrun wakeups that produced no data) until either a
    /// real frame is available or the ring is closed.
    pub async fn next_frame(&mut self, rng: &mut impl RngCore) -> ConsumedFrame {
        let (frame, resuming) = self.ring.pull().await;
        if resuming {
            // Buffer-fill history from before a resync (initial sync,
            // underrun, or flush) says nothing about the stream's new
            // operating point, so the learned setpoint and filter history
            // must start over.
            self.rate_controller.reset();
        }
        let (samples, fill) = match frame {
            Frame::Stopped => return ConsumedFrame::Stopped,
            Frame::Ready(idx, fill) => (self.ring.take(idx), fill),
            Frame::Concealed(fill) => (vec![0i16; self.channels * self.frame_size], fill),
        };

        let rate = self.rate_controller.update(fill);
        let mut stuffed = self.stuff(samples, rate, rng);
        self.volume.apply_frame(&mut stuffed, rng);
        ConsumedFrame::Frame(stuffed)
    }

    /// Probabilistically inserts or drops one stereo sample, with
    /// probability from [`stuffing_probability`]. An inserted sample is the
    /// linear average of its two neighbors; a dropped sample is simply
    /// skipped.
    fn stuff(&self, samples: Vec<i16>, rate: f64, rng: &mut impl RngCore) -> Vec<i16> {
        debug_assert_eq!(samples.len(), self.channels * self.frame_size);
        let p_stuff = stuffing_probability(rate, self.frame_size);

        if rng.next_u32() as f64 / f64::from(u32::MAX) >= p_stuff || self.frame_size < 2 {
            return samples;
        }

        // Splice point strictly inside the frame, leaving a neighbor on
        // both sides for interpolation.
        let splice_frame = 1 + (rng.next_u32() as usize) % (self.frame_size - 1);
        let splice = splice_frame * self.channels;

        if rate > 1.0 {
            // Buffer is running ahead of the sender: drop a sample to slow
            // consumption down.
            let mut out = Vec::with_capacity(samples.len() - self.channels);
            out.extend_from_slice(&samples[..splice]);
            out.extend_from_slice(&samples[splice + self.channels..]);
            out
        } else {
            // Buffer is falling behind: insert an interpolated sample to
            // speed consumption up.
            let mut out = Vec::with_capacity(samples.len() + self.channels);
            out.extend_from_slice(&samples[..splice]);
            for ch in 0..self.channels {
                let before = i32::from(samples[splice - self.channels + ch]);
                let after = i32::from(samples[splice + ch]);
                out.push(((before + after) / 2) as i16);
            }
            out.extend_from_slice(&samples[splice..]);
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn samples(channels: usize, frame_size: usize) -> Vec<i16> {
        (0..channels * frame_size).map(|i| i as i16).collect()
    }

    #[tokio::test]
    async fn stopped_ring_yields_stopped_frame() {
        let ring = Ring::new(8, 1);
        ring.close();
        let mut consumer = Consumer::new(ring, 2, 4, 0.0);
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(matches!(consumer.next_frame(&mut rng).await, ConsumedFrame::Stopped));
    }

    #[test]
    fn dropping_a_sample_shrinks_frame_by_one_channel_frame() {
        let ring = Ring::new(8, 1);
        let consumer = Consumer::new(ring, 2, 4, 0.0);
        let mut rng = SmallRng::seed_from_u64(42);
        let input = samples(2, 4);
        // Force p_stuff = 1 by using an extreme rate.
        let out = consumer.stuff(input.clone(), 2.0, &mut rng);
        assert_eq!(out.len(), input.len() - 2);
    }

    #[test]
    fn inserting_a_sample_grows_frame_by_one_channel_frame() {
        let ring = Ring::new(8, 1);
        let consumer = Consumer::new(ring, 2, 4, 0.0);
        let mut rng = SmallRng::seed_from_u64(42);
        let input = samples(2, 4);
        let out = consumer.stuff(input.clone(), 0.0, &mut rng);
        assert_eq!(out.len(), input.len() + 2);
    }

    #[test]
    fn unity_rate_never_stuffs() {
        let ring = Ring::new(8, 1);
        let consumer = Consumer::new(ring, 2, 4, 0.0);
        let mut rng = SmallRng::seed_from_u64(7);
        let input = samples(2, 4);
        let out = consumer.stuff(input.clone(), 1.0, &mut rng);
        assert_eq!(out, input);
    }
}
