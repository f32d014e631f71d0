//! Fixed-point volume scaling with first-order (TPDF) dither.
//!
//! Plain integer multiply-and-shift volume scaling introduces quantization
//! noise correlated with the signal. Dithering with a triangular
//! probability density (the difference of two independent uniform random
//! values) decorrelates that noise from the signal at the cost of a little
//! extra broadband noise, which is the conventional tradeoff for integer
//! PCM volume control.

use rand::RngCore;

/// `65536 * 10^(0.05 * dB)`, i.e. a Q16.16 fixed-point linear gain.
#[must_use]
pub fn fix_volume_for_db(db: f64) -> i32 {
    (65536.0 * 10f64.powf(0.05 * db)).round() as i32
}

/// Output gain in decibels at or below which the stream is muted rather
/// than merely attenuated; the normal range is `[-30.0, 0.0]` with `-30.0`
/// itself already muted.
pub const MUTE_THRESHOLD_DB: f64 = -30.0;

/// Applies a fixed-point gain to a stream of samples, carrying dither state
/// (the previous two random draws) across calls.
#[derive(Debug, Clone)]
pub struct Volume {
    fix_volume: i32,
    rand_a: u32,
    rand_b: u32,
    muted: bool,
}

impl Volume {
    /// Builds a volume control initialized to `db` decibels (0.0 = unity),
    /// muted from the start if `db <= `[`MUTE_THRESHOLD_DB`].
    #[must_use]
    pub fn from_db(db: f64) -> Self {
        Self {
            fix_volume: fix_volume_for_db(db),
            rand_a: 0,
            rand_b: 0,
            muted: db <= MUTE_THRESHOLD_DB,
        }
    }

    /// Updates the gain to `db` decibels. `db <= `[`MUTE_THRESHOLD_DB`]
    /// mutes output, matching the `set_volume` control operation; any other
    /// value both sets `fix_volume` and clears a mute that was previously
    /// asserted this way.
    pub fn set_db(&mut self, db: f64) {
        self.fix_volume = fix_volume_for_db(db);
        self.muted = db <= MUTE_THRESHOLD_DB;
    }

    /// Mutes output unconditionally (independent of the volume-threshold
    /// rule in [`Volume::set_db`]); [`Volume::apply`] returns silence until
    /// [`Volume::unmute`].
    pub fn mute(&mut self) {
        self.muted = true;
    }

    /// Clears a previous [`Volume::mute`] (or threshold-triggered mute from
    /// [`Volume::set_db`]).
    pub fn unmute(&mut self) {
        self.muted = false;
    }

    /// Whether output is currently muted.
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Scales one sample, applying first-order differential TPDF dither
    /// (the difference of this call's fresh random draw and the previous
    /// call's) to decorrelate quantization noise from the signal. Dither is
    /// added only while attenuating (`fix_volume < 0x10000`); at or above
    /// unity gain the plain shifted product is returned. The two dither
    /// taps still advance on every call regardless, so toggling in and out
    /// of attenuation doesn't introduce a discontinuity in the dither
    /// sequence.
    pub fn apply(&mut self, sample: i16, rng: &mut impl RngCore) -> i16 {
        if self.muted {
            return 0;
        }

        self.rand_b = self.rand_a;
        self.rand_a = rng.next_u32() & 0xffff;

        let mut out = i64::from(sample) * i64::from(self.fix_volume);
        if self.fix_volume < 0x1_0000 {
            out += i64::from(self.rand_a);
            out -= i64::from(self.rand_b);
        }
        (out >> 16).clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
    }

    /// Scales a whole interleaved frame in place.
    pub fn apply_frame(&mut self, frame: &mut [i16], rng: &mut impl RngCore) {
        for sample in frame.iter_mut() {
            *sample = self.apply(*sample, rng);
        }
    }
}
