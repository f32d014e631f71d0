//! Modular (wraparound) comparison of 16-bit RTP sequence numbers.
//!
//! RTP sequence numbers wrap at 2^16. A plain `a < b` comparison breaks at
//! the wrap point, so every ordering decision in the ring buffer goes
//! through [`seq_order`] instead, which treats the numbers as points on a
//! circle and asks "is `b` ahead of `a`, going forward, by less than half
//! the ring".

/// Returns `true` if `b` comes after `a` in sequence-number order, taking
/// wraparound into account. Equivalent to `(b - a) as i16 > 0` in two's
/// complement arithmetic.
#[must_use]
pub fn seq_order(a: u16, b: u16) -> bool {
    let diff = b.wrapping_sub(a) as i16;
    diff > 0
}

/// Signed distance from `a` to `b`, wrapping at 2^16. Positive means `b` is
/// ahead of `a`.
#[must_use]
pub fn seq_diff(a: u16, b: u16) -> i16 {
    b.wrapping_sub(a) as i16
}

/// Index of `seq` into a ring of `len` slots (`len` need not be a power of
/// two, though the engine always uses 512).
#[must_use]
pub fn slot_index(seq: u16, len: usize) -> usize {
    (seq as usize) % len
}
