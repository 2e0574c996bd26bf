//! Activation kernels.
//!
//! Sigmoid and tanh use the fast rational approximations from the
//! reference kernel catalog rather than `exp`-based definitions; softmax
//! is the numerically-stable max-subtracted form.

use crate::lane::f32_lanes_mut;

/// Rectified linear unit: `max(0, x)`.
pub fn relu(data: &mut [u8]) {
    for x in f32_lanes_mut(data) {
        if *x < 0.0 {
            *x = 0.0;
        }
    }
}

/// Fast sigmoid approximation `x / (1 + |x|)`, sign-split to avoid the
/// abs call.
pub fn sigmoid(data: &mut [u8]) {
    for x in f32_lanes_mut(data) {
        let v = *x;
        *x = if v >= 0.0 { v / (1.0 + v) } else { v / (1.0 - v) };
    }
}

/// Rational tanh approximation `x(27 + x²) / (27 + 9x²)`.
pub fn tanh(data: &mut [u8]) {
    for x in f32_lanes_mut(data) {
        let v = *x;
        let v2 = v * v;
        *x = v * (27.0 + v2) / (27.0 + 9.0 * v2);
    }
}

/// Numerically-stable softmax over the whole buffer.
pub fn softmax(data: &mut [u8]) {
    let lanes = f32_lanes_mut(data);
    if lanes.is_empty() {
        return;
    }

    let max = lanes.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for x in lanes.iter_mut() {
        *x = (*x - max).exp();
        sum += *x;
    }
    let inv = 1.0 / sum;
    for x in lanes.iter_mut() {
        *x *= inv;
    }
}
