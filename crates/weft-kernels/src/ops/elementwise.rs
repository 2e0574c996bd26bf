//! Element-wise arithmetic kernels.

use crate::lane::f32_lanes_mut;

/// `x -> x*x + x` over every lane.
pub fn sqr_plus_x(data: &mut [u8]) {
    for x in f32_lanes_mut(data) {
        *x = *x * *x + *x;
    }
}

/// Pairwise add with split-half layout: the buffer holds `[a..][b..]` and
/// the result lands in the `a` half. The split falls on an even lane
/// boundary; a leftover middle lane is untouched.
pub fn add(data: &mut [u8]) {
    let lanes = f32_lanes_mut(data);
    let half = lanes.len() / 2;
    let (a, b) = lanes.split_at_mut(half);
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x += *y;
    }
}

/// Pairwise multiply with the same split-half layout as [`add`].
pub fn mul(data: &mut [u8]) {
    let lanes = f32_lanes_mut(data);
    let half = lanes.len() / 2;
    let (a, b) = lanes.split_at_mut(half);
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x *= *y;
    }
}
