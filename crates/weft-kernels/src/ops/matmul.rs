//! In-place matrix multiply kernel.
//!
//! Buffer layout (dimensions little-endian, lanes 4-byte aligned):
//! ```text
//! [m u16][k u16][n u16][pad u16][A: m*k f32][B: k*n f32][C: m*n f32]
//! ```
//! `C = A @ B` is written into the trailing region. A buffer too small for
//! the declared dimensions makes the kernel decline: it returns without
//! mutating anything.

use rayon::prelude::*;

use crate::lane::{f32_lanes_mut, read_u16, LANE};

/// Header bytes before the A matrix. Padded so lanes stay 4-byte aligned.
pub const MATMUL_HEADER: usize = 8;

/// Minimum output rows before the row loop goes parallel.
const MIN_PAR_ROWS: usize = 64;

pub fn matmul(data: &mut [u8]) {
    if data.len() < MATMUL_HEADER {
        return;
    }
    let m = read_u16(data, 0) as usize;
    let k = read_u16(data, 2) as usize;
    let n = read_u16(data, 4) as usize;
    if m == 0 || k == 0 || n == 0 {
        return;
    }

    let a_len = m * k;
    let b_len = k * n;
    let c_len = m * n;
    let need = MATMUL_HEADER + (a_len + b_len + c_len) * LANE;
    if data.len() < need {
        return;
    }

    let lanes = f32_lanes_mut(&mut data[MATMUL_HEADER..need]);
    let (ab, c) = lanes.split_at_mut(a_len + b_len);
    let (a, b) = ab.split_at(a_len);

    if m >= MIN_PAR_ROWS {
        c.par_chunks_mut(n)
            .enumerate()
            .for_each(|(i, row)| mul_row(a, b, row, i, k, n));
    } else {
        for (i, row) in c.chunks_mut(n).enumerate() {
            mul_row(a, b, row, i, k, n);
        }
    }
}

#[inline]
fn mul_row(a: &[f32], b: &[f32], row: &mut [f32], i: usize, k: usize, n: usize) {
    for (j, out) in row.iter_mut().enumerate() {
        let mut acc = 0.0f32;
        for p in 0..k {
            acc += a[i * k + p] * b[p * n + j];
        }
        *out = acc;
    }
}
