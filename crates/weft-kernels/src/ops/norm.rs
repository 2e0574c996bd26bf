//! Batch normalization kernel with precomputed statistics.
//!
//! Buffer layout (header padded so data lanes stay 4-byte aligned):
//! ```text
//! [count u16][pad u16][mean f32][variance f32][gamma f32][beta f32][data: count f32]
//! ```
//! Each lane becomes `gamma * (x - mean) / sqrt(variance + eps) + beta`.

use crate::lane::{f32_lanes_mut, read_f32, read_u16, LANE};

/// Header bytes before the data lanes.
pub const BATCH_NORM_HEADER: usize = 20;

const EPS: f32 = 1e-5;

pub fn batch_norm(data: &mut [u8]) {
    if data.len() < BATCH_NORM_HEADER {
        return;
    }
    let count = read_u16(data, 0) as usize;
    let mean = read_f32(data, 4);
    let variance = read_f32(data, 8);
    let gamma = read_f32(data, 12);
    let beta = read_f32(data, 16);

    let need = BATCH_NORM_HEADER + count * LANE;
    if count == 0 || data.len() < need {
        return;
    }

    let inv_std = 1.0 / (variance + EPS).sqrt();
    for x in f32_lanes_mut(&mut data[BATCH_NORM_HEADER..need]) {
        *x = gamma * (*x - mean) * inv_std + beta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lane::{bytes_from_f32, f32_lanes};

    fn build(mean: f32, variance: f32, gamma: f32, beta: f32, values: &[f32]) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&(values.len() as u16).to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        for v in [mean, variance, gamma, beta] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.extend_from_slice(&bytes_from_f32(values));
        data
    }

    #[test]
    fn test_identity_stats() {
        // mean 0, var 1, gamma 1, beta 0 is (nearly) the identity.
        let mut data = build(0.0, 1.0, 1.0, 0.0, &[1.0, -2.0, 0.5]);
        batch_norm(&mut data);
        let out = f32_lanes(&data[BATCH_NORM_HEADER..]);
        for (got, want) in out.iter().zip([1.0f32, -2.0, 0.5]) {
            assert!((got - want).abs() < 1e-4, "{} vs {}", got, want);
        }
    }

    #[test]
    fn test_shift_and_scale() {
        let mut data = build(10.0, 1.0, 2.0, 1.0, &[10.0, 11.0]);
        batch_norm(&mut data);
        let out = f32_lanes(&data[BATCH_NORM_HEADER..]);
        assert!((out[0] - 1.0).abs() < 1e-4); // 2*(10-10)+1
        assert!((out[1] - 3.0).abs() < 1e-3); // 2*(11-10)+1
    }

    #[test]
    fn test_declines_on_short_buffer() {
        let mut data = build(0.0, 1.0, 1.0, 0.0, &[1.0, 2.0]);
        data.truncate(data.len() - 4);
        let before = data.clone();
        batch_norm(&mut data);
        assert_eq!(data, before);
    }
}
