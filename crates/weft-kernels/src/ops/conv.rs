//! Valid 1-D convolution kernel.
//!
//! Buffer layout:
//! ```text
//! [input_len u16][filter_len u16][input: input_len f32][filter: filter_len f32]
//! ```
//! The `input_len - filter_len + 1` outputs overwrite the head of the input
//! region. The forward scan makes the overwrite safe: output `i` reads
//! inputs `i..i+filter_len`, all at or past the write position.

use crate::lane::{f32_lanes_mut, read_u16, LANE};

/// Header bytes before the input lanes.
pub const CONV1D_HEADER: usize = 4;

pub fn conv1d(data: &mut [u8]) {
    if data.len() < CONV1D_HEADER {
        return;
    }
    let input_len = read_u16(data, 0) as usize;
    let filter_len = read_u16(data, 2) as usize;
    if filter_len == 0 || filter_len > input_len {
        return;
    }

    let need = CONV1D_HEADER + (input_len + filter_len) * LANE;
    if data.len() < need {
        return;
    }

    let lanes = f32_lanes_mut(&mut data[CONV1D_HEADER..need]);
    let (input, filter) = lanes.split_at_mut(input_len);
    let out_len = input_len - filter_len + 1;

    for i in 0..out_len {
        let mut acc = 0.0f32;
        for (j, &w) in filter.iter().enumerate() {
            acc += input[i + j] * w;
        }
        input[i] = acc;
    }
}
