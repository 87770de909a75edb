//! Fixed-point encoding for control input
//!
//! A scalar is sent as `round(value * 2^30)` in a signed 32-bit integer, so
//! values in [0, 1) survive with an error of at most 2^-30. Vectors are three
//! consecutive scalars in x, y, z order. Reading past the end of a quantized
//! sequence yields 0.0, which lets clients omit trailing components.

use crate::math::Vec3;

/// Scale applied before rounding
pub const QUANTIZATION_SCALE: f64 = (1u64 << 30) as f64;

pub fn encode_scalar(value: f64) -> i32 {
    // `as` saturates out-of-range values
    (value * QUANTIZATION_SCALE).round() as i32
}

pub fn decode_scalar(raw: i32) -> f64 {
    raw as f64 / QUANTIZATION_SCALE
}

pub fn encode_vector(value: Vec3) -> [i32; 3] {
    [
        encode_scalar(value.x as f64),
        encode_scalar(value.y as f64),
        encode_scalar(value.z as f64),
    ]
}

/// Cursor over a sequence of quantized components
#[derive(Debug, Clone)]
pub struct QuantizedReader<'a> {
    values: &'a [i32],
    cursor: usize,
}

impl<'a> QuantizedReader<'a> {
    pub fn new(values: &'a [i32]) -> Self {
        Self { values, cursor: 0 }
    }

    /// Next component, or 0.0 once the sequence is exhausted
    pub fn read_scalar(&mut self) -> f64 {
        match self.values.get(self.cursor) {
            Some(raw) => {
                self.cursor += 1;
                decode_scalar(*raw)
            }
            None => 0.0,
        }
    }

    pub fn read_vector(&mut self) -> Vec3 {
        let x = self.read_scalar() as f32;
        let y = self.read_scalar() as f32;
        let z = self.read_scalar() as f32;
        Vec3::new(x, y, z)
    }

    pub fn remaining(&self) -> usize {
        self.values.len().saturating_sub(self.cursor)
    }
}
