/// `sox/sample.rs` — native sample conversion and peak metering
///
/// The conversions are macros in `sox.h` (no exported symbol), so they are
/// reproduced here bit-for-bit.

use super::ffi::{SoxSample, SOX_SAMPLE_MAX};

/// Number of steps on the level meter scale; silence reads as this value.
pub const METER_STEPS: f64 = 35.0;

/// `1 / (SOX_SAMPLE_MAX + 1)`
const SAMPLE_SCALE: f64 = 1.0 / (SOX_SAMPLE_MAX as f64 + 1.0);

/// `SOX_SAMPLE_TO_FLOAT_32BIT`: rounds to 24-bit resolution and saturates at
/// 1.0. Bumps `clips` when the input is within 64 of full scale.
pub fn sample_to_f32(sample: SoxSample, clips: &mut u64) -> f32 {
    if sample > SOX_SAMPLE_MAX - 64 {
        *clips += 1;
        1.0
    } else {
        (((sample + 64) & !127) as f64 * SAMPLE_SCALE) as f32
    }
}

/// `SOX_SAMPLE_TO_FLOAT_64BIT`. Never clips.
pub fn sample_to_f64(sample: SoxSample) -> f64 {
    sample as f64 * SAMPLE_SCALE
}

/// Meter readings for one interleaved stereo block.
///
/// 0 = full scale, [`METER_STEPS`] = silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Levels {
    pub right: i64,
    pub left: i64,
}

/// Peak-scan `block`, treating even indices as left and odd as right.
///
/// The channel count of the source stream is not consulted.
pub fn levels(block: &[SoxSample]) -> Levels {
    let mut peak_l = 0.0_f64;
    let mut peak_r = 0.0_f64;

    for (i, &s) in block.iter().enumerate() {
        let v = sample_to_f64(s).abs();
        if i & 1 == 1 {
            peak_r = peak_r.max(v);
        } else {
            peak_l = peak_l.max(v);
        }
    }

    Levels {
        right: meter_steps(peak_r),
        left: meter_steps(peak_l),
    }
}

#[inline]
fn meter_steps(peak: f64) -> i64 {
    // Truncating cast, as the value is never negative for peak <= 1.0.
    ((1.0 - peak) * METER_STEPS + 0.5) as i64
}
