//! Low-discrepancy jitter for temporal accumulation.

use glam::Vec2;

/// Terms `skip..skip + count` of the Halton sequence in `base`.
///
/// Bases below 2 have no sequence; `count` zeros are returned instead.
pub fn halton_1d(base: u32, count: usize, skip: usize) -> Vec<f32> {
    if base < 2 {
        return vec![0.0; count];
    }
    let base = u64::from(base);
    let mut numerator: u64 = 0;
    let mut denominator: u64 = 1;
    let mut terms = Vec::with_capacity(count);
    for index in 0..count + skip {
        let diff = denominator - numerator;
        if diff == 1 {
            numerator = 1;
            denominator *= base;
        } else {
            let mut ratio = denominator / base;
            while diff <= ratio {
                ratio /= base;
            }
            numerator = (base + 1) * ratio - diff;
        }
        if index >= skip {
            terms.push(numerator as f32 / denominator as f32);
        }
    }
    terms
}

/// Pairs two 1-D sequences, one per axis.
pub fn halton_2d(base_x: u32, base_y: u32, count: usize, skip: usize) -> Vec<Vec2> {
    halton_1d(base_x, count, skip)
        .into_iter()
        .zip(halton_1d(base_y, count, skip))
        .map(|(x, y)| Vec2::new(x, y))
        .collect()
}

/// NDC jitter for accumulation frame `frame`.
///
/// Frame 0 is never jittered. Later frames use `kernel[frame - 1]` shifted
/// from `[0, 1)` into `(-0.5, 0.5]`.
pub fn jitter_offset(kernel: &[Vec2], frame: u32) -> Vec2 {
    let Some(index) = (frame as usize).checked_sub(1) else {
        return Vec2::ZERO;
    };
    let Some(&sample) = kernel.get(index) else {
        return Vec2::ZERO;
    };
    let wrap = |component: f32| if component > 0.5 { component - 1.0 } else { component };
    Vec2::new(wrap(sample.x), wrap(sample.y))
}

/// Blend weight of accumulation frame `frame`; yields the arithmetic mean of
/// every sample since the last reset.
pub fn accumulation_weight(frame: u32) -> f32 {
    1.0 / (frame as f32 + 1.0)
}
