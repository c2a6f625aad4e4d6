//! Seeded noise lookup textures.

use std::f32::consts::TAU;

use passchain::gpu::GraphicsContext;
use passchain::{BufferMode, GpuError, Size, Texture2D, TextureFormat};
use rand::prelude::*;

/// Uniformly distributed values in `[0, 1)`.
pub fn random_noise(rng: &mut StdRng, count: usize) -> Vec<f32> {
    (0..count).map(|_| rng.gen::<f32>()).collect()
}

/// Standard normal values (Box-Muller).
pub fn normal_noise(rng: &mut StdRng, count: usize) -> Vec<f32> {
    (0..count)
        .map(|_| {
            let theta = TAU * rng.gen::<f32>();
            // 1 - u lies in (0, 1], keeping the logarithm finite.
            let radius = (-2.0 * (1.0 - rng.gen::<f32>()).ln()).sqrt();
            radius * theta.cos()
        })
        .collect()
}

/// Uploads `values` as a square single-channel float texture.
pub fn noise_texture(
    gpu: &mut dyn GraphicsContext,
    resolution: u32,
    values: &[f32],
) -> Result<Texture2D, GpuError> {
    let mut texture = Texture2D::new(gpu, TextureFormat::R32F, BufferMode::Single)?;
    texture.set_data(
        gpu,
        Size::new(resolution, resolution),
        bytemuck::cast_slice(values),
    );
    Ok(texture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use passchain::HeadlessContext;

    #[test]
    fn random_noise_is_reproducible_and_in_range() {
        let first = random_noise(&mut StdRng::seed_from_u64(7), 256);
        let second = random_noise(&mut StdRng::seed_from_u64(7), 256);
        assert_eq!(first, second);
        assert!(first.iter().all(|value| (0.0..1.0).contains(value)));
    }

    #[test]
    fn normal_noise_is_roughly_standard() {
        let values = normal_noise(&mut StdRng::seed_from_u64(11), 20_000);
        assert!(values.iter().all(|value| value.is_finite()));
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        let variance =
            values.iter().map(|value| (value - mean).powi(2)).sum::<f32>() / values.len() as f32;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((variance - 1.0).abs() < 0.1, "variance {variance}");
    }

    #[test]
    fn noise_texture_holds_the_values() {
        let mut gpu = HeadlessContext::new(Size::new(4, 4));
        let values = [0.25, 0.5, 0.75, 1.0];
        let texture = noise_texture(&mut gpu, 2, &values).expect("noise texture");
        assert_eq!(texture.size(), Size::new(2, 2));
        let texel = gpu.texel(texture.read_handle(), 1, 1).expect("texel");
        assert_eq!(texel[0], 1.0);
    }
}
