use crate::error::GpuError;
use crate::gpu::{GraphicsContext, TextureId};
use crate::types::{BufferMode, FilterMode, FilterTarget, Size, TextureFormat};

/// Index of the other image of a ping-pong pair.
pub(crate) const fn toggled(index: usize) -> usize {
    index ^ 1
}

/// A 2D texture that optionally owns a ping-pong pair of images.
///
/// The read handle is `images[read]`. In double-buffered mode the write
/// handle is the other image, in single-buffered mode both handles are the
/// same image and [`Texture2D::swap`] does nothing.
#[derive(Debug)]
pub struct Texture2D {
    format: TextureFormat,
    mode: BufferMode,
    size: Size,
    images: [TextureId; 2],
    read: usize,
    min_filter: FilterMode,
    mag_filter: FilterMode,
}

impl Texture2D {
    /// Creates the image(s) with nearest filtering and 1×1 storage so a
    /// framebuffer using it is complete before the first resize.
    pub fn new(
        gpu: &mut dyn GraphicsContext,
        format: TextureFormat,
        mode: BufferMode,
    ) -> Result<Self, GpuError> {
        let first = gpu.create_texture()?;
        let second = match mode {
            BufferMode::Single => first,
            BufferMode::Double => match gpu.create_texture() {
                Ok(second) => second,
                Err(err) => {
                    gpu.delete_texture(first);
                    return Err(err);
                }
            },
        };

        let texture = Self {
            format,
            mode,
            size: Size::unit(),
            images: [first, second],
            read: 0,
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
        };
        for &image in texture.image_ids() {
            gpu.set_texture_filter(image, FilterTarget::Min, FilterMode::Nearest);
            gpu.set_texture_filter(image, FilterTarget::Mag, FilterMode::Nearest);
            gpu.allocate_texture(image, format, Size::unit());
        }
        Ok(texture)
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    pub fn is_double_buffered(&self) -> bool {
        self.mode == BufferMode::Double
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn min_filter(&self) -> FilterMode {
        self.min_filter
    }

    pub fn mag_filter(&self) -> FilterMode {
        self.mag_filter
    }

    /// Image sampled by readers this frame.
    pub fn read_handle(&self) -> TextureId {
        self.images[self.read]
    }

    /// Image rendered into this frame.
    pub fn write_handle(&self) -> TextureId {
        match self.mode {
            BufferMode::Single => self.images[self.read],
            BufferMode::Double => self.images[toggled(self.read)],
        }
    }

    /// Exchanges read and write roles.
    pub fn swap(&mut self) {
        if self.mode == BufferMode::Double {
            self.read = toggled(self.read);
        }
    }

    /// Every distinct image owned by the texture.
    pub fn image_ids(&self) -> &[TextureId] {
        &self.images[..self.mode.image_count()]
    }

    /// Reallocates every image. Contents are lost.
    pub fn set_size(&mut self, gpu: &mut dyn GraphicsContext, size: Size) {
        self.size = size;
        for &image in self.image_ids() {
            gpu.allocate_texture(image, self.format, size);
        }
    }

    /// Uploads `data` (tightly packed rows) into every image.
    pub fn set_data(&mut self, gpu: &mut dyn GraphicsContext, size: Size, data: &[u8]) {
        self.size = size;
        for &image in self.image_ids() {
            gpu.upload_texture(image, self.format, size, data);
        }
    }

    pub fn set_min_filter(&mut self, gpu: &mut dyn GraphicsContext, mode: FilterMode) {
        self.min_filter = mode;
        self.apply_filter(gpu, FilterTarget::Min, mode);
    }

    pub fn set_mag_filter(&mut self, gpu: &mut dyn GraphicsContext, mode: FilterMode) {
        self.mag_filter = mode;
        self.apply_filter(gpu, FilterTarget::Mag, mode);
    }

    // Both images of a pair must agree, otherwise the image that becomes the
    // write target after the next swap samples with stale filtering.
    fn apply_filter(&mut self, gpu: &mut dyn GraphicsContext, target: FilterTarget, mode: FilterMode) {
        gpu.set_texture_filter(self.write_handle(), target, mode);
        if self.is_double_buffered() {
            self.swap();
            gpu.set_texture_filter(self.write_handle(), target, mode);
            self.swap();
        }
    }

    pub fn release(self, gpu: &mut dyn GraphicsContext) {
        for &image in self.image_ids() {
            gpu.delete_texture(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessContext;

    fn headless() -> HeadlessContext {
        HeadlessContext::new(Size::new(4, 4))
    }

    #[test]
    fn toggled_is_an_involution() {
        assert_eq!(toggled(0), 1);
        assert_eq!(toggled(toggled(0)), 0);
    }

    #[test]
    fn double_buffered_swap_exchanges_handles() {
        let mut gpu = headless();
        let mut texture = Texture2D::new(&mut gpu, TextureFormat::RGBA, BufferMode::Double)
            .expect("texture");
        let (read, write) = (texture.read_handle(), texture.write_handle());
        assert_ne!(read, write);

        texture.swap();
        assert_eq!(texture.write_handle(), read);
        assert_eq!(texture.read_handle(), write);

        texture.swap();
        assert_eq!(texture.read_handle(), read);
        assert_eq!(texture.write_handle(), write);
    }

    #[test]
    fn single_buffered_swap_is_a_no_op() {
        let mut gpu = headless();
        let mut texture = Texture2D::new(&mut gpu, TextureFormat::RGBA, BufferMode::Single)
            .expect("texture");
        let handle = texture.read_handle();
        assert_eq!(texture.write_handle(), handle);
        texture.swap();
        texture.swap();
        texture.swap();
        assert_eq!(texture.read_handle(), handle);
        assert_eq!(texture.write_handle(), handle);
        assert_eq!(gpu.live_textures(), 1);
    }

    #[test]
    fn starts_at_unit_size_with_nearest_filtering() {
        let mut gpu = headless();
        let texture = Texture2D::new(&mut gpu, TextureFormat::RGBA16F, BufferMode::Double)
            .expect("texture");
        for &image in texture.image_ids() {
            assert_eq!(gpu.texture_size(image), Some(Size::unit()));
            assert_eq!(
                gpu.texture_filters(image),
                Some((FilterMode::Nearest, FilterMode::Nearest))
            );
        }
    }

    #[test]
    fn filters_reach_both_images_after_swaps() {
        let mut gpu = headless();
        let mut texture = Texture2D::new(&mut gpu, TextureFormat::RGBA, BufferMode::Double)
            .expect("texture");
        texture.swap();
        texture.set_min_filter(&mut gpu, FilterMode::Linear);
        texture.set_mag_filter(&mut gpu, FilterMode::Linear);
        let read_before = texture.read_handle();

        for _ in 0..2 {
            texture.swap();
            assert_eq!(
                gpu.texture_filters(texture.write_handle()),
                Some((FilterMode::Linear, FilterMode::Linear))
            );
        }
        assert_eq!(texture.read_handle(), read_before);
    }

    #[test]
    fn resize_and_upload_apply_to_every_image() {
        let mut gpu = headless();
        let mut texture = Texture2D::new(&mut gpu, TextureFormat::R, BufferMode::Double)
            .expect("texture");
        texture.set_size(&mut gpu, Size::new(3, 2));
        for &image in texture.image_ids() {
            assert_eq!(gpu.texture_size(image), Some(Size::new(3, 2)));
        }

        texture.set_data(&mut gpu, Size::new(2, 1), &[0, 255]);
        for &image in texture.image_ids() {
            assert_eq!(gpu.texel(image, 1, 0).map(|texel| texel[0]), Some(1.0));
        }
        assert_eq!(texture.size(), Size::new(2, 1));
    }

    #[test]
    fn allocation_failure_is_reported() {
        let mut gpu = headless();
        gpu.set_fail_allocations(true);
        assert!(matches!(
            Texture2D::new(&mut gpu, TextureFormat::RGBA, BufferMode::Double),
            Err(GpuError::Allocation { .. })
        ));
        assert_eq!(gpu.live_textures(), 0);
    }
}
