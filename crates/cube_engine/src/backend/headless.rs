//! Headless back-end: render one frame and write it to a PNG file

use std::path::PathBuf;

use ash::vk;

use super::{png, AcquireResult, BackendResult, FrameCycle, PresentResult};
use crate::core::config::CubeConfig;
use crate::render::renderer::Renderer;
use crate::render::vulkan::{ExtensionRequest, GpuContext, HostImage};

/// Attachment format of the host-visible image
pub const FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

/// Single linear image read back after the first frame
pub struct HeadlessBackend {
    renderer: Renderer,
    image: HostImage,
    context: GpuContext,
    output: PathBuf,
    extent: vk::Extent2D,
    written: bool,
}

impl HeadlessBackend {
    /// Create the context, the host-visible image and the renderer
    pub fn new(config: &CubeConfig) -> BackendResult<Self> {
        let context = GpuContext::new(&ExtensionRequest::none())?;
        let extent = vk::Extent2D {
            width: config.width,
            height: config.height,
        };

        let image = HostImage::new(&context, FORMAT, extent)?;
        let mut renderer = Renderer::new(
            &context,
            FORMAT,
            extent,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            &config.shaders,
            super::frame_clock(config),
        )?;
        renderer.set_images(&context, &[image.handle()], extent)?;

        Ok(Self {
            renderer,
            image,
            context,
            output: config.output.clone(),
            extent,
            written: false,
        })
    }
}

impl FrameCycle for HeadlessBackend {
    fn acquire(&mut self) -> BackendResult<AcquireResult> {
        Ok(if self.written {
            AcquireResult::Quit
        } else {
            AcquireResult::Image(0)
        })
    }

    fn render(&mut self, index: u32) -> BackendResult<()> {
        self.renderer.render_frame(&self.context, index, None)?;
        Ok(())
    }

    fn present(&mut self, _index: u32) -> BackendResult<PresentResult> {
        self.context.wait_idle()?;
        let pixels = self.image.read_pixels()?;

        eprintln!("writing first frame to {}", self.output.display());
        png::write_bgrx(&self.output, self.extent.width, self.extent.height, &pixels)?;

        self.written = true;
        Ok(PresentResult::Presented)
    }

    fn resize(&mut self) -> BackendResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::render::cube::{projected_bounds, UniformBlock, CLEAR_COLOR};
    use crate::render::vulkan::context::{built_shaders, no_gpu};

    /// Linear channel value as an sRGB attachment stores it
    fn srgb_byte(linear: f32) -> u8 {
        let encoded = if linear <= 0.003_130_8 {
            linear * 12.92
        } else {
            1.055 * linear.powf(1.0 / 2.4) - 0.055
        };
        (encoded * 255.0).round() as u8
    }

    #[test]
    fn test_first_frame_written_to_png() {
        let Some(shaders) = built_shaders() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let config = CubeConfig {
            output: dir.path().join("cube.png"),
            fixed_tick: Some(0),
            shaders,
            ..CubeConfig::default()
        };

        let mut backend = match HeadlessBackend::new(&config) {
            Ok(backend) => backend,
            Err(BackendError::Vulkan(e)) if no_gpu(&e) => return,
            Err(e) => panic!("headless init failed: {}", e),
        };
        assert_eq!(crate::driver::run_frames(&mut backend).unwrap(), 1);
        drop(backend);

        let (width, height) = (config.width, config.height);
        let png = image::open(&config.output).unwrap().to_rgba8();
        assert_eq!(png.dimensions(), (width, height));
        assert_eq!(png.as_raw().len(), (width * 4 * height) as usize);

        let clear = *png.get_pixel(0, 0);
        let expected = srgb_byte(CLEAR_COLOR[0]);
        for channel in 0..3 {
            assert!(clear[channel].abs_diff(expected) <= 1, "clear pixel {:?}", clear);
        }
        assert_eq!(clear[3], 255);

        // Rendered silhouette stays inside the analytic projection of the corners
        let [min_x, min_y, max_x, max_y] =
            projected_bounds(&UniformBlock::at_tick(0, width, height), width, height);
        let mut covered = 0usize;
        for (x, y, pixel) in png.enumerate_pixels() {
            if *pixel != clear {
                covered += 1;
                assert!((x as f32) >= min_x.floor() - 1.0 && (x as f32) <= max_x.ceil() + 1.0);
                assert!((y as f32) >= min_y.floor() - 1.0 && (y as f32) <= max_y.ceil() + 1.0);
            }
        }
        assert!(covered > 0);
    }

    #[test]
    fn test_backend_quits_after_one_frame() {
        let Some(shaders) = built_shaders() else {
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let config = CubeConfig {
            output: dir.path().join("again.png"),
            fixed_tick: Some(0),
            shaders,
            ..CubeConfig::default()
        };

        let mut backend = match HeadlessBackend::new(&config) {
            Ok(backend) => backend,
            Err(BackendError::Vulkan(e)) if no_gpu(&e) => return,
            Err(e) => panic!("headless init failed: {}", e),
        };
        assert_eq!(backend.acquire().unwrap(), AcquireResult::Image(0));
        backend.render(0).unwrap();
        assert_eq!(backend.present(0).unwrap(), PresentResult::Presented);
        assert_eq!(backend.acquire().unwrap(), AcquireResult::Quit);
        assert!(config.output.exists());
    }
}
