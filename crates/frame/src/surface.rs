//! Presentation Surface: the chain of presentable images.
//!
//! The current image index is chosen by the presentation engine and only
//! read here. Presenting hands the current image back and moves to the
//! next one; a surface that changed under the chain is reported as a
//! transient error so the caller can rebuild.

use std::sync::Arc;

use cadence_rhi::{GpuDevice, PresentFlags, RhiError, SwapchainDesc};
use tracing::{debug, info, trace};

use crate::error::{FrameError, FrameResult};

pub struct PresentationSurface<D: GpuDevice> {
    swapchain: D::Swapchain,
    images: Vec<D::Image>,
    device: Arc<D>,
    desc: SwapchainDesc,
}

impl<D: GpuDevice> PresentationSurface<D> {
    /// Builds the image chain for `target`, presented on `queue`.
    ///
    /// # Errors
    ///
    /// [`FrameError::Setup`] for fewer than two images, a zero size, or a
    /// backend failure.
    pub fn create(
        device: Arc<D>,
        queue: &D::Queue,
        target: &D::SurfaceTarget,
        desc: SwapchainDesc,
    ) -> FrameResult<Self> {
        if desc.image_count < 2 {
            return Err(FrameError::Setup {
                stage: "presentation surface",
                source: RhiError::InvalidArgument(format!(
                    "at least 2 presentable images are required (got {})",
                    desc.image_count
                )),
            });
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(FrameError::Setup {
                stage: "presentation surface",
                source: RhiError::InvalidArgument(format!(
                    "surface size must be non-zero (got {}x{})",
                    desc.width, desc.height
                )),
            });
        }

        let swapchain = device
            .create_swapchain(queue, target, &desc)
            .map_err(FrameError::setup("presentation surface"))?;
        let images = device.swapchain_images(&swapchain);

        info!(
            "Presentation surface ready: {} images at {}x{}",
            images.len(),
            desc.width,
            desc.height
        );

        Ok(Self {
            swapchain,
            images,
            device,
            desc,
        })
    }

    /// Index of the image the next frame writes to.
    #[inline]
    pub fn current_image_index(&self) -> u32 {
        self.device.current_image_index(&self.swapchain)
    }

    /// Presents the current image.
    ///
    /// # Errors
    ///
    /// [`FrameError::Transient`] when the surface became invalid; the chain
    /// must be resized before the next frame.
    pub fn present(
        &mut self,
        queue: &D::Queue,
        sync_interval: u32,
        flags: PresentFlags,
    ) -> FrameResult<()> {
        trace!("Presenting image {}", self.current_image_index());
        self.device
            .present(queue, &mut self.swapchain, sync_interval, flags)?;
        Ok(())
    }

    /// Rebuilds the chain at a new size. The GPU must be idle and every
    /// view of the old images released.
    pub fn resize(&mut self, queue: &D::Queue, width: u32, height: u32) -> FrameResult<()> {
        self.images.clear();
        self.device
            .resize_swapchain(queue, &mut self.swapchain, width, height)?;
        self.images = self.device.swapchain_images(&self.swapchain);
        self.desc.width = width;
        self.desc.height = height;
        debug!(
            "Presentation surface resized: {} images at {}x{}",
            self.images.len(),
            width,
            height
        );
        Ok(())
    }

    /// Actual size of the chain's images.
    #[inline]
    pub fn extent(&self) -> (u32, u32) {
        self.device.swapchain_extent(&self.swapchain)
    }

    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn image(&self, index: u32) -> Option<&D::Image> {
        self.images.get(index as usize)
    }

    #[inline]
    pub fn images(&self) -> &[D::Image] {
        &self.images
    }

    /// The last requested chain parameters.
    #[inline]
    pub fn desc(&self) -> &SwapchainDesc {
        &self.desc
    }

    #[inline]
    pub fn swapchain(&self) -> &D::Swapchain {
        &self.swapchain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_rhi::headless::HeadlessGpu;

    fn desc(image_count: u32) -> SwapchainDesc {
        SwapchainDesc {
            width: 320,
            height: 240,
            image_count,
            vsync: true,
        }
    }

    #[test]
    fn rejects_single_image() {
        let gpu = Arc::new(HeadlessGpu::new());
        let queue = gpu.create_queue().unwrap();
        let result = PresentationSurface::create(gpu, &queue, &(), desc(1));
        assert!(matches!(result, Err(FrameError::Setup { .. })));
    }

    #[test]
    fn present_advances_current_image() {
        let gpu = Arc::new(HeadlessGpu::new());
        let queue = gpu.create_queue().unwrap();
        let mut surface = PresentationSurface::create(gpu, &queue, &(), desc(2)).unwrap();

        assert_eq!(surface.current_image_index(), 0);
        surface.present(&queue, 1, PresentFlags::default()).unwrap();
        assert_eq!(surface.current_image_index(), 1);
        surface.present(&queue, 1, PresentFlags::default()).unwrap();
        assert_eq!(surface.current_image_index(), 0);
    }

    #[test]
    fn invalid_surface_is_transient() {
        let gpu = Arc::new(HeadlessGpu::new());
        let queue = gpu.create_queue().unwrap();
        let mut surface = PresentationSurface::create(gpu.clone(), &queue, &(), desc(3)).unwrap();

        gpu.invalidate_surfaces();
        let err = surface.present(&queue, 1, PresentFlags::default()).unwrap_err();
        assert!(matches!(err, FrameError::Transient(RhiError::SurfaceOutOfDate)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn resize_updates_extent() {
        let gpu = Arc::new(HeadlessGpu::new());
        let queue = gpu.create_queue().unwrap();
        let mut surface = PresentationSurface::create(gpu, &queue, &(), desc(3)).unwrap();

        surface.resize(&queue, 640, 480).unwrap();
        assert_eq!(surface.extent(), (640, 480));
        assert_eq!(surface.image_count(), 3);
    }
}
