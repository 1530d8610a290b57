//! Swapchain management.
//!
//! [`SwapchainPlan`] turns a [`SurfaceDetails`] query into concrete creation
//! parameters using fixed preference orders. [`SwapchainManager`] owns the
//! live [`Swapchain`] and rebuilds it from scratch whenever the surface goes
//! stale.

use crate::context::GpuContext;
use crate::device::QueueRole;
use crate::error::{GpuError, Result, SurfaceError};
use crate::surface::SurfaceDetails;
use ash::vk;

/// Surface formats in order of preference.
pub const PREFERRED_SURFACE_FORMATS: [vk::Format; 2] =
    [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];

/// Images requested above the surface minimum.
pub const EXTRA_IMAGES: u32 = 1;

/// Select the surface format.
///
/// Returns `None` only when `available` is empty.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    PREFERRED_SURFACE_FORMATS
        .iter()
        .find_map(|&preferred| {
            available.iter().copied().find(|f| {
                f.format == preferred && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| available.first().copied())
}

/// Select the present mode.
///
/// With vsync: MAILBOX, then FIFO. Without: MAILBOX, IMMEDIATE, then FIFO.
/// FIFO is always supported by a conforming driver.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    let order: &[vk::PresentModeKHR] = if vsync {
        &[vk::PresentModeKHR::MAILBOX]
    } else {
        &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
    };

    order
        .iter()
        .copied()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Image count: one above the minimum, clamped to `[min, max]`.
///
/// A `max_image_count` of zero means there is no upper bound.
pub fn select_image_count(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> std::result::Result<u32, SurfaceError> {
    let min = capabilities.min_image_count.max(1);
    let max = capabilities.max_image_count;

    if max != 0 && min > max {
        return Err(SurfaceError::UnsupportedSurface(format!(
            "minimum image count {min} exceeds maximum {max}"
        )));
    }

    let count = min + EXTRA_IMAGES;
    Ok(if max == 0 { count } else { count.min(max) })
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        // Inverted bounds from a driver resolve to the maximum.
        vk::Extent2D {
            width: desired_width
                .max(capabilities.min_image_extent.width)
                .min(capabilities.max_image_extent.width),
            height: desired_height
                .max(capabilities.min_image_extent.height)
                .min(capabilities.max_image_extent.height),
        }
    }
}

/// Resolved swapchain creation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    /// Resolve creation parameters from a surface query.
    pub fn resolve(
        details: &SurfaceDetails,
        window_extent: vk::Extent2D,
        vsync: bool,
    ) -> std::result::Result<Self, SurfaceError> {
        if details.present_modes.is_empty() {
            return Err(SurfaceError::UnsupportedSurface(
                "surface reports no present modes".to_string(),
            ));
        }
        let surface_format = select_surface_format(&details.formats).ok_or_else(|| {
            SurfaceError::UnsupportedSurface("surface reports no formats".to_string())
        })?;

        let caps = &details.capabilities;
        Ok(Self {
            surface_format,
            present_mode: select_present_mode(&details.present_modes, vsync),
            extent: calculate_extent(caps, window_extent.width, window_extent.height),
            image_count: select_image_count(caps)?,
            pre_transform: caps.current_transform,
        })
    }
}

/// An acquired swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub index: u32,
    /// The swapchain still works but no longer matches the surface exactly.
    pub suboptimal: bool,
}

/// Swapchain wrapper.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create a new swapchain.
    ///
    /// `queue_families` lists every family that touches the images; more than
    /// one distinct family selects concurrent sharing.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        plan: &SwapchainPlan,
        queue_families: &[u32],
    ) -> Result<Self> {
        let sharing_mode = if queue_families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(plan.image_count)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_families)
            .pre_transform(plan.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| SurfaceError::Creation(format!("vkCreateSwapchainKHR failed: {e}")))?;

        let images = swapchain_loader.get_swapchain_images(swapchain)?;

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(plan.surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            match device.create_image_view(&view_info, None) {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    for view in image_views {
                        device.destroy_image_view(view, None);
                    }
                    swapchain_loader.destroy_swapchain(swapchain, None);
                    return Err(GpuError::from(e));
                }
            }
        }

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: plan.surface_format.format,
            extent: plan.extent,
            present_mode: plan.present_mode,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image.
    ///
    /// Out-of-date maps to [`GpuError::PresentationStale`]; no image was
    /// acquired and the semaphore is left unsignaled.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquiredImage> {
        match swapchain_loader.acquire_next_image(
            self.swapchain,
            timeout_ns,
            semaphore,
            vk::Fence::null(),
        ) {
            Ok((index, suboptimal)) => Ok(AcquiredImage { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::PresentationStale),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image. Returns whether the swapchain is suboptimal.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match swapchain_loader.queue_present(queue, &present_info) {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::PresentationStale),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy the swapchain.
    ///
    /// # Safety
    /// All handles must be valid and swapchain must not be in use.
    pub unsafe fn destroy(
        &self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        swapchain_loader.destroy_swapchain(self.swapchain, None);
    }
}

/// Owns the live swapchain and rebuilds it on demand.
pub struct SwapchainManager {
    loader: ash::khr::swapchain::Device,
    swapchain: Option<Swapchain>,
    vsync: bool,
    generation: u64,
}

impl SwapchainManager {
    pub fn new(gpu: &GpuContext, vsync: bool) -> Self {
        Self {
            loader: ash::khr::swapchain::Device::new(gpu.instance(), gpu.device()),
            swapchain: None,
            vsync,
            generation: 0,
        }
    }

    /// Swapchain extension loader.
    pub fn loader(&self) -> &ash::khr::swapchain::Device {
        &self.loader
    }

    /// The live swapchain.
    pub fn current(&self) -> Result<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Swapchain not created".to_string()))
    }

    /// Number of swapchains built so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Query the surface for the selected device.
    pub fn query_capabilities(&self, gpu: &GpuContext) -> Result<SurfaceDetails> {
        unsafe { gpu.surface().query(gpu.physical_device()) }
    }

    /// Create the swapchain from a surface query.
    ///
    /// Any previous swapchain must have been destroyed first.
    pub fn create(
        &mut self,
        gpu: &GpuContext,
        details: &SurfaceDetails,
        window_extent: vk::Extent2D,
    ) -> Result<&Swapchain> {
        if self.swapchain.is_some() {
            return Err(GpuError::InvalidState(
                "Swapchain already exists; destroy it before creating another".to_string(),
            ));
        }

        let plan = SwapchainPlan::resolve(details, window_extent, self.vsync)?;

        let graphics = gpu.queue_family(QueueRole::Graphics);
        let present = gpu.queue_family(QueueRole::Present);
        let families: Vec<u32> = if graphics == present {
            vec![graphics]
        } else {
            vec![graphics, present]
        };

        let swapchain =
            unsafe { Swapchain::new(gpu.device(), &self.loader, gpu.surface().surface, &plan, &families)? };
        self.generation += 1;

        tracing::info!(
            "Swapchain #{}: {}x{} {:?} {:?}, {} images",
            self.generation,
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format,
            swapchain.present_mode,
            swapchain.image_count(),
        );

        Ok(self.swapchain.insert(swapchain))
    }

    /// Wait for the device, destroy the old swapchain, re-query and rebuild.
    ///
    /// Dependent framebuffers must already be destroyed.
    pub fn recreate(&mut self, gpu: &GpuContext, window_extent: vk::Extent2D) -> Result<&Swapchain> {
        gpu.wait_idle()?;
        self.destroy(gpu.device());
        let details = self.query_capabilities(gpu)?;
        self.create(gpu, &details, window_extent)
    }

    /// Destroy the swapchain if one exists.
    pub fn destroy(&mut self, device: &ash::Device) {
        if let Some(swapchain) = self.swapchain.take() {
            unsafe { swapchain.destroy(device, &self.loader) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srgb(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        }
    }

    fn details(
        formats: Vec<vk::SurfaceFormatKHR>,
        present_modes: Vec<vk::PresentModeKHR>,
    ) -> SurfaceDetails {
        SurfaceDetails {
            capabilities: capabilities(2, 8),
            formats,
            present_modes,
        }
    }

    const WINDOW: vk::Extent2D = vk::Extent2D {
        width: 1280,
        height: 720,
    };

    #[test]
    fn empty_formats_are_unsupported() {
        let details = details(vec![], vec![vk::PresentModeKHR::FIFO]);

        assert!(matches!(
            SwapchainPlan::resolve(&details, WINDOW, true),
            Err(SurfaceError::UnsupportedSurface(_))
        ));
    }

    #[test]
    fn empty_present_modes_are_unsupported() {
        let details = details(vec![srgb(vk::Format::B8G8R8A8_SRGB)], vec![]);

        assert!(matches!(
            SwapchainPlan::resolve(&details, WINDOW, true),
            Err(SurfaceError::UnsupportedSurface(_))
        ));
    }

    #[test]
    fn format_preference_order() {
        let formats = [
            srgb(vk::Format::R8G8B8A8_UNORM),
            srgb(vk::Format::R8G8B8A8_SRGB),
            srgb(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(
            select_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
        assert_eq!(
            select_surface_format(&formats[..2]).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_SRGB)
        );
        assert_eq!(
            select_surface_format(&formats[..1]).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
        assert_eq!(select_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_preference_order() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(select_present_mode(&all[..2], true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all[..2], false), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(select_present_mode(&all[..1], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn image_count_stays_within_bounds() {
        for min in 1..=4 {
            for max in min..=6 {
                let count = select_image_count(&capabilities(min, max)).unwrap();
                assert!((min..=max).contains(&count), "{count} not in [{min}, {max}]");
            }
        }
        assert_eq!(select_image_count(&capabilities(2, 0)).unwrap(), 3);
        assert_eq!(select_image_count(&capabilities(3, 3)).unwrap(), 3);
    }

    #[test]
    fn inverted_image_bounds_are_unsupported() {
        assert!(matches!(
            select_image_count(&capabilities(4, 2)),
            Err(SurfaceError::UnsupportedSurface(_))
        ));
    }

    #[test]
    fn inverted_extent_bounds_do_not_panic() {
        let inverted = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1024,
                height: 768,
            },
            max_image_extent: vk::Extent2D {
                width: 512,
                height: 384,
            },
            ..Default::default()
        };
        assert_eq!(
            calculate_extent(&inverted, 1280, 100),
            vk::Extent2D {
                width: 512,
                height: 384
            }
        );
    }

    #[test]
    fn extent_follows_surface_unless_undefined() {
        let fixed = capabilities(2, 3);
        assert_eq!(calculate_extent(&fixed, 1280, 720), fixed.current_extent);

        let undefined = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        assert_eq!(
            calculate_extent(&undefined, 1280, 720),
            vk::Extent2D {
                width: 1024,
                height: 720
            }
        );
    }

    #[test]
    fn plan_uses_surface_extent_and_transform() {
        let mut details = details(
            vec![srgb(vk::Format::B8G8R8A8_SRGB)],
            vec![vk::PresentModeKHR::FIFO],
        );
        details.capabilities.current_transform = vk::SurfaceTransformFlagsKHR::IDENTITY;

        let plan = SwapchainPlan::resolve(&details, WINDOW, true).unwrap();
        assert_eq!(plan.extent, vk::Extent2D { width: 800, height: 600 });
        assert_eq!(plan.image_count, 3);
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
        assert_eq!(plan.pre_transform, vk::SurfaceTransformFlagsKHR::IDENTITY);
    }
}
