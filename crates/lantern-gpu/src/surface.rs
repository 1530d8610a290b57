//! Surface management for windowed rendering.
//!
//! Hides the raw-window-handle plumbing from application code.

use crate::error::{Result, SurfaceError};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Surface context for windowed rendering.
pub struct SurfaceContext {
    /// The Vulkan surface handle.
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader.
    pub surface_loader: ash::khr::surface::Instance,
}

impl SurfaceContext {
    /// Create a surface for a window.
    ///
    /// # Safety
    /// The instance must have been created with the extensions reported for
    /// the window's display, and the window must outlive the surface.
    pub unsafe fn from_window<W>(
        entry: &ash::Entry,
        instance: &ash::Instance,
        window: &W,
    ) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| SurfaceError::Creation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| SurfaceError::Creation(format!("Failed to get window handle: {e}")))?;

        let surface = ash_window::create_surface(
            entry,
            instance,
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
        .map_err(|e| SurfaceError::Creation(e.to_string()))?;

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        Ok(Self {
            surface,
            surface_loader,
        })
    }

    /// Whether a queue family of `physical_device` can present to this surface.
    ///
    /// Query failures count as "no".
    ///
    /// # Safety
    /// The physical device must belong to the instance the surface was created with.
    pub unsafe fn supports_present(&self, physical_device: vk::PhysicalDevice, family: u32) -> bool {
        self.surface_loader
            .get_physical_device_surface_support(physical_device, family, self.surface)
            .unwrap_or(false)
    }

    /// Query capabilities, formats and present modes.
    ///
    /// # Safety
    /// The physical device must belong to the instance the surface was created with.
    pub unsafe fn query(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceDetails> {
        let capabilities = self
            .surface_loader
            .get_physical_device_surface_capabilities(physical_device, self.surface)?;

        let formats = self
            .surface_loader
            .get_physical_device_surface_formats(physical_device, self.surface)?;

        let present_modes = self
            .surface_loader
            .get_physical_device_surface_present_modes(physical_device, self.surface)?;

        Ok(SurfaceDetails {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// The surface must not be in use.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.surface, None);
    }
}

/// Surface capabilities query result.
#[derive(Debug, Clone, Default)]
pub struct SurfaceDetails {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}
