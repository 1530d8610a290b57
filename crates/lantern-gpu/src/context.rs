//! GPU context management.
//!
//! [`GpuContext`] is the explicit handle bundle passed to every component
//! that needs the device: instance, surface, selected GPU, logical device,
//! queues and allocator. It is constructed once by [`GpuContextBuilder`].

use crate::capabilities::PhysicalDeviceCandidate;
use crate::device::{
    DeviceQueues, DeviceSelectionOptions, DeviceSelector, QueueFamilyAssignment, QueueRole,
};
use crate::error::{DeviceError, Result, SurfaceError};
use crate::instance::{create_instance, DebugMessenger};
use crate::memory::ResourceAllocator;
use crate::surface::SurfaceContext;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    messenger: Option<DebugMessenger>,
    surface: SurfaceContext,
    candidate: PhysicalDeviceCandidate,
    device: Arc<ash::Device>,
    queues: DeviceQueues,
    assignment: QueueFamilyAssignment,
    allocator: Mutex<ResourceAllocator>,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle to the device for long-lived components.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.candidate.handle
    }

    /// The selected GPU.
    pub fn candidate(&self) -> &PhysicalDeviceCandidate {
        &self.candidate
    }

    pub fn surface(&self) -> &SurfaceContext {
        &self.surface
    }

    pub fn queue(&self, role: QueueRole) -> vk::Queue {
        self.queues.get(role)
    }

    pub fn queue_family(&self, role: QueueRole) -> u32 {
        self.assignment.family(role)
    }

    pub fn assignment(&self) -> &QueueFamilyAssignment {
        &self.assignment
    }

    /// Get access to the resource allocator.
    pub fn allocator(&self) -> &Mutex<ResourceAllocator> {
        &self.allocator
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // The allocator frees its VkDeviceMemory blocks, so it goes before the device.
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.surface.destroy();
            if let Some(messenger) = &self.messenger {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    selection: DeviceSelectionOptions,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Lantern".to_string(),
            enable_validation: cfg!(debug_assertions),
            selection: DeviceSelectionOptions::default(),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Set the GPU selection rules.
    pub fn selection(mut self, options: DeviceSelectionOptions) -> Self {
        self.selection = options;
        self
    }

    /// Build the GPU context for a window.
    pub fn build<W>(self, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| DeviceError::Loader(format!("Failed to load Vulkan: {e}")))?;

        let display = window
            .display_handle()
            .map_err(|e| SurfaceError::Creation(format!("Failed to get display handle: {e}")))?
            .as_raw();

        let instance =
            unsafe { create_instance(&entry, &self.app_name, self.enable_validation, display) }?;

        let messenger = if self.enable_validation {
            match unsafe { DebugMessenger::new(&entry, &instance) } {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    tracing::warn!("Continuing without validation output: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface = match unsafe { SurfaceContext::from_window(&entry, &instance, window) } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { destroy_partial(&instance, messenger.as_ref(), None) };
                return Err(e);
            }
        };

        let selector = DeviceSelector::new(self.selection);
        let selected = unsafe { selector.enumerate(&instance, &surface) }
            .and_then(|candidates| selector.select(&candidates));
        let created = selected.and_then(|selected| {
            let (device, queues) = unsafe { selected.create_logical_device(&instance) }?;
            Ok((selected, device, queues))
        });
        let (selected, device, queues) = match created {
            Ok(created) => created,
            Err(e) => {
                unsafe { destroy_partial(&instance, messenger.as_ref(), Some(&surface)) };
                return Err(e);
            }
        };

        let device = Arc::new(device);
        let assignment = selected.assignment;

        let mut sharing_families = vec![
            assignment.family(QueueRole::Graphics),
            assignment.family(QueueRole::Transfer),
        ];
        sharing_families.dedup();

        let allocator = match unsafe {
            ResourceAllocator::new(&instance, Arc::clone(&device), selected.candidate.handle, sharing_families)
        } {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    destroy_partial(&instance, messenger.as_ref(), Some(&surface));
                }
                return Err(e);
            }
        };

        Ok(GpuContext {
            entry,
            instance,
            messenger,
            surface,
            candidate: selected.candidate,
            device,
            queues,
            assignment,
            allocator: Mutex::new(allocator),
        })
    }
}

/// Tear down what was created before a failed build step.
unsafe fn destroy_partial(
    instance: &ash::Instance,
    messenger: Option<&DebugMessenger>,
    surface: Option<&SurfaceContext>,
) {
    if let Some(surface) = surface {
        surface.destroy();
    }
    if let Some(messenger) = messenger {
        messenger.destroy();
    }
    instance.destroy_instance(None);
}
