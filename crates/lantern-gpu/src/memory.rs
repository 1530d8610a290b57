//! GPU memory management.
//!
//! Memory comes from `gpu-allocator`. Memory-type compatibility is checked up
//! front with [`select_memory_type`] so an impossible request fails with
//! [`ResourceError::NoCompatibleMemoryType`] instead of an opaque allocator
//! error.

use crate::command::CommandRecorder;
use crate::error::{GpuError, ResourceError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Where a resource lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUsage {
    /// GPU-only memory, filled through transfers.
    DeviceLocal,
    /// CPU-writable memory, persistently mapped.
    HostVisible,
}

impl MemoryUsage {
    /// Property masks to try, most preferred first.
    pub fn preferred_properties(self) -> &'static [vk::MemoryPropertyFlags] {
        const DEVICE_LOCAL: [vk::MemoryPropertyFlags; 1] = [vk::MemoryPropertyFlags::DEVICE_LOCAL];
        const HOST_VISIBLE: [vk::MemoryPropertyFlags; 2] = [
            vk::MemoryPropertyFlags::from_raw(
                vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
                    | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw()
                    | vk::MemoryPropertyFlags::DEVICE_LOCAL.as_raw(),
            ),
            vk::MemoryPropertyFlags::from_raw(
                vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
                    | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
            ),
        ];

        match self {
            Self::DeviceLocal => &DEVICE_LOCAL,
            Self::HostVisible => &HOST_VISIBLE,
        }
    }

    fn location(self) -> MemoryLocation {
        match self {
            Self::DeviceLocal => MemoryLocation::GpuOnly,
            Self::HostVisible => MemoryLocation::CpuToGpu,
        }
    }
}

/// Find a memory type allowed by `type_bits` that has the properties `usage` needs.
///
/// Each preferred property mask is tried in turn over all memory types.
pub fn select_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    usage: MemoryUsage,
) -> std::result::Result<u32, ResourceError> {
    let count = (properties.memory_type_count as usize).min(properties.memory_types.len());
    let types = &properties.memory_types[..count];

    usage
        .preferred_properties()
        .iter()
        .find_map(|&wanted| {
            types.iter().enumerate().find_map(|(index, memory_type)| {
                let allowed = type_bits & (1 << index) != 0;
                (allowed && memory_type.property_flags.contains(wanted)).then_some(index as u32)
            })
        })
        .ok_or_else(|| {
            let fallback = usage.preferred_properties();
            ResourceError::NoCompatibleMemoryType {
                type_bits,
                properties: fallback[fallback.len() - 1],
            }
        })
}

/// Live allocation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub live_buffers: usize,
    pub live_images: usize,
    pub allocated_bytes: u64,
}

/// Parameters for [`ResourceAllocator::create_image`].
#[derive(Debug, Clone, Copy)]
pub struct ImageDescriptor {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// Creates buffers and images backed by `gpu-allocator` memory.
pub struct ResourceAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    sharing_families: Vec<u32>,
    stats: MemoryStats,
}

impl ResourceAllocator {
    /// Create a new allocator.
    ///
    /// `sharing_families` lists the queue families that touch buffers; more
    /// than one selects concurrent sharing.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
        sharing_families: Vec<u32>,
    ) -> Result<Self> {
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| ResourceError::Allocation(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
            memory_properties,
            sharing_families,
            stats: MemoryStats::default(),
        })
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    fn inner(&mut self) -> std::result::Result<&mut Allocator, ResourceError> {
        self.allocator.as_mut().ok_or(ResourceError::AllocatorShutdown)
    }

    fn allocate(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        usage: MemoryUsage,
        linear: bool,
    ) -> std::result::Result<Allocation, ResourceError> {
        select_memory_type(&self.memory_properties, requirements.memory_type_bits, usage)?;

        self.inner()?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: usage.location(),
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| ResourceError::Allocation(e.to_string()))
    }

    fn release(&mut self, allocation: Allocation) -> std::result::Result<(), ResourceError> {
        self.inner()?
            .free(allocation)
            .map_err(|e| ResourceError::Allocation(e.to_string()))
    }

    /// Create a buffer and bind memory to it.
    ///
    /// Creation and binding are separate steps; if binding fails the buffer
    /// and its memory are released before returning the error.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory: MemoryUsage,
        name: &str,
    ) -> Result<GpuBuffer> {
        let sharing_mode = if self.sharing_families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode)
            .queue_family_indices(&self.sharing_families);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(name, requirements, memory, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { self.device.destroy_buffer(buffer, None) };
            if let Err(free_err) = self.release(allocation) {
                tracing::warn!("Failed to release memory for unbound buffer {name}: {free_err}");
            }
            return Err(ResourceError::Bind(e).into());
        }

        self.stats.live_buffers += 1;
        self.stats.allocated_bytes += allocation.size();

        Ok(GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Free a buffer allocation.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            let bytes = allocation.size();
            self.release(allocation)?;
            self.stats.live_buffers = self.stats.live_buffers.saturating_sub(1);
            self.stats.allocated_bytes = self.stats.allocated_bytes.saturating_sub(bytes);
        }

        if buffer.buffer != vk::Buffer::null() {
            unsafe { self.device.destroy_buffer(buffer.buffer, None) };
            buffer.buffer = vk::Buffer::null();
        }

        Ok(())
    }

    /// Create a 2D image with one mip level and a view over it.
    pub fn create_image(&mut self, desc: &ImageDescriptor, name: &str) -> Result<GpuImage> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocate(name, requirements, MemoryUsage::DeviceLocal, false) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bound {
            unsafe { self.device.destroy_image(image, None) };
            if let Err(free_err) = self.release(allocation) {
                tracing::warn!("Failed to release memory for unbound image {name}: {free_err}");
            }
            return Err(ResourceError::Bind(e).into());
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(desc.aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                if let Err(free_err) = self.release(allocation) {
                    tracing::warn!("Failed to release memory for image {name}: {free_err}");
                }
                return Err(GpuError::from(e));
            }
        };

        self.stats.live_images += 1;
        self.stats.allocated_bytes += allocation.size();

        Ok(GpuImage {
            image,
            view,
            allocation: Some(allocation),
            format: desc.format,
            extent: desc.extent,
        })
    }

    /// Free an image, its view and its allocation.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        if image.view != vk::ImageView::null() {
            unsafe { self.device.destroy_image_view(image.view, None) };
            image.view = vk::ImageView::null();
        }

        if let Some(allocation) = image.allocation.take() {
            let bytes = allocation.size();
            self.release(allocation)?;
            self.stats.live_images = self.stats.live_images.saturating_sub(1);
            self.stats.allocated_bytes = self.stats.allocated_bytes.saturating_sub(bytes);
        }

        if image.image != vk::Image::null() {
            unsafe { self.device.destroy_image(image.image, None) };
            image.image = vk::Image::null();
        }

        Ok(())
    }

    /// Copy `size` bytes between buffers on the transfer queue.
    ///
    /// Blocks until the transfer queue is idle.
    pub fn copy(
        &self,
        recorder: &mut CommandRecorder,
        src: &GpuBuffer,
        dst: &GpuBuffer,
        size: u64,
    ) -> Result<()> {
        if size > src.size || size > dst.size {
            return Err(ResourceError::OutOfBounds {
                offset: 0,
                end: size,
                size: src.size.min(dst.size),
            }
            .into());
        }

        let cmd = recorder.begin_transfer()?;
        let region = vk::BufferCopy::default().size(size);
        unsafe {
            self.device
                .cmd_copy_buffer(cmd, src.buffer, dst.buffer, &[region]);
        }
        recorder.end_transfer()
    }

    /// Create a device-local buffer filled with `data` through a staging copy.
    pub fn upload_buffer(
        &mut self,
        recorder: &mut CommandRecorder,
        data: &[u8],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        let size = data.len() as u64;

        let mut staging = self.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryUsage::HostVisible,
            &format!("{name} staging"),
        )?;

        let result = staging.write_bytes(0, data).and_then(|()| {
            let mut buffer = self.create_buffer(
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryUsage::DeviceLocal,
                name,
            )?;
            match self.copy(recorder, &staging, &buffer, size) {
                Ok(()) => Ok(buffer),
                Err(e) => {
                    let freed = self.free_buffer(&mut buffer);
                    Err(primary_error(e, freed, name))
                }
            }
        });

        let freed = self.free_buffer(&mut staging);
        match result {
            Ok(buffer) => {
                if let Err(e) = freed {
                    tracing::warn!("Failed to free staging buffer for '{name}': {e}");
                }
                Ok(buffer)
            }
            Err(e) => Err(primary_error(e, freed, "staging buffer")),
        }
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// Must be called before the Vulkan device is destroyed. Remaining
    /// allocations are freed and logged as leaks.
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for ResourceAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A GPU buffer with its allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
}

impl GpuBuffer {
    /// Write raw bytes at `offset` (host-visible buffers only).
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= self.size)
            .ok_or(ResourceError::OutOfBounds {
                offset,
                end: offset.saturating_add(data.len() as u64),
                size: self.size,
            })?;

        let mapped = self
            .allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .ok_or(ResourceError::NotMapped)?;

        let range = offset as usize..end as usize;
        let target = mapped.get_mut(range).ok_or(ResourceError::OutOfBounds {
            offset,
            end,
            size: self.size,
        })?;
        target.copy_from_slice(data);

        Ok(())
    }

    /// Write plain-old-data values from the start of the buffer.
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }
}

/// A GPU image with its view and allocation.
pub struct GpuImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub allocation: Option<Allocation>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

/// Keep `primary` when the cleanup that follows it fails too; the cleanup
/// error is only logged.
fn primary_error(primary: GpuError, cleanup: Result<()>, what: &str) -> GpuError {
    if let Err(e) = cleanup {
        tracing::warn!("Failed to free '{what}' after an error: {e}");
    }
    primary
}
