//! Physical device candidates.

use ash::vk;
use std::ffi::CStr;

use crate::device::QueueRole;
use crate::surface::SurfaceContext;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// One queue family as seen from a candidate device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    /// Family index on the physical device.
    pub index: u32,
    /// Advertised capabilities.
    pub flags: vk::QueueFlags,
    /// Number of queues the family exposes.
    pub queue_count: u32,
    /// Whether the family can present to the target surface.
    pub supports_present: bool,
}

impl QueueFamilyInfo {
    /// Whether this family can serve `role`.
    ///
    /// Graphics and compute families implicitly accept transfer commands even
    /// when they do not advertise the transfer bit.
    pub fn supports(&self, role: QueueRole) -> bool {
        match role {
            QueueRole::Graphics => self.flags.contains(vk::QueueFlags::GRAPHICS),
            QueueRole::Present => self.supports_present,
            QueueRole::Transfer => self.flags.intersects(
                vk::QueueFlags::TRANSFER | vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            ),
        }
    }
}

/// A physical device as reported by enumeration.
///
/// Built once during startup and never modified afterwards.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub vendor: GpuVendor,
    pub api_version: u32,
    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    pub queue_families: Vec<QueueFamilyInfo>,
}

impl PhysicalDeviceCandidate {
    /// Query a candidate from a physical device.
    ///
    /// # Safety
    /// The instance, physical device and surface must be valid.
    pub unsafe fn query(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface: &SurfaceContext,
    ) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let queue_families = instance
            .get_physical_device_queue_family_properties(physical_device)
            .iter()
            .enumerate()
            .map(|(index, family)| {
                let index = index as u32;
                QueueFamilyInfo {
                    index,
                    flags: family.queue_flags,
                    queue_count: family.queue_count,
                    supports_present: surface.supports_present(physical_device, index),
                }
            })
            .collect();

        Self {
            handle: physical_device,
            name,
            device_type: properties.device_type,
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            api_version: properties.api_version,
            device_local_memory_mb,
            queue_families,
        }
    }

    pub fn is_discrete(&self) -> bool {
        self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    pub fn is_integrated(&self) -> bool {
        self.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU
    }

    /// Get a human-readable summary of the candidate.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, supports_present: bool) -> QueueFamilyInfo {
        QueueFamilyInfo {
            index: 0,
            flags,
            queue_count: 1,
            supports_present,
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn graphics_family_implies_transfer() {
        let graphics = family(vk::QueueFlags::GRAPHICS, false);
        assert!(graphics.supports(QueueRole::Graphics));
        assert!(graphics.supports(QueueRole::Transfer));
        assert!(!graphics.supports(QueueRole::Present));
    }

    #[test]
    fn present_support_comes_from_surface_query() {
        let present_only = family(vk::QueueFlags::empty(), true);
        assert!(present_only.supports(QueueRole::Present));
        assert!(!present_only.supports(QueueRole::Graphics));
        assert!(!present_only.supports(QueueRole::Transfer));
    }
}
