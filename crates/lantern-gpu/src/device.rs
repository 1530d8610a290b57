//! Physical device selection and logical device creation.

use std::ffi::CStr;
use std::fmt;

use ash::vk;

use crate::capabilities::{PhysicalDeviceCandidate, QueueFamilyInfo};
use crate::error::{DeviceError, Result};
use crate::surface::SurfaceContext;

/// Logical queue roles the renderer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Present,
    Transfer,
}

impl QueueRole {
    /// All roles, in assignment priority order.
    pub const ALL: [Self; 3] = [Self::Graphics, Self::Present, Self::Transfer];

    pub const fn index(self) -> usize {
        match self {
            Self::Graphics => 0,
            Self::Present => 1,
            Self::Transfer => 2,
        }
    }
}

impl fmt::Display for QueueRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Graphics => "graphics",
            Self::Present => "present",
            Self::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

/// Rules for picking a physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelectionOptions {
    /// Reject everything that is not a discrete GPU (allowlist matches excepted).
    pub require_discrete: bool,
    /// Case-insensitive name fragments that always qualify a device.
    pub allowlist: Vec<String>,
    /// Accept an integrated GPU when no discrete GPU is present.
    pub allow_integrated: bool,
}

impl Default for DeviceSelectionOptions {
    fn default() -> Self {
        Self {
            require_discrete: false,
            allowlist: Vec::new(),
            allow_integrated: true,
        }
    }
}

impl DeviceSelectionOptions {
    fn allowlisted(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.allowlist
            .iter()
            .any(|entry| !entry.is_empty() && name.contains(&entry.to_lowercase()))
    }
}

/// Pick a candidate according to `options`.
///
/// Candidates are checked tier by tier: allowlisted names, then discrete GPUs,
/// then integrated GPUs. Within a tier the first candidate in enumeration
/// order wins.
pub fn select_candidate<'a>(
    candidates: &'a [PhysicalDeviceCandidate],
    options: &DeviceSelectionOptions,
) -> std::result::Result<&'a PhysicalDeviceCandidate, DeviceError> {
    let allowlisted = candidates.iter().find(|c| options.allowlisted(&c.name));
    let discrete = || candidates.iter().find(|c| c.is_discrete());
    let integrated = || {
        if options.allow_integrated && !options.require_discrete {
            candidates.iter().find(|c| c.is_integrated())
        } else {
            None
        }
    };

    allowlisted
        .or_else(discrete)
        .or_else(integrated)
        .ok_or(DeviceError::NoSuitableDevice)
}

/// A queue within a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSlot {
    pub family: u32,
    pub index: u32,
}

/// Mapping from each [`QueueRole`] to the queue that serves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyAssignment {
    slots: [QueueSlot; 3],
}

impl QueueFamilyAssignment {
    pub fn slot(&self, role: QueueRole) -> QueueSlot {
        self.slots[role.index()]
    }

    pub fn family(&self, role: QueueRole) -> u32 {
        self.slot(role).family
    }

    /// Whether two roles resolve to the same queue family.
    pub fn shares_family(&self, a: QueueRole, b: QueueRole) -> bool {
        self.family(a) == self.family(b)
    }

    /// `(family, queue_count)` pairs to request at device creation, one per
    /// distinct family, sorted by family index.
    pub fn queue_requests(&self) -> Vec<(u32, u32)> {
        let mut requests: Vec<(u32, u32)> = Vec::with_capacity(3);
        for slot in &self.slots {
            match requests.iter_mut().find(|(family, _)| *family == slot.family) {
                Some((_, count)) => *count = (*count).max(slot.index + 1),
                None => requests.push((slot.family, slot.index + 1)),
            }
        }
        requests.sort_unstable_by_key(|(family, _)| *family);
        requests
    }
}

/// Resolve every role to a queue.
///
/// Roles are assigned in [`QueueRole::ALL`] order. Each role takes the
/// lowest-index capable family that still has an unused queue, so a single
/// general-purpose family with three queues hands out queues 0, 1 and 2.
/// Once every capable family is exhausted the role shares queue 0 of the
/// lowest capable family.
pub fn assign_queue_families(
    families: &[QueueFamilyInfo],
) -> std::result::Result<QueueFamilyAssignment, DeviceError> {
    let mut consumed = vec![0u32; families.len()];
    let mut slots = [QueueSlot { family: 0, index: 0 }; 3];

    for role in QueueRole::ALL {
        let mut capable = families
            .iter()
            .enumerate()
            .filter(|(_, family)| family.supports(role))
            .peekable();

        let Some(&(_, first_family)) = capable.peek() else {
            return Err(DeviceError::NoQualifyingQueueFamily(role));
        };

        let free = capable.find(|(position, family)| consumed[*position] < family.queue_count);
        let slot = match free {
            Some((position, family)) => {
                let slot = QueueSlot {
                    family: family.index,
                    index: consumed[position],
                };
                consumed[position] += 1;
                slot
            }
            None => {
                tracing::debug!(
                    "Queue families for the {role} role are exhausted, sharing family {}",
                    first_family.index
                );
                QueueSlot {
                    family: first_family.index,
                    index: 0,
                }
            }
        };
        slots[role.index()] = slot;
    }

    Ok(QueueFamilyAssignment { slots })
}

/// Queue handles for each role.
#[derive(Debug, Clone, Copy)]
pub struct DeviceQueues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
    pub transfer: vk::Queue,
}

impl DeviceQueues {
    pub fn get(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Present => self.present,
            QueueRole::Transfer => self.transfer,
        }
    }
}

/// Required device extensions.
fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Enumerates GPUs and applies [`DeviceSelectionOptions`].
#[derive(Debug, Clone, Default)]
pub struct DeviceSelector {
    options: DeviceSelectionOptions,
}

impl DeviceSelector {
    pub fn new(options: DeviceSelectionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DeviceSelectionOptions {
        &self.options
    }

    /// List every physical device with its queue families.
    ///
    /// # Safety
    /// The instance and surface must be valid.
    pub unsafe fn enumerate(
        &self,
        instance: &ash::Instance,
        surface: &SurfaceContext,
    ) -> Result<Vec<PhysicalDeviceCandidate>> {
        let devices = instance.enumerate_physical_devices()?;
        let candidates: Vec<_> = devices
            .into_iter()
            .map(|device| PhysicalDeviceCandidate::query(instance, device, surface))
            .collect();

        for candidate in &candidates {
            tracing::debug!("Found GPU: {}", candidate.summary());
        }

        Ok(candidates)
    }

    /// Choose a candidate and resolve its queue families.
    pub fn select(&self, candidates: &[PhysicalDeviceCandidate]) -> Result<SelectedDevice> {
        let candidate = select_candidate(candidates, &self.options)?;
        let assignment = assign_queue_families(&candidate.queue_families)?;

        tracing::info!("Selected GPU: {}", candidate.summary());
        tracing::info!(
            "Queue families: graphics={:?} present={:?} transfer={:?}",
            assignment.slot(QueueRole::Graphics),
            assignment.slot(QueueRole::Present),
            assignment.slot(QueueRole::Transfer),
        );

        Ok(SelectedDevice {
            candidate: candidate.clone(),
            assignment,
        })
    }
}

/// The chosen physical device and its queue plan.
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub candidate: PhysicalDeviceCandidate,
    pub assignment: QueueFamilyAssignment,
}

impl SelectedDevice {
    /// Create the logical device with one queue per assigned slot.
    ///
    /// # Safety
    /// The instance must be the one the candidate was enumerated from.
    pub unsafe fn create_logical_device(
        &self,
        instance: &ash::Instance,
    ) -> Result<(ash::Device, DeviceQueues)> {
        let requests = self.assignment.queue_requests();
        let max_count = requests.iter().map(|(_, count)| *count).max().unwrap_or(1);
        let priorities = vec![1.0_f32; max_count as usize];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = requests
            .iter()
            .map(|&(family, count)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities[..count as usize])
            })
            .collect();

        let extension_names: Vec<*const std::ffi::c_char> = required_device_extensions()
            .iter()
            .map(|ext| ext.as_ptr())
            .collect();

        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = instance
            .create_device(self.candidate.handle, &create_info, None)
            .map_err(DeviceError::Creation)?;

        let queue = |role: QueueRole| {
            let slot = self.assignment.slot(role);
            device.get_device_queue(slot.family, slot.index)
        };
        let queues = DeviceQueues {
            graphics: queue(QueueRole::Graphics),
            present: queue(QueueRole::Present),
            transfer: queue(QueueRole::Transfer),
        };

        Ok((device, queues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::GpuVendor;

    fn candidate(name: &str, device_type: vk::PhysicalDeviceType) -> PhysicalDeviceCandidate {
        PhysicalDeviceCandidate {
            handle: vk::PhysicalDevice::null(),
            name: name.to_string(),
            device_type,
            vendor: GpuVendor::Other(0),
            api_version: vk::API_VERSION_1_2,
            device_local_memory_mb: 0,
            queue_families: vec![family(0, vk::QueueFlags::GRAPHICS, 1, true)],
        }
    }

    fn family(index: u32, flags: vk::QueueFlags, queue_count: u32, present: bool) -> QueueFamilyInfo {
        QueueFamilyInfo {
            index,
            flags,
            queue_count,
            supports_present: present,
        }
    }

    #[test]
    fn single_discrete_candidate_is_selected() {
        let candidates = vec![candidate("TestGPU", vk::PhysicalDeviceType::DISCRETE_GPU)];
        let selector = DeviceSelector::default();

        let selected = selector.select(&candidates).unwrap();
        assert_eq!(selected.candidate.name, "TestGPU");
    }

    #[test]
    fn discrete_preferred_over_integrated() {
        let candidates = vec![
            candidate("Integrated", vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate("Discrete", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];

        let chosen = select_candidate(&candidates, &DeviceSelectionOptions::default()).unwrap();
        assert_eq!(chosen.name, "Discrete");
    }

    #[test]
    fn first_discrete_in_enumeration_order_wins() {
        let candidates = vec![
            candidate("First", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("Second", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];

        let chosen = select_candidate(&candidates, &DeviceSelectionOptions::default()).unwrap();
        assert_eq!(chosen.name, "First");
    }

    #[test]
    fn allowlist_overrides_device_type() {
        let candidates = vec![
            candidate("Discrete", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("llvmpipe (LLVM 17)", vk::PhysicalDeviceType::CPU),
        ];
        let options = DeviceSelectionOptions {
            allowlist: vec!["LLVMPIPE".to_string()],
            ..Default::default()
        };

        let chosen = select_candidate(&candidates, &options).unwrap();
        assert_eq!(chosen.name, "llvmpipe (LLVM 17)");
    }

    #[test]
    fn integrated_fallback_respects_options() {
        let candidates = vec![candidate("Integrated", vk::PhysicalDeviceType::INTEGRATED_GPU)];

        assert!(select_candidate(&candidates, &DeviceSelectionOptions::default()).is_ok());

        let no_integrated = DeviceSelectionOptions {
            allow_integrated: false,
            ..Default::default()
        };
        assert!(matches!(
            select_candidate(&candidates, &no_integrated),
            Err(DeviceError::NoSuitableDevice)
        ));

        let discrete_only = DeviceSelectionOptions {
            require_discrete: true,
            ..Default::default()
        };
        assert!(select_candidate(&candidates, &discrete_only).is_err());
    }

    #[test]
    fn empty_candidate_list_fails() {
        assert!(matches!(
            select_candidate(&[], &DeviceSelectionOptions::default()),
            Err(DeviceError::NoSuitableDevice)
        ));
    }

    #[test]
    fn general_family_hands_out_distinct_queues() {
        let families = [family(
            0,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            16,
            true,
        )];

        let assignment = assign_queue_families(&families).unwrap();
        assert_eq!(assignment.slot(QueueRole::Graphics), QueueSlot { family: 0, index: 0 });
        assert_eq!(assignment.slot(QueueRole::Present), QueueSlot { family: 0, index: 1 });
        assert_eq!(assignment.slot(QueueRole::Transfer), QueueSlot { family: 0, index: 2 });
        assert_eq!(assignment.queue_requests(), vec![(0, 3)]);
    }

    #[test]
    fn single_queue_family_is_shared() {
        let families = [family(0, vk::QueueFlags::GRAPHICS, 1, true)];

        let assignment = assign_queue_families(&families).unwrap();
        for role in QueueRole::ALL {
            assert_eq!(assignment.slot(role), QueueSlot { family: 0, index: 0 });
        }
        assert_eq!(assignment.queue_requests(), vec![(0, 1)]);
    }

    #[test]
    fn roles_spread_over_families() {
        let families = [
            family(0, vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER, 1, false),
            family(1, vk::QueueFlags::TRANSFER, 2, true),
        ];

        let assignment = assign_queue_families(&families).unwrap();
        assert_eq!(assignment.family(QueueRole::Graphics), 0);
        assert_eq!(assignment.family(QueueRole::Present), 1);
        assert_eq!(assignment.slot(QueueRole::Transfer), QueueSlot { family: 1, index: 1 });
        assert!(!assignment.shares_family(QueueRole::Graphics, QueueRole::Present));
        assert_eq!(assignment.queue_requests(), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn missing_present_support_is_reported() {
        let families = [family(0, vk::QueueFlags::GRAPHICS, 4, false)];

        assert!(matches!(
            assign_queue_families(&families),
            Err(DeviceError::NoQualifyingQueueFamily(QueueRole::Present))
        ));
    }

    #[test]
    fn missing_graphics_support_is_reported_first() {
        let families = [family(0, vk::QueueFlags::TRANSFER, 1, true)];

        assert!(matches!(
            assign_queue_families(&families),
            Err(DeviceError::NoQualifyingQueueFamily(QueueRole::Graphics))
        ));
    }
}
