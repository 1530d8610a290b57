//! Synchronization primitives.

use crate::error::Result;
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_for_fence(device: &ash::Device, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
    device.wait_for_fences(&[fence], true, timeout_ns)?;
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// Synchronization objects for one in-flight frame.
pub struct FrameSync {
    /// Signaled when the acquired image is ready to be rendered to
    pub image_available: vk::Semaphore,
    /// Signaled when rendering is complete
    pub render_finished: vk::Semaphore,
    /// Signaled when the GPU has finished the frame's submission
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let image_available = create_semaphore(device)?;
        let render_finished = match create_semaphore(device) {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_semaphore(image_available, None);
                return Err(e);
            }
        };
        let in_flight = match create_fence(device, true) {
            Ok(fence) => fence,
            Err(e) => {
                device.destroy_semaphore(image_available, None);
                device.destroy_semaphore(render_finished, None);
                return Err(e);
            }
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }

    /// Block until the frame's last submission has finished.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        wait_for_fence(device, self.in_flight, u64::MAX)
    }

    /// # Safety
    /// The device must be valid and the fence must not be pending.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        reset_fence(device, self.in_flight)
    }

    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.in_flight, None);
    }
}

/// One [`FrameSync`] per in-flight frame.
///
/// Sized by the in-flight cap, not by the swapchain image count.
pub struct FrameSyncManager {
    frame_syncs: Vec<FrameSync>,
}

impl FrameSyncManager {
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, frames_in_flight: usize) -> Result<Self> {
        let mut manager = Self {
            frame_syncs: Vec::with_capacity(frames_in_flight),
        };
        for _ in 0..frames_in_flight {
            match FrameSync::new(device) {
                Ok(sync) => manager.frame_syncs.push(sync),
                Err(e) => {
                    manager.destroy(device);
                    return Err(e);
                }
            }
        }

        Ok(manager)
    }

    /// Sync objects for an in-flight slot.
    pub fn get(&self, slot: usize) -> Option<&FrameSync> {
        self.frame_syncs.get(slot)
    }

    pub fn len(&self) -> usize {
        self.frame_syncs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_syncs.is_empty()
    }

    /// # Safety
    /// The device must be valid and all resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for sync in &self.frame_syncs {
            sync.destroy(device);
        }
    }
}

/// CPU-side bookkeeping of which in-flight slots have unobserved submissions.
///
/// The slot for frame `f` is `f % slot_count`. A slot is pending from
/// [`mark_submitted`](Self::mark_submitted) until its fence is observed
/// through [`wait_slot`](Self::wait_slot). Each swapchain image remembers the
/// slot that last rendered to it so its frame slot is not rewritten while
/// that submission may still read it.
#[derive(Debug, Clone)]
pub struct InFlightTracker {
    frame_counter: u64,
    pending: Vec<bool>,
    image_owner: Vec<Option<usize>>,
}

impl InFlightTracker {
    /// `slot_count` must be at least one.
    pub fn new(slot_count: usize, image_count: usize) -> Self {
        Self {
            frame_counter: 0,
            pending: vec![false; slot_count.max(1)],
            image_owner: vec![None; image_count],
        }
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn slot_count(&self) -> usize {
        self.pending.len()
    }

    /// Slot for the current frame.
    pub fn current_slot(&self) -> usize {
        (self.frame_counter % self.pending.len() as u64) as usize
    }

    pub fn is_pending(&self, slot: usize) -> bool {
        self.pending.get(slot).copied().unwrap_or(false)
    }

    /// Slot whose submission last used `image`, if still pending.
    pub fn pending_owner(&self, image: usize) -> Option<usize> {
        self.image_owner
            .get(image)
            .copied()
            .flatten()
            .filter(|&slot| self.is_pending(slot))
    }

    /// Wait for `slot` through `wait` if it is pending, then mark it complete.
    pub fn wait_slot<E>(
        &mut self,
        slot: usize,
        wait: impl FnOnce(usize) -> std::result::Result<(), E>,
    ) -> std::result::Result<(), E> {
        if self.is_pending(slot) {
            wait(slot)?;
            self.pending[slot] = false;
        }
        Ok(())
    }

    /// Record a submission from `slot` rendering to `image`.
    pub fn mark_submitted(&mut self, slot: usize, image: usize) {
        if let Some(pending) = self.pending.get_mut(slot) {
            *pending = true;
        }
        if let Some(owner) = self.image_owner.get_mut(image) {
            *owner = Some(slot);
        }
    }

    /// Move to the next frame.
    pub fn advance(&mut self) {
        self.frame_counter += 1;
    }

    /// Forget every submission after the device went idle.
    pub fn clear(&mut self) {
        self.pending.fill(false);
        self.image_owner.fill(None);
    }

    /// Resize the image table after a swapchain rebuild.
    ///
    /// Only valid once the device is idle.
    pub fn reset_images(&mut self, image_count: usize) {
        self.clear();
        self.image_owner.resize(image_count, None);
    }
}
