//! Per-swapchain-image framebuffers, uniform buffers and descriptor sets.
//!
//! Everything here depends on the swapchain extent and image count, so the
//! whole set is destroyed and rebuilt with the swapchain.

use crate::camera::TransformUniforms;
use ash::vk;
use lantern_gpu::command::check_frame_index;
use lantern_gpu::{
    depth_aspect, write_uniform_buffer, RecordingError, DescriptorPool, GpuBuffer, GpuContext, GpuImage, GraphicsPipeline,
    ImageDescriptor, MemoryUsage, Swapchain,
};

/// Resources for one swapchain image.
pub struct FrameSlot {
    pub framebuffer: vk::Framebuffer,
    /// Host-visible and persistently mapped.
    pub uniform: GpuBuffer,
    pub descriptor_set: vk::DescriptorSet,
}

/// Run `create` for every index in `0..count`.
///
/// On failure the entries built so far are returned alongside the error so
/// the caller can release them.
pub fn build_slots<T, E>(
    count: usize,
    mut create: impl FnMut(usize) -> Result<T, E>,
) -> Result<Vec<T>, (Vec<T>, E)> {
    let mut built = Vec::with_capacity(count);
    for index in 0..count {
        match create(index) {
            Ok(item) => built.push(item),
            Err(e) => return Err((built, e)),
        }
    }
    Ok(built)
}

/// The entry for swapchain image `image_index`, bounds-checked against the
/// number of entries.
pub fn slot_for_image<T>(slots: &mut [T], image_index: usize) -> Result<&mut T, RecordingError> {
    check_frame_index(image_index, slots.len())?;
    Ok(&mut slots[image_index])
}

fn release_uniform(gpu: &GpuContext, uniform: &mut GpuBuffer) {
    if let Err(e) = gpu.allocator().lock().free_buffer(uniform) {
        tracing::warn!("Failed to free uniform buffer: {e}");
    }
}

/// Frame slots for the live swapchain plus the shared depth target.
pub struct FrameResources {
    depth: Option<GpuImage>,
    pool: Option<DescriptorPool>,
    slots: Vec<FrameSlot>,
    framebuffers: Vec<vk::Framebuffer>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    extent: vk::Extent2D,
}

impl FrameResources {
    /// Build one slot per swapchain image.
    pub fn create(
        gpu: &GpuContext,
        swapchain: &Swapchain,
        pipeline: &GraphicsPipeline,
    ) -> lantern_gpu::Result<Self> {
        let image_count = swapchain.image_count();
        let mut resources = Self {
            depth: None,
            pool: None,
            slots: Vec::new(),
            framebuffers: Vec::new(),
            descriptor_sets: Vec::new(),
            extent: swapchain.extent,
        };

        match resources.populate(gpu, swapchain, pipeline) {
            Ok(()) => {
                tracing::debug!(
                    "Frame resources: {} slots at {}x{}",
                    image_count,
                    swapchain.extent.width,
                    swapchain.extent.height
                );
                Ok(resources)
            }
            Err(e) => {
                if let Err(cleanup) = resources.destroy(gpu) {
                    tracing::warn!("Cleanup after failed frame resource creation: {cleanup}");
                }
                Err(e)
            }
        }
    }

    fn populate(
        &mut self,
        gpu: &GpuContext,
        swapchain: &Swapchain,
        pipeline: &GraphicsPipeline,
    ) -> lantern_gpu::Result<()> {
        let device = gpu.device();
        let image_count = swapchain.image_count();

        let depth = gpu.allocator().lock().create_image(
            &ImageDescriptor {
                extent: swapchain.extent,
                format: pipeline.depth_format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect: depth_aspect(pipeline.depth_format),
            },
            "depth target",
        )?;
        let depth_view = depth.view;
        self.depth = Some(depth);

        let pool = unsafe { DescriptorPool::for_uniform_buffers(device, image_count as u32) }?;
        let sets = unsafe { pool.allocate(device, pipeline.set_layout, image_count) };
        self.pool = Some(pool);
        let sets = sets?;

        let uniform_size = std::mem::size_of::<TransformUniforms>() as u64;
        let slots = build_slots(image_count, |index| {
            let mut uniform = gpu.allocator().lock().create_buffer(
                uniform_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryUsage::HostVisible,
                &format!("uniforms {index}"),
            )?;
            if let Err(e) = uniform.write(&[TransformUniforms::default()]) {
                release_uniform(gpu, &mut uniform);
                return Err(e);
            }

            let attachments = [swapchain.image_views[index], depth_view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(pipeline.render_pass)
                .attachments(&attachments)
                .width(swapchain.extent.width)
                .height(swapchain.extent.height)
                .layers(1);
            let framebuffer = match unsafe { device.create_framebuffer(&framebuffer_info, None) } {
                Ok(framebuffer) => framebuffer,
                Err(e) => {
                    release_uniform(gpu, &mut uniform);
                    return Err(e.into());
                }
            };

            let descriptor_set = sets[index];
            unsafe {
                write_uniform_buffer(device, descriptor_set, 0, uniform.buffer, 0, uniform_size);
            }

            Ok(FrameSlot {
                framebuffer,
                uniform,
                descriptor_set,
            })
        });

        let slots = match slots {
            Ok(slots) => slots,
            Err((partial, e)) => {
                self.slots = partial;
                return Err(e);
            }
        };

        self.framebuffers = slots.iter().map(|slot| slot.framebuffer).collect();
        self.descriptor_sets = slots.iter().map(|slot| slot.descriptor_set).collect();
        self.slots = slots;
        Ok(())
    }

    /// Number of slots, equal to the swapchain image count.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Framebuffers indexed by swapchain image.
    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    /// Descriptor sets indexed by swapchain image.
    pub fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.descriptor_sets
    }

    /// Write the transform snapshot into the slot for `image_index`.
    ///
    /// No submission that reads this slot may still be in flight.
    pub fn write_uniforms(
        &mut self,
        image_index: usize,
        uniforms: &TransformUniforms,
    ) -> lantern_gpu::Result<()> {
        slot_for_image(&mut self.slots, image_index)?
            .uniform
            .write(std::slice::from_ref(uniforms))
    }

    /// Destroy every slot, the descriptor pool and the depth target.
    ///
    /// The device must be idle.
    pub fn destroy(&mut self, gpu: &GpuContext) -> lantern_gpu::Result<()> {
        let device = gpu.device();
        let mut allocator = gpu.allocator().lock();

        for mut slot in self.slots.drain(..) {
            unsafe { device.destroy_framebuffer(slot.framebuffer, None) };
            allocator.free_buffer(&mut slot.uniform)?;
        }
        self.framebuffers.clear();
        self.descriptor_sets.clear();

        if let Some(pool) = self.pool.take() {
            unsafe { pool.destroy(device) };
        }
        if let Some(mut depth) = self.depth.take() {
            allocator.free_image(&mut depth)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_one_entry_per_image() {
        for n in 1..=4 {
            let slots = build_slots(n, |i| Ok::<_, ()>(i)).unwrap();
            assert_eq!(slots.len(), n);
            assert_eq!(slots, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn image_lookup_is_bounds_checked() {
        for n in 1..=4 {
            let mut slots = build_slots(n, |i| Ok::<_, ()>(i * 10)).unwrap();
            for image in 0..n {
                assert_eq!(*slot_for_image(&mut slots, image).unwrap(), image * 10);
            }

            let err = slot_for_image(&mut slots, n).unwrap_err();
            assert!(matches!(
                err,
                RecordingError::FrameIndexOutOfRange { index, count } if index == n && count == n
            ));
        }
    }

    #[test]
    fn empty_slot_table_rejects_every_image() {
        let mut slots: Vec<u32> = Vec::new();
        assert!(matches!(
            slot_for_image(&mut slots, 0),
            Err(RecordingError::FrameIndexOutOfRange { index: 0, count: 0 })
        ));
    }

    #[test]
    fn failure_returns_partial_entries() {
        let (partial, err) = build_slots(4, |i| if i == 2 { Err("boom") } else { Ok(i) }).unwrap_err();
        assert_eq!(partial, vec![0, 1]);
        assert_eq!(err, "boom");
    }
}
