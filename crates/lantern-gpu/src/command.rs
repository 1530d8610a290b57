//! Command buffer management.
//!
//! Every command buffer carries a [`RecordingSession`] that tracks the
//! begin/end protocol on the CPU side:
//!
//! ```text
//! Unknown --begin--> Began --end--> Ended --begin--> Began
//!                      |
//!                      +--fail--> Error --reset--> Unknown
//! ```

use std::sync::Arc;

use crate::error::{GpuError, RecordingError, Result};
use ash::vk;

/// CPU-side state of a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    /// Freshly allocated or reset.
    #[default]
    Unknown,
    /// Recording.
    Began,
    /// Recorded and ready to submit.
    Ended,
    /// A command failed mid-recording; only `reset` is allowed.
    Error,
}

/// Tracks the recording state of one command buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingSession {
    state: RecordingState,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// `Unknown | Ended -> Began`.
    pub fn begin(&mut self) -> std::result::Result<(), RecordingError> {
        match self.state {
            RecordingState::Unknown | RecordingState::Ended => {
                self.state = RecordingState::Began;
                Ok(())
            }
            state => Err(RecordingError::InvalidState {
                operation: "begin",
                state,
            }),
        }
    }

    /// `Began -> Ended`.
    pub fn end(&mut self) -> std::result::Result<(), RecordingError> {
        self.ensure_recording("end")?;
        self.state = RecordingState::Ended;
        Ok(())
    }

    /// Mark the buffer unusable until reset.
    pub fn fail(&mut self) {
        self.state = RecordingState::Error;
    }

    /// Whether the buffer must be reset before the next `begin`: every state
    /// but `Unknown`, including a recording abandoned by an aborted upload.
    pub fn needs_reset(&self) -> bool {
        self.state != RecordingState::Unknown
    }

    /// Any state `-> Unknown`.
    pub fn reset(&mut self) {
        self.state = RecordingState::Unknown;
    }

    /// Fail unless the buffer is recording.
    pub fn ensure_recording(&self, operation: &'static str) -> std::result::Result<(), RecordingError> {
        if self.state == RecordingState::Began {
            Ok(())
        } else {
            Err(RecordingError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Validate a draw against `framebuffer_count` without touching the state.
    pub fn prepare_draw(
        &self,
        frame_index: usize,
        framebuffer_count: usize,
    ) -> std::result::Result<(), RecordingError> {
        self.ensure_recording("record")?;
        check_frame_index(frame_index, framebuffer_count)
    }
}

/// Bounds-check a frame index.
pub fn check_frame_index(index: usize, count: usize) -> std::result::Result<(), RecordingError> {
    if index < count {
        Ok(())
    } else {
        Err(RecordingError::FrameIndexOutOfRange { index, count })
    }
}

/// Access masks and stages for one image layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Look up a layout transition in the fixed table.
///
/// Only the upload path is covered: `UNDEFINED -> TRANSFER_DST_OPTIMAL` and
/// `TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL`.
pub fn layout_transition(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> std::result::Result<LayoutTransition, RecordingError> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(LayoutTransition {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(LayoutTransition {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        _ => Err(RecordingError::UnsupportedLayoutTransition { old, new }),
    }
}

/// Command pool for allocating command buffers.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a pool whose buffers can be reset individually.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate primary command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(&self, device: &ash::Device, count: u32) -> Result<Vec<CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = device.allocate_command_buffers(&alloc_info)?;
        Ok(buffers.into_iter().map(CommandBuffer::new).collect())
    }

    /// Destroy the command pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

/// A command buffer with its recording session.
#[derive(Debug)]
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    session: RecordingSession,
}

impl CommandBuffer {
    fn new(handle: vk::CommandBuffer) -> Self {
        Self {
            handle,
            session: RecordingSession::new(),
        }
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn state(&self) -> RecordingState {
        self.session.state()
    }

    /// # Safety
    /// The buffer must not be pending execution.
    pub unsafe fn begin(&mut self, device: &ash::Device, flags: vk::CommandBufferUsageFlags) -> Result<()> {
        self.session.begin()?;
        let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
        if let Err(e) = device.begin_command_buffer(self.handle, &begin_info) {
            self.session.fail();
            return Err(RecordingError::Vulkan(e).into());
        }
        Ok(())
    }

    /// # Safety
    /// The device must be valid.
    pub unsafe fn end(&mut self, device: &ash::Device) -> Result<()> {
        self.session.ensure_recording("end")?;
        if let Err(e) = device.end_command_buffer(self.handle) {
            self.session.fail();
            return Err(RecordingError::Vulkan(e).into());
        }
        self.session.end()?;
        Ok(())
    }

    /// # Safety
    /// The buffer must not be pending execution.
    pub unsafe fn reset(&mut self, device: &ash::Device) -> Result<()> {
        device
            .reset_command_buffer(self.handle, vk::CommandBufferResetFlags::empty())
            .map_err(RecordingError::Vulkan)?;
        self.session.reset();
        Ok(())
    }
}

/// Vertex and index buffers for one indexed draw.
#[derive(Debug, Clone, Copy)]
pub struct DrawGeometry {
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
}

/// Everything [`CommandRecorder::record_draw`] binds for one frame.
#[derive(Debug, Clone, Copy)]
pub struct DrawPass<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffers: &'a [vk::Framebuffer],
    pub descriptor_sets: &'a [vk::DescriptorSet],
    pub pipeline: vk::Pipeline,
    pub pipeline_layout: vk::PipelineLayout,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    /// `None` records a clear-only pass.
    pub geometry: Option<DrawGeometry>,
}

/// Owns the graphics and transfer command pools.
///
/// The graphics pool holds one buffer per in-flight frame slot. The transfer
/// pool holds a single buffer used for blocking uploads.
pub struct CommandRecorder {
    device: Arc<ash::Device>,
    graphics_pool: CommandPool,
    frames: Vec<CommandBuffer>,
    transfer_pool: CommandPool,
    transfer: CommandBuffer,
    transfer_queue: vk::Queue,
}

impl CommandRecorder {
    /// # Safety
    /// The device must be valid and the families must exist on it.
    pub unsafe fn new(
        device: Arc<ash::Device>,
        graphics_family: u32,
        transfer_family: u32,
        transfer_queue: vk::Queue,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let graphics_pool = CommandPool::new(&device, graphics_family)?;
        let frames = match graphics_pool.allocate(&device, frames_in_flight as u32) {
            Ok(frames) => frames,
            Err(e) => {
                graphics_pool.destroy(&device);
                return Err(e);
            }
        };

        let transfer_pool = match CommandPool::new(&device, transfer_family) {
            Ok(pool) => pool,
            Err(e) => {
                graphics_pool.destroy(&device);
                return Err(e);
            }
        };
        let transfer = transfer_pool.allocate(&device, 1).and_then(|mut buffers| {
            buffers
                .pop()
                .ok_or_else(|| GpuError::InvalidState("No transfer command buffer".to_string()))
        });
        let transfer = match transfer {
            Ok(buffer) => buffer,
            Err(e) => {
                transfer_pool.destroy(&device);
                graphics_pool.destroy(&device);
                return Err(e);
            }
        };

        Ok(Self {
            device,
            graphics_pool,
            frames,
            transfer_pool,
            transfer,
            transfer_queue,
        })
    }

    fn frame_mut(&mut self, slot: usize) -> std::result::Result<&mut CommandBuffer, RecordingError> {
        let count = self.frames.len();
        self.frames
            .get_mut(slot)
            .ok_or(RecordingError::FrameIndexOutOfRange { index: slot, count })
    }

    /// Recording state of the buffer for an in-flight slot.
    pub fn state(&self, slot: usize) -> Option<RecordingState> {
        self.frames.get(slot).map(CommandBuffer::state)
    }

    /// Start recording the buffer for `slot`.
    ///
    /// The slot's fence must have been waited on.
    pub fn begin_frame(&mut self, slot: usize) -> Result<()> {
        let device = Arc::clone(&self.device);
        let buffer = self.frame_mut(slot)?;
        if buffer.session.needs_reset() {
            unsafe { buffer.reset(&device)? };
        }
        unsafe { buffer.begin(&device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT) }
    }

    /// Record the render pass for swapchain image `image_index`.
    ///
    /// Fails with [`RecordingError::FrameIndexOutOfRange`] before recording
    /// anything if the image has no framebuffer.
    pub fn record_draw(&mut self, slot: usize, image_index: usize, pass: &DrawPass<'_>) -> Result<()> {
        let device = Arc::clone(&self.device);
        let buffer = self.frame_mut(slot)?;
        buffer
            .session
            .prepare_draw(image_index, pass.framebuffers.len())?;
        let cmd = buffer.handle();

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: pass.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: pass.extent,
        };
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(pass.render_pass)
            .framebuffer(pass.framebuffers[image_index])
            .render_area(render_area)
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: pass.extent.width as f32,
            height: pass.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);

            if let Some(geometry) = pass.geometry {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pass.pipeline);
                device.cmd_set_viewport(cmd, 0, &[viewport]);
                device.cmd_set_scissor(cmd, 0, &[render_area]);
                device.cmd_bind_vertex_buffers(cmd, 0, &[geometry.vertex_buffer], &[0]);
                device.cmd_bind_index_buffer(cmd, geometry.index_buffer, 0, vk::IndexType::UINT32);
                if let Some(&set) = pass.descriptor_sets.get(image_index) {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        pass.pipeline_layout,
                        0,
                        &[set],
                        &[],
                    );
                }
                device.cmd_draw_indexed(cmd, geometry.index_count, 1, 0, 0, 0);
            }

            device.cmd_end_render_pass(cmd);
        }

        Ok(())
    }

    /// Finish recording and return the buffer ready for submission.
    pub fn end_frame(&mut self, slot: usize) -> Result<vk::CommandBuffer> {
        let device = Arc::clone(&self.device);
        let buffer = self.frame_mut(slot)?;
        unsafe { buffer.end(&device)? };
        Ok(buffer.handle())
    }

    /// Return the buffer for `slot` to a resettable state after an aborted frame.
    pub fn recover(&mut self, slot: usize) -> Result<()> {
        let device = Arc::clone(&self.device);
        let buffer = self.frame_mut(slot)?;
        unsafe { buffer.reset(&device) }
    }

    /// Start recording the transfer buffer.
    pub fn begin_transfer(&mut self) -> Result<vk::CommandBuffer> {
        if self.transfer.session.needs_reset() {
            unsafe { self.transfer.reset(&self.device)? };
        }
        unsafe {
            self.transfer
                .begin(&self.device, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        }
        Ok(self.transfer.handle())
    }

    /// End the transfer buffer, submit it and block until the transfer queue is idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn end_transfer(&mut self) -> Result<()> {
        unsafe {
            self.transfer.end(&self.device)?;

            let buffers = [self.transfer.handle()];
            let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);
            if let Err(e) = self
                .device
                .queue_submit(self.transfer_queue, &[submit_info], vk::Fence::null())
            {
                self.transfer.session.fail();
                return Err(RecordingError::Vulkan(e).into());
            }
            self.device.queue_wait_idle(self.transfer_queue)?;
        }
        Ok(())
    }

    /// Record a layout transition barrier for a color image.
    ///
    /// Covers images filled through the transfer buffer, using the fixed
    /// table in [`layout_transition`]. Swapchain and depth attachments change
    /// layout through the render pass instead.
    pub fn transition_image_layout(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> Result<()> {
        let transition = layout_transition(old, new)?;

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access);

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                transition.src_stage,
                transition.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        Ok(())
    }

    /// Destroy both pools and their buffers.
    ///
    /// # Safety
    /// No buffer may be pending execution.
    pub unsafe fn destroy(&self) {
        self.transfer_pool.destroy(&self.device);
        self.graphics_pool.destroy(&self.device);
    }
}

/// Submit one command buffer to a queue.
///
/// # Safety
/// All handles must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn submit_command_buffer(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffer: vk::CommandBuffer,
    wait_semaphore: vk::Semaphore,
    wait_stage: vk::PipelineStageFlags,
    signal_semaphore: vk::Semaphore,
    fence: vk::Fence,
) -> Result<()> {
    let command_buffers = [command_buffer];
    let wait_semaphores = [wait_semaphore];
    let wait_stages = [wait_stage];
    let signal_semaphores = [signal_semaphore];

    let submit_info = vk::SubmitInfo::default()
        .command_buffers(&command_buffers)
        .wait_semaphores(&wait_semaphores)
        .wait_dst_stage_mask(&wait_stages)
        .signal_semaphores(&signal_semaphores);

    device.queue_submit(queue, &[submit_info], fence)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_follows_begin_end_cycle() {
        let mut session = RecordingSession::new();
        assert_eq!(session.state(), RecordingState::Unknown);

        session.begin().unwrap();
        assert_eq!(session.state(), RecordingState::Began);
        session.end().unwrap();
        assert_eq!(session.state(), RecordingState::Ended);

        // Ended buffers may be re-begun.
        session.begin().unwrap();
        assert_eq!(session.state(), RecordingState::Began);
    }

    #[test]
    fn begin_twice_is_rejected() {
        let mut session = RecordingSession::new();
        session.begin().unwrap();

        let err = session.begin().unwrap_err();
        assert!(matches!(
            err,
            RecordingError::InvalidState {
                operation: "begin",
                state: RecordingState::Began
            }
        ));
        assert_eq!(session.state(), RecordingState::Began);
    }

    #[test]
    fn error_state_requires_reset() {
        let mut session = RecordingSession::new();
        session.begin().unwrap();
        session.fail();

        assert!(session.begin().is_err());
        assert!(session.end().is_err());

        session.reset();
        assert_eq!(session.state(), RecordingState::Unknown);
        assert!(session.begin().is_ok());
    }

    #[test]
    fn failed_upload_is_reset_before_next_begin() {
        // Submit failure after `end`.
        let mut session = RecordingSession::new();
        session.begin().unwrap();
        session.end().unwrap();
        session.fail();
        assert!(session.needs_reset());
        session.reset();
        assert!(session.begin().is_ok());

        // Upload abandoned between `begin` and `end`.
        let mut session = RecordingSession::new();
        session.begin().unwrap();
        assert!(session.needs_reset());
        session.reset();
        assert!(session.begin().is_ok());
    }

    #[test]
    fn fresh_and_reset_sessions_need_no_reset() {
        let mut session = RecordingSession::new();
        assert!(!session.needs_reset());
        session.begin().unwrap();
        session.end().unwrap();
        assert!(session.needs_reset());
        session.reset();
        assert!(!session.needs_reset());
    }

    #[test]
    fn end_without_begin_is_rejected() {
        let mut session = RecordingSession::new();
        assert!(session.end().is_err());
        assert_eq!(session.state(), RecordingState::Unknown);
    }

    #[test]
    fn out_of_range_draw_leaves_session_recording() {
        let mut session = RecordingSession::new();
        session.begin().unwrap();

        for index in [3, 4, 100] {
            let err = session.prepare_draw(index, 3).unwrap_err();
            assert!(matches!(
                err,
                RecordingError::FrameIndexOutOfRange { count: 3, .. }
            ));
            assert_eq!(session.state(), RecordingState::Began);
        }

        assert!(session.prepare_draw(2, 3).is_ok());
        assert!(session.end().is_ok());
    }

    #[test]
    fn draw_outside_recording_is_rejected() {
        let session = RecordingSession::new();
        assert!(matches!(
            session.prepare_draw(0, 3),
            Err(RecordingError::InvalidState {
                operation: "record",
                ..
            })
        ));
    }

    #[test]
    fn upload_transitions_are_in_table() {
        let to_dst = layout_transition(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_dst.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);

        let to_read = layout_transition(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn unknown_transition_is_rejected() {
        assert!(matches!(
            layout_transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR),
            Err(RecordingError::UnsupportedLayoutTransition { .. })
        ));
        assert!(layout_transition(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        )
        .is_err());
    }
}
