//! Vulkan implementation of [`FrameBackend`].

use crate::camera::TransformUniforms;
use crate::error::Result;
use crate::frame_resources::FrameResources;
use crate::mesh::{MeshBuffers, MeshKind, Vertex};
use crate::scheduler::FrameBackend;
use crate::shaders::ShaderBlob;
use ash::vk;
use lantern_gpu::{
    find_depth_format, AcquiredImage, CommandRecorder, DescriptorSetLayoutBuilder, DrawPass,
    FrameSync, FrameSyncManager, GpuContext, GraphicsPipeline, GraphicsPipelineBuilder,
    MemoryStats, QueueRole, RecordingError, RenderPassDescriptor, ShaderStageKind,
    SwapchainManager,
};
use tracing::{debug, info, warn};

/// How long acquire may block before the frame is dropped.
const ACQUIRE_TIMEOUT_NS: u64 = 1_000_000_000;

/// Renderer settings.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub vsync: bool,
    /// Frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
    pub initial_mesh: MeshKind,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            frames_in_flight: 2,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            initial_mesh: MeshKind::Triangle,
        }
    }
}

/// Vertex and fragment SPIR-V for the mesh pipeline.
#[derive(Debug, Clone)]
pub struct ShaderSet {
    pub vertex: ShaderBlob,
    pub fragment: ShaderBlob,
}

/// Owns every GPU object the frame loop touches.
///
/// Field order matters for teardown: the context is dropped last.
pub struct Renderer {
    swapchains: SwapchainManager,
    pipeline: GraphicsPipeline,
    frames: FrameResources,
    recorder: CommandRecorder,
    sync: FrameSyncManager,
    mesh: MeshBuffers,
    recorded: Vec<Option<vk::CommandBuffer>>,
    shaders: ShaderSet,
    clear_color: [f32; 4],
    shut_down: bool,
    gpu: GpuContext,
}

impl Renderer {
    /// Build the swapchain, pipeline, frame resources and mesh buffers.
    pub fn new(
        gpu: GpuContext,
        window_extent: vk::Extent2D,
        shaders: ShaderSet,
        config: &RendererConfig,
    ) -> Result<Self> {
        let frames_in_flight = config.frames_in_flight.max(1);
        let device = gpu.device();

        let mut swapchains = SwapchainManager::new(&gpu, config.vsync);
        let details = swapchains.query_capabilities(&gpu)?;
        let color_format = swapchains.create(&gpu, &details, window_extent)?.format;

        let pipeline = match build_pipeline(&gpu, color_format, &shaders) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                swapchains.destroy(device);
                return Err(e.into());
            }
        };

        let recorder = unsafe {
            CommandRecorder::new(
                gpu.device_arc(),
                gpu.queue_family(QueueRole::Graphics),
                gpu.queue_family(QueueRole::Transfer),
                gpu.queue(QueueRole::Transfer),
                frames_in_flight,
            )
        };
        let mut recorder = match recorder {
            Ok(recorder) => recorder,
            Err(e) => {
                unsafe { pipeline.destroy(device) };
                swapchains.destroy(device);
                return Err(e.into());
            }
        };

        let sync = match unsafe { FrameSyncManager::new(device, frames_in_flight) } {
            Ok(sync) => sync,
            Err(e) => {
                unsafe {
                    recorder.destroy();
                    pipeline.destroy(device);
                }
                swapchains.destroy(device);
                return Err(e.into());
            }
        };

        let built = swapchains
            .current()
            .and_then(|swapchain| FrameResources::create(&gpu, swapchain, &pipeline))
            .and_then(|mut frames| {
                let mut allocator = gpu.allocator().lock();
                match MeshBuffers::upload(&mut allocator, &mut recorder, config.initial_mesh) {
                    Ok(mesh) => Ok((frames, mesh)),
                    Err(e) => {
                        drop(allocator);
                        if let Err(cleanup) = frames.destroy(&gpu) {
                            warn!("Cleanup after failed mesh upload: {cleanup}");
                        }
                        Err(e)
                    }
                }
            });
        let (frames, mesh) = match built {
            Ok(built) => built,
            Err(e) => {
                unsafe {
                    sync.destroy(device);
                    recorder.destroy();
                    pipeline.destroy(device);
                }
                swapchains.destroy(device);
                return Err(e.into());
            }
        };

        info!(
            "Renderer ready: {} in flight, {} swapchain images, mesh {}",
            frames_in_flight,
            frames.len(),
            mesh.kind()
        );

        Ok(Self {
            swapchains,
            pipeline,
            frames,
            recorder,
            sync,
            mesh,
            recorded: vec![None; frames_in_flight],
            shaders,
            clear_color: config.clear_color,
            shut_down: false,
            gpu,
        })
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    fn frame_sync(&self, slot: usize) -> lantern_gpu::Result<&FrameSync> {
        self.sync.get(slot).ok_or_else(|| {
            RecordingError::FrameIndexOutOfRange {
                index: slot,
                count: self.sync.len(),
            }
            .into()
        })
    }

    /// Rebuild the pipeline when the new swapchain uses another color format.
    fn refresh_pipeline(&mut self, color_format: vk::Format) -> lantern_gpu::Result<()> {
        if color_format == self.pipeline.color_format {
            return Ok(());
        }
        debug!(
            "Swapchain format changed {:?} -> {:?}, rebuilding pipeline",
            self.pipeline.color_format, color_format
        );
        let pipeline = build_pipeline(&self.gpu, color_format, &self.shaders)?;
        let old = std::mem::replace(&mut self.pipeline, pipeline);
        unsafe { old.destroy(self.gpu.device()) };
        Ok(())
    }
}

/// Descriptor-set layout plus the fixed mesh pipeline.
fn build_pipeline(
    gpu: &GpuContext,
    color_format: vk::Format,
    shaders: &ShaderSet,
) -> lantern_gpu::Result<GraphicsPipeline> {
    let device = gpu.device();
    let depth_format = unsafe { find_depth_format(gpu.instance(), gpu.physical_device()) }?;

    let set_layout = unsafe {
        DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(device)
    }?;

    let mut builder = GraphicsPipelineBuilder::new(device);
    let stages = builder
        .load_shader_stage(shaders.vertex.bytes(), ShaderStageKind::Vertex)
        .and_then(|_| builder.load_shader_stage(shaders.fragment.bytes(), ShaderStageKind::Fragment));
    if let Err(e) = stages {
        unsafe { device.destroy_descriptor_set_layout(set_layout, None) };
        return Err(e);
    }

    builder.build(
        &RenderPassDescriptor {
            color_format,
            depth_format,
        },
        &Vertex::layout(),
        set_layout,
    )
}

impl FrameBackend for Renderer {
    fn frames_in_flight(&self) -> usize {
        self.sync.len()
    }

    fn image_count(&self) -> usize {
        self.frames.len()
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_for_slot(&mut self, slot: usize) -> lantern_gpu::Result<()> {
        let sync = self.frame_sync(slot)?;
        unsafe { sync.wait(self.gpu.device()) }
    }

    fn acquire(&mut self, slot: usize) -> lantern_gpu::Result<AcquiredImage> {
        let semaphore = self.frame_sync(slot)?.image_available;
        let swapchain = self.swapchains.current()?;
        unsafe { swapchain.acquire_next_image(self.swapchains.loader(), semaphore, ACQUIRE_TIMEOUT_NS) }
    }

    fn update_uniforms(&mut self, image: usize, uniforms: &TransformUniforms) -> lantern_gpu::Result<()> {
        self.frames.write_uniforms(image, uniforms)
    }

    fn record(&mut self, slot: usize, image: usize) -> lantern_gpu::Result<()> {
        let pass = DrawPass {
            render_pass: self.pipeline.render_pass,
            framebuffers: self.frames.framebuffers(),
            descriptor_sets: self.frames.descriptor_sets(),
            pipeline: self.pipeline.pipeline,
            pipeline_layout: self.pipeline.layout,
            extent: self.frames.extent(),
            clear_color: self.clear_color,
            geometry: self.mesh.geometry(),
        };

        self.recorder.begin_frame(slot)?;
        self.recorder.record_draw(slot, image, &pass)?;
        let cmd = self.recorder.end_frame(slot)?;
        if let Some(recorded) = self.recorded.get_mut(slot) {
            *recorded = Some(cmd);
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize, _image: usize) -> lantern_gpu::Result<()> {
        let cmd = self
            .recorded
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or(RecordingError::InvalidState {
                operation: "submit",
                state: self.recorder.state(slot).unwrap_or_default(),
            })?;
        let sync = self.frame_sync(slot)?;
        let device = self.gpu.device();

        unsafe {
            sync.reset(device)?;
            lantern_gpu::submit_command_buffer(
                device,
                self.gpu.queue(QueueRole::Graphics),
                cmd,
                sync.image_available,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                sync.render_finished,
                sync.in_flight,
            )
        }
    }

    fn present(&mut self, slot: usize, image: usize) -> lantern_gpu::Result<bool> {
        let render_finished = self.frame_sync(slot)?.render_finished;
        let swapchain = self.swapchains.current()?;
        unsafe {
            swapchain.present(
                self.swapchains.loader(),
                self.gpu.queue(QueueRole::Present),
                image as u32,
                &[render_finished],
            )
        }
    }

    fn abort_frame(&mut self, slot: usize) -> lantern_gpu::Result<()> {
        self.recorder.recover(slot)?;
        if let Some(recorded) = self.recorded.get_mut(slot) {
            *recorded = None;
        }

        // An empty batch consumes the acquire semaphore and signals the fence
        // so the slot can be waited on like any other.
        let sync = self.frame_sync(slot)?;
        let device = self.gpu.device();
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages);
        unsafe {
            sync.reset(device)?;
            device.queue_submit(
                self.gpu.queue(QueueRole::Graphics),
                &[submit_info],
                sync.in_flight,
            )?;
        }
        Ok(())
    }

    fn rebuild(&mut self, extent: vk::Extent2D) -> lantern_gpu::Result<()> {
        self.gpu.wait_idle()?;
        self.frames.destroy(&self.gpu)?;
        self.recorded.fill(None);

        let color_format = self.swapchains.recreate(&self.gpu, extent)?.format;
        self.refresh_pipeline(color_format)?;

        let swapchain = self.swapchains.current()?;
        self.frames = FrameResources::create(&self.gpu, swapchain, &self.pipeline)?;
        Ok(())
    }

    fn replace_mesh(&mut self, kind: MeshKind) -> lantern_gpu::Result<()> {
        let mut allocator = self.gpu.allocator().lock();
        self.mesh.destroy(&mut allocator)?;
        self.mesh = MeshBuffers::upload(&mut allocator, &mut self.recorder, kind)?;
        Ok(())
    }

    fn wait_idle(&mut self) -> lantern_gpu::Result<()> {
        self.gpu.wait_idle()
    }

    fn mesh_counts(&self) -> (MeshKind, u32, u32) {
        (
            self.mesh.kind(),
            self.mesh.vertex_count(),
            self.mesh.index_count(),
        )
    }

    fn memory_stats(&self) -> MemoryStats {
        self.gpu.allocator().lock().stats()
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if let Err(e) = self.gpu.wait_idle() {
            warn!("Failed to wait idle before teardown: {e}");
        }
        let device = self.gpu.device();

        if let Err(e) = self.frames.destroy(&self.gpu) {
            warn!("Failed to free frame resources: {e}");
        }
        if let Err(e) = self.mesh.destroy(&mut self.gpu.allocator().lock()) {
            warn!("Failed to free mesh buffers: {e}");
        }
        unsafe {
            self.pipeline.destroy(device);
            self.recorder.destroy();
            self.sync.destroy(device);
        }
        self.swapchains.destroy(device);
        info!("Renderer resources released");
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
