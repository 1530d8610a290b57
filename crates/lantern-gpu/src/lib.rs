//! Vulkan abstraction layer for the Lantern renderer.
//!
//! This crate provides:
//! - Instance creation, validation output and surface handling
//! - GPU selection and queue family assignment
//! - Memory allocation via gpu-allocator
//! - Swapchain negotiation and rebuilds
//! - Render pass and graphics pipeline construction
//! - Command recording with a tracked begin/end protocol
//! - Per-frame synchronization objects

pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use capabilities::{GpuVendor, PhysicalDeviceCandidate, QueueFamilyInfo};
pub use command::{
    layout_transition, submit_command_buffer, CommandRecorder, DrawGeometry, DrawPass,
    RecordingSession, RecordingState,
};
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{write_uniform_buffer, DescriptorPool, DescriptorSetLayoutBuilder};
pub use device::{
    assign_queue_families, select_candidate, DeviceQueues, DeviceSelectionOptions,
    DeviceSelector, QueueFamilyAssignment, QueueRole, QueueSlot, SelectedDevice,
};
pub use error::{
    DeviceError, GpuError, PipelineError, RecordingError, ResourceError, Result, Severity,
    SurfaceError,
};
pub use memory::{
    select_memory_type, GpuBuffer, GpuImage, ImageDescriptor, MemoryStats, MemoryUsage,
    ResourceAllocator,
};
pub use pipeline::{
    depth_aspect, find_depth_format, probe_depth_format, GraphicsPipeline, GraphicsPipelineBuilder,
    RenderPassDescriptor, ShaderStage, ShaderStageKind, VertexLayout, DEPTH_FORMAT_CANDIDATES,
};
pub use surface::{SurfaceContext, SurfaceDetails};
pub use swapchain::{AcquiredImage, Swapchain, SwapchainManager, SwapchainPlan};
pub use sync::{create_fence, create_semaphore, FrameSync, FrameSyncManager, InFlightTracker};
