//! GPU error types.
//!
//! Errors are grouped by the subsystem that raises them. [`GpuError::severity`]
//! tells the frame loop whether an error ends the process, aborts the current
//! frame, or only asks for a swapchain rebuild.

use ash::vk;
use thiserror::Error;

use crate::command::RecordingState;
use crate::device::QueueRole;

/// Device selection and creation errors. Always fatal.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The Vulkan loader or instance could not be set up.
    #[error("Failed to initialize Vulkan: {0}")]
    Loader(String),

    /// No candidate passed the selection rules.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// The selected GPU has no queue family for a required role.
    #[error("No queue family supports the {0} role")]
    NoQualifyingQueueFamily(QueueRole),

    /// `vkCreateDevice` failed.
    #[error("Logical device creation failed: {0}")]
    Creation(vk::Result),
}

/// Surface and swapchain negotiation errors.
#[derive(Error, Debug)]
pub enum SurfaceError {
    /// The surface reports nothing we can build a swapchain from.
    #[error("Unsupported surface: {0}")]
    UnsupportedSurface(String),

    /// Surface or swapchain object creation failed.
    #[error("Surface creation failed: {0}")]
    Creation(String),
}

/// Buffer, image and memory errors.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// No memory type matches both the type filter and the property mask.
    #[error("No compatible memory type (type bits {type_bits:#b}, properties {properties:?})")]
    NoCompatibleMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// The sub-allocator refused the request.
    #[error("Memory allocation failed: {0}")]
    Allocation(String),

    /// Binding memory to a freshly created buffer or image failed.
    #[error("Memory binding failed: {0}")]
    Bind(vk::Result),

    /// The buffer is not host-visible.
    #[error("Buffer is not mapped")]
    NotMapped,

    /// A write or copy would run past the end of a buffer.
    #[error("Range {offset}..{end} exceeds buffer size {size}")]
    OutOfBounds { offset: u64, end: u64, size: u64 },

    /// The allocator was already shut down.
    #[error("Allocator has been shut down")]
    AllocatorShutdown,
}

/// Shader and pipeline construction errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// None of the depth candidates can back a depth attachment.
    #[error("No supported depth format")]
    NoSupportedDepthFormat,

    /// The bytecode blob is not valid SPIR-V.
    #[error("Invalid shader bytecode: {0}")]
    InvalidShader(String),

    /// `vkCreateShaderModule` failed.
    #[error("Shader module creation failed: {0}")]
    ShaderModule(vk::Result),

    /// A required shader stage was never loaded.
    #[error("Missing {0:?} shader stage")]
    MissingStage(vk::ShaderStageFlags),

    /// Render pass, layout or pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    Creation(vk::Result),
}

/// Command recording errors.
#[derive(Error, Debug)]
pub enum RecordingError {
    /// The command buffer is not in a state that allows the operation.
    #[error("Cannot {operation} a command buffer in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: RecordingState,
    },

    /// The frame index has no framebuffer.
    #[error("Frame index {index} out of range ({count} framebuffers)")]
    FrameIndexOutOfRange { index: usize, count: usize },

    /// The layout pair is not in the transition table.
    #[error("Unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// A begin/end/reset/submit call failed.
    #[error("Command buffer operation failed: {0}")]
    Vulkan(vk::Result),
}

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    /// The swapchain no longer matches the surface and must be rebuilt.
    #[error("Swapchain is out of date")]
    PresentationStale,

    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// How the frame loop must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Stop rendering and exit.
    Fatal,
    /// Drop the current frame, reset the command buffer, keep running.
    FrameAbort,
    /// Rebuild the swapchain; not reported to the user.
    Recoverable,
}

impl GpuError {
    /// Classify this error for the frame loop.
    pub fn severity(&self) -> Severity {
        match self {
            Self::PresentationStale
            | Self::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR) => {
                Severity::Recoverable
            }
            Self::Recording(RecordingError::UnsupportedLayoutTransition { .. }) => Severity::Fatal,
            Self::Recording(_) | Self::Vulkan(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                Severity::FrameAbort
            }
            _ => Severity::Fatal,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_swapchain_is_recoverable() {
        assert_eq!(GpuError::PresentationStale.severity(), Severity::Recoverable);
        assert_eq!(
            GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR).severity(),
            Severity::Recoverable
        );
    }

    #[test]
    fn recording_errors_abort_the_frame() {
        let err = GpuError::from(RecordingError::FrameIndexOutOfRange { index: 4, count: 3 });
        assert_eq!(err.severity(), Severity::FrameAbort);
    }

    #[test]
    fn unknown_layout_transition_is_fatal() {
        let err = GpuError::from(RecordingError::UnsupportedLayoutTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        });
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[test]
    fn device_and_resource_errors_are_fatal() {
        assert_eq!(
            GpuError::from(DeviceError::NoSuitableDevice).severity(),
            Severity::Fatal
        );
        assert_eq!(
            GpuError::from(ResourceError::AllocatorShutdown).severity(),
            Severity::Fatal
        );
        assert_eq!(
            GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST).severity(),
            Severity::Fatal
        );
    }
}
