//! Error types for the frame pipeline.

use crate::scheduler::SchedulerState;
use lantern_gpu::{GpuError, Severity};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the render layer.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// A shader blob could not be read from disk.
    #[error("Failed to read shader {path}: {source}")]
    Shader {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An operation was called in a scheduler state that does not allow it.
    #[error("Cannot {operation} while the scheduler is {state:?}")]
    SchedulerState {
        operation: &'static str,
        state: SchedulerState,
    },
}

impl RenderError {
    /// Classify this error for the frame loop.
    ///
    /// Shader and scheduler state errors only happen outside the frame loop
    /// and are always fatal.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Gpu(e) => e.severity(),
            Self::Shader { .. } | Self::SchedulerState { .. } => Severity::Fatal,
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;
    use lantern_gpu::RecordingError;

    #[test]
    fn gpu_severity_passes_through() {
        let stale = RenderError::from(GpuError::PresentationStale);
        assert_eq!(stale.severity(), Severity::Recoverable);

        let out_of_range = RenderError::from(GpuError::from(RecordingError::FrameIndexOutOfRange {
            index: 4,
            count: 3,
        }));
        assert_eq!(out_of_range.severity(), Severity::FrameAbort);
    }

    #[test]
    fn shader_errors_are_fatal() {
        let err = RenderError::Shader {
            path: PathBuf::from("missing.spv"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert_eq!(err.severity(), Severity::Fatal);
        assert!(err.to_string().contains("missing.spv"));
    }
}
