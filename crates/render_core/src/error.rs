//! Error types for the Vulkan core
//!
//! Every fallible operation returns [`VulkanResult`]. Errors carry enough
//! context to be logged once at the top level, and [`VulkanError::kind`]
//! tells the caller whether the failure is fatal or something the frame loop
//! is expected to absorb.

use ash::vk;
use thiserror::Error;

/// How the caller is expected to react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Object creation failed or the hardware lacks a required capability.
    /// Unrecoverable for this run.
    SetupFatal,
    /// The presentation surface no longer matches the swapchain.
    /// Handled by rebuilding the swapchain.
    TransientSurfaceState,
    /// The core was driven in a way its state machine forbids.
    ProgrammingInvariantViolation,
}

/// Memory allocation failures
#[derive(Error, Debug)]
pub enum AllocationError {
    /// No memory type satisfies both the driver's filter and the requested flags
    #[error("No memory type matches filter {type_filter:#034b} with properties {properties:?}")]
    NoSuitableMemoryType {
        /// Bitmask of acceptable memory type indices reported by the driver
        type_filter: u32,
        /// Property flags the caller asked for
        properties: vk::MemoryPropertyFlags,
    },

    /// The driver refused the allocation call
    #[error("Memory allocation of {size} bytes rejected: {result:?}")]
    Rejected {
        /// Requested allocation size
        size: vk::DeviceSize,
        /// Result code returned by the driver
        result: vk::Result,
    },
}

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Buffer or image memory could not be provided
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    /// Format lacks a feature an operation depends on
    #[error("Format {format:?} does not support {feature}")]
    UnsupportedFormat {
        /// The offending format
        format: vk::Format,
        /// Human readable name of the missing feature
        feature: &'static str,
    },

    /// Command buffer recording was attempted in an illegal state
    #[error("Recording error: {0}")]
    Recording(String),

    /// Surface is out of date for the current swapchain, or has no area to
    /// build one
    #[error("Surface out of date")]
    SurfaceStale,

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },
}

impl VulkanError {
    /// Classify the error for the caller
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api(result) if is_stale_surface(*result) => ErrorKind::TransientSurfaceState,
            Self::SurfaceStale => ErrorKind::TransientSurfaceState,
            Self::Recording(_) | Self::InvalidOperation { .. } => {
                ErrorKind::ProgrammingInvariantViolation
            }
            Self::Api(_)
            | Self::InitializationFailed(_)
            | Self::Allocation(_)
            | Self::UnsupportedFormat { .. } => ErrorKind::SetupFatal,
        }
    }

    /// Shorthand for [`VulkanError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }
}

/// Result codes that mean "rebuild the swapchain" rather than "give up"
pub(crate) fn is_stale_surface(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR
    )
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_date_is_transient() {
        let err = VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert_eq!(err.kind(), ErrorKind::TransientSurfaceState);
        assert_eq!(VulkanError::SurfaceStale.kind(), ErrorKind::TransientSurfaceState);
    }

    #[test]
    fn test_device_lost_is_fatal() {
        let err = VulkanError::Api(vk::Result::ERROR_DEVICE_LOST);
        assert_eq!(err.kind(), ErrorKind::SetupFatal);
    }

    #[test]
    fn test_allocation_error_converts() {
        let err: VulkanError = AllocationError::NoSuitableMemoryType {
            type_filter: 0b101,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::SetupFatal);
        assert!(err.to_string().contains("No memory type"));
    }

    #[test]
    fn test_recording_is_invariant_violation() {
        let err = VulkanError::Recording("slot still submitted".to_string());
        assert_eq!(err.kind(), ErrorKind::ProgrammingInvariantViolation);
    }
}
