//! Error types for surfvox.

use thiserror::Error;

/// The main error type for surfvox operations.
///
/// Every variant except the I/O and JSON ones belongs to the fatal tier: a
/// broken device pairing or a misconfigured session. Lossy binning behavior
/// (full bins, off-screen particles) is never reported through this type.
#[derive(Error, Debug)]
pub enum SurfvoxError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Data size mismatch.
    #[error("data size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// The volume bounds collapse on at least one axis.
    #[error("degenerate volume bounds on the {axis} axis")]
    DegenerateBounds { axis: char },

    /// A volume target has already been registered with this context.
    #[error("a volume target is already registered")]
    VolumeAlreadyRegistered,

    /// No volume target has been registered yet.
    #[error("no volume target registered")]
    VolumeNotRegistered,

    /// The mesh registry is full.
    #[error("mesh registry full: at most {max} meshes can be registered")]
    MeshCapacityExceeded { max: usize },

    /// Shared objects are already held by the compute side.
    #[error("shared objects are already acquired by compute")]
    AlreadyAcquired,

    /// A release was attempted without a matching acquire.
    #[error("shared objects are not acquired by compute")]
    NotAcquired,

    /// A graphics-owned object could not be shared with compute.
    #[error("interop error: {0}")]
    Interop(String),

    /// Kernel argument binding failed.
    #[error("kernel argument error: {0}")]
    KernelArgs(String),

    /// A kernel dispatch or device-side copy could not be enqueued.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Device or backend error reported by the rendering layer.
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// A specialized Result type for surfvox operations.
pub type Result<T> = std::result::Result<T, SurfvoxError>;
