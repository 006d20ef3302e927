//! Error Types
//!
//! The crate-wide error enum and `Result` alias. Parse and build errors
//! surface through `Result`; process-time failures (a shader still
//! compiling, a missing referenced resource) are logged by the owning
//! node, which skips the frame and retries on the next one.

use thiserror::Error;

/// The main error type of the renderer core.
#[derive(Error, Debug)]
pub enum RendererError {
    // ========================================================================
    // Asset / parse errors — the whole graph load fails
    // ========================================================================
    /// Malformed frame-graph document or an unknown enum value in it.
    #[error("Failed to parse frame graph asset: {0}")]
    Parse(#[from] serde_json::Error),

    /// Malformed companion document (star colour table, particle header).
    #[error("Failed to parse companion asset: {0}")]
    ParseCompanion(#[from] serde_yaml::Error),

    /// A companion file the asset references could not be read.
    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    // ========================================================================
    // Build / RHI errors — fatal to the frame
    // ========================================================================
    /// A referenced resource is missing where the build cannot continue.
    #[error("Missing resource: {0}")]
    MissingResource(String),

    /// Device allocation or submission failure.
    #[error("RHI failure: {0}")]
    Rhi(String),
}

pub type Result<T> = std::result::Result<T, RendererError>;
