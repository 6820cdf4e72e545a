//! Renderer error types.

use comic_core::LayoutError;
use thiserror::Error;

/// Result type for renderer operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors that can occur while compositing or exporting.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Export cannot start: zero-size layout, missing image, nothing to export.
    #[error("Export precondition failed: {0}")]
    Precondition(String),

    /// Image bytes could not be decoded.
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Raster allocation or drawing failed.
    #[error("Raster error: {0}")]
    Raster(String),

    /// Encoding to an output format failed.
    #[error("Export failed: {0}")]
    Export(String),

    /// Silhouette overlay could not be fetched or stored.
    #[error("Overlay error: {0}")]
    Overlay(String),

    /// Template resolution failed.
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

impl RenderError {
    /// Map a layout error, turning geometry failures into precondition
    /// failures so callers can report them as such.
    #[must_use]
    pub fn from_measure(err: LayoutError) -> Self {
        match err {
            LayoutError::Geometry(message) => Self::Precondition(message),
            other => Self::Layout(other),
        }
    }
}
