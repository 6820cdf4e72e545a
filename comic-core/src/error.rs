//! Error types for the page model, the image library and template resolution.

use thiserror::Error;

/// Result type for page-collection operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for template resolution.
pub type LayoutResult<T> = Result<T, LayoutError>;

/// Result type for image-library operations.
pub type LibraryResult<T> = Result<T, LibraryError>;

/// Errors raised by [`crate::PageCollection`] operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No page exists at the given index.
    #[error("Page not found: {0}")]
    PageNotFound(usize),

    /// The page is locked and the operation would change its layout.
    #[error("Page {0} is locked")]
    PageLocked(usize),

    /// The image is not part of the library.
    #[error("Unknown image: {0}")]
    UnknownImage(String),

    /// A color string could not be parsed.
    #[error("Invalid color: {0}")]
    InvalidColor(String),

    /// Slot identifiers must be non-empty.
    #[error("Invalid slot id: {0:?}")]
    InvalidSlot(String),

    /// Page data could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while loading or resolving layout templates.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// No template is registered under this name.
    #[error("Template not found: {0}")]
    UnknownTemplate(String),

    /// The template markup could not be parsed.
    #[error("Markup error in {template}: {message}")]
    Markup {
        /// Template name.
        template: String,
        /// What went wrong.
        message: String,
    },

    /// A `clip-path` value did not follow the `polygon(...)` grammar.
    #[error("Invalid clip path {0:?}")]
    ClipPath(String),

    /// Geometry could not be computed (zero-sized layout, missing panel box).
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Reading templates from disk failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the image library.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The file type is not one of the accepted image types.
    #[error("Unsupported image type: {0}")]
    UnsupportedType(String),

    /// The upload exceeds the size limit.
    #[error("Image {name} is {size} bytes, limit is {limit}")]
    TooLarge {
        /// File name.
        name: String,
        /// Size in bytes.
        size: u64,
        /// Maximum accepted size in bytes.
        limit: u64,
    },

    /// The image is not in the library.
    #[error("Unknown image: {0}")]
    UnknownImage(String),

    /// The image is already placed in a panel and cannot be selected.
    #[error("Image already assigned: {0}")]
    AlreadyAssigned(String),

    /// Image names must be non-empty.
    #[error("Empty image name")]
    EmptyName,
}
