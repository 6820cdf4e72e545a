//! # Comic Renderer
//!
//! Offscreen compositing and export for comic pages.
//!
//! ## Pipeline
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ decode_all   │──►│ compose_page │──►│ polygon mask │──►│ PageExporter │
//! │ (blocking    │   │ gutter, clip │   │ pass + gutter│   │ PNG / JPEG / │
//! │  pool)       │   │ bg, image    │   │ silhouette   │   │ 2-up PDF     │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod compositor;
pub mod decode;
pub mod error;
pub mod export;
pub mod mask;
pub mod silhouette;

pub use cache::{CacheStats, ImageCache, ImageCacheConfig};
pub use compositor::{compose_page, compose_pages, CompositorConfig, ResolvedPage, EXPORT_SCALE};
pub use error::{RenderError, RenderResult};
pub use export::{sheet_placements, ExportConfig, ExportFormat, PageExporter, SheetPlacement};
pub use decode::{decode_all, load_image_from_bytes, DecodedImage, DecodedImages, ImageFormat};
pub use silhouette::{sanitize_overlay_name, OverlayStore, OverlayUpload, SilhouetteCache};

/// Re-exported raster type.
pub use tiny_skia::Pixmap;

/// Comic renderer version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
