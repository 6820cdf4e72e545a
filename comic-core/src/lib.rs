//! # Comic Core
//!
//! Page model, layout resolution and image library for the comic page
//! composer. Nothing in this crate performs I/O beyond reading template
//! directories; rendering and synchronization live in sibling crates.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 comic-core                  │
//! ├─────────────────────────────────────────────┤
//! │  PageCollection  │  Layout                  │
//! │  - PageRecord    │  - TemplateRegistry      │
//! │  - ImageLibrary  │  - LayoutResolver        │
//! │  - signatures    │  - PanelGeometryProvider │
//! ├─────────────────────────────────────────────┤
//! │  TransformController (zoom / pan per slot)  │
//! └─────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod collection;
pub mod color;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod library;
pub mod page;
pub mod transform;

pub use collection::{signature_of, Mutation, PageCollection, Placement};
pub use color::{Rgba, DEFAULT_GUTTER_COLOR, DEFAULT_PANEL_BACKGROUND};
pub use error::{CoreError, CoreResult, LayoutError, LayoutResult, LibraryError, LibraryResult};
pub use geometry::{CornerRadii, Point, Rect, Size};
pub use layout::{
    LayoutGeometry, LayoutResolver, MediaEnv, OffscreenGeometry, PanelGeometry,
    PanelGeometryProvider, ResolvedLayout, TemplateRegistry,
};
pub use library::{validate_upload, ImageKind, ImageLibrary, LibraryPartition, MAX_UPLOAD_BYTES};
pub use page::{PageRecord, SlotId};
pub use transform::{
    clamp_scale, InputResponse, TransformController, TransformState, MAX_SCALE, MIN_SCALE,
};

/// Comic core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
