//! Layout templates and panel geometry.
//!
//! A template is a markup fragment plus a stylesheet. The markup holds a
//! `.layout` element with `.panel[data-slot]` children; the stylesheet
//! positions them and may declare `clip-path` polygons.
//!
//! ```text
//! TemplateRegistry ──► LayoutResolver ──► ResolvedLayout ──► PanelGeometryProvider
//!   (name → source)     (parse, cache)     (panels, clips)    (boxes in px)
//! ```

pub mod clip;
pub mod markup;
pub mod provider;
pub mod resolver;
pub mod stylesheet;
pub mod template;

pub use clip::{polygon_area, ClipPoint, ClipRegion, Length, RECT_TOLERANCE_PERCENT};
pub use markup::{Document, Element, MarkupError, NodeId};
pub use provider::{
    background_color, panel_geometry, LayoutGeometry, MeasuredGeometry, MeasuredPanel,
    OffscreenGeometry, PanelGeometry, PanelGeometryProvider,
};
pub use resolver::{ClipSource, LayoutResolver, PanelSpec, ResolvedLayout};
pub use stylesheet::{ComputedStyle, MediaEnv, Selector, Specificity, Stylesheet};
pub use template::{LayoutTemplate, TemplateRegistry};
