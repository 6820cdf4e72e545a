//! Panel geometry providers.
//!
//! The compositor never measures anything itself. It asks a
//! [`PanelGeometryProvider`] for the layout size and each panel's box:
//! [`MeasuredGeometry`] carries boxes reported by an interactive view,
//! [`OffscreenGeometry`] computes them from the template stylesheet alone.

use std::collections::HashMap;

use tracing::{debug, warn};

use super::clip::{Length, RECT_TOLERANCE_PERCENT};
use super::markup::NodeId;
use super::resolver::{PanelSpec, ResolvedLayout};
use super::stylesheet::{parse_css_px, ComputedStyle};
use crate::color::Rgba;
use crate::error::{LayoutError, LayoutResult};
use crate::geometry::{CornerRadii, Point, Rect, Size};
use crate::page::SlotId;

/// Portrait letter ratio used when a layout declares a width only.
const FALLBACK_HEIGHT_RATIO: f64 = 11.0 / 8.5;

/// Final geometry of one panel, in layout pixels relative to the layout's
/// top-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelGeometry {
    /// Slot id.
    pub slot: SlotId,
    /// Panel border box.
    pub frame: Rect,
    /// Box the image is fitted into.
    pub content: Rect,
    /// Rounded-corner radii.
    pub radii: CornerRadii,
    /// Panel background, `None` for the default.
    pub background: Option<Rgba>,
    /// Clip polygon resolved against `frame`, if the template declares one.
    pub clip: Option<Vec<Point>>,
    /// True when `clip` is absent or equivalent to the frame.
    pub rectangular: bool,
}

impl PanelGeometry {
    /// True when the masking pass must run for this panel.
    #[must_use]
    pub fn needs_mask(&self) -> bool {
        self.clip.is_some() && !self.rectangular
    }

    /// This geometry scaled by `factor` (export density).
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            slot: self.slot.clone(),
            frame: self.frame.scaled(factor),
            content: self.content.scaled(factor),
            radii: self.radii.scaled(factor),
            background: self.background,
            clip: self
                .clip
                .as_ref()
                .map(|pts| pts.iter().map(|p| Point::new(p.x * factor, p.y * factor)).collect()),
            rectangular: self.rectangular,
        }
    }
}

/// Geometry of a whole layout.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutGeometry {
    /// Layout box size.
    pub size: Size,
    /// Layout background (the gutter), if declared.
    pub background: Option<Rgba>,
    /// Panels in template order. Panels without a usable box are omitted.
    pub panels: Vec<PanelGeometry>,
}

/// Source of layout and panel boxes for a resolved template.
pub trait PanelGeometryProvider: Send + Sync {
    /// Measure `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::Geometry`] when the layout has no usable size.
    fn measure(&self, layout: &ResolvedLayout) -> LayoutResult<LayoutGeometry>;
}

/// Combine a panel spec with a measured frame.
#[must_use]
pub fn panel_geometry(
    spec: &PanelSpec,
    frame: Rect,
    radii: CornerRadii,
    background: Option<Rgba>,
    tolerance_percent: f64,
) -> PanelGeometry {
    let clip = spec.clip.as_ref().map(|region| region.resolve(frame));
    let rectangular = match &spec.clip {
        Some(region) => region.is_rectangular(frame.size(), tolerance_percent),
        None => true,
    };
    PanelGeometry {
        slot: spec.slot.clone(),
        frame,
        content: frame,
        radii,
        background,
        clip,
        rectangular,
    }
}

// ---------------------------------------------------------------------------
// Measured (live view)

/// A panel box reported by an interactive view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasuredPanel {
    /// Panel frame relative to the layout origin.
    pub frame: Rect,
    /// Rounded-corner radii.
    pub radii: CornerRadii,
    /// Panel background.
    pub background: Option<Rgba>,
}

/// Geometry supplied by a live view that has already laid the page out.
#[derive(Debug, Clone, Default)]
pub struct MeasuredGeometry {
    size: Size,
    background: Option<Rgba>,
    panels: HashMap<SlotId, MeasuredPanel>,
    tolerance_percent: f64,
}

impl MeasuredGeometry {
    /// Start with the layout box size.
    #[must_use]
    pub fn new(size: Size) -> Self {
        Self {
            size,
            background: None,
            panels: HashMap::new(),
            tolerance_percent: RECT_TOLERANCE_PERCENT,
        }
    }

    /// Set the measured layout background.
    #[must_use]
    pub fn with_background(mut self, background: Option<Rgba>) -> Self {
        self.background = background;
        self
    }

    /// Record one panel's box.
    #[must_use]
    pub fn with_panel(mut self, slot: impl Into<SlotId>, panel: MeasuredPanel) -> Self {
        self.panels.insert(slot.into(), panel);
        self
    }
}

impl PanelGeometryProvider for MeasuredGeometry {
    fn measure(&self, layout: &ResolvedLayout) -> LayoutResult<LayoutGeometry> {
        if self.size.is_empty() {
            return Err(LayoutError::Geometry(format!(
                "layout {} has zero dimensions",
                layout.name
            )));
        }
        let panels = layout
            .panels
            .iter()
            .filter_map(|spec| {
                let Some(m) = self.panels.get(&spec.slot) else {
                    warn!(template = %layout.name, slot = %spec.slot, "No measurement for panel");
                    return None;
                };
                (!m.frame.is_empty()).then(|| {
                    panel_geometry(spec, m.frame, m.radii, m.background, self.tolerance_percent)
                })
            })
            .collect();
        Ok(LayoutGeometry {
            size: self.size,
            background: self.background,
            panels,
        })
    }
}

// ---------------------------------------------------------------------------
// Offscreen (stylesheet only)

/// Computes boxes from absolutely positioned template styles.
///
/// The layout element's `width`/`height` (or `aspect-ratio`) give the page
/// size; each panel's `left`/`top`/`right`/`bottom`/`width`/`height` are
/// resolved against it. Media queries use the resolver's environment.
#[derive(Debug, Clone, Copy)]
pub struct OffscreenGeometry {
    tolerance_percent: f64,
}

impl Default for OffscreenGeometry {
    fn default() -> Self {
        Self {
            tolerance_percent: RECT_TOLERANCE_PERCENT,
        }
    }
}

impl OffscreenGeometry {
    /// Provider with the default rectangle tolerance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the rectangle tolerance (percent of the panel side).
    #[must_use]
    pub fn with_tolerance(mut self, tolerance_percent: f64) -> Self {
        self.tolerance_percent = tolerance_percent;
        self
    }

    fn layout_size(layout: &ResolvedLayout, style: &ComputedStyle) -> LayoutResult<Size> {
        let viewport = layout.env.viewport;
        let width = style
            .get("width")
            .and_then(box_length)
            .map_or(viewport.width, |l| l.resolve(viewport.width));
        let height = match style.get("height").and_then(box_length) {
            Some(l) => l.resolve(viewport.height),
            None => match style.get("aspect-ratio").and_then(parse_aspect_ratio) {
                Some(ratio) => width / ratio,
                None => {
                    debug!(template = %layout.name, "Layout height not declared, using letter ratio");
                    width * FALLBACK_HEIGHT_RATIO
                }
            },
        };
        let size = Size::new(width, height);
        if size.is_empty() {
            return Err(LayoutError::Geometry(format!(
                "layout {} has zero dimensions",
                layout.name
            )));
        }
        Ok(size)
    }

    fn panel_frame(slot: &str, style: &ComputedStyle, size: Size) -> Option<Rect> {
        let axis = |start: &str, end: &str, extent_prop: &str, extent: f64| -> Option<(f64, f64)> {
            let start_v = style.get(start).and_then(box_length).map(|l| l.resolve(extent));
            let end_v = style.get(end).and_then(box_length).map(|l| l.resolve(extent));
            let len_v = style.get(extent_prop).and_then(box_length).map(|l| l.resolve(extent));
            match (start_v, end_v, len_v) {
                (Some(s), _, Some(l)) => Some((s, l)),
                (None, Some(e), Some(l)) => Some((extent - e - l, l)),
                (Some(s), Some(e), None) => Some((s, extent - s - e)),
                (None, None, Some(l)) => Some((0.0, l)),
                _ => None,
            }
        };
        let Some((x, width)) = axis("left", "right", "width", size.width) else {
            warn!(slot, "Panel has no horizontal geometry");
            return None;
        };
        let Some((y, height)) = axis("top", "bottom", "height", size.height) else {
            warn!(slot, "Panel has no vertical geometry");
            return None;
        };
        let frame = Rect::new(x, y, width, height);
        (!frame.is_empty()).then_some(frame)
    }

    fn panel_background(layout: &ResolvedLayout, spec: &PanelSpec, panel_style: &ComputedStyle) -> Option<Rgba> {
        let from_node = |node: NodeId| {
            let style = layout
                .stylesheet
                .computed_style(&layout.document, node, &layout.env);
            background_color(&style)
        };
        spec.inner
            .and_then(from_node)
            .or_else(|| background_color(panel_style))
    }
}

impl PanelGeometryProvider for OffscreenGeometry {
    fn measure(&self, layout: &ResolvedLayout) -> LayoutResult<LayoutGeometry> {
        let layout_style =
            layout
                .stylesheet
                .computed_style(&layout.document, layout.layout_element, &layout.env);
        let size = Self::layout_size(layout, &layout_style)?;
        let background = background_color(&layout_style);

        let mut panels = Vec::with_capacity(layout.panels.len());
        for spec in &layout.panels {
            let style = layout
                .stylesheet
                .computed_style(&layout.document, spec.element, &layout.env);
            let Some(frame) = Self::panel_frame(&spec.slot, &style, size) else {
                continue;
            };
            let radii = border_radii(&style, frame.size());
            let background = Self::panel_background(layout, spec, &style);
            panels.push(panel_geometry(spec, frame, radii, background, self.tolerance_percent));
        }
        debug!(template = %layout.name, width = size.width, height = size.height, panels = panels.len(), "Offscreen geometry measured");
        Ok(LayoutGeometry {
            size,
            background,
            panels,
        })
    }
}

/// A box length: `%` stays relative, everything else becomes px.
fn box_length(value: &str) -> Option<Length> {
    let value = value.trim();
    if let Some(pct) = value.strip_suffix('%') {
        return pct.trim().parse::<f64>().ok().filter(|v| v.is_finite()).map(Length::Percent);
    }
    parse_css_px(value).map(Length::Px)
}

fn parse_aspect_ratio(value: &str) -> Option<f64> {
    let ratio = match value.split_once('/') {
        Some((w, h)) => w.trim().parse::<f64>().ok()? / h.trim().parse::<f64>().ok()?,
        None => value.trim().parse::<f64>().ok()?,
    };
    (ratio.is_finite() && ratio > 0.0).then_some(ratio)
}

/// Background color from `background-color` or the first color in
/// `background`.
#[must_use]
pub fn background_color(style: &ComputedStyle) -> Option<Rgba> {
    if let Some(color) = style.get("background-color").and_then(Rgba::parse) {
        return Some(color);
    }
    let shorthand = style.get("background")?;
    Rgba::parse(shorthand).or_else(|| shorthand.split_whitespace().find_map(Rgba::parse))
}

fn border_radii(style: &ComputedStyle, size: Size) -> CornerRadii {
    let resolve = |v: &str| box_length(v).map_or(0.0, |l| l.resolve(size.width).max(0.0));
    let mut radii = style.get("border-radius").map_or_else(CornerRadii::default, |value| {
        let horizontal = value.split('/').next().unwrap_or("");
        let values: Vec<f64> = horizontal.split_whitespace().map(resolve).collect();
        match values.as_slice() {
            [a] => CornerRadii::uniform(*a),
            [a, b] => CornerRadii {
                top_left: *a,
                top_right: *b,
                bottom_right: *a,
                bottom_left: *b,
            },
            [a, b, c] => CornerRadii {
                top_left: *a,
                top_right: *b,
                bottom_right: *c,
                bottom_left: *b,
            },
            [a, b, c, d, ..] => CornerRadii {
                top_left: *a,
                top_right: *b,
                bottom_right: *c,
                bottom_left: *d,
            },
            [] => CornerRadii::default(),
        }
    });
    let longhand = |prop: &str| {
        style
            .get(prop)
            .and_then(|v| v.split_whitespace().next())
            .map(resolve)
    };
    if let Some(r) = longhand("border-top-left-radius") {
        radii.top_left = r;
    }
    if let Some(r) = longhand("border-top-right-radius") {
        radii.top_right = r;
    }
    if let Some(r) = longhand("border-bottom-right-radius") {
        radii.bottom_right = r;
    }
    if let Some(r) = longhand("border-bottom-left-radius") {
        radii.bottom_left = r;
    }
    radii
}
