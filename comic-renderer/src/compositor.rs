//! Offscreen page compositor.
//!
//! [`compose_page`] is a pure function: it measures the layout through a
//! [`PanelGeometryProvider`], allocates a raster at the export scale, and
//! draws the gutter, panel backgrounds, placed images, polygon masks and
//! the optional silhouette overlay. Nothing here depends on an interactive
//! view's pixel metrics.

use comic_core::color::{Rgba, DEFAULT_PANEL_BACKGROUND};
use comic_core::geometry::{CornerRadii, Rect, Size};
use comic_core::layout::{
    LayoutResolver, PanelGeometry, PanelGeometryProvider, ResolvedLayout, RECT_TOLERANCE_PERCENT,
};
use comic_core::page::PageRecord;
use tiny_skia::{
    FillRule, FilterQuality, Mask, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Transform,
};
use tracing::{debug, info};

use crate::error::{RenderError, RenderResult};
use crate::decode::DecodedImages;
use crate::mask::apply_polygon_mask;

/// Default export density.
pub const EXPORT_SCALE: f64 = 2.0;

/// Compositor options.
#[derive(Debug, Clone)]
pub struct CompositorConfig {
    /// Raster pixels per layout pixel.
    pub scale: f64,
    /// Composite the gutter silhouette when one is supplied.
    pub overlays: bool,
    /// Percent tolerance used when classifying clips as rectangular.
    pub rect_tolerance_percent: f64,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            scale: EXPORT_SCALE,
            overlays: true,
            rect_tolerance_percent: RECT_TOLERANCE_PERCENT,
        }
    }
}

/// A page paired with its resolved template.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedPage<'a> {
    /// Persisted page state.
    pub record: &'a PageRecord,
    /// Template the page uses.
    pub layout: &'a ResolvedLayout,
    /// Gutter silhouette for the template, if available.
    pub overlay: Option<&'a Pixmap>,
}

impl<'a> ResolvedPage<'a> {
    /// Pair a page with its layout, without an overlay.
    #[must_use]
    pub fn new(record: &'a PageRecord, layout: &'a ResolvedLayout) -> Self {
        Self {
            record,
            layout,
            overlay: None,
        }
    }

    /// Attach a silhouette overlay.
    #[must_use]
    pub fn with_overlay(mut self, overlay: Option<&'a Pixmap>) -> Self {
        self.overlay = overlay;
        self
    }
}

pub(crate) fn skia_color(c: Rgba) -> tiny_skia::Color {
    tiny_skia::Color::from_rgba8(c.r, c.g, c.b, c.a)
}

/// Rounded rectangle with quadratic corners. Radii are clamped to half
/// the shorter side.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn rounded_rect_path(rect: Rect, radii: CornerRadii) -> Option<Path> {
    let max = (rect.width.min(rect.height) / 2.0).max(0.0);
    let r = |v: f64| v.clamp(0.0, max) as f32;
    let (tl, tr, br, bl) = (
        r(radii.top_left),
        r(radii.top_right),
        r(radii.bottom_right),
        r(radii.bottom_left),
    );
    let (x, y) = (rect.x as f32, rect.y as f32);
    let (right, bottom) = (rect.right() as f32, rect.bottom() as f32);

    let mut pb = PathBuilder::new();
    pb.move_to(x + tl, y);
    pb.line_to(right - tr, y);
    pb.quad_to(right, y, right, y + tr);
    pb.line_to(right, bottom - br);
    pb.quad_to(right, bottom, right - br, bottom);
    pb.line_to(x + bl, bottom);
    pb.quad_to(x, bottom, x, bottom - bl);
    pb.line_to(x, y + tl);
    pb.quad_to(x, y, x + tl, y);
    pb.close();
    pb.finish()
}

/// Raster size for a layout at `scale`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn raster_size(size: Size, scale: f64) -> RenderResult<(u32, u32)> {
    let w = (size.width * scale).round();
    let h = (size.height * scale).round();
    if !(w >= 1.0 && h >= 1.0) {
        return Err(RenderError::Precondition("Layout has zero dimensions".to_string()));
    }
    Ok((w as u32, h as u32))
}

/// Render one page.
///
/// # Errors
///
/// Returns [`RenderError::Precondition`] when the layout has no size or a
/// placed image is missing from `images`, and [`RenderError::Raster`] if
/// the raster cannot be allocated.
pub fn compose_page(
    page: &ResolvedPage<'_>,
    provider: &dyn PanelGeometryProvider,
    images: &DecodedImages,
    config: &CompositorConfig,
) -> RenderResult<Pixmap> {
    let geometry = provider.measure(page.layout).map_err(RenderError::from_measure)?;
    let (width, height) = raster_size(geometry.size, config.scale)?;

    for image in page.record.images() {
        if !images.contains(image) {
            return Err(RenderError::Precondition(format!("Image {image} is not loaded")));
        }
    }

    let gutter = Rgba::gutter_or_default(Some(page.record.gutter_color.as_str()));
    let gutter_color = skia_color(gutter);

    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| RenderError::Raster(format!("Cannot allocate {width}x{height} raster")))?;
    pixmap.fill(gutter_color);

    for panel in &geometry.panels {
        let panel = panel.scaled(config.scale);
        draw_panel(&mut pixmap, page.record, &panel, images)?;
        apply_polygon_mask(&mut pixmap, &panel, gutter_color)?;
    }

    if config.overlays {
        if let Some(overlay) = page.overlay {
            draw_overlay(&mut pixmap, overlay);
        }
    }

    debug!(
        template = %page.layout.name,
        width,
        height,
        panels = geometry.panels.len(),
        "Page composed"
    );
    Ok(pixmap)
}

/// Clip to the rounded frame, fill the background and draw the slot image.
fn draw_panel(
    pixmap: &mut Pixmap,
    record: &PageRecord,
    panel: &PanelGeometry,
    images: &DecodedImages,
) -> RenderResult<()> {
    let Some(path) = rounded_rect_path(panel.frame, panel.radii) else {
        return Ok(());
    };
    let mut clip = Mask::new(pixmap.width(), pixmap.height())
        .ok_or_else(|| RenderError::Raster("Cannot allocate clip".to_string()))?;
    clip.fill_path(&path, FillRule::Winding, true, Transform::identity());

    let background = panel
        .background
        .filter(|c| !c.is_transparent())
        .unwrap_or(DEFAULT_PANEL_BACKGROUND);
    let mut paint = Paint::default();
    paint.set_color(skia_color(background));
    paint.anti_alias = true;
    pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), Some(&clip));

    let Some(name) = record.image_in(&panel.slot) else {
        return Ok(());
    };
    let Some(image) = images.get(name) else {
        return Ok(());
    };
    let transform = record.transform_for(&panel.slot);
    let image_size = Size::new(f64::from(image.width()), f64::from(image.height()));
    let target = transform.target_rect(panel.content, image_size);
    if target.is_empty() {
        return Ok(());
    }

    #[allow(clippy::cast_possible_truncation)]
    let placement = Transform::from_row(
        (target.width / image_size.width) as f32,
        0.0,
        0.0,
        (target.height / image_size.height) as f32,
        target.x as f32,
        target.y as f32,
    );
    pixmap.draw_pixmap(
        0,
        0,
        image.pixmap.as_ref(),
        &PixmapPaint {
            quality: FilterQuality::Bicubic,
            ..PixmapPaint::default()
        },
        placement,
        Some(&clip),
    );
    Ok(())
}

/// Draw the silhouette stretched over the whole raster.
#[allow(clippy::cast_precision_loss)]
fn draw_overlay(pixmap: &mut Pixmap, overlay: &Pixmap) {
    let sx = pixmap.width() as f32 / overlay.width() as f32;
    let sy = pixmap.height() as f32 / overlay.height() as f32;
    pixmap.draw_pixmap(
        0,
        0,
        overlay.as_ref(),
        &PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        },
        Transform::from_scale(sx, sy),
        None,
    );
}

/// Render every page of a collection in order.
///
/// `overlay_for` supplies each page's silhouette, already tinted.
///
/// # Errors
///
/// Returns [`RenderError::Precondition`] for an empty list or an unknown
/// template, otherwise fails on the first page that cannot be rendered.
pub fn compose_pages<F>(
    pages: &[PageRecord],
    resolver: &LayoutResolver,
    provider: &dyn PanelGeometryProvider,
    images: &DecodedImages,
    config: &CompositorConfig,
    overlay_for: F,
) -> RenderResult<Vec<Pixmap>>
where
    F: Fn(&PageRecord) -> Option<Pixmap>,
{
    if pages.is_empty() {
        return Err(RenderError::Precondition("No pages to export".to_string()));
    }
    let mut rasters = Vec::with_capacity(pages.len());
    for record in pages {
        let layout = resolver
            .resolve(&record.layout_name)
            .map_err(|err| RenderError::Precondition(err.to_string()))?;
        let overlay = overlay_for(record);
        let page = ResolvedPage::new(record, &layout).with_overlay(overlay.as_ref());
        rasters.push(compose_page(&page, provider, images, config)?);
    }
    info!(pages = rasters.len(), scale = config.scale, "Pages composed");
    Ok(rasters)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::decode::{load_image_from_bytes, tests::solid_png};
    use comic_core::layout::{MeasuredGeometry, MeasuredPanel, OffscreenGeometry};

    fn images_with(name: &str, rgba: [u8; 4]) -> DecodedImages {
        let mut images = DecodedImages::new();
        let decoded = load_image_from_bytes(&solid_png(16, 16, rgba)).expect("decode");
        images.insert(name, Arc::new(decoded));
        images
    }

    fn rgb(pixmap: &Pixmap, x: u32, y: u32) -> (u8, u8, u8) {
        let px = pixmap.pixel(x, y).expect("pixel");
        (px.red(), px.green(), px.blue())
    }

    #[test]
    fn test_empty_page_shows_gutter_and_white_panels() {
        let resolver = LayoutResolver::builtin();
        let layout = resolver.resolve("two-horizontal-angled").expect("resolve");
        let record = PageRecord::new("two-horizontal-angled");
        let pixmap = compose_page(
            &ResolvedPage::new(&record, &layout),
            &OffscreenGeometry::new(),
            &DecodedImages::new(),
            &CompositorConfig::default(),
        )
        .expect("compose");
        assert_eq!((pixmap.width(), pixmap.height()), (1700, 2200));
        assert_eq!(rgb(&pixmap, 2, 2), (0xcc, 0xcc, 0xcc));
        assert_eq!(rgb(&pixmap, 400, 200), (255, 255, 255));
    }

    #[test]
    fn test_placed_image_covers_panel() {
        let resolver = LayoutResolver::builtin();
        let layout = resolver.resolve("four-panel-grid").expect("resolve");
        let mut record = PageRecord::new("four-panel-grid");
        record.slots.insert("1".to_string(), "red.png".to_string());
        let config = CompositorConfig {
            scale: 1.0,
            ..CompositorConfig::default()
        };
        let pixmap = compose_page(
            &ResolvedPage::new(&record, &layout),
            &OffscreenGeometry::new(),
            &images_with("red.png", [255, 0, 0, 255]),
            &config,
        )
        .expect("compose");
        assert_eq!(rgb(&pixmap, 200, 250), (255, 0, 0));
        // Rounded corner of panel 1 stays gutter.
        assert_eq!(rgb(&pixmap, 18, 17), (0xcc, 0xcc, 0xcc));
        // Panel 4 keeps its declared background.
        assert_eq!(rgb(&pixmap, 650, 800), (0xfd, 0xf6, 0xe3));
    }

    #[test]
    fn test_custom_gutter_color() {
        let resolver = LayoutResolver::builtin();
        let layout = resolver.resolve("four-panel-grid").expect("resolve");
        let mut record = PageRecord::new("four-panel-grid");
        record.gutter_color = "#000000".to_string();
        let pixmap = compose_page(
            &ResolvedPage::new(&record, &layout),
            &OffscreenGeometry::new(),
            &DecodedImages::new(),
            &CompositorConfig {
                scale: 1.0,
                ..CompositorConfig::default()
            },
        )
        .expect("compose");
        assert_eq!(rgb(&pixmap, 1, 1), (0, 0, 0));
    }

    #[test]
    fn test_transparent_gutter_paints_white() {
        let resolver = LayoutResolver::builtin();
        let layout = resolver.resolve("four-panel-grid").expect("resolve");
        let mut record = PageRecord::new("four-panel-grid");
        record.gutter_color = "transparent".to_string();
        let pixmap = compose_page(
            &ResolvedPage::new(&record, &layout),
            &OffscreenGeometry::new(),
            &DecodedImages::new(),
            &CompositorConfig {
                scale: 1.0,
                ..CompositorConfig::default()
            },
        )
        .expect("compose");
        assert_eq!(rgb(&pixmap, 1, 1), (255, 255, 255));
    }

    #[test]
    fn test_missing_image_is_precondition() {
        let resolver = LayoutResolver::builtin();
        let layout = resolver.resolve("four-panel-grid").expect("resolve");
        let mut record = PageRecord::new("four-panel-grid");
        record.slots.insert("1".to_string(), "gone.png".to_string());
        let result = compose_page(
            &ResolvedPage::new(&record, &layout),
            &OffscreenGeometry::new(),
            &DecodedImages::new(),
            &CompositorConfig::default(),
        );
        assert!(matches!(result, Err(RenderError::Precondition(_))));
    }

    #[test]
    fn test_zero_size_measurement_is_precondition() {
        let resolver = LayoutResolver::builtin();
        let layout = resolver.resolve("four-panel-grid").expect("resolve");
        let record = PageRecord::new("four-panel-grid");
        let result = compose_page(
            &ResolvedPage::new(&record, &layout),
            &MeasuredGeometry::new(Size::default()),
            &DecodedImages::new(),
            &CompositorConfig::default(),
        );
        assert!(matches!(result, Err(RenderError::Precondition(_))));
    }

    #[test]
    fn test_measured_geometry_drives_raster() {
        let resolver = LayoutResolver::builtin();
        let layout = resolver.resolve("two-horizontal-angled").expect("resolve");
        let mut record = PageRecord::new("two-horizontal-angled");
        record.slots.insert("2".to_string(), "blue.png".to_string());
        let provider = MeasuredGeometry::new(Size::new(100.0, 100.0)).with_panel(
            "2",
            MeasuredPanel {
                frame: Rect::new(0.0, 50.0, 100.0, 50.0),
                radii: CornerRadii::default(),
                background: None,
            },
        );
        let pixmap = compose_page(
            &ResolvedPage::new(&record, &layout),
            &provider,
            &images_with("blue.png", [0, 0, 255, 255]),
            &CompositorConfig::default(),
        )
        .expect("compose");
        assert_eq!((pixmap.width(), pixmap.height()), (200, 200));
        assert_eq!(rgb(&pixmap, 100, 180), (0, 0, 255));
        assert_eq!(rgb(&pixmap, 100, 40), (0xcc, 0xcc, 0xcc));
    }

    #[test]
    fn test_compose_pages_requires_pages() {
        let resolver = LayoutResolver::builtin();
        let result = compose_pages(
            &[],
            &resolver,
            &OffscreenGeometry::new(),
            &DecodedImages::new(),
            &CompositorConfig::default(),
            |_| None,
        );
        assert!(matches!(result, Err(RenderError::Precondition(_))));
    }
}
