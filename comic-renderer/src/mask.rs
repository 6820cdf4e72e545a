//! Polygon masking pass.
//!
//! The rounded-rect clip used while drawing cannot express angled panel
//! edges. For panels with a non-rectangular polygon the panel's rectangle
//! is read back, everything outside the polygon is repainted with the
//! gutter color, and the result is written back.

use comic_core::geometry::Point;
use comic_core::layout::PanelGeometry;
use tiny_skia::{FillRule, IntRect, Mask, Path, PathBuilder, Pixmap, PixmapPaint, Transform};
use tracing::{debug, warn};

use crate::error::{RenderError, RenderResult};

/// Closed path through `points`.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn polygon_path(points: &[Point], dx: f64, dy: f64) -> Option<Path> {
    let (first, rest) = points.split_first()?;
    let mut pb = PathBuilder::new();
    pb.move_to((first.x + dx) as f32, (first.y + dy) as f32);
    for p in rest {
        pb.line_to((p.x + dx) as f32, (p.y + dy) as f32);
    }
    pb.close();
    pb.finish()
}

/// Integer pixel bounds of the panel frame, clamped to the raster.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pixel_bounds(panel: &PanelGeometry, width: u32, height: u32) -> Option<IntRect> {
    let left = panel.frame.x.floor().max(0.0) as i32;
    let top = panel.frame.y.floor().max(0.0) as i32;
    let right = (panel.frame.right().ceil() as i64).min(i64::from(width)) as i32;
    let bottom = (panel.frame.bottom().ceil() as i64).min(i64::from(height)) as i32;
    if right <= left || bottom <= top {
        return None;
    }
    IntRect::from_xywh(left, top, (right - left) as u32, (bottom - top) as u32)
}

/// Repaint everything in `panel`'s rectangle that lies outside its clip
/// polygon with `gutter`.
///
/// Does nothing for panels without a non-rectangular clip. `panel` must
/// already be scaled to raster pixels.
///
/// # Errors
///
/// Returns [`RenderError::Raster`] if scratch buffers cannot be allocated.
pub fn apply_polygon_mask(
    pixmap: &mut Pixmap,
    panel: &PanelGeometry,
    gutter: tiny_skia::Color,
) -> RenderResult<()> {
    let Some(points) = panel.clip.as_deref().filter(|_| panel.needs_mask()) else {
        return Ok(());
    };
    let Some(bounds) = pixel_bounds(panel, pixmap.width(), pixmap.height()) else {
        debug!(slot = %panel.slot, "Panel outside raster, mask skipped");
        return Ok(());
    };

    let mut region = pixmap
        .clone_rect(bounds)
        .ok_or_else(|| RenderError::Raster(format!("Cannot read back panel {}", panel.slot)))?;
    let mut mask = Mask::new(bounds.width(), bounds.height())
        .ok_or_else(|| RenderError::Raster("Cannot allocate mask".to_string()))?;

    let dx = -f64::from(bounds.x());
    let dy = -f64::from(bounds.y());
    let Some(path) = polygon_path(points, dx, dy) else {
        warn!(slot = %panel.slot, "Degenerate clip polygon, mask skipped");
        return Ok(());
    };
    mask.fill_path(&path, FillRule::Winding, true, Transform::identity());

    let g = gutter.premultiply().to_color_u8();
    let gutter_px = [g.red(), g.green(), g.blue(), g.alpha()];
    for (px, &coverage) in region.data_mut().chunks_exact_mut(4).zip(mask.data()) {
        blend_outside(px, gutter_px, coverage);
    }

    pixmap.draw_pixmap(
        bounds.x(),
        bounds.y(),
        region.as_ref(),
        &PixmapPaint {
            blend_mode: tiny_skia::BlendMode::Source,
            ..PixmapPaint::default()
        },
        Transform::identity(),
        None,
    );
    Ok(())
}

/// Keep `coverage` of the pixel and fill the rest with the gutter.
#[allow(clippy::cast_possible_truncation)]
fn blend_outside(px: &mut [u8], gutter: [u8; 4], coverage: u8) {
    if coverage == 255 {
        return;
    }
    let keep = u32::from(coverage);
    let fill = 255 - keep;
    for (c, g) in px.iter_mut().zip(gutter) {
        *c = ((u32::from(*c) * keep + u32::from(g) * fill + 127) / 255) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comic_core::geometry::{CornerRadii, Rect};

    fn panel(clip: Vec<Point>, rectangular: bool) -> PanelGeometry {
        PanelGeometry {
            slot: "1".to_string(),
            frame: Rect::new(0.0, 0.0, 100.0, 100.0),
            content: Rect::new(0.0, 0.0, 100.0, 100.0),
            radii: CornerRadii::default(),
            background: None,
            clip: Some(clip),
            rectangular,
        }
    }

    fn red_pixmap() -> Pixmap {
        let mut pixmap = Pixmap::new(100, 100).expect("pixmap");
        pixmap.fill(tiny_skia::Color::from_rgba8(255, 0, 0, 255));
        pixmap
    }

    #[test]
    fn test_triangle_mask_paints_exterior() {
        let mut pixmap = red_pixmap();
        let tri = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(0.0, 100.0),
        ];
        apply_polygon_mask(&mut pixmap, &panel(tri, false), tiny_skia::Color::WHITE)
            .expect("mask");
        let inside = pixmap.pixel(10, 10).expect("inside");
        let outside = pixmap.pixel(90, 90).expect("outside");
        assert_eq!((inside.red(), inside.green()), (255, 0));
        assert_eq!((outside.red(), outside.green(), outside.blue()), (255, 255, 255));
    }

    #[test]
    fn test_rectangular_panel_untouched() {
        let mut pixmap = red_pixmap();
        let rect = vec![
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 100.0),
            Point::new(0.0, 100.0),
        ];
        apply_polygon_mask(&mut pixmap, &panel(rect, true), tiny_skia::Color::WHITE)
            .expect("mask");
        assert_eq!(pixmap.pixel(99, 99).expect("px").green(), 0);
    }

    #[test]
    fn test_blend_partial_coverage() {
        let mut px = [200, 0, 0, 255];
        blend_outside(&mut px, [0, 0, 200, 255], 128);
        assert!(px[0] > 90 && px[0] < 110);
        assert!(px[2] > 90 && px[2] < 110);
        assert_eq!(px[3], 255);
    }
}
