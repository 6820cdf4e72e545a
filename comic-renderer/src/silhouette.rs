//! Gutter silhouettes.
//!
//! A silhouette is an opaque sheet the size of a layout with a hole cut for
//! every panel (even-odd fill). Tinted with the gutter color and drawn over
//! a composed page it gives crisp gutter edges. Silhouettes are cached per
//! template name; a remote [`OverlayStore`] can serve and receive them.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use comic_core::geometry::{CornerRadii, Rect};
use comic_core::layout::{LayoutGeometry, LayoutResolver, PanelGeometryProvider};
use serde::{Deserialize, Serialize};
use tiny_skia::Pixmap;
use tracing::{debug, info, instrument, warn};

use crate::error::{RenderError, RenderResult};
use crate::decode::{load_image_from_bytes, png_data_uri};

/// One silhouette pushed to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayUpload {
    /// Sanitized template name.
    pub name: String,
    /// `data:image/png;base64,...`
    pub data_url: String,
}

/// Remote storage for silhouettes.
#[async_trait]
pub trait OverlayStore: Send + Sync {
    /// Fetch the stored PNG for a template.
    async fn fetch_overlay(&self, name: &str) -> RenderResult<Vec<u8>>;

    /// Store a batch of silhouettes; returns the names the store accepted.
    async fn save_overlays(&self, overlays: Vec<OverlayUpload>) -> RenderResult<Vec<String>>;
}

/// Lowercase `name`, collapse every run of characters outside `a-z0-9-`
/// into a single `-`, and trim dashes from both ends.
#[must_use]
pub fn sanitize_overlay_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

fn push_rounded_rect(d: &mut String, rect: Rect, radii: CornerRadii) {
    let max = (rect.width.min(rect.height) / 2.0).max(0.0);
    let r = |v: f64| v.clamp(0.0, max);
    let (tl, tr, br, bl) = (
        r(radii.top_left),
        r(radii.top_right),
        r(radii.bottom_right),
        r(radii.bottom_left),
    );
    let (x, y, right, bottom) = (rect.x, rect.y, rect.right(), rect.bottom());
    let _ = write!(
        d,
        "M{} {y} L{} {y} Q{right} {y} {right} {} L{right} {} Q{right} {bottom} {} {bottom} \
         L{} {bottom} Q{x} {bottom} {x} {} L{x} {} Q{x} {y} {} {y} Z ",
        x + tl,
        right - tr,
        y + tr,
        bottom - br,
        right - br,
        x + bl,
        bottom - bl,
        y + tl,
        x + tl,
    );
}

/// SVG markup of the silhouette for `geometry` at `scale`.
#[must_use]
pub fn silhouette_svg(geometry: &LayoutGeometry, scale: f64) -> String {
    let (w, h) = (geometry.size.width, geometry.size.height);
    let mut d = format!("M0 0 L{w} 0 L{w} {h} L0 {h} Z ");
    for panel in &geometry.panels {
        match panel.clip.as_deref().filter(|_| panel.needs_mask()) {
            Some(points) => {
                for (i, p) in points.iter().enumerate() {
                    let _ = write!(d, "{}{} {} ", if i == 0 { "M" } else { "L" }, p.x, p.y);
                }
                d.push_str("Z ");
            }
            None => push_rounded_rect(&mut d, panel.frame, panel.radii),
        }
    }
    format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\" viewBox=\"0 0 {w} {h}\">\
         <path fill=\"#000000\" fill-rule=\"evenodd\" d=\"{}\"/></svg>",
        w * scale,
        h * scale,
        d.trim_end(),
    )
}

/// Rasterize an SVG string to a pixmap.
///
/// # Errors
///
/// Returns [`RenderError::Raster`] if the SVG cannot be parsed.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn rasterize_svg(svg: &str) -> RenderResult<Pixmap> {
    let opt = usvg::Options::default();
    let tree = usvg::Tree::from_str(svg, &opt)
        .map_err(|e| RenderError::Raster(format!("SVG parsing failed: {e}")))?;

    let px_w = tree.size().width().round() as u32;
    let px_h = tree.size().height().round() as u32;
    let mut pixmap = Pixmap::new(px_w.max(1), px_h.max(1))
        .ok_or_else(|| RenderError::Raster("Failed to create pixmap".to_string()))?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());
    Ok(pixmap)
}

/// Render the black silhouette for a measured layout.
///
/// # Errors
///
/// Returns [`RenderError::Raster`] if rasterization fails.
pub fn generate_silhouette(geometry: &LayoutGeometry, scale: f64) -> RenderResult<Pixmap> {
    if geometry.size.is_empty() {
        return Err(RenderError::Precondition("Layout has zero dimensions".to_string()));
    }
    rasterize_svg(&silhouette_svg(geometry, scale))
}

/// A copy of `silhouette` recolored to `color`, keeping its alpha.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn tint(silhouette: &Pixmap, color: comic_core::Rgba) -> Pixmap {
    let mut out = silhouette.clone();
    let rgb = [color.r, color.g, color.b];
    for px in out.data_mut().chunks_exact_mut(4) {
        let a = u16::from(px[3]);
        for (c, v) in px.iter_mut().zip(rgb) {
            *c = ((u16::from(v) * a + 127) / 255) as u8;
        }
    }
    out
}

/// Silhouette cache keyed by template name and raster scale.
///
/// A stored overlay fetched from the server is kept under the scale it was
/// requested at; the compositor resamples it to the page raster.
#[derive(Debug, Default)]
pub struct SilhouetteCache {
    entries: RwLock<HashMap<(String, u64), Arc<Pixmap>>>,
}

impl SilhouetteCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached silhouette for `template` at `scale`.
    #[must_use]
    pub fn get(&self, template: &str, scale: f64) -> Option<Arc<Pixmap>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(template.to_string(), scale.to_bits()))
            .cloned()
    }

    /// Store a silhouette rendered at `scale`.
    pub fn insert(&self, template: impl Into<String>, scale: f64, pixmap: Arc<Pixmap>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((template.into(), scale.to_bits()), pixmap);
    }

    /// Number of cached silhouettes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached silhouette, else the stored one, else a freshly generated one.
    ///
    /// Any failure fetching or decoding the stored overlay falls back to
    /// local generation.
    ///
    /// # Errors
    ///
    /// Returns an error only if local generation fails.
    #[instrument(skip(self, resolver, provider, store))]
    pub async fn load_or_generate(
        &self,
        template: &str,
        resolver: &LayoutResolver,
        provider: &dyn PanelGeometryProvider,
        store: Option<&dyn OverlayStore>,
        scale: f64,
    ) -> RenderResult<Arc<Pixmap>> {
        if let Some(hit) = self.get(template, scale) {
            return Ok(hit);
        }
        if let Some(store) = store {
            match store.fetch_overlay(&sanitize_overlay_name(template)).await {
                Ok(bytes) => match load_image_from_bytes(&bytes) {
                    Ok(decoded) => {
                        debug!(template, "Using stored silhouette");
                        let pixmap = Arc::new(decoded.pixmap);
                        self.insert(template, scale, Arc::clone(&pixmap));
                        return Ok(pixmap);
                    }
                    Err(err) => warn!(template, error = %err, "Stored silhouette unreadable"),
                },
                Err(err) => debug!(template, error = %err, "No stored silhouette"),
            }
        }
        let layout = resolver.resolve(template)?;
        let geometry = provider.measure(&layout).map_err(RenderError::from_measure)?;
        let pixmap = Arc::new(generate_silhouette(&geometry, scale)?);
        self.insert(template, scale, Arc::clone(&pixmap));
        Ok(pixmap)
    }

    /// Regenerate the silhouette of every registered template and push them
    /// to `store` in one batch. Returns the names the store saved.
    ///
    /// # Errors
    ///
    /// Fails if any template cannot be rendered or the store rejects the
    /// batch.
    #[instrument(skip_all)]
    pub async fn rebuild_all(
        &self,
        resolver: &LayoutResolver,
        provider: &dyn PanelGeometryProvider,
        store: &dyn OverlayStore,
        scale: f64,
    ) -> RenderResult<Vec<String>> {
        let mut uploads = Vec::new();
        for template in resolver.registry().names() {
            let layout = resolver.resolve(template)?;
            let geometry = provider.measure(&layout).map_err(RenderError::from_measure)?;
            let pixmap = generate_silhouette(&geometry, scale)?;
            let png = pixmap
                .encode_png()
                .map_err(|e| RenderError::Export(format!("PNG encoding failed: {e}")))?;
            uploads.push(OverlayUpload {
                name: sanitize_overlay_name(template),
                data_url: png_data_uri(&png),
            });
            self.insert(template, scale, Arc::new(pixmap));
        }
        let saved = store.save_overlays(uploads).await?;
        info!(saved = saved.len(), "Silhouettes rebuilt");
        Ok(saved)
    }
}
