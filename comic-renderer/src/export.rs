//! Raster encoding and two-up PDF export.
//!
//! Composed pages are encoded to PNG or JPEG one file per page, or laid out
//! two per landscape sheet in a PDF, each scaled to fit its half of the
//! sheet and centered there.

use image::ImageEncoder;
use tiny_skia::Pixmap;
use tracing::{debug, info};

use crate::error::{RenderError, RenderResult};

/// Landscape letter width in points.
pub const SHEET_WIDTH_PT: f32 = 792.0;

/// Landscape letter height in points.
pub const SHEET_HEIGHT_PT: f32 = 612.0;

/// Output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// One PNG per page.
    Png,
    /// One JPEG per page.
    Jpeg,
    /// One PDF, two pages per sheet.
    Pdf,
}

impl ExportFormat {
    /// File extension without the dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Pdf => "pdf",
        }
    }
}

/// Export options.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Raster density used when sizing images on the PDF sheet.
    pub dpi: f32,
    /// Background for JPEG alpha flattening, RGBA bytes.
    pub background: [u8; 4],
    /// JPEG quality 1-100.
    pub jpeg_quality: u8,
    /// Sheet width in points.
    pub sheet_width_pt: f32,
    /// Sheet height in points.
    pub sheet_height_pt: f32,
    /// PDF document title.
    pub title: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dpi: 96.0,
            background: [255, 255, 255, 255],
            jpeg_quality: 85,
            sheet_width_pt: SHEET_WIDTH_PT,
            sheet_height_pt: SHEET_HEIGHT_PT,
            title: "Comic Layout".to_string(),
        }
    }
}

/// Where one raster lands on a physical sheet, in points from the
/// sheet's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SheetPlacement {
    /// Zero-based sheet index.
    pub sheet: usize,
    /// 0 for the left half, 1 for the right half.
    pub column: usize,
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Drawn width.
    pub width: f32,
    /// Drawn height.
    pub height: f32,
}

/// Two-up placements for rasters of the given pixel sizes.
///
/// Raster `i` goes to sheet `i / 2`, column `i % 2`; it is scaled to fit
/// the column preserving aspect ratio and centered in it.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn sheet_placements(sizes: &[(u32, u32)], sheet_width: f32, sheet_height: f32) -> Vec<SheetPlacement> {
    let column_width = sheet_width / 2.0;
    sizes
        .iter()
        .enumerate()
        .map(|(i, &(w, h))| {
            let (w, h) = (w.max(1) as f32, h.max(1) as f32);
            let fit = (column_width / w).min(sheet_height / h);
            let (width, height) = (w * fit, h * fit);
            let column = i % 2;
            SheetPlacement {
                sheet: i / 2,
                column,
                x: column as f32 * column_width + (column_width - width) / 2.0,
                y: (sheet_height - height) / 2.0,
                width,
                height,
            }
        })
        .collect()
}

/// Number of physical sheets needed for `pages` rasters.
#[must_use]
pub fn sheet_count(pages: usize) -> usize {
    pages.div_ceil(2)
}

/// File name for page `index` (zero-based) of a per-page export.
#[must_use]
pub fn page_file_name(index: usize, format: ExportFormat) -> String {
    format!("comic-page-{}.{}", index + 1, format.extension())
}

/// File name for a PDF export stamped with `timestamp` (Unix milliseconds).
#[must_use]
pub fn pdf_file_name(timestamp: u64) -> String {
    format!("comic-layout-{timestamp}.pdf")
}

/// Encodes composed pages.
pub struct PageExporter {
    config: ExportConfig,
}

impl PageExporter {
    /// Create a new exporter with the given configuration.
    #[must_use]
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Create an exporter with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ExportConfig::default())
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Encode one raster per page, or a single PDF for [`ExportFormat::Pdf`].
    /// Returns `(file name, bytes)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Precondition`] for an empty page list and
    /// [`RenderError::Export`] if encoding fails.
    pub fn export(
        &self,
        pages: &[Pixmap],
        format: ExportFormat,
        timestamp: u64,
    ) -> RenderResult<Vec<(String, Vec<u8>)>> {
        if pages.is_empty() {
            return Err(RenderError::Precondition("No pages to export".to_string()));
        }
        let files = match format {
            ExportFormat::Pdf => vec![(pdf_file_name(timestamp), self.render_to_pdf(pages)?)],
            ExportFormat::Png | ExportFormat::Jpeg => pages
                .iter()
                .enumerate()
                .map(|(i, page)| {
                    let bytes = if format == ExportFormat::Png {
                        Self::render_to_png(page)?
                    } else {
                        self.render_to_jpeg(page)?
                    };
                    Ok((page_file_name(i, format), bytes))
                })
                .collect::<RenderResult<Vec<_>>>()?,
        };
        info!(files = files.len(), ?format, "Export encoded");
        Ok(files)
    }

    /// Encode a raster as PNG.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn render_to_png(pixmap: &Pixmap) -> RenderResult<Vec<u8>> {
        pixmap
            .encode_png()
            .map_err(|e| RenderError::Export(format!("PNG encoding failed: {e}")))
    }

    /// Encode a raster as JPEG, flattening alpha over the background.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    #[allow(clippy::cast_possible_truncation)]
    pub fn render_to_jpeg(&self, pixmap: &Pixmap) -> RenderResult<Vec<u8>> {
        let (width, height) = (pixmap.width(), pixmap.height());
        let bg = &self.config.background;
        let mut rgb_data = Vec::with_capacity(pixmap.data().len() / 4 * 3);
        for pixel in pixmap.data().chunks_exact(4) {
            // Premultiplied: out = src + bg * (1 - a)
            let inv = 255 - u32::from(pixel[3]);
            for (&src, &back) in pixel[..3].iter().zip(&bg[..3]) {
                let v = u32::from(src) + (u32::from(back) * inv + 127) / 255;
                rgb_data.push(v.min(255) as u8);
            }
        }

        let mut buf = std::io::Cursor::new(Vec::new());
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, self.config.jpeg_quality);
        encoder
            .write_image(&rgb_data, width, height, image::ExtendedColorType::Rgb8)
            .map_err(|e| RenderError::Export(format!("JPEG encoding failed: {e}")))?;
        Ok(buf.into_inner())
    }

    /// Lay rasters out two per landscape sheet and encode a PDF.
    ///
    /// # Errors
    ///
    /// Returns an error if a raster cannot be embedded or the document
    /// cannot be written.
    #[allow(clippy::cast_precision_loss)]
    pub fn render_to_pdf(&self, pages: &[Pixmap]) -> RenderResult<Vec<u8>> {
        use printpdf::{Mm, Pt};

        if pages.is_empty() {
            return Err(RenderError::Precondition("No pages to export".to_string()));
        }
        let (sheet_w, sheet_h) = (self.config.sheet_width_pt, self.config.sheet_height_pt);
        let sizes: Vec<(u32, u32)> = pages.iter().map(|p| (p.width(), p.height())).collect();
        let placements = sheet_placements(&sizes, sheet_w, sheet_h);

        let (doc, first_page, first_layer) = printpdf::PdfDocument::new(
            self.config.title.as_str(),
            Mm::from(Pt(sheet_w)),
            Mm::from(Pt(sheet_h)),
            "Layer 1",
        );
        let mut layers = vec![(first_page, first_layer)];
        for _ in 1..sheet_count(pages.len()) {
            layers.push(doc.add_page(Mm::from(Pt(sheet_w)), Mm::from(Pt(sheet_h)), "Layer 1"));
        }

        let dpi = self.config.dpi;
        for (pixmap, placement) in pages.iter().zip(&placements) {
            let png = Self::render_to_png(pixmap)?;
            let dynamic_image = printpdf::image_crate::load_from_memory(&png)
                .map_err(|e| RenderError::Export(format!("Failed to decode PNG for PDF: {e}")))?;
            let pdf_image = printpdf::Image::from_dynamic_image(&dynamic_image);

            // Natural size at `dpi`, in points.
            let natural_w = pixmap.width() as f32 / dpi * 72.0;
            let natural_h = pixmap.height() as f32 / dpi * 72.0;
            // PDF origin is bottom-left.
            let bottom = sheet_h - placement.y - placement.height;

            let (page, layer) = layers[placement.sheet];
            let current_layer = doc.get_page(page).get_layer(layer);
            pdf_image.add_to_layer(
                current_layer,
                printpdf::ImageTransform {
                    translate_x: Some(Mm::from(Pt(placement.x))),
                    translate_y: Some(Mm::from(Pt(bottom))),
                    scale_x: Some(placement.width / natural_w),
                    scale_y: Some(placement.height / natural_h),
                    dpi: Some(dpi),
                    ..Default::default()
                },
            );
            debug!(sheet = placement.sheet, column = placement.column, "Page placed on sheet");
        }

        doc.save_to_bytes()
            .map_err(|e| RenderError::Export(format!("PDF save failed: {e}")))
    }
}
