//! Image decoding.
//!
//! Library images arrive as raw bytes (fetched from the remote store) or as
//! base64 data URIs. Both decode into premultiplied pixmaps ready to be drawn.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::{RenderError, RenderResult};

/// Supported image formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// PNG with alpha support.
    Png,
    /// JPEG (no alpha).
    Jpeg,
    /// GIF (first frame only).
    Gif,
    /// WebP (alpha support).
    WebP,
    /// Unknown/other format.
    Unknown,
}

impl ImageFormat {
    /// Detect format from magic bytes.
    #[must_use]
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.len() < 4 {
            return Self::Unknown;
        }
        if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
            return Self::Png;
        }
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Self::Jpeg;
        }
        if data.starts_with(b"GIF8") {
            return Self::Gif;
        }
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            return Self::WebP;
        }
        Self::Unknown
    }
}

/// A decoded library image.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Premultiplied RGBA pixels.
    pub pixmap: tiny_skia::Pixmap,
    /// Format sniffed from the source bytes.
    pub format: ImageFormat,
}

impl DecodedImage {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    /// Size in bytes of the pixel buffer.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.pixmap.data().len()
    }
}

/// Decoded images keyed by library name.
#[derive(Debug, Clone, Default)]
pub struct DecodedImages {
    images: HashMap<String, Arc<DecodedImage>>,
}

impl DecodedImages {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an image.
    pub fn insert(&mut self, name: impl Into<String>, image: Arc<DecodedImage>) {
        self.images.insert(name.into(), image);
    }

    /// Look up an image by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<DecodedImage>> {
        self.images.get(name)
    }

    /// True when `name` has been decoded.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.images.contains_key(name)
    }

    /// Number of images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Merge another set in.
    pub fn extend(&mut self, other: Self) {
        self.images.extend(other.images);
    }
}

/// Decode raw bytes into a premultiplied pixmap.
///
/// # Errors
///
/// Returns [`RenderError::Decode`] if the bytes are not a supported image.
pub fn load_image_from_bytes(data: &[u8]) -> RenderResult<DecodedImage> {
    let format = ImageFormat::from_magic_bytes(data);
    let img = image::load_from_memory(data).map_err(|e| RenderError::Decode(e.to_string()))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let pixmap = pixmap_from_rgba(width, height, rgba.into_raw())?;
    Ok(DecodedImage { pixmap, format })
}

/// Decode a `data:image/...;base64,...` URI.
///
/// # Errors
///
/// Returns [`RenderError::Decode`] if the URI is malformed or the payload
/// is not a supported image.
pub fn load_image_from_data_uri(uri: &str) -> RenderResult<DecodedImage> {
    load_image_from_bytes(&decode_data_uri(uri)?)
}

/// Extract the payload bytes of a base64 data URI.
///
/// # Errors
///
/// Returns [`RenderError::Decode`] for anything but a base64 data URI.
pub fn decode_data_uri(uri: &str) -> RenderResult<Vec<u8>> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| RenderError::Decode("Not a data URI".to_string()))?;
    let (metadata, payload) = rest
        .split_once(',')
        .ok_or_else(|| RenderError::Decode("Invalid data URI: missing comma".to_string()))?;
    if !metadata.contains(";base64") {
        return Err(RenderError::Decode(
            "Only base64 data URIs are supported".to_string(),
        ));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| RenderError::Decode(format!("Failed to decode base64: {e}")))
}

/// Encode PNG bytes as a data URI.
#[must_use]
pub fn png_data_uri(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

/// Build a pixmap from straight-alpha RGBA bytes.
///
/// # Errors
///
/// Returns [`RenderError::Raster`] if the dimensions do not match the buffer.
pub fn pixmap_from_rgba(width: u32, height: u32, mut data: Vec<u8>) -> RenderResult<tiny_skia::Pixmap> {
    for px in data.chunks_exact_mut(4) {
        let a = u16::from(px[3]);
        if a < 255 {
            for c in &mut px[..3] {
                *c = premultiply(*c, a);
            }
        }
    }
    let size = tiny_skia::IntSize::from_wh(width, height)
        .ok_or_else(|| RenderError::Raster(format!("Invalid image size {width}x{height}")))?;
    tiny_skia::Pixmap::from_vec(data, size)
        .ok_or_else(|| RenderError::Raster("Pixel buffer does not match image size".to_string()))
}

#[allow(clippy::cast_possible_truncation)]
fn premultiply(c: u8, a: u16) -> u8 {
    ((u16::from(c) * a + 127) / 255) as u8
}

/// Decode every `(name, bytes)` pair on the blocking pool and wait for all
/// of them.
///
/// # Errors
///
/// Returns the first decode failure; an export must not start with a
/// missing image.
pub async fn decode_all(sources: Vec<(String, Vec<u8>)>) -> RenderResult<DecodedImages> {
    let tasks = sources.into_iter().map(|(name, bytes)| async move {
        let decoded = tokio::task::spawn_blocking(move || load_image_from_bytes(&bytes))
            .await
            .map_err(|e| RenderError::Decode(format!("{name}: decode task failed: {e}")))?;
        match decoded {
            Ok(image) => Ok((name, image)),
            Err(err) => {
                warn!(image = %name, error = %err, "Image decode failed");
                Err(RenderError::Precondition(format!("Image {name} could not be decoded: {err}")))
            }
        }
    });

    let mut images = DecodedImages::new();
    for result in join_all(tasks).await {
        let (name, image) = result?;
        debug!(image = %name, width = image.width(), height = image.height(), "Image decoded");
        images.insert(name, Arc::new(image));
    }
    Ok(images)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encode a solid-color PNG for tests.
    pub(crate) fn solid_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png)
            .expect("encode png");
        buf.into_inner()
    }

    #[test]
    fn test_magic_bytes() {
        assert_eq!(ImageFormat::from_magic_bytes(&solid_png(1, 1, [0; 4])), ImageFormat::Png);
        assert_eq!(ImageFormat::from_magic_bytes(b"GIF89a.."), ImageFormat::Gif);
        assert_eq!(ImageFormat::from_magic_bytes(&[0xFF, 0xD8, 0xFF, 0xE0]), ImageFormat::Jpeg);
        assert_eq!(ImageFormat::from_magic_bytes(b"RIFF\0\0\0\0WEBPVP8 "), ImageFormat::WebP);
        assert_eq!(ImageFormat::from_magic_bytes(b"ab"), ImageFormat::Unknown);
    }

    #[test]
    fn test_load_premultiplies() {
        let png = solid_png(2, 2, [200, 100, 50, 128]);
        let img = load_image_from_bytes(&png).expect("decode");
        assert_eq!((img.width(), img.height()), (2, 2));
        let px = img.pixmap.pixel(0, 0).expect("pixel");
        assert_eq!(px.alpha(), 128);
        assert_eq!(px.red(), 100);
    }

    #[test]
    fn test_data_uri_round_trip() {
        let png = solid_png(3, 1, [0, 255, 0, 255]);
        let uri = png_data_uri(&png);
        assert!(uri.starts_with("data:image/png;base64,"));
        let img = load_image_from_data_uri(&uri).expect("decode uri");
        assert_eq!(img.width(), 3);
    }

    #[test]
    fn test_bad_data_uri() {
        assert!(matches!(decode_data_uri("image/png"), Err(RenderError::Decode(_))));
        assert!(matches!(decode_data_uri("data:image/png;base64"), Err(RenderError::Decode(_))));
        assert!(matches!(decode_data_uri("data:text/plain,hello"), Err(RenderError::Decode(_))));
    }

    #[test]
    fn test_garbage_bytes_fail() {
        assert!(matches!(load_image_from_bytes(b"not an image"), Err(RenderError::Decode(_))));
    }

    #[tokio::test]
    async fn test_decode_all_waits_for_every_image() {
        let sources = vec![
            ("a.png".to_string(), solid_png(4, 4, [255, 0, 0, 255])),
            ("b.png".to_string(), solid_png(8, 2, [0, 0, 255, 255])),
        ];
        let images = decode_all(sources).await.expect("decode all");
        assert_eq!(images.len(), 2);
        assert_eq!(images.get("b.png").map(|i| i.width()), Some(8));
    }

    #[tokio::test]
    async fn test_decode_all_fails_on_bad_image() {
        let sources = vec![
            ("a.png".to_string(), solid_png(1, 1, [0, 0, 0, 255])),
            ("bad.png".to_string(), b"nope".to_vec()),
        ];
        assert!(matches!(
            decode_all(sources).await,
            Err(RenderError::Precondition(_))
        ));
    }
}
