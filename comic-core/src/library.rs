//! Uploaded images and the "select then place" workflow.
//!
//! The library only knows which images exist. Whether an image is assigned
//! is computed on demand by scanning page slots, so there is no back
//! reference to keep in sync.

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{LibraryError, LibraryResult};
use crate::page::PageRecord;

/// Largest accepted upload, in bytes (5 MiB).
pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// Image types accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// PNG.
    Png,
    /// JPEG.
    Jpeg,
    /// GIF.
    Gif,
    /// WebP.
    WebP,
}

impl ImageKind {
    /// Detect from a file name's extension.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Detect from a MIME type.
    #[must_use]
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(Self::Png),
            "image/jpeg" | "image/jpg" => Some(Self::Jpeg),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Canonical MIME type.
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }
}

/// Validate an upload before anything is sent or mutated.
///
/// The MIME type, when given, wins over the extension.
///
/// # Errors
///
/// Returns [`LibraryError::EmptyName`], [`LibraryError::UnsupportedType`] or
/// [`LibraryError::TooLarge`].
pub fn validate_upload(name: &str, mime: Option<&str>, size: u64) -> LibraryResult<ImageKind> {
    if name.trim().is_empty() {
        return Err(LibraryError::EmptyName);
    }
    let kind = match mime {
        Some(m) => ImageKind::from_mime(m),
        None => ImageKind::from_file_name(name),
    }
    .ok_or_else(|| LibraryError::UnsupportedType(mime.unwrap_or(name).to_string()))?;
    if size > MAX_UPLOAD_BYTES {
        return Err(LibraryError::TooLarge {
            name: name.to_string(),
            size,
            limit: MAX_UPLOAD_BYTES,
        });
    }
    Ok(kind)
}

/// Images split by whether any slot references them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LibraryPartition {
    /// Images not placed anywhere, in name order.
    pub unassigned: Vec<String>,
    /// Images placed in some slot, in name order.
    pub assigned: Vec<String>,
}

/// The set of uploaded images plus the pending selection.
#[derive(Debug, Clone, Default)]
pub struct ImageLibrary {
    images: BTreeSet<String>,
    selection: Option<String>,
}

impl ImageLibrary {
    /// Empty library.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Library holding `names`.
    #[must_use]
    pub fn with_images<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            images: names.into_iter().map(Into::into).collect(),
            selection: None,
        }
    }

    /// Add an image. Returns false if it was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.images.insert(name.into())
    }

    /// Remove an image and any selection pointing at it.
    pub fn remove(&mut self, name: &str) -> bool {
        if self.selection.as_deref() == Some(name) {
            self.selection = None;
        }
        self.images.remove(name)
    }

    /// Replace the whole image list.
    pub fn set_images<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.images = names.into_iter().map(Into::into).collect();
        if let Some(sel) = &self.selection {
            if !self.images.contains(sel) {
                self.selection = None;
            }
        }
    }

    /// True if the image exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.images.contains(name)
    }

    /// Number of images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// True when there are no images.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Image names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.images.iter().map(String::as_str)
    }

    /// Currently selected image.
    #[must_use]
    pub fn selection(&self) -> Option<&str> {
        self.selection.as_deref()
    }

    /// Drop the selection.
    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Select an unassigned image for placement.
    ///
    /// # Errors
    ///
    /// Fails for unknown images and for images already placed on a page.
    pub fn select(&mut self, name: &str, pages: &[PageRecord]) -> LibraryResult<()> {
        if !self.contains(name) {
            return Err(LibraryError::UnknownImage(name.to_string()));
        }
        if is_assigned(name, pages) {
            return Err(LibraryError::AlreadyAssigned(name.to_string()));
        }
        self.selection = Some(name.to_string());
        Ok(())
    }

    /// Split images into unassigned and assigned by scanning `pages`.
    #[must_use]
    pub fn partition(&self, pages: &[PageRecord]) -> LibraryPartition {
        let placed: BTreeSet<&str> = pages.iter().flat_map(PageRecord::images).collect();
        let (assigned, unassigned): (Vec<String>, Vec<String>) = self
            .images
            .iter()
            .cloned()
            .partition(|name| placed.contains(name.as_str()));
        LibraryPartition {
            unassigned,
            assigned,
        }
    }
}

/// True if any page slot references `name`.
#[must_use]
pub fn is_assigned(name: &str, pages: &[PageRecord]) -> bool {
    pages.iter().any(|p| p.slot_of(name).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_with(slot: &str, image: &str) -> PageRecord {
        let mut page = PageRecord::new("four-panel-grid");
        page.slots.insert(slot.to_string(), image.to_string());
        page
    }

    #[test]
    fn test_validate_upload_accepts_known_types() {
        assert_eq!(validate_upload("a.PNG", None, 10).expect("png"), ImageKind::Png);
        assert_eq!(
            validate_upload("blob", Some("image/webp"), 10).expect("webp"),
            ImageKind::WebP
        );
        assert_eq!(validate_upload("x.jpeg", None, 10).expect("jpeg"), ImageKind::Jpeg);
    }

    #[test]
    fn test_validate_upload_rejects() {
        assert!(matches!(
            validate_upload("a.bmp", None, 10),
            Err(LibraryError::UnsupportedType(_))
        ));
        assert!(matches!(
            validate_upload("a.png", None, MAX_UPLOAD_BYTES + 1),
            Err(LibraryError::TooLarge { .. })
        ));
        assert!(matches!(
            validate_upload("  ", None, 1),
            Err(LibraryError::EmptyName)
        ));
    }

    #[test]
    fn test_partition_scans_slots() {
        let lib = ImageLibrary::with_images(["a.png", "b.png", "c.png"]);
        let pages = vec![page_with("1", "b.png")];
        let part = lib.partition(&pages);
        assert_eq!(part.assigned, vec!["b.png".to_string()]);
        assert_eq!(part.unassigned, vec!["a.png".to_string(), "c.png".to_string()]);
    }

    #[test]
    fn test_select_refuses_assigned_image() {
        let mut lib = ImageLibrary::with_images(["a.png"]);
        let pages = vec![page_with("1", "a.png")];
        assert!(matches!(
            lib.select("a.png", &pages),
            Err(LibraryError::AlreadyAssigned(_))
        ));
        assert!(matches!(
            lib.select("zzz.png", &pages),
            Err(LibraryError::UnknownImage(_))
        ));
        assert!(lib.selection().is_none());
    }

    #[test]
    fn test_remove_clears_selection() {
        let mut lib = ImageLibrary::with_images(["a.png"]);
        lib.select("a.png", &[]).expect("select");
        assert!(lib.remove("a.png"));
        assert!(lib.selection().is_none());
    }

    #[test]
    fn test_set_images_drops_stale_selection() {
        let mut lib = ImageLibrary::with_images(["a.png"]);
        lib.select("a.png", &[]).expect("select");
        lib.set_images(["b.png"]);
        assert!(lib.selection().is_none());
        assert!(lib.contains("b.png"));
    }
}
