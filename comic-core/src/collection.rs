//! The page collection: sole owner of page, slot and transform state.
//!
//! Every local edit goes through a method here and reports a [`Mutation`]
//! so the sync layer can decide between a debounced persist, an immediate
//! persist with rebuild, or nothing at all. Remote state enters through
//! [`PageCollection::rebuild`] only.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::color::Rgba;
use crate::error::{CoreError, CoreResult, LibraryResult};
use crate::library::{ImageLibrary, LibraryPartition};
use crate::page::PageRecord;
use crate::transform::TransformState;

/// Kind of change an operation made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mutation {
    /// Nothing changed; no persist needed.
    Unchanged,
    /// Content changed within existing pages (slots, transforms, colors,
    /// locks). Persist with debounce, no rebuild.
    Cosmetic,
    /// Pages were added, removed or re-templated. Persist immediately and
    /// rebuild from the acknowledged state.
    Structural,
}

impl Mutation {
    /// True unless [`Mutation::Unchanged`].
    #[must_use]
    pub fn is_changed(self) -> bool {
        self != Self::Unchanged
    }

    /// True for [`Mutation::Structural`].
    #[must_use]
    pub fn is_structural(self) -> bool {
        self == Self::Structural
    }
}

/// Outcome of placing the selected library image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// No image is selected.
    NoSelection,
    /// The target page is locked; the selection is kept.
    Locked,
    /// The image was placed.
    Placed(Mutation),
}

/// Ordered pages plus the image library they draw from.
#[derive(Debug, Clone)]
pub struct PageCollection {
    pages: Vec<PageRecord>,
    library: ImageLibrary,
    default_layout: String,
}

impl PageCollection {
    /// Empty collection; new pages use `default_layout`.
    #[must_use]
    pub fn new(default_layout: impl Into<String>) -> Self {
        Self {
            pages: Vec::new(),
            library: ImageLibrary::new(),
            default_layout: default_layout.into(),
        }
    }

    /// Replace the image library.
    #[must_use]
    pub fn with_library(mut self, library: ImageLibrary) -> Self {
        self.library = library;
        self
    }

    /// Template used by [`add_page`](Self::add_page) without a seed.
    #[must_use]
    pub fn default_layout(&self) -> &str {
        &self.default_layout
    }

    /// All pages in order.
    #[must_use]
    pub fn pages(&self) -> &[PageRecord] {
        &self.pages
    }

    /// Page at `index`.
    #[must_use]
    pub fn page(&self, index: usize) -> Option<&PageRecord> {
        self.pages.get(index)
    }

    /// Number of pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// True when there are no pages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// The image library.
    #[must_use]
    pub fn library(&self) -> &ImageLibrary {
        &self.library
    }

    /// Unassigned/assigned split of the library, computed from the slots.
    #[must_use]
    pub fn partition(&self) -> LibraryPartition {
        self.library.partition(&self.pages)
    }

    /// Serialized fingerprint of the pages, used to detect echoes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] if the pages cannot be encoded.
    pub fn signature(&self) -> CoreResult<String> {
        signature_of(&self.pages)
    }

    /// Append a page, either empty with the default template or from `seed`.
    ///
    /// Seed slots naming unknown or already placed images are dropped.
    pub fn add_page(&mut self, seed: Option<PageRecord>) -> Mutation {
        let mut page = seed.unwrap_or_else(|| PageRecord::new(self.default_layout.clone()));
        page.sanitize();
        let placed: BTreeSet<String> = self
            .pages
            .iter()
            .flat_map(|p| p.images().map(str::to_string))
            .collect();
        page.slots.retain(|slot, image| {
            let keep = self.library.contains(image) && !placed.contains(image);
            if !keep {
                warn!(slot = %slot, image = %image, "Dropping seed slot for unavailable image");
            }
            keep
        });
        page.sanitize();
        self.pages.push(page);
        debug!(pages = self.pages.len(), "Page added");
        Mutation::Structural
    }

    /// Remove the page at `index`; its images return to the library.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageNotFound`] for a bad index.
    pub fn delete_page(&mut self, index: usize) -> CoreResult<Mutation> {
        self.check_index(index)?;
        self.pages.remove(index);
        debug!(index, pages = self.pages.len(), "Page deleted");
        Ok(Mutation::Structural)
    }

    /// Switch a page to another template, clearing its slots.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageNotFound`] or [`CoreError::PageLocked`].
    pub fn change_layout(&mut self, index: usize, layout_name: &str) -> CoreResult<Mutation> {
        let page = self.page_mut(index)?;
        if page.locked {
            return Err(CoreError::PageLocked(index));
        }
        if page.layout_name == layout_name {
            return Ok(Mutation::Unchanged);
        }
        page.layout_name = layout_name.to_string();
        page.slots.clear();
        page.transforms.clear();
        Ok(Mutation::Structural)
    }

    /// Put `image` into `slot` of page `index`.
    ///
    /// A locked page makes this a no-op. If the image already sits in another
    /// slot anywhere in the collection it is moved, never duplicated; the
    /// transform starts from identity. An image held by a locked page stays
    /// where it is.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageNotFound`], [`CoreError::InvalidSlot`] or
    /// [`CoreError::UnknownImage`].
    pub fn assign(&mut self, index: usize, slot: &str, image: &str) -> CoreResult<Mutation> {
        self.assign_with(index, slot, image, TransformState::IDENTITY)
    }

    /// [`assign`](Self::assign) with an initial transform.
    ///
    /// # Errors
    ///
    /// Same as [`assign`](Self::assign).
    pub fn assign_with(
        &mut self,
        index: usize,
        slot: &str,
        image: &str,
        transform: TransformState,
    ) -> CoreResult<Mutation> {
        self.check_index(index)?;
        if slot.trim().is_empty() {
            return Err(CoreError::InvalidSlot(slot.to_string()));
        }
        if !self.library.contains(image) {
            return Err(CoreError::UnknownImage(image.to_string()));
        }
        if self.pages[index].locked {
            debug!(index, slot, image, "Placement ignored on locked page");
            return Ok(Mutation::Unchanged);
        }
        if self.pages[index].image_in(slot) == Some(image) {
            return Ok(Mutation::Unchanged);
        }

        if let Some(holder) = self
            .pages
            .iter()
            .position(|page| page.locked && page.slot_of(image).is_some())
        {
            debug!(index, holder, image, "Image held by a locked page, not moving it");
            return Ok(Mutation::Unchanged);
        }

        for (i, page) in self.pages.iter_mut().enumerate() {
            if let Some(prior) = page.slot_of(image).map(str::to_string) {
                debug!(from_page = i, from_slot = %prior, image, "Vacating prior slot");
                page.vacate(&prior);
            }
        }

        let page = &mut self.pages[index];
        page.slots.insert(slot.to_string(), image.to_string());
        page.transforms.insert(slot.to_string(), transform.normalized());
        if self.library.selection() == Some(image) {
            self.library.clear_selection();
        }
        Ok(Mutation::Cosmetic)
    }

    /// Empty `slot` of page `index`. No-op on locked pages.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageNotFound`].
    pub fn clear_slot(&mut self, index: usize, slot: &str) -> CoreResult<Mutation> {
        let page = self.page_mut(index)?;
        if page.locked {
            return Ok(Mutation::Unchanged);
        }
        Ok(if page.vacate(slot).is_some() {
            Mutation::Cosmetic
        } else {
            Mutation::Unchanged
        })
    }

    /// Store a committed transform for an occupied slot. The scale is clamped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageNotFound`].
    pub fn set_transform(
        &mut self,
        index: usize,
        slot: &str,
        transform: TransformState,
    ) -> CoreResult<Mutation> {
        let page = self.page_mut(index)?;
        if page.locked || !page.slots.contains_key(slot) {
            return Ok(Mutation::Unchanged);
        }
        let transform = transform.normalized();
        if page.transforms.get(slot) == Some(&transform) {
            return Ok(Mutation::Unchanged);
        }
        page.transforms.insert(slot.to_string(), transform);
        Ok(Mutation::Cosmetic)
    }

    /// Change a page's gutter color.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageNotFound`] or [`CoreError::InvalidColor`].
    pub fn set_gutter_color(&mut self, index: usize, color: &str) -> CoreResult<Mutation> {
        let parsed = Rgba::parse(color).ok_or_else(|| CoreError::InvalidColor(color.to_string()))?;
        let page = self.page_mut(index)?;
        if page.locked {
            return Ok(Mutation::Unchanged);
        }
        let value = if parsed.a == 255 {
            parsed.to_hex()
        } else {
            parsed.to_string()
        };
        if page.gutter_color == value {
            return Ok(Mutation::Unchanged);
        }
        page.gutter_color = value;
        Ok(Mutation::Cosmetic)
    }

    /// Flip a page's lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageNotFound`].
    pub fn toggle_lock(&mut self, index: usize) -> CoreResult<Mutation> {
        let page = self.page_mut(index)?;
        page.locked = !page.locked;
        Ok(Mutation::Cosmetic)
    }

    /// Set a page's lock explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageNotFound`].
    pub fn set_locked(&mut self, index: usize, locked: bool) -> CoreResult<Mutation> {
        let page = self.page_mut(index)?;
        if page.locked == locked {
            return Ok(Mutation::Unchanged);
        }
        page.locked = locked;
        Ok(Mutation::Cosmetic)
    }

    /// Register an uploaded image.
    pub fn add_image(&mut self, name: impl Into<String>) -> bool {
        self.library.insert(name)
    }

    /// Delete an image from the library and clear every slot naming it,
    /// locked pages included.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownImage`] if the image is not in the library.
    pub fn delete_image(&mut self, name: &str) -> CoreResult<Mutation> {
        if !self.library.remove(name) {
            return Err(CoreError::UnknownImage(name.to_string()));
        }
        Ok(if self.remove_image_references(name) > 0 {
            Mutation::Cosmetic
        } else {
            Mutation::Unchanged
        })
    }

    /// Clear every slot referencing `name`. Returns the number cleared.
    pub fn remove_image_references(&mut self, name: &str) -> usize {
        let mut cleared = 0;
        for page in &mut self.pages {
            while let Some(slot) = page.slot_of(name).map(str::to_string) {
                page.vacate(&slot);
                cleared += 1;
            }
        }
        if cleared > 0 {
            debug!(image = name, cleared, "Cleared slots for deleted image");
        }
        cleared
    }

    /// Select an unassigned image for the next placement.
    ///
    /// # Errors
    ///
    /// See [`ImageLibrary::select`].
    pub fn select_image(&mut self, name: &str) -> LibraryResult<()> {
        self.library.select(name, &self.pages)
    }

    /// Drop the pending selection.
    pub fn clear_selection(&mut self) {
        self.library.clear_selection();
    }

    /// Place the selected image into `slot` of page `index`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PageNotFound`] or [`CoreError::InvalidSlot`].
    pub fn place_selected(&mut self, index: usize, slot: &str) -> CoreResult<Placement> {
        self.check_index(index)?;
        if self.pages[index].locked {
            return Ok(Placement::Locked);
        }
        let Some(image) = self.library.selection().map(str::to_string) else {
            return Ok(Placement::NoSelection);
        };
        let mutation = self.assign(index, slot, &image)?;
        self.library.clear_selection();
        Ok(Placement::Placed(mutation))
    }

    /// Replace every page with `pages` (the remote-rebuild funnel).
    ///
    /// An empty list yields a single default page. Images referenced by the
    /// incoming pages but missing from the library are registered; a second
    /// reference to the same image is dropped.
    pub fn rebuild(&mut self, pages: Vec<PageRecord>) {
        let mut seen = BTreeSet::new();
        let mut rebuilt = Vec::with_capacity(pages.len().max(1));
        for mut page in pages {
            page.slots.retain(|slot, image| {
                if seen.insert(image.clone()) {
                    true
                } else {
                    warn!(slot = %slot, image = %image, "Dropping duplicate image reference");
                    false
                }
            });
            page.sanitize();
            rebuilt.push(page);
        }
        for image in &seen {
            if self.library.insert(image.clone()) {
                debug!(image = %image, "Registered image referenced by remote pages");
            }
        }
        if rebuilt.is_empty() {
            rebuilt.push(PageRecord::new(self.default_layout.clone()));
        }
        if self.library.selection().is_some_and(|s| seen.contains(s)) {
            self.library.clear_selection();
        }
        self.pages = rebuilt;
        debug!(pages = self.pages.len(), "Collection rebuilt");
    }

    /// Replace images and pages together, as after a reset or import.
    pub fn apply_loaded_state<I, S>(&mut self, pages: Vec<PageRecord>, images: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.library.set_images(images);
        self.rebuild(pages);
    }

    fn check_index(&self, index: usize) -> CoreResult<()> {
        if index < self.pages.len() {
            Ok(())
        } else {
            Err(CoreError::PageNotFound(index))
        }
    }

    fn page_mut(&mut self, index: usize) -> CoreResult<&mut PageRecord> {
        self.pages
            .get_mut(index)
            .ok_or(CoreError::PageNotFound(index))
    }
}

/// Signature of an arbitrary page list.
///
/// # Errors
///
/// Returns [`CoreError::Serialization`] if the pages cannot be encoded.
pub fn signature_of(pages: &[PageRecord]) -> CoreResult<String> {
    Ok(serde_json::to_string(pages)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection() -> PageCollection {
        let mut c = PageCollection::new("four-panel-grid")
            .with_library(ImageLibrary::with_images(["a.png", "b.png", "c.png"]));
        c.add_page(None);
        c.add_page(None);
        c
    }

    #[test]
    fn test_add_and_delete_are_structural() {
        let mut c = PageCollection::new("two-horizontal-angled");
        assert_eq!(c.add_page(None), Mutation::Structural);
        assert_eq!(c.page(0).map(|p| p.layout_name.as_str()), Some("two-horizontal-angled"));
        assert_eq!(c.delete_page(0).expect("delete"), Mutation::Structural);
        assert!(matches!(c.delete_page(0), Err(CoreError::PageNotFound(0))));
    }

    #[test]
    fn test_assign_moves_image_between_pages() {
        let mut c = collection();
        c.assign(0, "1", "a.png").expect("assign");
        assert_eq!(c.assign(1, "2", "a.png").expect("move"), Mutation::Cosmetic);
        assert_eq!(c.page(0).and_then(|p| p.image_in("1")), None);
        assert_eq!(c.page(1).and_then(|p| p.image_in("2")), Some("a.png"));
    }

    #[test]
    fn test_assign_unknown_image_fails() {
        let mut c = collection();
        assert!(matches!(
            c.assign(0, "1", "nope.png"),
            Err(CoreError::UnknownImage(_))
        ));
    }

    #[test]
    fn test_locked_page_ignores_assignment() {
        let mut c = collection();
        c.toggle_lock(0).expect("lock");
        assert_eq!(c.assign(0, "1", "a.png").expect("noop"), Mutation::Unchanged);
        assert!(c.page(0).map_or(false, |p| p.slots.is_empty()));
    }

    #[test]
    fn test_change_layout_clears_slots_and_rejects_locked() {
        let mut c = collection();
        c.assign(0, "1", "a.png").expect("assign");
        assert_eq!(
            c.change_layout(0, "two-horizontal-angled").expect("change"),
            Mutation::Structural
        );
        assert!(c.partition().assigned.is_empty());
        c.set_locked(0, true).expect("lock");
        assert!(matches!(
            c.change_layout(0, "four-panel-grid"),
            Err(CoreError::PageLocked(0))
        ));
    }

    #[test]
    fn test_set_transform_clamps_and_detects_no_change() {
        let mut c = collection();
        c.assign(0, "1", "a.png").expect("assign");
        let m = c
            .set_transform(0, "1", TransformState::new(9.0, 1.0, 2.0))
            .expect("transform");
        assert_eq!(m, Mutation::Cosmetic);
        let stored = c.page(0).map(|p| p.transform_for("1")).expect("page");
        assert!((stored.scale - 3.0).abs() < f64::EPSILON);
        assert_eq!(
            c.set_transform(0, "1", stored).expect("same"),
            Mutation::Unchanged
        );
        assert_eq!(
            c.set_transform(0, "2", stored).expect("empty slot"),
            Mutation::Unchanged
        );
    }

    #[test]
    fn test_gutter_color_validation() {
        let mut c = collection();
        assert!(matches!(
            c.set_gutter_color(0, "not-a-color"),
            Err(CoreError::InvalidColor(_))
        ));
        assert_eq!(c.set_gutter_color(0, "#FFF").expect("color"), Mutation::Cosmetic);
        assert_eq!(c.page(0).map(|p| p.gutter_color.as_str()), Some("#ffffff"));
    }

    #[test]
    fn test_delete_image_cascades() {
        let mut c = collection();
        c.assign(1, "3", "b.png").expect("assign");
        c.toggle_lock(1).expect("lock");
        assert_eq!(c.delete_image("b.png").expect("delete"), Mutation::Cosmetic);
        assert!(c.page(1).map_or(false, |p| p.slots.is_empty()));
        assert!(!c.library().contains("b.png"));
    }

    #[test]
    fn test_select_then_place() {
        let mut c = collection();
        assert_eq!(c.place_selected(0, "1").expect("none"), Placement::NoSelection);
        c.select_image("c.png").expect("select");
        assert_eq!(
            c.place_selected(0, "1").expect("place"),
            Placement::Placed(Mutation::Cosmetic)
        );
        assert!(c.library().selection().is_none());
        assert!(c.select_image("c.png").is_err());
    }

    #[test]
    fn test_image_on_locked_page_is_not_moved() {
        let mut c = collection();
        c.assign(0, "1", "a.png").expect("assign");
        c.set_locked(0, true).expect("lock");
        let before = c.page(0).cloned();
        assert_eq!(c.assign(1, "2", "a.png").expect("assign"), Mutation::Unchanged);
        assert_eq!(c.page(0).cloned(), before);
        assert!(c.page(1).map_or(false, |p| p.slots.is_empty()));
    }

    #[test]
    fn test_place_on_locked_keeps_selection() {
        let mut c = collection();
        c.select_image("a.png").expect("select");
        c.toggle_lock(0).expect("lock");
        assert_eq!(c.place_selected(0, "1").expect("locked"), Placement::Locked);
        assert_eq!(c.library().selection(), Some("a.png"));
    }

    #[test]
    fn test_rebuild_empty_creates_default_page() {
        let mut c = collection();
        c.rebuild(Vec::new());
        assert_eq!(c.len(), 1);
        assert_eq!(c.page(0).map(|p| p.layout_name.as_str()), Some("four-panel-grid"));
    }

    #[test]
    fn test_rebuild_dedupes_and_registers_images() {
        let mut c = collection();
        let mut p0 = PageRecord::new("x");
        p0.slots.insert("1".into(), "new.png".into());
        let mut p1 = PageRecord::new("x");
        p1.slots.insert("1".into(), "new.png".into());
        c.rebuild(vec![p0, p1]);
        assert!(c.library().contains("new.png"));
        assert_eq!(c.page(1).map(|p| p.slots.len()), Some(0));
    }

    #[test]
    fn test_signature_changes_with_content() {
        let mut c = collection();
        let before = c.signature().expect("sig");
        c.assign(0, "1", "a.png").expect("assign");
        assert_ne!(before, c.signature().expect("sig"));
    }
}
