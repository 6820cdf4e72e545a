//! Turn a template name into panels and clip regions, once per name.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use super::clip::ClipRegion;
use super::markup::{Document, NodeId};
use super::stylesheet::{MediaEnv, Stylesheet};
use super::template::TemplateRegistry;
use crate::error::{LayoutError, LayoutResult};
use crate::page::SlotId;

/// Where a panel's clip region came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipSource {
    /// The panel's `data-clip-polygon` attribute.
    Attribute,
    /// A `clip-path` declaration in the stylesheet.
    Stylesheet,
    /// No clip declared, or the declaration could not be read.
    None,
}

/// One panel of a resolved template.
#[derive(Debug, Clone)]
pub struct PanelSpec {
    /// Slot id from `data-slot`.
    pub slot: SlotId,
    /// The panel element.
    pub element: NodeId,
    /// The `.panel-inner` element, if present.
    pub inner: Option<NodeId>,
    /// Declared clip region, unresolved.
    pub clip: Option<ClipRegion>,
    /// Provenance of `clip`.
    pub clip_source: ClipSource,
}

/// A template instantiated and analysed for one media environment.
#[derive(Debug, Clone)]
pub struct ResolvedLayout {
    /// Template name.
    pub name: String,
    /// Instantiated markup.
    pub document: Document,
    /// Parsed stylesheet.
    pub stylesheet: Stylesheet,
    /// The `.layout` element.
    pub layout_element: NodeId,
    /// Panels in template order.
    pub panels: Vec<PanelSpec>,
    /// Environment the stylesheet was evaluated against.
    pub env: MediaEnv,
}

impl ResolvedLayout {
    /// Panel by slot id.
    #[must_use]
    pub fn panel(&self, slot: &str) -> Option<&PanelSpec> {
        self.panels.iter().find(|p| p.slot == slot)
    }

    /// Slot ids in template order.
    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.panels.iter().map(|p| p.slot.as_str())
    }
}

/// Resolves templates and caches the result per name.
#[derive(Debug)]
pub struct LayoutResolver {
    registry: TemplateRegistry,
    env: MediaEnv,
    cache: RwLock<HashMap<String, Arc<ResolvedLayout>>>,
}

impl LayoutResolver {
    /// Resolver over `registry` evaluating media queries against `env`.
    #[must_use]
    pub fn new(registry: TemplateRegistry, env: MediaEnv) -> Self {
        Self {
            registry,
            env,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolver over the bundled templates with the default viewport.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(TemplateRegistry::builtin(), MediaEnv::default())
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// Media environment in use.
    #[must_use]
    pub fn env(&self) -> MediaEnv {
        self.env
    }

    /// Resolve `name`, reusing the cached result when present.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::UnknownTemplate`] or [`LayoutError::Markup`].
    pub fn resolve(&self, name: &str) -> LayoutResult<Arc<ResolvedLayout>> {
        if let Some(hit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(hit));
        }

        let resolved = Arc::new(self.resolve_uncached(name)?);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::clone(&resolved));
        Ok(resolved)
    }

    /// Number of cached templates.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn resolve_uncached(&self, name: &str) -> LayoutResult<ResolvedLayout> {
        let template = self.registry.get(name)?;
        let markup_error = |message: String| LayoutError::Markup {
            template: name.to_string(),
            message,
        };
        let mut document =
            Document::parse(&template.markup).map_err(|e| markup_error(e.to_string()))?;

        let layout_element = document
            .find_descendant(Document::ROOT, |e| e.has_class("layout"))
            .or_else(|| document.element(Document::ROOT).children.first().copied())
            .ok_or_else(|| markup_error("template has no elements".to_string()))?;

        if let Some(el) = document.element_mut(layout_element) {
            if !el.has_class(name) {
                let classes = format!("{} {name}", el.attr("class").unwrap_or("")).trim().to_string();
                el.set_attr("class", classes);
            }
            el.set_attr("data-layout-name", name);
        }

        let stylesheet = Stylesheet::parse(&template.stylesheet);
        let mut panels = Vec::new();
        let mut seen = HashSet::new();

        for node in document.descendants(layout_element) {
            let element = document.element(node);
            if !element.has_class("panel") {
                continue;
            }
            let Some(slot) = element.attr("data-slot").map(str::trim).filter(|s| !s.is_empty())
            else {
                warn!(template = name, "Panel without data-slot ignored");
                continue;
            };
            if !seen.insert(slot.to_string()) {
                return Err(markup_error(format!("duplicate slot {slot}")));
            }

            let (clip, clip_source) = match element.attr("data-clip-polygon") {
                Some(value) => (read_clip(name, slot, value), ClipSource::Attribute),
                None => {
                    let style = stylesheet.computed_style(&document, node, &self.env);
                    match style.get("clip-path") {
                        Some(value) => (read_clip(name, slot, value), ClipSource::Stylesheet),
                        None => (None, ClipSource::None),
                    }
                }
            };
            let clip_source = if clip.is_some() {
                clip_source
            } else {
                ClipSource::None
            };
            let inner = document.find_descendant(node, |e| e.has_class("panel-inner"));

            panels.push(PanelSpec {
                slot: slot.to_string(),
                element: node,
                inner,
                clip,
                clip_source,
            });
        }

        debug!(template = name, panels = panels.len(), "Template resolved");
        Ok(ResolvedLayout {
            name: name.to_string(),
            document,
            stylesheet,
            layout_element,
            panels,
            env: self.env,
        })
    }
}

fn read_clip(template: &str, slot: &str, value: &str) -> Option<ClipRegion> {
    match ClipRegion::parse(value) {
        Ok(region) => region,
        Err(err) => {
            warn!(template, slot, error = %err, "Unreadable clip path, panel left unclipped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_builtin_attribute_clips() {
        let resolver = LayoutResolver::builtin();
        let layout = resolver.resolve("two-horizontal-angled").expect("resolve");
        assert_eq!(layout.slots().collect::<Vec<_>>(), vec!["1", "2"]);
        let p1 = layout.panel("1").expect("panel 1");
        assert_eq!(p1.clip_source, ClipSource::Attribute);
        assert!(p1.clip.is_some());
        assert!(p1.inner.is_some());
    }

    #[test]
    fn test_resolve_stylesheet_clips_respect_media() {
        let wide = LayoutResolver::new(TemplateRegistry::builtin(), MediaEnv::new(1024.0, 768.0));
        let layout = wide.resolve("four-panel-grid").expect("resolve");
        assert_eq!(layout.panel("2").map(|p| p.clip_source), Some(ClipSource::Stylesheet));
        assert_eq!(layout.panel("3").map(|p| p.clip_source), Some(ClipSource::Stylesheet));
        assert_eq!(layout.panel("1").map(|p| p.clip_source), Some(ClipSource::None));

        let narrow = LayoutResolver::new(TemplateRegistry::builtin(), MediaEnv::new(500.0, 800.0));
        let layout = narrow.resolve("four-panel-grid").expect("resolve");
        assert_eq!(layout.panel("2").map(|p| p.clip_source), Some(ClipSource::None));
    }

    #[test]
    fn test_resolution_is_cached() {
        let resolver = LayoutResolver::builtin();
        let a = resolver.resolve("four-panel-grid").expect("first");
        let b = resolver.resolve("four-panel-grid").expect("second");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(resolver.cached(), 1);
    }

    #[test]
    fn test_unknown_template() {
        let resolver = LayoutResolver::builtin();
        assert!(matches!(
            resolver.resolve("missing"),
            Err(LayoutError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn test_bad_clip_falls_back_to_unclipped() {
        let mut reg = TemplateRegistry::new();
        reg.register(
            "odd",
            r#"<div class="layout"><div class="panel" data-slot="1" data-clip-polygon="circle(40%)"></div></div>"#,
            "",
        );
        let resolver = LayoutResolver::new(reg, MediaEnv::default());
        let layout = resolver.resolve("odd").expect("resolve");
        let panel = layout.panel("1").expect("panel");
        assert!(panel.clip.is_none());
        assert_eq!(panel.clip_source, ClipSource::None);
        assert!(layout
            .document
            .element(layout.layout_element)
            .has_class("odd"));
    }

    #[test]
    fn test_duplicate_slot_is_markup_error() {
        let mut reg = TemplateRegistry::new();
        reg.register(
            "dup",
            r#"<div class="layout"><div class="panel" data-slot="1"></div><div class="panel" data-slot="1"></div></div>"#,
            "",
        );
        let resolver = LayoutResolver::new(reg, MediaEnv::default());
        assert!(matches!(resolver.resolve("dup"), Err(LayoutError::Markup { .. })));
    }
}
