//! Template registry: named markup plus stylesheet pairs.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{LayoutError, LayoutResult};

/// A named layout template. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutTemplate {
    /// Template name (also added as a class on the layout element).
    pub name: String,
    /// Markup with `.panel[data-slot]` placeholders.
    pub markup: String,
    /// Stylesheet for the markup.
    pub stylesheet: String,
}

const BUILTIN: &[(&str, &str, &str)] = &[
    (
        "four-panel-grid",
        include_str!("../../templates/four-panel-grid.html"),
        include_str!("../../templates/four-panel-grid.css"),
    ),
    (
        "one-horizontal-top-two-vertical-angled-bottom",
        include_str!("../../templates/one-horizontal-top-two-vertical-angled-bottom.html"),
        include_str!("../../templates/one-horizontal-top-two-vertical-angled-bottom.css"),
    ),
    (
        "two-horizontal-angled",
        include_str!("../../templates/two-horizontal-angled.html"),
        include_str!("../../templates/two-horizontal-angled.css"),
    ),
    (
        "two-vertical-angled-top-one-horizontal-bottom",
        include_str!("../../templates/two-vertical-angled-top-one-horizontal-bottom.html"),
        include_str!("../../templates/two-vertical-angled-top-one-horizontal-bottom.css"),
    ),
];

/// Templates by name, iterated in name order.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Arc<LayoutTemplate>>,
}

impl TemplateRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the bundled templates.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (name, markup, css) in BUILTIN {
            registry.register(*name, *markup, *css);
        }
        registry
    }

    /// Build from `{name -> markup}` and `{name -> stylesheet}` maps. A
    /// template without a stylesheet gets an empty one.
    #[must_use]
    pub fn from_maps(
        markups: &HashMap<String, String>,
        stylesheets: &HashMap<String, String>,
    ) -> Self {
        let mut registry = Self::new();
        for (name, markup) in markups {
            let css = stylesheets.get(name).cloned().unwrap_or_default();
            registry.register(name.clone(), markup.clone(), css);
        }
        for name in stylesheets.keys().filter(|n| !markups.contains_key(*n)) {
            warn!(template = %name, "Stylesheet has no matching markup");
        }
        registry
    }

    /// Load every `NAME.html` (with optional `NAME.css`) from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::Io`] if the directory or a file cannot be read.
    pub fn load_dir(dir: impl AsRef<Path>) -> LayoutResult<Self> {
        let dir = dir.as_ref();
        let mut registry = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let markup = std::fs::read_to_string(&path)?;
            let css_path = path.with_extension("css");
            let css = if css_path.is_file() {
                std::fs::read_to_string(&css_path)?
            } else {
                String::new()
            };
            debug!(template = name, path = %path.display(), "Loaded template");
            registry.register(name.to_string(), markup, css);
        }
        Ok(registry)
    }

    /// Add or replace a template.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        markup: impl Into<String>,
        stylesheet: impl Into<String>,
    ) {
        let name = name.into();
        self.templates.insert(
            name.clone(),
            Arc::new(LayoutTemplate {
                name,
                markup: markup.into(),
                stylesheet: stylesheet.into(),
            }),
        );
    }

    /// Merge another registry in; its templates win on name clashes.
    pub fn extend(&mut self, other: Self) {
        self.templates.extend(other.templates);
    }

    /// Template by name.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::UnknownTemplate`].
    pub fn get(&self, name: &str) -> LayoutResult<Arc<LayoutTemplate>> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| LayoutError::UnknownTemplate(name.to_string()))
    }

    /// True if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// The first name in order, used for new pages.
    #[must_use]
    pub fn default_name(&self) -> Option<&str> {
        self.names().next()
    }

    /// Number of templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
