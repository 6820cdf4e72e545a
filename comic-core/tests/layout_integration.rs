//! Integration tests for template resolution and offscreen geometry.

use comic_core::layout::{ClipSource, OffscreenGeometry, PanelGeometryProvider};
use comic_core::{LayoutError, LayoutResolver, MediaEnv, Rgba, TemplateRegistry};

// ==========================================================================
// Built-in templates
// ==========================================================================

#[test]
fn test_builtin_templates_all_measure() {
    let resolver = LayoutResolver::builtin();
    let names: Vec<String> = resolver.registry().names().map(str::to_string).collect();
    assert_eq!(names.len(), 4);
    for name in names {
        let layout = resolver.resolve(&name).expect("resolve builtin");
        let geometry = OffscreenGeometry::new()
            .measure(&layout)
            .expect("measure builtin");
        assert_eq!(geometry.panels.len(), layout.panels.len(), "{name}");
        for panel in &geometry.panels {
            assert!(panel.frame.right() <= geometry.size.width + 1e-6, "{name}");
            assert!(panel.frame.bottom() <= geometry.size.height + 1e-6, "{name}");
        }
    }
}

#[test]
fn test_angled_panels_need_masks() {
    let resolver = LayoutResolver::builtin();
    let layout = resolver.resolve("two-horizontal-angled").expect("resolve");
    assert!(layout
        .panels
        .iter()
        .all(|p| p.clip_source == ClipSource::Attribute));
    let geometry = OffscreenGeometry::new().measure(&layout).expect("measure");
    assert!(geometry.panels.iter().all(|p| p.needs_mask()));
}

#[test]
fn test_rectangular_clip_skips_mask() {
    let resolver = LayoutResolver::builtin();
    let layout = resolver
        .resolve("one-horizontal-top-two-vertical-angled-bottom")
        .expect("resolve");
    let geometry = OffscreenGeometry::new().measure(&layout).expect("measure");
    let first = geometry.panels.first().expect("panel 1");
    assert!(!first.needs_mask());
    assert!(geometry.panels.iter().skip(1).all(|p| p.needs_mask()));
}

#[test]
fn test_layout_background_is_gutter() {
    let resolver = LayoutResolver::builtin();
    let layout = resolver.resolve("four-panel-grid").expect("resolve");
    let geometry = OffscreenGeometry::new().measure(&layout).expect("measure");
    assert_eq!(geometry.background, Rgba::parse("#cccccc"));
}

// ==========================================================================
// Custom templates
// ==========================================================================

#[test]
fn test_right_bottom_positioning() {
    let mut registry = TemplateRegistry::new();
    registry.register(
        "corner",
        r#"<div class="layout"><div class="panel" data-slot="x"></div></div>"#,
        ".layout { width: 200px; height: 100px; }
         .panel { right: 10px; bottom: 10%; width: 50px; height: 20px; border-radius: 4px 8px; }",
    );
    let resolver = LayoutResolver::new(registry, MediaEnv::default());
    let layout = resolver.resolve("corner").expect("resolve");
    let geometry = OffscreenGeometry::new().measure(&layout).expect("measure");
    let panel = &geometry.panels[0];
    assert!((panel.frame.x - 140.0).abs() < 1e-9);
    assert!((panel.frame.y - 70.0).abs() < 1e-9);
    assert!((panel.radii.top_right - 8.0).abs() < 1e-9);
    assert_eq!(panel.background, None);
}

#[test]
fn test_inline_clip_overrides_stylesheet() {
    let mut registry = TemplateRegistry::new();
    registry.register(
        "inline",
        r#"<div class="layout"><div class="panel" data-slot="a" style="clip-path: polygon(0 0, 100% 0, 50% 100%)"></div></div>"#,
        ".layout { width: 100px; height: 100px; }
         .panel { left: 0; top: 0; width: 100%; height: 100%; clip-path: none; }",
    );
    let resolver = LayoutResolver::new(registry, MediaEnv::default());
    let layout = resolver.resolve("inline").expect("resolve");
    assert_eq!(layout.panels[0].clip_source, ClipSource::Stylesheet);
    let geometry = OffscreenGeometry::new().measure(&layout).expect("measure");
    assert!(geometry.panels[0].needs_mask());
}

#[test]
fn test_missing_template_is_error() {
    let resolver = LayoutResolver::builtin();
    assert!(matches!(
        resolver.resolve("nope"),
        Err(LayoutError::UnknownTemplate(_))
    ));
}

#[test]
fn test_load_dir_templates_resolve() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("strip.html"),
        r#"<div class="layout"><div class="panel" data-slot="1" data-clip-polygon="polygon(0 0, 100% 10%, 100% 100%, 0 100%)"></div></div>"#,
    )
    .expect("write html");
    std::fs::write(
        dir.path().join("strip.css"),
        ".layout { width: 300px; height: 100px; } .panel { left: 0; top: 0; width: 100%; height: 100%; }",
    )
    .expect("write css");
    let registry = TemplateRegistry::load_dir(dir.path()).expect("load dir");
    let resolver = LayoutResolver::new(registry, MediaEnv::default());
    let layout = resolver.resolve("strip").expect("resolve");
    let geometry = OffscreenGeometry::new().measure(&layout).expect("measure");
    assert!((geometry.size.width - 300.0).abs() < 1e-9);
    assert!(geometry.panels[0].needs_mask());
}
