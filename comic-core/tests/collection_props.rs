//! Property tests for the page collection and transforms.

use std::collections::HashSet;

use comic_core::{
    clamp_scale, PageCollection, PageRecord, Point, Size, TransformState, MAX_SCALE, MIN_SCALE,
};
use proptest::prelude::*;

const IMAGES: [&str; 5] = ["a.png", "b.png", "c.png", "d.png", "e.png"];
const SLOTS: [&str; 4] = ["1", "2", "3", "4"];
const GUTTERS: [&str; 3] = ["#000000", "#1a2b3c", "rgba(10, 20, 30, 0.5)"];

#[derive(Debug, Clone)]
enum Op {
    AddPage,
    DeletePage(usize),
    Assign(usize, usize, usize),
    Clear(usize, usize),
    Lock(usize),
    DeleteImage(usize),
    AddImage(usize),
    Layout(usize, bool),
    Drag(usize, usize, f64, f64, f64, f64, f64),
    Gutter(usize, usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::AddPage),
        (0usize..4).prop_map(Op::DeletePage),
        (0usize..4, 0usize..4, 0usize..5).prop_map(|(p, s, i)| Op::Assign(p, s, i)),
        (0usize..4, 0usize..4).prop_map(|(p, s)| Op::Clear(p, s)),
        (0usize..4).prop_map(Op::Lock),
        (0usize..5).prop_map(Op::DeleteImage),
        (0usize..5).prop_map(Op::AddImage),
        (0usize..4, any::<bool>()).prop_map(|(p, b)| Op::Layout(p, b)),
        (
            (0usize..4, 0usize..4),
            (0.5f64..3.0, -400.0f64..400.0, -400.0f64..400.0),
            (1.0f64..2000.0, 1.0f64..2000.0),
        )
            .prop_map(|((p, s), (k, dx, dy), (w, h))| Op::Drag(p, s, k, dx, dy, w, h)),
        (0usize..4, 0usize..3).prop_map(|(p, g)| Op::Gutter(p, g)),
    ]
}

fn apply(c: &mut PageCollection, op: &Op) {
    // Errors (bad index, unknown image, locked layout change) are expected
    // for random input; only the invariants matter here.
    match op {
        Op::AddPage => {
            c.add_page(None);
        }
        Op::DeletePage(p) => {
            let _ = c.delete_page(*p);
        }
        Op::Assign(p, s, i) => {
            let _ = c.assign(*p, SLOTS[*s], IMAGES[*i]);
        }
        Op::Clear(p, s) => {
            let _ = c.clear_slot(*p, SLOTS[*s]);
        }
        Op::Lock(p) => {
            let _ = c.toggle_lock(*p);
        }
        Op::DeleteImage(i) => {
            let _ = c.delete_image(IMAGES[*i]);
        }
        Op::AddImage(i) => {
            c.add_image(IMAGES[*i]);
        }
        Op::Layout(p, grid) => {
            let name = if *grid {
                "four-panel-grid"
            } else {
                "two-horizontal-angled"
            };
            let _ = c.change_layout(*p, name);
        }
        Op::Drag(p, s, k, dx, dy, w, h) => {
            let t = TransformState::from_pixel_offset(*k, Point::new(*dx, *dy), Size::new(*w, *h));
            let _ = c.set_transform(*p, SLOTS[*s], t);
        }
        Op::Gutter(p, g) => {
            let _ = c.set_gutter_color(*p, GUTTERS[*g]);
        }
    }
}

fn seeded() -> PageCollection {
    let mut c = PageCollection::new("four-panel-grid");
    for image in IMAGES {
        c.add_image(image);
    }
    c.add_page(None);
    c
}

proptest! {
    #[test]
    fn prop_image_placed_at_most_once(ops in prop::collection::vec(arb_op(), 0..40)) {
        let mut c = seeded();
        for op in &ops {
            apply(&mut c, op);
        }
        let mut seen = HashSet::new();
        for page in c.pages() {
            for image in page.images() {
                prop_assert!(seen.insert(image.to_string()), "{} placed twice", image);
                prop_assert!(c.library().contains(image), "{} placed but not in library", image);
            }
        }
        let partition = c.partition();
        prop_assert_eq!(partition.assigned.len() + partition.unassigned.len(), c.library().len());
    }

    #[test]
    fn prop_transforms_only_for_occupied_slots(ops in prop::collection::vec(arb_op(), 0..40)) {
        let mut c = seeded();
        for op in &ops {
            apply(&mut c, op);
        }
        for page in c.pages() {
            for slot in page.transforms.keys() {
                prop_assert!(page.slots.contains_key(slot));
            }
        }
    }

    #[test]
    fn prop_rebuild_never_leaves_zero_pages(ops in prop::collection::vec(arb_op(), 0..20)) {
        let mut c = seeded();
        for op in &ops {
            apply(&mut c, op);
        }
        let pages: Vec<PageRecord> = c.pages().to_vec();
        let sig = c.signature().expect("signature");
        c.rebuild(pages);
        prop_assert!(!c.is_empty());
        if !sig.is_empty() && sig != "[]" {
            prop_assert_eq!(c.signature().expect("signature"), sig);
        }
    }

    #[test]
    fn prop_save_and_reload_is_identical(ops in prop::collection::vec(arb_op(), 0..40)) {
        let mut c = seeded();
        for op in &ops {
            apply(&mut c, op);
        }
        prop_assume!(!c.is_empty());
        let saved = c.signature().expect("signature");

        let wire = serde_json::to_string(c.pages()).expect("encode");
        let loaded: Vec<PageRecord> = serde_json::from_str(&wire).expect("decode");
        let mut reloaded = PageCollection::new("four-panel-grid");
        reloaded.apply_loaded_state(loaded, IMAGES);

        prop_assert_eq!(reloaded.pages(), c.pages());
        prop_assert_eq!(reloaded.signature().expect("signature"), saved);
    }

    #[test]
    fn prop_scale_always_clamped(scale in -10.0f64..10.0, dx in -500.0f64..500.0, dy in -500.0f64..500.0) {
        let t = TransformState::new(scale, dx, dy);
        prop_assert!(t.scale >= MIN_SCALE && t.scale <= MAX_SCALE);
        prop_assert!((clamp_scale(t.scale) - t.scale).abs() < f64::EPSILON);
    }

    #[test]
    fn prop_percent_offsets_are_resolution_independent(
        px in 0.0f64..100.0,
        py in 0.0f64..100.0,
        w in 10.0f64..2000.0,
        h in 10.0f64..2000.0,
        k in 0.25f64..4.0,
    ) {
        let small = Size::new(w, h);
        let large = Size::new(w * k, h * k);
        let t = TransformState::new(1.0, px, py);
        let a = t.pixel_offset(small);
        let b = t.pixel_offset(large);
        prop_assert!((a.x * k - b.x).abs() < 1e-6);
        prop_assert!((a.y * k - b.y).abs() < 1e-6);
    }
}
