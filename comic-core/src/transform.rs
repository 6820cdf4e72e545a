//! Pan/zoom state for an image placed in a panel.
//!
//! Offsets are stored as percentages of the panel's content box so a page
//! renders identically at any size. Pixel offsets are derived on demand and
//! never persisted.

use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Rect, Size};

/// Smallest allowed zoom factor.
pub const MIN_SCALE: f64 = 0.5;

/// Largest allowed zoom factor.
pub const MAX_SCALE: f64 = 3.0;

/// Zoom change applied per wheel notch.
pub const WHEEL_STEP: f64 = 0.1;

fn default_scale() -> f64 {
    1.0
}

/// Zoom and offset of one placed image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformState {
    /// Zoom factor, clamped to [`MIN_SCALE`]..=[`MAX_SCALE`].
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Horizontal offset as a percentage of the content box width.
    #[serde(default, alias = "translateXPct")]
    pub translate_x_percent: f64,
    /// Vertical offset as a percentage of the content box height.
    #[serde(default, alias = "translateYPct")]
    pub translate_y_percent: f64,
}

impl Default for TransformState {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl TransformState {
    /// Unit scale, no offset.
    pub const IDENTITY: Self = Self {
        scale: 1.0,
        translate_x_percent: 0.0,
        translate_y_percent: 0.0,
    };

    /// Build a transform, clamping the scale and replacing non-finite values.
    #[must_use]
    pub fn new(scale: f64, translate_x_percent: f64, translate_y_percent: f64) -> Self {
        Self {
            scale,
            translate_x_percent,
            translate_y_percent,
        }
        .normalized()
    }

    /// Clamp the scale and replace NaN/infinite components with defaults.
    #[must_use]
    pub fn normalized(self) -> Self {
        let finite_or = |v: f64, d: f64| if v.is_finite() { v } else { d };
        Self {
            scale: clamp_scale(finite_or(self.scale, 1.0)),
            translate_x_percent: finite_or(self.translate_x_percent, 0.0),
            translate_y_percent: finite_or(self.translate_y_percent, 0.0),
        }
    }

    /// Offset in pixels for a content box of the given size.
    #[must_use]
    pub fn pixel_offset(&self, content: Size) -> Point {
        Point::new(
            content.width * self.translate_x_percent / 100.0,
            content.height * self.translate_y_percent / 100.0,
        )
    }

    /// Inverse of [`pixel_offset`](Self::pixel_offset). A zero-sized box
    /// yields a zero offset.
    #[must_use]
    pub fn from_pixel_offset(scale: f64, offset: Point, content: Size) -> Self {
        let pct = |px: f64, side: f64| if side > 0.0 { px / side * 100.0 } else { 0.0 };
        Self::new(
            scale,
            pct(offset.x, content.width),
            pct(offset.y, content.height),
        )
    }

    /// Where the image lands for a panel content box.
    ///
    /// The image first covers the box (aspect preserved, centered), is then
    /// zoomed about its center and finally shifted by the pixel offset.
    #[must_use]
    pub fn target_rect(&self, content: Rect, image: Size) -> Rect {
        if content.is_empty() || image.is_empty() {
            return Rect::new(content.x, content.y, 0.0, 0.0);
        }
        let cover = (content.width / image.width).max(content.height / image.height);
        let width = image.width * cover * self.scale;
        let height = image.height * cover * self.scale;
        let offset = self.pixel_offset(content.size());
        let center = content.center();
        Rect::new(
            center.x + offset.x - width / 2.0,
            center.y + offset.y - height / 2.0,
            width,
            height,
        )
    }
}

/// Clamp a zoom factor into the allowed range.
#[must_use]
pub fn clamp_scale(scale: f64) -> f64 {
    scale.clamp(MIN_SCALE, MAX_SCALE)
}

/// Latest-wins buffer that releases at most one value per display frame.
#[derive(Debug, Clone)]
pub struct FrameCoalescer<T> {
    pending: Option<T>,
}

impl<T> Default for FrameCoalescer<T> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<T> FrameCoalescer<T> {
    /// Create an empty coalescer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a value, replacing anything not yet released.
    pub fn stage(&mut self, value: T) {
        self.pending = Some(value);
    }

    /// Called once per frame; yields the latest staged value if any.
    pub fn on_frame(&mut self) -> Option<T> {
        self.pending.take()
    }

    /// True when a value is waiting for the next frame.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// What the caller should do after feeding input to a [`TransformController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputResponse {
    /// The input had no effect (locked page, no active drag).
    Ignored,
    /// A commit is staged for the next frame.
    Pending,
    /// A commit is staged and the interaction finished; schedule a persist.
    PersistRequested,
}

#[derive(Debug, Clone, Copy)]
struct DragAnchor {
    pointer_minus_offset: Point,
}

/// Interactive pan/zoom of one placed image.
///
/// Input handlers update the live transform immediately; committed values
/// are released through [`on_frame`](Self::on_frame) at most once per frame.
#[derive(Debug, Clone)]
pub struct TransformController {
    state: TransformState,
    content: Size,
    locked: bool,
    drag: Option<DragAnchor>,
    commits: FrameCoalescer<TransformState>,
}

impl TransformController {
    /// Start controlling `initial` inside a content box of `content` size.
    #[must_use]
    pub fn new(initial: TransformState, content: Size) -> Self {
        Self {
            state: initial.normalized(),
            content,
            locked: false,
            drag: None,
            commits: FrameCoalescer::new(),
        }
    }

    /// Reflect the owning page's lock flag. Locking cancels an active drag.
    pub fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
        if locked {
            self.drag = None;
        }
    }

    /// Live transform, including uncommitted input.
    #[must_use]
    pub fn state(&self) -> TransformState {
        self.state
    }

    /// Current pixel offset for the current content box.
    #[must_use]
    pub fn pixel_offset(&self) -> Point {
        self.state.pixel_offset(self.content)
    }

    /// True while a drag is in progress.
    #[must_use]
    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Wheel input. Negative `delta_y` (scrolling up) zooms in.
    pub fn wheel(&mut self, delta_y: f64) -> InputResponse {
        if self.locked || delta_y == 0.0 || !delta_y.is_finite() {
            return InputResponse::Ignored;
        }
        let step = if delta_y < 0.0 { WHEEL_STEP } else { -WHEEL_STEP };
        self.state.scale = clamp_scale(self.state.scale + step);
        self.commits.stage(self.state);
        InputResponse::PersistRequested
    }

    /// Pointer pressed on the image at `pointer` (layout pixels).
    pub fn pointer_down(&mut self, pointer: Point) -> InputResponse {
        if self.locked {
            return InputResponse::Ignored;
        }
        let offset = self.pixel_offset();
        self.drag = Some(DragAnchor {
            pointer_minus_offset: Point::new(pointer.x - offset.x, pointer.y - offset.y),
        });
        InputResponse::Ignored
    }

    /// Pointer moved; pans the image when a drag is active.
    pub fn pointer_move(&mut self, pointer: Point) -> InputResponse {
        let Some(anchor) = self.drag else {
            return InputResponse::Ignored;
        };
        let offset = Point::new(
            pointer.x - anchor.pointer_minus_offset.x,
            pointer.y - anchor.pointer_minus_offset.y,
        );
        self.state = TransformState::from_pixel_offset(self.state.scale, offset, self.content);
        self.commits.stage(self.state);
        InputResponse::Pending
    }

    /// Pointer released; ends the drag and requests a persist.
    pub fn pointer_up(&mut self) -> InputResponse {
        if self.drag.take().is_some() {
            self.commits.stage(self.state);
            InputResponse::PersistRequested
        } else {
            InputResponse::Ignored
        }
    }

    /// The panel's content box changed size. Percentages stay canonical, so
    /// the pixel offset is re-derived and returned.
    pub fn resize(&mut self, content: Size) -> Point {
        self.content = content;
        self.pixel_offset()
    }

    /// Frame tick: at most one committed transform.
    pub fn on_frame(&mut self) -> Option<TransformState> {
        self.commits.on_frame()
    }

    /// Commit now, bypassing the frame schedule.
    pub fn flush(&mut self) -> Option<TransformState> {
        self.commits.on_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_scale_is_clamped() {
        assert!(approx(TransformState::new(10.0, 0.0, 0.0).scale, MAX_SCALE));
        assert!(approx(TransformState::new(0.1, 0.0, 0.0).scale, MIN_SCALE));
        assert!(approx(TransformState::new(f64::NAN, 0.0, 0.0).scale, 1.0));
    }

    #[test]
    fn test_legacy_keys_deserialize() {
        let t: TransformState =
            serde_json::from_str(r#"{"scale":1.5,"translateXPct":10,"translateYPct":-5}"#)
                .expect("legacy transform");
        assert!(approx(t.translate_x_percent, 10.0));
        assert!(approx(t.translate_y_percent, -5.0));
        let json = serde_json::to_value(t).expect("serialize");
        assert!(json.get("translateXPercent").is_some());
    }

    #[test]
    fn test_missing_fields_default() {
        let t: TransformState = serde_json::from_str("{}").expect("empty transform");
        assert_eq!(t, TransformState::IDENTITY);
    }

    #[test]
    fn test_pixel_offset_round_trip() {
        let content = Size::new(400.0, 300.0);
        let t = TransformState::new(1.0, 25.0, -10.0);
        let px = t.pixel_offset(content);
        assert!(approx(px.x, 100.0));
        assert!(approx(px.y, -30.0));
        let back = TransformState::from_pixel_offset(1.0, px, content);
        assert!(approx(back.translate_x_percent, 25.0));
        assert!(approx(back.translate_y_percent, -10.0));
    }

    #[test]
    fn test_zero_box_yields_zero_percent() {
        let t = TransformState::from_pixel_offset(1.0, Point::new(50.0, 50.0), Size::default());
        assert!(approx(t.translate_x_percent, 0.0));
    }

    #[test]
    fn test_target_rect_covers_panel() {
        let content = Rect::new(10.0, 20.0, 200.0, 100.0);
        let rect = TransformState::IDENTITY.target_rect(content, Size::new(100.0, 100.0));
        assert!(approx(rect.width, 200.0));
        assert!(approx(rect.height, 200.0));
        assert!(approx(rect.x, 10.0));
        assert!(approx(rect.y, -30.0));
    }

    #[test]
    fn test_target_rect_zoom_and_offset() {
        let content = Rect::new(0.0, 0.0, 100.0, 100.0);
        let t = TransformState::new(2.0, 10.0, 0.0);
        let rect = t.target_rect(content, Size::new(50.0, 50.0));
        assert!(approx(rect.width, 200.0));
        assert!(approx(rect.x, -40.0));
        assert!(approx(rect.y, -50.0));
    }

    #[test]
    fn test_wheel_direction_and_clamp() {
        let mut ctl = TransformController::new(TransformState::IDENTITY, Size::new(100.0, 100.0));
        assert_eq!(ctl.wheel(-1.0), InputResponse::PersistRequested);
        assert!(approx(ctl.state().scale, 1.1));
        for _ in 0..50 {
            ctl.wheel(-1.0);
        }
        assert!(approx(ctl.state().scale, MAX_SCALE));
        for _ in 0..50 {
            ctl.wheel(1.0);
        }
        assert!(approx(ctl.state().scale, MIN_SCALE));
    }

    #[test]
    fn test_drag_converts_pixels_to_percent() {
        let mut ctl = TransformController::new(TransformState::IDENTITY, Size::new(200.0, 100.0));
        ctl.pointer_down(Point::new(10.0, 10.0));
        assert_eq!(ctl.pointer_move(Point::new(60.0, 30.0)), InputResponse::Pending);
        let t = ctl.state();
        assert!(approx(t.translate_x_percent, 25.0));
        assert!(approx(t.translate_y_percent, 20.0));
        assert_eq!(ctl.pointer_up(), InputResponse::PersistRequested);
        assert!(!ctl.is_dragging());
    }

    #[test]
    fn test_commits_coalesce_per_frame() {
        let mut ctl = TransformController::new(TransformState::IDENTITY, Size::new(100.0, 100.0));
        ctl.pointer_down(Point::new(0.0, 0.0));
        for i in 1..=10 {
            ctl.pointer_move(Point::new(f64::from(i), 0.0));
        }
        let committed = ctl.on_frame().expect("one commit");
        assert!(approx(committed.translate_x_percent, 10.0));
        assert!(ctl.on_frame().is_none());
    }

    #[test]
    fn test_locked_controller_ignores_input() {
        let mut ctl = TransformController::new(TransformState::IDENTITY, Size::new(100.0, 100.0));
        ctl.set_locked(true);
        assert_eq!(ctl.wheel(-1.0), InputResponse::Ignored);
        assert_eq!(ctl.pointer_down(Point::new(0.0, 0.0)), InputResponse::Ignored);
        assert_eq!(ctl.pointer_move(Point::new(5.0, 5.0)), InputResponse::Ignored);
        assert!(ctl.on_frame().is_none());
    }

    #[test]
    fn test_resize_keeps_percent() {
        let mut ctl =
            TransformController::new(TransformState::new(1.0, 50.0, 0.0), Size::new(100.0, 100.0));
        let px = ctl.resize(Size::new(300.0, 100.0));
        assert!(approx(px.x, 150.0));
        assert!(approx(ctl.state().translate_x_percent, 50.0));
    }
}
