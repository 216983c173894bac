//! Screen/document coordinate math
//!
//! Screen space is the rendered page in the viewport: top-left origin, pixels.
//! Document space here is the page in unscaled units, also top-left origin;
//! the flip to the PDF's bottom-left origin happens only when flattening.
//! `screen = document * scale`.
//!
//! Everything in this module is a pure function of its inputs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A pointer position relative to the current page's top-left corner, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &ScreenPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// A position on the page in unscaled units, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DocPoint {
    pub x: f64,
    pub y: f64,
}

impl DocPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Clamp both axes to be non-negative.
    pub fn clamped(self) -> Self {
        Self {
            x: self.x.max(0.0),
            y: self.y.max(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DocSize {
    pub width: f64,
    pub height: f64,
}

impl DocSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned box in document space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DocRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl DocRect {
    pub fn new(origin: DocPoint, size: DocSize) -> Self {
        Self {
            x: origin.x,
            y: origin.y,
            width: size.width,
            height: size.height,
        }
    }

    pub fn origin(&self) -> DocPoint {
        DocPoint::new(self.x, self.y)
    }

    pub fn size(&self) -> DocSize {
        DocSize::new(self.width, self.height)
    }

    pub fn to_screen(&self, scale: f64) -> ScreenRect {
        ScreenRect {
            left: self.x * scale,
            top: self.y * scale,
            width: self.width * scale,
            height: self.height * scale,
        }
    }
}

/// Box in screen pixels, as handed to the page for absolute positioning.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

pub fn screen_to_document(point: ScreenPoint, scale: f64) -> DocPoint {
    DocPoint::new(point.x / scale, point.y / scale)
}

pub fn document_to_screen(point: DocPoint, scale: f64) -> ScreenPoint {
    ScreenPoint::new(point.x * scale, point.y * scale)
}

/// Live position of a dragged element.
///
/// The pointer delta since the press is converted to document units and added
/// to the position the element had at the press; each axis is clamped to zero
/// independently.
pub fn drag_position(start: DocPoint, press: ScreenPoint, current: ScreenPoint, scale: f64) -> DocPoint {
    DocPoint::new(
        start.x + (current.x - press.x) / scale,
        start.y + (current.y - press.y) / scale,
    )
    .clamped()
}

/// Whether pointer travel from the press point exceeds the drag threshold.
pub fn exceeds_drag_threshold(press: ScreenPoint, current: ScreenPoint, threshold_px: f64) -> bool {
    press.distance_to(&current) > threshold_px
}

/// Tracks one press on an element until it either becomes a drag or is released as a click.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragTracker {
    start: DocPoint,
    press: ScreenPoint,
    scale: f64,
    threshold_px: f64,
    engaged: bool,
}

impl DragTracker {
    pub fn new(start: DocPoint, press: ScreenPoint, scale: f64, threshold_px: f64) -> Self {
        Self {
            start,
            press,
            scale,
            threshold_px,
            engaged: false,
        }
    }

    /// Feed a pointer position. Returns the new element position once the
    /// press has qualified as a drag; `None` while it is still a click.
    pub fn update(&mut self, current: ScreenPoint) -> Option<DocPoint> {
        if !self.engaged && exceeds_drag_threshold(self.press, current, self.threshold_px) {
            self.engaged = true;
        }
        self.engaged
            .then(|| drag_position(self.start, self.press, current, self.scale))
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    pub fn start(&self) -> DocPoint {
        self.start
    }
}

/// Resize affordance on an element's bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Handle {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Top,
    Bottom,
    Left,
    Right,
}

impl Handle {
    pub const CORNERS: [Handle; 4] = [
        Handle::TopLeft,
        Handle::TopRight,
        Handle::BottomLeft,
        Handle::BottomRight,
    ];

    pub const ALL: [Handle; 8] = [
        Handle::TopLeft,
        Handle::TopRight,
        Handle::BottomLeft,
        Handle::BottomRight,
        Handle::Top,
        Handle::Bottom,
        Handle::Left,
        Handle::Right,
    ];

    pub fn is_corner(self) -> bool {
        matches!(
            self,
            Handle::TopLeft | Handle::TopRight | Handle::BottomLeft | Handle::BottomRight
        )
    }

    /// The left edge moves (so the right edge is the anchor).
    pub fn moves_left(self) -> bool {
        matches!(self, Handle::TopLeft | Handle::BottomLeft | Handle::Left)
    }

    pub fn moves_right(self) -> bool {
        matches!(self, Handle::TopRight | Handle::BottomRight | Handle::Right)
    }

    /// The top edge moves (so the bottom edge is the anchor).
    pub fn moves_top(self) -> bool {
        matches!(self, Handle::TopLeft | Handle::TopRight | Handle::Top)
    }

    pub fn moves_bottom(self) -> bool {
        matches!(self, Handle::BottomLeft | Handle::BottomRight | Handle::Bottom)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Handle::TopLeft => "top-left",
            Handle::TopRight => "top-right",
            Handle::BottomLeft => "bottom-left",
            Handle::BottomRight => "bottom-right",
            Handle::Top => "top",
            Handle::Bottom => "bottom",
            Handle::Left => "left",
            Handle::Right => "right",
        }
    }

    /// Where this handle sits on `rect`.
    pub fn anchor_on(self, rect: &DocRect) -> DocPoint {
        let (left, top) = (rect.x, rect.y);
        let (right, bottom) = (rect.x + rect.width, rect.y + rect.height);
        let (mid_x, mid_y) = (left + rect.width / 2.0, top + rect.height / 2.0);
        match self {
            Handle::TopLeft => DocPoint::new(left, top),
            Handle::TopRight => DocPoint::new(right, top),
            Handle::BottomLeft => DocPoint::new(left, bottom),
            Handle::BottomRight => DocPoint::new(right, bottom),
            Handle::Top => DocPoint::new(mid_x, top),
            Handle::Bottom => DocPoint::new(mid_x, bottom),
            Handle::Left => DocPoint::new(left, mid_y),
            Handle::Right => DocPoint::new(right, mid_y),
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Handle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Handle::ALL
            .into_iter()
            .find(|h| h.as_str() == s)
            .ok_or_else(|| format!("Unknown resize handle: {}", s))
    }
}

/// Find the handle under a screen point, if any.
///
/// `handles` restricts the candidates (images only expose corners);
/// `radius_px` is the hit radius around each handle centre.
pub fn hit_test_handle(
    rect: &DocRect,
    handles: &[Handle],
    point: ScreenPoint,
    scale: f64,
    radius_px: f64,
) -> Option<Handle> {
    handles.iter().copied().find(|handle| {
        let centre = document_to_screen(handle.anchor_on(rect), scale);
        centre.distance_to(&point) <= radius_px
    })
}

/// Geometry captured when a resize session starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeStart {
    pub rect: DocRect,
    pub press: ScreenPoint,
    pub scale: f64,
}

impl ResizeStart {
    /// Pointer delta since the press, in document units.
    pub fn delta(&self, current: ScreenPoint) -> (f64, f64) {
        (
            (current.x - self.press.x) / self.scale,
            (current.y - self.press.y) / self.scale,
        )
    }
}

/// Independent-axis resize (text boxes).
///
/// Width follows horizontal handles, height follows vertical ones; a handle
/// on the left or top side shifts the origin so the opposite side stays put.
/// Each dimension is clamped to its own floor.
pub fn resize_free(
    start: &ResizeStart,
    handle: Handle,
    current: ScreenPoint,
    min_width: f64,
    min_height: f64,
) -> DocRect {
    let (dx, dy) = start.delta(current);
    let s = start.rect;
    let mut out = s;

    if handle.moves_right() {
        out.width = (s.width + dx).max(min_width);
    } else if handle.moves_left() {
        out.width = (s.width - dx).min(s.x + s.width).max(min_width);
        out.x = (s.x + s.width - out.width).max(0.0);
    }

    if handle.moves_bottom() {
        out.height = (s.height + dy).max(min_height);
    } else if handle.moves_top() {
        out.height = (s.height - dy).min(s.y + s.height).max(min_height);
        out.y = (s.y + s.height - out.height).max(0.0);
    }

    out
}

/// The single scale delta of an aspect-locked corner drag.
///
/// Whichever axis the user pulls further outward wins, so either axis can be
/// used to resize uniformly.
pub fn aspect_scale_delta(corner: Handle, dx: f64, dy: f64) -> f64 {
    match corner {
        Handle::BottomRight => dx.max(dy),
        Handle::TopLeft => (-dx).max(-dy),
        Handle::TopRight => dx.max(-dy),
        Handle::BottomLeft => (-dx).max(dy),
        // Edge handles never reach here; treat as horizontal/vertical pulls.
        Handle::Right => dx,
        Handle::Left => -dx,
        Handle::Bottom => dy,
        Handle::Top => -dy,
    }
}

/// Aspect-locked corner resize (images).
///
/// Returns `None` for edge handles: locked resize is corner-only. The aspect
/// ratio is the one of `start.rect`. The width floor is raised so that the
/// derived height also respects `min_side`.
pub fn resize_locked(
    start: &ResizeStart,
    corner: Handle,
    current: ScreenPoint,
    min_side: f64,
) -> Option<DocRect> {
    if !corner.is_corner() {
        return None;
    }
    let s = start.rect;
    if s.width <= 0.0 || s.height <= 0.0 {
        return None;
    }
    let ratio = s.width / s.height;
    let (dx, dy) = start.delta(current);
    let delta = aspect_scale_delta(corner, dx, dy);

    // Growing towards the page origin must not push the box past it.
    let mut cap = f64::INFINITY;
    if corner.moves_left() {
        cap = cap.min(s.x + s.width);
    }
    if corner.moves_top() {
        cap = cap.min((s.y + s.height) * ratio);
    }
    let width_floor = min_side.max(min_side * ratio);

    let width = (s.width + delta).min(cap).max(width_floor);
    let height = width / ratio;

    let x = if corner.moves_left() {
        (s.x + (s.width - width)).max(0.0)
    } else {
        s.x
    };
    let y = if corner.moves_top() {
        (s.y + (s.height - height)).max(0.0)
    } else {
        s.y
    };

    Some(DocRect {
        x,
        y,
        width,
        height,
    })
}

/// Fit a natural image size inside a `max_side` square without upscaling,
/// then raise it (keeping proportions) until both sides reach `min_side`.
pub fn fit_natural_size(natural: DocSize, max_side: f64, min_side: f64) -> DocSize {
    if natural.width <= 0.0 || natural.height <= 0.0 {
        return DocSize::new(min_side, min_side);
    }
    let longest = natural.width.max(natural.height);
    let shrink = if longest > max_side { max_side / longest } else { 1.0 };
    let mut size = DocSize::new(natural.width * shrink, natural.height * shrink);

    let shortest = size.width.min(size.height);
    if shortest < min_side {
        let grow = min_side / shortest;
        size = DocSize::new(size.width * grow, size.height * grow);
    }
    size
}
