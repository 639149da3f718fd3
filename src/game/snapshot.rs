//! Render snapshot and key-input descriptors.
//!
//! The engine core does not draw or listen for keys; it exposes an immutable
//! [`Snapshot`] per frame for whatever renderer sits on top, and accepts
//! [`KeyEvent`]s produced by whatever window layer exists. Both sides of the
//! interface are plain serialisable values.

use serde::Serialize;

use crate::geometry::Vec2;

/// Immutable view of one frame, cheap to hand to a renderer or to a JSON
/// trace writer.
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub board: String,
    pub balls: Vec<BallView>,
    pub flippers: Vec<FlipperView>,
    /// Static background; identical every frame, drawn once by renderers.
    pub statics: Vec<ShapeView>,
    /// Wall banner names, indexed left/right/top/bottom.
    pub joins: [Option<String>; 4],
}

#[derive(Clone, Debug, Serialize)]
pub struct BallView {
    pub name: String,
    pub pos: Vec2,
    pub vel: Vec2,
}

#[derive(Clone, Debug, Serialize)]
pub struct FlipperView {
    pub name: String,
    pub p1: Vec2,
    pub p2: Vec2,
    pub moving: bool,
}

#[derive(Clone, Debug, Serialize)]
pub enum ShapeView {
    Rect { pos: Vec2, width: f64, height: f64 },
    Circle { center: Vec2, radius: f64 },
    Polygon { points: Vec<Vec2> },
}

/// A `keydown`/`keyup` line from the board file: when `key` sees the named
/// edge, the gadget fires.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeyBinding {
    pub on_press: bool,
    pub key: String,
    pub action: String,
}

/// One key edge delivered by the input layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub pressed: bool,
}
