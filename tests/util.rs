// This is almost certainly not all used in all tests.
#![allow(dead_code)]
use paintfe_core::geometry::{PointF, Rect};
use paintfe_core::ops::interpolator::Quad;
use paintfe_core::{CanvasState, CoreConfig, NodeId};

pub const WHITE: [u8; 4] = [255, 255, 255, 255];
pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const BLUE: [u8; 4] = [0, 0, 255, 255];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn quad(pts: [(f64, f64); 4]) -> Quad {
    pts.map(|(x, y)| PointF::new(x, y))
}

pub fn square(size: f64) -> Quad {
    quad([(0.0, 0.0), (size, 0.0), (size, size), (0.0, size)])
}

pub fn assert_close(actual: PointF, expected: (f64, f64)) {
    let diff = (actual - PointF::new(expected.0, expected.1)).manhattan_length();
    assert!(
        diff < 1e-3,
        "expected ({}, {}), got ({}, {})",
        expected.0,
        expected.1,
        actual.x,
        actual.y
    );
}

/// Canvas of `width` x `height` with one paint layer filled with `pixel`
/// over `rect`.
pub fn canvas_with_fill(width: u32, height: u32, rect: Rect, pixel: &[u8]) -> (CanvasState, NodeId) {
    let mut canvas = CanvasState::new(width, height, &CoreConfig::default());
    let layer = canvas.add_paint_layer("Layer 1");
    canvas
        .node_mut(layer)
        .expect("layer just added")
        .device
        .fill(rect, pixel)
        .expect("fill inside limits");
    (canvas, layer)
}
