use std::sync::atomic::{AtomicBool, Ordering};

use crate::canvas::{PaintDevice, TILE_SIZE};
use crate::colorspace::ColorSpace;
use crate::components::history::{DeviceSnapshotCommand, UndoAdapter};
use crate::components::layers::Node;
use crate::error::{OpStatus, Result};
use crate::geometry::{PointF, Rect};
use crate::ops::interpolator::{BackwardInterpolator, Quad};
use crate::pool::CancellationToken;

// ============================================================================
// PERSPECTIVE TRANSFORM
// ============================================================================

/// Warps each visited device so that the content inside `src` lands inside
/// `dst`. Pixels outside `dst` end up transparent.
pub struct PerspectiveTransformVisitor {
    interp: BackwardInterpolator,
    dst: Quad,
    cancel: Option<CancellationToken>,
    status: OpStatus,
}

impl PerspectiveTransformVisitor {
    pub fn new(src: Quad, dst: Quad) -> Result<Self> {
        Ok(Self {
            interp: BackwardInterpolator::new(&src, &dst)?,
            dst,
            cancel: None,
            status: OpStatus::Completed,
        })
    }

    /// Poll `token` once per output row.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// `Cancelled` once any device was left partially warped.
    pub fn status(&self) -> OpStatus {
        self.status
    }

    /// Warp `device` into a fresh device, one band of tile rows at a time so
    /// memory follows the warped content rather than the destination bounds.
    fn warp(&self, device: &PaintDevice) -> Result<(PaintDevice, OpStatus)> {
        let cs = device.colorspace().clone();
        let limits = device.store().limits();
        let mut out = PaintDevice::new(cs.clone(), limits);
        let target = quad_bounds(&self.dst).intersected(&limits);
        if target.is_empty() {
            return Ok((out, OpStatus::Completed));
        }

        let ps = cs.pixel_size();
        let cancelled = AtomicBool::new(false);
        let poll = || {
            let hit = self.cancel.as_ref().is_some_and(|c| c.is_cancelled());
            if hit {
                cancelled.store(true, Ordering::Relaxed);
            }
            hit
        };

        let mut band_top = target.top();
        while band_top < target.bottom() && !poll() {
            let band_bottom = (band_top.div_euclid(TILE_SIZE) + 1)
                .saturating_mul(TILE_SIZE)
                .min(target.bottom());
            let band = Rect::from_edges(target.left(), band_top, target.right(), band_bottom);

            // `out` has no offset, so store and device coordinates agree.
            let status = out.store_mut().update_tiles(band, self.cancel.as_ref(), |tile, overlap, bytes| {
                let mut changed = false;
                for y in overlap.top()..overlap.bottom() {
                    if poll() {
                        break;
                    }
                    for x in overlap.left()..overlap.right() {
                        let p = PointF::new(x as f64 + 0.5, y as f64 + 0.5);
                        let Some(s) = self.interp.map_checked(p) else {
                            continue;
                        };
                        let px = bilinear_sample(device, &cs, s.x - 0.5, s.y - 0.5);
                        let off = ((y - tile.y) * TILE_SIZE + (x - tile.x)) as usize * ps;
                        cs.encode(px, &mut bytes[off..off + ps]);
                        changed = true;
                    }
                }
                changed
            });
            if status.is_cancelled() {
                cancelled.store(true, Ordering::Relaxed);
                break;
            }
            band_top = band_bottom;
        }

        let status = if cancelled.load(Ordering::Relaxed) {
            OpStatus::Cancelled
        } else {
            OpStatus::Completed
        };
        Ok((out, status))
    }

    fn transform_node(&mut self, node: &mut Node, undo: &mut dyn UndoAdapter) -> Result<()> {
        let (warped, status) = self.warp(&node.device)?;
        let before = std::mem::replace(&mut node.device, warped);
        if status.is_cancelled() {
            log::info!("perspective transform of '{}' cancelled", node.name);
            self.status = OpStatus::Cancelled;
        }
        undo.add_command(Box::new(DeviceSnapshotCommand::new(
            format!("Perspective {}", node.name),
            node.id,
            before,
            node.device.clone(),
        )));
        Ok(())
    }
}

impl crate::ops::processing::ProcessingVisitor for PerspectiveTransformVisitor {
    fn name(&self) -> String {
        "Perspective Transform".to_string()
    }

    fn visit_paint_layer(&mut self, node: &mut Node, undo: &mut dyn UndoAdapter) -> Result<()> {
        self.transform_node(node, undo)
    }

    fn visit_transparency_mask(&mut self, node: &mut Node, undo: &mut dyn UndoAdapter) -> Result<()> {
        self.transform_node(node, undo)
    }
}

/// Integer bounding box of a quad.
fn quad_bounds(q: &Quad) -> Rect {
    let min_x = q.iter().map(|p| p.x).fold(f64::INFINITY, f64::min).floor();
    let min_y = q.iter().map(|p| p.y).fold(f64::INFINITY, f64::min).floor();
    let max_x = q.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max).ceil();
    let max_y = q.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max).ceil();
    let clamp = |v: f64| v.clamp(i32::MIN as f64 / 2.0, i32::MAX as f64 / 2.0) as i32;
    Rect::from_edges(clamp(min_x), clamp(min_y), clamp(max_x), clamp(max_y))
}

/// Bilinear sample at a fractional pixel position, interpolated in
/// premultiplied alpha.
fn bilinear_sample(device: &PaintDevice, cs: &ColorSpace, x: f64, y: f64) -> [f32; 4] {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let sample = |sx: i32, sy: i32| -> [f32; 4] {
        let c = cs.decode(device.read_pixel(sx, sy));
        [c[0] * c[3], c[1] * c[3], c[2] * c[3], c[3]]
    };

    let tl = sample(x0, y0);
    let tr = sample(x0 + 1, y0);
    let bl = sample(x0, y0 + 1);
    let br = sample(x0 + 1, y0 + 1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut out = [0.0f32; 4];
    for c in 0..4 {
        let top = lerp(tl[c], tr[c], fx);
        let bot = lerp(bl[c], br[c], fx);
        out[c] = lerp(top, bot, fy);
    }
    if out[3] <= 0.0 {
        return [0.0; 4];
    }
    [out[0] / out[3], out[1] / out[3], out[2] / out[3], out[3]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::history::SurrogateUndoStore;
    use crate::components::layers::CanvasState;
    use crate::config::CoreConfig;

    fn square(x: f64, y: f64, size: f64) -> Quad {
        [
            PointF::new(x, y),
            PointF::new(x + size, y),
            PointF::new(x + size, y + size),
            PointF::new(x, y + size),
        ]
    }

    #[test]
    fn translated_quad_moves_content() {
        let mut canvas = CanvasState::new(64, 64, &CoreConfig::default());
        let layer = canvas.add_paint_layer("Layer");
        canvas.node_mut(layer).unwrap().device.write_pixel(2, 2, &[200, 10, 10, 255]).unwrap();

        let mut warp = PerspectiveTransformVisitor::new(square(0.0, 0.0, 10.0), square(20.0, 0.0, 10.0)).unwrap();
        let mut store = SurrogateUndoStore::new();
        canvas.accept(layer, &mut warp, &mut store).unwrap();

        let device = &canvas.node(layer).unwrap().device;
        assert_eq!(device.read_pixel(22, 2), &[200, 10, 10, 255]);
        assert_eq!(device.read_pixel(2, 2), &[0, 0, 0, 0]);
        assert_eq!(warp.status(), OpStatus::Completed);

        store.undo_all(&mut canvas).unwrap();
        assert_eq!(canvas.node(layer).unwrap().device.read_pixel(2, 2), &[200, 10, 10, 255]);
    }

    #[test]
    fn cancelled_warp_reports_status() {
        let mut canvas = CanvasState::new(64, 64, &CoreConfig::default());
        let layer = canvas.add_paint_layer("Layer");
        canvas.node_mut(layer).unwrap().device.fill(Rect::new(0, 0, 10, 10), &[1, 1, 1, 255]).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let mut warp = PerspectiveTransformVisitor::new(square(0.0, 0.0, 10.0), square(0.0, 0.0, 20.0))
            .unwrap()
            .with_cancel(token);
        let mut store = SurrogateUndoStore::new();
        canvas.accept(layer, &mut warp, &mut store).unwrap();
        assert_eq!(warp.status(), OpStatus::Cancelled);
    }

    #[test]
    fn quad_bounds_round_outwards() {
        let q = [
            PointF::new(0.5, 1.2),
            PointF::new(10.1, 0.9),
            PointF::new(9.0, 8.7),
            PointF::new(-0.2, 9.0),
        ];
        assert_eq!(quad_bounds(&q), Rect::from_edges(-1, 0, 11, 9));
    }

    #[test]
    fn trapezoid_follows_forward_mapping() {
        use crate::ops::interpolator::ForwardInterpolator;

        const LEFT: [u8; 4] = [220, 30, 30, 255];
        const RIGHT: [u8; 4] = [30, 30, 220, 255];

        let mut canvas = CanvasState::new(64, 64, &CoreConfig::default());
        let layer = canvas.add_paint_layer("Layer");
        {
            let device = &mut canvas.node_mut(layer).unwrap().device;
            device.fill(Rect::new(0, 0, 16, 32), &LEFT).unwrap();
            device.fill(Rect::new(16, 0, 16, 32), &RIGHT).unwrap();
        }

        let src = square(0.0, 0.0, 32.0);
        let dst = [
            PointF::new(0.0, 0.0),
            PointF::new(64.0, 0.0),
            PointF::new(48.0, 32.0),
            PointF::new(16.0, 32.0),
        ];
        let mut warp = PerspectiveTransformVisitor::new(src, dst).unwrap();
        let mut store = SurrogateUndoStore::new();
        canvas.accept(layer, &mut warp, &mut store).unwrap();

        let forward = ForwardInterpolator::new(&src, &dst).unwrap();
        let device = &canvas.node(layer).unwrap().device;
        for (sx, sy, expected) in [(6.0, 6.0, LEFT), (26.0, 6.0, RIGHT), (6.0, 26.0, LEFT), (26.0, 26.0, RIGHT)] {
            let p = forward.map(PointF::new(sx, sy));
            assert_eq!(device.read_pixel(p.x.floor() as i32, p.y.floor() as i32), &expected, "source ({sx}, {sy})");
        }
        // Outside the slanted edges.
        assert_eq!(device.read_pixel(2, 30), &[0, 0, 0, 0]);
        assert_eq!(device.read_pixel(61, 30), &[0, 0, 0, 0]);
        assert_eq!(device.exact_bounds(), Rect::new(0, 0, 64, 32));
    }

    #[test]
    fn large_destination_stays_sparse() {
        let mut canvas = CanvasState::new(64, 64, &CoreConfig::default());
        let layer = canvas.add_paint_layer("Layer");
        canvas.node_mut(layer).unwrap().device.write_pixel(0, 0, &[9, 9, 9, 255]).unwrap();

        // Only the corner of the 2048 px destination receives content.
        let mut warp = PerspectiveTransformVisitor::new(square(0.0, 0.0, 64.0), square(0.0, 0.0, 2048.0)).unwrap();
        let mut store = SurrogateUndoStore::new();
        canvas.accept(layer, &mut warp, &mut store).unwrap();

        let device = &canvas.node(layer).unwrap().device;
        assert_eq!(device.store().tile_count(), 1);
        let px = device.read_pixel(16, 16);
        assert_eq!(&px[..3], &[9, 9, 9]);
        assert!(px[3] > 240);
        assert_eq!(device.read_pixel(48, 0), &[0, 0, 0, 0]);
    }
}
