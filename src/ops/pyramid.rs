use rayon::prelude::*;

use crate::canvas::PaintDevice;
use crate::geometry::Rect;
use crate::pixel::PixelBuffer;

// ============================================================================
// IMAGE PYRAMID – progressively halved copies for zoomed-out display
// ============================================================================

pub struct ImagePyramid {
    levels: Vec<PixelBuffer>,
}

impl ImagePyramid {
    /// Level 0 is `device` over `rect`. Each further level halves both edges
    /// with a premultiplied 2x2 box filter, stopping once the longest edge
    /// is at most `min_edge`.
    pub fn build(device: &PaintDevice, rect: Rect, min_edge: u32) -> Self {
        let mut levels = vec![device.read_rect(rect)];
        let min_edge = min_edge.max(1) as i32;
        loop {
            let Some(last) = levels.last() else { break };
            let r = last.rect();
            if r.width.max(r.height) <= min_edge || (r.width <= 1 && r.height <= 1) {
                break;
            }
            let next = downsample(last);
            levels.push(next);
        }
        log::debug!("built pyramid of {} levels over {:?}", levels.len(), rect);
        Self { levels }
    }

    pub fn levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, index: usize) -> Option<&PixelBuffer> {
        self.levels.get(index)
    }

    /// Smallest level that is still at least `scale` times the source size.
    pub fn level_for_scale(&self, scale: f64) -> Option<&PixelBuffer> {
        let mut index = 0;
        if scale > 0.0 && scale < 1.0 {
            index = (1.0 / scale).log2().floor().max(0.0) as usize;
        }
        self.levels.get(index).or_else(|| self.levels.last())
    }
}

/// Halve `src`, rounding odd edges up. Level rects start at the source
/// origin halved.
fn downsample(src: &PixelBuffer) -> PixelBuffer {
    let r = src.rect();
    let cs = src.colorspace().clone();
    let ps = cs.pixel_size();
    let w = (r.width + 1) / 2;
    let h = (r.height + 1) / 2;
    let out_rect = Rect::new(r.x.div_euclid(2), r.y.div_euclid(2), w, h);
    let mut out = PixelBuffer::new(out_rect, cs.clone());
    if out_rect.is_empty() {
        return out;
    }

    let stride = w as usize * ps;
    out.data_mut()
        .par_chunks_mut(stride)
        .enumerate()
        .for_each(|(row, line)| {
            for col in 0..w as usize {
                let mut acc = [0.0f32; 4];
                let mut n = 0.0f32;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let sx = r.x + (col as i32) * 2 + dx;
                        let sy = r.y + (row as i32) * 2 + dy;
                        if let Some(px) = src.pixel(sx, sy) {
                            let c = cs.decode(px);
                            acc[0] += c[0] * c[3];
                            acc[1] += c[1] * c[3];
                            acc[2] += c[2] * c[3];
                            acc[3] += c[3];
                            n += 1.0;
                        }
                    }
                }
                if n == 0.0 || acc[3] <= 0.0 {
                    continue;
                }
                let a = acc[3];
                let px = [acc[0] / a, acc[1] / a, acc[2] / a, a / n];
                cs.encode(px, &mut line[col * ps..(col + 1) * ps]);
            }
        });
    out
}
