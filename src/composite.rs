use serde::{Deserialize, Serialize};

use crate::canvas::{PaintDevice, TILE_SIZE};
use crate::colorspace::{ColorConverter, ToneMapping};
use crate::error::{CoreError, OpStatus, Result};
use crate::geometry::Rect;
use crate::pixel::PixelBuffer;
use crate::pool::CancellationToken;

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Over,
    Copy,
    Multiply,
    Screen,
    Add,
    Overlay,
    Darken,
    Lighten,
    Difference,
    Subtract,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Exclusion,
    Erase,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Over,
            BlendMode::Copy,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Add,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::Difference,
            BlendMode::Subtract,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Exclusion,
            BlendMode::Erase,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Over => "over",
            BlendMode::Copy => "copy",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Add => "add",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::Difference => "difference",
            BlendMode::Subtract => "subtract",
            BlendMode::ColorDodge => "color-dodge",
            BlendMode::ColorBurn => "color-burn",
            BlendMode::HardLight => "hard-light",
            BlendMode::SoftLight => "soft-light",
            BlendMode::Exclusion => "exclusion",
            BlendMode::Erase => "erase",
        }
    }

    /// Look a mode up by name. `"normal"` is accepted as an alias of `"over"`.
    pub fn from_name(name: &str) -> Result<BlendMode> {
        let lower = name.trim().to_ascii_lowercase();
        if lower == "normal" {
            return Ok(BlendMode::Over);
        }
        BlendMode::all()
            .iter()
            .copied()
            .find(|m| m.name() == lower)
            .ok_or_else(|| CoreError::UnknownBlendMode(name.to_string()))
    }

    /// True when a fully transparent source leaves the destination unchanged.
    fn transparent_is_identity(self) -> bool {
        !matches!(self, BlendMode::Copy)
    }

    /// Blend `src` onto `dest` at full strength. Both are normalised
    /// straight-alpha RGBA.
    pub fn blend(self, dest: [f32; 4], src: [f32; 4]) -> [f32; 4] {
        let [base_r, base_g, base_b, base_a] = dest;
        let [top_r, top_g, top_b, top_a] = src;

        match self {
            BlendMode::Copy => return src,
            BlendMode::Erase => {
                return [base_r, base_g, base_b, base_a * (1.0 - top_a)];
            }
            _ => {}
        }

        let (r, g, b) = match self {
            BlendMode::Over => (top_r, top_g, top_b),
            BlendMode::Multiply => (base_r * top_r, base_g * top_g, base_b * top_b),
            BlendMode::Screen => (
                1.0 - (1.0 - base_r) * (1.0 - top_r),
                1.0 - (1.0 - base_g) * (1.0 - top_g),
                1.0 - (1.0 - base_b) * (1.0 - top_b),
            ),
            BlendMode::Add => (
                (base_r + top_r).min(1.0),
                (base_g + top_g).min(1.0),
                (base_b + top_b).min(1.0),
            ),
            BlendMode::Overlay => (
                overlay_channel(base_r, top_r),
                overlay_channel(base_g, top_g),
                overlay_channel(base_b, top_b),
            ),
            BlendMode::Darken => (base_r.min(top_r), base_g.min(top_g), base_b.min(top_b)),
            BlendMode::Lighten => (base_r.max(top_r), base_g.max(top_g), base_b.max(top_b)),
            BlendMode::Difference => ((base_r - top_r).abs(), (base_g - top_g).abs(), (base_b - top_b).abs()),
            BlendMode::Subtract => (
                (base_r - top_r).max(0.0),
                (base_g - top_g).max(0.0),
                (base_b - top_b).max(0.0),
            ),
            BlendMode::ColorDodge => (
                color_dodge_channel(base_r, top_r),
                color_dodge_channel(base_g, top_g),
                color_dodge_channel(base_b, top_b),
            ),
            BlendMode::ColorBurn => (
                color_burn_channel(base_r, top_r),
                color_burn_channel(base_g, top_g),
                color_burn_channel(base_b, top_b),
            ),
            BlendMode::HardLight => (
                overlay_channel(top_r, base_r),
                overlay_channel(top_g, base_g),
                overlay_channel(top_b, base_b),
            ),
            BlendMode::SoftLight => (
                soft_light_channel(base_r, top_r),
                soft_light_channel(base_g, top_g),
                soft_light_channel(base_b, top_b),
            ),
            BlendMode::Exclusion => (
                base_r + top_r - 2.0 * base_r * top_r,
                base_g + top_g - 2.0 * base_g * top_g,
                base_b + top_b - 2.0 * base_b * top_b,
            ),
            BlendMode::Copy | BlendMode::Erase => unreachable!(),
        };

        let out_a = top_a + base_a * (1.0 - top_a);
        if out_a == 0.0 {
            return [0.0, 0.0, 0.0, 0.0];
        }
        // Separable modes only apply where the backdrop exists.
        let mix = |blended: f32, top: f32, base: f32| {
            let c = blended * base_a + top * (1.0 - base_a);
            (c * top_a + base * base_a * (1.0 - top_a)) / out_a
        };
        [mix(r, top_r, base_r), mix(g, top_g, base_g), mix(b, top_b, base_b), out_a]
    }
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

fn color_burn_channel(base: f32, top: f32) -> f32 {
    if top == 0.0 {
        0.0
    } else {
        (1.0 - (1.0 - base) / top).max(0.0)
    }
}

fn color_dodge_channel(base: f32, top: f32) -> f32 {
    if top >= 1.0 {
        1.0
    } else {
        (base / (1.0 - top)).min(1.0)
    }
}

/// W3C Soft Light formula.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

/// Interpolate two straight-alpha pixels by `t` in premultiplied space.
pub fn lerp_premultiplied(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    if t <= 0.0 {
        return a;
    }
    if t >= 1.0 {
        return b;
    }
    let out_a = a[3] + (b[3] - a[3]) * t;
    if out_a <= 0.0 {
        return [0.0, 0.0, 0.0, 0.0];
    }
    let ch = |i: usize| (a[i] * a[3] + (b[i] * b[3] - a[i] * a[3]) * t) / out_a;
    [ch(0), ch(1), ch(2), out_a]
}

// ============================================================================
// COMPOSITING
// ============================================================================

/// Parameters of one compositing pass.
#[derive(Clone, Copy, Debug)]
pub struct CompositeOp<'a> {
    pub mode: BlendMode,
    pub opacity: f32,
    /// Per-pixel strength in destination coordinates; pixels the mask buffer
    /// does not cover count as unselected.
    pub mask: Option<&'a PixelBuffer>,
}

impl Default for CompositeOp<'_> {
    fn default() -> Self {
        Self {
            mode: BlendMode::Over,
            opacity: 1.0,
            mask: None,
        }
    }
}

impl<'a> CompositeOp<'a> {
    pub fn new(mode: BlendMode, opacity: f32) -> Self {
        Self {
            mode,
            opacity,
            mask: None,
        }
    }

    pub fn with_mask(mut self, mask: &'a PixelBuffer) -> Self {
        self.mask = Some(mask);
        self
    }
}

/// Composite `src` onto `dest` over `dest_rect` (device coordinates).
///
/// The source's top-left pixel lands on `dest_rect`'s top-left. Each result
/// is `blend(dest, src)` interpolated from `dest` by `opacity * mask`. The
/// source is converted into the destination colorspace first; without a
/// conversion path the call fails before any tile is touched. Tiles are
/// processed in parallel and `cancel` is polled once per tile.
pub fn composite(
    dest: &mut PaintDevice,
    dest_rect: Rect,
    src: &PixelBuffer,
    op: &CompositeOp<'_>,
    converter: &ColorConverter,
    cancel: Option<&CancellationToken>,
) -> Result<OpStatus> {
    if dest_rect.is_empty() {
        return Ok(OpStatus::Completed);
    }
    dest.check_writable(dest_rect)?;

    let converted;
    let src = if src.colorspace() == dest.colorspace() {
        src
    } else if converter.can_convert(src.colorspace(), dest.colorspace()) {
        converted = src.convert(dest.colorspace(), converter, ToneMapping::Reinhard)?;
        &converted
    } else {
        return Err(CoreError::ColorSpaceMismatch {
            src: src.colorspace().to_string(),
            dst: dest.colorspace().to_string(),
        });
    };

    let opacity = op.opacity.clamp(0.0, 1.0);
    if opacity == 0.0 {
        return Ok(OpStatus::Completed);
    }

    let cs = dest.colorspace().clone();
    let ps = cs.pixel_size();
    let (ox, oy) = dest.offset();
    let out_of_range = || CoreError::OutOfBoundsGeometry {
        rect: src.rect(),
        limits: dest.store().limits(),
    };
    let shift_x = src.rect().x.checked_sub(dest_rect.x).ok_or_else(out_of_range)?;
    let shift_y = src.rect().y.checked_sub(dest_rect.y).ok_or_else(out_of_range)?;
    let transparent = cs.default_pixel();
    let mode = op.mode;
    let mask = op.mask;

    log::debug!(
        "composite {:?} mode={} opacity={} masked={}",
        dest_rect,
        mode.name(),
        opacity,
        mask.is_some()
    );

    let store_rect = dest.to_store(dest_rect)?;
    let status = dest.store_mut().update_tiles(store_rect, cancel, |tile, overlap, bytes| {
        let mut changed = false;
        let mut out = vec![0u8; ps];
        for sy in overlap.top()..overlap.bottom() {
            for sx in overlap.left()..overlap.right() {
                // Device coordinates of this store pixel.
                let (x, y) = (sx + ox, sy + oy);
                let strength = match mask {
                    Some(m) => m.pixel(x, y).map_or(0.0, |px| m.colorspace().decode(px)[3]),
                    None => 1.0,
                } * opacity;
                if strength <= 0.0 {
                    continue;
                }
                let src_px = match (x.checked_add(shift_x), y.checked_add(shift_y)) {
                    (Some(px), Some(py)) => src.pixel(px, py).unwrap_or(transparent.as_slice()),
                    _ => transparent.as_slice(),
                };
                let src_c = cs.decode(src_px);
                if src_c[3] == 0.0 && mode.transparent_is_identity() {
                    continue;
                }
                let off = ((sy - tile.y) * TILE_SIZE + (sx - tile.x)) as usize * ps;
                let dst_px = &mut bytes[off..off + ps];
                let dst_c = cs.decode(dst_px);
                let result = lerp_premultiplied(dst_c, mode.blend(dst_c, src_c), strength);
                cs.encode(result, &mut out);
                if out.as_slice() != &*dst_px {
                    dst_px.copy_from_slice(&out);
                    changed = true;
                }
            }
        }
        changed
    });

    if status.is_cancelled() {
        log::info!("composite of {:?} cancelled", dest_rect);
    }
    Ok(status)
}
