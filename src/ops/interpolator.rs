//! Four-point (bilinear) perspective interpolation between two
//! quadrilaterals.
//!
//! Corners are given in consistent winding: top-left, top-right,
//! bottom-right, bottom-left. Each quad is treated as the bilinear patch
//! `P(u, v) = A + u·e + v·f + u·v·g` over the unit square. Mapping a point
//! solves the patch of one quad for `(u, v)` and evaluates the other.

use crate::error::{CoreError, Result};
use crate::geometry::PointF;

pub type Quad = [PointF; 4];

/// Parameters this far outside the unit square still count as inside.
const INSIDE_EPS: f64 = 1e-6;
/// Quads whose largest corner cross product is below this fraction of the
/// squared diagonal are rejected as degenerate.
const DEGENERATE_EPS: f64 = 1e-9;
const NEWTON_STEPS: usize = 4;

/// Unit-square parameters of the four corners.
const CORNER_PARAMS: [(f64, f64); 4] = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];

/// Common interface of both mapping directions.
pub trait Interpolator {
    fn map(&self, p: PointF) -> PointF;
}

// ============================================================================
// BILINEAR PATCH
// ============================================================================

#[derive(Clone, Copy, Debug)]
struct BilinearPatch {
    corners: Quad,
    a: PointF,
    e: PointF,
    f: PointF,
    g: PointF,
    /// +1 or -1: sign of the Jacobian on the sheet we prefer.
    orientation: f64,
    /// Largest absolute corner cross product, used to scale tolerances.
    area_scale: f64,
}

fn corner_cross(q: &Quad, i: usize) -> f64 {
    let p = q[i];
    (q[(i + 1) % 4] - p).cross(q[(i + 3) % 4] - p)
}

fn outside_distance(u: f64, v: f64) -> f64 {
    let lo = -INSIDE_EPS;
    let hi = 1.0 + INSIDE_EPS;
    (lo - u).max(0.0) + (u - hi).max(0.0) + (lo - v).max(0.0) + (v - hi).max(0.0)
}

impl BilinearPatch {
    fn new(corners: &Quad, role: &str) -> Result<Self> {
        if corners.iter().any(|p| !p.is_finite()) {
            return Err(CoreError::DegenerateQuadrilateral(format!(
                "{} quadrilateral has a non-finite corner",
                role
            )));
        }
        let (mut min, mut max) = (corners[0], corners[0]);
        for p in &corners[1..] {
            min = PointF::new(min.x.min(p.x), min.y.min(p.y));
            max = PointF::new(max.x.max(p.x), max.y.max(p.y));
        }
        let diag = max - min;
        let diag_sq = diag.x * diag.x + diag.y * diag.y;
        let area_scale = (0..4).map(|i| corner_cross(corners, i).abs()).fold(0.0, f64::max);
        if diag_sq == 0.0 || area_scale <= DEGENERATE_EPS * diag_sq {
            return Err(CoreError::DegenerateQuadrilateral(format!(
                "{} quadrilateral has collinear or coincident corners",
                role
            )));
        }

        let a = corners[0];
        let e = corners[1] - a;
        let f = corners[3] - a;
        let g = a - corners[1] + corners[2] - corners[3];

        let shoelace: f64 = (0..4).map(|i| corners[i].cross(corners[(i + 1) % 4])).sum();
        let orientation = if shoelace.abs() > DEGENERATE_EPS * diag_sq {
            shoelace.signum()
        } else {
            // Self-intersecting quad with cancelling lobes: trust the best corner.
            let best = (0..4)
                .max_by(|&i, &j| corner_cross(corners, i).abs().total_cmp(&corner_cross(corners, j).abs()))
                .unwrap_or(0);
            corner_cross(corners, best).signum()
        };

        Ok(Self {
            corners: *corners,
            a,
            e,
            f,
            g,
            orientation,
            area_scale,
        })
    }

    fn eval(&self, u: f64, v: f64) -> PointF {
        self.a + self.e * u + self.f * v + self.g * (u * v)
    }

    fn jacobian_det(&self, u: f64, v: f64) -> f64 {
        (self.e + self.g * v).cross(self.f + self.g * u)
    }

    /// Candidate `(u, v)` with `eval(u, v) == p`, from the quadratic in `v`.
    fn roots(&self, p: PointF) -> Vec<(f64, f64)> {
        let h = p - self.a;
        let k2 = self.g.cross(self.f);
        let k1 = self.e.cross(self.f) + h.cross(self.g);
        let k0 = h.cross(self.e);

        let mut disc = k1 * k1 - 4.0 * k2 * k0;
        let mut vs: Vec<f64> = Vec::with_capacity(2);
        if disc < 0.0 && disc >= -DEGENERATE_EPS * k1 * k1 {
            disc = 0.0;
        }
        if disc < 0.0 {
            // No exact preimage: take the closest approach.
            if k2 != 0.0 {
                vs.push(-k1 / (2.0 * k2));
            }
        } else {
            let sign = if k1 < 0.0 { -1.0 } else { 1.0 };
            let q = -0.5 * (k1 + sign * disc.sqrt());
            if q != 0.0 {
                vs.push(q / k2);
                vs.push(k0 / q);
            } else if k2 != 0.0 {
                vs.push(-k1 / (2.0 * k2));
            }
        }

        vs.into_iter()
            .filter(|v| v.is_finite())
            .filter_map(|v| {
                let dx = self.e.x + self.g.x * v;
                let dy = self.e.y + self.g.y * v;
                let u = if dx.abs() >= dy.abs() && dx != 0.0 {
                    (h.x - self.f.x * v) / dx
                } else if dy != 0.0 {
                    (h.y - self.f.y * v) / dy
                } else {
                    return None;
                };
                u.is_finite().then_some((u, v))
            })
            .collect()
    }

    /// Newton refinement that never worsens the residual or changes sheet.
    fn polish(&self, p: PointF, start: (f64, f64)) -> (f64, f64) {
        let mut best = start;
        let mut best_err = (self.eval(best.0, best.1) - p).manhattan_length();
        let sheet = self.jacobian_det(best.0, best.1).signum();
        for _ in 0..NEWTON_STEPS {
            if best_err == 0.0 {
                break;
            }
            let (u, v) = best;
            let r = p - self.eval(u, v);
            let ju = self.e + self.g * v;
            let jv = self.f + self.g * u;
            let det = ju.cross(jv);
            if det.abs() <= DEGENERATE_EPS * self.area_scale {
                break;
            }
            let cand = (u + r.cross(jv) / det, v + ju.cross(r) / det);
            if !(cand.0.is_finite() && cand.1.is_finite()) {
                break;
            }
            let err = (self.eval(cand.0, cand.1) - p).manhattan_length();
            if err < best_err && self.jacobian_det(cand.0, cand.1).signum() == sheet {
                best = cand;
                best_err = err;
            } else {
                break;
            }
        }
        best
    }

    /// Affine inverse through the best-conditioned corner triangle.
    fn affine_solve(&self, p: PointF) -> (f64, f64) {
        let i = (0..4)
            .max_by(|&i, &j| {
                corner_cross(&self.corners, i)
                    .abs()
                    .total_cmp(&corner_cross(&self.corners, j).abs())
            })
            .unwrap_or(0);
        let next = (i + 1) % 4;
        let prev = (i + 3) % 4;
        let origin = self.corners[i];
        let e1 = self.corners[next] - origin;
        let e2 = self.corners[prev] - origin;
        let det = e1.cross(e2);
        let h = p - origin;
        let a = h.cross(e2) / det;
        let b = e1.cross(h) / det;
        let (u0, v0) = CORNER_PARAMS[i];
        let (u1, v1) = CORNER_PARAMS[next];
        let (u2, v2) = CORNER_PARAMS[prev];
        (u0 + a * (u1 - u0) + b * (u2 - u0), v0 + a * (v1 - v0) + b * (v2 - v0))
    }

    /// Parameters of `p`: the root inside the unit square, preferring the
    /// sheet whose Jacobian sign matches the quad's orientation when two are.
    fn solve(&self, p: PointF) -> (f64, f64) {
        let best = self
            .roots(p)
            .into_iter()
            .map(|(u, v)| {
                let wrong_sheet: f64 = if self.jacobian_det(u, v) * self.orientation > 0.0 { 0.0 } else { 1.0 };
                (outside_distance(u, v), wrong_sheet, (u, v))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

        let uv = match best {
            Some((_, _, uv)) => self.polish(p, uv),
            None => self.affine_solve(p),
        };
        if uv.0.is_finite() && uv.1.is_finite() {
            uv
        } else {
            log::trace!("bilinear solve fell back to affine at {:?}", p);
            self.affine_solve(p)
        }
    }
}

// ============================================================================
// INTERPOLATORS
// ============================================================================

/// Maps points of the source quad onto the destination quad.
#[derive(Clone, Copy, Debug)]
pub struct ForwardInterpolator {
    src: BilinearPatch,
    dst: BilinearPatch,
}

impl ForwardInterpolator {
    pub fn new(src: &Quad, dst: &Quad) -> Result<Self> {
        Ok(Self {
            src: BilinearPatch::new(src, "source")?,
            dst: BilinearPatch::new(dst, "destination")?,
        })
    }

    pub fn map(&self, p: PointF) -> PointF {
        let (u, v) = self.src.solve(p);
        self.dst.eval(u, v)
    }
}

impl Interpolator for ForwardInterpolator {
    fn map(&self, p: PointF) -> PointF {
        ForwardInterpolator::map(self, p)
    }
}

/// Maps points of the destination quad back onto the source quad.
#[derive(Clone, Copy, Debug)]
pub struct BackwardInterpolator {
    src: BilinearPatch,
    dst: BilinearPatch,
}

impl BackwardInterpolator {
    pub fn new(src: &Quad, dst: &Quad) -> Result<Self> {
        Ok(Self {
            src: BilinearPatch::new(src, "source")?,
            dst: BilinearPatch::new(dst, "destination")?,
        })
    }

    pub fn map(&self, p: PointF) -> PointF {
        let (u, v) = self.dst.solve(p);
        self.src.eval(u, v)
    }

    /// Like [`map`](Self::map), but `None` for points outside the
    /// destination quad.
    pub fn map_checked(&self, p: PointF) -> Option<PointF> {
        let (u, v) = self.dst.solve(p);
        if outside_distance(u, v) > 0.0 {
            return None;
        }
        // Solutions on the far sheet of a folded quad are still inside; they
        // are reached only where the near sheet has no preimage.
        Some(self.src.eval(u, v))
    }
}

impl Interpolator for BackwardInterpolator {
    fn map(&self, p: PointF) -> PointF {
        BackwardInterpolator::map(self, p)
    }
}
