use paintfe_core::geometry::PointF;
use paintfe_core::ops::interpolator::{BackwardInterpolator, ForwardInterpolator, Quad};
use paintfe_core::CoreError;

#[path = "util.rs"]
mod util;

use util::{assert_close, quad, square};

fn x_shear() -> Quad {
    quad([(0.0, 0.0), (100.0, 0.0), (120.0, 100.0), (10.0, 100.0)])
}

fn y_shear() -> Quad {
    quad([(0.0, 0.0), (100.0, 10.0), (100.0, 120.0), (0.0, 100.0)])
}

fn xy_shear() -> Quad {
    quad([(0.0, 0.0), (100.0, 10.0), (140.0, 120.0), (20.0, 100.0)])
}

#[test]
fn corners_map_onto_corners() {
    util::init_logging();
    let src = square(100.0);
    for dst in [square(100.0), x_shear(), y_shear(), xy_shear()] {
        let forward = ForwardInterpolator::new(&src, &dst).unwrap();
        let backward = BackwardInterpolator::new(&src, &dst).unwrap();
        for i in 0..4 {
            assert_close(forward.map(src[i]), (dst[i].x, dst[i].y));
            assert_close(backward.map(dst[i]), (src[i].x, src[i].y));
        }
    }
}

#[test]
fn x_shear_forward_and_backward() {
    let forward = ForwardInterpolator::new(&square(100.0), &x_shear()).unwrap();
    assert_close(forward.map(PointF::new(0.0, 50.0)), (5.0, 50.0));
    assert_close(forward.map(PointF::new(50.0, 0.0)), (50.0, 0.0));
    assert_close(forward.map(PointF::new(50.0, 50.0)), (57.5, 50.0));

    let backward = BackwardInterpolator::new(&square(100.0), &x_shear()).unwrap();
    assert_close(backward.map(PointF::new(10.0, 100.0)), (0.0, 100.0));
    assert_close(backward.map(PointF::new(5.0, 50.0)), (0.0, 50.0));
    assert_close(backward.map(PointF::new(110.0, 50.0)), (100.0, 50.0));
    assert_close(backward.map(PointF::new(57.5, 50.0)), (50.0, 50.0));
}

#[test]
fn y_shear_backward() {
    let backward = BackwardInterpolator::new(&square(100.0), &y_shear()).unwrap();
    assert_close(backward.map(PointF::new(100.0, 10.0)), (100.0, 0.0));
    assert_close(backward.map(PointF::new(50.0, 5.0)), (50.0, 0.0));
    assert_close(backward.map(PointF::new(50.0, 110.0)), (50.0, 100.0));
    assert_close(backward.map(PointF::new(50.0, 57.5)), (50.0, 50.0));
}

#[test]
fn xy_shear_backward() {
    let backward = BackwardInterpolator::new(&square(100.0), &xy_shear()).unwrap();
    assert_close(backward.map(PointF::new(100.0, 10.0)), (100.0, 0.0));
    assert_close(backward.map(PointF::new(50.0, 5.0)), (50.0, 0.0));
    assert_close(backward.map(PointF::new(80.0, 110.0)), (50.0, 100.0));
    assert_close(backward.map(PointF::new(120.0, 65.0)), (100.0, 50.0));
    assert_close(backward.map(PointF::new(10.0, 50.0)), (0.0, 50.0));
}

#[test]
fn round_trip_through_rotated_quad() {
    let src = square(100.0);
    let dst = quad([(100.0, 100.0), (20.0, 140.0), (10.0, 80.0), (15.0, 5.0)]);
    let forward = ForwardInterpolator::new(&src, &dst).unwrap();
    let backward = BackwardInterpolator::new(&src, &dst).unwrap();

    for y in (1..100).step_by(7) {
        for x in (1..100).step_by(7) {
            let p = PointF::new(x as f64, y as f64);
            assert_close(backward.map(forward.map(p)), (p.x, p.y));
        }
    }
}

#[test]
fn folded_quad_round_trips_on_the_oriented_sheet() {
    // The corner (30, 30) folds the patch along u + v = 10 / 7.
    let src = square(100.0);
    let dst = quad([(0.0, 0.0), (100.0, 0.0), (30.0, 30.0), (0.0, 100.0)]);
    let forward = ForwardInterpolator::new(&src, &dst).unwrap();
    let backward = BackwardInterpolator::new(&src, &dst).unwrap();

    for y in (5..100).step_by(10) {
        for x in (5..100).step_by(10) {
            let p = PointF::new(x as f64, y as f64);
            let back = backward.map(forward.map(p));
            assert!(back.is_finite());
            if x + y < 130 {
                assert_close(back, (p.x, p.y));
            }
        }
    }

    for y in -10..=110 {
        for x in -10..=110 {
            assert!(backward.map(PointF::new(x as f64, y as f64)).is_finite());
        }
    }
}

#[test]
fn bowtie_center_stays_finite() {
    let src = square(100.0);
    let bowtie = quad([(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (100.0, 100.0)]);
    let backward = BackwardInterpolator::new(&src, &bowtie).unwrap();
    assert!(backward.map(PointF::new(50.0, 50.0)).is_finite());
    assert!(backward.map(PointF::new(0.0, 0.0)).is_finite());
}

#[test]
fn degenerate_quads_are_rejected() {
    let line = quad([(0.0, 0.0), (50.0, 0.0), (100.0, 0.0), (75.0, 0.0)]);
    let nan = quad([(0.0, 0.0), (f64::NAN, 0.0), (100.0, 100.0), (0.0, 100.0)]);
    assert!(matches!(
        BackwardInterpolator::new(&square(100.0), &line),
        Err(CoreError::DegenerateQuadrilateral(_))
    ));
    assert!(ForwardInterpolator::new(&nan, &square(100.0)).is_err());
}
