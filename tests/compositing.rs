use paintfe_core::colorspace::{ChannelDepth, ColorModel, ColorSpace};
use paintfe_core::geometry::Rect;
use paintfe_core::{
    BlendMode, CancellationToken, ColorConverter, CompositeOp, CoreConfig, CoreError, OpStatus, PaintDevice,
    PixelBuffer, composite,
};

#[path = "util.rs"]
mod util;

use util::{BLUE, RED, WHITE};

fn device() -> PaintDevice {
    PaintDevice::new(ColorSpace::rgba8(), CoreConfig::default().canvas_limits())
}

#[test]
fn mismatched_colorspaces_fail_without_touching_destination() {
    util::init_logging();
    let converter = ColorConverter::with_builtin();
    let mut dest = device();
    let foreign = ColorSpace::new(ColorModel::Rgba, ChannelDepth::U8, "AdobeRGB");
    let src = PixelBuffer::filled(Rect::new(0, 0, 8, 8), foreign, &RED);

    let err = composite(&mut dest, Rect::new(0, 0, 8, 8), &src, &CompositeOp::default(), &converter, None)
        .unwrap_err();
    assert!(matches!(err, CoreError::ColorSpaceMismatch { .. }));
    assert_eq!(dest.store().allocation_count(), 0);

    let mut mask = PaintDevice::new(ColorSpace::alpha8(), CoreConfig::default().canvas_limits());
    let src = PixelBuffer::filled(Rect::new(0, 0, 8, 8), ColorSpace::rgba8(), &RED);
    assert!(composite(&mut mask, Rect::new(0, 0, 8, 8), &src, &CompositeOp::default(), &converter, None).is_err());
}

#[test]
fn transparent_source_allocates_nothing() {
    let converter = ColorConverter::with_builtin();
    let mut dest = device();
    let src = PixelBuffer::new(Rect::new(0, 0, 200, 200), ColorSpace::rgba8());

    let status = composite(&mut dest, src.rect(), &src, &CompositeOp::default(), &converter, None).unwrap();
    assert_eq!(status, OpStatus::Completed);
    assert_eq!(dest.store().allocation_count(), 0);
    assert_eq!(dest.store().tile_count(), 0);
}

#[test]
fn over_with_half_opacity_interpolates_in_premultiplied_space() {
    let converter = ColorConverter::with_builtin();
    let mut dest = device();
    let src = PixelBuffer::filled(Rect::new(0, 0, 4, 4), ColorSpace::rgba8(), &WHITE);

    let op = CompositeOp::new(BlendMode::Over, 0.5);
    composite(&mut dest, src.rect(), &src, &op, &converter, None).unwrap();

    assert_eq!(dest.read_pixel(1, 1), &[255, 255, 255, 128]);
    assert_eq!(dest.read_pixel(4, 4), &[0, 0, 0, 0]);
}

#[test]
fn source_lands_at_destination_rect() {
    let converter = ColorConverter::with_builtin();
    let mut dest = device();
    let src = PixelBuffer::filled(Rect::new(0, 0, 2, 2), ColorSpace::rgba8(), &RED);

    composite(&mut dest, Rect::new(100, -50, 2, 2), &src, &CompositeOp::default(), &converter, None).unwrap();
    assert_eq!(dest.exact_bounds(), Rect::new(100, -50, 2, 2));
}

#[test]
fn mask_limits_the_affected_pixels() {
    let converter = ColorConverter::with_builtin();
    let mut dest = device();
    dest.fill(Rect::new(0, 0, 4, 4), &BLUE).unwrap();
    let src = PixelBuffer::filled(Rect::new(0, 0, 4, 4), ColorSpace::rgba8(), &RED);

    let mut mask = PixelBuffer::new(Rect::new(0, 0, 4, 4), ColorSpace::alpha8());
    mask.pixel_mut(0, 0).unwrap()[0] = 255;
    // Mask pixels outside the mask buffer count as unselected.
    let small = PixelBuffer::filled(Rect::new(0, 0, 1, 4), ColorSpace::alpha8(), &[255]);

    composite(&mut dest, src.rect(), &src, &CompositeOp::default().with_mask(&mask), &converter, None).unwrap();
    assert_eq!(dest.read_pixel(0, 0), &RED);
    assert_eq!(dest.read_pixel(1, 0), &BLUE);

    composite(&mut dest, src.rect(), &src, &CompositeOp::default().with_mask(&small), &converter, None).unwrap();
    assert_eq!(dest.read_pixel(0, 3), &RED);
    assert_eq!(dest.read_pixel(3, 3), &BLUE);
}

#[test]
fn deeper_source_is_converted_first() {
    let converter = ColorConverter::with_builtin();
    let mut dest = device();
    let white16: Vec<u8> = [u16::MAX; 4].iter().flat_map(|c| c.to_ne_bytes()).collect();
    let src = PixelBuffer::filled(Rect::new(0, 0, 2, 2), ColorSpace::rgba16(), &white16);

    composite(&mut dest, src.rect(), &src, &CompositeOp::default(), &converter, None).unwrap();
    assert_eq!(dest.read_pixel(0, 0), &WHITE);
}

#[test]
fn cancelled_token_leaves_destination_alone() {
    let converter = ColorConverter::with_builtin();
    let mut dest = device();
    let src = PixelBuffer::filled(Rect::new(0, 0, 128, 128), ColorSpace::rgba8(), &RED);
    let token = CancellationToken::new();
    token.cancel();

    let status = composite(&mut dest, src.rect(), &src, &CompositeOp::default(), &converter, Some(&token)).unwrap();
    assert_eq!(status, OpStatus::Cancelled);
    assert!(dest.exact_bounds().is_empty());
}

#[test]
fn multiply_darkens_backdrop() {
    let converter = ColorConverter::with_builtin();
    let mut dest = device();
    dest.fill(Rect::new(0, 0, 1, 1), &[200, 200, 200, 255]).unwrap();
    let src = PixelBuffer::filled(Rect::new(0, 0, 1, 1), ColorSpace::rgba8(), &[128, 255, 0, 255]);

    let op = CompositeOp::new(BlendMode::Multiply, 1.0);
    composite(&mut dest, src.rect(), &src, &op, &converter, None).unwrap();
    assert_eq!(dest.read_pixel(0, 0), &[100, 200, 0, 255]);
}

#[test]
fn far_away_rects_are_rejected() {
    let converter = ColorConverter::with_builtin();
    let mut dest = device();
    let src = PixelBuffer::filled(Rect::new(i32::MIN, 0, 4, 4), ColorSpace::rgba8(), &RED);

    let err = composite(&mut dest, Rect::new(1, 0, 4, 4), &src, &CompositeOp::default(), &converter, None).unwrap_err();
    assert!(matches!(err, CoreError::OutOfBoundsGeometry { .. }));

    let near = PixelBuffer::filled(Rect::new(0, 0, 4, 4), ColorSpace::rgba8(), &RED);
    let err = composite(
        &mut dest,
        Rect::new(i32::MAX - 2, 0, 4, 4),
        &near,
        &CompositeOp::default(),
        &converter,
        None,
    )
    .unwrap_err();
    assert!(matches!(err, CoreError::OutOfBoundsGeometry { .. }));
    assert_eq!(dest.store().allocation_count(), 0);
}
