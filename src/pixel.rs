use image::RgbaImage;

use crate::colorspace::{ColorConverter, ColorSpace, ToneMapping};
use crate::error::{CoreError, Result};
use crate::geometry::Rect;

/// A dense rectangle of pixels in absolute canvas coordinates, tagged with
/// the colorspace its bytes are laid out in.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelBuffer {
    rect: Rect,
    colorspace: ColorSpace,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Buffer filled with the colorspace's default (transparent) pixel.
    pub fn new(rect: Rect, colorspace: ColorSpace) -> Self {
        let pixel = colorspace.default_pixel();
        Self::filled(rect, colorspace, &pixel)
    }

    pub fn filled(rect: Rect, colorspace: ColorSpace, pixel: &[u8]) -> Self {
        let n = rect.area();
        let mut data = Vec::with_capacity(n * pixel.len());
        for _ in 0..n {
            data.extend_from_slice(pixel);
        }
        Self { rect, colorspace, data }
    }

    pub fn from_raw(rect: Rect, colorspace: ColorSpace, data: Vec<u8>) -> Result<Self> {
        let expected = rect.area() * colorspace.pixel_size();
        if data.len() != expected {
            return Err(CoreError::PixelSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { rect, colorspace, data })
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn colorspace(&self) -> &ColorSpace {
        &self.colorspace
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    fn offset_of(&self, x: i32, y: i32) -> Option<usize> {
        if !self.rect.contains_point(x, y) {
            return None;
        }
        let lx = (x - self.rect.x) as usize;
        let ly = (y - self.rect.y) as usize;
        Some((ly * self.rect.width as usize + lx) * self.colorspace.pixel_size())
    }

    /// Pixel at absolute `(x, y)`, or `None` outside the buffer.
    pub fn pixel(&self, x: i32, y: i32) -> Option<&[u8]> {
        let ps = self.colorspace.pixel_size();
        self.offset_of(x, y).map(|o| &self.data[o..o + ps])
    }

    pub fn pixel_mut(&mut self, x: i32, y: i32) -> Option<&mut [u8]> {
        let ps = self.colorspace.pixel_size();
        self.offset_of(x, y).map(move |o| &mut self.data[o..o + ps])
    }

    /// Bytes of absolute row `y`.
    pub fn row(&self, y: i32) -> Option<&[u8]> {
        if y < self.rect.top() || y >= self.rect.bottom() {
            return None;
        }
        let stride = self.rect.width as usize * self.colorspace.pixel_size();
        let start = (y - self.rect.y) as usize * stride;
        Some(&self.data[start..start + stride])
    }

    /// True when every pixel equals the colorspace default.
    pub fn is_default(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }

    pub fn convert(
        &self,
        target: &ColorSpace,
        converter: &ColorConverter,
        tone: ToneMapping,
    ) -> Result<PixelBuffer> {
        if *target == self.colorspace {
            return Ok(self.clone());
        }
        let mut out = PixelBuffer::new(self.rect, target.clone());
        converter.convert_bytes(&self.colorspace, &self.data, target, &mut out.data, tone)?;
        Ok(out)
    }

    /// 8-bit sRGB view of this buffer. The result is anchored at (0, 0).
    pub fn to_rgba_image(&self, converter: &ColorConverter) -> Result<RgbaImage> {
        let rgba = self.convert(&ColorSpace::rgba8(), converter, ToneMapping::Reinhard)?;
        let w = self.rect.width.max(0) as u32;
        let h = self.rect.height.max(0) as u32;
        RgbaImage::from_raw(w, h, rgba.data)
            .ok_or_else(|| CoreError::Image(format!("buffer does not fit a {}x{} image", w, h)))
    }

    pub fn from_rgba_image(img: &RgbaImage, x: i32, y: i32) -> Self {
        let rect = Rect::new(x, y, img.width() as i32, img.height() as i32);
        Self {
            rect,
            colorspace: ColorSpace::rgba8(),
            data: img.as_raw().clone(),
        }
    }
}
