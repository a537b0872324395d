//! Colorspace descriptors and the conversion registry.
//!
//! Pixels are stored as raw bytes whose layout is described by a
//! [`ColorSpace`]. All arithmetic happens on normalised straight-alpha RGBA
//! (`[f32; 4]`) obtained through [`ColorSpace::decode`] and written back with
//! [`ColorSpace::encode`].

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const PROFILE_SRGB: &str = "sRGB";
pub const PROFILE_LINEAR_SRGB: &str = "linear-sRGB";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelDepth {
    U8,
    U16,
    F32,
}

impl ChannelDepth {
    pub fn bytes(self) -> usize {
        match self {
            ChannelDepth::U8 => 1,
            ChannelDepth::U16 => 2,
            ChannelDepth::F32 => 4,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, ChannelDepth::F32)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorModel {
    Rgba,
    GrayAlpha,
    /// Single-channel selection / mask data.
    Alpha,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelRole {
    Red,
    Green,
    Blue,
    Gray,
    Alpha,
}

impl ColorModel {
    pub fn channels(self) -> &'static [ChannelRole] {
        match self {
            ColorModel::Rgba => &[ChannelRole::Red, ChannelRole::Green, ChannelRole::Blue, ChannelRole::Alpha],
            ColorModel::GrayAlpha => &[ChannelRole::Gray, ChannelRole::Alpha],
            ColorModel::Alpha => &[ChannelRole::Alpha],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorSpace {
    pub model: ColorModel,
    pub depth: ChannelDepth,
    pub profile: String,
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.model, self.depth)?;
        if !self.profile.is_empty() {
            write!(f, " ({})", self.profile)?;
        }
        Ok(())
    }
}

impl ColorSpace {
    pub fn new(model: ColorModel, depth: ChannelDepth, profile: impl Into<String>) -> Self {
        Self {
            model,
            depth,
            profile: profile.into(),
        }
    }

    pub fn rgba8() -> Self {
        Self::new(ColorModel::Rgba, ChannelDepth::U8, PROFILE_SRGB)
    }

    pub fn rgba16() -> Self {
        Self::new(ColorModel::Rgba, ChannelDepth::U16, PROFILE_SRGB)
    }

    pub fn rgba_f32() -> Self {
        Self::new(ColorModel::Rgba, ChannelDepth::F32, PROFILE_LINEAR_SRGB)
    }

    pub fn gray_alpha8() -> Self {
        Self::new(ColorModel::GrayAlpha, ChannelDepth::U8, PROFILE_SRGB)
    }

    /// Selection masks: 0 = unselected, 255 = fully selected.
    pub fn alpha8() -> Self {
        Self::new(ColorModel::Alpha, ChannelDepth::U8, "")
    }

    pub fn channel_count(&self) -> usize {
        self.model.channels().len()
    }

    pub fn pixel_size(&self) -> usize {
        self.channel_count() * self.depth.bytes()
    }

    pub fn channels(&self) -> &'static [ChannelRole] {
        self.model.channels()
    }

    /// Index of the channel that stores luminance directly, if any.
    pub fn luminance_channel(&self) -> Option<usize> {
        self.channels().iter().position(|r| *r == ChannelRole::Gray)
    }

    pub fn alpha_channel(&self) -> Option<usize> {
        self.channels().iter().position(|r| *r == ChannelRole::Alpha)
    }

    /// Transparent / unselected pixel. All-zero for every supported layout.
    pub fn default_pixel(&self) -> Vec<u8> {
        vec![0; self.pixel_size()]
    }

    fn read_channel(&self, bytes: &[u8], index: usize) -> f32 {
        match self.depth {
            ChannelDepth::U8 => bytes[index] as f32 / 255.0,
            ChannelDepth::U16 => {
                let v: u16 = bytemuck::pod_read_unaligned(&bytes[index * 2..index * 2 + 2]);
                v as f32 / 65535.0
            }
            ChannelDepth::F32 => bytemuck::pod_read_unaligned(&bytes[index * 4..index * 4 + 4]),
        }
    }

    fn write_channel(&self, out: &mut [u8], index: usize, value: f32) {
        match self.depth {
            ChannelDepth::U8 => {
                out[index] = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
            ChannelDepth::U16 => {
                let v = (value.clamp(0.0, 1.0) * 65535.0).round() as u16;
                out[index * 2..index * 2 + 2].copy_from_slice(bytemuck::bytes_of(&v));
            }
            ChannelDepth::F32 => {
                out[index * 4..index * 4 + 4].copy_from_slice(bytemuck::bytes_of(&value));
            }
        }
    }

    /// Decode one pixel into normalised straight-alpha RGBA.
    pub fn decode(&self, bytes: &[u8]) -> [f32; 4] {
        match self.model {
            ColorModel::Rgba => [
                self.read_channel(bytes, 0),
                self.read_channel(bytes, 1),
                self.read_channel(bytes, 2),
                self.read_channel(bytes, 3),
            ],
            ColorModel::GrayAlpha => {
                let g = self.read_channel(bytes, 0);
                [g, g, g, self.read_channel(bytes, 1)]
            }
            ColorModel::Alpha => [1.0, 1.0, 1.0, self.read_channel(bytes, 0)],
        }
    }

    /// Encode normalised RGBA into `out` (`pixel_size()` bytes).
    pub fn encode(&self, px: [f32; 4], out: &mut [u8]) {
        match self.model {
            ColorModel::Rgba => {
                for (i, v) in px.iter().enumerate() {
                    self.write_channel(out, i, *v);
                }
            }
            ColorModel::GrayAlpha => {
                self.write_channel(out, 0, luminance(px));
                self.write_channel(out, 1, px[3]);
            }
            ColorModel::Alpha => self.write_channel(out, 0, px[3]),
        }
    }

    /// Luminance of an encoded pixel, read from the gray channel when the
    /// model has one.
    pub fn pixel_luminance(&self, bytes: &[u8]) -> f32 {
        match self.luminance_channel() {
            Some(idx) => self.read_channel(bytes, idx),
            None => luminance(self.decode(bytes)),
        }
    }
}

/// Rec.709 luminance of normalised RGB.
pub fn luminance(px: [f32; 4]) -> f32 {
    0.2126 * px[0] + 0.7152 * px[1] + 0.0722 * px[2]
}

// ============================================================================
// CONVERSION
// ============================================================================

/// How float data is squeezed into an integer depth.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ToneMapping {
    #[default]
    Clip,
    Reinhard,
}

/// Maps normalised RGBA from one profile into another.
pub type ProfileConvertFn = fn([f32; 4]) -> [f32; 4];

/// Registry of profile-to-profile conversions. Identical profiles always
/// convert; anything else must be registered.
#[derive(Clone, Debug)]
pub struct ColorConverter {
    paths: HashMap<(String, String), ProfileConvertFn>,
}

impl Default for ColorConverter {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl ColorConverter {
    /// Empty registry: only same-profile conversion is possible.
    pub fn empty() -> Self {
        Self { paths: HashMap::new() }
    }

    pub fn with_builtin() -> Self {
        let mut conv = Self::empty();
        conv.register(PROFILE_SRGB, PROFILE_LINEAR_SRGB, srgb_to_linear_px);
        conv.register(PROFILE_LINEAR_SRGB, PROFILE_SRGB, linear_to_srgb_px);
        conv
    }

    pub fn register(&mut self, from: &str, to: &str, f: ProfileConvertFn) {
        self.paths.insert((from.to_string(), to.to_string()), f);
    }

    pub fn can_convert(&self, src: &ColorSpace, dst: &ColorSpace) -> bool {
        if src == dst {
            return true;
        }
        if src.model == ColorModel::Alpha || dst.model == ColorModel::Alpha {
            return src.model == dst.model;
        }
        src.profile == dst.profile
            || self
                .paths
                .contains_key(&(src.profile.clone(), dst.profile.clone()))
    }

    fn profile_fn(&self, src: &ColorSpace, dst: &ColorSpace) -> Result<Option<ProfileConvertFn>> {
        if !self.can_convert(src, dst) {
            return Err(CoreError::ColorSpaceMismatch {
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }
        if src.profile == dst.profile || src.model == ColorModel::Alpha {
            return Ok(None);
        }
        Ok(self
            .paths
            .get(&(src.profile.clone(), dst.profile.clone()))
            .copied())
    }

    /// Convert a run of pixels. `dst` must hold as many pixels as `src`.
    pub fn convert_bytes(
        &self,
        src_cs: &ColorSpace,
        src: &[u8],
        dst_cs: &ColorSpace,
        dst: &mut [u8],
        tone: ToneMapping,
    ) -> Result<()> {
        let sps = src_cs.pixel_size();
        let dps = dst_cs.pixel_size();
        let count = src.len() / sps;
        if src.len() % sps != 0 || dst.len() != count * dps {
            return Err(CoreError::PixelSizeMismatch {
                expected: count * dps,
                actual: dst.len(),
            });
        }
        if src_cs == dst_cs {
            dst.copy_from_slice(src);
            return Ok(());
        }
        let profile_fn = self.profile_fn(src_cs, dst_cs)?;
        let reinhard = tone == ToneMapping::Reinhard
            && !src_cs.depth.is_integer()
            && dst_cs.depth.is_integer();

        for (s, d) in src.chunks_exact(sps).zip(dst.chunks_exact_mut(dps)) {
            let mut px = src_cs.decode(s);
            if let Some(f) = profile_fn {
                px = f(px);
            }
            if reinhard {
                px = reinhard_px(px, src_cs.pixel_luminance(s));
            }
            dst_cs.encode(px, d);
        }
        Ok(())
    }

    pub fn convert_pixel(
        &self,
        src_cs: &ColorSpace,
        src: &[u8],
        dst_cs: &ColorSpace,
        tone: ToneMapping,
    ) -> Result<Vec<u8>> {
        let mut out = dst_cs.default_pixel();
        self.convert_bytes(src_cs, src, dst_cs, &mut out, tone)?;
        Ok(out)
    }
}

/// Reinhard global operator: scale RGB so luminance maps to `L / (1 + L)`.
fn reinhard_px(px: [f32; 4], lum: f32) -> [f32; 4] {
    if lum <= 0.0 {
        return [0.0, 0.0, 0.0, px[3]];
    }
    let scale = (lum / (1.0 + lum)) / lum;
    [px[0] * scale, px[1] * scale, px[2] * scale, px[3]]
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn srgb_to_linear_px(px: [f32; 4]) -> [f32; 4] {
    [srgb_to_linear(px[0]), srgb_to_linear(px[1]), srgb_to_linear(px[2]), px[3]]
}

fn linear_to_srgb_px(px: [f32; 4]) -> [f32; 4] {
    [linear_to_srgb(px[0]), linear_to_srgb(px[1]), linear_to_srgb(px[2]), px[3]]
}
