use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use image::RgbaImage;
use rayon::prelude::*;

use crate::colorspace::{ColorConverter, ColorSpace, ToneMapping};
use crate::error::{CoreError, OpStatus, Result};
use crate::geometry::Rect;
use crate::pixel::PixelBuffer;
use crate::pool::CancellationToken;

// ============================================================================
// TILES – fixed 64×64 blocks of raw pixel bytes
// ============================================================================

pub const TILE_SIZE: i32 = 64;
const TILE_PIXELS: usize = (TILE_SIZE * TILE_SIZE) as usize;

/// One tile worth of pixel bytes (`64 * 64 * pixel_size`).
///
/// Tiles live behind `Arc` so cloning a store only bumps reference counts;
/// mutation goes through `Arc::make_mut`, which copies a tile only while it
/// is shared.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    data: Vec<u8>,
}

impl Tile {
    fn uniform(pixel: &[u8]) -> Self {
        let mut data = Vec::with_capacity(TILE_PIXELS * pixel.len());
        for _ in 0..TILE_PIXELS {
            data.extend_from_slice(pixel);
        }
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn is_uniform(&self, pixel: &[u8]) -> bool {
        self.data.chunks_exact(pixel.len()).all(|p| p == pixel)
    }
}

/// Default tiles are immutable and shared process-wide, one per pixel value.
static DEFAULT_TILES: OnceLock<Mutex<HashMap<Vec<u8>, Weak<Tile>>>> = OnceLock::new();

fn shared_default_tile(pixel: &[u8]) -> Arc<Tile> {
    let cache = DEFAULT_TILES.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(tile) = map.get(pixel).and_then(Weak::upgrade) {
        return tile;
    }
    let tile = Arc::new(Tile::uniform(pixel));
    map.retain(|_, weak| weak.strong_count() > 0);
    map.insert(pixel.to_vec(), Arc::downgrade(&tile));
    tile
}

fn tile_index(v: i32) -> i32 {
    v.div_euclid(TILE_SIZE)
}

fn tile_local(v: i32) -> usize {
    v.rem_euclid(TILE_SIZE) as usize
}

/// Pixel rectangle covered by tile `(col, row)`.
pub fn tile_rect(col: i32, row: i32) -> Rect {
    Rect::new(col.saturating_mul(TILE_SIZE), row.saturating_mul(TILE_SIZE), TILE_SIZE, TILE_SIZE)
}

/// `tile_rect`, or `None` for tiles that do not fit in `i32` coordinates.
fn checked_tile_rect(col: i32, row: i32) -> Option<Rect> {
    let rect = Rect::new(col.checked_mul(TILE_SIZE)?, row.checked_mul(TILE_SIZE)?, TILE_SIZE, TILE_SIZE);
    rect.is_representable().then_some(rect)
}

/// Tile coordinates touched by `rect`, row-major.
fn tiles_in(rect: Rect) -> Vec<(i32, i32)> {
    if rect.is_empty() {
        return Vec::new();
    }
    let (c0, c1) = (tile_index(rect.left()), tile_index(rect.right() - 1));
    let (r0, r1) = (tile_index(rect.top()), tile_index(rect.bottom() - 1));
    let cols = (c1 - c0 + 1).max(0) as usize;
    let rows = (r1 - r0 + 1).max(0) as usize;
    let mut out = Vec::with_capacity(cols.saturating_mul(rows));
    for row in r0..=r1 {
        for col in c0..=c1 {
            out.push((col, row));
        }
    }
    out
}

struct TileUpdate {
    key: (i32, i32),
    slot: Option<Arc<Tile>>,
    allocated: bool,
    skipped: bool,
}

// ============================================================================
// TILE STORE – sparse, unbounded grid of tiles
// ============================================================================

/// Sparse tile grid. Slots that were never written read through the shared
/// default tile, so reads never allocate.
#[derive(Clone)]
pub struct TileStore {
    pixel_size: usize,
    default_pixel: Vec<u8>,
    default_tile: Arc<Tile>,
    tiles: HashMap<(i32, i32), Arc<Tile>>,
    limits: Rect,
    allocations: usize,
}

impl std::fmt::Debug for TileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStore")
            .field("pixel_size", &self.pixel_size)
            .field("tiles", &self.tiles.len())
            .field("limits", &self.limits)
            .finish()
    }
}

impl TileStore {
    // ---- construction -------------------------------------------------------

    /// Empty store whose unwritten pixels read as `default_pixel`.
    pub fn new(default_pixel: Vec<u8>, limits: Rect) -> Self {
        let default_tile = shared_default_tile(&default_pixel);
        Self {
            pixel_size: default_pixel.len(),
            default_pixel,
            default_tile,
            tiles: HashMap::new(),
            limits,
            allocations: 0,
        }
    }

    // ---- accessors ----------------------------------------------------------

    pub fn pixel_size(&self) -> usize {
        self.pixel_size
    }

    pub fn default_pixel(&self) -> &[u8] {
        &self.default_pixel
    }

    pub fn default_tile(&self) -> &Arc<Tile> {
        &self.default_tile
    }

    pub fn limits(&self) -> Rect {
        self.limits
    }

    /// Number of tile slots holding their own (or a shared uniform) tile.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Tiles created or copied-on-write since this store was created.
    pub fn allocation_count(&self) -> usize {
        self.allocations
    }

    pub fn is_allocated(&self, col: i32, row: i32) -> bool {
        self.tiles.contains_key(&(col, row))
    }

    /// Approximate heap usage of the allocated tiles.
    pub fn memory_bytes(&self) -> usize {
        self.tiles.len() * TILE_PIXELS * self.pixel_size
    }

    pub fn set_limits(&mut self, limits: Rect) {
        self.limits = limits;
    }

    /// Change the value unwritten pixels read as. Allocated tiles keep their
    /// bytes.
    pub fn set_default_pixel(&mut self, pixel: &[u8]) -> Result<()> {
        self.check_pixel(pixel)?;
        self.default_pixel = pixel.to_vec();
        self.default_tile = shared_default_tile(pixel);
        Ok(())
    }

    // ---- validation ---------------------------------------------------------

    fn check_pixel(&self, pixel: &[u8]) -> Result<()> {
        if pixel.len() != self.pixel_size {
            return Err(CoreError::PixelSizeMismatch {
                expected: self.pixel_size,
                actual: pixel.len(),
            });
        }
        Ok(())
    }

    fn check_rect(&self, rect: Rect) -> Result<()> {
        if !rect.is_representable() || !self.limits.contains_rect(&rect) {
            return Err(CoreError::OutOfBoundsGeometry {
                rect,
                limits: self.limits,
            });
        }
        Ok(())
    }

    fn check_len(&self, rect: Rect, len: usize) -> Result<()> {
        let expected = rect.area() * self.pixel_size;
        if len != expected {
            return Err(CoreError::PixelSizeMismatch {
                expected,
                actual: len,
            });
        }
        Ok(())
    }

    /// Private, writable tile at `key`, allocating or copying as needed.
    fn materialize(&mut self, key: (i32, i32)) -> &mut Tile {
        let Self {
            tiles,
            default_tile,
            allocations,
            ..
        } = self;
        let slot = tiles.entry(key).or_insert_with(|| {
            *allocations += 1;
            log::trace!("materialize tile {:?}", key);
            Arc::new(Tile::clone(default_tile))
        });
        if Arc::get_mut(slot).is_none() {
            *allocations += 1;
        }
        Arc::make_mut(slot)
    }

    // ---- pixel access -------------------------------------------------------

    /// Pixel bytes at `(x, y)`. Never fails and never allocates.
    pub fn read_pixel(&self, x: i32, y: i32) -> &[u8] {
        let tile = self
            .tiles
            .get(&(tile_index(x), tile_index(y)))
            .unwrap_or(&self.default_tile);
        let off = (tile_local(y) * TILE_SIZE as usize + tile_local(x)) * self.pixel_size;
        &tile.data[off..off + self.pixel_size]
    }

    pub fn write_pixel(&mut self, x: i32, y: i32, pixel: &[u8]) -> Result<()> {
        self.check_pixel(pixel)?;
        self.check_rect(Rect::new(x, y, 1, 1))?;
        let key = (tile_index(x), tile_index(y));
        if !self.tiles.contains_key(&key) && pixel == self.default_pixel.as_slice() {
            return Ok(());
        }
        let ps = self.pixel_size;
        let off = (tile_local(y) * TILE_SIZE as usize + tile_local(x)) * ps;
        let tile = self.materialize(key);
        tile.data[off..off + ps].copy_from_slice(pixel);
        Ok(())
    }

    /// Copy `rect` into `out` (row-major, `rect.area() * pixel_size` bytes).
    pub fn read_rect_into(&self, rect: Rect, out: &mut [u8]) -> Result<()> {
        self.check_len(rect, out.len())?;
        let ps = self.pixel_size;
        for (col, row) in tiles_in(rect) {
            let tr = tile_rect(col, row);
            let ov = tr.intersected(&rect);
            let tile = self.tiles.get(&(col, row)).unwrap_or(&self.default_tile);
            let n = ov.width as usize * ps;
            for y in ov.top()..ov.bottom() {
                let src = ((y - tr.y) as usize * TILE_SIZE as usize + (ov.x - tr.x) as usize) * ps;
                let dst = ((y - rect.y) as usize * rect.width as usize + (ov.x - rect.x) as usize) * ps;
                out[dst..dst + n].copy_from_slice(&tile.data[src..src + n]);
            }
        }
        Ok(())
    }

    pub fn read_rect(&self, rect: Rect) -> Vec<u8> {
        let mut out = vec![0u8; rect.area() * self.pixel_size];
        // Length is correct by construction.
        let _ = self.read_rect_into(rect, &mut out);
        out
    }

    /// Write row-major `data` into `rect`. Tiles that do not exist yet are
    /// only created when the incoming bytes differ from the default pixel.
    pub fn write_rect(&mut self, rect: Rect, data: &[u8]) -> Result<()> {
        self.check_len(rect, data.len())?;
        if rect.is_empty() {
            return Ok(());
        }
        self.check_rect(rect)?;
        let ps = self.pixel_size;
        for (col, row) in tiles_in(rect) {
            let key = (col, row);
            let tr = tile_rect(col, row);
            let ov = tr.intersected(&rect);
            let n = ov.width as usize * ps;
            let src_off = |y: i32| ((y - rect.y) as usize * rect.width as usize + (ov.x - rect.x) as usize) * ps;

            if !self.tiles.contains_key(&key) {
                let default = self.default_pixel.as_slice();
                let has_content = (ov.top()..ov.bottom()).any(|y| {
                    let s = src_off(y);
                    data[s..s + n].chunks_exact(ps).any(|p| p != default)
                });
                if !has_content {
                    continue;
                }
            }

            let tile = self.materialize(key);
            for y in ov.top()..ov.bottom() {
                let s = src_off(y);
                let d = ((y - tr.y) as usize * TILE_SIZE as usize + (ov.x - tr.x) as usize) * ps;
                tile.data[d..d + n].copy_from_slice(&data[s..s + n]);
            }
        }
        Ok(())
    }

    // ---- bounds -------------------------------------------------------------

    /// Tight bounding box of all non-default pixels.
    pub fn exact_bounds(&self) -> Rect {
        let ps = self.pixel_size;
        let mut bounds = Rect::default();
        for (&(col, row), tile) in &self.tiles {
            let tr = tile_rect(col, row);
            if bounds.contains_rect(&tr) && !bounds.is_empty() {
                continue;
            }
            if Arc::ptr_eq(tile, &self.default_tile) || tile.is_uniform(&self.default_pixel) {
                continue;
            }
            let (mut min_x, mut min_y) = (TILE_SIZE, TILE_SIZE);
            let (mut max_x, mut max_y) = (-1, -1);
            for (i, px) in tile.data.chunks_exact(ps).enumerate() {
                if px != self.default_pixel.as_slice() {
                    let lx = i as i32 % TILE_SIZE;
                    let ly = i as i32 / TILE_SIZE;
                    min_x = min_x.min(lx);
                    max_x = max_x.max(lx);
                    min_y = min_y.min(ly);
                    max_y = max_y.max(ly);
                }
            }
            if max_x >= 0 {
                let found = Rect::from_edges(tr.x + min_x, tr.y + min_y, tr.x + max_x + 1, tr.y + max_y + 1);
                bounds = bounds.united(&found);
            }
        }
        bounds
    }

    /// Union of the allocated tiles' rectangles.
    pub fn extent(&self) -> Rect {
        self.tiles
            .keys()
            .fold(Rect::default(), |acc, &(c, r)| acc.united(&tile_rect(c, r)))
    }

    /// Rectangles of all allocated tiles, row-major.
    pub fn region(&self) -> Vec<Rect> {
        let mut keys: Vec<_> = self.tiles.keys().copied().collect();
        keys.sort_by_key(|&(c, r)| (r, c));
        keys.into_iter().map(|(c, r)| tile_rect(c, r)).collect()
    }

    /// Allocated tiles as `(col, row, bytes)`, row-major.
    pub fn tiles(&self) -> Vec<(i32, i32, &[u8])> {
        let mut out: Vec<_> = self
            .tiles
            .iter()
            .map(|(&(c, r), t)| (c, r, t.data.as_slice()))
            .collect();
        out.sort_by_key(|&(c, r, _)| (r, c));
        out
    }

    /// Install raw tile bytes at `(col, row)`. The tile must overlap the
    /// limits; bytes outside them are reset to the default pixel.
    pub fn insert_tile(&mut self, col: i32, row: i32, data: Vec<u8>) -> Result<()> {
        let expected = TILE_PIXELS * self.pixel_size;
        if data.len() != expected {
            return Err(CoreError::PixelSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let tr = checked_tile_rect(col, row).ok_or_else(|| CoreError::OutOfBoundsGeometry {
            rect: tile_rect(col, row),
            limits: self.limits,
        })?;
        let inside = tr.intersected(&self.limits);
        if inside.is_empty() {
            return Err(CoreError::OutOfBoundsGeometry {
                rect: tr,
                limits: self.limits,
            });
        }
        let mut data = data;
        if inside != tr {
            let ps = self.pixel_size;
            for (i, px) in data.chunks_exact_mut(ps).enumerate() {
                let (lx, ly) = (i as i32 % TILE_SIZE, i as i32 / TILE_SIZE);
                if !inside.contains_point(tr.x + lx, tr.y + ly) {
                    px.copy_from_slice(&self.default_pixel);
                }
            }
        }
        self.allocations += 1;
        self.tiles.insert((col, row), Arc::new(Tile { data }));
        Ok(())
    }

    // ---- bulk operations ----------------------------------------------------

    /// Fill `rect` with `pixel` (or the default pixel). Fully covered tiles
    /// are dropped for a default fill and share one uniform tile otherwise.
    pub fn clear(&mut self, rect: Rect, pixel: Option<&[u8]>) -> Result<()> {
        let pixel = match pixel {
            Some(p) => {
                self.check_pixel(p)?;
                p.to_vec()
            }
            None => self.default_pixel.clone(),
        };
        if rect.is_empty() {
            return Ok(());
        }
        let is_default = pixel == self.default_pixel;
        if !is_default {
            self.check_rect(rect)?;
        }
        let ps = self.pixel_size;
        let mut uniform: Option<Arc<Tile>> = None;

        for key in tiles_in(rect) {
            let tr = tile_rect(key.0, key.1);
            let ov = tr.intersected(&rect);
            if ov == tr {
                if is_default {
                    self.tiles.remove(&key);
                } else {
                    if uniform.is_none() {
                        self.allocations += 1;
                        uniform = Some(Arc::new(Tile::uniform(&pixel)));
                    }
                    if let Some(shared) = &uniform {
                        self.tiles.insert(key, Arc::clone(shared));
                    }
                }
                continue;
            }
            if is_default && !self.tiles.contains_key(&key) {
                continue;
            }
            let tile = self.materialize(key);
            for y in ov.top()..ov.bottom() {
                for x in ov.left()..ov.right() {
                    let d = ((y - tr.y) as usize * TILE_SIZE as usize + (x - tr.x) as usize) * ps;
                    tile.data[d..d + ps].copy_from_slice(&pixel);
                }
            }
        }
        Ok(())
    }

    /// Drop allocated tiles inside `rect` whose content equals the default.
    pub fn purge(&mut self, rect: Rect) -> usize {
        let default = &self.default_pixel;
        let before = self.tiles.len();
        self.tiles.retain(|&(c, r), tile| {
            !(rect.contains_rect(&tile_rect(c, r)) && tile.is_uniform(default))
        });
        let purged = before - self.tiles.len();
        if purged > 0 {
            log::debug!("purged {} default tiles", purged);
        }
        purged
    }

    /// Discard everything outside `rect`: tiles beyond it are dropped and the
    /// outside part of straddling tiles is reset to the default pixel.
    pub fn set_extent(&mut self, rect: Rect) {
        let keys: Vec<(i32, i32)> = self.tiles.keys().copied().collect();
        let ps = self.pixel_size;
        let default = self.default_pixel.clone();
        for key in keys {
            let tr = tile_rect(key.0, key.1);
            if !tr.intersects(&rect) {
                self.tiles.remove(&key);
                continue;
            }
            if rect.contains_rect(&tr) {
                continue;
            }
            let keep = tr.intersected(&rect);
            let tile = self.materialize(key);
            for ly in 0..TILE_SIZE {
                for lx in 0..TILE_SIZE {
                    if !keep.contains_point(tr.x + lx, tr.y + ly) {
                        let d = (ly as usize * TILE_SIZE as usize + lx as usize) * ps;
                        tile.data[d..d + ps].copy_from_slice(&default);
                    }
                }
            }
        }
    }

    /// Copy `rect` from `src` into this store. Whole tiles are shared with
    /// `src` and only copied on the next write.
    pub fn bit_blt(&mut self, src: &TileStore, rect: Rect) -> Result<()> {
        if src.pixel_size != self.pixel_size {
            return Err(CoreError::PixelSizeMismatch {
                expected: self.pixel_size,
                actual: src.pixel_size,
            });
        }
        if rect.is_empty() {
            return Ok(());
        }
        self.check_rect(rect)?;
        let same_default = src.default_pixel == self.default_pixel;
        for key in tiles_in(rect) {
            let tr = tile_rect(key.0, key.1);
            let ov = tr.intersected(&rect);
            if ov == tr && same_default {
                match src.tiles.get(&key) {
                    Some(tile) => {
                        self.tiles.insert(key, Arc::clone(tile));
                    }
                    None => {
                        self.tiles.remove(&key);
                    }
                }
                continue;
            }
            let bytes = src.read_rect(ov);
            if self.tiles.contains_key(&key) || bytes.chunks_exact(self.pixel_size).any(|p| p != self.default_pixel.as_slice()) {
                let ps = self.pixel_size;
                let tile = self.materialize(key);
                for y in ov.top()..ov.bottom() {
                    let n = ov.width as usize * ps;
                    let s = (y - ov.y) as usize * n;
                    let d = ((y - tr.y) as usize * TILE_SIZE as usize + (ov.x - tr.x) as usize) * ps;
                    tile.data[d..d + n].copy_from_slice(&bytes[s..s + n]);
                }
            }
        }
        Ok(())
    }

    /// Share every tile of `src` touching `rect` without splitting tiles, so
    /// pixels up to the surrounding tile edges are copied as well.
    pub fn bit_blt_rough(&mut self, src: &TileStore, rect: Rect) -> Result<()> {
        if src.pixel_size != self.pixel_size || src.default_pixel != self.default_pixel {
            return self.bit_blt(src, rect);
        }
        if rect.is_empty() {
            return Ok(());
        }
        self.check_rect(rect)?;
        for key in tiles_in(rect) {
            match src.tiles.get(&key) {
                Some(tile) => {
                    self.tiles.insert(key, Arc::clone(tile));
                }
                None => {
                    self.tiles.remove(&key);
                }
            }
        }
        Ok(())
    }

    // ---- planar access ------------------------------------------------------

    fn check_planes(&self, channel_sizes: &[usize]) -> Result<()> {
        let total: usize = channel_sizes.iter().sum();
        if total != self.pixel_size || channel_sizes.contains(&0) {
            return Err(CoreError::PixelSizeMismatch {
                expected: self.pixel_size,
                actual: total,
            });
        }
        Ok(())
    }

    /// Read `rect` split into one plane per channel. `channel_sizes` gives the
    /// byte width of each channel and must add up to the pixel size.
    pub fn read_planar(&self, rect: Rect, channel_sizes: &[usize]) -> Result<Vec<Vec<u8>>> {
        self.check_planes(channel_sizes)?;
        let interleaved = self.read_rect(rect);
        let mut planes: Vec<Vec<u8>> = channel_sizes
            .iter()
            .map(|&n| Vec::with_capacity(rect.area() * n))
            .collect();
        for px in interleaved.chunks_exact(self.pixel_size) {
            let mut at = 0;
            for (plane, &n) in planes.iter_mut().zip(channel_sizes) {
                plane.extend_from_slice(&px[at..at + n]);
                at += n;
            }
        }
        Ok(planes)
    }

    /// Inverse of [`read_planar`](Self::read_planar).
    pub fn write_planar(&mut self, rect: Rect, channel_sizes: &[usize], planes: &[&[u8]]) -> Result<()> {
        self.check_planes(channel_sizes)?;
        if planes.len() != channel_sizes.len() {
            return Err(CoreError::PixelSizeMismatch {
                expected: channel_sizes.len(),
                actual: planes.len(),
            });
        }
        for (plane, &n) in planes.iter().zip(channel_sizes) {
            if plane.len() != rect.area() * n {
                return Err(CoreError::PixelSizeMismatch {
                    expected: rect.area() * n,
                    actual: plane.len(),
                });
            }
        }
        let mut interleaved = vec![0u8; rect.area() * self.pixel_size];
        for (i, px) in interleaved.chunks_exact_mut(self.pixel_size).enumerate() {
            let mut at = 0;
            for (plane, &n) in planes.iter().zip(channel_sizes) {
                px[at..at + n].copy_from_slice(&plane[i * n..(i + 1) * n]);
                at += n;
            }
        }
        self.write_rect(rect, &interleaved)
    }

    /// Run `f(tile_rect, overlap, bytes)` on a private copy of every tile
    /// touching `rect`, in parallel. A copy is published back only when `f`
    /// reports a change, and a tile that did not exist stays unallocated if
    /// the result equals the default tile. Cancellation is polled per tile;
    /// tiles not yet visited when it fires keep their old content.
    pub(crate) fn update_tiles<F>(&mut self, rect: Rect, cancel: Option<&CancellationToken>, f: F) -> OpStatus
    where
        F: Fn(Rect, Rect, &mut [u8]) -> bool + Sync,
    {
        if rect.is_empty() {
            return OpStatus::Completed;
        }
        let work: Vec<((i32, i32), Option<Arc<Tile>>)> = tiles_in(rect)
            .into_iter()
            .map(|key| (key, self.tiles.remove(&key)))
            .collect();
        let default_tile = Arc::clone(&self.default_tile);

        let results: Vec<TileUpdate> = work
            .into_par_iter()
            .map(|(key, slot)| {
                if cancel.is_some_and(|c| c.is_cancelled()) {
                    return TileUpdate { key, slot, allocated: false, skipped: true };
                }
                let tr = tile_rect(key.0, key.1);
                let ov = tr.intersected(&rect);
                let base: &Tile = slot.as_deref().unwrap_or(&default_tile);
                let mut scratch = base.data.clone();
                if !f(tr, ov, &mut scratch) || (slot.is_none() && scratch == default_tile.data) {
                    return TileUpdate { key, slot, allocated: false, skipped: false };
                }
                TileUpdate {
                    key,
                    slot: Some(Arc::new(Tile { data: scratch })),
                    allocated: true,
                    skipped: false,
                }
            })
            .collect();

        let mut status = OpStatus::Completed;
        for update in results {
            if update.allocated {
                self.allocations += 1;
            }
            if update.skipped {
                status = OpStatus::Cancelled;
            }
            if let Some(tile) = update.slot {
                self.tiles.insert(update.key, tile);
            }
        }
        status
    }
}

// ============================================================================
// PAINT DEVICE – a tile store plus colorspace and placement
// ============================================================================

/// Pixel storage of one node. Device coordinates map to store coordinates by
/// subtracting the offset, so moving a device never touches its tiles.
#[derive(Clone, Debug)]
pub struct PaintDevice {
    colorspace: ColorSpace,
    store: TileStore,
    offset_x: i32,
    offset_y: i32,
}

impl PaintDevice {
    pub fn new(colorspace: ColorSpace, limits: Rect) -> Self {
        let store = TileStore::new(colorspace.default_pixel(), limits);
        Self {
            colorspace,
            store,
            offset_x: 0,
            offset_y: 0,
        }
    }

    /// Rebuild a device from an exported buffer (see [`export_exact`](Self::export_exact)).
    pub fn from_buffer(buffer: &PixelBuffer, limits: Rect) -> Result<Self> {
        let mut device = Self::new(buffer.colorspace().clone(), limits);
        device.write_rect(buffer)?;
        Ok(device)
    }

    pub fn colorspace(&self) -> &ColorSpace {
        &self.colorspace
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut TileStore {
        &mut self.store
    }

    pub fn offset(&self) -> (i32, i32) {
        (self.offset_x, self.offset_y)
    }

    pub fn move_to(&mut self, x: i32, y: i32) {
        self.offset_x = x;
        self.offset_y = y;
    }

    pub fn move_by(&mut self, dx: i32, dy: i32) {
        self.offset_x = self.offset_x.saturating_add(dx);
        self.offset_y = self.offset_y.saturating_add(dy);
    }

    pub fn default_pixel(&self) -> &[u8] {
        self.store.default_pixel()
    }

    pub fn memory_bytes(&self) -> usize {
        self.store.memory_bytes()
    }

    /// `rect` in store coordinates. Fails when the shift overflows `i32`.
    pub(crate) fn to_store(&self, rect: Rect) -> Result<Rect> {
        match (rect.x.checked_sub(self.offset_x), rect.y.checked_sub(self.offset_y)) {
            (Some(x), Some(y)) => Ok(Rect::new(x, y, rect.width, rect.height)),
            _ => Err(CoreError::OutOfBoundsGeometry {
                rect,
                limits: self.store.limits(),
            }),
        }
    }

    fn check_colorspace(&self, other: &ColorSpace) -> Result<()> {
        if *other != self.colorspace {
            return Err(CoreError::ColorSpaceMismatch {
                src: other.to_string(),
                dst: self.colorspace.to_string(),
            });
        }
        Ok(())
    }

    /// Fail with `OutOfBoundsGeometry` when `rect` cannot be written.
    pub fn check_writable(&self, rect: Rect) -> Result<()> {
        if rect.is_empty() {
            return Ok(());
        }
        let limits = self.store.limits();
        let local = self.to_store(rect)?;
        if rect.is_representable() && local.is_representable() && limits.contains_rect(&local) {
            Ok(())
        } else {
            Err(CoreError::OutOfBoundsGeometry { rect, limits })
        }
    }

    /// Pixel at device `(x, y)`; positions that cannot map into the store
    /// read as the default pixel.
    pub fn read_pixel(&self, x: i32, y: i32) -> &[u8] {
        match (x.checked_sub(self.offset_x), y.checked_sub(self.offset_y)) {
            (Some(sx), Some(sy)) => self.store.read_pixel(sx, sy),
            _ => self.store.default_pixel(),
        }
    }

    pub fn write_pixel(&mut self, x: i32, y: i32, pixel: &[u8]) -> Result<()> {
        let local = self.to_store(Rect::new(x, y, 1, 1))?;
        self.store.write_pixel(local.x, local.y, pixel)
    }

    pub fn read_rect(&self, rect: Rect) -> PixelBuffer {
        let Ok(local) = self.to_store(rect) else {
            return PixelBuffer::new(rect, self.colorspace.clone());
        };
        let data = self.store.read_rect(local);
        PixelBuffer::from_raw(rect, self.colorspace.clone(), data)
            .unwrap_or_else(|_| PixelBuffer::new(rect, self.colorspace.clone()))
    }

    /// Write a buffer in this device's colorspace at the buffer's rect.
    pub fn write_rect(&mut self, buffer: &PixelBuffer) -> Result<()> {
        self.check_colorspace(buffer.colorspace())?;
        let local = self.to_store(buffer.rect())?;
        self.store.write_rect(local, buffer.data())
    }

    /// Write raw bytes already in this device's pixel layout.
    pub fn write_raw(&mut self, rect: Rect, data: &[u8]) -> Result<()> {
        let local = self.to_store(rect)?;
        self.store.write_rect(local, data)
    }

    fn channel_sizes(&self) -> Vec<usize> {
        vec![self.colorspace.depth.bytes(); self.colorspace.channel_count()]
    }

    /// One plane per channel of this device's colorspace, in channel order.
    pub fn read_planar(&self, rect: Rect) -> Result<Vec<Vec<u8>>> {
        let local = self.to_store(rect)?;
        self.store.read_planar(local, &self.channel_sizes())
    }

    pub fn write_planar(&mut self, rect: Rect, planes: &[&[u8]]) -> Result<()> {
        let local = self.to_store(rect)?;
        let sizes = self.channel_sizes();
        self.store.write_planar(local, &sizes, planes)
    }

    /// Read `rect` converted into `target`.
    pub fn convert_to_buffer(
        &self,
        rect: Rect,
        target: &ColorSpace,
        converter: &ColorConverter,
        tone: ToneMapping,
    ) -> Result<PixelBuffer> {
        self.read_rect(rect).convert(target, converter, tone)
    }

    pub fn fill(&mut self, rect: Rect, pixel: &[u8]) -> Result<()> {
        let local = self.to_store(rect)?;
        self.store.clear(local, Some(pixel))
    }

    pub fn clear(&mut self, rect: Rect) -> Result<()> {
        let local = self.to_store(rect)?;
        self.store.clear(local, None)
    }

    /// Drop everything outside `rect` (device coordinates).
    pub fn crop(&mut self, rect: Rect) -> Result<()> {
        self.check_writable(rect)?;
        let local = self.to_store(rect)?;
        self.store.set_extent(local);
        Ok(())
    }

    pub fn exact_bounds(&self) -> Rect {
        let b = self.store.exact_bounds();
        if b.is_empty() {
            b
        } else {
            b.translated(self.offset_x, self.offset_y)
        }
    }

    pub fn extent(&self) -> Rect {
        let e = self.store.extent();
        if e.is_empty() {
            e
        } else {
            e.translated(self.offset_x, self.offset_y)
        }
    }

    /// Everything needed to rebuild this device: its exact content.
    pub fn export_exact(&self) -> PixelBuffer {
        self.read_rect(self.exact_bounds())
    }

    pub fn to_rgba_image(&self, rect: Rect, converter: &ColorConverter) -> Result<RgbaImage> {
        self.read_rect(rect).to_rgba_image(converter)
    }
}
