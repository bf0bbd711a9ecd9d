// Copyright 2024 The Dx9mt Developers.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Surfaces and textures.
//!
//! A surface owns a lazily allocated system-memory image; textures and
//! swapchains own their sub-surfaces strongly while each sub-surface keeps
//! a weak uplink to its container. Unlocking a sub-surface (or using it as
//! a copy destination) bumps the container texture's dirty generation,
//! which is what routes the texture back through the upload path on the
//! next draw.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use device::SwapChain;
use format::Format;
use handle::{ObjectId, ObjectKind, PrivateData, Resource};
use state::Rect;
use {mutex_lock, D3dResult, Error};

/// Resource memory pool (D3DPOOL).
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum Pool {
    Default = 0,
    Managed = 1,
    SystemMem = 2,
    Scratch = 3,
}

bitflags! {
    /// Resource usage flags (D3DUSAGE subset the recorder acts on).
    pub struct Usage: u32 {
        const RENDER_TARGET = 0x0000_0001;
        const DEPTH_STENCIL = 0x0000_0002;
        const WRITE_ONLY = 0x0000_0008;
        const SOFTWARE_PROCESSING = 0x0000_0010;
        const DYNAMIC = 0x0000_0200;
        const AUTOGEN_MIPMAP = 0x0000_0400;
    }
}

/// Immutable description of a surface.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub pool: Pool,
    pub usage: Usage,
    pub multisample: u32,
    pub multisample_quality: u32,
}

/// Weak uplink from a sub-surface to whatever owns it.
#[derive(Clone)]
pub enum Container {
    None,
    Texture(Weak<Texture2d>),
    Cube(Weak<CubeTexture>),
    SwapChain(Weak<SwapChain>),
}

fn next_generation(generation: u32) -> u32 {
    let next = generation.wrapping_add(1);
    if next == 0 {
        1
    } else {
        next
    }
}

/// A 2D image with system-memory backing.
pub struct Surface {
    object_id: ObjectId,
    device_id: u32,
    desc: SurfaceDesc,
    pitch: u32,
    lockable: bool,
    container: Container,
    sysmem: Mutex<Option<Vec<u8>>>,
    private: PrivateData,
}

/// Locked surface image. Dropping the guard is the unlock, which marks the
/// owning texture dirty.
pub struct SurfaceLock<'a> {
    surface: &'a Surface,
    guard: MutexGuard<'a, Option<Vec<u8>>>,
}

impl<'a> SurfaceLock<'a> {
    pub fn pitch(&self) -> u32 {
        self.surface.pitch
    }
}

impl<'a> Deref for SurfaceLock<'a> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match *self.guard {
            Some(ref bytes) => bytes,
            None => &[],
        }
    }
}

impl<'a> DerefMut for SurfaceLock<'a> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match *self.guard {
            Some(ref mut bytes) => bytes,
            None => &mut [],
        }
    }
}

impl<'a> Drop for SurfaceLock<'a> {
    fn drop(&mut self) {
        self.surface.mark_container_dirty();
    }
}

impl Surface {
    pub fn new(device_id: u32, desc: SurfaceDesc, lockable: bool, container: Container)
               -> Surface {
        let pitch = desc.format.pitch(desc.width);
        Surface {
            object_id: ObjectId::alloc(ObjectKind::Surface),
            device_id: device_id,
            desc: desc,
            pitch: pitch,
            lockable: lockable,
            container: container,
            sysmem: Mutex::new(None),
            private: PrivateData::new(),
        }
    }

    pub fn desc(&self) -> &SurfaceDesc {
        &self.desc
    }

    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    pub fn lockable(&self) -> bool {
        self.lockable
    }

    /// Bytes the surface image occupies (and the upload arena carries).
    pub fn upload_size(&self) -> u32 {
        self.desc.format.storage_size(self.pitch, self.desc.height)
    }

    fn backing(&self) -> MutexGuard<Option<Vec<u8>>> {
        let mut guard = mutex_lock(&self.sysmem);
        if guard.is_none() {
            *guard = Some(vec![0; self.upload_size() as usize]);
        }
        guard
    }

    /// Whether the image has been touched yet; untouched surfaces are not
    /// uploaded.
    pub fn has_backing(&self) -> bool {
        mutex_lock(&self.sysmem).is_some()
    }

    /// Lock the whole image for CPU access.
    pub fn lock(&self) -> D3dResult<SurfaceLock> {
        if !self.lockable {
            return Err(Error::InvalidCall);
        }
        let guard = self.backing();
        Ok(SurfaceLock { surface: self, guard: guard })
    }

    /// Run `f` over the (lazily allocated) backing bytes without the
    /// lockable check; internal copy/fill/upload paths come through here.
    pub fn with_backing_mut<R, F: FnOnce(&mut [u8]) -> R>(&self, f: F) -> R {
        let mut guard = self.backing();
        match *guard {
            Some(ref mut bytes) => f(bytes),
            None => f(&mut []),
        }
    }

    /// Run `f` over the backing bytes if the image was ever touched.
    pub fn with_backing<R, F: FnOnce(&[u8]) -> R>(&self, f: F) -> Option<R> {
        let guard = mutex_lock(&self.sysmem);
        match *guard {
            Some(ref bytes) => Some(f(bytes)),
            None => None,
        }
    }

    /// Bump the owning texture's dirty generation, if any.
    pub fn mark_container_dirty(&self) {
        match self.container {
            Container::None | Container::SwapChain(_) => {}
            Container::Texture(ref weak) => {
                if let Some(texture) = weak.upgrade() {
                    texture.mark_dirty();
                }
            }
            Container::Cube(ref weak) => {
                if let Some(cube) = weak.upgrade() {
                    cube.mark_dirty();
                }
            }
        }
    }

    /// Object id of the containing texture, for packets that want to link a
    /// render target back to the texture it samples from.
    pub fn container_texture_id(&self) -> ObjectId {
        match self.container {
            Container::Texture(ref weak) => {
                weak.upgrade().map(|t| t.object_id()).unwrap_or(ObjectId::NONE)
            }
            Container::Cube(ref weak) => {
                weak.upgrade().map(|t| t.object_id()).unwrap_or(ObjectId::NONE)
            }
            _ => ObjectId::NONE,
        }
    }
}

impl Resource for Surface {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Surface
    }
    fn private_data(&self) -> &PrivateData {
        &self.private
    }
    fn device_id(&self) -> u32 {
        self.device_id
    }
}

fn resolve_rect(desc: &SurfaceDesc, rect: Option<Rect>) -> Rect {
    match rect {
        Some(r) => r,
        None => Rect::new(0, 0, desc.width as i32, desc.height as i32),
    }
}

fn rect_valid_for_surface(rect: &Rect, desc: &SurfaceDesc) -> bool {
    if rect.left < 0 || rect.top < 0 || rect.right <= rect.left || rect.bottom <= rect.top {
        return false;
    }
    rect.right as u32 <= desc.width && rect.bottom as u32 <= desc.height
}

fn is_full_surface(rect: &Rect, desc: &SurfaceDesc) -> bool {
    rect.left == 0 && rect.top == 0
        && rect.right as u32 == desc.width
        && rect.bottom as u32 == desc.height
}

fn rect_is_block_aligned(rect: &Rect) -> bool {
    rect.left % 4 == 0 && rect.top % 4 == 0 && rect.right % 4 == 0 && rect.bottom % 4 == 0
}

fn blit_linear(dst: &mut [u8], dst_pitch: u32, dst_r: &Rect,
               src: &[u8], src_pitch: u32, src_r: &Rect, bpp: u32) {
    let src_w = src_r.width() as usize;
    let src_h = src_r.height() as usize;
    let dst_w = dst_r.width() as usize;
    let dst_h = dst_r.height() as usize;
    let bpp = bpp as usize;

    if src_w == dst_w && src_h == dst_h {
        let row_bytes = src_w * bpp;
        for y in 0..src_h {
            let src_off = (src_r.top as usize + y) * src_pitch as usize
                + src_r.left as usize * bpp;
            let dst_off = (dst_r.top as usize + y) * dst_pitch as usize
                + dst_r.left as usize * bpp;
            dst[dst_off..dst_off + row_bytes].copy_from_slice(&src[src_off..src_off + row_bytes]);
        }
        return;
    }

    // Nearest-neighbor scale.
    for y in 0..dst_h {
        let src_y = src_r.top as usize + (y * src_h) / dst_h;
        let src_row = src_y * src_pitch as usize + src_r.left as usize * bpp;
        let dst_row = (dst_r.top as usize + y) * dst_pitch as usize
            + dst_r.left as usize * bpp;
        for x in 0..dst_w {
            let src_x = (x * src_w) / dst_w;
            let src_off = src_row + src_x * bpp;
            let dst_off = dst_row + x * bpp;
            for byte in 0..bpp {
                dst[dst_off + byte] = src[src_off + byte];
            }
        }
    }
}

fn blit_blocks(dst: &mut [u8], dst_pitch: u32, dst_r: &Rect,
               src: &[u8], src_pitch: u32, src_r: &Rect, block_bytes: u32) {
    let block_rows = ((src_r.height() + 3) / 4) as usize;
    let block_columns = ((src_r.width() + 3) / 4) as usize;
    let row_bytes = block_columns * block_bytes as usize;
    for row in 0..block_rows {
        let src_off = (src_r.top as usize / 4 + row) * src_pitch as usize
            + src_r.left as usize / 4 * block_bytes as usize;
        let dst_off = (dst_r.top as usize / 4 + row) * dst_pitch as usize
            + dst_r.left as usize / 4 * block_bytes as usize;
        dst[dst_off..dst_off + row_bytes].copy_from_slice(&src[src_off..src_off + row_bytes]);
    }
}

/// Copy pixels between surface backings.
///
/// Equal-size copies move rows as-is (safe when `dst` and `src` alias);
/// differing sizes nearest-neighbor scale and require `allow_scale`.
/// Block-compressed surfaces only move whole 4x4 blocks: sub-rects must be
/// 4-aligned on every edge and scaling is refused outright, while
/// full-surface copies work for any dimensions.
pub fn copy_rect(dst: &Surface, dst_rect: Option<Rect>,
                 src: &Surface, src_rect: Option<Rect>,
                 allow_scale: bool) -> D3dResult<()> {
    let src_bpp = src.desc.format.bytes_per_pixel();
    let dst_bpp = dst.desc.format.bytes_per_pixel();
    if src_bpp != dst_bpp {
        return Err(Error::InvalidCall);
    }

    let src_r = resolve_rect(&src.desc, src_rect);
    let dst_r = resolve_rect(&dst.desc, dst_rect);
    if !rect_valid_for_surface(&src_r, &src.desc) || !rect_valid_for_surface(&dst_r, &dst.desc) {
        return Err(Error::InvalidCall);
    }

    let same_size = src_r.width() == dst_r.width() && src_r.height() == dst_r.height();
    if !allow_scale && !same_size {
        return Err(Error::InvalidCall);
    }

    let compressed = src.desc.format.is_block_compressed()
        || dst.desc.format.is_block_compressed();
    if compressed {
        if src.desc.format != dst.desc.format {
            return Err(Error::InvalidCall);
        }
        // Blocks cannot be resampled.
        if !same_size {
            return Err(Error::InvalidCall);
        }
        let full = is_full_surface(&src_r, &src.desc) && is_full_surface(&dst_r, &dst.desc);
        if !full && (!rect_is_block_aligned(&src_r) || !rect_is_block_aligned(&dst_r)) {
            return Err(Error::InvalidCall);
        }
    }

    if std::ptr::eq(dst, src) {
        // Aliased copy: snapshot the image first, since per-row copies
        // could otherwise read bytes earlier rows already overwrote.
        let snapshot = dst.with_backing_mut(|bytes| bytes.to_vec());
        dst.with_backing_mut(|bytes| {
            if compressed {
                blit_blocks(bytes, dst.pitch, &dst_r, &snapshot, src.pitch, &src_r,
                            src.desc.format.block_bytes());
            } else {
                blit_linear(bytes, dst.pitch, &dst_r, &snapshot, src.pitch, &src_r, src_bpp);
            }
        });
    } else {
        // Distinct surfaces hold distinct mutexes; recording is
        // single-threaded, so holding both guards cannot deadlock.
        let mut dst_guard = dst.backing();
        let src_guard = src.backing();
        let dst_bytes = dst_guard.as_mut().map(|bytes| &mut bytes[..]).unwrap_or(&mut []);
        let src_bytes = src_guard.as_ref().map(|bytes| &bytes[..]).unwrap_or(&[]);
        if compressed {
            blit_blocks(dst_bytes, dst.pitch, &dst_r, src_bytes, src.pitch, &src_r,
                        src.desc.format.block_bytes());
        } else {
            blit_linear(dst_bytes, dst.pitch, &dst_r, src_bytes, src.pitch, &src_r, src_bpp);
        }
    }

    dst.mark_container_dirty();
    Ok(())
}

/// Fill a rect of the surface backing with an ARGB color, writing pixel
/// values at the format's width. Compressed formats cannot be filled.
pub fn fill_rect(surface: &Surface, rect: Option<Rect>, color: u32) -> D3dResult<()> {
    if surface.desc.format.is_block_compressed() {
        return Err(Error::InvalidCall);
    }

    let fill = resolve_rect(&surface.desc, rect);
    if !rect_valid_for_surface(&fill, &surface.desc) {
        return Err(Error::InvalidCall);
    }

    let bpp = surface.desc.format.bytes_per_pixel() as usize;
    let width = fill.width() as usize;
    let height = fill.height() as usize;
    let pitch = surface.pitch as usize;

    surface.with_backing_mut(|bytes| {
        for y in 0..height {
            let row = (fill.top as usize + y) * pitch + fill.left as usize * bpp;
            match bpp {
                4 => {
                    let value = color.to_le_bytes();
                    for x in 0..width {
                        bytes[row + x * 4..row + x * 4 + 4].copy_from_slice(&value);
                    }
                }
                2 => {
                    let value = ((color & 0xFFFF) as u16).to_le_bytes();
                    for x in 0..width {
                        bytes[row + x * 2..row + x * 2 + 2].copy_from_slice(&value);
                    }
                }
                _ => {
                    let value = (color & 0xFF) as u8;
                    for byte in bytes[row..row + width].iter_mut() {
                        *byte = value;
                    }
                }
            }
        }
    });

    surface.mark_container_dirty();
    Ok(())
}

/// A mip-mapped 2D texture owning one surface per level.
pub struct Texture2d {
    object_id: ObjectId,
    device_id: u32,
    width: u32,
    height: u32,
    levels: u32,
    usage: Usage,
    format: Format,
    pool: Pool,
    lod: AtomicU32,
    autogen_filter: AtomicU32,
    generation: AtomicU32,
    last_upload_generation: AtomicU32,
    last_upload_frame_id: AtomicU32,
    surfaces: Vec<Arc<Surface>>,
    private: PrivateData,
}

impl Texture2d {
    pub fn new(device_id: u32, width: u32, height: u32, levels: u32, usage: Usage,
               format: Format, pool: Pool) -> D3dResult<Arc<Texture2d>> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidCall);
        }
        let levels = if levels == 0 { 1 } else { levels };
        let lockable = !usage.intersects(Usage::RENDER_TARGET | Usage::DEPTH_STENCIL);

        Ok(Arc::new_cyclic(|weak: &Weak<Texture2d>| {
            let mut surfaces = Vec::with_capacity(levels as usize);
            let mut level_w = width;
            let mut level_h = height;
            for _ in 0..levels {
                let desc = SurfaceDesc {
                    width: level_w,
                    height: level_h,
                    format: format,
                    pool: pool,
                    usage: usage,
                    multisample: 0,
                    multisample_quality: 0,
                };
                surfaces.push(Arc::new(Surface::new(
                    device_id, desc, lockable, Container::Texture(weak.clone()))));
                level_w = (level_w / 2).max(1);
                level_h = (level_h / 2).max(1);
            }
            Texture2d {
                object_id: ObjectId::alloc(ObjectKind::Texture),
                device_id: device_id,
                width: width,
                height: height,
                levels: levels,
                usage: usage,
                format: format,
                pool: pool,
                lod: AtomicU32::new(0),
                autogen_filter: AtomicU32::new(::state::texf::LINEAR),
                generation: AtomicU32::new(1),
                last_upload_generation: AtomicU32::new(0),
                last_upload_frame_id: AtomicU32::new(0),
                surfaces: surfaces,
                private: PrivateData::new(),
            }
        }))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn level_count(&self) -> u32 {
        self.levels
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    pub fn mark_dirty(&self) {
        let next = next_generation(self.generation.load(Ordering::Relaxed));
        self.generation.store(next, Ordering::Relaxed);
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn last_upload_generation(&self) -> u32 {
        self.last_upload_generation.load(Ordering::Relaxed)
    }

    pub fn last_upload_frame_id(&self) -> u32 {
        self.last_upload_frame_id.load(Ordering::Relaxed)
    }

    pub fn note_uploaded(&self, generation: u32, frame_id: u32) {
        self.last_upload_generation.store(generation, Ordering::Relaxed);
        self.last_upload_frame_id.store(frame_id, Ordering::Relaxed);
    }

    /// Set the LOD floor; values at or past the level count are ignored.
    /// Returns the previous floor.
    pub fn set_lod(&self, lod: u32) -> u32 {
        let old = self.lod.load(Ordering::Relaxed);
        if lod < self.levels {
            self.lod.store(lod, Ordering::Relaxed);
        }
        old
    }

    pub fn lod(&self) -> u32 {
        self.lod.load(Ordering::Relaxed)
    }

    pub fn set_autogen_filter(&self, filter: u32) {
        self.autogen_filter.store(filter, Ordering::Relaxed);
    }

    pub fn autogen_filter(&self) -> u32 {
        self.autogen_filter.load(Ordering::Relaxed)
    }

    pub fn surface_level(&self, level: u32) -> D3dResult<Arc<Surface>> {
        self.surfaces
            .get(level as usize)
            .cloned()
            .ok_or(Error::InvalidCall)
    }

    pub fn level_desc(&self, level: u32) -> D3dResult<SurfaceDesc> {
        self.surface_level(level).map(|surface| *surface.desc())
    }

    pub fn lock_level(&self, level: u32) -> D3dResult<SurfaceLock> {
        match self.surfaces.get(level as usize) {
            Some(surface) => surface.lock(),
            None => Err(Error::InvalidCall),
        }
    }

    /// The whole-texture dirty mark (`AddDirtyRect`); the rect itself is
    /// not tracked, any mark forces a re-upload.
    pub fn add_dirty_rect(&self, _rect: Option<Rect>) {
        self.mark_dirty();
    }
}

impl Resource for Texture2d {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Texture
    }
    fn private_data(&self) -> &PrivateData {
        &self.private
    }
    fn device_id(&self) -> u32 {
        self.device_id
    }
}

/// Faces of a cube texture, in hardware order.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CubeFace {
    PositiveX = 0,
    NegativeX = 1,
    PositiveY = 2,
    NegativeY = 3,
    PositiveZ = 4,
    NegativeZ = 5,
}

/// A cube texture: six faces, each with a full mip chain.
pub struct CubeTexture {
    object_id: ObjectId,
    device_id: u32,
    edge_length: u32,
    levels: u32,
    usage: Usage,
    format: Format,
    pool: Pool,
    lod: AtomicU32,
    autogen_filter: AtomicU32,
    generation: AtomicU32,
    surfaces: Vec<Arc<Surface>>,
    private: PrivateData,
}

fn cube_surface_index(levels: u32, face: CubeFace, level: u32) -> usize {
    (face as u32 * levels + level) as usize
}

impl CubeTexture {
    pub fn new(device_id: u32, edge_length: u32, levels: u32, usage: Usage,
               format: Format, pool: Pool) -> D3dResult<Arc<CubeTexture>> {
        if edge_length == 0 {
            return Err(Error::InvalidCall);
        }
        let levels = if levels == 0 { 1 } else { levels };
        let lockable = !usage.intersects(Usage::RENDER_TARGET | Usage::DEPTH_STENCIL);

        Ok(Arc::new_cyclic(|weak: &Weak<CubeTexture>| {
            let mut surfaces = Vec::with_capacity((levels * 6) as usize);
            for _face in 0..6 {
                let mut level_edge = edge_length;
                for _ in 0..levels {
                    let desc = SurfaceDesc {
                        width: level_edge,
                        height: level_edge,
                        format: format,
                        pool: pool,
                        usage: usage,
                        multisample: 0,
                        multisample_quality: 0,
                    };
                    surfaces.push(Arc::new(Surface::new(
                        device_id, desc, lockable, Container::Cube(weak.clone()))));
                    level_edge = (level_edge / 2).max(1);
                }
            }
            CubeTexture {
                object_id: ObjectId::alloc(ObjectKind::Texture),
                device_id: device_id,
                edge_length: edge_length,
                levels: levels,
                usage: usage,
                format: format,
                pool: pool,
                lod: AtomicU32::new(0),
                autogen_filter: AtomicU32::new(::state::texf::LINEAR),
                generation: AtomicU32::new(1),
                surfaces: surfaces,
                private: PrivateData::new(),
            }
        }))
    }

    pub fn edge_length(&self) -> u32 {
        self.edge_length
    }

    pub fn level_count(&self) -> u32 {
        self.levels
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn pool(&self) -> Pool {
        self.pool
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn mark_dirty(&self) {
        let next = next_generation(self.generation.load(Ordering::Relaxed));
        self.generation.store(next, Ordering::Relaxed);
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }

    pub fn set_lod(&self, lod: u32) -> u32 {
        let old = self.lod.load(Ordering::Relaxed);
        if lod < self.levels {
            self.lod.store(lod, Ordering::Relaxed);
        }
        old
    }

    pub fn lod(&self) -> u32 {
        self.lod.load(Ordering::Relaxed)
    }

    pub fn set_autogen_filter(&self, filter: u32) {
        self.autogen_filter.store(filter, Ordering::Relaxed);
    }

    pub fn autogen_filter(&self) -> u32 {
        self.autogen_filter.load(Ordering::Relaxed)
    }

    pub fn face_surface(&self, face: CubeFace, level: u32) -> D3dResult<Arc<Surface>> {
        if level >= self.levels {
            return Err(Error::InvalidCall);
        }
        Ok(self.surfaces[cube_surface_index(self.levels, face, level)].clone())
    }

    pub fn lock_face(&self, face: CubeFace, level: u32) -> D3dResult<SurfaceLock> {
        if level >= self.levels {
            return Err(Error::InvalidCall);
        }
        self.surfaces[cube_surface_index(self.levels, face, level)].lock()
    }

    pub fn add_dirty_rect(&self, _face: CubeFace, _rect: Option<Rect>) {
        self.mark_dirty();
    }
}

impl Resource for CubeTexture {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Texture
    }
    fn private_data(&self) -> &PrivateData {
        &self.private
    }
    fn device_id(&self) -> u32 {
        self.device_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use format::Format;

    fn plain_surface(width: u32, height: u32, format: Format) -> Surface {
        let desc = SurfaceDesc {
            width: width,
            height: height,
            format: format,
            pool: Pool::SystemMem,
            usage: Usage::empty(),
            multisample: 0,
            multisample_quality: 0,
        };
        Surface::new(1, desc, true, Container::None)
    }

    #[test]
    fn mip_chain_halves_down_to_one() {
        let texture = Texture2d::new(1, 8, 2, 0, Usage::empty(), Format::A8R8G8B8,
                                     Pool::Managed).unwrap();
        // levels == 0 normalizes to 1.
        assert_eq!(texture.level_count(), 1);

        let texture = Texture2d::new(1, 8, 2, 4, Usage::empty(), Format::A8R8G8B8,
                                     Pool::Managed).unwrap();
        let dims: Vec<(u32, u32)> = (0..4)
            .map(|level| {
                let desc = texture.level_desc(level).unwrap();
                (desc.width, desc.height)
            })
            .collect();
        assert_eq!(dims, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
    }

    #[test]
    fn unlock_bumps_the_container_generation() {
        let texture = Texture2d::new(1, 4, 4, 1, Usage::empty(), Format::A8R8G8B8,
                                     Pool::Managed).unwrap();
        let before = texture.generation();
        {
            let mut lock = texture.lock_level(0).unwrap();
            lock[0] = 0xAB;
        }
        assert!(texture.generation() != before);
    }

    #[test]
    fn render_targets_are_not_lockable() {
        let texture = Texture2d::new(1, 4, 4, 1, Usage::RENDER_TARGET, Format::X8R8G8B8,
                                     Pool::Default).unwrap();
        assert_eq!(texture.lock_level(0).err(), Some(Error::InvalidCall));
        // But internal fills still reach the backing.
        let surface = texture.surface_level(0).unwrap();
        assert!(fill_rect(&surface, None, 0xFF00FF00).is_ok());
    }

    #[test]
    fn lod_floor_clamps_to_level_count() {
        let texture = Texture2d::new(1, 16, 16, 3, Usage::empty(), Format::DXT1,
                                     Pool::Managed).unwrap();
        assert_eq!(texture.set_lod(2), 0);
        assert_eq!(texture.lod(), 2);
        assert_eq!(texture.set_lod(3), 2);
        assert_eq!(texture.lod(), 2);
    }

    #[test]
    fn cube_faces_index_into_one_surface_array() {
        let cube = CubeTexture::new(1, 8, 2, Usage::empty(), Format::A8R8G8B8,
                                    Pool::Managed).unwrap();
        let face = cube.face_surface(CubeFace::NegativeZ, 1).unwrap();
        assert_eq!(face.desc().width, 4);
        assert!(cube.face_surface(CubeFace::PositiveX, 2).is_err());

        let before = cube.generation();
        drop(cube.lock_face(CubeFace::PositiveY, 0).unwrap());
        assert!(cube.generation() != before);
    }

    #[test]
    fn linear_copy_rejects_mismatched_bpp_and_bad_rects() {
        let a = plain_surface(8, 8, Format::A8R8G8B8);
        let b = plain_surface(8, 8, Format::R5G6B5);
        assert!(copy_rect(&a, None, &b, None, false).is_err());

        let c = plain_surface(8, 8, Format::A8R8G8B8);
        let oob = Rect::new(0, 0, 9, 8);
        assert!(copy_rect(&a, Some(oob), &c, Some(oob), false).is_err());
        let empty = Rect::new(4, 4, 4, 8);
        assert!(copy_rect(&a, Some(empty), &c, Some(empty), false).is_err());
    }

    #[test]
    fn scaling_requires_permission() {
        let src = plain_surface(8, 8, Format::A8R8G8B8);
        let dst = plain_surface(8, 8, Format::A8R8G8B8);
        let small = Rect::new(0, 0, 4, 4);
        let large = Rect::new(0, 0, 8, 8);
        assert!(copy_rect(&dst, Some(large), &src, Some(small), false).is_err());
        assert!(copy_rect(&dst, Some(large), &src, Some(small), true).is_ok());
    }

    #[test]
    fn nearest_neighbor_scale_samples_expected_texels() {
        let src = plain_surface(2, 1, Format::A8);
        let dst = plain_surface(4, 1, Format::A8);
        src.with_backing_mut(|bytes| {
            bytes[0] = 10;
            bytes[1] = 20;
        });
        copy_rect(&dst, None, &src, None, true).unwrap();
        dst.with_backing(|bytes| {
            assert_eq!(bytes, &[10, 10, 20, 20]);
        })
        .unwrap();
    }

    #[test]
    fn aliased_identity_copy_is_idempotent() {
        let surface = plain_surface(4, 4, Format::A8R8G8B8);
        surface.with_backing_mut(|bytes| {
            for (index, byte) in bytes.iter_mut().enumerate() {
                *byte = index as u8;
            }
        });
        let before = surface.with_backing(|bytes| bytes.to_vec()).unwrap();
        copy_rect(&surface, None, &surface, None, false).unwrap();
        let after = surface.with_backing(|bytes| bytes.to_vec()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn fill_rejects_compressed_and_writes_format_width() {
        let dxt = plain_surface(8, 8, Format::DXT1);
        assert!(fill_rect(&dxt, None, 0).is_err());

        let rgb565 = plain_surface(4, 1, Format::R5G6B5);
        fill_rect(&rgb565, Some(Rect::new(1, 0, 3, 1)), 0xAABB_CCDD).unwrap();
        rgb565.with_backing(|bytes| {
            assert_eq!(&bytes[0..2], &[0, 0]);
            assert_eq!(&bytes[2..4], &0xCCDDu16.to_le_bytes());
            assert_eq!(&bytes[4..6], &0xCCDDu16.to_le_bytes());
            assert_eq!(&bytes[6..8], &[0, 0]);
        })
        .unwrap();
    }
}
