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

//! The device: state mirror and draw recorder.
//!
//! Holds the flat per-device snapshot of every settable state, plus the
//! current resource bindings. A draw call projects the snapshot into one
//! fixed-size draw packet: identity fields, per-stage sampler/texture
//! data, the variable-sized blobs (constants, bytecode, vertex/index
//! bytes, declaration) pushed through the upload arena, and the FNV
//! fingerprints the backend keys its pipeline cache on.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use arena::UploadRef;
use attrib::{fvf_to_vertex_elements, VertexDeclaration, VertexElement};
use buffer::{IndexBuffer, VertexBuffer};
use bridge::PresentTargetDesc;
use format::Format;
use handle::{ObjectId, ObjectKind, PrivateData, Resource};
use hash;
use logger::should_log_sample;
use packet::{as_byte_slice, slice_as_bytes, BeginFramePacket, ClearPacket, DrawIndexedPacket,
             PresentPacket};
use query::{Query, QueryType};
use runtime::{self, Runtime};
use shade::{PixelShader, VertexShader};
use state::{self, rs, samp, tss, GammaRamp, Matrix, Rect, Viewport};
use texture::{copy_rect, fill_rect, Container, CubeTexture, Pool, Surface, SurfaceDesc,
              Texture2d, Usage};
use {mutex_lock, D3dResult, Error};

bitflags! {
    /// Device behavior flags (D3DCREATE subset).
    pub struct BehaviorFlags: u32 {
        const FPU_PRESERVE = 0x0000_0002;
        const MULTITHREADED = 0x0000_0004;
        const PUREDEVICE = 0x0000_0010;
        const SOFTWARE_VERTEXPROCESSING = 0x0000_0020;
        const HARDWARE_VERTEXPROCESSING = 0x0000_0040;
        const MIXED_VERTEXPROCESSING = 0x0000_0080;
    }
}

bitflags! {
    /// Clear flags (D3DCLEAR).
    pub struct ClearFlags: u32 {
        const TARGET = 0x1;
        const ZBUFFER = 0x2;
        const STENCIL = 0x4;
    }
}

/// Primitive topologies (D3DPRIMITIVETYPE).
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrimitiveType {
    PointList = 1,
    LineList = 2,
    LineStrip = 3,
    TriangleList = 4,
    TriangleStrip = 5,
    TriangleFan = 6,
}

/// Discard swap effect, the normalization target for zeroed parameters.
pub const SWAP_EFFECT_DISCARD: u32 = 1;

/// Presentation parameters (D3DPRESENT_PARAMETERS shape).
#[derive(Clone, Debug)]
pub struct PresentParameters {
    pub backbuffer_width: u32,
    pub backbuffer_height: u32,
    pub backbuffer_format: Format,
    pub backbuffer_count: u32,
    pub multisample_type: u32,
    pub multisample_quality: u32,
    pub swap_effect: u32,
    pub device_window: u64,
    pub windowed: bool,
    pub enable_auto_depth_stencil: bool,
    pub auto_depth_stencil_format: Format,
    pub flags: u32,
    pub fullscreen_refresh_rate: u32,
    pub presentation_interval: u32,
}

impl Default for PresentParameters {
    fn default() -> PresentParameters {
        PresentParameters {
            backbuffer_width: 0,
            backbuffer_height: 0,
            backbuffer_format: Format::UNKNOWN,
            backbuffer_count: 0,
            multisample_type: 0,
            multisample_quality: 0,
            swap_effect: 0,
            device_window: 0,
            windowed: true,
            enable_auto_depth_stencil: false,
            auto_depth_stencil_format: Format::UNKNOWN,
            flags: 0,
            fullscreen_refresh_rate: 0,
            presentation_interval: 0,
        }
    }
}

fn resolve_backbuffer_width(params: &PresentParameters) -> u32 {
    if params.backbuffer_width != 0 {
        params.backbuffer_width
    } else {
        1280
    }
}

fn resolve_backbuffer_height(params: &PresentParameters) -> u32 {
    if params.backbuffer_height != 0 {
        params.backbuffer_height
    } else {
        720
    }
}

fn resolve_backbuffer_format(params: &PresentParameters) -> Format {
    if params.backbuffer_format == Format::UNKNOWN {
        Format::X8R8G8B8
    } else {
        params.backbuffer_format
    }
}

/// Display mode reported back to the program.
#[derive(Clone, Copy, Debug)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
    pub format: Format,
}

/// Parameters the device was created with, retained for query.
#[derive(Clone, Copy, Debug, Default)]
pub struct CreationParameters {
    pub adapter: u32,
    pub focus_window: u64,
    pub behavior_flags: u32,
}

/// A swapchain and its backbuffer.
pub struct SwapChain {
    object_id: ObjectId,
    device_id: u32,
    params: PresentParameters,
    backbuffer: Arc<Surface>,
    present_count: AtomicU32,
    private: PrivateData,
}

impl SwapChain {
    pub fn new(device_id: u32, params: &PresentParameters) -> Arc<SwapChain> {
        let width = resolve_backbuffer_width(params);
        let height = resolve_backbuffer_height(params);
        let format = resolve_backbuffer_format(params);

        Arc::new_cyclic(|weak: &Weak<SwapChain>| {
            let desc = SurfaceDesc {
                width: width,
                height: height,
                format: format,
                pool: Pool::Default,
                usage: Usage::RENDER_TARGET,
                multisample: 0,
                multisample_quality: 0,
            };
            let backbuffer = Arc::new(Surface::new(
                device_id, desc, false, Container::SwapChain(weak.clone())));
            SwapChain {
                object_id: ObjectId::alloc(ObjectKind::SwapChain),
                device_id: device_id,
                params: params.clone(),
                backbuffer: backbuffer,
                present_count: AtomicU32::new(0),
                private: PrivateData::new(),
            }
        })
    }

    pub fn backbuffer(&self) -> &Arc<Surface> {
        &self.backbuffer
    }

    pub fn present_parameters(&self) -> &PresentParameters {
        &self.params
    }

    pub fn present_count(&self) -> u32 {
        self.present_count.load(Ordering::Relaxed)
    }

    pub fn note_present(&self) {
        self.present_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn display_mode(&self) -> DisplayMode {
        DisplayMode {
            width: resolve_backbuffer_width(&self.params),
            height: resolve_backbuffer_height(&self.params),
            refresh_rate: if self.params.fullscreen_refresh_rate != 0 {
                self.params.fullscreen_refresh_rate
            } else {
                60
            },
            format: resolve_backbuffer_format(&self.params),
        }
    }

    /// Copy the backbuffer into a caller surface ("front buffer" data; the
    /// recorder has no real front buffer).
    pub fn front_buffer_data(&self, dst: &Surface) -> D3dResult<()> {
        copy_rect(dst, None, &self.backbuffer, None, false)
    }
}

impl Resource for SwapChain {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::SwapChain
    }
    fn private_data(&self) -> &PrivateData {
        &self.private
    }
    fn device_id(&self) -> u32 {
        self.device_id
    }
}

/// A texture binding slot: 2D or cube.
#[derive(Clone)]
pub enum BaseTexture {
    Tex2d(Arc<Texture2d>),
    Cube(Arc<CubeTexture>),
}

impl BaseTexture {
    pub fn object_id(&self) -> ObjectId {
        match *self {
            BaseTexture::Tex2d(ref texture) => texture.object_id(),
            BaseTexture::Cube(ref cube) => cube.object_id(),
        }
    }
}

/// Seam for the window-system half of soft-present: the host glue installs
/// an implementation that blits the backbuffer image into its window.
pub trait PresentBlit {
    fn blit(&mut self, desc: &SurfaceDesc, pitch: u32, bytes: &[u8]);
}

static DEVICE_SERIALS: AtomicU32 = AtomicU32::new(0);
static VOLUME_TEXTURE_LOG_COUNTER: AtomicU32 = AtomicU32::new(0);
static DRAW_PRIMITIVE_LOG_COUNTER: AtomicU32 = AtomicU32::new(0);
static SOFT_PRESENT_LOG_COUNTER: AtomicU32 = AtomicU32::new(0);
static DRAW_REJECT_LOG_COUNTER: AtomicU32 = AtomicU32::new(0);

fn id_of<T: Resource>(binding: &Option<Arc<T>>) -> u32 {
    binding.as_ref().map(|resource| resource.object_id().raw()).unwrap_or(0)
}

/// Create a device against the process-global runtime.
pub fn create_device(adapter: u32, behavior_flags: BehaviorFlags,
                     params: &PresentParameters) -> D3dResult<Device> {
    Device::with_runtime(runtime::global(), adapter, behavior_flags, params)
}

/// The Direct3D 9 device stand-in.
pub struct Device {
    device_serial: u32,
    runtime: Arc<Runtime>,

    adapter: u32,
    behavior_flags: BehaviorFlags,
    params: PresentParameters,
    creation: CreationParameters,
    gamma_ramp: GammaRamp,

    viewport: Viewport,
    scissor_rect: Rect,

    in_scene: bool,
    software_vp: bool,
    n_patch_mode: f32,
    fvf: u32,
    frame_id: u32,
    present_target_id: u64,

    render_states: [u32; state::MAX_RENDER_STATES],
    sampler_states: [[u32; state::MAX_SAMPLER_STATES]; state::MAX_SAMPLERS],
    tex_stage_states: [[u32; state::MAX_TEXTURE_STAGE_STATES]; state::MAX_TEXTURE_STAGES],

    render_targets: [Option<Arc<Surface>>; state::MAX_RENDER_TARGETS],
    depth_stencil: Option<Arc<Surface>>,

    textures: [Option<BaseTexture>; state::MAX_TEXTURE_STAGES],

    streams: [Option<Arc<VertexBuffer>>; state::MAX_STREAMS],
    stream_offsets: [u32; state::MAX_STREAMS],
    stream_strides: [u32; state::MAX_STREAMS],
    stream_freq: [u32; state::MAX_STREAMS],
    indices: Option<Arc<IndexBuffer>>,

    vertex_decl: Option<Arc<VertexDeclaration>>,
    vertex_shader: Option<Arc<VertexShader>>,
    pixel_shader: Option<Arc<PixelShader>>,

    transforms: Box<[Matrix; state::MAX_TRANSFORMS]>,
    transform_set: Box<[bool; state::MAX_TRANSFORMS]>,
    clip_planes: [[f32; 4]; state::MAX_CLIP_PLANES],

    vs_const_f: Box<[[f32; 4]; state::MAX_SHADER_FLOAT_CONSTANTS]>,
    ps_const_f: Box<[[f32; 4]; state::MAX_SHADER_FLOAT_CONSTANTS]>,
    vs_const_i: [[i32; 4]; state::MAX_SHADER_INT_CONSTANTS],
    ps_const_i: [[i32; 4]; state::MAX_SHADER_INT_CONSTANTS],
    vs_const_b: [u32; state::MAX_SHADER_BOOL_CONSTANTS],
    ps_const_b: [u32; state::MAX_SHADER_BOOL_CONSTANTS],

    // Constant uploads are reused across draws until a set_*_constant_f
    // lands or the arena slot rotates under the ref.
    vs_const_dirty: bool,
    ps_const_dirty: bool,
    vs_const_last_ref: UploadRef,
    ps_const_last_ref: UploadRef,

    swapchain: Option<Arc<SwapChain>>,
    soft_present_target: Option<Box<dyn PresentBlit>>,
}

impl Device {
    /// Create a device bound to a specific runtime (tests use private
    /// runtimes; the public constructor passes the global one).
    pub fn with_runtime(runtime: Arc<Runtime>, adapter: u32, behavior_flags: BehaviorFlags,
                        params: &PresentParameters) -> D3dResult<Device> {
        let device_serial = DEVICE_SERIALS.fetch_add(1, Ordering::Relaxed) + 1;

        let mut normalized = params.clone();
        if normalized.backbuffer_count == 0 {
            normalized.backbuffer_count = 1;
        }
        if normalized.swap_effect == 0 {
            normalized.swap_effect = SWAP_EFFECT_DISCARD;
        }

        let mut device = Device {
            device_serial: device_serial,
            runtime: runtime,
            adapter: adapter,
            behavior_flags: behavior_flags,
            params: normalized.clone(),
            creation: CreationParameters {
                adapter: adapter,
                focus_window: normalized.device_window,
                behavior_flags: behavior_flags.bits(),
            },
            gamma_ramp: GammaRamp::default(),
            viewport: Viewport::default(),
            scissor_rect: Rect::default(),
            in_scene: false,
            software_vp: behavior_flags.contains(BehaviorFlags::SOFTWARE_VERTEXPROCESSING),
            n_patch_mode: 0.0,
            fvf: 0,
            frame_id: 1,
            present_target_id: 0,
            render_states: [0; state::MAX_RENDER_STATES],
            sampler_states: [[0; state::MAX_SAMPLER_STATES]; state::MAX_SAMPLERS],
            tex_stage_states: [[0; state::MAX_TEXTURE_STAGE_STATES]; state::MAX_TEXTURE_STAGES],
            render_targets: [None, None, None, None],
            depth_stencil: None,
            textures: std::array::from_fn(|_| None),
            streams: std::array::from_fn(|_| None),
            stream_offsets: [0; state::MAX_STREAMS],
            stream_strides: [0; state::MAX_STREAMS],
            stream_freq: [0; state::MAX_STREAMS],
            indices: None,
            vertex_decl: None,
            vertex_shader: None,
            pixel_shader: None,
            transforms: Box::new([[0.0; 16]; state::MAX_TRANSFORMS]),
            transform_set: Box::new([false; state::MAX_TRANSFORMS]),
            clip_planes: [[0.0; 4]; state::MAX_CLIP_PLANES],
            vs_const_f: Box::new([[0.0; 4]; state::MAX_SHADER_FLOAT_CONSTANTS]),
            ps_const_f: Box::new([[0.0; 4]; state::MAX_SHADER_FLOAT_CONSTANTS]),
            vs_const_i: [[0; 4]; state::MAX_SHADER_INT_CONSTANTS],
            ps_const_i: [[0; 4]; state::MAX_SHADER_INT_CONSTANTS],
            vs_const_b: [0; state::MAX_SHADER_BOOL_CONSTANTS],
            ps_const_b: [0; state::MAX_SHADER_BOOL_CONSTANTS],
            vs_const_dirty: true,
            ps_const_dirty: true,
            vs_const_last_ref: UploadRef::default(),
            ps_const_last_ref: UploadRef::default(),
            swapchain: None,
            soft_present_target: None,
        };

        device.reset_internal(&normalized)?;

        info!(
            "device created adapter={} behavior={:#010x} backbuffer={}x{}",
            adapter,
            behavior_flags.bits(),
            device.viewport.width,
            device.viewport.height
        );
        Ok(device)
    }

    pub fn device_id(&self) -> u32 {
        self.device_serial
    }

    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    pub fn adapter(&self) -> u32 {
        self.adapter
    }

    pub fn creation_parameters(&self) -> CreationParameters {
        self.creation
    }

    pub fn test_cooperative_level(&self) -> D3dResult<()> {
        Ok(())
    }

    pub fn available_texture_mem(&self) -> u32 {
        512 * 1024 * 1024
    }

    pub fn swapchain(&self) -> Option<&Arc<SwapChain>> {
        self.swapchain.as_ref()
    }

    pub fn display_mode(&self) -> D3dResult<DisplayMode> {
        self.swapchain
            .as_ref()
            .map(|swapchain| swapchain.display_mode())
            .ok_or(Error::InvalidCall)
    }

    pub fn back_buffer(&self) -> D3dResult<Arc<Surface>> {
        self.swapchain
            .as_ref()
            .map(|swapchain| swapchain.backbuffer().clone())
            .ok_or(Error::InvalidCall)
    }

    /// Install the window-system blit half of soft-present.
    pub fn set_soft_present_target(&mut self, target: Box<dyn PresentBlit>) {
        self.soft_present_target = Some(target);
    }

    // ---------------------------------------------------------------
    // Resource creation
    // ---------------------------------------------------------------

    pub fn create_texture(&self, width: u32, height: u32, levels: u32, usage: Usage,
                          format: Format, pool: Pool) -> D3dResult<Arc<Texture2d>> {
        let result = Texture2d::new(self.device_serial, width, height, levels, usage,
                                    format, pool);
        debug!(
            "create_texture {}x{} levels={} usage={:#010x} fmt={} pool={:?} -> {:?}",
            width, height, levels, usage.bits(), format, pool,
            result.as_ref().map(|t| t.object_id()).map_err(|e| *e)
        );
        result
    }

    pub fn create_cube_texture(&self, edge_length: u32, levels: u32, usage: Usage,
                               format: Format, pool: Pool) -> D3dResult<Arc<CubeTexture>> {
        let result = CubeTexture::new(self.device_serial, edge_length, levels, usage,
                                      format, pool);
        debug!(
            "create_cube_texture edge={} levels={} usage={:#010x} fmt={} pool={:?} -> {:?}",
            edge_length, levels, usage.bits(), format, pool,
            result.as_ref().map(|t| t.object_id()).map_err(|e| *e)
        );
        result
    }

    /// Volume textures are not recorded; the target program tolerates the
    /// refusal.
    pub fn create_volume_texture(&self, width: u32, height: u32, depth: u32, levels: u32,
                                 usage: Usage, format: Format, pool: Pool)
                                 -> D3dResult<()> {
        if should_log_sample(&VOLUME_TEXTURE_LOG_COUNTER, 4, 128) {
            debug!(
                "create_volume_texture unsupported {}x{}x{} levels={} usage={:#010x} \
                 fmt={} pool={:?} -> not available",
                width, height, depth, levels, usage.bits(), format, pool
            );
        }
        Err(Error::NotAvailable)
    }

    pub fn create_vertex_buffer(&self, length: u32, usage: u32, fvf: u32, pool: Pool)
                                -> D3dResult<Arc<VertexBuffer>> {
        let result = VertexBuffer::new(self.device_serial, length, usage, fvf, pool)
            .map(Arc::new);
        debug!(
            "create_vertex_buffer len={} usage={:#010x} fvf={:#010x} pool={:?} -> {:?}",
            length, usage, fvf, pool,
            result.as_ref().map(|b| b.object_id()).map_err(|e| *e)
        );
        result
    }

    pub fn create_index_buffer(&self, length: u32, usage: u32, format: Format, pool: Pool)
                               -> D3dResult<Arc<IndexBuffer>> {
        let result = IndexBuffer::new(self.device_serial, length, usage, format, pool)
            .map(Arc::new);
        debug!(
            "create_index_buffer len={} usage={:#010x} fmt={} pool={:?} -> {:?}",
            length, usage, format, pool,
            result.as_ref().map(|b| b.object_id()).map_err(|e| *e)
        );
        result
    }

    pub fn create_render_target(&self, width: u32, height: u32, format: Format,
                                multisample: u32, quality: u32, lockable: bool)
                                -> D3dResult<Arc<Surface>> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidCall);
        }
        let desc = SurfaceDesc {
            width: width,
            height: height,
            format: format,
            pool: Pool::Default,
            usage: Usage::RENDER_TARGET,
            multisample: multisample,
            multisample_quality: quality,
        };
        Ok(Arc::new(Surface::new(self.device_serial, desc, lockable, Container::None)))
    }

    pub fn create_depth_stencil_surface(&self, width: u32, height: u32, format: Format,
                                        multisample: u32, quality: u32)
                                        -> D3dResult<Arc<Surface>> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidCall);
        }
        let desc = SurfaceDesc {
            width: width,
            height: height,
            format: format,
            pool: Pool::Default,
            usage: Usage::DEPTH_STENCIL,
            multisample: multisample,
            multisample_quality: quality,
        };
        Ok(Arc::new(Surface::new(self.device_serial, desc, false, Container::None)))
    }

    pub fn create_offscreen_plain_surface(&self, width: u32, height: u32, format: Format,
                                          pool: Pool) -> D3dResult<Arc<Surface>> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidCall);
        }
        let desc = SurfaceDesc {
            width: width,
            height: height,
            format: format,
            pool: pool,
            usage: Usage::empty(),
            multisample: 0,
            multisample_quality: 0,
        };
        Ok(Arc::new(Surface::new(self.device_serial, desc, true, Container::None)))
    }

    pub fn create_vertex_declaration(&self, elements: &[VertexElement])
                                     -> D3dResult<Arc<VertexDeclaration>> {
        VertexDeclaration::new(self.device_serial, elements).map(Arc::new)
    }

    pub fn create_vertex_shader(&self, bytecode: &[u32]) -> D3dResult<Arc<VertexShader>> {
        let result = VertexShader::new(self.device_serial, bytecode).map(Arc::new);
        debug!(
            "create_vertex_shader dwords={} -> {:?}",
            bytecode.len(),
            result.as_ref().map(|s| s.object_id()).map_err(|e| *e)
        );
        result
    }

    pub fn create_pixel_shader(&self, bytecode: &[u32]) -> D3dResult<Arc<PixelShader>> {
        let result = PixelShader::new(self.device_serial, bytecode).map(Arc::new);
        debug!(
            "create_pixel_shader dwords={} -> {:?}",
            bytecode.len(),
            result.as_ref().map(|s| s.object_id()).map_err(|e| *e)
        );
        result
    }

    pub fn create_query(&self, query_type: QueryType) -> D3dResult<Arc<Query>> {
        debug!("create_query type={}", query_type.0);
        Ok(Arc::new(Query::new(self.device_serial, query_type)))
    }

    // ---------------------------------------------------------------
    // Surface transfer operations
    // ---------------------------------------------------------------

    /// Copy a source rect to a destination point, sizes matching.
    pub fn update_surface(&self, src: &Surface, src_rect: Option<Rect>, dst: &Surface,
                          dst_point: Option<(i32, i32)>) -> D3dResult<()> {
        let src_full = Rect::new(0, 0, src.desc().width as i32, src.desc().height as i32);
        let src_r = src_rect.unwrap_or(src_full);
        let (dst_left, dst_top) = dst_point.unwrap_or((0, 0));
        let dst_r = Rect::new(
            dst_left,
            dst_top,
            dst_left + src_r.width(),
            dst_top + src_r.height(),
        );
        copy_rect(dst, Some(dst_r), src, Some(src_r), false)
    }

    /// Copy with scaling allowed (filter selection is backend business).
    pub fn stretch_rect(&self, src: &Surface, src_rect: Option<Rect>, dst: &Surface,
                        dst_rect: Option<Rect>) -> D3dResult<()> {
        copy_rect(dst, dst_rect, src, src_rect, true)
    }

    pub fn color_fill(&self, surface: &Surface, rect: Option<Rect>, color: u32)
                      -> D3dResult<()> {
        fill_rect(surface, rect, color)
    }

    /// Per-level full-surface copies across the levels both textures have.
    pub fn update_texture(&self, src: &BaseTexture, dst: &BaseTexture) -> D3dResult<()> {
        let (src, dst) = match (src, dst) {
            (&BaseTexture::Tex2d(ref src), &BaseTexture::Tex2d(ref dst)) => (src, dst),
            _ => return Err(Error::InvalidCall),
        };
        let levels = src.level_count().min(dst.level_count());
        for level in 0..levels {
            let src_level = src.surface_level(level)?;
            let dst_level = dst.surface_level(level)?;
            copy_rect(&dst_level, None, &src_level, None, false)?;
        }
        Ok(())
    }

    pub fn get_render_target_data(&self, render_target: &Surface, dst: &Surface)
                                  -> D3dResult<()> {
        copy_rect(dst, None, render_target, None, false)
    }

    pub fn get_front_buffer_data(&self, dst: &Surface) -> D3dResult<()> {
        match self.swapchain {
            Some(ref swapchain) => swapchain.front_buffer_data(dst),
            None => Err(Error::InvalidCall),
        }
    }

    // ---------------------------------------------------------------
    // State mirror setters/getters
    // ---------------------------------------------------------------

    pub fn set_render_state(&mut self, state_index: u32, value: u32) -> D3dResult<()> {
        let index = state_index as usize;
        if index >= state::MAX_RENDER_STATES {
            return Err(Error::InvalidCall);
        }
        self.render_states[index] = value;
        Ok(())
    }

    pub fn render_state(&self, state_index: u32) -> D3dResult<u32> {
        let index = state_index as usize;
        if index >= state::MAX_RENDER_STATES {
            return Err(Error::InvalidCall);
        }
        Ok(self.render_states[index])
    }

    pub fn set_sampler_state(&mut self, sampler: u32, state_index: u32, value: u32)
                             -> D3dResult<()> {
        if sampler as usize >= state::MAX_SAMPLERS
            || state_index as usize >= state::MAX_SAMPLER_STATES
        {
            return Err(Error::InvalidCall);
        }
        self.sampler_states[sampler as usize][state_index as usize] = value;
        Ok(())
    }

    pub fn sampler_state(&self, sampler: u32, state_index: u32) -> D3dResult<u32> {
        if sampler as usize >= state::MAX_SAMPLERS
            || state_index as usize >= state::MAX_SAMPLER_STATES
        {
            return Err(Error::InvalidCall);
        }
        Ok(self.sampler_states[sampler as usize][state_index as usize])
    }

    pub fn set_texture_stage_state(&mut self, stage: u32, state_index: u32, value: u32)
                                   -> D3dResult<()> {
        if stage as usize >= state::MAX_TEXTURE_STAGES
            || state_index as usize >= state::MAX_TEXTURE_STAGE_STATES
        {
            return Err(Error::InvalidCall);
        }
        self.tex_stage_states[stage as usize][state_index as usize] = value;
        Ok(())
    }

    pub fn texture_stage_state(&self, stage: u32, state_index: u32) -> D3dResult<u32> {
        if stage as usize >= state::MAX_TEXTURE_STAGES
            || state_index as usize >= state::MAX_TEXTURE_STAGE_STATES
        {
            return Err(Error::InvalidCall);
        }
        Ok(self.tex_stage_states[stage as usize][state_index as usize])
    }

    pub fn set_transform(&mut self, transform_index: u32, matrix: &Matrix) -> D3dResult<()> {
        let index = transform_index as usize;
        if index >= state::MAX_TRANSFORMS {
            return Err(Error::InvalidCall);
        }
        self.transforms[index] = *matrix;
        self.transform_set[index] = true;
        Ok(())
    }

    pub fn transform(&self, transform_index: u32) -> D3dResult<Matrix> {
        let index = transform_index as usize;
        if index >= state::MAX_TRANSFORMS || !self.transform_set[index] {
            return Err(Error::InvalidCall);
        }
        Ok(self.transforms[index])
    }

    pub fn set_viewport(&mut self, viewport: &Viewport) {
        self.viewport = *viewport;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_scissor_rect(&mut self, rect: &Rect) {
        self.scissor_rect = *rect;
    }

    pub fn scissor_rect(&self) -> Rect {
        self.scissor_rect
    }

    pub fn set_clip_plane(&mut self, index: u32, plane: &[f32; 4]) -> D3dResult<()> {
        if index as usize >= state::MAX_CLIP_PLANES {
            return Err(Error::InvalidCall);
        }
        self.clip_planes[index as usize] = *plane;
        Ok(())
    }

    pub fn clip_plane(&self, index: u32) -> D3dResult<[f32; 4]> {
        if index as usize >= state::MAX_CLIP_PLANES {
            return Err(Error::InvalidCall);
        }
        Ok(self.clip_planes[index as usize])
    }

    pub fn set_software_vertex_processing(&mut self, software: bool) {
        self.software_vp = software;
    }

    pub fn software_vertex_processing(&self) -> bool {
        self.software_vp
    }

    pub fn set_n_patch_mode(&mut self, segments: f32) {
        self.n_patch_mode = segments;
    }

    pub fn n_patch_mode(&self) -> f32 {
        self.n_patch_mode
    }

    pub fn set_gamma_ramp(&mut self, ramp: &GammaRamp) {
        self.gamma_ramp = *ramp;
    }

    pub fn gamma_ramp(&self) -> GammaRamp {
        self.gamma_ramp
    }

    // ---------------------------------------------------------------
    // Binding setters/getters
    // ---------------------------------------------------------------

    pub fn set_render_target(&mut self, index: u32, surface: Option<Arc<Surface>>)
                             -> D3dResult<()> {
        if index as usize >= state::MAX_RENDER_TARGETS {
            return Err(Error::InvalidCall);
        }
        self.render_targets[index as usize] = surface;
        Ok(())
    }

    pub fn render_target(&self, index: u32) -> D3dResult<Option<Arc<Surface>>> {
        if index as usize >= state::MAX_RENDER_TARGETS {
            return Err(Error::InvalidCall);
        }
        Ok(self.render_targets[index as usize].clone())
    }

    pub fn set_depth_stencil_surface(&mut self, surface: Option<Arc<Surface>>) {
        self.depth_stencil = surface;
    }

    pub fn depth_stencil_surface(&self) -> Option<Arc<Surface>> {
        self.depth_stencil.clone()
    }

    pub fn set_texture(&mut self, stage: u32, texture: Option<BaseTexture>) -> D3dResult<()> {
        if stage as usize >= state::MAX_TEXTURE_STAGES {
            return Err(Error::InvalidCall);
        }
        self.textures[stage as usize] = texture;
        Ok(())
    }

    pub fn texture(&self, stage: u32) -> D3dResult<Option<BaseTexture>> {
        if stage as usize >= state::MAX_TEXTURE_STAGES {
            return Err(Error::InvalidCall);
        }
        Ok(self.textures[stage as usize].clone())
    }

    pub fn set_stream_source(&mut self, stream: u32, buffer: Option<Arc<VertexBuffer>>,
                             offset: u32, stride: u32) -> D3dResult<()> {
        if stream as usize >= state::MAX_STREAMS {
            return Err(Error::InvalidCall);
        }
        self.streams[stream as usize] = buffer;
        self.stream_offsets[stream as usize] = offset;
        self.stream_strides[stream as usize] = stride;
        Ok(())
    }

    pub fn stream_source(&self, stream: u32)
                         -> D3dResult<(Option<Arc<VertexBuffer>>, u32, u32)> {
        if stream as usize >= state::MAX_STREAMS {
            return Err(Error::InvalidCall);
        }
        Ok((
            self.streams[stream as usize].clone(),
            self.stream_offsets[stream as usize],
            self.stream_strides[stream as usize],
        ))
    }

    pub fn set_stream_source_freq(&mut self, stream: u32, divider: u32) -> D3dResult<()> {
        if stream as usize >= state::MAX_STREAMS {
            return Err(Error::InvalidCall);
        }
        self.stream_freq[stream as usize] = divider;
        Ok(())
    }

    pub fn stream_source_freq(&self, stream: u32) -> D3dResult<u32> {
        if stream as usize >= state::MAX_STREAMS {
            return Err(Error::InvalidCall);
        }
        Ok(self.stream_freq[stream as usize])
    }

    pub fn set_indices(&mut self, buffer: Option<Arc<IndexBuffer>>) {
        self.indices = buffer;
    }

    pub fn indices(&self) -> Option<Arc<IndexBuffer>> {
        self.indices.clone()
    }

    /// A declaration and an FVF code are mutually exclusive projections of
    /// the vertex layout: setting one clears the other.
    pub fn set_vertex_declaration(&mut self, decl: Option<Arc<VertexDeclaration>>) {
        self.vertex_decl = decl;
        self.fvf = 0;
    }

    pub fn vertex_declaration(&self) -> Option<Arc<VertexDeclaration>> {
        self.vertex_decl.clone()
    }

    pub fn set_fvf(&mut self, fvf: u32) {
        self.fvf = fvf;
        self.vertex_decl = None;
    }

    pub fn fvf(&self) -> u32 {
        self.fvf
    }

    pub fn set_vertex_shader(&mut self, shader: Option<Arc<VertexShader>>) {
        self.vertex_shader = shader;
    }

    pub fn vertex_shader(&self) -> Option<Arc<VertexShader>> {
        self.vertex_shader.clone()
    }

    pub fn set_pixel_shader(&mut self, shader: Option<Arc<PixelShader>>) {
        self.pixel_shader = shader;
    }

    pub fn pixel_shader(&self) -> Option<Arc<PixelShader>> {
        self.pixel_shader.clone()
    }

    // ---------------------------------------------------------------
    // Shader constants
    // ---------------------------------------------------------------

    pub fn set_vertex_shader_constant_f(&mut self, start: u32, data: &[[f32; 4]])
                                        -> D3dResult<()> {
        let end = start as usize + data.len();
        if end > state::MAX_SHADER_FLOAT_CONSTANTS {
            return Err(Error::InvalidCall);
        }
        self.vs_const_f[start as usize..end].copy_from_slice(data);
        self.vs_const_dirty = true;
        Ok(())
    }

    pub fn vertex_shader_constant_f(&self, start: u32, out: &mut [[f32; 4]])
                                    -> D3dResult<()> {
        let end = start as usize + out.len();
        if end > state::MAX_SHADER_FLOAT_CONSTANTS {
            return Err(Error::InvalidCall);
        }
        out.copy_from_slice(&self.vs_const_f[start as usize..end]);
        Ok(())
    }

    pub fn set_pixel_shader_constant_f(&mut self, start: u32, data: &[[f32; 4]])
                                       -> D3dResult<()> {
        let end = start as usize + data.len();
        if end > state::MAX_SHADER_FLOAT_CONSTANTS {
            return Err(Error::InvalidCall);
        }
        self.ps_const_f[start as usize..end].copy_from_slice(data);
        self.ps_const_dirty = true;
        Ok(())
    }

    pub fn pixel_shader_constant_f(&self, start: u32, out: &mut [[f32; 4]])
                                   -> D3dResult<()> {
        let end = start as usize + out.len();
        if end > state::MAX_SHADER_FLOAT_CONSTANTS {
            return Err(Error::InvalidCall);
        }
        out.copy_from_slice(&self.ps_const_f[start as usize..end]);
        Ok(())
    }

    pub fn set_vertex_shader_constant_i(&mut self, start: u32, data: &[[i32; 4]])
                                        -> D3dResult<()> {
        let end = start as usize + data.len();
        if end > state::MAX_SHADER_INT_CONSTANTS {
            return Err(Error::InvalidCall);
        }
        self.vs_const_i[start as usize..end].copy_from_slice(data);
        Ok(())
    }

    pub fn vertex_shader_constant_i(&self, start: u32, out: &mut [[i32; 4]])
                                    -> D3dResult<()> {
        let end = start as usize + out.len();
        if end > state::MAX_SHADER_INT_CONSTANTS {
            return Err(Error::InvalidCall);
        }
        out.copy_from_slice(&self.vs_const_i[start as usize..end]);
        Ok(())
    }

    pub fn set_pixel_shader_constant_i(&mut self, start: u32, data: &[[i32; 4]])
                                       -> D3dResult<()> {
        let end = start as usize + data.len();
        if end > state::MAX_SHADER_INT_CONSTANTS {
            return Err(Error::InvalidCall);
        }
        self.ps_const_i[start as usize..end].copy_from_slice(data);
        Ok(())
    }

    pub fn pixel_shader_constant_i(&self, start: u32, out: &mut [[i32; 4]])
                                   -> D3dResult<()> {
        let end = start as usize + out.len();
        if end > state::MAX_SHADER_INT_CONSTANTS {
            return Err(Error::InvalidCall);
        }
        out.copy_from_slice(&self.ps_const_i[start as usize..end]);
        Ok(())
    }

    pub fn set_vertex_shader_constant_b(&mut self, start: u32, data: &[u32])
                                        -> D3dResult<()> {
        let end = start as usize + data.len();
        if end > state::MAX_SHADER_BOOL_CONSTANTS {
            return Err(Error::InvalidCall);
        }
        self.vs_const_b[start as usize..end].copy_from_slice(data);
        Ok(())
    }

    pub fn vertex_shader_constant_b(&self, start: u32, out: &mut [u32]) -> D3dResult<()> {
        let end = start as usize + out.len();
        if end > state::MAX_SHADER_BOOL_CONSTANTS {
            return Err(Error::InvalidCall);
        }
        out.copy_from_slice(&self.vs_const_b[start as usize..end]);
        Ok(())
    }

    pub fn set_pixel_shader_constant_b(&mut self, start: u32, data: &[u32])
                                       -> D3dResult<()> {
        let end = start as usize + data.len();
        if end > state::MAX_SHADER_BOOL_CONSTANTS {
            return Err(Error::InvalidCall);
        }
        self.ps_const_b[start as usize..end].copy_from_slice(data);
        Ok(())
    }

    pub fn pixel_shader_constant_b(&self, start: u32, out: &mut [u32]) -> D3dResult<()> {
        let end = start as usize + out.len();
        if end > state::MAX_SHADER_BOOL_CONSTANTS {
            return Err(Error::InvalidCall);
        }
        out.copy_from_slice(&self.ps_const_b[start as usize..end]);
        Ok(())
    }

    // ---------------------------------------------------------------
    // Frame lifecycle
    // ---------------------------------------------------------------

    /// Open the scene and emit the frame boundary in-band. The packet
    /// stream stays self-describing: every frame boundary is visible in
    /// the serialized stream without a side channel.
    pub fn begin_scene(&mut self) -> D3dResult<()> {
        if self.in_scene {
            return Err(Error::InvalidCall);
        }
        self.in_scene = true;

        let packet = BeginFramePacket::new(self.runtime.next_packet_sequence(), self.frame_id);
        if self.runtime.submit(as_byte_slice(&packet)).is_err() {
            if should_log_sample(&DRAW_REJECT_LOG_COUNTER, 4, 256) {
                warn!("begin_frame packet rejected frame={}", self.frame_id);
            }
        }
        Ok(())
    }

    pub fn end_scene(&mut self) -> D3dResult<()> {
        if !self.in_scene {
            return Err(Error::InvalidCall);
        }
        self.in_scene = false;
        Ok(())
    }

    pub fn in_scene(&self) -> bool {
        self.in_scene
    }

    /// Fill the primary target per the TARGET flag and emit the raw clear
    /// parameters for the backend to re-apply.
    pub fn clear(&mut self, rects: &[Rect], flags: ClearFlags, color: u32, z: f32,
                 stencil: u32) -> D3dResult<()> {
        if flags.contains(ClearFlags::TARGET) {
            if let Some(rt0) = self.render_targets[0].clone() {
                if rects.is_empty() {
                    fill_rect(&rt0, None, color)?;
                } else {
                    for rect in rects {
                        fill_rect(&rt0, Some(*rect), color)?;
                    }
                }
            }
        }

        let mut packet = ClearPacket::new(self.runtime.next_packet_sequence(), self.frame_id);
        packet.rect_count = rects.len() as u32;
        packet.flags = flags.bits();
        packet.color = color;
        packet.z = z;
        packet.stencil = stencil;
        let _ = self.runtime.submit(as_byte_slice(&packet));
        Ok(())
    }

    /// Non-indexed draws are accepted and discarded; the target program
    /// only issues indexed geometry.
    pub fn draw_primitive(&mut self, primitive_type: PrimitiveType, start_vertex: u32,
                          primitive_count: u32) -> D3dResult<()> {
        if should_log_sample(&DRAW_PRIMITIVE_LOG_COUNTER, 4, 256) {
            debug!(
                "draw_primitive discarded type={:?} start_vertex={} primitive_count={}",
                primitive_type, start_vertex, primitive_count
            );
        }
        Ok(())
    }

    /// Record one indexed draw.
    pub fn draw_indexed(&mut self, primitive_type: PrimitiveType, base_vertex: i32,
                        min_vertex_index: u32, num_vertices: u32, start_index: u32,
                        primitive_count: u32) -> D3dResult<()> {
        let mut packet = DrawIndexedPacket::new(self.runtime.next_packet_sequence());

        packet.primitive_type = primitive_type as u32;
        packet.base_vertex = base_vertex;
        packet.min_vertex_index = min_vertex_index;
        packet.num_vertices = num_vertices;
        packet.start_index = start_index;
        packet.primitive_count = primitive_count;

        packet.render_target_id = id_of(&self.render_targets[0]);
        packet.depth_stencil_id = id_of(&self.depth_stencil);
        if let Some(ref rt0) = self.render_targets[0] {
            packet.render_target_texture_id = rt0.container_texture_id().raw();
            packet.render_target_width = rt0.desc().width;
            packet.render_target_height = rt0.desc().height;
            packet.render_target_format = rt0.desc().format.0;
        }
        packet.vertex_buffer_id = id_of(&self.streams[0]);
        packet.index_buffer_id = id_of(&self.indices);
        packet.vertex_decl_id = id_of(&self.vertex_decl);
        packet.vertex_shader_id = id_of(&self.vertex_shader);
        packet.pixel_shader_id = id_of(&self.pixel_shader);
        packet.fvf = self.fvf;
        packet.stream0_offset = self.stream_offsets[0];
        packet.stream0_stride = self.stream_strides[0];

        packet.viewport_x = self.viewport.x;
        packet.viewport_y = self.viewport.y;
        packet.viewport_width = self.viewport.width;
        packet.viewport_height = self.viewport.height;
        packet.viewport_min_z = self.viewport.min_z;
        packet.viewport_max_z = self.viewport.max_z;
        packet.scissor_left = self.scissor_rect.left;
        packet.scissor_top = self.scissor_rect.top;
        packet.scissor_right = self.scissor_rect.right;
        packet.scissor_bottom = self.scissor_rect.bottom;

        packet.viewport_hash = self.hash_viewport();
        packet.scissor_hash = self.hash_scissor();
        packet.texture_stage_hash = self.hash_texture_stage_state();
        packet.sampler_state_hash = self.hash_sampler_state();
        packet.stream_binding_hash = self.hash_stream_bindings();

        {
            let mut uploads = mutex_lock(&self.runtime.uploads);

            if self.vs_const_dirty || self.vs_const_last_ref.is_empty() {
                self.vs_const_last_ref =
                    uploads.copy(self.frame_id, slice_as_bytes(&self.vs_const_f[..]));
                self.vs_const_dirty = false;
            }
            packet.constants_vs = self.vs_const_last_ref;

            if self.ps_const_dirty || self.ps_const_last_ref.is_empty() {
                self.ps_const_last_ref =
                    uploads.copy(self.frame_id, slice_as_bytes(&self.ps_const_f[..]));
                self.ps_const_dirty = false;
            }
            packet.constants_ps = self.ps_const_last_ref;

            if let Some(ref shader) = self.vertex_shader {
                packet.vs_bytecode =
                    uploads.copy(self.frame_id, slice_as_bytes(shader.bytecode()));
                packet.vs_bytecode_dwords = shader.bytecode().len() as u32;
            }
            if let Some(ref shader) = self.pixel_shader {
                packet.ps_bytecode =
                    uploads.copy(self.frame_id, slice_as_bytes(shader.bytecode()));
                packet.ps_bytecode_dwords = shader.bytecode().len() as u32;
            }

            if let Some(ref vb) = self.streams[0] {
                packet.vertex_data =
                    vb.with_data(|bytes| uploads.copy(self.frame_id, bytes));
                packet.vertex_data_size = vb.desc().size;
            }
            if let Some(ref ib) = self.indices {
                packet.index_data =
                    ib.with_data(|bytes| uploads.copy(self.frame_id, bytes));
                packet.index_data_size = ib.desc().size;
                packet.index_format = ib.desc().format.0;
            }

            if let Some(ref decl) = self.vertex_decl {
                packet.vertex_decl_data =
                    uploads.copy(self.frame_id, slice_as_bytes(decl.elements()));
                packet.vertex_decl_count = decl.element_count() as u16;
            } else if self.fvf != 0 {
                let synthesized = fvf_to_vertex_elements(self.fvf);
                if !synthesized.is_empty() {
                    packet.vertex_decl_data =
                        uploads.copy(self.frame_id, slice_as_bytes(&synthesized));
                    packet.vertex_decl_count = synthesized.len() as u16;
                }
            }

            self.fill_draw_texture_stages(&mut packet, &mut uploads);
        }

        packet.state_block_hash = packet.state_hash();

        if self.runtime.submit(as_byte_slice(&packet)).is_err() {
            if should_log_sample(&DRAW_REJECT_LOG_COUNTER, 4, 256) {
                warn!("draw packet rejected seq={}", packet.header.sequence);
            }
        }
        Ok(())
    }

    /// Submit the frame: PRESENT packet, sink frame close, soft-present,
    /// then advance the frame id. A sink rejection leaves the frame id
    /// alone and reports the device lost.
    pub fn present(&mut self) -> D3dResult<()> {
        let packet = PresentPacket::new(
            self.runtime.next_packet_sequence(),
            self.frame_id,
            id_of(&self.render_targets[0]),
        );
        let _ = self.runtime.submit(as_byte_slice(&packet));

        if self.runtime.present(self.frame_id).is_err() {
            return Err(Error::DeviceLost);
        }

        self.soft_present();
        if let Some(ref swapchain) = self.swapchain {
            swapchain.note_present();
        }

        self.frame_id += 1;
        // The arena slot rotates with the frame, so cached constant refs
        // point into memory the next frame will reuse.
        self.vs_const_last_ref = UploadRef::default();
        self.ps_const_last_ref = UploadRef::default();
        self.vs_const_dirty = true;
        self.ps_const_dirty = true;
        Ok(())
    }

    pub fn reset(&mut self, params: &PresentParameters) -> D3dResult<()> {
        info!("reset");
        let mut normalized = params.clone();
        if normalized.backbuffer_count == 0 {
            normalized.backbuffer_count = 1;
        }
        if normalized.swap_effect == 0 {
            normalized.swap_effect = SWAP_EFFECT_DISCARD;
        }
        self.reset_internal(&normalized)
    }

    fn reset_internal(&mut self, params: &PresentParameters) -> D3dResult<()> {
        self.release_bindings();
        self.swapchain = None;
        self.params = params.clone();

        self.render_states = [0; state::MAX_RENDER_STATES];
        self.sampler_states = [[0; state::MAX_SAMPLER_STATES]; state::MAX_SAMPLERS];
        self.tex_stage_states =
            [[0; state::MAX_TEXTURE_STAGE_STATES]; state::MAX_TEXTURE_STAGES];
        state::apply_default_render_states(&mut self.render_states);
        state::apply_default_sampler_states(&mut self.sampler_states);
        state::apply_default_stage_states(&mut self.tex_stage_states);

        let swapchain = SwapChain::new(self.device_serial, &self.params);
        self.render_targets[0] = Some(swapchain.backbuffer().clone());
        self.present_target_id = swapchain.object_id().raw() as u64;
        self.swapchain = Some(swapchain);

        self.viewport = Viewport {
            x: 0,
            y: 0,
            width: resolve_backbuffer_width(&self.params),
            height: resolve_backbuffer_height(&self.params),
            min_z: 0.0,
            max_z: 1.0,
        };
        self.scissor_rect = Rect::new(
            0,
            0,
            self.viewport.width as i32,
            self.viewport.height as i32,
        );

        self.publish_present_target()
    }

    fn release_bindings(&mut self) {
        for target in self.render_targets.iter_mut() {
            *target = None;
        }
        self.depth_stencil = None;
        for texture in self.textures.iter_mut() {
            *texture = None;
        }
        for stream in self.streams.iter_mut() {
            *stream = None;
        }
        self.indices = None;
        self.vertex_decl = None;
        self.vertex_shader = None;
        self.pixel_shader = None;
    }

    fn publish_present_target(&mut self) -> D3dResult<()> {
        if self.present_target_id == 0 {
            self.present_target_id = match self.swapchain {
                Some(ref swapchain) => swapchain.object_id().raw() as u64,
                None => ObjectId::alloc(ObjectKind::SwapChain).raw() as u64,
            };
        }

        let desc = PresentTargetDesc {
            target_id: self.present_target_id,
            window_handle: self.params.device_window,
            width: resolve_backbuffer_width(&self.params),
            height: resolve_backbuffer_height(&self.params),
            format: resolve_backbuffer_format(&self.params).0,
            windowed: if self.params.windowed { 1 } else { 0 },
        };

        if self.runtime.update_present_target(&desc).is_err() {
            error!(
                "failed to publish present target metadata target={} hwnd={:#x} \
                 size={}x{} fmt={} windowed={}",
                desc.target_id, desc.window_handle, desc.width, desc.height, desc.format,
                desc.windowed
            );
            return Err(Error::DriverInternal);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Draw packet helpers
    // ---------------------------------------------------------------

    fn hash_texture_stage_state(&self) -> u32 {
        let mut h = hash::OFFSET_BASIS;
        for stage in 0..state::MAX_TEXTURE_STAGES {
            let texture_id = self.textures[stage]
                .as_ref()
                .map(|texture| texture.object_id().raw())
                .unwrap_or(0);
            h = hash::fold(h, texture_id);
            for state_index in 0..state::MAX_TEXTURE_STAGE_STATES {
                h = hash::fold(h, self.tex_stage_states[stage][state_index]);
            }
        }
        h
    }

    fn hash_sampler_state(&self) -> u32 {
        let mut h = hash::OFFSET_BASIS;
        for sampler in 0..state::MAX_SAMPLERS {
            for state_index in 0..state::MAX_SAMPLER_STATES {
                h = hash::fold(h, self.sampler_states[sampler][state_index]);
            }
        }
        h
    }

    fn hash_stream_bindings(&self) -> u32 {
        let mut h = hash::OFFSET_BASIS;
        for stream in 0..state::MAX_STREAMS {
            h = hash::fold(h, id_of(&self.streams[stream]));
            h = hash::fold(h, self.stream_offsets[stream]);
            h = hash::fold(h, self.stream_strides[stream]);
            h = hash::fold(h, self.stream_freq[stream]);
        }
        h
    }

    fn hash_viewport(&self) -> u32 {
        let mut h = hash::OFFSET_BASIS;
        h = hash::fold(h, self.viewport.x);
        h = hash::fold(h, self.viewport.y);
        h = hash::fold(h, self.viewport.width);
        h = hash::fold(h, self.viewport.height);
        h = hash::fold_f32(h, self.viewport.min_z);
        h = hash::fold_f32(h, self.viewport.max_z);
        h
    }

    fn hash_scissor(&self) -> u32 {
        let mut h = hash::OFFSET_BASIS;
        h = hash::fold(h, self.scissor_rect.left as u32);
        h = hash::fold(h, self.scissor_rect.top as u32);
        h = hash::fold(h, self.scissor_rect.right as u32);
        h = hash::fold(h, self.scissor_rect.bottom as u32);
        h
    }

    fn fill_draw_texture_stages(&self, packet: &mut DrawIndexedPacket,
                                uploads: &mut ::arena::UploadArena) {
        packet.tss0_color_op = self.tex_stage_states[0][tss::COLOROP];
        packet.tss0_color_arg1 = self.tex_stage_states[0][tss::COLORARG1];
        packet.tss0_color_arg2 = self.tex_stage_states[0][tss::COLORARG2];
        packet.tss0_alpha_op = self.tex_stage_states[0][tss::ALPHAOP];
        packet.tss0_alpha_arg1 = self.tex_stage_states[0][tss::ALPHAARG1];
        packet.tss0_alpha_arg2 = self.tex_stage_states[0][tss::ALPHAARG2];
        packet.rs_texture_factor = self.render_states[rs::TEXTUREFACTOR];

        packet.rs_alpha_blend_enable = self.render_states[rs::ALPHABLENDENABLE];
        packet.rs_src_blend = self.render_states[rs::SRCBLEND];
        packet.rs_dest_blend = self.render_states[rs::DESTBLEND];
        packet.rs_alpha_test_enable = self.render_states[rs::ALPHATESTENABLE];
        packet.rs_alpha_ref = self.render_states[rs::ALPHAREF];
        packet.rs_alpha_func = self.render_states[rs::ALPHAFUNC];
        packet.rs_zenable = self.render_states[rs::ZENABLE];
        packet.rs_zwriteenable = self.render_states[rs::ZWRITEENABLE];
        packet.rs_zfunc = self.render_states[rs::ZFUNC];
        packet.rs_stencilenable = self.render_states[rs::STENCILENABLE];
        packet.rs_stencilfunc = self.render_states[rs::STENCILFUNC];
        packet.rs_stencilref = self.render_states[rs::STENCILREF];
        packet.rs_stencilmask = self.render_states[rs::STENCILMASK];
        packet.rs_stencilwritemask = self.render_states[rs::STENCILWRITEMASK];
        packet.rs_cull_mode = self.render_states[rs::CULLMODE];
        packet.rs_scissortestenable = self.render_states[rs::SCISSORTESTENABLE];
        packet.rs_blendop = self.render_states[rs::BLENDOP];
        packet.rs_colorwriteenable = self.render_states[rs::COLORWRITEENABLE];
        packet.rs_stencilpass = self.render_states[rs::STENCILPASS];
        packet.rs_stencilfail = self.render_states[rs::STENCILFAIL];
        packet.rs_stencilzfail = self.render_states[rs::STENCILZFAIL];
        packet.rs_fogenable = self.render_states[rs::FOGENABLE];
        packet.rs_fogcolor = self.render_states[rs::FOGCOLOR];
        packet.rs_fogstart = f32::from_bits(self.render_states[rs::FOGSTART]);
        packet.rs_fogend = f32::from_bits(self.render_states[rs::FOGEND]);
        packet.rs_fogdensity = f32::from_bits(self.render_states[rs::FOGDENSITY]);
        packet.rs_fogtablemode = self.render_states[rs::FOGTABLEMODE];

        for stage in 0..state::MAX_PS_SAMPLERS {
            packet.sampler_min_filter[stage] = self.sampler_states[stage][samp::MINFILTER];
            packet.sampler_mag_filter[stage] = self.sampler_states[stage][samp::MAGFILTER];
            packet.sampler_mip_filter[stage] = self.sampler_states[stage][samp::MIPFILTER];
            packet.sampler_address_u[stage] = self.sampler_states[stage][samp::ADDRESSU];
            packet.sampler_address_v[stage] = self.sampler_states[stage][samp::ADDRESSV];
            packet.sampler_address_w[stage] = self.sampler_states[stage][samp::ADDRESSW];

            // Only 2D textures reach the per-draw upload path.
            let texture = match self.textures[stage] {
                Some(BaseTexture::Tex2d(ref texture)) => texture,
                _ => continue,
            };
            if texture.level_count() == 0 {
                continue;
            }

            let level = texture.lod().min(texture.level_count() - 1);
            let surface = match texture.surface_level(level) {
                Ok(surface) => surface,
                Err(_) => continue,
            };

            packet.tex_id[stage] = texture.object_id().raw();
            packet.tex_generation[stage] = texture.generation();
            packet.tex_format[stage] = texture.format().0;
            packet.tex_width[stage] = (texture.width() >> level).max(1);
            packet.tex_height[stage] = (texture.height() >> level).max(1);
            packet.tex_pitch[stage] = surface.pitch();

            if !surface.has_backing() {
                continue;
            }
            let upload_size = surface.upload_size();
            if upload_size == 0 {
                continue;
            }

            let generation = texture.generation();
            let mut should_upload = texture.last_upload_generation() != generation;
            if !should_upload && texture.last_upload_frame_id() != self.frame_id {
                // Periodic refresh so a viewer attaching mid-run converges.
                should_upload = (self.frame_id.wrapping_add(texture.object_id().raw()))
                    % state::TEXTURE_UPLOAD_REFRESH_INTERVAL
                    == 0;
            }
            if !should_upload {
                continue;
            }

            let upload = surface
                .with_backing(|bytes| uploads.copy(self.frame_id, bytes))
                .unwrap_or(UploadRef::default());
            packet.tex_data[stage] = upload;
            if !upload.is_empty() {
                texture.note_uploaded(generation, self.frame_id);
            }
        }
    }

    // ---------------------------------------------------------------
    // Soft present
    // ---------------------------------------------------------------

    fn soft_present(&mut self) {
        if !runtime::soft_present_enabled() {
            return;
        }
        let backbuffer = match self.swapchain {
            Some(ref swapchain) => swapchain.backbuffer().clone(),
            None => return,
        };
        if backbuffer.desc().format.bytes_per_pixel() != 4 {
            if should_log_sample(&SOFT_PRESENT_LOG_COUNTER, 4, 256) {
                debug!("soft present skipped unsupported format={}", backbuffer.desc().format);
            }
            return;
        }

        let frame_id = self.frame_id;
        let desc = *backbuffer.desc();
        let pitch = backbuffer.pitch();
        backbuffer.with_backing_mut(|bytes| {
            apply_debug_overlay(bytes, &desc, pitch, frame_id);
        });

        if let Some(ref mut target) = self.soft_present_target {
            backbuffer.with_backing(|bytes| {
                target.blit(&desc, pitch, bytes);
            });
        }
    }
}

/// Paint a small frame-indexed checker band into the top-left corner of a
/// 32-bit image, so a raw dump visibly proves frames are advancing.
fn apply_debug_overlay(bytes: &mut [u8], desc: &SurfaceDesc, pitch: u32, frame_id: u32) {
    let overlay_w = desc.width.min(96) as usize;
    let overlay_h = desc.height.min(16) as usize;
    if overlay_w == 0 || overlay_h == 0 {
        return;
    }

    let base_color: u32 = 0xFF00_0000
        | ((frame_id.wrapping_mul(13) & 0xFF) << 16)
        | ((frame_id.wrapping_mul(29) & 0xFF) << 8)
        | (frame_id.wrapping_mul(47) & 0xFF);

    for y in 0..overlay_h {
        let row = y * pitch as usize;
        for x in 0..overlay_w {
            let mut color = base_color;
            if ((x >> 3) as u32 + y as u32 + frame_id) & 1 != 0 {
                color ^= 0x00FF_FFFF;
            }
            let at = row + x * 4;
            bytes[at..at + 4].copy_from_slice(&color.to_le_bytes());
        }
    }
}
