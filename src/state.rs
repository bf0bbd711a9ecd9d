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

//! Fixed-function state space: mirror dimensions, state indices, default
//! values, and the small geometry types the mirror stores.
//!
//! The mirrors are flat arrays indexed by the API's enum values, sized here
//! at compile time. Values are kept as the raw DWORDs the program set
//! (float-valued states store their IEEE bits) because they are hashed and
//! forwarded over the packet boundary verbatim.

/// Simultaneous render targets.
pub const MAX_RENDER_TARGETS: usize = 4;
/// Texture stages (and texture bindings).
pub const MAX_TEXTURE_STAGES: usize = 16;
/// Samplers (16 PS + vertex-texture samplers).
pub const MAX_SAMPLERS: usize = 20;
/// Sampler state types per sampler.
pub const MAX_SAMPLER_STATES: usize = 16;
/// Texture-stage state types per stage.
pub const MAX_TEXTURE_STAGE_STATES: usize = 32;
/// Render state slots.
pub const MAX_RENDER_STATES: usize = 256;
/// Vertex stream bindings.
pub const MAX_STREAMS: usize = 16;
/// Transform slots (world matrices live high in the enum space).
pub const MAX_TRANSFORMS: usize = 512;
/// User clip planes.
pub const MAX_CLIP_PLANES: usize = 6;
/// float4 shader constants per stage.
pub const MAX_SHADER_FLOAT_CONSTANTS: usize = 256;
/// int4 shader constants per stage.
pub const MAX_SHADER_INT_CONSTANTS: usize = 16;
/// bool shader constants per stage.
pub const MAX_SHADER_BOOL_CONSTANTS: usize = 16;
/// Sampler stages walked per draw when building the packet.
pub const MAX_PS_SAMPLERS: usize = 16;
/// Bytes of float constants carried per stage per draw (256 float4s).
pub const SHADER_CONSTANT_BYTES: u32 = (MAX_SHADER_FLOAT_CONSTANTS * 16) as u32;
/// Bound textures are re-sent every time `(frame + id) % INTERVAL == 0`
/// even when clean, so a viewer attaching mid-run converges on content.
pub const TEXTURE_UPLOAD_REFRESH_INTERVAL: u32 = 60;

/// Render state indices (D3DRS values used by the recorder).
pub mod rs {
    pub const ZENABLE: usize = 7;
    pub const ZWRITEENABLE: usize = 14;
    pub const ALPHATESTENABLE: usize = 15;
    pub const SRCBLEND: usize = 19;
    pub const DESTBLEND: usize = 20;
    pub const CULLMODE: usize = 22;
    pub const ZFUNC: usize = 23;
    pub const ALPHAREF: usize = 24;
    pub const ALPHAFUNC: usize = 25;
    pub const ALPHABLENDENABLE: usize = 27;
    pub const FOGENABLE: usize = 28;
    pub const FOGCOLOR: usize = 34;
    pub const FOGTABLEMODE: usize = 35;
    pub const FOGSTART: usize = 36;
    pub const FOGEND: usize = 37;
    pub const FOGDENSITY: usize = 38;
    pub const STENCILENABLE: usize = 52;
    pub const STENCILFAIL: usize = 53;
    pub const STENCILZFAIL: usize = 54;
    pub const STENCILPASS: usize = 55;
    pub const STENCILFUNC: usize = 56;
    pub const STENCILREF: usize = 57;
    pub const STENCILMASK: usize = 58;
    pub const STENCILWRITEMASK: usize = 59;
    pub const TEXTUREFACTOR: usize = 60;
    pub const COLORWRITEENABLE: usize = 168;
    pub const BLENDOP: usize = 171;
    pub const SCISSORTESTENABLE: usize = 174;
}

/// Sampler state indices (D3DSAMP values).
pub mod samp {
    pub const ADDRESSU: usize = 1;
    pub const ADDRESSV: usize = 2;
    pub const ADDRESSW: usize = 3;
    pub const BORDERCOLOR: usize = 4;
    pub const MAGFILTER: usize = 5;
    pub const MINFILTER: usize = 6;
    pub const MIPFILTER: usize = 7;
    pub const MIPMAPLODBIAS: usize = 8;
    pub const MAXMIPLEVEL: usize = 9;
    pub const MAXANISOTROPY: usize = 10;
}

/// Texture-stage state indices (D3DTSS values).
pub mod tss {
    pub const COLOROP: usize = 1;
    pub const COLORARG1: usize = 2;
    pub const COLORARG2: usize = 3;
    pub const ALPHAOP: usize = 4;
    pub const ALPHAARG1: usize = 5;
    pub const ALPHAARG2: usize = 6;
    pub const TEXCOORDINDEX: usize = 11;
    pub const RESULTARG: usize = 28;
}

/// Texture filter values (D3DTEXF).
pub mod texf {
    pub const NONE: u32 = 0;
    pub const POINT: u32 = 1;
    pub const LINEAR: u32 = 2;
    pub const ANISOTROPIC: u32 = 3;
}

/// Texture address modes (D3DTADDRESS).
pub mod taddress {
    pub const WRAP: u32 = 1;
    pub const MIRROR: u32 = 2;
    pub const CLAMP: u32 = 3;
    pub const BORDER: u32 = 4;
}

/// Texture-stage combiner ops (D3DTOP).
pub mod top {
    pub const DISABLE: u32 = 1;
    pub const SELECTARG1: u32 = 2;
    pub const SELECTARG2: u32 = 3;
    pub const MODULATE: u32 = 4;
}

/// Texture-stage argument selectors (D3DTA).
pub mod ta {
    pub const DIFFUSE: u32 = 0;
    pub const CURRENT: u32 = 1;
    pub const TEXTURE: u32 = 2;
    pub const TFACTOR: u32 = 3;
}

/// Comparison functions (D3DCMP).
pub mod cmp {
    pub const NEVER: u32 = 1;
    pub const LESS: u32 = 2;
    pub const EQUAL: u32 = 3;
    pub const LESSEQUAL: u32 = 4;
    pub const GREATER: u32 = 5;
    pub const NOTEQUAL: u32 = 6;
    pub const GREATEREQUAL: u32 = 7;
    pub const ALWAYS: u32 = 8;
}

/// Blend factors (D3DBLEND).
pub mod blend {
    pub const ZERO: u32 = 1;
    pub const ONE: u32 = 2;
    pub const SRCALPHA: u32 = 5;
    pub const INVSRCALPHA: u32 = 6;
}

/// Blend equations (D3DBLENDOP).
pub mod blendop {
    pub const ADD: u32 = 1;
}

/// Cull modes (D3DCULL).
pub mod cull {
    pub const NONE: u32 = 1;
    pub const CW: u32 = 2;
    pub const CCW: u32 = 3;
}

/// Stencil ops (D3DSTENCILOP).
pub mod stencilop {
    pub const KEEP: u32 = 1;
}

/// Z-buffer usage (D3DZB).
pub mod zb {
    pub const FALSE: u32 = 0;
    pub const TRUE: u32 = 1;
}

/// A screen-space rectangle, left/top inclusive, right/bottom exclusive.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Rect {
        Rect { left: left, top: top, right: right, bottom: bottom }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Viewport rectangle plus depth range.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub min_z: f32,
    pub max_z: f32,
}

/// A transform slot payload. Stored and forwarded, never computed with.
pub type Matrix = [f32; 16];

/// Gamma ramp, one 16-bit curve per channel.
#[derive(Clone, Copy)]
pub struct GammaRamp {
    pub red: [u16; 256],
    pub green: [u16; 256],
    pub blue: [u16; 256],
}

impl Default for GammaRamp {
    fn default() -> GammaRamp {
        GammaRamp { red: [0; 256], green: [0; 256], blue: [0; 256] }
    }
}

/// Populate the render-state mirror with the documented creation defaults.
pub fn apply_default_render_states(states: &mut [u32; MAX_RENDER_STATES]) {
    states[rs::ZENABLE] = zb::TRUE;
    states[rs::ZWRITEENABLE] = 1;
    states[rs::ZFUNC] = cmp::LESSEQUAL;
    states[rs::ALPHABLENDENABLE] = 0;
    states[rs::SRCBLEND] = blend::ONE;
    states[rs::DESTBLEND] = blend::ZERO;
    states[rs::BLENDOP] = blendop::ADD;
    states[rs::TEXTUREFACTOR] = 0xFFFF_FFFF;
    states[rs::ALPHATESTENABLE] = 0;
    states[rs::ALPHAREF] = 0;
    states[rs::ALPHAFUNC] = cmp::ALWAYS;
    states[rs::STENCILENABLE] = 0;
    states[rs::STENCILFUNC] = cmp::ALWAYS;
    states[rs::STENCILREF] = 0;
    states[rs::STENCILMASK] = 0xFFFF_FFFF;
    states[rs::STENCILWRITEMASK] = 0xFFFF_FFFF;
    states[rs::CULLMODE] = cull::CCW;
    states[rs::SCISSORTESTENABLE] = 0;
    states[rs::COLORWRITEENABLE] = 0xF;
    states[rs::STENCILPASS] = stencilop::KEEP;
    states[rs::STENCILFAIL] = stencilop::KEEP;
    states[rs::STENCILZFAIL] = stencilop::KEEP;
    states[rs::FOGENABLE] = 0;
    states[rs::FOGCOLOR] = 0;
    states[rs::FOGSTART] = 0.0f32.to_bits();
    states[rs::FOGEND] = 1.0f32.to_bits();
    states[rs::FOGDENSITY] = 1.0f32.to_bits();
    states[rs::FOGTABLEMODE] = 0;
}

/// Populate every sampler with wrap addressing and point filtering.
pub fn apply_default_sampler_states(states: &mut [[u32; MAX_SAMPLER_STATES]; MAX_SAMPLERS]) {
    for sampler in states.iter_mut() {
        sampler[samp::ADDRESSU] = taddress::WRAP;
        sampler[samp::ADDRESSV] = taddress::WRAP;
        sampler[samp::ADDRESSW] = taddress::WRAP;
        sampler[samp::MAGFILTER] = texf::POINT;
        sampler[samp::MINFILTER] = texf::POINT;
        sampler[samp::MIPFILTER] = texf::NONE;
        sampler[samp::MAXANISOTROPY] = 1;
    }
}

/// Stage 0 defaults to `modulate(texture, current)`, every other stage to
/// `disable`, matching runtime behavior the fixed-function path relies on.
pub fn apply_default_stage_states(
    states: &mut [[u32; MAX_TEXTURE_STAGE_STATES]; MAX_TEXTURE_STAGES],
) {
    for (index, stage) in states.iter_mut().enumerate() {
        stage[tss::COLOROP] = if index == 0 { top::MODULATE } else { top::DISABLE };
        stage[tss::COLORARG1] = ta::TEXTURE;
        stage[tss::COLORARG2] = ta::CURRENT;
        stage[tss::ALPHAOP] = if index == 0 { top::SELECTARG1 } else { top::DISABLE };
        stage[tss::ALPHAARG1] = ta::TEXTURE;
        stage[tss::ALPHAARG2] = ta::CURRENT;
        stage[tss::RESULTARG] = ta::CURRENT;
        stage[tss::TEXCOORDINDEX] = index as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_state_defaults_enable_depth_and_disable_blending() {
        let mut states = [0u32; MAX_RENDER_STATES];
        apply_default_render_states(&mut states);
        assert_eq!(states[rs::ZENABLE], zb::TRUE);
        assert_eq!(states[rs::ZFUNC], cmp::LESSEQUAL);
        assert_eq!(states[rs::ALPHABLENDENABLE], 0);
        assert_eq!(states[rs::SRCBLEND], blend::ONE);
        assert_eq!(states[rs::DESTBLEND], blend::ZERO);
        assert_eq!(states[rs::CULLMODE], cull::CCW);
        assert_eq!(states[rs::COLORWRITEENABLE], 0xF);
        assert_eq!(f32::from_bits(states[rs::FOGEND]), 1.0);
    }

    #[test]
    fn sampler_defaults_wrap_and_point_filter() {
        let mut states = [[0u32; MAX_SAMPLER_STATES]; MAX_SAMPLERS];
        apply_default_sampler_states(&mut states);
        for sampler in states.iter() {
            assert_eq!(sampler[samp::ADDRESSU], taddress::WRAP);
            assert_eq!(sampler[samp::MINFILTER], texf::POINT);
            assert_eq!(sampler[samp::MIPFILTER], texf::NONE);
            assert_eq!(sampler[samp::MAXANISOTROPY], 1);
        }
    }

    #[test]
    fn only_stage_zero_samples_by_default() {
        let mut states = [[0u32; MAX_TEXTURE_STAGE_STATES]; MAX_TEXTURE_STAGES];
        apply_default_stage_states(&mut states);
        assert_eq!(states[0][tss::COLOROP], top::MODULATE);
        assert_eq!(states[0][tss::ALPHAOP], top::SELECTARG1);
        for stage in 1..MAX_TEXTURE_STAGES {
            assert_eq!(states[stage][tss::COLOROP], top::DISABLE);
            assert_eq!(states[stage][tss::TEXCOORDINDEX], stage as u32);
        }
    }
}
