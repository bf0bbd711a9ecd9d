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

//! The recorder → sink packet protocol.
//!
//! Packets are length-prefixed, type-tagged, monotonically sequenced
//! records, laid out as `#[repr(C)]` plain-old-data so a batch of them is
//! one contiguous byte buffer. Every struct here is arranged so that no
//! implicit padding exists; the byte casts below are what make that a hard
//! requirement rather than a style preference.

use std::mem;
use std::ptr;

use arena::{UploadArenaDesc, UploadRef};
use hash;
use state::MAX_PS_SAMPLERS;

/// Protocol revision carried in the INIT handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Packet type tags.
#[repr(u16)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketType {
    Invalid = 0,
    Init = 1,
    BeginFrame = 2,
    DrawIndexed = 3,
    Present = 4,
    Shutdown = 5,
    Clear = 6,
}

impl PacketType {
    pub fn from_u16(value: u16) -> Option<PacketType> {
        match value {
            1 => Some(PacketType::Init),
            2 => Some(PacketType::BeginFrame),
            3 => Some(PacketType::DrawIndexed),
            4 => Some(PacketType::Present),
            5 => Some(PacketType::Shutdown),
            6 => Some(PacketType::Clear),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::Invalid => "INVALID",
            PacketType::Init => "INIT",
            PacketType::BeginFrame => "BEGIN_FRAME",
            PacketType::DrawIndexed => "DRAW_INDEXED",
            PacketType::Present => "PRESENT",
            PacketType::Shutdown => "SHUTDOWN",
            PacketType::Clear => "CLEAR",
        }
    }
}

/// Marker for types that are plain bytes: `#[repr(C)]`, `Copy`, no
/// references, no implicit padding. Implementors vouch for all of that.
pub unsafe trait Pod: Copy + 'static {}

unsafe impl Pod for UploadRef {}
unsafe impl Pod for UploadArenaDesc {}
unsafe impl Pod for u32 {}
unsafe impl Pod for [f32; 4] {}

/// View a POD value as its bytes.
pub fn as_byte_slice<T: Pod>(value: &T) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(value as *const T as *const u8, mem::size_of::<T>())
    }
}

/// View a POD slice as its bytes.
pub fn slice_as_bytes<T: Pod>(values: &[T]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            values.as_ptr() as *const u8,
            values.len() * mem::size_of::<T>(),
        )
    }
}

/// Read a POD value off the front of a byte buffer, if it fits.
pub fn read_pod<T: Pod>(bytes: &[u8]) -> Option<T> {
    if bytes.len() < mem::size_of::<T>() {
        return None;
    }
    Some(unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) })
}

/// Common packet prefix.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PacketHeader {
    pub packet_type: u16,
    pub size: u16,
    pub sequence: u32,
}

unsafe impl Pod for PacketHeader {}

impl PacketHeader {
    pub fn new<T: Pod>(packet_type: PacketType, sequence: u32) -> PacketHeader {
        PacketHeader {
            packet_type: packet_type as u16,
            size: mem::size_of::<T>() as u16,
            sequence: sequence,
        }
    }
}

/// Sink handshake: protocol revision and transport geometry.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct InitPacket {
    pub header: PacketHeader,
    pub protocol_version: u32,
    pub ring_capacity_bytes: u32,
    pub upload_desc: UploadArenaDesc,
}

unsafe impl Pod for InitPacket {}

impl InitPacket {
    pub fn new(sequence: u32, ring_capacity_bytes: u32, upload_desc: UploadArenaDesc)
               -> InitPacket {
        InitPacket {
            header: PacketHeader::new::<InitPacket>(PacketType::Init, sequence),
            protocol_version: PROTOCOL_VERSION,
            ring_capacity_bytes: ring_capacity_bytes,
            upload_desc: upload_desc,
        }
    }
}

/// First packet of every frame.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct BeginFramePacket {
    pub header: PacketHeader,
    pub frame_id: u32,
}

unsafe impl Pod for BeginFramePacket {}

impl BeginFramePacket {
    pub fn new(sequence: u32, frame_id: u32) -> BeginFramePacket {
        BeginFramePacket {
            header: PacketHeader::new::<BeginFramePacket>(PacketType::BeginFrame, sequence),
            frame_id: frame_id,
        }
    }
}

/// One indexed draw: the full per-draw state projection plus refs to the
/// variable-sized side data in the upload arena.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DrawIndexedPacket {
    pub header: PacketHeader,
    pub state_block_hash: u32,

    pub primitive_type: u32,
    pub base_vertex: i32,
    pub min_vertex_index: u32,
    pub num_vertices: u32,
    pub start_index: u32,
    pub primitive_count: u32,

    pub render_target_id: u32,
    pub depth_stencil_id: u32,
    pub render_target_texture_id: u32,
    pub render_target_width: u32,
    pub render_target_height: u32,
    pub render_target_format: u32,

    pub vertex_buffer_id: u32,
    pub index_buffer_id: u32,
    pub vertex_decl_id: u32,
    pub vertex_shader_id: u32,
    pub pixel_shader_id: u32,
    pub fvf: u32,
    pub stream0_offset: u32,
    pub stream0_stride: u32,

    pub viewport_hash: u32,
    pub scissor_hash: u32,
    pub texture_stage_hash: u32,
    pub sampler_state_hash: u32,
    pub stream_binding_hash: u32,

    pub viewport_x: u32,
    pub viewport_y: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub viewport_min_z: f32,
    pub viewport_max_z: f32,

    pub scissor_left: i32,
    pub scissor_top: i32,
    pub scissor_right: i32,
    pub scissor_bottom: i32,

    pub tex_id: [u32; MAX_PS_SAMPLERS],
    pub tex_generation: [u32; MAX_PS_SAMPLERS],
    pub tex_format: [u32; MAX_PS_SAMPLERS],
    pub tex_width: [u32; MAX_PS_SAMPLERS],
    pub tex_height: [u32; MAX_PS_SAMPLERS],
    pub tex_pitch: [u32; MAX_PS_SAMPLERS],
    pub tex_data: [UploadRef; MAX_PS_SAMPLERS],

    pub sampler_min_filter: [u32; MAX_PS_SAMPLERS],
    pub sampler_mag_filter: [u32; MAX_PS_SAMPLERS],
    pub sampler_mip_filter: [u32; MAX_PS_SAMPLERS],
    pub sampler_address_u: [u32; MAX_PS_SAMPLERS],
    pub sampler_address_v: [u32; MAX_PS_SAMPLERS],
    pub sampler_address_w: [u32; MAX_PS_SAMPLERS],

    pub tss0_color_op: u32,
    pub tss0_color_arg1: u32,
    pub tss0_color_arg2: u32,
    pub tss0_alpha_op: u32,
    pub tss0_alpha_arg1: u32,
    pub tss0_alpha_arg2: u32,
    pub rs_texture_factor: u32,

    pub rs_alpha_blend_enable: u32,
    pub rs_src_blend: u32,
    pub rs_dest_blend: u32,
    pub rs_alpha_test_enable: u32,
    pub rs_alpha_ref: u32,
    pub rs_alpha_func: u32,
    pub rs_zenable: u32,
    pub rs_zwriteenable: u32,
    pub rs_zfunc: u32,
    pub rs_stencilenable: u32,
    pub rs_stencilfunc: u32,
    pub rs_stencilref: u32,
    pub rs_stencilmask: u32,
    pub rs_stencilwritemask: u32,
    pub rs_cull_mode: u32,
    pub rs_scissortestenable: u32,
    pub rs_blendop: u32,
    pub rs_colorwriteenable: u32,
    pub rs_stencilpass: u32,
    pub rs_stencilfail: u32,
    pub rs_stencilzfail: u32,
    pub rs_fogenable: u32,
    pub rs_fogcolor: u32,
    pub rs_fogstart: f32,
    pub rs_fogend: f32,
    pub rs_fogdensity: f32,
    pub rs_fogtablemode: u32,

    pub constants_vs: UploadRef,
    pub constants_ps: UploadRef,

    pub vs_bytecode: UploadRef,
    pub vs_bytecode_dwords: u32,
    pub ps_bytecode: UploadRef,
    pub ps_bytecode_dwords: u32,

    pub vertex_data: UploadRef,
    pub vertex_data_size: u32,
    pub index_data: UploadRef,
    pub index_data_size: u32,
    pub index_format: u32,

    pub vertex_decl_data: UploadRef,
    pub vertex_decl_count: u16,
    pub reserved: u16,
}

unsafe impl Pod for DrawIndexedPacket {}

impl DrawIndexedPacket {
    pub fn new(sequence: u32) -> DrawIndexedPacket {
        let mut packet: DrawIndexedPacket = unsafe { mem::zeroed() };
        packet.header = PacketHeader::new::<DrawIndexedPacket>(PacketType::DrawIndexed, sequence);
        packet
    }

    /// Fingerprint over the packet's stable state fields, used by the
    /// consumer as a pipeline-state cache key. Per-draw geometry counts are
    /// deliberately excluded.
    pub fn state_hash(&self) -> u32 {
        let mut h = hash::OFFSET_BASIS;
        h = hash::fold(h, self.render_target_id);
        h = hash::fold(h, self.depth_stencil_id);
        h = hash::fold(h, self.render_target_texture_id);
        h = hash::fold(h, self.render_target_width);
        h = hash::fold(h, self.render_target_height);
        h = hash::fold(h, self.render_target_format);
        h = hash::fold(h, self.vertex_buffer_id);
        h = hash::fold(h, self.index_buffer_id);
        h = hash::fold(h, self.vertex_decl_id);
        h = hash::fold(h, self.vertex_shader_id);
        h = hash::fold(h, self.pixel_shader_id);
        h = hash::fold(h, self.fvf);
        h = hash::fold(h, self.stream0_offset);
        h = hash::fold(h, self.stream0_stride);
        h = hash::fold(h, self.primitive_type);
        h = hash::fold(h, self.viewport_hash);
        h = hash::fold(h, self.scissor_hash);
        h = hash::fold(h, self.texture_stage_hash);
        h = hash::fold(h, self.sampler_state_hash);
        h = hash::fold(h, self.stream_binding_hash);
        for stage in 0..MAX_PS_SAMPLERS {
            h = hash::fold(h, self.tex_id[stage]);
            h = hash::fold(h, self.tex_generation[stage]);
            h = hash::fold(h, self.sampler_min_filter[stage]);
            h = hash::fold(h, self.sampler_mag_filter[stage]);
            h = hash::fold(h, self.sampler_mip_filter[stage]);
            h = hash::fold(h, self.sampler_address_u[stage]);
            h = hash::fold(h, self.sampler_address_v[stage]);
            h = hash::fold(h, self.sampler_address_w[stage]);
        }
        h = hash::fold(h, self.tss0_color_op);
        h = hash::fold(h, self.tss0_color_arg1);
        h = hash::fold(h, self.tss0_color_arg2);
        h = hash::fold(h, self.tss0_alpha_op);
        h = hash::fold(h, self.tss0_alpha_arg1);
        h = hash::fold(h, self.tss0_alpha_arg2);
        h = hash::fold(h, self.rs_texture_factor);
        h = hash::fold(h, self.rs_alpha_blend_enable);
        h = hash::fold(h, self.rs_src_blend);
        h = hash::fold(h, self.rs_dest_blend);
        h = hash::fold(h, self.rs_alpha_test_enable);
        h = hash::fold(h, self.rs_alpha_ref);
        h = hash::fold(h, self.rs_alpha_func);
        h = hash::fold(h, self.rs_zenable);
        h = hash::fold(h, self.rs_zwriteenable);
        h = hash::fold(h, self.rs_zfunc);
        h = hash::fold(h, self.rs_stencilenable);
        h = hash::fold(h, self.rs_stencilfunc);
        h = hash::fold(h, self.rs_stencilref);
        h = hash::fold(h, self.rs_stencilmask);
        h = hash::fold(h, self.rs_stencilwritemask);
        h = hash::fold(h, self.rs_cull_mode);
        h = hash::fold(h, self.rs_scissortestenable);
        h = hash::fold(h, self.rs_blendop);
        h = hash::fold(h, self.rs_colorwriteenable);
        h = hash::fold(h, self.rs_stencilpass);
        h = hash::fold(h, self.rs_stencilfail);
        h = hash::fold(h, self.rs_stencilzfail);
        h = hash::fold(h, self.rs_fogenable);
        h = hash::fold(h, self.rs_fogcolor);
        h
    }
}

/// Frame submission marker; the last packet of a frame.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct PresentPacket {
    pub header: PacketHeader,
    pub frame_id: u32,
    pub flags: u32,
    pub render_target_id: u32,
}

unsafe impl Pod for PresentPacket {}

impl PresentPacket {
    pub fn new(sequence: u32, frame_id: u32, render_target_id: u32) -> PresentPacket {
        PresentPacket {
            header: PacketHeader::new::<PresentPacket>(PacketType::Present, sequence),
            frame_id: frame_id,
            flags: 0,
            render_target_id: render_target_id,
        }
    }
}

/// Raw clear parameters for the backend to re-apply.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ClearPacket {
    pub header: PacketHeader,
    pub frame_id: u32,
    pub rect_count: u32,
    pub flags: u32,
    pub color: u32,
    pub z: f32,
    pub stencil: u32,
}

unsafe impl Pod for ClearPacket {}

impl ClearPacket {
    pub fn new(sequence: u32, frame_id: u32) -> ClearPacket {
        ClearPacket {
            header: PacketHeader::new::<ClearPacket>(PacketType::Clear, sequence),
            frame_id: frame_id,
            rect_count: 0,
            flags: 0,
            color: 0,
            z: 1.0,
            stencil: 0,
        }
    }
}

/// Header-only teardown marker.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ShutdownPacket {
    pub header: PacketHeader,
}

unsafe impl Pod for ShutdownPacket {}

impl ShutdownPacket {
    pub fn new(sequence: u32) -> ShutdownPacket {
        ShutdownPacket {
            header: PacketHeader::new::<ShutdownPacket>(PacketType::Shutdown, sequence),
        }
    }
}

/// Accumulates packets for a batched submit.
#[derive(Default)]
pub struct PacketBuffer {
    bytes: Vec<u8>,
}

impl PacketBuffer {
    pub fn new() -> PacketBuffer {
        PacketBuffer { bytes: Vec::new() }
    }

    pub fn push<T: Pod>(&mut self, packet: &T) {
        self.bytes.extend_from_slice(as_byte_slice(packet));
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_carry_their_packet_size() {
        let begin = BeginFramePacket::new(3, 9);
        assert_eq!(begin.header.packet_type, PacketType::BeginFrame as u16);
        assert_eq!(begin.header.size as usize, mem::size_of::<BeginFramePacket>());
        assert_eq!(begin.header.sequence, 3);
    }

    #[test]
    fn every_packet_fits_a_u16_size_field() {
        assert!(mem::size_of::<InitPacket>() <= u16::MAX as usize);
        assert!(mem::size_of::<DrawIndexedPacket>() <= u16::MAX as usize);
        assert!(mem::size_of::<ClearPacket>() <= u16::MAX as usize);
        assert!(mem::size_of::<PresentPacket>() <= u16::MAX as usize);
        assert_eq!(mem::size_of::<ShutdownPacket>(), mem::size_of::<PacketHeader>());
    }

    #[test]
    fn byte_round_trip_preserves_fields() {
        let mut clear = ClearPacket::new(7, 2);
        clear.flags = 3;
        clear.color = 0x1122_3344;
        let bytes = as_byte_slice(&clear);
        let header: PacketHeader = read_pod(bytes).unwrap();
        assert_eq!(header.packet_type, PacketType::Clear as u16);
        let back: ClearPacket = read_pod(bytes).unwrap();
        assert_eq!(back.color, 0x1122_3344);
        assert_eq!(back.z, 1.0);
    }

    #[test]
    fn read_pod_refuses_short_buffers() {
        let header = PacketHeader::new::<ShutdownPacket>(PacketType::Shutdown, 1);
        let bytes = as_byte_slice(&header);
        assert!(read_pod::<ClearPacket>(bytes).is_none());
    }

    #[test]
    fn state_hash_tracks_state_not_geometry() {
        let mut a = DrawIndexedPacket::new(1);
        a.render_target_id = 5;
        a.vertex_buffer_id = 6;
        let mut b = a;
        b.header.sequence = 2;
        b.start_index = 300;
        b.primitive_count = 12;
        assert_eq!(a.state_hash(), b.state_hash());

        b.rs_cull_mode = 2;
        assert_ne!(a.state_hash(), b.state_hash());
    }

    #[test]
    fn packet_buffer_concatenates_in_order() {
        let mut buffer = PacketBuffer::new();
        buffer.push(&ClearPacket::new(1, 1));
        buffer.push(&PresentPacket::new(2, 1, 9));
        assert_eq!(
            buffer.len(),
            mem::size_of::<ClearPacket>() + mem::size_of::<PresentPacket>()
        );
        let tail = &buffer.as_slice()[mem::size_of::<ClearPacket>()..];
        let header: PacketHeader = read_pod(tail).unwrap();
        assert_eq!(header.packet_type, PacketType::Present as u16);
    }
}
