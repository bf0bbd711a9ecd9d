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

//! Shared frame snapshot for the Metal viewer.
//!
//! Layout of the 16 MiB region:
//!
//! ```text
//! [0 .. header)                SnapshotHeader
//! [header .. draws_end)        SnapshotDraw[256]
//! [bulk_data_offset ..)        bulk VB/IB/texture/constant/bytecode blobs
//! ```
//!
//! The producer assembles the whole region per frame, stores the sequence
//! number into the header last, then publishes the region in a single
//! write. The viewer polls the sequence and re-reads the snapshot when it
//! changes; the sequence advances by exactly 1 per published frame.

use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU32;

use arena::{UploadArena, UploadRef};
use logger::should_log_sample;
use packet::{as_byte_slice, DrawIndexedPacket, Pod};

/// Magic value leading the snapshot header.
pub const MAGIC: u32 = 0xDEAD9001;
/// Fixed region size.
pub const REGION_SIZE: usize = 16 * 1024 * 1024;
/// Fixed draw-table capacity.
pub const MAX_DRAWS: usize = 256;
/// Default snapshot path.
pub const DEFAULT_PATH: &'static str = "/tmp/dx9mt_metal_frame.bin";

/// Snapshot header. `sequence` is the publish gate: readers treat the rest
/// of the region as undefined until it changes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub sequence: u32,
    pub width: u32,
    pub height: u32,
    pub clear_color_argb: u32,
    pub clear_flags: u32,
    pub clear_z: f32,
    pub clear_stencil: u32,
    pub have_clear: i32,
    pub draw_count: u32,
    pub replay_hash: u32,
    pub frame_id: u32,
    pub present_render_target_id: u32,
    pub bulk_data_offset: u32,
    pub bulk_data_used: u32,
}

unsafe impl Pod for SnapshotHeader {}

/// One draw-table entry. Per-sampler state is clamped to stage 0 here; the
/// full per-stage arrays stay inside the draw packet.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotDraw {
    pub primitive_type: u32,
    pub base_vertex: i32,
    pub min_vertex_index: u32,
    pub num_vertices: u32,
    pub start_index: u32,
    pub primitive_count: u32,
    pub render_target_id: u32,
    pub render_target_texture_id: u32,
    pub render_target_width: u32,
    pub render_target_height: u32,
    pub render_target_format: u32,

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

    pub fvf: u32,
    pub pixel_shader_id: u32,
    pub stream0_offset: u32,
    pub stream0_stride: u32,
    pub index_format: u32,

    pub texture0_id: u32,
    pub texture0_generation: u32,
    pub texture0_format: u32,
    pub texture0_width: u32,
    pub texture0_height: u32,
    pub texture0_pitch: u32,

    pub sampler0_min_filter: u32,
    pub sampler0_mag_filter: u32,
    pub sampler0_mip_filter: u32,
    pub sampler0_address_u: u32,
    pub sampler0_address_v: u32,
    pub sampler0_address_w: u32,

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

    pub vb_bulk_offset: u32,
    pub vb_bulk_size: u32,
    pub ib_bulk_offset: u32,
    pub ib_bulk_size: u32,
    pub texture0_bulk_offset: u32,
    pub texture0_bulk_size: u32,

    pub decl_bulk_offset: u32,
    pub decl_count: u16,
    pub reserved: u16,

    pub vs_constants_bulk_offset: u32,
    pub vs_constants_size: u32,
    pub ps_constants_bulk_offset: u32,
    pub ps_constants_size: u32,

    pub vertex_shader_id: u32,
    pub vs_bytecode_bulk_offset: u32,
    pub vs_bytecode_bulk_size: u32,
    pub ps_bytecode_bulk_offset: u32,
    pub ps_bytecode_bulk_size: u32,
}

unsafe impl Pod for SnapshotDraw {}

/// Everything the publisher needs to serialize one frame.
pub struct FrameView<'a> {
    pub frame_id: u32,
    pub width: u32,
    pub height: u32,
    pub present_render_target_id: u32,
    pub replay_hash: u32,
    pub have_clear: bool,
    pub clear_flags: u32,
    pub clear_color_argb: u32,
    pub clear_z: f32,
    pub clear_stencil: u32,
    pub draws: &'a [DrawIndexedPacket],
}

static BULK_DROP_LOG_COUNTER: AtomicU32 = AtomicU32::new(0);

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Assembles and publishes frame snapshots to a file.
pub struct FramePublisher {
    path: PathBuf,
    region: Vec<u8>,
    sequence: u32,
}

impl FramePublisher {
    pub fn new<P: AsRef<Path>>(path: P) -> FramePublisher {
        FramePublisher {
            path: path.as_ref().to_path_buf(),
            region: vec![0; REGION_SIZE],
            sequence: 0,
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The assembled region of the most recent publish (readable in tests
    /// without going through the file).
    pub fn region(&self) -> &[u8] {
        &self.region
    }

    /// Serialize `frame` and write the region out. Blobs that no longer fit
    /// into the bulk section are dropped with a sampled log; their entries
    /// carry zero sizes so the viewer skips them.
    pub fn publish(&mut self, frame: &FrameView, uploads: &UploadArena) -> io::Result<()> {
        let header_size = mem::size_of::<SnapshotHeader>();
        let draw_size = mem::size_of::<SnapshotDraw>();
        let bulk_base = align_up(header_size + MAX_DRAWS * draw_size, 16);
        let mut bulk_cursor = bulk_base;

        for byte in self.region[..bulk_base].iter_mut() {
            *byte = 0;
        }

        let draw_count = frame.draws.len().min(MAX_DRAWS);
        for (index, packet) in frame.draws[..draw_count].iter().enumerate() {
            let entry = build_draw_entry(
                packet,
                uploads,
                &mut self.region[..],
                bulk_base,
                &mut bulk_cursor,
            );
            let at = header_size + index * draw_size;
            self.region[at..at + draw_size].copy_from_slice(as_byte_slice(&entry));
        }

        self.sequence = self.sequence.wrapping_add(1);
        let header = SnapshotHeader {
            magic: MAGIC,
            sequence: self.sequence,
            width: frame.width,
            height: frame.height,
            clear_color_argb: frame.clear_color_argb,
            clear_flags: frame.clear_flags,
            clear_z: frame.clear_z,
            clear_stencil: frame.clear_stencil,
            have_clear: if frame.have_clear { 1 } else { 0 },
            draw_count: draw_count as u32,
            replay_hash: frame.replay_hash,
            frame_id: frame.frame_id,
            present_render_target_id: frame.present_render_target_id,
            bulk_data_offset: bulk_base as u32,
            bulk_data_used: (bulk_cursor - bulk_base) as u32,
        };
        // The header (sequence included) is stored after everything else so
        // a reader that sees the new sequence sees a complete frame.
        self.region[..header_size].copy_from_slice(as_byte_slice(&header));

        fs::write(&self.path, &self.region)
    }
}

/// Copy `upload` into the bulk section, returning `(offset, size)` relative
/// to `bulk_data_offset`, or `(0, 0)` when the blob is empty, unresolvable
/// or does not fit.
fn push_bulk(upload: &UploadRef, uploads: &UploadArena, region: &mut [u8],
             bulk_base: usize, bulk_cursor: &mut usize) -> (u32, u32) {
    let bytes = match uploads.resolve(upload) {
        Some(bytes) => bytes,
        None => return (0, 0),
    };
    let end = match bulk_cursor.checked_add(bytes.len()) {
        Some(end) if end <= region.len() => end,
        _ => {
            if should_log_sample(&BULK_DROP_LOG_COUNTER, 4, 256) {
                warn!(
                    "bulk section full: dropping {} bytes at cursor {}",
                    bytes.len(),
                    *bulk_cursor
                );
            }
            return (0, 0);
        }
    };

    region[*bulk_cursor..end].copy_from_slice(bytes);
    let offset = (*bulk_cursor - bulk_base) as u32;
    *bulk_cursor = align_up(end, 16);
    (offset, bytes.len() as u32)
}

fn build_draw_entry(packet: &DrawIndexedPacket, uploads: &UploadArena, region: &mut [u8],
                    bulk_base: usize, bulk_cursor: &mut usize) -> SnapshotDraw {
    let mut entry = SnapshotDraw::default();

    entry.primitive_type = packet.primitive_type;
    entry.base_vertex = packet.base_vertex;
    entry.min_vertex_index = packet.min_vertex_index;
    entry.num_vertices = packet.num_vertices;
    entry.start_index = packet.start_index;
    entry.primitive_count = packet.primitive_count;
    entry.render_target_id = packet.render_target_id;
    entry.render_target_texture_id = packet.render_target_texture_id;
    entry.render_target_width = packet.render_target_width;
    entry.render_target_height = packet.render_target_height;
    entry.render_target_format = packet.render_target_format;

    entry.viewport_x = packet.viewport_x;
    entry.viewport_y = packet.viewport_y;
    entry.viewport_width = packet.viewport_width;
    entry.viewport_height = packet.viewport_height;
    entry.viewport_min_z = packet.viewport_min_z;
    entry.viewport_max_z = packet.viewport_max_z;

    entry.scissor_left = packet.scissor_left;
    entry.scissor_top = packet.scissor_top;
    entry.scissor_right = packet.scissor_right;
    entry.scissor_bottom = packet.scissor_bottom;

    entry.fvf = packet.fvf;
    entry.pixel_shader_id = packet.pixel_shader_id;
    entry.stream0_offset = packet.stream0_offset;
    entry.stream0_stride = packet.stream0_stride;
    entry.index_format = packet.index_format;

    entry.texture0_id = packet.tex_id[0];
    entry.texture0_generation = packet.tex_generation[0];
    entry.texture0_format = packet.tex_format[0];
    entry.texture0_width = packet.tex_width[0];
    entry.texture0_height = packet.tex_height[0];
    entry.texture0_pitch = packet.tex_pitch[0];

    entry.sampler0_min_filter = packet.sampler_min_filter[0];
    entry.sampler0_mag_filter = packet.sampler_mag_filter[0];
    entry.sampler0_mip_filter = packet.sampler_mip_filter[0];
    entry.sampler0_address_u = packet.sampler_address_u[0];
    entry.sampler0_address_v = packet.sampler_address_v[0];
    entry.sampler0_address_w = packet.sampler_address_w[0];

    entry.tss0_color_op = packet.tss0_color_op;
    entry.tss0_color_arg1 = packet.tss0_color_arg1;
    entry.tss0_color_arg2 = packet.tss0_color_arg2;
    entry.tss0_alpha_op = packet.tss0_alpha_op;
    entry.tss0_alpha_arg1 = packet.tss0_alpha_arg1;
    entry.tss0_alpha_arg2 = packet.tss0_alpha_arg2;
    entry.rs_texture_factor = packet.rs_texture_factor;

    entry.rs_alpha_blend_enable = packet.rs_alpha_blend_enable;
    entry.rs_src_blend = packet.rs_src_blend;
    entry.rs_dest_blend = packet.rs_dest_blend;
    entry.rs_alpha_test_enable = packet.rs_alpha_test_enable;
    entry.rs_alpha_ref = packet.rs_alpha_ref;
    entry.rs_alpha_func = packet.rs_alpha_func;

    let (vb_off, vb_size) =
        push_bulk(&packet.vertex_data, uploads, region, bulk_base, bulk_cursor);
    entry.vb_bulk_offset = vb_off;
    entry.vb_bulk_size = vb_size;

    let (ib_off, ib_size) =
        push_bulk(&packet.index_data, uploads, region, bulk_base, bulk_cursor);
    entry.ib_bulk_offset = ib_off;
    entry.ib_bulk_size = ib_size;

    let (tex_off, tex_size) =
        push_bulk(&packet.tex_data[0], uploads, region, bulk_base, bulk_cursor);
    entry.texture0_bulk_offset = tex_off;
    entry.texture0_bulk_size = tex_size;

    let (decl_off, _decl_size) =
        push_bulk(&packet.vertex_decl_data, uploads, region, bulk_base, bulk_cursor);
    entry.decl_bulk_offset = decl_off;
    entry.decl_count = packet.vertex_decl_count;

    let (vs_const_off, vs_const_size) =
        push_bulk(&packet.constants_vs, uploads, region, bulk_base, bulk_cursor);
    entry.vs_constants_bulk_offset = vs_const_off;
    entry.vs_constants_size = vs_const_size;

    let (ps_const_off, ps_const_size) =
        push_bulk(&packet.constants_ps, uploads, region, bulk_base, bulk_cursor);
    entry.ps_constants_bulk_offset = ps_const_off;
    entry.ps_constants_size = ps_const_size;

    entry.vertex_shader_id = packet.vertex_shader_id;
    let (vs_code_off, vs_code_size) =
        push_bulk(&packet.vs_bytecode, uploads, region, bulk_base, bulk_cursor);
    entry.vs_bytecode_bulk_offset = vs_code_off;
    entry.vs_bytecode_bulk_size = vs_code_size;

    let (ps_code_off, ps_code_size) =
        push_bulk(&packet.ps_bytecode, uploads, region, bulk_base, bulk_cursor);
    entry.ps_bytecode_bulk_offset = ps_code_off;
    entry.ps_bytecode_bulk_size = ps_code_size;

    entry
}

#[cfg(test)]
mod tests {
    use std::mem;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use packet::read_pod;

    static TEMP_SERIAL: AtomicU32 = AtomicU32::new(0);

    fn temp_path() -> std::path::PathBuf {
        let serial = TEMP_SERIAL.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("dx9mt_snapshot_test_{}_{}", std::process::id(), serial));
        path
    }

    fn frame_view<'a>(draws: &'a [DrawIndexedPacket]) -> FrameView<'a> {
        FrameView {
            frame_id: 1,
            width: 640,
            height: 480,
            present_render_target_id: 0x0100_0001,
            replay_hash: 0xABCD_EF01,
            have_clear: true,
            clear_flags: 3,
            clear_color_argb: 0x1122_3344,
            clear_z: 1.0,
            clear_stencil: 0,
            draws: draws,
        }
    }

    #[test]
    fn published_header_is_self_describing() {
        let path = temp_path();
        let mut publisher = FramePublisher::new(&path);
        let uploads = UploadArena::new(1024);

        publisher.publish(&frame_view(&[]), &uploads).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), REGION_SIZE);
        let header: SnapshotHeader = read_pod(&bytes).unwrap();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.sequence, 1);
        assert_eq!(header.draw_count, 0);
        assert_eq!(header.width, 640);
        assert_eq!(header.have_clear, 1);
        assert_eq!(header.replay_hash, 0xABCD_EF01);
        assert_eq!(
            header.bulk_data_offset as usize,
            (mem::size_of::<SnapshotHeader>() + MAX_DRAWS * mem::size_of::<SnapshotDraw>() + 15)
                & !15
        );

        publisher.publish(&frame_view(&[]), &uploads).unwrap();
        assert_eq!(publisher.sequence(), 2);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn draw_entries_resolve_bulk_blobs() {
        let path = temp_path();
        let mut publisher = FramePublisher::new(&path);
        let mut uploads = UploadArena::new(1024);

        let vertex_bytes = [0x11u8; 24];
        let index_bytes = [0x22u8; 12];

        let mut packet = DrawIndexedPacket::new(1);
        packet.render_target_id = 1;
        packet.vertex_buffer_id = 2;
        packet.index_buffer_id = 3;
        packet.fvf = 0x42;
        packet.tex_id[0] = 0x0300_0001;
        packet.vertex_data = uploads.copy(1, &vertex_bytes);
        packet.index_data = uploads.copy(1, &index_bytes);

        publisher.publish(&frame_view(&[packet]), &uploads).unwrap();

        let header: SnapshotHeader = read_pod(publisher.region()).unwrap();
        assert_eq!(header.draw_count, 1);

        let entry_at = mem::size_of::<SnapshotHeader>();
        let entry: SnapshotDraw = read_pod(&publisher.region()[entry_at..]).unwrap();
        assert_eq!(entry.fvf, 0x42);
        assert_eq!(entry.texture0_id, 0x0300_0001);
        assert_eq!(entry.vb_bulk_size, 24);
        assert_eq!(entry.ib_bulk_size, 12);

        let bulk = header.bulk_data_offset as usize;
        let vb_at = bulk + entry.vb_bulk_offset as usize;
        assert_eq!(&publisher.region()[vb_at..vb_at + 24], &vertex_bytes[..]);
        let ib_at = bulk + entry.ib_bulk_offset as usize;
        assert_eq!(&publisher.region()[ib_at..ib_at + 12], &index_bytes[..]);
        assert!(header.bulk_data_used >= 32 + 12);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn empty_refs_produce_zero_entries() {
        let path = temp_path();
        let mut publisher = FramePublisher::new(&path);
        let uploads = UploadArena::new(64);

        let mut packet = DrawIndexedPacket::new(1);
        packet.render_target_id = 1;
        publisher.publish(&frame_view(&[packet]), &uploads).unwrap();

        let entry_at = mem::size_of::<SnapshotHeader>();
        let entry: SnapshotDraw = read_pod(&publisher.region()[entry_at..]).unwrap();
        assert_eq!(entry.vb_bulk_size, 0);
        assert_eq!(entry.texture0_bulk_size, 0);
        assert_eq!(entry.vs_constants_size, 0);

        let _ = std::fs::remove_file(&path);
    }
}
