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

//! End-to-end recording: a device drives full frames into a private
//! runtime and the sink's view of each frame is checked.

extern crate dx9mt;
extern crate env_logger;

use std::sync::Arc;

use dx9mt::attrib::{decl_type, decl_usage, VertexElement, END_ELEMENT};
use dx9mt::bridge::InitDesc;
use dx9mt::device::{BaseTexture, BehaviorFlags, ClearFlags, Device, PresentParameters,
                    PrimitiveType};
use dx9mt::format::Format;
use dx9mt::runtime::Runtime;
use dx9mt::texture::{Pool, Usage};

fn frame_runtime() -> Arc<Runtime> {
    let _ = env_logger::try_init();
    Runtime::new(InitDesc::default())
}

fn device_on(runtime: Arc<Runtime>) -> Device {
    let params = PresentParameters {
        backbuffer_width: 320,
        backbuffer_height: 240,
        ..Default::default()
    };
    Device::with_runtime(runtime, 0, BehaviorFlags::SOFTWARE_VERTEXPROCESSING, &params)
        .unwrap()
}

/// Minimal valid vertex shader: `vs_3_0; mov oPos, c0; end` encoded by
/// hand (rastout 0 destination, const 0 source).
fn tiny_vs_bytecode() -> Vec<u32> {
    vec![
        0xFFFE_0300,
        1, // mov
        0x8000_0000 | (4 << 28) | (0xF << 16),
        0x8000_0000 | (2 << 28) | (0xE4 << 16),
        0x0000_FFFF,
    ]
}

/// Minimal valid pixel shader: `ps_3_0; mov oC0, c0; end`.
fn tiny_ps_bytecode() -> Vec<u32> {
    vec![
        0xFFFF_0300,
        1, // mov
        0x8000_0000 | (0 << 28) | (1 << 11) | (0xF << 16),
        0x8000_0000 | (2 << 28) | (0xE4 << 16),
        0x0000_FFFF,
    ]
}

#[test]
fn a_full_frame_reaches_the_sink_intact() {
    let runtime = frame_runtime();
    let mut device = device_on(runtime.clone());

    let vb = device.create_vertex_buffer(3 * 20, 0, 0, Pool::Managed).unwrap();
    {
        let mut lock = vb.lock(0, 0).unwrap();
        lock[0] = 0x10;
    }
    let ib = device.create_index_buffer(6, 0, Format::INDEX16, Pool::Managed).unwrap();
    let decl = device
        .create_vertex_declaration(&[
            VertexElement::new(0, decl_type::FLOAT3, decl_usage::POSITION, 0),
            VertexElement::new(12, decl_type::FLOAT2, decl_usage::TEXCOORD, 0),
            END_ELEMENT,
        ])
        .unwrap();
    let vs = device.create_vertex_shader(&tiny_vs_bytecode()).unwrap();
    let ps = device.create_pixel_shader(&tiny_ps_bytecode()).unwrap();
    let texture = device
        .create_texture(4, 4, 1, Usage::empty(), Format::A8R8G8B8, Pool::Managed)
        .unwrap();
    {
        let mut lock = texture.lock_level(0).unwrap();
        lock[0] = 0x5A;
    }

    device.set_stream_source(0, Some(vb), 0, 20).unwrap();
    device.set_indices(Some(ib));
    device.set_vertex_declaration(Some(decl));
    device.set_vertex_shader(Some(vs));
    device.set_pixel_shader(Some(ps));
    device.set_texture(0, Some(BaseTexture::Tex2d(texture))).unwrap();
    device
        .set_vertex_shader_constant_f(0, &[[1.0, 0.0, 0.0, 1.0]])
        .unwrap();

    device.begin_scene().unwrap();
    device
        .clear(&[], ClearFlags::TARGET | ClearFlags::ZBUFFER, 0x2040_60FF, 1.0, 0)
        .unwrap();
    device.draw_indexed(PrimitiveType::TriangleList, 0, 0, 3, 0, 1).unwrap();
    device.draw_indexed(PrimitiveType::TriangleList, 0, 0, 3, 3, 1).unwrap();
    device.end_scene().unwrap();

    {
        let bridge = runtime.bridge.lock().unwrap();
        let stats = bridge.frame_stats();
        assert!(bridge.is_frame_open());
        assert_eq!(stats.draw_indexed_count, 2);
        assert_eq!(stats.clear_count, 1);
        assert_eq!(stats.last_clear_color, 0x2040_60FF);
        assert!(stats.have_clear);
    }

    device.present().unwrap();
    assert_eq!(device.frame_id(), 2);

    {
        let bridge = runtime.bridge.lock().unwrap();
        assert!(!bridge.is_frame_open());
        assert!(bridge.last_replay_hash() != 0);
    }
}

#[test]
fn frames_keep_flowing_after_present() {
    let runtime = frame_runtime();
    let mut device = device_on(runtime.clone());

    let vb = device.create_vertex_buffer(64, 0, 0, Pool::Managed).unwrap();
    let ib = device.create_index_buffer(12, 0, Format::INDEX16, Pool::Managed).unwrap();
    device.set_stream_source(0, Some(vb), 0, 16).unwrap();
    device.set_indices(Some(ib));
    device.set_fvf(0x102);

    for expected_frame in 1..4u32 {
        assert_eq!(device.frame_id(), expected_frame);
        device.begin_scene().unwrap();
        device.draw_indexed(PrimitiveType::TriangleList, 0, 0, 3, 0, 1).unwrap();
        device.end_scene().unwrap();
        device.present().unwrap();
    }
    assert_eq!(device.frame_id(), 4);

    let bridge = runtime.bridge.lock().unwrap();
    assert_eq!(bridge.frame_stats().draw_indexed_count, 1);
}

#[test]
fn draw_without_scene_is_still_recorded() {
    // The original runtime tolerates draws outside begin/end scene pairs;
    // the sink only warns about the missing frame boundary.
    let runtime = frame_runtime();
    let mut device = device_on(runtime.clone());

    let vb = device.create_vertex_buffer(64, 0, 0, Pool::Managed).unwrap();
    let ib = device.create_index_buffer(12, 0, Format::INDEX16, Pool::Managed).unwrap();
    device.set_stream_source(0, Some(vb), 0, 16).unwrap();
    device.set_indices(Some(ib));
    device.set_fvf(0x102);

    device.draw_indexed(PrimitiveType::TriangleList, 0, 0, 3, 0, 1).unwrap();
    let bridge = runtime.bridge.lock().unwrap();
    assert_eq!(bridge.frame_stats().draw_indexed_count, 1);
}

#[test]
fn state_block_hash_is_stable_for_identical_state() {
    let runtime = frame_runtime();
    let mut device = device_on(runtime.clone());

    let vb = device.create_vertex_buffer(64, 0, 0, Pool::Managed).unwrap();
    let ib = device.create_index_buffer(12, 0, Format::INDEX16, Pool::Managed).unwrap();
    device.set_stream_source(0, Some(vb), 0, 16).unwrap();
    device.set_indices(Some(ib));
    device.set_fvf(0x102);

    device.begin_scene().unwrap();
    device.draw_indexed(PrimitiveType::TriangleList, 0, 0, 3, 0, 1).unwrap();
    device.draw_indexed(PrimitiveType::TriangleList, 0, 0, 3, 6, 1).unwrap();
    device.end_scene().unwrap();
    device.present().unwrap();

    // Two draws with identical state fold to the same per-draw hash, so
    // the frame replay hash equals folding that hash twice.
    let bridge = runtime.bridge.lock().unwrap();
    let replay = bridge.last_replay_hash();
    assert!(replay != 0);
    drop(bridge);

    // A state change in the next frame changes the replay fingerprint.
    device.begin_scene().unwrap();
    device.set_render_state(22, 2).unwrap(); // cull mode
    device.draw_indexed(PrimitiveType::TriangleList, 0, 0, 3, 0, 1).unwrap();
    device.draw_indexed(PrimitiveType::TriangleList, 0, 0, 3, 6, 1).unwrap();
    device.end_scene().unwrap();
    device.present().unwrap();

    let bridge = runtime.bridge.lock().unwrap();
    assert!(bridge.last_replay_hash() != replay);
}

#[test]
fn device_errors_do_not_poison_the_stream() {
    let runtime = frame_runtime();
    let mut device = device_on(runtime.clone());

    // Invalid state index fails locally without touching the sink.
    assert!(device.set_render_state(4096, 1).is_err());
    assert!(device.set_sampler_state(99, 0, 0).is_err());

    let vb = device.create_vertex_buffer(64, 0, 0, Pool::Managed).unwrap();
    let ib = device.create_index_buffer(12, 0, Format::INDEX16, Pool::Managed).unwrap();
    device.set_stream_source(0, Some(vb), 0, 16).unwrap();
    device.set_indices(Some(ib));
    device.set_fvf(0x102);

    device.begin_scene().unwrap();
    device.draw_indexed(PrimitiveType::TriangleList, 0, 0, 3, 0, 1).unwrap();
    device.end_scene().unwrap();
    device.present().unwrap();

    let bridge = runtime.bridge.lock().unwrap();
    assert!(!bridge.is_frame_open());
}
