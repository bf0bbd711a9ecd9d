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

//! Surface transfer semantics through the device API, with the DXT block
//! constraints the backend depends on.

extern crate dx9mt;

use std::sync::Arc;

use dx9mt::bridge::InitDesc;
use dx9mt::device::{BehaviorFlags, Device, PresentParameters};
use dx9mt::format::Format;
use dx9mt::runtime::Runtime;
use dx9mt::state::Rect;
use dx9mt::texture::{Pool, Surface};
use dx9mt::Error;

fn test_device() -> Device {
    let runtime = Runtime::new(InitDesc::default());
    let params = PresentParameters {
        backbuffer_width: 64,
        backbuffer_height: 64,
        ..Default::default()
    };
    Device::with_runtime(runtime, 0, BehaviorFlags::empty(), &params).unwrap()
}

fn offscreen(device: &Device, width: u32, height: u32, format: Format) -> Arc<Surface> {
    device
        .create_offscreen_plain_surface(width, height, format, Pool::SystemMem)
        .unwrap()
}

fn fill_pattern(surface: &Surface, seed: u8) {
    let mut lock = surface.lock().unwrap();
    for (index, byte) in lock.iter_mut().enumerate() {
        *byte = seed.wrapping_add((index & 0x3F) as u8);
    }
}

fn read_bytes(surface: &Surface) -> Vec<u8> {
    let lock = surface.lock().unwrap();
    lock.to_vec()
}

#[test]
fn linear_full_surface_copy_is_byte_exact() {
    let device = test_device();
    let src = offscreen(&device, 8, 8, Format::A8R8G8B8);
    let dst = offscreen(&device, 8, 8, Format::A8R8G8B8);

    fill_pattern(&src, 0x40);
    device.update_surface(&src, None, &dst, None).unwrap();

    assert_eq!(read_bytes(&src), read_bytes(&dst));
}

#[test]
fn dxt_subrect_copy_moves_exactly_one_block() {
    let device = test_device();
    let src = offscreen(&device, 16, 16, Format::DXT1);
    let dst = offscreen(&device, 16, 16, Format::DXT1);

    fill_pattern(&src, 0x80);
    {
        let mut lock = dst.lock().unwrap();
        for byte in lock.iter_mut() {
            *byte = 0xCD;
        }
    }
    let expected_block: Vec<u8> = read_bytes(&src)[..8].to_vec();

    device
        .update_surface(&src, Some(Rect::new(0, 0, 4, 4)), &dst, Some((0, 0)))
        .unwrap();

    let dst_bytes = read_bytes(&dst);
    assert_eq!(&dst_bytes[..8], &expected_block[..]);
    // Nothing outside the first 8-byte block may be touched.
    assert!(dst_bytes[8..].iter().all(|&byte| byte == 0xCD));
}

#[test]
fn dxt_misaligned_rect_is_refused() {
    let device = test_device();
    let src = offscreen(&device, 16, 16, Format::DXT1);
    let dst = offscreen(&device, 16, 16, Format::DXT1);

    let misaligned = Rect::new(1, 0, 5, 4);
    assert_eq!(
        device.update_surface(&src, Some(misaligned), &dst, Some((0, 0))),
        Err(Error::InvalidCall)
    );
    // A misaligned destination point is just as invalid.
    assert_eq!(
        device.update_surface(&src, Some(Rect::new(0, 0, 4, 4)), &dst, Some((2, 0))),
        Err(Error::InvalidCall)
    );
}

#[test]
fn dxt_scaling_is_refused_even_when_allowed() {
    let device = test_device();
    let src = offscreen(&device, 16, 16, Format::DXT5);
    let dst = offscreen(&device, 16, 16, Format::DXT5);

    assert_eq!(
        device.stretch_rect(&src, Some(Rect::new(0, 0, 8, 8)), &dst,
                            Some(Rect::new(0, 0, 16, 16))),
        Err(Error::InvalidCall)
    );
}

#[test]
fn dxt5_odd_dimensions_copy_via_the_full_surface_path() {
    let device = test_device();
    let src = offscreen(&device, 6, 6, Format::DXT5);
    let dst = offscreen(&device, 6, 6, Format::DXT5);

    fill_pattern(&src, 0x11);
    device.update_surface(&src, None, &dst, None).unwrap();

    // 6x6 DXT5 = 2x2 blocks of 16 bytes.
    let bytes = read_bytes(&dst);
    assert_eq!(bytes.len(), 64);
    assert_eq!(bytes, read_bytes(&src));
}

#[test]
fn stretch_rect_scales_linear_surfaces() {
    let device = test_device();
    let src = offscreen(&device, 4, 4, Format::A8R8G8B8);
    let dst = offscreen(&device, 8, 8, Format::A8R8G8B8);

    device.color_fill(&src, None, 0xFF00_00FF).unwrap();
    device.stretch_rect(&src, None, &dst, None).unwrap();

    let bytes = read_bytes(&dst);
    assert_eq!(&bytes[..4], &0xFF00_00FFu32.to_le_bytes());
    assert_eq!(&bytes[bytes.len() - 4..], &0xFF00_00FFu32.to_le_bytes());
}

#[test]
fn color_fill_rejects_compressed_surfaces() {
    let device = test_device();
    let dxt = offscreen(&device, 8, 8, Format::DXT3);
    assert_eq!(device.color_fill(&dxt, None, 0), Err(Error::InvalidCall));
}

#[test]
fn mismatched_pixel_width_is_refused() {
    let device = test_device();
    let wide = offscreen(&device, 8, 8, Format::A8R8G8B8);
    let narrow = offscreen(&device, 8, 8, Format::R5G6B5);
    assert_eq!(device.update_surface(&wide, None, &narrow, None), Err(Error::InvalidCall));
}

#[test]
fn update_texture_copies_shared_levels() {
    let device = test_device();
    use dx9mt::device::BaseTexture;
    use dx9mt::texture::Usage;

    let src = device
        .create_texture(8, 8, 2, Usage::empty(), Format::A8R8G8B8, Pool::SystemMem)
        .unwrap();
    let dst = device
        .create_texture(8, 8, 3, Usage::empty(), Format::A8R8G8B8, Pool::Managed)
        .unwrap();

    {
        let mut lock = src.lock_level(0).unwrap();
        lock[0] = 0xAA;
    }
    {
        let mut lock = src.lock_level(1).unwrap();
        lock[0] = 0xBB;
    }

    device
        .update_texture(&BaseTexture::Tex2d(src), &BaseTexture::Tex2d(dst.clone()))
        .unwrap();

    assert_eq!(dst.lock_level(0).unwrap()[0], 0xAA);
    assert_eq!(dst.lock_level(1).unwrap()[0], 0xBB);
    // The third level had no source counterpart and stays zeroed.
    assert_eq!(dst.lock_level(2).unwrap()[0], 0x00);
}

#[test]
fn render_target_data_flows_back_to_system_memory() {
    let device = test_device();
    let rt = device
        .create_render_target(8, 8, Format::X8R8G8B8, 0, 0, false)
        .unwrap();
    let sysmem = offscreen(&device, 8, 8, Format::X8R8G8B8);

    device.color_fill(&rt, None, 0x00FF_7F3F).unwrap();
    device.get_render_target_data(&rt, &sysmem).unwrap();

    let bytes = read_bytes(&sysmem);
    assert_eq!(&bytes[..4], &0x00FF_7F3Fu32.to_le_bytes());
}
