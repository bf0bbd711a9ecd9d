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

//! Vertex attribute layouts: element records, declarations, and the
//! synthesis of an explicit element list from a legacy FVF bitmask.

use smallvec::SmallVec;

use handle::{ObjectId, ObjectKind, PrivateData, Resource};
use packet::Pod;
use {D3dResult, Error};

/// Vertex element types (D3DDECLTYPE).
pub mod decl_type {
    pub const FLOAT1: u8 = 0;
    pub const FLOAT2: u8 = 1;
    pub const FLOAT3: u8 = 2;
    pub const FLOAT4: u8 = 3;
    pub const D3DCOLOR: u8 = 4;
    pub const UBYTE4: u8 = 5;
    pub const SHORT2: u8 = 6;
    pub const SHORT4: u8 = 7;
    pub const UNUSED: u8 = 17;
}

/// Vertex element usages (D3DDECLUSAGE).
pub mod decl_usage {
    pub const POSITION: u8 = 0;
    pub const BLENDWEIGHT: u8 = 1;
    pub const BLENDINDICES: u8 = 2;
    pub const NORMAL: u8 = 3;
    pub const PSIZE: u8 = 4;
    pub const TEXCOORD: u8 = 5;
    pub const TANGENT: u8 = 6;
    pub const BINORMAL: u8 = 7;
    pub const TESSFACTOR: u8 = 8;
    pub const POSITIONT: u8 = 9;
    pub const COLOR: u8 = 10;
    pub const FOG: u8 = 11;
    pub const DEPTH: u8 = 12;
    pub const SAMPLE: u8 = 13;
}

/// FVF bitmask fields (D3DFVF).
pub mod fvf {
    pub const XYZ: u32 = 0x002;
    pub const XYZRHW: u32 = 0x004;
    pub const XYZB1: u32 = 0x006;
    pub const XYZB5: u32 = 0x00E;
    pub const XYZW: u32 = 0x4002;
    pub const POSITION_MASK: u32 = 0x400E;
    pub const NORMAL: u32 = 0x010;
    pub const PSIZE: u32 = 0x020;
    pub const DIFFUSE: u32 = 0x040;
    pub const SPECULAR: u32 = 0x080;
    pub const TEXCOUNT_MASK: u32 = 0xF00;
    pub const TEXCOUNT_SHIFT: u32 = 8;
}

/// One vertex element record, binary-compatible with `D3DVERTEXELEMENT9`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct VertexElement {
    pub stream: u16,
    pub offset: u16,
    pub element_type: u8,
    pub method: u8,
    pub usage: u8,
    pub usage_index: u8,
}

unsafe impl Pod for VertexElement {}

/// End-of-declaration sentinel (`D3DDECL_END`).
pub const END_ELEMENT: VertexElement = VertexElement {
    stream: 0xFF,
    offset: 0,
    element_type: decl_type::UNUSED,
    method: 0,
    usage: 0,
    usage_index: 0,
};

impl VertexElement {
    pub fn new(offset: u16, element_type: u8, usage: u8, usage_index: u8) -> VertexElement {
        VertexElement {
            stream: 0,
            offset: offset,
            element_type: element_type,
            method: 0,
            usage: usage,
            usage_index: usage_index,
        }
    }

    pub fn is_end(&self) -> bool {
        self.stream == 0xFF && self.element_type == decl_type::UNUSED
    }
}

/// An owned vertex declaration, sentinel included.
pub struct VertexDeclaration {
    object_id: ObjectId,
    device_id: u32,
    elements: Box<[VertexElement]>,
    private: PrivateData,
}

impl VertexDeclaration {
    /// Copies `elements` up to and including the end sentinel. Lists longer
    /// than 128 elements before the sentinel are rejected.
    pub fn new(device_id: u32, elements: &[VertexElement]) -> D3dResult<VertexDeclaration> {
        let mut count = 0;
        loop {
            match elements.get(count) {
                Some(element) if element.is_end() => break,
                Some(_) => {
                    count += 1;
                    if count > 128 {
                        return Err(Error::InvalidCall);
                    }
                }
                None => return Err(Error::InvalidCall),
            }
        }
        let owned: Vec<VertexElement> = elements[..count + 1].to_vec();
        Ok(VertexDeclaration {
            object_id: ObjectId::alloc(ObjectKind::VertexDecl),
            device_id: device_id,
            elements: owned.into_boxed_slice(),
            private: PrivateData::new(),
        })
    }

    /// All elements, end sentinel included.
    pub fn elements(&self) -> &[VertexElement] {
        &self.elements
    }

    /// Element count, end sentinel included.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

impl Resource for VertexDeclaration {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::VertexDecl
    }
    fn private_data(&self) -> &PrivateData {
        &self.private
    }
    fn device_id(&self) -> u32 {
        self.device_id
    }
}

/// Element list produced by FVF synthesis; no sentinel is appended because
/// consumers receive an explicit count.
pub type SynthesizedElements = SmallVec<[VertexElement; 16]>;

/// Expand an FVF bitmask into explicit vertex elements in declaration
/// order: position, blend weights, normal, point size, diffuse, specular,
/// then texture coordinates with per-channel widths from the format bits.
pub fn fvf_to_vertex_elements(fvf_code: u32) -> SynthesizedElements {
    let mut elements = SynthesizedElements::new();
    if fvf_code == 0 {
        return elements;
    }

    let mut offset: u16 = 0;
    let pos_type = fvf_code & fvf::POSITION_MASK;

    if pos_type == fvf::XYZRHW {
        elements.push(VertexElement::new(offset, decl_type::FLOAT4, decl_usage::POSITIONT, 0));
        offset += 16;
    } else if pos_type == fvf::XYZ || pos_type == fvf::XYZW {
        let (ty, size) = if pos_type == fvf::XYZW {
            (decl_type::FLOAT4, 16)
        } else {
            (decl_type::FLOAT3, 12)
        };
        elements.push(VertexElement::new(offset, ty, decl_usage::POSITION, 0));
        offset += size;
    } else if pos_type >= fvf::XYZB1 && pos_type <= fvf::XYZB5 {
        elements.push(VertexElement::new(offset, decl_type::FLOAT3, decl_usage::POSITION, 0));
        offset += 12;
        let blend_count = (pos_type - fvf::XYZ) / 2;
        if blend_count > 0 {
            let ty = match blend_count {
                1 => decl_type::FLOAT1,
                2 => decl_type::FLOAT2,
                3 => decl_type::FLOAT3,
                _ => decl_type::FLOAT4,
            };
            elements.push(VertexElement::new(offset, ty, decl_usage::BLENDWEIGHT, 0));
        }
        offset += (blend_count * 4) as u16;
    }

    if fvf_code & fvf::NORMAL != 0 {
        elements.push(VertexElement::new(offset, decl_type::FLOAT3, decl_usage::NORMAL, 0));
        offset += 12;
    }

    if fvf_code & fvf::PSIZE != 0 {
        elements.push(VertexElement::new(offset, decl_type::FLOAT1, decl_usage::PSIZE, 0));
        offset += 4;
    }

    if fvf_code & fvf::DIFFUSE != 0 {
        elements.push(VertexElement::new(offset, decl_type::D3DCOLOR, decl_usage::COLOR, 0));
        offset += 4;
    }

    if fvf_code & fvf::SPECULAR != 0 {
        elements.push(VertexElement::new(offset, decl_type::D3DCOLOR, decl_usage::COLOR, 1));
        offset += 4;
    }

    let tex_count = (fvf_code & fvf::TEXCOUNT_MASK) >> fvf::TEXCOUNT_SHIFT;
    for index in 0..tex_count {
        let format_bits = (fvf_code >> (16 + index * 2)) & 0x3;
        let (ty, size) = match format_bits {
            0 => (decl_type::FLOAT2, 8),
            1 => (decl_type::FLOAT3, 12),
            2 => (decl_type::FLOAT4, 16),
            _ => (decl_type::FLOAT1, 4),
        };
        elements.push(VertexElement::new(offset, ty, decl_usage::TEXCOORD, index as u8));
        offset += size;
    }

    elements
}

#[cfg(test)]
mod tests {
    use super::*;

    const FVF_TEX1: u32 = 1 << fvf::TEXCOUNT_SHIFT;

    #[test]
    fn xyz_diffuse_tex1_layout() {
        let elements = fvf_to_vertex_elements(fvf::XYZ | fvf::DIFFUSE | FVF_TEX1);
        assert_eq!(elements.len(), 3);
        assert_eq!(elements[0].usage, decl_usage::POSITION);
        assert_eq!(elements[0].element_type, decl_type::FLOAT3);
        assert_eq!(elements[0].offset, 0);
        assert_eq!(elements[1].usage, decl_usage::COLOR);
        assert_eq!(elements[1].element_type, decl_type::D3DCOLOR);
        assert_eq!(elements[1].offset, 12);
        assert_eq!(elements[2].usage, decl_usage::TEXCOORD);
        assert_eq!(elements[2].element_type, decl_type::FLOAT2);
        assert_eq!(elements[2].offset, 16);
    }

    #[test]
    fn xyzrhw_maps_to_positiont() {
        let elements = fvf_to_vertex_elements(fvf::XYZRHW | fvf::DIFFUSE);
        assert_eq!(elements[0].usage, decl_usage::POSITIONT);
        assert_eq!(elements[0].element_type, decl_type::FLOAT4);
        assert_eq!(elements[1].offset, 16);
    }

    #[test]
    fn texcoord_format_bits_select_width() {
        // Two texcoord sets, channel 1 flagged as 3-component.
        let fvf_code = fvf::XYZ | (2 << fvf::TEXCOUNT_SHIFT) | (1 << 18);
        let elements = fvf_to_vertex_elements(fvf_code);
        assert_eq!(elements[1].element_type, decl_type::FLOAT2);
        assert_eq!(elements[2].element_type, decl_type::FLOAT3);
        assert_eq!(elements[2].usage_index, 1);
    }

    #[test]
    fn empty_fvf_yields_nothing() {
        assert!(fvf_to_vertex_elements(0).is_empty());
    }

    #[test]
    fn declaration_requires_sentinel() {
        let elements = [VertexElement::new(0, decl_type::FLOAT3, decl_usage::POSITION, 0)];
        assert_eq!(VertexDeclaration::new(1, &elements).err(), Some(Error::InvalidCall));

        let with_end = [elements[0], END_ELEMENT];
        let decl = VertexDeclaration::new(1, &with_end).unwrap();
        assert_eq!(decl.element_count(), 2);
        assert!(decl.elements()[1].is_end());
    }
}
