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

//! Shader resources: validated, owned copies of SM bytecode.
//!
//! Creation only checks the stream's framing (version token, END token);
//! full decoding happens in [`sm3`](::sm3) when the backend asks for
//! translation.

use handle::{ObjectId, ObjectKind, PrivateData, Resource};
use {D3dResult, Error};

/// Upper half of a vertex shader version token.
pub const VERSION_VS: u32 = 0xFFFE_0000;
/// Upper half of a pixel shader version token.
pub const VERSION_PS: u32 = 0xFFFF_0000;
/// End-of-stream token.
pub const END_TOKEN: u32 = 0x0000_FFFF;
/// Scan limit; generous next to SM3.0's 32768 instruction slots.
pub const MAX_SCAN_DWORDS: usize = 1 << 16;

/// Measure a shader blob: validate the version token, then find the END
/// token within the scan limit. Returns the dword count including END.
pub fn shader_dword_count(bytecode: &[u32]) -> Option<usize> {
    let version = match bytecode.first() {
        Some(&token) => token,
        None => return None,
    };
    if version & 0xFFFF_0000 != VERSION_VS && version & 0xFFFF_0000 != VERSION_PS {
        warn!("shader bytecode bad version token: {:#010x}", version);
        return None;
    }

    let limit = bytecode.len().min(MAX_SCAN_DWORDS);
    for index in 1..limit {
        if bytecode[index] == END_TOKEN {
            return Some(index + 1);
        }
    }

    warn!(
        "shader bytecode END token not found within {} dwords (version={:#010x})",
        limit, version
    );
    None
}

fn copy_shader_blob(bytecode: &[u32]) -> D3dResult<Box<[u32]>> {
    let count = shader_dword_count(bytecode).ok_or(Error::InvalidCall)?;
    Ok(bytecode[..count].to_vec().into_boxed_slice())
}

/// A vertex shader and its owned bytecode.
pub struct VertexShader {
    object_id: ObjectId,
    device_id: u32,
    bytecode: Box<[u32]>,
    private: PrivateData,
}

impl VertexShader {
    pub fn new(device_id: u32, bytecode: &[u32]) -> D3dResult<VertexShader> {
        Ok(VertexShader {
            object_id: ObjectId::alloc(ObjectKind::VertexShader),
            device_id: device_id,
            bytecode: copy_shader_blob(bytecode)?,
            private: PrivateData::new(),
        })
    }

    pub fn bytecode(&self) -> &[u32] {
        &self.bytecode
    }
}

impl Resource for VertexShader {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::VertexShader
    }
    fn private_data(&self) -> &PrivateData {
        &self.private
    }
    fn device_id(&self) -> u32 {
        self.device_id
    }
}

/// A pixel shader and its owned bytecode.
pub struct PixelShader {
    object_id: ObjectId,
    device_id: u32,
    bytecode: Box<[u32]>,
    private: PrivateData,
}

impl PixelShader {
    pub fn new(device_id: u32, bytecode: &[u32]) -> D3dResult<PixelShader> {
        Ok(PixelShader {
            object_id: ObjectId::alloc(ObjectKind::PixelShader),
            device_id: device_id,
            bytecode: copy_shader_blob(bytecode)?,
            private: PrivateData::new(),
        })
    }

    pub fn bytecode(&self) -> &[u32] {
        &self.bytecode
    }
}

impl Resource for PixelShader {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::PixelShader
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

    #[test]
    fn counts_to_the_end_token() {
        let code = [0xFFFE_0300, 0x0000_0000, END_TOKEN, 0xDEAD_BEEF];
        assert_eq!(shader_dword_count(&code), Some(3));
    }

    #[test]
    fn rejects_bad_version_tokens() {
        assert_eq!(shader_dword_count(&[0x1234_5678, END_TOKEN]), None);
        assert_eq!(shader_dword_count(&[]), None);
    }

    #[test]
    fn rejects_missing_end_token() {
        let code = [0xFFFF_0300, 0x0000_0001, 0x0000_0002];
        assert_eq!(shader_dword_count(&code), None);
    }

    #[test]
    fn shaders_own_a_trimmed_copy() {
        let code = [0xFFFE_0300, END_TOKEN, 0x1111_1111];
        let shader = VertexShader::new(1, &code).unwrap();
        assert_eq!(shader.bytecode(), &[0xFFFE_0300, END_TOKEN]);

        let ps = PixelShader::new(1, &[0xFFFF_0300, END_TOKEN]).unwrap();
        assert_eq!(ps.bytecode().len(), 2);

        assert!(VertexShader::new(1, &[0xFFFF_FFFF]).is_err());
    }
}
