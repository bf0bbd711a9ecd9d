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

//! Vertex and index buffers.
//!
//! Both live entirely in system memory: the hosted program locks a byte
//! range, writes vertices or indices, and the recorder snapshots the whole
//! backing store into the upload arena at draw time.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

use format::Format;
use handle::{ObjectId, ObjectKind, PrivateData, Resource};
use texture::Pool;
use {mutex_lock, D3dResult, Error};

/// Creation description of a vertex buffer.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct VertexBufferDesc {
    pub size: u32,
    pub usage: u32,
    pub pool: Pool,
    pub fvf: u32,
}

/// Creation description of an index buffer.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct IndexBufferDesc {
    pub size: u32,
    pub usage: u32,
    pub pool: Pool,
    pub format: Format,
}

/// Locked byte range of a buffer. Dropping the guard is the unlock.
pub struct BufferLock<'a> {
    guard: MutexGuard<'a, Vec<u8>>,
    offset: usize,
    size: usize,
}

impl<'a> Deref for BufferLock<'a> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.guard[self.offset..self.offset + self.size]
    }
}

impl<'a> DerefMut for BufferLock<'a> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard[self.offset..self.offset + self.size]
    }
}

fn lock_range(data: &Mutex<Vec<u8>>, total: u32, offset: u32, size: u32)
              -> D3dResult<BufferLock> {
    if offset > total {
        return Err(Error::InvalidCall);
    }
    // Size 0 and over-long requests both mean "to the end".
    let mut size = size;
    if size == 0 || offset.checked_add(size).map_or(true, |end| end > total) {
        size = total - offset;
    }
    Ok(BufferLock {
        guard: mutex_lock(data),
        offset: offset as usize,
        size: size as usize,
    })
}

/// A vertex buffer with zero-initialized system-memory backing.
pub struct VertexBuffer {
    object_id: ObjectId,
    device_id: u32,
    desc: VertexBufferDesc,
    data: Mutex<Vec<u8>>,
    private: PrivateData,
}

impl VertexBuffer {
    pub fn new(device_id: u32, size: u32, usage: u32, fvf: u32, pool: Pool)
               -> D3dResult<VertexBuffer> {
        if size == 0 {
            return Err(Error::InvalidCall);
        }
        Ok(VertexBuffer {
            object_id: ObjectId::alloc(ObjectKind::Buffer),
            device_id: device_id,
            desc: VertexBufferDesc { size: size, usage: usage, pool: pool, fvf: fvf },
            data: Mutex::new(vec![0; size as usize]),
            private: PrivateData::new(),
        })
    }

    pub fn desc(&self) -> &VertexBufferDesc {
        &self.desc
    }

    pub fn lock(&self, offset: u32, size: u32) -> D3dResult<BufferLock> {
        lock_range(&self.data, self.desc.size, offset, size)
    }

    /// Run `f` over the full backing store (used by the draw recorder).
    pub fn with_data<R, F: FnOnce(&[u8]) -> R>(&self, f: F) -> R {
        let guard = mutex_lock(&self.data);
        f(&guard)
    }
}

impl Resource for VertexBuffer {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Buffer
    }
    fn private_data(&self) -> &PrivateData {
        &self.private
    }
    fn device_id(&self) -> u32 {
        self.device_id
    }
}

/// An index buffer with zero-initialized system-memory backing.
pub struct IndexBuffer {
    object_id: ObjectId,
    device_id: u32,
    desc: IndexBufferDesc,
    data: Mutex<Vec<u8>>,
    private: PrivateData,
}

impl IndexBuffer {
    pub fn new(device_id: u32, size: u32, usage: u32, format: Format, pool: Pool)
               -> D3dResult<IndexBuffer> {
        if size == 0 {
            return Err(Error::InvalidCall);
        }
        Ok(IndexBuffer {
            object_id: ObjectId::alloc(ObjectKind::Buffer),
            device_id: device_id,
            desc: IndexBufferDesc { size: size, usage: usage, pool: pool, format: format },
            data: Mutex::new(vec![0; size as usize]),
            private: PrivateData::new(),
        })
    }

    pub fn desc(&self) -> &IndexBufferDesc {
        &self.desc
    }

    pub fn lock(&self, offset: u32, size: u32) -> D3dResult<BufferLock> {
        lock_range(&self.data, self.desc.size, offset, size)
    }

    pub fn with_data<R, F: FnOnce(&[u8]) -> R>(&self, f: F) -> R {
        let guard = mutex_lock(&self.data);
        f(&guard)
    }
}

impl Resource for IndexBuffer {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }
    fn kind(&self) -> ObjectKind {
        ObjectKind::Buffer
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
    fn lock_writes_are_visible_to_the_recorder() {
        let vb = VertexBuffer::new(1, 64, 0, 0, Pool::Managed).unwrap();
        {
            let mut lock = vb.lock(16, 4).unwrap();
            lock.copy_from_slice(&[1, 2, 3, 4]);
        }
        vb.with_data(|bytes| {
            assert_eq!(&bytes[16..20], &[1, 2, 3, 4]);
            assert_eq!(bytes[0], 0);
        });
    }

    #[test]
    fn lock_clamps_and_validates_the_range() {
        let ib = IndexBuffer::new(1, 32, 0, Format::INDEX16, Pool::Managed).unwrap();
        assert!(ib.lock(33, 0).is_err());
        assert_eq!(ib.lock(0, 0).unwrap().len(), 32);
        assert_eq!(ib.lock(8, 1000).unwrap().len(), 24);
    }

    #[test]
    fn zero_length_buffers_are_rejected() {
        assert!(VertexBuffer::new(1, 0, 0, 0, Pool::Default).is_err());
        assert!(IndexBuffer::new(1, 0, 0, Format::INDEX16, Pool::Default).is_err());
    }
}
