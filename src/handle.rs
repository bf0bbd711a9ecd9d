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

//! Handles to tracked resources.
//!
//! Every resource carries an opaque 32-bit object id of the form
//! `{kind:8, serial:24}`. Serials are per-kind, handed out by module-global
//! atomic counters, and never reused within a process. Object ids are the
//! only resource identity that crosses the packet boundary; the handles
//! themselves are `Arc`-shared and never leave the process.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use mutex_lock;

/// Resource kind tag, the upper byte of an object id.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ObjectKind {
    Invalid = 0,
    Surface = 1,
    Buffer = 2,
    Texture = 3,
    SwapChain = 4,
    VertexShader = 5,
    PixelShader = 6,
    Query = 7,
    VertexDecl = 8,
}

const KIND_COUNT: usize = 8;

static SERIALS: [AtomicU32; KIND_COUNT] = [
    AtomicU32::new(0),
    AtomicU32::new(0),
    AtomicU32::new(0),
    AtomicU32::new(0),
    AtomicU32::new(0),
    AtomicU32::new(0),
    AtomicU32::new(0),
    AtomicU32::new(0),
];

/// Opaque resource identity: `{kind:8, serial:24}`. Serial 0 means
/// "no object" and is what [`ObjectId::NONE`] carries.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct ObjectId(u32);

impl ObjectId {
    pub const NONE: ObjectId = ObjectId(0);

    /// Allocate the next id of the given kind. The 24-bit serial skips zero
    /// on wrap so a live id can never read as "no object".
    pub fn alloc(kind: ObjectKind) -> ObjectId {
        if kind == ObjectKind::Invalid {
            return ObjectId::NONE;
        }
        let slot = kind as usize - 1;
        let mut serial = SERIALS[slot].fetch_add(1, Ordering::Relaxed).wrapping_add(1) & 0x00FF_FFFF;
        if serial == 0 {
            serial = 1;
        }
        ObjectId(((kind as u32) << 24) | serial)
    }

    /// Rebuild an id from its packed wire form.
    pub fn from_raw(raw: u32) -> ObjectId {
        ObjectId(raw)
    }

    /// The packed 32-bit form that crosses the packet boundary.
    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn kind_bits(self) -> u8 {
        (self.0 >> 24) as u8
    }

    pub fn serial(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    pub fn is_none(self) -> bool {
        self.serial() == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Per-resource private data bag keyed by application GUIDs.
///
/// Programs use this to tag resources with bookkeeping blobs; nothing in
/// the recorder reads them back, but set/get/free must round-trip.
#[derive(Default)]
pub struct PrivateData {
    slots: Mutex<Vec<(u128, Box<[u8]>)>>,
}

impl PrivateData {
    pub fn new() -> PrivateData {
        PrivateData { slots: Mutex::new(Vec::new()) }
    }

    pub fn set(&self, guid: u128, data: &[u8]) {
        let mut slots = mutex_lock(&self.slots);
        if let Some(entry) = slots.iter_mut().find(|entry| entry.0 == guid) {
            entry.1 = data.to_vec().into_boxed_slice();
            return;
        }
        slots.push((guid, data.to_vec().into_boxed_slice()));
    }

    pub fn get(&self, guid: u128) -> Option<Vec<u8>> {
        let slots = mutex_lock(&self.slots);
        slots
            .iter()
            .find(|entry| entry.0 == guid)
            .map(|entry| entry.1.to_vec())
    }

    pub fn free(&self, guid: u128) -> bool {
        let mut slots = mutex_lock(&self.slots);
        match slots.iter().position(|entry| entry.0 == guid) {
            Some(index) => {
                slots.swap_remove(index);
                true
            }
            None => false,
        }
    }
}

/// Capability set shared by every tracked resource: identity, type tag,
/// the private-data bag, and the id of the creating device.
pub trait Resource {
    fn object_id(&self) -> ObjectId;
    fn kind(&self) -> ObjectKind;
    fn private_data(&self) -> &PrivateData;
    fn device_id(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::{ObjectId, ObjectKind, PrivateData};

    #[test]
    fn ids_pack_kind_and_serial() {
        let id = ObjectId::alloc(ObjectKind::Texture);
        assert_eq!(id.kind_bits(), ObjectKind::Texture as u8);
        assert!(id.serial() != 0);
        assert!(!id.is_none());
        assert_eq!(ObjectId::from_raw(id.raw()), id);
    }

    #[test]
    fn serials_are_monotonic_per_kind() {
        let a = ObjectId::alloc(ObjectKind::Buffer);
        let b = ObjectId::alloc(ObjectKind::Buffer);
        assert!(b.serial() > a.serial());
    }

    #[test]
    fn none_id_is_distinguishable() {
        assert!(ObjectId::NONE.is_none());
        assert_eq!(ObjectId::NONE.raw(), 0);
        assert_eq!(ObjectId::alloc(ObjectKind::Invalid), ObjectId::NONE);
    }

    #[test]
    fn private_data_round_trips() {
        let bag = PrivateData::new();
        assert!(bag.get(7).is_none());
        bag.set(7, b"abc");
        assert_eq!(bag.get(7).as_deref(), Some(&b"abc"[..]));
        bag.set(7, b"de");
        assert_eq!(bag.get(7).as_deref(), Some(&b"de"[..]));
        assert!(bag.free(7));
        assert!(!bag.free(7));
        assert!(bag.get(7).is_none());
    }
}
