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

//! Direct3D 9 frontend that records the API stream of a hosted program and
//! re-emits it as a validated packet stream plus a per-frame shared-memory
//! snapshot for an out-of-process Metal viewer.
//!
//! The crate is organized as a pipeline: the [`device`] state tracker turns
//! imperative API calls into declarative draw packets, variable-sized side
//! data travels through the triple-buffered [`arena`], the [`bridge`] sink
//! validates the packet stream, and [`ipc`] publishes the consumed frame.
//! The [`sm3`] module translates Shader Model 1.x-3.0 bytecode into Metal
//! Shading Language source keyed by a stable bytecode hash.

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
extern crate smallvec;
extern crate time;

#[cfg(feature = "serialize")]
extern crate serde;
#[cfg(feature = "serialize")]
#[macro_use]
extern crate serde_derive;

use std::fmt;
use std::sync::{Mutex, MutexGuard};

pub mod arena;
pub mod attrib;
pub mod bridge;
pub mod buffer;
pub mod device;
pub mod format;
pub mod handle;
pub mod hash;
pub mod ipc;
pub mod logger;
pub mod packet;
pub mod query;
pub mod runtime;
pub mod shade;
pub mod sm3;
pub mod state;
pub mod texture;

pub use arena::{UploadArena, UploadArenaDesc, UploadRef};
pub use bridge::{Bridge, InitDesc, PresentTargetDesc};
pub use device::{create_device, BehaviorFlags, ClearFlags, Device, PresentParameters,
                 PrimitiveType};
pub use format::Format;
pub use handle::{ObjectId, ObjectKind, Resource};
pub use runtime::Runtime;
pub use state::{Rect, Viewport};

/// API-shaped error codes surfaced to the hosted program.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    /// Null argument, out-of-range index, malformed rect or unsupported format.
    InvalidCall,
    /// Allocation failure.
    OutOfMemory,
    /// The operation exists in the API but this frontend does not record it.
    NotAvailable,
    /// The sink refused the frame; the program may retry after a reset.
    DeviceLost,
    /// Internal failure publishing metadata to the backend.
    DriverInternal,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let desc = match *self {
            Error::InvalidCall => "invalid call",
            Error::OutOfMemory => "out of memory",
            Error::NotAvailable => "not available",
            Error::DeviceLost => "device lost",
            Error::DriverInternal => "driver internal error",
        };
        write!(f, "{}", desc)
    }
}

impl std::error::Error for Error {}

/// Result alias used across the API surface.
pub type D3dResult<T> = Result<T, Error>;

/// Lock a mutex, riding over poisoning from a panicked test thread.
/// Recording is single-threaded (see the concurrency notes in DESIGN.md),
/// so contention is not a concern here.
pub(crate) fn mutex_lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
