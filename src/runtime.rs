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

//! Process-wide runtime: the packet sequence counter, the upload arena and
//! the sink, bundled into one object parameterized at init.
//!
//! Devices normally share the process-global instance, created exactly
//! once through a three-valued CAS (`0 uninit -> 1 initializing -> 2
//! ready`; losers spin until `2`). Tests construct private runtimes so
//! they never contend on global sink state.

use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use arena::{UploadArena, UploadArenaDesc};
use bridge::{Bridge, InitDesc, PresentTargetDesc};
use ipc::FramePublisher;
use packet::{as_byte_slice, InitPacket};
use {logger, mutex_lock, D3dResult};

/// Environment flag enabling the soft-present fallback.
pub const SOFT_PRESENT_ENV: &'static str = "DX9MT_FRONTEND_SOFT_PRESENT";

/// Parse an environment flag: unset, empty, `0`, `false`, `off`, `no`
/// (any case for the words) all read as disabled.
pub fn env_flag_enabled(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => match value.as_str() {
            "" | "0" | "false" | "FALSE" | "off" | "OFF" | "no" | "NO" => false,
            _ => true,
        },
        Err(_) => false,
    }
}

static SOFT_PRESENT_CACHE: AtomicI32 = AtomicI32::new(-1);

/// Cached read of [`SOFT_PRESENT_ENV`].
pub fn soft_present_enabled() -> bool {
    let cached = SOFT_PRESENT_CACHE.load(Ordering::Relaxed);
    if cached >= 0 {
        return cached != 0;
    }
    let enabled = env_flag_enabled(SOFT_PRESENT_ENV);
    SOFT_PRESENT_CACHE.store(if enabled { 1 } else { 0 }, Ordering::Relaxed);
    enabled
}

/// The singleton payload: one sequence source, one arena, one sink.
pub struct Runtime {
    sequence: AtomicU32,
    pub uploads: Mutex<UploadArena>,
    pub bridge: Mutex<Bridge>,
}

impl Runtime {
    /// Build a runtime, initialize its sink, and perform the INIT
    /// handshake over the packet stream.
    pub fn new(desc: InitDesc) -> Arc<Runtime> {
        let runtime = Arc::new(Runtime {
            sequence: AtomicU32::new(0),
            uploads: Mutex::new(UploadArena::new(desc.upload_desc.bytes_per_slot)),
            bridge: Mutex::new(Bridge::new()),
        });

        {
            let mut bridge = mutex_lock(&runtime.bridge);
            bridge.init(&desc);
            let init = InitPacket::new(
                runtime.next_packet_sequence(),
                desc.ring_capacity_bytes,
                desc.upload_desc,
            );
            if bridge.submit_packets(as_byte_slice(&init)).is_err() {
                warn!("INIT handshake rejected by sink");
            }
        }

        runtime
    }

    /// Next packet sequence number; strictly monotonic and never zero.
    pub fn next_packet_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Submit one or more packets to the sink.
    pub fn submit(&self, bytes: &[u8]) -> D3dResult<()> {
        mutex_lock(&self.bridge).submit_packets(bytes)
    }

    /// Forward present-target metadata to the sink.
    pub fn update_present_target(&self, desc: &PresentTargetDesc) -> D3dResult<()> {
        mutex_lock(&self.bridge).update_present_target(desc)
    }

    /// Close the given frame on the sink, resolving upload refs for the
    /// snapshot. Lock order is uploads before bridge, everywhere.
    pub fn present(&self, frame_id: u32) -> D3dResult<()> {
        let uploads = mutex_lock(&self.uploads);
        let mut bridge = mutex_lock(&self.bridge);
        bridge.present(frame_id, &uploads)
    }

    pub fn shutdown(&self) {
        mutex_lock(&self.bridge).shutdown();
        self.sequence.store(0, Ordering::Relaxed);
    }
}

const STATE_UNINIT: u32 = 0;
const STATE_INITIALIZING: u32 = 1;
const STATE_READY: u32 = 2;

static GLOBAL_STATE: AtomicU32 = AtomicU32::new(STATE_UNINIT);
static GLOBAL_RUNTIME: AtomicPtr<Runtime> = AtomicPtr::new(std::ptr::null_mut());

/// The process-global runtime, created on first use. The winner of the CAS
/// installs the logger, builds the runtime with default parameters, and
/// attaches the snapshot publisher; losers spin until it is ready.
pub fn global() -> Arc<Runtime> {
    loop {
        match GLOBAL_STATE.compare_exchange(
            STATE_UNINIT,
            STATE_INITIALIZING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                logger::init();
                info!("initializing frontend/backend bridge");
                let desc = InitDesc {
                    ring_capacity_bytes: 1 << 20,
                    upload_desc: UploadArenaDesc::default(),
                    ..Default::default()
                };
                let runtime = Runtime::new(desc);
                mutex_lock(&runtime.bridge)
                    .attach_publisher(FramePublisher::new(::ipc::DEFAULT_PATH));
                let pointer = Arc::into_raw(runtime.clone()) as *mut Runtime;
                GLOBAL_RUNTIME.store(pointer, Ordering::Release);
                GLOBAL_STATE.store(STATE_READY, Ordering::Release);
                return runtime;
            }
            Err(STATE_READY) => {
                let pointer = GLOBAL_RUNTIME.load(Ordering::Acquire);
                unsafe {
                    Arc::increment_strong_count(pointer);
                    return Arc::from_raw(pointer);
                }
            }
            Err(_) => {
                // Another thread is mid-init; wait for it to finish.
                while GLOBAL_STATE.load(Ordering::Acquire) != STATE_READY {
                    thread::yield_now();
                }
            }
        }
    }
}

/// Tear the global runtime down (library unload). Subsequent [`global`]
/// calls re-initialize from scratch.
pub fn shutdown_global() {
    if GLOBAL_STATE
        .compare_exchange(STATE_READY, STATE_UNINIT, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    let pointer = GLOBAL_RUNTIME.swap(std::ptr::null_mut(), Ordering::AcqRel);
    if !pointer.is_null() {
        let runtime = unsafe { Arc::from_raw(pointer) };
        runtime.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn sequences_start_at_one_and_grow() {
        let runtime = Runtime::new(InitDesc::default());
        // Sequence 1 went to the INIT packet.
        let a = runtime.next_packet_sequence();
        let b = runtime.next_packet_sequence();
        assert_eq!(a, 2);
        assert_eq!(b, 3);
    }

    #[test]
    fn fresh_runtime_has_a_ready_sink() {
        let runtime = Runtime::new(InitDesc::default());
        assert!(mutex_lock(&runtime.bridge).is_ready());
        assert_eq!(mutex_lock(&runtime.bridge).frame_stats().packet_count, 1);
    }

    #[test]
    fn global_returns_one_instance() {
        let a = global();
        let b = global();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn env_flag_parsing() {
        std::env::set_var("DX9MT_TEST_FLAG_A", "0");
        assert!(!env_flag_enabled("DX9MT_TEST_FLAG_A"));
        std::env::set_var("DX9MT_TEST_FLAG_A", "false");
        assert!(!env_flag_enabled("DX9MT_TEST_FLAG_A"));
        std::env::set_var("DX9MT_TEST_FLAG_A", "1");
        assert!(env_flag_enabled("DX9MT_TEST_FLAG_A"));
        assert!(!env_flag_enabled("DX9MT_TEST_FLAG_UNSET"));
    }
}
