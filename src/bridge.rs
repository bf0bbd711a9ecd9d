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

//! The packet sink.
//!
//! Consumes the recorder's packet stream, enforcing the protocol at the
//! boundary: packet framing, type range, strictly monotonic sequences, and
//! draw-state completeness. Validated draws accumulate into a per-frame
//! table; `present` closes the frame and hands it to the snapshot
//! publisher. A validation failure ends the current batch with an error
//! and the frame is effectively dropped downstream.

use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};

use arena::UploadArena;
use hash;
use ipc::{FramePublisher, FrameView, MAX_DRAWS};
use logger::should_log_sample;
use packet::{read_pod, BeginFramePacket, ClearPacket, DrawIndexedPacket, PacketHeader,
             PacketType};
use {D3dResult, Error};

/// Init handshake payload.
#[derive(Clone, Copy, Debug)]
pub struct InitDesc {
    pub protocol_version: u32,
    pub ring_capacity_bytes: u32,
    pub upload_desc: ::arena::UploadArenaDesc,
}

impl Default for InitDesc {
    fn default() -> InitDesc {
        InitDesc {
            protocol_version: ::packet::PROTOCOL_VERSION,
            ring_capacity_bytes: 1 << 20,
            upload_desc: Default::default(),
        }
    }
}

/// Where presented frames go on screen, as far as the sink needs to know.
#[derive(Clone, Copy, Debug, Default)]
pub struct PresentTargetDesc {
    pub target_id: u64,
    pub window_handle: u64,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub windowed: u32,
}

/// Per-frame counters, observable mid-batch.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameStats {
    pub packet_count: u32,
    pub draw_indexed_count: u32,
    pub clear_count: u32,
    pub have_clear: bool,
    pub last_clear_color: u32,
    pub last_clear_flags: u32,
    pub last_clear_z: f32,
    pub last_clear_stencil: u32,
}

impl FrameStats {
    fn reset(&mut self) {
        *self = FrameStats::default();
        self.last_clear_z = 1.0;
    }
}

fn should_log_frame(frame_id: u32) -> bool {
    frame_id < 10 || frame_id % 120 == 0
}

fn trace_packets_enabled() -> bool {
    ::runtime::env_flag_enabled("DX9MT_BACKEND_TRACE_PACKETS")
}

static DRAW_TABLE_FULL_LOG_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Sink state machine and validator.
pub struct Bridge {
    ready: bool,
    frame_open: bool,
    last_frame_id: u32,
    last_sequence: u32,
    present_target: Option<PresentTargetDesc>,
    stats: FrameStats,
    frame_draws: Vec<DrawIndexedPacket>,
    dropped_draws: u32,
    last_replay_hash: u32,
    trace_packets: bool,
    publisher: Option<FramePublisher>,
}

impl Bridge {
    pub fn new() -> Bridge {
        Bridge {
            ready: false,
            frame_open: false,
            last_frame_id: 0,
            last_sequence: 0,
            present_target: None,
            stats: FrameStats::default(),
            frame_draws: Vec::with_capacity(MAX_DRAWS),
            dropped_draws: 0,
            last_replay_hash: 0,
            trace_packets: false,
            publisher: None,
        }
    }

    /// Initialize (or re-initialize) the sink: zero counters, forget the
    /// present target.
    pub fn init(&mut self, desc: &InitDesc) {
        info!(
            "bridge init: protocol={} ring={} upload_slots={} upload_bytes={}",
            desc.protocol_version,
            desc.ring_capacity_bytes,
            desc.upload_desc.slot_count,
            desc.upload_desc.bytes_per_slot
        );
        self.ready = true;
        self.frame_open = false;
        self.last_frame_id = 0;
        self.last_sequence = 0;
        self.present_target = None;
        self.stats.reset();
        self.frame_draws.clear();
        self.dropped_draws = 0;
        self.trace_packets = trace_packets_enabled();
    }

    /// Attach the snapshot publisher that `present` feeds.
    pub fn attach_publisher(&mut self, publisher: FramePublisher) {
        self.publisher = Some(publisher);
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_frame_open(&self) -> bool {
        self.frame_open
    }

    pub fn frame_stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn last_replay_hash(&self) -> u32 {
        self.last_replay_hash
    }

    pub fn update_present_target(&mut self, desc: &PresentTargetDesc) -> D3dResult<()> {
        if !self.ready {
            warn!("update_present_target called before init");
            return Err(Error::InvalidCall);
        }
        if desc.target_id == 0 || desc.width == 0 || desc.height == 0 {
            warn!(
                "invalid present target metadata: target={} size={}x{} fmt={} windowed={}",
                desc.target_id, desc.width, desc.height, desc.format, desc.windowed
            );
            return Err(Error::InvalidCall);
        }

        self.present_target = Some(*desc);
        info!(
            "present target updated: target={} size={}x{} fmt={} windowed={}",
            desc.target_id, desc.width, desc.height, desc.format, desc.windowed
        );
        Ok(())
    }

    pub fn begin_frame(&mut self, frame_id: u32) -> D3dResult<()> {
        if !self.ready {
            return Err(Error::InvalidCall);
        }

        if self.frame_open && frame_id != self.last_frame_id {
            warn!(
                "begin_frame out of order: incoming={} previous_open={}",
                frame_id, self.last_frame_id
            );
        }
        self.frame_open = true;
        self.last_frame_id = frame_id;
        self.stats.reset();
        self.frame_draws.clear();
        self.dropped_draws = 0;

        if should_log_frame(frame_id) {
            debug!("begin_frame={}", frame_id);
        }
        Ok(())
    }

    /// Validate a batch of packets. Counters are updated incrementally, so
    /// a rejected batch leaves the packets before the offender visible in
    /// the stats.
    pub fn submit_packets(&mut self, bytes: &[u8]) -> D3dResult<()> {
        if !self.ready {
            warn!("submit_packets called before init");
            return Err(Error::InvalidCall);
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let header_size = mem::size_of::<PacketHeader>();
        let mut offset = 0usize;
        let mut packet_count = 0u32;

        while offset + header_size <= bytes.len() {
            let header: PacketHeader = match read_pod(&bytes[offset..]) {
                Some(header) => header,
                None => break,
            };
            let size = header.size as usize;

            if size < header_size || offset + size > bytes.len() {
                error!(
                    "packet parse error: offset={} size={} total={}",
                    offset,
                    header.size,
                    bytes.len()
                );
                return Err(Error::InvalidCall);
            }

            let packet_type = match PacketType::from_u16(header.packet_type) {
                Some(packet_type) => packet_type,
                None => {
                    error!(
                        "unsupported packet type={} size={} seq={}",
                        header.packet_type, header.size, header.sequence
                    );
                    return Err(Error::InvalidCall);
                }
            };

            if header.sequence == 0
                || (self.last_sequence != 0 && header.sequence <= self.last_sequence)
            {
                error!(
                    "packet sequence out of order: current={} last={} type={} size={}",
                    header.sequence, self.last_sequence, header.packet_type, header.size
                );
                return Err(Error::InvalidCall);
            }
            self.last_sequence = header.sequence;

            packet_count += 1;
            self.stats.packet_count += 1;

            match packet_type {
                PacketType::DrawIndexed => {
                    self.accept_draw(&bytes[offset..offset + size], header.size)?;
                }
                PacketType::Clear => {
                    if size < mem::size_of::<ClearPacket>() {
                        error!(
                            "clear packet too small: size={} expected={}",
                            header.size,
                            mem::size_of::<ClearPacket>()
                        );
                        return Err(Error::InvalidCall);
                    }
                    if let Some(clear) = read_pod::<ClearPacket>(&bytes[offset..]) {
                        self.stats.clear_count += 1;
                        self.stats.have_clear = true;
                        self.stats.last_clear_color = clear.color;
                        self.stats.last_clear_flags = clear.flags;
                        self.stats.last_clear_z = clear.z;
                        self.stats.last_clear_stencil = clear.stencil;
                    }
                }
                PacketType::BeginFrame => {
                    // Frame boundaries travel in-band; dispatch them to the
                    // same logic as the direct call.
                    if let Some(begin) = read_pod::<BeginFramePacket>(&bytes[offset..]) {
                        let _ = self.begin_frame(begin.frame_id);
                    }
                }
                _ => {}
            }

            if self.trace_packets {
                debug!(
                    "packet #{} type={}({}) size={} seq={}",
                    packet_count,
                    packet_type.name(),
                    header.packet_type,
                    header.size,
                    header.sequence
                );
            }

            offset += size;
        }

        if offset != bytes.len() {
            error!("packet tail mismatch: parsed={} total={}", offset, bytes.len());
            return Err(Error::InvalidCall);
        }

        Ok(())
    }

    fn accept_draw(&mut self, bytes: &[u8], declared_size: u16) -> D3dResult<()> {
        if (declared_size as usize) < mem::size_of::<DrawIndexedPacket>() {
            error!(
                "draw packet too small: size={} expected={}",
                declared_size,
                mem::size_of::<DrawIndexedPacket>()
            );
            return Err(Error::InvalidCall);
        }
        let draw: DrawIndexedPacket = match read_pod(bytes) {
            Some(draw) => draw,
            None => return Err(Error::InvalidCall),
        };

        if draw.render_target_id == 0
            || draw.vertex_buffer_id == 0
            || draw.index_buffer_id == 0
            || (draw.vertex_decl_id == 0 && draw.fvf == 0)
        {
            error!(
                "draw packet missing state ids: rt={} vb={} ib={} decl={} fvf={:#010x} seq={}",
                draw.render_target_id,
                draw.vertex_buffer_id,
                draw.index_buffer_id,
                draw.vertex_decl_id,
                draw.fvf,
                draw.header.sequence
            );
            return Err(Error::InvalidCall);
        }

        self.stats.draw_indexed_count += 1;
        if self.frame_draws.len() < MAX_DRAWS {
            self.frame_draws.push(draw);
        } else {
            self.dropped_draws += 1;
            if should_log_sample(&DRAW_TABLE_FULL_LOG_COUNTER, 4, 256) {
                warn!(
                    "frame draw table full ({} entries), dropped {} draws",
                    MAX_DRAWS, self.dropped_draws
                );
            }
        }
        Ok(())
    }

    /// Close the frame and publish its snapshot. Requires present-target
    /// metadata; a missing `begin_frame` or mismatched id only warns.
    pub fn present(&mut self, frame_id: u32, uploads: &UploadArena) -> D3dResult<()> {
        if !self.ready {
            return Err(Error::InvalidCall);
        }
        let target = match self.present_target {
            Some(target) => target,
            None => {
                warn!("present frame={} without present-target metadata", frame_id);
                return Err(Error::InvalidCall);
            }
        };
        if !self.frame_open {
            warn!("present frame={} without begin_frame", frame_id);
        } else if frame_id != self.last_frame_id {
            warn!(
                "present frame mismatch: incoming={} open={}",
                frame_id, self.last_frame_id
            );
        }

        let mut replay = hash::OFFSET_BASIS;
        for draw in self.frame_draws.iter() {
            replay = hash::fold(replay, draw.state_block_hash);
        }
        self.last_replay_hash = replay;

        if let Some(ref mut publisher) = self.publisher {
            let view = FrameView {
                frame_id: frame_id,
                width: target.width,
                height: target.height,
                present_render_target_id: target.target_id as u32,
                replay_hash: replay,
                have_clear: self.stats.have_clear,
                clear_flags: self.stats.last_clear_flags,
                clear_color_argb: self.stats.last_clear_color,
                clear_z: self.stats.last_clear_z,
                clear_stencil: self.stats.last_clear_stencil,
                draws: &self.frame_draws,
            };
            if let Err(err) = publisher.publish(&view, uploads) {
                warn!("snapshot publish failed: {}", err);
            }
        }

        self.frame_open = false;
        self.last_frame_id = frame_id;
        if should_log_frame(frame_id) {
            debug!(
                "present frame={} target={} size={}x{} fmt={} packets={} draws={} clears={} \
                 last_clear={:#010x} flags={:#010x} z={:.3} stencil={}",
                frame_id,
                target.target_id,
                target.width,
                target.height,
                target.format,
                self.stats.packet_count,
                self.stats.draw_indexed_count,
                self.stats.clear_count,
                self.stats.last_clear_color,
                self.stats.last_clear_flags,
                self.stats.last_clear_z,
                self.stats.last_clear_stencil
            );
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        if !self.ready {
            return;
        }
        info!("shutdown, last_frame={}", self.last_frame_id);
        self.ready = false;
        self.frame_open = false;
        self.present_target = None;
        self.last_sequence = 0;
        self.frame_draws.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packet::{as_byte_slice, PresentPacket};

    fn ready_bridge() -> Bridge {
        let mut bridge = Bridge::new();
        bridge.init(&InitDesc::default());
        bridge
            .update_present_target(&PresentTargetDesc {
                target_id: 1,
                window_handle: 0,
                width: 640,
                height: 480,
                format: 22,
                windowed: 1,
            })
            .unwrap();
        bridge
    }

    #[test]
    fn uninitialized_sink_refuses_everything() {
        let mut bridge = Bridge::new();
        assert!(bridge.update_present_target(&PresentTargetDesc::default()).is_err());
        assert!(bridge.begin_frame(1).is_err());
        assert!(bridge.submit_packets(&[0u8; 8]).is_err());
        assert!(bridge.present(1, &UploadArena::new(64)).is_err());
    }

    #[test]
    fn empty_batches_are_accepted() {
        let mut bridge = ready_bridge();
        assert!(bridge.submit_packets(&[]).is_ok());
    }

    #[test]
    fn begin_frame_packets_dispatch_in_band() {
        let mut bridge = ready_bridge();
        let begin = BeginFramePacket::new(1, 7);
        assert!(bridge.submit_packets(as_byte_slice(&begin)).is_ok());
        assert!(bridge.is_frame_open());
    }

    #[test]
    fn stats_accumulate_until_the_offender() {
        let mut bridge = ready_bridge();
        bridge.begin_frame(1).unwrap();

        let mut buffer = ::packet::PacketBuffer::new();
        buffer.push(&ClearPacket::new(1, 1));
        let mut bad = ClearPacket::new(1, 1); // duplicate sequence
        bad.color = 0xFF;
        buffer.push(&bad);

        assert!(bridge.submit_packets(buffer.as_slice()).is_err());
        assert_eq!(bridge.frame_stats().clear_count, 1);
        assert_eq!(bridge.frame_stats().packet_count, 1);
    }

    #[test]
    fn clear_metadata_is_remembered_for_the_frame() {
        let mut bridge = ready_bridge();
        bridge.begin_frame(1).unwrap();
        let mut clear = ClearPacket::new(5, 1);
        clear.flags = 3;
        clear.color = 0xA1B2_C3D4;
        clear.z = 0.5;
        clear.stencil = 7;
        bridge.submit_packets(as_byte_slice(&clear)).unwrap();

        let stats = bridge.frame_stats();
        assert!(stats.have_clear);
        assert_eq!(stats.last_clear_color, 0xA1B2_C3D4);
        assert_eq!(stats.last_clear_flags, 3);
        assert_eq!(stats.last_clear_z, 0.5);
        assert_eq!(stats.last_clear_stencil, 7);
    }

    #[test]
    fn present_closes_the_frame_and_hashes_draws() {
        let mut bridge = ready_bridge();
        let uploads = UploadArena::new(64);
        bridge.begin_frame(1).unwrap();

        let mut draw = DrawIndexedPacket::new(1);
        draw.render_target_id = 1;
        draw.vertex_buffer_id = 2;
        draw.index_buffer_id = 3;
        draw.fvf = 0x112;
        draw.state_block_hash = draw.state_hash();
        bridge.submit_packets(as_byte_slice(&draw)).unwrap();

        let present = PresentPacket::new(2, 1, 1);
        bridge.submit_packets(as_byte_slice(&present)).unwrap();
        assert!(bridge.present(1, &uploads).is_ok());
        assert!(!bridge.is_frame_open());

        let expected = ::hash::fold(::hash::OFFSET_BASIS, draw.state_block_hash);
        assert_eq!(bridge.last_replay_hash(), expected);
    }

    #[test]
    fn shutdown_forgets_the_target_and_sequences() {
        let mut bridge = ready_bridge();
        bridge.begin_frame(1).unwrap();
        bridge.shutdown();
        assert!(!bridge.is_ready());
        assert!(bridge.present(1, &UploadArena::new(64)).is_err());
    }
}
