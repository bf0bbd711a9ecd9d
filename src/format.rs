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

//! Surface format codes and the size math derived from them.
//!
//! Formats are kept as the raw 32-bit codes the hosted program passes in:
//! the mirror forwards them over the packet boundary untouched, so a closed
//! enum would lose codes this frontend has never heard of. Known codes get
//! named constants and the handful of properties the recorder needs.

use std::fmt;

const fn make_fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

/// A raw D3D9 format code.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct Format(pub u32);

impl Format {
    pub const UNKNOWN: Format = Format(0);
    pub const A8R8G8B8: Format = Format(21);
    pub const X8R8G8B8: Format = Format(22);
    pub const R5G6B5: Format = Format(23);
    pub const X1R5G5B5: Format = Format(24);
    pub const A1R5G5B5: Format = Format(25);
    pub const A8: Format = Format(28);
    pub const D24S8: Format = Format(75);
    pub const D24X8: Format = Format(77);
    pub const VERTEX_DATA: Format = Format(100);
    pub const INDEX16: Format = Format(101);
    pub const INDEX32: Format = Format(102);
    pub const DXT1: Format = Format(make_fourcc(b'D', b'X', b'T', b'1'));
    pub const DXT3: Format = Format(make_fourcc(b'D', b'X', b'T', b'3'));
    pub const DXT5: Format = Format(make_fourcc(b'D', b'X', b'T', b'5'));

    /// Bytes per pixel for linear formats. Unrecognized codes are treated as
    /// 32-bit, matching what the target program's formats all are.
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Format::A8R8G8B8 | Format::X8R8G8B8 | Format::D24S8 | Format::D24X8 => 4,
            Format::R5G6B5 | Format::A1R5G5B5 | Format::X1R5G5B5 => 2,
            Format::A8 => 1,
            _ => 4,
        }
    }

    pub fn is_block_compressed(self) -> bool {
        self == Format::DXT1 || self == Format::DXT3 || self == Format::DXT5
    }

    /// Bytes per 4x4 block for compressed formats, 0 otherwise.
    pub fn block_bytes(self) -> u32 {
        if self == Format::DXT1 {
            8
        } else if self == Format::DXT3 || self == Format::DXT5 {
            16
        } else {
            0
        }
    }

    /// Row pitch in bytes. Block-compressed rows cover four texel rows.
    pub fn pitch(self, width: u32) -> u32 {
        if width == 0 {
            return 0;
        }
        if !self.is_block_compressed() {
            return width * self.bytes_per_pixel();
        }
        let block_columns = ((width + 3) / 4).max(1);
        block_columns * self.block_bytes()
    }

    /// Total backing-store size for a surface of the given pitch and height.
    pub fn storage_size(self, pitch: u32, height: u32) -> u32 {
        if pitch == 0 {
            return 0;
        }
        if self.is_block_compressed() {
            let block_rows = ((height + 3) / 4).max(1);
            pitch * block_rows
        } else {
            pitch * height
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Format::A8R8G8B8 => write!(f, "A8R8G8B8"),
            Format::X8R8G8B8 => write!(f, "X8R8G8B8"),
            Format::R5G6B5 => write!(f, "R5G6B5"),
            Format::X1R5G5B5 => write!(f, "X1R5G5B5"),
            Format::A1R5G5B5 => write!(f, "A1R5G5B5"),
            Format::A8 => write!(f, "A8"),
            Format::D24S8 => write!(f, "D24S8"),
            Format::D24X8 => write!(f, "D24X8"),
            Format::DXT1 => write!(f, "DXT1"),
            Format::DXT3 => write!(f, "DXT3"),
            Format::DXT5 => write!(f, "DXT5"),
            Format(code) => write!(f, "fmt({})", code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Format;

    #[test]
    fn linear_pitch_is_width_times_bpp() {
        assert_eq!(Format::A8R8G8B8.pitch(64), 256);
        assert_eq!(Format::R5G6B5.pitch(64), 128);
        assert_eq!(Format::A8.pitch(64), 64);
        assert_eq!(Format::A8R8G8B8.storage_size(256, 32), 8192);
    }

    #[test]
    fn dxt_pitch_rounds_to_block_columns() {
        // 16 texels = 4 block columns.
        assert_eq!(Format::DXT1.pitch(16), 32);
        assert_eq!(Format::DXT5.pitch(16), 64);
        // 6 texels round up to 2 block columns.
        assert_eq!(Format::DXT1.pitch(6), 16);
        assert_eq!(Format::DXT5.pitch(6), 32);
        // Degenerate 1-texel surfaces still occupy one block.
        assert_eq!(Format::DXT1.pitch(1), 8);
    }

    #[test]
    fn dxt_storage_counts_block_rows() {
        let pitch = Format::DXT5.pitch(6);
        assert_eq!(Format::DXT5.storage_size(pitch, 6), pitch * 2);
        assert_eq!(Format::DXT1.storage_size(Format::DXT1.pitch(16), 16), 128);
    }

    #[test]
    fn fourcc_codes_match_the_wire_values() {
        assert_eq!(Format::DXT1.0, 0x31545844);
        assert_eq!(Format::DXT3.0, 0x33545844);
        assert_eq!(Format::DXT5.0, 0x35545844);
    }

    #[test]
    fn unknown_formats_pass_through() {
        let odd = Format(0x4655434B);
        assert_eq!(odd.bytes_per_pixel(), 4);
        assert!(!odd.is_block_compressed());
        assert_eq!(odd.block_bytes(), 0);
    }
}
