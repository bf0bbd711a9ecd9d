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

//! 32-bit FNV-1a folds.
//!
//! These exact folds are part of the wire contract: draw-packet state
//! fingerprints and shader bytecode hashes must be reproducible by the
//! backend, so the constants and fold order are spelled out here rather
//! than hidden behind a `Hasher`.

/// FNV-1a offset basis.
pub const OFFSET_BASIS: u32 = 2166136261;
/// FNV-1a prime.
pub const PRIME: u32 = 16777619;

/// Fold one 32-bit value into a running hash.
#[inline]
pub fn fold(hash: u32, value: u32) -> u32 {
    (hash ^ value).wrapping_mul(PRIME)
}

/// Fold a float's bit pattern into a running hash.
#[inline]
pub fn fold_f32(hash: u32, value: f32) -> u32 {
    fold(hash, value.to_bits())
}

/// FNV-1a over a dword stream, one fold per dword.
pub fn fnv1a(words: &[u32]) -> u32 {
    words.iter().fold(OFFSET_BASIS, |hash, &word| fold(hash, word))
}
