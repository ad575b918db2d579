// Constellation: emulating satellite mega-constellations as Linux containers
// Copyright (C) 2025 The Constellation Authors
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Deterministic VXLAN Network Identifier derivation.
//!
//! Both endpoints of a link derive the VNI independently from the link identity alone, so the
//! two agents converge on the same tunnel id without any coordination. The identity is the
//! endpoint tuple in canonical order (the lexicographically smaller endpoint first, each with
//! its antenna index), and the VNI is its CRC-32 folded into the 24-bit VNI space.

/// Compute the VNI of a link between `(ep1, ant1)` and `(ep2, ant2)`.
///
/// The result is symmetric in its arguments and always in `1..=0xFF_FFFF`.
pub fn link_vni(ep1: &str, ant1: u32, ep2: &str, ant2: u32) -> u32 {
    let canonical = if ep1 < ep2 {
        format!("{ep1}_{ant1}_{ep2}_{ant2}")
    } else {
        format!("{ep2}_{ant2}_{ep1}_{ant1}")
    };
    (crc32fast::hash(canonical.as_bytes()) % 0xFF_FFFF) + 1
}
