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

//! Parsing of Kubernetes-style resource quantities.
//!
//! CPU quantities are plain core counts (`"2"`, `"0.5"`) or millicores (`"100m"`). Memory
//! quantities carry a binary unit suffix (`"200MiB"`, `"2Gi"`, `"1T"`); the canonical internal
//! representation is GiB.

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref MEM_RE: Regex = Regex::new(r"^([0-9]*\.?[0-9]+)\s*([A-Za-z]+)?$").unwrap();
}

/// Error returned when a resource quantity cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resource quantity: {0:?}")]
pub struct QuantityError(pub String);

/// Parse a CPU quantity into a number of cores.
pub fn parse_cpu(value: &str) -> Result<f64, QuantityError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0.0);
    }
    if let Some(milli) = value.strip_suffix('m') {
        return milli
            .parse::<f64>()
            .map(|x| x / 1000.0)
            .map_err(|_| QuantityError(value.to_string()));
    }
    value
        .parse::<f64>()
        .map_err(|_| QuantityError(value.to_string()))
}

/// Parse a memory quantity into GiB.
pub fn parse_mem(value: &str) -> Result<f64, QuantityError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(0.0);
    }
    let caps = MEM_RE
        .captures(value)
        .ok_or_else(|| QuantityError(value.to_string()))?;
    let num: f64 = caps[1]
        .parse()
        .map_err(|_| QuantityError(value.to_string()))?;
    let factor = match caps.get(2).map(|m| m.as_str()) {
        None => 1.0,
        Some("Ti" | "TiB" | "T") => 1024.0,
        Some("Gi" | "GiB" | "G") => 1.0,
        Some("Mi" | "MiB" | "M") => 1.0 / 1024.0,
        Some("Ki" | "KiB" | "K") => 1.0 / (1024.0 * 1024.0),
        Some(_) => return Err(QuantityError(value.to_string())),
    };
    Ok(num * factor)
}
