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

//! The epoch file format and its on-disk ordering.
//!
//! An epoch file describes one batch of topology changes: links to add, update and delete,
//! plus per-node task lists. Files are ordered by the **last numeric suffix** of their file
//! name, never by the embedded `time` field; the `time` field only drives the virtual clock
//! of the scheduler.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::types::Shaping;

/// Error raised when an epoch file cannot be read or parsed. Malformed files are skipped with
/// a warning by the scheduler; they never terminate it.
#[derive(Debug, Error)]
pub enum EpochParseError {
    /// The file cannot be read.
    #[error("cannot read epoch file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    /// The file is not valid JSON or violates the schema.
    #[error("cannot parse epoch file {0}: {1}")]
    Json(PathBuf, serde_json::Error),
    /// The `time` field is not a valid ISO-8601 UTC timestamp.
    #[error("invalid time {time:?} in epoch file {path}: expected ISO-8601 like 2025-12-01T00:00:00Z")]
    InvalidTime {
        /// The offending file.
        path: PathBuf,
        /// The raw `time` value.
        time: String,
    },
}

/// One link mutation inside an epoch file. Antennas default to 1; shaping fields are
/// optional, and on updates absent fields preserve the prior values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkChange {
    /// First endpoint.
    pub endpoint1: String,
    /// Second endpoint.
    pub endpoint2: String,
    /// Antenna of `endpoint1`, 1-based.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint1_antenna: Option<u32>,
    /// Antenna of `endpoint2`, 1-based.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint2_antenna: Option<u32>,
    /// Shaping parameters.
    #[serde(flatten)]
    pub shaping: Shaping,
}

impl LinkChange {
    /// Create a bare link change between two endpoints on antenna 1.
    pub fn between(endpoint1: impl Into<String>, endpoint2: impl Into<String>) -> Self {
        Self {
            endpoint1: endpoint1.into(),
            endpoint2: endpoint2.into(),
            endpoint1_antenna: None,
            endpoint2_antenna: None,
            shaping: Shaping::default(),
        }
    }

    /// Antenna of `endpoint1`, defaulting to 1.
    pub fn antenna1(&self) -> u32 {
        self.endpoint1_antenna.unwrap_or(1)
    }

    /// Antenna of `endpoint2`, defaulting to 1.
    pub fn antenna2(&self) -> u32 {
        self.endpoint2_antenna.unwrap_or(1)
    }
}

/// One epoch file: a scheduled batch of link and task changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EpochFile {
    /// Release time, ISO-8601 UTC (`2025-12-01T00:00:00Z`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Virtual time in seconds, written to `/config/epoch-time` on release. Informational.
    #[serde(rename = "epoch-time", default, skip_serializing_if = "Option::is_none")]
    pub epoch_time: Option<f64>,
    /// Links to create.
    #[serde(rename = "links-add", default, skip_serializing_if = "Vec::is_empty")]
    pub links_add: Vec<LinkChange>,
    /// Links to update (merge shaping into existing records).
    #[serde(rename = "links-update", default, skip_serializing_if = "Vec::is_empty")]
    pub links_update: Vec<LinkChange>,
    /// Links to delete.
    #[serde(rename = "links-del", default, skip_serializing_if = "Vec::is_empty")]
    pub links_del: Vec<LinkChange>,
    /// Task lists, keyed by node name. Each value replaces `/config/run/{node}`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub run: BTreeMap<String, Vec<String>>,
}

impl EpochFile {
    /// Read and parse an epoch file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EpochParseError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EpochParseError::Io(path.to_path_buf(), e))?;
        serde_json::from_str(&content).map_err(|e| EpochParseError::Json(path.to_path_buf(), e))
    }

    /// Serialize and write the epoch file (pretty-printed, like the generators emit).
    pub fn store(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, content)
    }

    /// Parse the `time` field. Returns `None` if the file carries no time, and an error if it
    /// carries an invalid one.
    pub fn parsed_time(&self, path: &Path) -> Result<Option<OffsetDateTime>, EpochParseError> {
        match &self.time {
            None => Ok(None),
            Some(raw) => OffsetDateTime::parse(raw, &Rfc3339)
                .map(Some)
                .map_err(|_| EpochParseError::InvalidTime {
                    path: path.to_path_buf(),
                    time: raw.clone(),
                }),
        }
    }

    /// Whether the file carries no mutation at all.
    pub fn is_empty(&self) -> bool {
        self.links_add.is_empty()
            && self.links_update.is_empty()
            && self.links_del.is_empty()
            && self.run.is_empty()
    }
}

/// Format an [`OffsetDateTime`] the way epoch files carry it (`2025-12-01T00:00:00Z`).
pub fn format_epoch_time(t: OffsetDateTime) -> String {
    // Rfc3339 formatting of a UTC time yields the `Z` suffix the generators use.
    t.format(&Rfc3339)
        .unwrap_or_else(|_| t.unix_timestamp().to_string())
}

lazy_static! {
    static ref NUMERIC_SUFFIX_RE: Regex = Regex::new(r"(\d+)").unwrap();
}

/// Extract the last run of digits in the file name, or -1 when there is none.
pub fn numeric_suffix(path: &Path) -> i64 {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    NUMERIC_SUFFIX_RE
        .captures_iter(&name)
        .last()
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(-1)
}

/// Match a file name against a simple glob pattern (only `*` wildcards).
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    fn matches(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..])),
            (Some(c), Some(d)) if c == d => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}

/// List the epoch files in `dir` matching `pattern`, ordered by their numeric suffix.
pub fn list_epoch_files(dir: impl AsRef<Path>, pattern: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .map(|n| pattern_matches(pattern, &n.to_string_lossy()))
                .unwrap_or(false)
        })
        .collect();
    files.sort_by_key(|path| (numeric_suffix(path), path.clone()));
    Ok(files)
}

/// Substitute the numeric counter into a file pattern: the first `*` is replaced by the
/// counter, so `epoch*.json` becomes `epoch42.json`.
pub fn numbered_file_name(pattern: &str, counter: usize) -> String {
    if pattern.contains('*') {
        pattern.replacen('*', &counter.to_string(), 1)
    } else {
        format!("{pattern}.{counter}")
    }
}
