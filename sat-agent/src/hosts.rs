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

//! Local `/etc/hosts` maintenance.
//!
//! Every agent publishes its primary overlay address under `/config/etchosts/{node}`, and
//! mirrors the whole prefix into its local hosts file so nodes can reach each other by name.

use std::path::{Path, PathBuf};

use regex::Regex;
use sat_store::{keys, WatchEvent};

/// Editor for one hosts file.
#[derive(Debug, Clone)]
pub struct HostsFile {
    path: PathBuf,
}

impl HostsFile {
    /// The production hosts file.
    pub fn system() -> Self {
        Self::at("/etc/hosts")
    }

    /// A hosts file at an arbitrary path (used by tests).
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn read(&self) -> std::io::Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e),
        }
    }

    /// Insert or replace the entry of `node`.
    pub fn upsert(&self, node: &str, addr: &str) -> std::io::Result<()> {
        let content = self.read()?;
        let line = format!("{addr}\t{node}");
        if content.lines().any(|l| l == line) {
            return Ok(());
        }
        let mut content = remove_entry(&content, node);
        content.push_str(&line);
        content.push('\n');
        std::fs::write(&self.path, content)
    }

    /// Remove the entry of `node`, if present.
    pub fn remove(&self, node: &str) -> std::io::Result<()> {
        let content = self.read()?;
        std::fs::write(&self.path, remove_entry(&content, node))
    }

    /// Apply one watch event on the `/config/etchosts/` prefix.
    pub fn handle_event(&self, event: &WatchEvent) {
        let result = match event {
            WatchEvent::Put { key, value, .. } => {
                let node = keys::last_segment(key);
                let addr = String::from_utf8_lossy(value).trim().to_string();
                if addr.is_empty() {
                    return;
                }
                log::debug!("hosts: {addr} {node}");
                self.upsert(node, &addr)
            }
            WatchEvent::Delete { key, .. } => self.remove(keys::last_segment(key)),
            _ => return,
        };
        if let Err(e) = result {
            log::error!("cannot update {}: {e}", self.path.display());
        }
    }
}

/// Drop every line whose last column is `node`.
fn remove_entry(content: &str, node: &str) -> String {
    // anchored so sat1 never swallows the entry of sat10
    let pattern = Regex::new(&format!(r"(?m)^.*\s+{}$\n?", regex::escape(node))).unwrap();
    pattern.replace_all(content, "").into_owned()
}
