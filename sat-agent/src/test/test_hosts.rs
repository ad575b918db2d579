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

use pretty_assertions::assert_eq;
use sat_store::WatchEvent;

use crate::hosts::HostsFile;

fn hosts_in(dir: &tempfile::TempDir) -> HostsFile {
    HostsFile::at(dir.path().join("hosts"))
}

fn content(dir: &tempfile::TempDir) -> String {
    std::fs::read_to_string(dir.path().join("hosts")).unwrap_or_default()
}

#[test]
fn upsert_appends_and_replaces() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = hosts_in(&dir);

    hosts.upsert("sat1", "10.100.0.1").unwrap();
    hosts.upsert("sat2", "10.100.0.5").unwrap();
    assert_eq!(content(&dir), "10.100.0.1\tsat1\n10.100.0.5\tsat2\n");

    // a moved node keeps a single entry
    hosts.upsert("sat1", "10.100.0.9").unwrap();
    assert_eq!(content(&dir), "10.100.0.5\tsat2\n10.100.0.9\tsat1\n");
}

#[test]
fn upsert_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = hosts_in(&dir);
    hosts.upsert("sat1", "10.100.0.1").unwrap();
    hosts.upsert("sat1", "10.100.0.1").unwrap();
    assert_eq!(content(&dir), "10.100.0.1\tsat1\n");
}

#[test]
fn remove_only_touches_the_exact_name() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = hosts_in(&dir);
    hosts.upsert("sat1", "10.100.0.1").unwrap();
    hosts.upsert("sat10", "10.100.0.41").unwrap();

    hosts.remove("sat1").unwrap();
    assert_eq!(content(&dir), "10.100.0.41\tsat10\n");
}

#[test]
fn watch_events_drive_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let hosts = hosts_in(&dir);

    hosts.handle_event(&WatchEvent::Put {
        key: "/config/etchosts/sat1".to_string(),
        value: b"10.100.0.1".to_vec(),
        revision: 1,
    });
    assert_eq!(content(&dir), "10.100.0.1\tsat1\n");

    hosts.handle_event(&WatchEvent::Delete {
        key: "/config/etchosts/sat1".to_string(),
        revision: 2,
    });
    assert_eq!(content(&dir), "");
}
