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

use std::sync::Arc;

use pretty_assertions::assert_eq;
use sat_store::{keys, MemStore, Store, StoreExt, TaskResult, WatchEvent};

use crate::tasks::TaskRunner;

#[tokio::test]
async fn successful_batch_reports_exit_zero() {
    let store = MemStore::new();
    let runner = TaskRunner::new("grd1", Arc::new(store.clone()));
    let code = runner
        .execute(&["true".to_string(), "echo hi".to_string()], 7)
        .await
        .unwrap();
    assert_eq!(code, 0);

    let result: TaskResult = store
        .get_json(&keys::state_run("grd1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.ran_at_revision, 7);
}

#[tokio::test]
async fn failing_batch_reports_its_exit_code() {
    let store = MemStore::new();
    let runner = TaskRunner::new("grd1", Arc::new(store.clone()));
    let code = runner
        .execute(&["exit 3".to_string()], 8)
        .await
        .unwrap();
    assert_eq!(code, 3);

    let result: TaskResult = store
        .get_json(&keys::state_run("grd1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.exit_code, 3);
}

#[tokio::test]
async fn a_failure_stops_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker");
    let store = MemStore::new();
    let runner = TaskRunner::new("grd1", Arc::new(store.clone()));
    let code = runner
        .execute(
            &["false".to_string(), format!("touch {}", marker.display())],
            9,
        )
        .await
        .unwrap();
    assert_ne!(code, 0);
    assert!(!marker.exists());
}

#[tokio::test]
async fn watch_event_triggers_execution() {
    let store = MemStore::new();
    let mut runner = TaskRunner::new("grd1", Arc::new(store.clone()));
    runner
        .handle_event(WatchEvent::Put {
            key: keys::run("grd1"),
            value: br#"["echo hi"]"#.to_vec(),
            revision: 12,
        })
        .await
        .unwrap();
    let result: TaskResult = store
        .get_json(&keys::state_run("grd1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.ran_at_revision, 12);
}

#[tokio::test]
async fn malformed_task_list_is_skipped() {
    let store = MemStore::new();
    let mut runner = TaskRunner::new("grd1", Arc::new(store.clone()));
    runner
        .handle_event(WatchEvent::Put {
            key: keys::run("grd1"),
            value: b"not json".to_vec(),
            revision: 13,
        })
        .await
        .unwrap();
    assert!(store.get(&keys::state_run("grd1")).await.unwrap().is_none());
}

#[tokio::test]
async fn pending_task_list_runs_at_startup() {
    let store = MemStore::new();
    store
        .put(&keys::run("grd1"), br#"["true"]"#.to_vec())
        .await
        .unwrap();
    let mut runner = TaskRunner::new("grd1", Arc::new(store.clone()));
    runner.run_pending().await.unwrap();
    let result: TaskResult = store
        .get_json(&keys::state_run("grd1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.exit_code, 0);
}
