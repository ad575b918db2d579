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
use sat_store::{EtcdConfig, NodeSpec, WorkerSpec};

use crate::worker::{docker, RemoteCmd};

fn worker_spec() -> WorkerSpec {
    serde_json::from_str(
        r#"{
            "ip": "10.0.0.11",
            "sat-vnet": "sat-vnet",
            "sat-vnet-cidr": "172.25.1.0/24",
            "sat-vnet-super-cidr": "172.25.0.0/16",
            "cpu": "8", "mem": "16GiB"
        }"#,
    )
    .unwrap()
}

#[test]
fn plain_words_stay_unquoted() {
    let cmd = RemoteCmd::new("docker").args(["ps", "-a", "--format", "{{.Names}}"]);
    assert_eq!(cmd.command_line(), "docker ps -a --format {{.Names}}");
}

#[test]
fn words_with_spaces_are_quoted() {
    let cmd = RemoteCmd::new("sh").args(["-c", "echo hi there"]);
    assert_eq!(cmd.command_line(), "sh -c 'echo hi there'");
}

#[test]
fn single_quotes_survive_quoting() {
    let cmd = RemoteCmd::new("echo").arg("it's");
    assert_eq!(cmd.command_line(), r#"echo 'it'\''s'"#);
}

#[test]
fn env_is_rendered_as_prefix() {
    let cmd = RemoteCmd::new("env-check").env("A", "1").env("B", "two words");
    assert_eq!(cmd.command_line(), "env A=1 'B=two words' env-check");
}

#[test]
fn docker_run_carries_node_identity_and_store_endpoint() {
    let node: NodeSpec = serde_json::from_str(
        r#"{"type": "satellite", "image": "example/sat:latest",
            "cpu-limit": "2", "mem-limit": "1GiB"}"#,
    )
    .unwrap();
    let etcd = EtcdConfig {
        host: "10.0.0.1".to_string(),
        port: 2379,
        ..Default::default()
    };
    let line = docker::run("sat1", &node, &worker_spec(), &etcd).command_line();
    assert!(line.starts_with("docker run -d --name sat1 --hostname sat1 --net sat-vnet"));
    assert!(line.contains("--privileged"));
    assert!(line.contains(&format!("--label {}", docker::LABEL)));
    assert!(line.contains("--cpus 2"));
    assert!(line.contains("--memory 1GiB"));
    assert!(line.contains("-e NODE_NAME=sat1"));
    assert!(line.contains("-e ETCD_ENDPOINT=10.0.0.1:2379"));
    assert!(line.ends_with("example/sat:latest"));
    // no credentials configured: none leak into the container
    assert!(!line.contains("ETCD_USER"));
}

#[test]
fn docker_run_ships_credentials_when_configured() {
    let node: NodeSpec = serde_json::from_str(r#"{"type": "satellite"}"#).unwrap();
    let etcd = EtcdConfig {
        host: "10.0.0.1".to_string(),
        port: 2379,
        user: Some("root".to_string()),
        password: Some("secret".to_string()),
        ca_cert: Some("/etc/etcd/ca.crt".into()),
    };
    let line = docker::run("sat1", &node, &worker_spec(), &etcd).command_line();
    assert!(line.contains("-e ETCD_USER=root"));
    assert!(line.contains("-e ETCD_PASSWORD=secret"));
    assert!(line.contains(&format!("-e ETCD_CA_CERT={}", docker::CA_CERT_PATH)));
}

#[test]
fn docker_exec_variants() {
    let cmd = vec!["ip".to_string(), "a".to_string()];
    assert_eq!(
        docker::exec("sat1", false, false, &cmd).command_line(),
        "docker exec sat1 ip a"
    );
    assert_eq!(
        docker::exec("sat1", true, false, &cmd).command_line(),
        "docker exec -i -t sat1 ip a"
    );
    assert_eq!(
        docker::exec("sat1", false, true, &cmd).command_line(),
        "docker exec -d sat1 ip a"
    );
}
