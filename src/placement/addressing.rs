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

//! Overlay subnet allocation.
//!
//! Every node with `auto-assign-ips` receives a /30 (IPv4) and/or /126 (IPv6) drawn from the
//! first `auto-assign-super-cidr` rule matching its type. Rules are applied in input order
//! with `any` rules last; within a rule, nodes are visited in input order. Subnets consumed
//! by explicit `cidr`/`cidr-v6` overrides are skipped, and the resulting allocation must stay
//! disjoint from every worker underlay supernet.

use std::collections::BTreeMap;

use ipnet::{Ipv4Net, Ipv6Net};
use sat_store::{AutoAssignRule, NodeSpec, WorkerSpec};

use super::PlacementError;
use crate::config::IpStack;

/// Prefix length of per-node IPv4 overlay subnets.
pub const V4_PREFIX_LEN: u8 = 30;
/// Prefix length of per-node IPv6 overlay subnets.
pub const V6_PREFIX_LEN: u8 = 126;

/// Assign overlay subnets to all auto-assign nodes, in place.
pub fn assign_overlay_subnets(
    nodes: &mut [(String, NodeSpec)],
    workers: &BTreeMap<String, WorkerSpec>,
    stack: IpStack,
) -> Result<(), PlacementError> {
    validate_explicit_subnets(nodes, workers)?;

    // rules in first-seen order across nodes, catch-all rules last
    let mut rules: Vec<AutoAssignRule> = Vec::new();
    for (_, spec) in nodes.iter() {
        for rule in &spec.l3.auto_assign_super_cidr {
            if !rules.contains(rule) {
                rules.push(rule.clone());
            }
        }
    }
    rules.sort_by_key(|r| r.is_catch_all());

    let mut taken_v4: Vec<Ipv4Net> = nodes.iter().filter_map(|(_, s)| s.l3.cidr).collect();
    let mut taken_v6: Vec<Ipv6Net> = nodes.iter().filter_map(|(_, s)| s.l3.cidr_v6).collect();

    for rule in &rules {
        if stack.v4() {
            if let Some(pool) = rule.super_cidr {
                for (name, spec) in nodes.iter_mut() {
                    if spec.l3.cidr.is_some()
                        || !spec.l3.auto_assign_ips
                        || !rule.matches(&spec.node_type)
                    {
                        continue;
                    }
                    let net = next_free_v4(pool, &taken_v4)?.ok_or_else(|| {
                        PlacementError::AddressPoolExhausted {
                            pool: pool.to_string(),
                            node: name.clone(),
                        }
                    })?;
                    log::debug!("assigned {net} to {name}");
                    taken_v4.push(net);
                    spec.l3.cidr = Some(net);
                }
            }
        }
        if stack.v6() {
            if let Some(pool) = rule.super_cidr6 {
                for (name, spec) in nodes.iter_mut() {
                    if spec.l3.cidr_v6.is_some()
                        || !spec.l3.auto_assign_ips
                        || !rule.matches(&spec.node_type)
                    {
                        continue;
                    }
                    let net = next_free_v6(pool, &taken_v6)?.ok_or_else(|| {
                        PlacementError::AddressPoolExhausted {
                            pool: pool.to_string(),
                            node: name.clone(),
                        }
                    })?;
                    log::debug!("assigned {net} to {name}");
                    taken_v6.push(net);
                    spec.l3.cidr_v6 = Some(net);
                }
            }
        }
    }

    check_disjoint(nodes, workers)
}

fn next_free_v4(pool: Ipv4Net, taken: &[Ipv4Net]) -> Result<Option<Ipv4Net>, PlacementError> {
    let subnets = pool.subnets(V4_PREFIX_LEN).map_err(|_| {
        PlacementError::Validation(format!("rule pool {pool} is smaller than a /{V4_PREFIX_LEN}"))
    })?;
    Ok(subnets
        .into_iter()
        .find(|net| !taken.iter().any(|t| overlaps_v4(t, net))))
}

fn next_free_v6(pool: Ipv6Net, taken: &[Ipv6Net]) -> Result<Option<Ipv6Net>, PlacementError> {
    let subnets = pool.subnets(V6_PREFIX_LEN).map_err(|_| {
        PlacementError::Validation(format!("rule pool {pool} is smaller than a /{V6_PREFIX_LEN}"))
    })?;
    Ok(subnets
        .into_iter()
        .find(|net| !taken.iter().any(|t| overlaps_v6(t, net))))
}

fn overlaps_v4(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(b) || b.contains(a)
}

fn overlaps_v6(a: &Ipv6Net, b: &Ipv6Net) -> bool {
    a.contains(b) || b.contains(a)
}

/// Explicit overrides must have the right prefix length and stay clear of the underlay.
fn validate_explicit_subnets(
    nodes: &[(String, NodeSpec)],
    workers: &BTreeMap<String, WorkerSpec>,
) -> Result<(), PlacementError> {
    for (name, spec) in nodes {
        if let Some(net) = spec.l3.cidr {
            if net.prefix_len() != V4_PREFIX_LEN {
                return Err(PlacementError::Validation(format!(
                    "node {name}: explicit cidr {net} is not a /{V4_PREFIX_LEN}"
                )));
            }
            if let Some((worker, w)) = workers
                .iter()
                .find(|(_, w)| w.sat_vnet_super_cidr.contains(&net.network()))
            {
                return Err(PlacementError::Validation(format!(
                    "node {name}: cidr {net} overlaps underlay supernet {} of worker {worker}",
                    w.sat_vnet_super_cidr
                )));
            }
        }
        if let Some(net) = spec.l3.cidr_v6 {
            if net.prefix_len() != V6_PREFIX_LEN {
                return Err(PlacementError::Validation(format!(
                    "node {name}: explicit cidr-v6 {net} is not a /{V6_PREFIX_LEN}"
                )));
            }
        }
    }
    Ok(())
}

/// After allocation, all node subnets must be pairwise disjoint and outside the underlay.
fn check_disjoint(
    nodes: &[(String, NodeSpec)],
    workers: &BTreeMap<String, WorkerSpec>,
) -> Result<(), PlacementError> {
    let assigned: Vec<(&str, Ipv4Net)> = nodes
        .iter()
        .filter_map(|(n, s)| s.l3.cidr.map(|c| (n.as_str(), c)))
        .collect();
    for (i, (n1, c1)) in assigned.iter().enumerate() {
        for (n2, c2) in &assigned[i + 1..] {
            if overlaps_v4(c1, c2) {
                return Err(PlacementError::Validation(format!(
                    "nodes {n1} and {n2} have overlapping overlay subnets ({c1} and {c2})"
                )));
            }
        }
        if let Some((worker, w)) = workers
            .iter()
            .find(|(_, w)| w.sat_vnet_super_cidr.contains(&c1.network()))
        {
            return Err(PlacementError::Validation(format!(
                "node {n1}: overlay subnet {c1} overlaps underlay supernet {} of worker {worker}",
                w.sat_vnet_super_cidr
            )));
        }
    }
    Ok(())
}
