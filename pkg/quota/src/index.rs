//! Group → quota name → namespace resolution.
//!
//! Resolving a single quota name is strict and fails on unknown names.
//! Aggregating a group's whole quota list is best-effort: unknown names are
//! logged and skipped so one stale reference does not revoke the rest of the
//! group's access.

use pkg_types::group::UserGroup;
use pkg_types::quota::{QualifiedName, QuotaNode};
use std::collections::BTreeSet;
use tracing::warn;

use crate::error::{QuotaError, Result};
use crate::locator;

pub fn namespaces_for_quota_name(root: &QuotaNode, quota_name: &str) -> Result<BTreeSet<String>> {
    let qn = QualifiedName::parse(quota_name);
    let node = locator::find_qualified(root, &qn)
        .ok_or_else(|| QuotaError::not_found("quota node", quota_name))?;
    Ok(locator::namespaces_under(node))
}

pub fn namespaces_for_quota_names(root: &QuotaNode, quota_names: &[String]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for name in quota_names {
        match namespaces_for_quota_name(root, name) {
            Ok(ns) => out.extend(ns),
            Err(_) => warn!("Index: quota {} not in tree {}, skipped", name, root.name),
        }
    }
    out
}

pub fn group_namespaces(root: &QuotaNode, group: &UserGroup) -> BTreeSet<String> {
    namespaces_for_quota_names(root, &group.spec.quota_names)
}

/// Leaves under the node, which must exist.
pub fn find_leaf_nodes_by_node<'a>(
    root: &'a QuotaNode,
    name: &str,
    prefix: Option<&str>,
) -> Result<Vec<&'a QuotaNode>> {
    let node = locator::find_node(root, name, prefix).ok_or_else(|| {
        QuotaError::not_found("quota node", QualifiedName::new(prefix, name).to_string())
    })?;
    Ok(locator::leaf_nodes(node))
}

/// Ancestors of the node, root first, the node itself last.
pub fn find_ancestor_node_names(
    root: &QuotaNode,
    name: &str,
    prefix: Option<&str>,
) -> Result<Vec<QualifiedName>> {
    locator::ancestor_chain(root, name, prefix).ok_or_else(|| {
        QuotaError::not_found("quota node", QualifiedName::new(prefix, name).to_string())
    })
}

/// Groups bound to the node. With `recursive`, groups bound to any of its
/// ancestors count too, since they reach the node's namespaces.
pub fn find_groups_by_quota_name<'g>(
    root: &QuotaNode,
    groups: &'g [UserGroup],
    qn: &QualifiedName,
    recursive: bool,
) -> Result<Vec<&'g UserGroup>> {
    let targets: BTreeSet<String> = if recursive {
        find_ancestor_node_names(root, qn.name(), qn.prefix())?
            .iter()
            .map(ToString::to_string)
            .collect()
    } else {
        if locator::find_qualified(root, qn).is_none() {
            return Err(QuotaError::not_found("quota node", qn.to_string()));
        }
        BTreeSet::from([qn.to_string()])
    };
    Ok(groups
        .iter()
        .filter(|g| g.spec.quota_names.iter().any(|q| targets.contains(q)))
        .collect())
}

/// Groups referencing any node of the subtree rooted at `node`.
pub fn groups_bound_within<'g>(node: &QuotaNode, groups: &'g [UserGroup]) -> Vec<&'g UserGroup> {
    let names: BTreeSet<String> = node
        .descendants()
        .iter()
        .map(|n| n.qualified_name().to_string())
        .collect();
    groups
        .iter()
        .filter(|g| g.spec.quota_names.iter().any(|q| names.contains(q)))
        .collect()
}
