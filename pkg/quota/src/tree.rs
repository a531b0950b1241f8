//! Quota tree orchestration.
//!
//! Every edit runs the same sequence: build the candidate tree, validate it,
//! gate the namespaces that move, rewrite group references, plan and then
//! reconcile the affected principals, and only then replace the stored tree.
//! Everything up to the principal plan is free of side effects.

use pkg_constants::quota::{DEFAULT_TREE_NAME, DEFAULT_TREE_NAMESPACE};
use pkg_state::Registry;
use pkg_types::group::UserGroup;
use pkg_types::quantity::QuantityForm;
use pkg_types::quota::{QualifiedName, QuotaNode, QuotaTree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use crate::error::{QuotaError, Result};
use crate::index;
use crate::locator;
use crate::safety::SafetyGate;
use crate::sync::{PrincipalSync, SyncReport};
use crate::validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditAction {
    AddNode,
    UpdateNode,
    DeleteNode,
    UpdateResourceType,
}

impl fmt::Display for EditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditAction::AddNode => write!(f, "AddNode"),
            EditAction::UpdateNode => write!(f, "UpdateNode"),
            EditAction::DeleteNode => write!(f, "DeleteNode"),
            EditAction::UpdateResourceType => write!(f, "UpdateResourceType"),
        }
    }
}

impl FromStr for EditAction {
    type Err = QuotaError;

    fn from_str(s: &str) -> Result<Self> {
        let folded: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match folded.as_str() {
            "addnode" => Ok(EditAction::AddNode),
            "updatenode" => Ok(EditAction::UpdateNode),
            "deletenode" => Ok(EditAction::DeleteNode),
            "updateresourcetype" => Ok(EditAction::UpdateResourceType),
            _ => Err(QuotaError::InvalidRequest(format!("unknown action {}", s))),
        }
    }
}

/// Which node an update targets. `prefix` is shared by the old and new
/// names: an edit renames a node in place, it does not move it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEdit {
    pub action: EditAction,
    pub old_node_name: Option<String>,
    pub new_node_name: Option<String>,
    pub prefix: Option<String>,
}

impl TreeEdit {
    fn required<'a>(value: &'a Option<String>, what: &str, action: EditAction) -> Result<&'a str> {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| QuotaError::InvalidRequest(format!("{} requires {}", action, what)))
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref().filter(|p| !p.is_empty())
    }
}

/// Fill in tree name and namespace defaults.
pub fn tree_coordinates(name: &str, namespace: &str) -> (String, String) {
    let name = if name.is_empty() { DEFAULT_TREE_NAME } else { name };
    let namespace = if namespace.is_empty() {
        DEFAULT_TREE_NAMESPACE
    } else {
        namespace
    };
    (name.to_string(), namespace.to_string())
}

fn walk_mut(node: &mut QuotaNode, f: &mut impl FnMut(&mut QuotaNode)) {
    f(node);
    for child in &mut node.children {
        walk_mut(child, f);
    }
}

/// Carry uids from `old` over to candidate nodes that arrive without one,
/// following the rename from `old_edited` to `new_edited` when given.
pub fn inherit_uids(
    candidate: &mut QuotaNode,
    old: &QuotaNode,
    renamed: Option<(&QualifiedName, &QualifiedName)>,
) {
    let mut used: HashSet<String> = candidate
        .descendants()
        .iter()
        .filter(|n| !n.uid.is_empty())
        .map(|n| n.uid.clone())
        .collect();
    walk_mut(candidate, &mut |node| {
        if !node.uid.is_empty() {
            return;
        }
        let qn = node.qualified_name();
        let guess = match renamed {
            Some((from, to)) if qn.is_within(to) => qn.rebase(to, from).unwrap_or(qn),
            _ => qn,
        };
        if let Some(prev) = locator::find_qualified(old, &guess) {
            if !prev.uid.is_empty() && used.insert(prev.uid.clone()) {
                node.uid = prev.uid.clone();
            }
        }
    });
}

/// Old qualified name → new qualified name for every node of `old`; `None`
/// when the node no longer exists in `candidate`.
pub fn reference_map(
    old: &QuotaNode,
    candidate: &QuotaNode,
    renamed: Option<(&QualifiedName, &QualifiedName)>,
) -> HashMap<String, Option<String>> {
    old.descendants()
        .into_iter()
        .map(|n| {
            let old_qn = n.qualified_name();
            let found = locator::find_by_uid(candidate, &n.uid).or_else(|| {
                let guess = match renamed {
                    Some((from, to)) => old_qn.rebase(from, to).unwrap_or_else(|| old_qn.clone()),
                    None => old_qn.clone(),
                };
                locator::find_qualified(candidate, &guess)
            });
            (
                old_qn.to_string(),
                found.map(|f| f.qualified_name().to_string()),
            )
        })
        .collect()
}

/// Rewrite a group's quota names through `map`. Names unknown to the old
/// tree are kept as they are. Fails if a referenced node disappears.
fn rewrite_group(group: &UserGroup, map: &HashMap<String, Option<String>>) -> Result<UserGroup> {
    let mut out = group.clone();
    let mut names = Vec::with_capacity(group.spec.quota_names.len());
    for q in &group.spec.quota_names {
        match map.get(q) {
            Some(Some(new)) => names.push(new.clone()),
            Some(None) => {
                return Err(QuotaError::Conflict(format!(
                    "Please delete user group first userGroup name:{}",
                    group.group_name()
                )));
            }
            None => names.push(q.clone()),
        }
    }
    let mut dedup = HashSet::new();
    names.retain(|n| dedup.insert(n.clone()));
    out.spec.quota_names = names;
    Ok(out)
}

fn owner_key(node: &QuotaNode) -> String {
    if node.uid.is_empty() {
        format!("new:{}", node.qualified_name())
    } else {
        node.uid.clone()
    }
}

fn namespace_owners(root: &QuotaNode) -> BTreeMap<String, BTreeSet<String>> {
    let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for node in root.descendants() {
        for ns in &node.namespaces {
            out.entry(ns.clone()).or_default().insert(owner_key(node));
        }
    }
    out
}

/// Namespaces that join the tree, leave it, or change owning node anywhere
/// between `old` and `candidate`. Candidate uids must already be inherited.
pub fn moving_namespaces(old: &QuotaNode, candidate: &QuotaNode) -> BTreeSet<String> {
    let before = namespace_owners(old);
    let after = namespace_owners(candidate);
    before
        .keys()
        .chain(after.keys())
        .filter(|ns| before.get(*ns) != after.get(*ns))
        .cloned()
        .collect()
}

type Layout = BTreeMap<String, (String, BTreeSet<String>)>;

fn layout(root: &QuotaNode) -> Layout {
    root.descendants()
        .into_iter()
        .map(|n| {
            (
                n.uid.clone(),
                (
                    n.qualified_name().to_string(),
                    n.namespaces.iter().cloned().collect(),
                ),
            )
        })
        .collect()
}

/// Only quantities may differ: same nodes by uid, same names, same
/// namespaces on each node.
fn ensure_same_layout(old: &QuotaNode, candidate: &QuotaNode, action: EditAction) -> Result<()> {
    let unmatched = candidate.descendants().iter().any(|n| n.uid.is_empty());
    if unmatched || layout(old) != layout(candidate) {
        return Err(QuotaError::InvalidRequest(format!(
            "{} cannot add, remove or rename nodes or move namespaces",
            action
        )));
    }
    Ok(())
}

/// Normalise and validate a proposed tree without touching any state.
pub fn check_tree(root: &QuotaNode) -> Result<QuotaNode> {
    let root = TreeService::prepare(root);
    TreeService::check(&root)?;
    Ok(root)
}

pub struct TreeService {
    registry: Registry,
    gate: SafetyGate,
    sync: PrincipalSync,
    group_namespace: String,
}

impl TreeService {
    pub fn new(registry: Registry, gate: SafetyGate, sync: PrincipalSync, group_namespace: &str) -> Self {
        Self {
            registry,
            gate,
            sync,
            group_namespace: group_namespace.to_string(),
        }
    }

    /// The stored tree, quantities in stored form.
    pub async fn load_tree(&self, name: &str, namespace: &str) -> Result<QuotaTree> {
        let (name, namespace) = tree_coordinates(name, namespace);
        self.registry
            .get(Some(&namespace), &name)
            .await?
            .ok_or_else(|| QuotaError::not_found("quota tree", format!("{}/{}", namespace, name)))
    }

    /// The stored tree with unbounded quantities shown as `N/A`.
    pub async fn get_tree(&self, name: &str, namespace: &str) -> Result<QuotaTree> {
        let tree = self.load_tree(name, namespace).await?;
        let root = tree.root.normalized(QuantityForm::Wire);
        Ok(tree.with_root(root))
    }

    async fn list_groups(&self) -> Result<Vec<UserGroup>> {
        Ok(self.registry.list(Some(&self.group_namespace)).await?)
    }

    fn prepare(root: &QuotaNode) -> QuotaNode {
        let mut root = root.normalized(QuantityForm::Stored);
        let name = root.name.clone();
        root.rename(None, &name);
        root
    }

    fn check(root: &QuotaNode) -> Result<()> {
        let violations = validator::validate(root);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(QuotaError::Validation(violations))
        }
    }

    pub async fn create_tree(&self, root: QuotaNode, name: &str, namespace: &str) -> Result<QuotaTree> {
        let (name, namespace) = tree_coordinates(name, namespace);
        let existing: Option<QuotaTree> = self.registry.get(Some(&namespace), &name).await?;
        if existing.is_some() {
            return Err(QuotaError::Conflict(format!(
                "quota tree {}/{} already exists",
                namespace, name
            )));
        }

        let mut root = Self::prepare(&root);
        Self::check(&root)?;
        self.gate
            .assert_namespaces_idle(&locator::namespaces_under(&root))
            .await?;
        root.assign_uids();

        let stored = self
            .registry
            .create_or_replace(QuotaTree::new(&name, &namespace, root))
            .await?;
        info!("Tree {}: created in {}", name, namespace);
        Ok(stored)
    }

    pub async fn update_tree(&self, proposed: QuotaTree, edit: TreeEdit) -> Result<QuotaTree> {
        let (name, namespace) = tree_coordinates(&proposed.name, &proposed.namespace);
        let old_tree = self.load_tree(&name, &namespace).await?;
        let old_root = &old_tree.root;
        let prefix = edit.prefix();
        let mut candidate = Self::prepare(&proposed.root);

        if edit.action == EditAction::UpdateResourceType {
            inherit_uids(&mut candidate, old_root, None);
            Self::check(&candidate)?;
            ensure_same_layout(old_root, &candidate, edit.action)?;
            info!("Tree {}: resource types updated", name);
            return Ok(self
                .registry
                .create_or_replace(old_tree.with_root(candidate))
                .await?);
        }

        let old_name = match edit.action {
            EditAction::UpdateNode | EditAction::DeleteNode => {
                Some(TreeEdit::required(&edit.old_node_name, "oldNodeName", edit.action)?)
            }
            _ => None,
        };
        let new_name = match edit.action {
            EditAction::AddNode | EditAction::UpdateNode => {
                Some(TreeEdit::required(&edit.new_node_name, "newNodeName", edit.action)?)
            }
            _ => None,
        };
        let old_qn = old_name.map(|n| QualifiedName::new(prefix, n));
        let new_qn = new_name.map(|n| QualifiedName::new(prefix, n));
        let renamed = match (&old_qn, &new_qn) {
            (Some(o), Some(n)) => Some((o, n)),
            _ => None,
        };

        inherit_uids(&mut candidate, old_root, renamed);

        // 1. validate
        Self::check(&candidate)?;

        let old_node = match &old_qn {
            Some(qn) => Some(
                locator::find_qualified(old_root, qn)
                    .ok_or_else(|| QuotaError::not_found("quota node", qn.to_string()))?,
            ),
            None => None,
        };
        let new_node = match &new_qn {
            Some(qn) => Some(
                locator::find_qualified(&candidate, qn)
                    .ok_or_else(|| QuotaError::not_found("quota node", qn.to_string()))?,
            ),
            None => None,
        };
        if let (EditAction::DeleteNode, Some(old)) = (edit.action, old_node) {
            let lingering = locator::find_by_uid(&candidate, &old.uid)
                .or_else(|| locator::find_qualified(&candidate, &old.qualified_name()));
            if lingering.is_some() {
                return Err(QuotaError::InvalidRequest(format!(
                    "node {} is still present in the tree",
                    old.qualified_name()
                )));
            }
        }

        if let (Some(old), Some(new)) = (old_node, new_node) {
            if !old.uid.is_empty() && new.uid != old.uid {
                return Err(QuotaError::InvalidRequest(format!(
                    "node {} does not continue {}",
                    new.qualified_name(),
                    old.qualified_name()
                )));
            }
        }

        // 2. safety gate on every namespace that moves, wherever it is
        let moving = moving_namespaces(old_root, &candidate);
        info!(
            "Tree {}: {} {:?} -> {:?}, {} namespace(s) moving",
            name,
            edit.action,
            old_qn.as_ref().map(ToString::to_string),
            new_qn.as_ref().map(ToString::to_string),
            moving.len()
        );
        self.gate.assert_namespaces_idle(&moving).await?;

        // 3. group references, checked before anything is written
        let groups = self.list_groups().await?;
        let map = reference_map(old_root, &candidate, renamed);
        let mut rewritten = Vec::with_capacity(groups.len());
        for g in &groups {
            rewritten.push(rewrite_group(g, &map)?);
        }
        candidate.assign_uids();

        let mut affected: HashSet<String> = HashSet::new();
        for (old_g, new_g) in groups.iter().zip(&rewritten) {
            let ns_before = index::group_namespaces(old_root, old_g);
            let ns_after = index::group_namespaces(&candidate, new_g);
            if ns_before != ns_after {
                affected.insert(new_g.name.clone());
            }
        }

        // 4. plan the affected principals; nothing has been written yet
        let plan = if affected.is_empty() {
            None
        } else {
            let users: Vec<_> = self
                .sync
                .list_users()
                .await?
                .into_iter()
                .filter(|u| u.spec.groups.iter().any(|g| affected.contains(g)))
                .collect();
            Some(self.sync.plan(users, &rewritten, Some(&candidate))?)
        };

        // 5. propagate to groups
        for (old_g, new_g) in groups.iter().zip(&rewritten) {
            if old_g.spec.quota_names != new_g.spec.quota_names {
                self.registry.create_or_replace(new_g.clone()).await?;
                info!(
                    "Tree {}: group {} now bound to {:?}",
                    name,
                    new_g.group_name(),
                    new_g.spec.quota_names
                );
            }
        }

        // 6. propagate to principals
        if let Some(plan) = plan {
            let report: SyncReport = self.sync.apply(plan).await?;
            info!(
                "Tree {}: reconciled {} principal(s) for {} group(s)",
                name,
                report.principals,
                affected.len()
            );
        }

        // 7. persist
        let stored = self
            .registry
            .create_or_replace(old_tree.with_root(candidate))
            .await?;
        info!("Tree {}: {} applied (rv {})", name, edit.action, stored.resource_version);
        Ok(stored)
    }

    pub async fn delete_tree(&self, name: &str, namespace: &str) -> Result<()> {
        let tree = self.load_tree(name, namespace).await?;
        let groups = self.list_groups().await?;
        if let Some(g) = index::groups_bound_within(&tree.root, &groups).first() {
            return Err(QuotaError::Conflict(format!(
                "Please delete user group first userGroup name:{}",
                g.group_name()
            )));
        }
        self.gate
            .assert_namespaces_idle(&locator::namespaces_under(&tree.root))
            .await?;
        self.registry
            .delete::<QuotaTree>(Some(&tree.namespace), &tree.name)
            .await?;
        info!("Tree {}: deleted from {}", tree.name, tree.namespace);
        Ok(())
    }
}
