use chrono::{DateTime, Utc};
use pkg_constants::quota::NAME_SEPARATOR;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::quantity::{QuantityForm, normalize};

// --- Qualified names ---

/// Dot-joined path identifying a quota node: `prefix.name`, or just `name`
/// at the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    prefix: Option<String>,
    name: String,
}

impl QualifiedName {
    /// An empty prefix is treated as no prefix.
    pub fn new(prefix: Option<&str>, name: &str) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            name: name.to_string(),
        }
    }

    /// Split at the last separator: everything before it is the prefix.
    pub fn parse(qualified: &str) -> Self {
        match qualified.rsplit_once(NAME_SEPARATOR) {
            Some((prefix, name)) => Self::new(Some(prefix), name),
            None => Self::new(None, qualified),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn segments(&self) -> Vec<&str> {
        let mut segs: Vec<&str> = self
            .prefix
            .as_deref()
            .map(|p| p.split(NAME_SEPARATOR).collect())
            .unwrap_or_default();
        segs.push(&self.name);
        segs
    }

    /// True if `self` equals `ancestor` or lies beneath it.
    pub fn is_within(&self, ancestor: &QualifiedName) -> bool {
        let mine = self.segments();
        let theirs = ancestor.segments();
        mine.len() >= theirs.len() && mine[..theirs.len()] == theirs[..]
    }

    /// Move `self` from under `from` to under `to`, keeping the relative
    /// path. `None` if `self` is not within `from`.
    pub fn rebase(&self, from: &QualifiedName, to: &QualifiedName) -> Option<QualifiedName> {
        if !self.is_within(from) {
            return None;
        }
        let mine = self.segments();
        let rest = &mine[from.segments().len()..];
        let mut joined = to.to_string();
        for seg in rest {
            joined.push(NAME_SEPARATOR);
            joined.push_str(seg);
        }
        Some(QualifiedName::parse(&joined))
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(p) => write!(f, "{}{}{}", p, NAME_SEPARATOR, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

// --- Quota node ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaNode {
    /// Stable identity, assigned once and kept across renames.
    #[serde(default)]
    pub uid: String,
    /// Local, unqualified name.
    pub name: String,
    /// Dot-joined ancestor path; absent at the root.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Guaranteed resources, resource type → quantity.
    #[serde(default)]
    pub min: BTreeMap<String, String>,
    /// Resource ceilings, resource type → quantity.
    #[serde(default)]
    pub max: BTreeMap<String, String>,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub children: Vec<QuotaNode>,
}

impl QuotaNode {
    pub fn new(name: &str, prefix: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            ..Default::default()
        }
    }

    pub fn qualified_name(&self) -> QualifiedName {
        QualifiedName::new(self.prefix.as_deref(), &self.name)
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Pre-order traversal of the subtree rooted here.
    pub fn descendants(&self) -> Vec<&QuotaNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.descendants());
        }
        out
    }

    /// Give every node without a uid a fresh one.
    pub fn assign_uids(&mut self) {
        if self.uid.is_empty() {
            self.uid = Uuid::new_v4().to_string();
        }
        for child in &mut self.children {
            child.assign_uids();
        }
    }

    /// Rename this node and re-prefix every descendant so qualified names
    /// follow the new ancestry.
    pub fn rename(&mut self, prefix: Option<&str>, name: &str) {
        self.name = name.to_string();
        self.prefix = prefix.filter(|p| !p.is_empty()).map(str::to_string);
        let child_prefix = self.qualified_name().to_string();
        for child in &mut self.children {
            let child_name = child.name.clone();
            child.rename(Some(&child_prefix), &child_name);
        }
    }

    /// Copy of the subtree with every quantity rendered in `form`.
    pub fn normalized(&self, form: QuantityForm) -> QuotaNode {
        let conv = |m: &BTreeMap<String, String>| {
            m.iter()
                .map(|(k, v)| (k.clone(), normalize(v, form)))
                .collect::<BTreeMap<_, _>>()
        };
        QuotaNode {
            uid: self.uid.clone(),
            name: self.name.clone(),
            prefix: self.prefix.clone(),
            min: conv(&self.min),
            max: conv(&self.max),
            namespaces: self.namespaces.clone(),
            children: self.children.iter().map(|c| c.normalized(form)).collect(),
        }
    }
}

// --- Quota tree ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaTree {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub root: QuotaNode,
}

crate::namespaced_resource!(QuotaTree, "quotatrees");

impl QuotaTree {
    pub fn new(name: &str, namespace: &str, root: QuotaNode) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            resource_version: 0,
            created_at: None,
            root,
        }
    }

    /// Same tree object with a replacement root.
    pub fn with_root(&self, root: QuotaNode) -> Self {
        Self {
            root,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn root_has_no_prefix() {
        let qn = QualifiedName::new(Some(""), "root");
        assert_eq!(qn.prefix(), None);
        assert_eq!(qn.to_string(), "root");
    }

    #[test]
    fn parse_splits_at_last_separator() {
        let qn = QualifiedName::parse("root.team-a.dev");
        assert_eq!(qn.prefix(), Some("root.team-a"));
        assert_eq!(qn.name(), "dev");
        assert_eq!(qn.segments(), vec!["root", "team-a", "dev"]);
    }

    #[test]
    fn within_compares_whole_segments() {
        let a = QualifiedName::parse("root.team-a");
        assert!(QualifiedName::parse("root.team-a.dev").is_within(&a));
        assert!(a.is_within(&a));
        assert!(!QualifiedName::parse("root.team-ab").is_within(&a));
        assert!(!QualifiedName::parse("root").is_within(&a));
    }

    #[test]
    fn rebase_moves_descendants() {
        let from = QualifiedName::parse("root.team-a");
        let to = QualifiedName::parse("root.team-b");
        let moved = QualifiedName::parse("root.team-a.dev.gpu")
            .rebase(&from, &to)
            .unwrap();
        assert_eq!(moved.to_string(), "root.team-b.dev.gpu");
        assert!(QualifiedName::parse("root.other").rebase(&from, &to).is_none());
    }

    #[test]
    fn rename_reprefixes_subtree() {
        let mut node = QuotaNode::new("team-a", None);
        let mut dev = QuotaNode::new("dev", Some("team-a"));
        dev.children.push(QuotaNode::new("gpu", Some("team-a.dev")));
        node.children.push(dev);

        node.rename(None, "team-a-2");

        let names: Vec<String> = node
            .descendants()
            .iter()
            .map(|n| n.qualified_name().to_string())
            .collect();
        assert_eq!(names, vec!["team-a-2", "team-a-2.dev", "team-a-2.dev.gpu"]);
    }

    #[test]
    fn assign_uids_keeps_existing() {
        let mut node = QuotaNode::new("root", None);
        node.uid = "fixed".to_string();
        node.children.push(QuotaNode::new("a", Some("root")));
        node.assign_uids();
        assert_eq!(node.uid, "fixed");
        assert!(!node.children[0].uid.is_empty());
    }

    proptest! {
        #[test]
        fn qualified_name_round_trips(
            prefix in proptest::option::of(proptest::collection::vec("[a-z0-9-]{1,8}", 1..4)),
            name in "[a-z0-9-]{1,8}",
        ) {
            let prefix = prefix.map(|segs| segs.join("."));
            let qn = QualifiedName::new(prefix.as_deref(), &name);
            let parsed = QualifiedName::parse(&qn.to_string());
            prop_assert_eq!(parsed.prefix(), prefix.as_deref());
            prop_assert_eq!(parsed.name(), name.as_str());
        }
    }
}
