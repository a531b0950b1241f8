//! Pure lookups over a quota tree. Missing nodes are `None`, never errors.

use pkg_types::quota::{QualifiedName, QuotaNode};
use std::collections::BTreeSet;

fn same_prefix(node: &QuotaNode, prefix: Option<&str>) -> bool {
    node.prefix.as_deref().unwrap_or("") == prefix.unwrap_or("")
}

/// Depth-first search for the node with this local name and prefix.
pub fn find_node<'a>(root: &'a QuotaNode, name: &str, prefix: Option<&str>) -> Option<&'a QuotaNode> {
    if root.name == name && same_prefix(root, prefix) {
        return Some(root);
    }
    root.children
        .iter()
        .find_map(|child| find_node(child, name, prefix))
}

pub fn find_qualified<'a>(root: &'a QuotaNode, qn: &QualifiedName) -> Option<&'a QuotaNode> {
    find_node(root, qn.name(), qn.prefix())
}

pub fn find_by_uid<'a>(root: &'a QuotaNode, uid: &str) -> Option<&'a QuotaNode> {
    if uid.is_empty() {
        return None;
    }
    root.descendants().into_iter().find(|n| n.uid == uid)
}

/// The node whose direct child has this name and prefix.
pub fn find_parent<'a>(root: &'a QuotaNode, name: &str, prefix: Option<&str>) -> Option<&'a QuotaNode> {
    if root
        .children
        .iter()
        .any(|c| c.name == name && same_prefix(c, prefix))
    {
        return Some(root);
    }
    root.children
        .iter()
        .find_map(|child| find_parent(child, name, prefix))
}

/// Nodes without children under `node`; a childless node is its own leaf.
pub fn leaf_nodes(node: &QuotaNode) -> Vec<&QuotaNode> {
    if node.is_leaf() {
        return vec![node];
    }
    node.children.iter().flat_map(leaf_nodes).collect()
}

/// Union of every `namespaces` list in the subtree.
pub fn namespaces_under(node: &QuotaNode) -> BTreeSet<String> {
    let mut out: BTreeSet<String> = node.namespaces.iter().cloned().collect();
    for child in &node.children {
        out.extend(namespaces_under(child));
    }
    out
}

/// Qualified names from the root down to the target, target last.
pub fn ancestor_chain(root: &QuotaNode, name: &str, prefix: Option<&str>) -> Option<Vec<QualifiedName>> {
    let mut path = Vec::new();
    if chain_into(root, name, prefix, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn chain_into(node: &QuotaNode, name: &str, prefix: Option<&str>, path: &mut Vec<QualifiedName>) -> bool {
    path.push(node.qualified_name());
    if node.name == name && same_prefix(node, prefix) {
        return true;
    }
    for child in &node.children {
        if chain_into(child, name, prefix, path) {
            return true;
        }
    }
    path.pop();
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make_node(name: &str, prefix: Option<&str>, namespaces: &[&str]) -> QuotaNode {
        let mut node = QuotaNode::new(name, prefix);
        node.namespaces = namespaces.iter().map(|s| s.to_string()).collect();
        node
    }

    /// root ─┬─ team-a ─┬─ dev  [ns1]
    ///       │          └─ prod [ns2]
    ///       └─ team-b [ns3]
    fn sample_tree() -> QuotaNode {
        let mut root = make_node("root", None, &[]);
        let mut team_a = make_node("team-a", Some("root"), &[]);
        team_a.children.push(make_node("dev", Some("root.team-a"), &["ns1"]));
        team_a.children.push(make_node("prod", Some("root.team-a"), &["ns2"]));
        root.children.push(team_a);
        root.children.push(make_node("team-b", Some("root"), &["ns3"]));
        root
    }

    #[test]
    fn finds_nodes_by_name_and_prefix() {
        let root = sample_tree();
        assert!(find_node(&root, "dev", Some("root.team-a")).is_some());
        assert!(find_node(&root, "dev", Some("root")).is_none());
        assert!(find_node(&root, "root", Some("")).is_some(), "empty prefix should match the root");
        assert!(find_node(&root, "missing", None).is_none());
    }

    #[test]
    fn finds_parent() {
        let root = sample_tree();
        let parent = find_parent(&root, "prod", Some("root.team-a")).unwrap();
        assert_eq!(parent.name, "team-a");
        assert!(find_parent(&root, "root", None).is_none());
    }

    #[test]
    fn leaves_and_namespaces() {
        let root = sample_tree();
        let leaves: Vec<&str> = leaf_nodes(&root).iter().map(|n| n.name.as_str()).collect();
        assert_eq!(leaves, vec!["dev", "prod", "team-b"]);

        let single = make_node("solo", None, &[]);
        assert_eq!(leaf_nodes(&single).len(), 1);

        let team_a = find_node(&root, "team-a", Some("root")).unwrap();
        let ns: Vec<String> = namespaces_under(team_a).into_iter().collect();
        assert_eq!(ns, vec!["ns1", "ns2"]);
    }

    #[test]
    fn ancestor_chain_is_root_first() {
        let root = sample_tree();
        let chain: Vec<String> = ancestor_chain(&root, "prod", Some("root.team-a"))
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(chain, vec!["root", "root.team-a", "root.team-a.prod"]);
        assert!(ancestor_chain(&root, "nope", None).is_none());
    }

    fn arb_tree() -> impl Strategy<Value = QuotaNode> {
        let leaf = proptest::collection::vec("[a-d][0-9]", 0..3).prop_map(|ns| {
            let mut n = QuotaNode::new("n", None);
            n.namespaces = ns;
            n
        });
        leaf.prop_recursive(3, 16, 3, |inner| {
            (
                proptest::collection::vec(inner, 0..3),
                proptest::collection::vec("[a-d][0-9]", 0..2),
            )
                .prop_map(|(children, ns)| {
                    let mut n = QuotaNode::new("n", None);
                    n.namespaces = ns;
                    n.children = children;
                    n
                })
        })
    }

    proptest! {
        #[test]
        fn namespaces_under_is_union_of_children(node in arb_tree()) {
            let mut expected: BTreeSet<String> = node.namespaces.iter().cloned().collect();
            for child in &node.children {
                expected.extend(namespaces_under(child));
            }
            prop_assert_eq!(namespaces_under(&node), expected);
        }
    }
}
