//! Numeric and structural checks over a whole quota tree.

use pkg_types::quantity::Quantity;
use pkg_types::quota::QuotaNode;
use pkg_types::validate::validate_node_name;
use std::collections::HashSet;

use crate::error::{Rule, Violation};

/// Every violation in the tree rooted at `root`, in pre-order. An empty
/// list means the tree is acceptable.
pub fn validate(root: &QuotaNode) -> Vec<Violation> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    check_structure(root, None, &mut seen, &mut out);
    check_quota(root, &mut out);
    out
}

fn check_structure(
    node: &QuotaNode,
    parent: Option<&QuotaNode>,
    seen: &mut HashSet<String>,
    out: &mut Vec<Violation>,
) {
    let qn = node.qualified_name().to_string();

    if let Err(e) = validate_node_name(&node.name) {
        out.push(Violation {
            node: qn.clone(),
            resource: String::new(),
            rule: Rule::Malformed,
            expected: "non-empty name without '.' or whitespace".to_string(),
            actual: e.to_string(),
        });
    }

    let expected_prefix = parent.map(|p| p.qualified_name().to_string());
    let actual_prefix = node.prefix.clone().filter(|p| !p.is_empty());
    if expected_prefix != actual_prefix {
        out.push(Violation {
            node: qn.clone(),
            resource: String::new(),
            rule: Rule::Malformed,
            expected: format!("prefix {}", expected_prefix.as_deref().unwrap_or("<none>")),
            actual: format!("prefix {}", actual_prefix.as_deref().unwrap_or("<none>")),
        });
    }

    if !seen.insert(qn.clone()) {
        out.push(Violation {
            node: qn.clone(),
            resource: String::new(),
            rule: Rule::DuplicateName,
            expected: "unique qualified name".to_string(),
            actual: qn,
        });
    }

    for child in &node.children {
        check_structure(child, Some(node), seen, out);
    }
}

/// Parse a quantity of `node`, recording a violation if it is malformed.
fn amount(node: &QuotaNode, resource: &str, raw: Option<&String>, out: &mut Vec<Violation>) -> Option<f64> {
    match Quantity::parse_or_zero(raw.map(String::as_str)) {
        Ok(q) => Some(q.value()),
        Err(e) => {
            out.push(Violation {
                node: node.qualified_name().to_string(),
                resource: resource.to_string(),
                rule: Rule::Malformed,
                expected: "resource quantity".to_string(),
                actual: e.to_string(),
            });
            None
        }
    }
}

fn check_quota(node: &QuotaNode, out: &mut Vec<Violation>) {
    let qn = node.qualified_name().to_string();

    for (resource, min_raw) in &node.min {
        let Some(min) = amount(node, resource, Some(min_raw), out) else {
            continue;
        };
        // An absent max leaves the resource unbounded.
        let max = match node.max.get(resource) {
            Some(raw) => match amount(node, resource, Some(raw), out) {
                Some(v) => v,
                None => continue,
            },
            None => f64::INFINITY,
        };
        if min > max {
            out.push(Violation {
                node: qn.clone(),
                resource: resource.clone(),
                rule: Rule::MinWithinMax,
                expected: format!("<= {}", Quantity::describe(max)),
                actual: min_raw.clone(),
            });
        }
    }

    if node.children.is_empty() {
        return;
    }

    for (resource, min_raw) in &node.min {
        let Some(min) = amount(node, resource, Some(min_raw), out) else {
            continue;
        };
        let mut sum = 0.0;
        for child in &node.children {
            // Malformed child values are reported when the child is checked.
            let mut ignored = Vec::new();
            sum += amount(child, resource, child.min.get(resource), &mut ignored).unwrap_or(0.0);
        }
        if sum > min {
            out.push(Violation {
                node: qn.clone(),
                resource: resource.clone(),
                rule: Rule::ChildMinSum,
                expected: format!("<= {}", min_raw),
                actual: Quantity::describe(sum),
            });
        }
    }

    for (resource, max_raw) in &node.max {
        let Some(max) = amount(node, resource, Some(max_raw), out) else {
            continue;
        };
        if max.is_infinite() {
            continue;
        }
        let mut highest: f64 = 0.0;
        for child in &node.children {
            let mut ignored = Vec::new();
            let v = amount(child, resource, child.max.get(resource), &mut ignored).unwrap_or(0.0);
            highest = highest.max(v);
        }
        if highest > max {
            out.push(Violation {
                node: qn.clone(),
                resource: resource.clone(),
                rule: Rule::ChildMaxCeiling,
                expected: format!("<= {}", max_raw),
                actual: Quantity::describe(highest),
            });
        }
    }

    for child in &node.children {
        check_quota(child, out);
    }
}
