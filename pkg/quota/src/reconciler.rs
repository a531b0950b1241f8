//! Access reconciliation for one principal.
//!
//! The binding set a principal should hold is a pure function of its roles,
//! cluster roles and namespaces. [`AccessReconciler::plan`] expands that set
//! and diffs it by binding name against what the principal is recorded as
//! holding; [`AccessReconciler::apply`] drives the difference through the
//! RBAC gateway. Bindings present on both sides produce no operation.

use pkg_rbac::{BindingDescriptor, RbacGateway, RoleTemplates};
use pkg_types::rbac::{RoleScope, binding_name};
use pkg_types::user::{BindingRef, User};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{PrincipalFailure, QuotaError, Result};

/// What a principal should be granted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessTarget {
    pub roles: BTreeSet<String>,
    pub cluster_roles: BTreeSet<String>,
    pub namespaces: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingPlan {
    /// Every binding the principal should hold afterwards.
    pub target: Vec<BindingDescriptor>,
    pub to_create: Vec<BindingDescriptor>,
    pub to_delete: Vec<BindingRef>,
}

impl BindingPlan {
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.target
            .iter()
            .filter_map(|b| b.scope.namespace().map(str::to_string))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub created: usize,
    pub deleted: usize,
    /// Bindings that were due for deletion but already gone.
    pub already_absent: usize,
}

/// Expand (role × namespace) and cluster roles into binding descriptors.
pub fn expand(service_account: &str, sa_namespace: &str, target: &AccessTarget) -> Vec<BindingDescriptor> {
    let describe = |role: &String, scope: RoleScope| BindingDescriptor {
        name: binding_name(service_account, role, &scope),
        role_name: role.clone(),
        scope,
        service_account: service_account.to_string(),
        service_account_namespace: sa_namespace.to_string(),
    };
    let mut out = Vec::new();
    for role in &target.roles {
        for ns in &target.namespaces {
            out.push(describe(role, RoleScope::Namespace(ns.clone())));
        }
    }
    for role in &target.cluster_roles {
        out.push(describe(role, RoleScope::Cluster));
    }
    out
}

/// Split `target` against `current` by (scope, binding name).
pub fn diff(target: Vec<BindingDescriptor>, current: &[BindingRef]) -> BindingPlan {
    let current_keys: HashSet<(RoleScope, &str)> =
        current.iter().map(|b| (b.scope(), b.name.as_str())).collect();
    let target_keys: HashSet<(RoleScope, String)> =
        target.iter().map(|b| (b.scope.clone(), b.name.clone())).collect();

    let to_create = target
        .iter()
        .filter(|b| !current_keys.contains(&(b.scope.clone(), b.name.as_str())))
        .cloned()
        .collect();
    // Deduplicate in case the recorded list carries the same binding twice.
    let to_delete: BTreeMap<(RoleScope, String), BindingRef> = current
        .iter()
        .filter(|b| !target_keys.contains(&(b.scope(), b.name.clone())))
        .map(|b| ((b.scope(), b.name.clone()), b.clone()))
        .collect();

    BindingPlan {
        target,
        to_create,
        to_delete: to_delete.into_values().collect(),
    }
}

#[derive(Clone)]
pub struct AccessReconciler {
    gateway: Arc<dyn RbacGateway>,
    templates: Arc<RoleTemplates>,
}

impl AccessReconciler {
    pub fn new(gateway: Arc<dyn RbacGateway>, templates: Arc<RoleTemplates>) -> Self {
        Self { gateway, templates }
    }

    /// Compute the binding delta for `user`. Fails without side effects if
    /// a binding to create names a role with no usable template.
    pub fn plan(&self, user: &User, target: &AccessTarget) -> Result<BindingPlan> {
        let sa = user.service_account_name();
        let sa_ns = &user.spec.service_account.namespace;
        let current: Vec<BindingRef> = user.recorded_bindings().cloned().collect();
        let plan = diff(expand(sa, sa_ns, target), &current);

        for b in &plan.to_create {
            let template = self
                .templates
                .get(&b.role_name)
                .ok_or_else(|| QuotaError::not_found("role template", b.role_name.clone()))?;
            let cluster_binding = matches!(b.scope, RoleScope::Cluster);
            if template.cluster != cluster_binding {
                return Err(QuotaError::InvalidRequest(format!(
                    "role {} cannot be bound in {}",
                    b.role_name, b.scope
                )));
            }
        }
        debug!(
            "User {}: plan {} create, {} delete",
            user.name,
            plan.to_create.len(),
            plan.to_delete.len()
        );
        Ok(plan)
    }

    /// Drive `plan` through the gateway, stopping at the first failure.
    pub async fn apply(
        &self,
        user: &User,
        plan: &BindingPlan,
    ) -> std::result::Result<ReconcileOutcome, PrincipalFailure> {
        let fail = |operation: String, reason: String| PrincipalFailure {
            principal: user.name.clone(),
            namespaces: plan.namespaces(),
            operation,
            reason,
        };
        let mut outcome = ReconcileOutcome::default();
        let mut roles_ready: HashSet<(String, RoleScope)> = HashSet::new();

        for b in &plan.to_create {
            let key = (b.role_name.clone(), b.scope.clone());
            if !roles_ready.contains(&key) {
                let template = self.templates.get(&b.role_name).ok_or_else(|| {
                    fail(
                        format!("resolve role template {}", b.role_name),
                        "role template not found".to_string(),
                    )
                })?;
                self.gateway
                    .create_or_get_role(template, &b.role_name, &b.scope)
                    .await
                    .map_err(|e| fail(format!("create role {} in {}", b.role_name, b.scope), e.to_string()))?;
                roles_ready.insert(key);
            }
            self.gateway
                .create_or_replace_binding(b)
                .await
                .map_err(|e| fail(format!("create binding {}", b.name), e.to_string()))?;
            info!("User {}: created binding {}", user.name, b.name);
            outcome.created += 1;
        }

        for r in &plan.to_delete {
            let scope = r.scope();
            let present = self
                .gateway
                .get_binding(&r.name, &scope)
                .await
                .map_err(|e| fail(format!("get binding {}", r.name), e.to_string()))?;
            if !present {
                info!("User {}: binding {} already gone", user.name, r.name);
                outcome.already_absent += 1;
                continue;
            }
            self.gateway
                .delete_binding(&r.name, &scope)
                .await
                .map_err(|e| fail(format!("delete binding {}", r.name), e.to_string()))?;
            info!("User {}: deleted binding {}", user.name, r.name);
            outcome.deleted += 1;
        }
        Ok(outcome)
    }

    /// Overwrite the user's recorded bindings with the plan's target.
    pub fn record(user: &mut User, plan: &BindingPlan) {
        let (cluster, namespaced): (Vec<_>, Vec<_>) = plan
            .target
            .iter()
            .map(BindingDescriptor::to_ref)
            .partition(|r| r.namespace.is_none());
        user.spec.service_account.role_bindings = namespaced;
        user.spec.service_account.cluster_role_bindings = cluster;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_rbac::RegistryRbacGateway;
    use pkg_state::{MemoryStore, Registry};
    use pkg_types::rbac::RoleBinding;

    fn set(xs: &[&str]) -> BTreeSet<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    fn target(namespaces: &[&str]) -> AccessTarget {
        AccessTarget {
            roles: set(&["kubeai-researcher-role"]),
            cluster_roles: set(&["kubeai-researcher-clusterrole"]),
            namespaces: set(namespaces),
        }
    }

    fn setup() -> (AccessReconciler, Registry) {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        let gateway = Arc::new(RegistryRbacGateway::new(registry.clone()));
        (
            AccessReconciler::new(gateway, Arc::new(RoleTemplates::builtin())),
            registry,
        )
    }

    #[test]
    fn expand_is_role_times_namespace_plus_cluster_roles() {
        let bindings = expand("alice", "kube-ai", &target(&["ns1", "ns2"]));
        let names: Vec<&str> = bindings.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "alice:ns1:kubeai-researcher-role",
                "alice:ns2:kubeai-researcher-role",
                "alice:clusterRole:kubeai-researcher-clusterrole",
            ]
        );
    }

    #[test]
    fn diff_of_identical_sets_is_empty() {
        let bindings = expand("alice", "kube-ai", &target(&["ns1"]));
        let current: Vec<BindingRef> = bindings.iter().map(BindingDescriptor::to_ref).collect();
        assert!(diff(bindings, &current).is_noop());
    }

    #[test]
    fn diff_splits_create_and_delete() {
        let old = expand("alice", "kube-ai", &target(&["ns1", "ns2"]));
        let current: Vec<BindingRef> = old.iter().map(BindingDescriptor::to_ref).collect();
        let plan = diff(expand("alice", "kube-ai", &target(&["ns1", "ns3"])), &current);
        assert_eq!(plan.to_create.len(), 1);
        assert_eq!(plan.to_create[0].name, "alice:ns3:kubeai-researcher-role");
        assert_eq!(plan.to_delete.len(), 1);
        assert_eq!(plan.to_delete[0].name, "alice:ns2:kubeai-researcher-role");
    }

    #[test]
    fn unmapped_role_is_fatal() {
        let (reconciler, _) = setup();
        let user = User::new("kube-ai", "Alice", "alice", vec![]);
        let mut t = target(&["ns1"]);
        t.roles.insert("no-such-role".to_string());
        let err = reconciler.plan(&user, &t).unwrap_err();
        assert!(matches!(err, QuotaError::NotFound { kind: "role template", .. }));
    }

    #[tokio::test]
    async fn apply_then_replan_is_noop() {
        let (reconciler, registry) = setup();
        let mut user = User::new("kube-ai", "Alice", "alice", vec![]);
        let t = target(&["ns1", "ns2"]);

        let plan = reconciler.plan(&user, &t).unwrap();
        let outcome = reconciler.apply(&user, &plan).await.unwrap();
        assert_eq!(outcome.created, 3);
        AccessReconciler::record(&mut user, &plan);
        assert_eq!(user.spec.service_account.role_bindings.len(), 2);
        assert_eq!(user.spec.service_account.cluster_role_bindings.len(), 1);

        let again = reconciler.plan(&user, &t).unwrap();
        assert!(again.is_noop(), "same input should produce no operations");

        let bindings: Vec<RoleBinding> = registry.list(Some("ns1")).await.unwrap();
        assert_eq!(bindings.len(), 1);
    }

    #[tokio::test]
    async fn deleting_a_vanished_binding_is_satisfied() {
        let (reconciler, _) = setup();
        let mut user = User::new("kube-ai", "Alice", "alice", vec![]);
        user.spec.service_account.role_bindings.push(BindingRef {
            name: "alice:gone:kubeai-researcher-role".to_string(),
            role_name: "kubeai-researcher-role".to_string(),
            namespace: Some("gone".to_string()),
        });
        let plan = reconciler
            .plan(&user, &AccessTarget::default())
            .unwrap();
        let outcome = reconciler.apply(&user, &plan).await.unwrap();
        assert_eq!(outcome.deleted, 0);
        assert_eq!(outcome.already_absent, 1);
    }
}
