//! Batch reconciliation of principals, planned in full before anything is applied.

use futures_util::stream::{self, StreamExt};
use pkg_rbac::RolePolicy;
use pkg_state::Registry;
use pkg_types::group::UserGroup;
use pkg_types::quota::QuotaNode;
use pkg_types::user::User;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

use crate::error::{PrincipalFailure, QuotaError, Result};
use crate::index;
use crate::reconciler::{AccessReconciler, AccessTarget, BindingPlan};

/// Totals over one [`PrincipalSync::sync`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub principals: usize,
    pub created: usize,
    pub deleted: usize,
}

/// Binding plans for a batch of principals, computed without side effects.
#[derive(Debug, Default)]
pub struct SyncPlan {
    plans: Vec<(User, BindingPlan)>,
}

impl SyncPlan {
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

/// Reconciles a batch of principals against a tree and a set of groups,
/// each principal at most once, and persists every principal whose
/// bindings were applied in full.
#[derive(Clone)]
pub struct PrincipalSync {
    registry: Registry,
    reconciler: AccessReconciler,
    policy: RolePolicy,
    user_namespace: String,
    concurrency: usize,
}

impl PrincipalSync {
    pub fn new(
        registry: Registry,
        reconciler: AccessReconciler,
        policy: RolePolicy,
        user_namespace: &str,
    ) -> Self {
        Self {
            registry,
            reconciler,
            policy,
            user_namespace: user_namespace.to_string(),
            concurrency: 4,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.registry.list(Some(&self.user_namespace)).await?)
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User> {
        self.registry
            .get(Some(&self.user_namespace), user_id)
            .await?
            .ok_or_else(|| QuotaError::not_found("user", user_id))
    }

    /// Roles from the user's API roles and its groups' defaults; namespaces
    /// from its groups' quota names, best-effort.
    pub fn target_for(
        &self,
        user: &User,
        groups: &BTreeMap<String, UserGroup>,
        root: Option<&QuotaNode>,
    ) -> AccessTarget {
        let grant = self.policy.grant_for(&user.spec.api_roles);
        let mut target = AccessTarget {
            roles: grant.roles,
            cluster_roles: grant.cluster_roles,
            namespaces: Default::default(),
        };
        for meta in &user.spec.groups {
            let Some(group) = groups.get(meta) else {
                warn!("User {}: group {} not found, skipped", user.name, meta);
                continue;
            };
            target.roles.extend(group.spec.default_roles.iter().cloned());
            target
                .cluster_roles
                .extend(group.spec.default_cluster_roles.iter().cloned());
            if let Some(root) = root {
                target.namespaces.extend(index::group_namespaces(root, group));
            }
        }
        target
    }

    /// Plan then apply in one step.
    pub async fn sync(
        &self,
        users: Vec<User>,
        groups: &[UserGroup],
        root: Option<&QuotaNode>,
    ) -> Result<SyncReport> {
        let plan = self.plan(users, groups, root)?;
        self.apply(plan).await
    }

    /// Plan every principal against `groups` and `root`. Configuration
    /// errors surface here, before anything is written.
    pub fn plan(
        &self,
        users: Vec<User>,
        groups: &[UserGroup],
        root: Option<&QuotaNode>,
    ) -> Result<SyncPlan> {
        let by_meta: BTreeMap<String, UserGroup> =
            groups.iter().map(|g| (g.name.clone(), g.clone())).collect();

        let mut seen = HashSet::new();
        let mut plans: Vec<(User, BindingPlan)> = Vec::new();
        for user in users {
            if !seen.insert(user.name.clone()) {
                continue;
            }
            let target = self.target_for(&user, &by_meta, root);
            let plan = self.reconciler.plan(&user, &target)?;
            plans.push((user, plan));
        }
        Ok(SyncPlan { plans })
    }

    /// Apply the plans concurrently. Every principal that succeeds is
    /// persisted; failures are collected and reported together.
    pub async fn apply(&self, plan: SyncPlan) -> Result<SyncReport> {
        let plans = plan.plans;
        let results: Vec<std::result::Result<(usize, usize), PrincipalFailure>> = stream::iter(plans)
            .map(|(user, plan)| self.apply_one(user, plan))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = SyncReport::default();
        let mut failures = Vec::new();
        for r in results {
            match r {
                Ok((created, deleted)) => {
                    report.principals += 1;
                    report.created += created;
                    report.deleted += deleted;
                }
                Err(f) => {
                    warn!("Sync: {}", f);
                    failures.push(f);
                }
            }
        }
        if !failures.is_empty() {
            failures.sort_by(|a, b| a.principal.cmp(&b.principal));
            return Err(QuotaError::Reconciliation(failures));
        }
        info!(
            "Sync: {} principal(s), {} binding(s) created, {} deleted",
            report.principals, report.created, report.deleted
        );
        Ok(report)
    }

    async fn apply_one(
        &self,
        mut user: User,
        plan: BindingPlan,
    ) -> std::result::Result<(usize, usize), PrincipalFailure> {
        let outcome = self.reconciler.apply(&user, &plan).await?;
        AccessReconciler::record(&mut user, &plan);
        self.registry
            .create_or_replace(user.clone())
            .await
            .map_err(|e| PrincipalFailure {
                principal: user.name.clone(),
                namespaces: plan.namespaces(),
                operation: "persist principal".to_string(),
                reason: e.to_string(),
            })?;
        Ok((outcome.created, outcome.deleted))
    }
}
