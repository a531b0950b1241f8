//! User group orchestration: create, update and delete groups, reconciling
//! every member whose access changes.

use pkg_constants::rbac::DEFAULT_GROUP;
use pkg_state::Registry;
use pkg_types::group::{UserGroup, UserGroupSpec};
use pkg_types::quota::QuotaTree;
use pkg_types::user::User;
use pkg_types::validate::validate_name;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

use crate::error::{QuotaError, Result};
use crate::index;
use crate::sync::PrincipalSync;
use crate::tree::tree_coordinates;

const DEFAULT_PAGE_LIMIT: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct GroupPage {
    pub items: Vec<UserGroup>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

pub struct GroupService {
    registry: Registry,
    sync: PrincipalSync,
    group_namespace: String,
    tree_name: String,
    tree_namespace: String,
}

impl GroupService {
    pub fn new(
        registry: Registry,
        sync: PrincipalSync,
        group_namespace: &str,
        tree_name: &str,
        tree_namespace: &str,
    ) -> Self {
        let (tree_name, tree_namespace) = tree_coordinates(tree_name, tree_namespace);
        Self {
            registry,
            sync,
            group_namespace: group_namespace.to_string(),
            tree_name,
            tree_namespace,
        }
    }

    async fn tree(&self) -> Result<Option<QuotaTree>> {
        Ok(self
            .registry
            .get(Some(&self.tree_namespace), &self.tree_name)
            .await?)
    }

    async fn groups(&self) -> Result<Vec<UserGroup>> {
        Ok(self.registry.list(Some(&self.group_namespace)).await?)
    }

    pub async fn get_group(&self, meta_name: &str) -> Result<UserGroup> {
        self.registry
            .get(Some(&self.group_namespace), meta_name)
            .await?
            .ok_or_else(|| QuotaError::not_found("user group", meta_name))
    }

    /// Every quota name must resolve in the tree and be free of other groups.
    fn check_quota_names(group: &UserGroup, tree: Option<&QuotaTree>, others: &[&UserGroup]) -> Result<()> {
        for q in &group.spec.quota_names {
            let tree = tree.ok_or_else(|| QuotaError::not_found("quota tree", q.clone()))?;
            index::namespaces_for_quota_name(&tree.root, q)?;
            if let Some(holder) = others.iter().find(|o| o.spec.quota_names.contains(q)) {
                return Err(QuotaError::Conflict(format!(
                    "quota {} is already bound to user group {}",
                    q,
                    holder.group_name()
                )));
            }
        }
        Ok(())
    }

    fn check_spec(spec: &mut UserGroupSpec) -> Result<()> {
        spec.group_name = spec.group_name.trim().to_string();
        if spec.group_name.is_empty() {
            return Err(QuotaError::InvalidRequest("group name must not be empty".to_string()));
        }
        let mut seen = BTreeSet::new();
        spec.quota_names.retain(|q| seen.insert(q.clone()));
        Ok(())
    }

    /// Look up each member id; unknown members reject the request.
    fn resolve_members(all_users: &HashMap<String, User>, members: &[String]) -> Result<BTreeSet<String>> {
        let mut out = BTreeSet::new();
        for id in members {
            if !all_users.contains_key(id) {
                return Err(QuotaError::not_found("user", id.clone()));
            }
            out.insert(id.clone());
        }
        Ok(out)
    }

    async fn users_by_id(&self) -> Result<HashMap<String, User>> {
        Ok(self
            .sync
            .list_users()
            .await?
            .into_iter()
            .map(|u| (u.name.clone(), u))
            .collect())
    }

    pub async fn create_group(&self, mut spec: UserGroupSpec, members: &[String]) -> Result<UserGroup> {
        Self::check_spec(&mut spec)?;
        let group = UserGroup::new(&self.group_namespace, spec);
        validate_name(&group.name).map_err(|e| QuotaError::InvalidRequest(e.to_string()))?;

        let existing = self.groups().await?;
        if let Some(dup) = existing
            .iter()
            .find(|g| g.name == group.name || g.group_name() == group.group_name())
        {
            return Err(QuotaError::Conflict(format!(
                "user group {} already exists",
                dup.group_name()
            )));
        }
        let tree = self.tree().await?;
        let others: Vec<&UserGroup> = existing.iter().collect();
        Self::check_quota_names(&group, tree.as_ref(), &others)?;

        let all_users = self.users_by_id().await?;
        let member_ids = Self::resolve_members(&all_users, members)?;

        let users: Vec<User> = member_ids
            .iter()
            .filter_map(|id| all_users.get(id).cloned())
            .map(|mut u| {
                if !u.in_group(&group.name) {
                    u.spec.groups.push(group.name.clone());
                }
                u
            })
            .collect();
        let mut all_groups = existing;
        all_groups.push(group.clone());
        let plan = self
            .sync
            .plan(users, &all_groups, tree.as_ref().map(|t| &t.root))?;

        let group = self.registry.create_or_replace(group).await?;
        info!("Group {}: created as {}", group.group_name(), group.name);
        self.sync.apply(plan).await?;
        Ok(group)
    }

    /// Replace the group's spec and membership. The meta name never changes.
    pub async fn update_group(
        &self,
        meta_name: &str,
        mut spec: UserGroupSpec,
        members: &[String],
    ) -> Result<UserGroup> {
        let current = self.get_group(meta_name).await?;
        Self::check_spec(&mut spec)?;

        let groups = self.groups().await?;
        let others: Vec<&UserGroup> = groups.iter().filter(|g| g.name != current.name).collect();
        if let Some(dup) = others.iter().find(|g| g.group_name() == spec.group_name) {
            return Err(QuotaError::Conflict(format!(
                "user group {} already exists",
                dup.group_name()
            )));
        }
        let mut updated = current.clone();
        updated.spec = spec;
        let tree = self.tree().await?;
        Self::check_quota_names(&updated, tree.as_ref(), &others)?;

        let all_users = self.users_by_id().await?;
        let wanted = Self::resolve_members(&all_users, members)?;
        let present: BTreeSet<String> = all_users
            .values()
            .filter(|u| u.in_group(&current.name))
            .map(|u| u.name.clone())
            .collect();
        let join: BTreeSet<&String> = wanted.difference(&present).collect();
        let leave: BTreeSet<&String> = present.difference(&wanted).collect();
        let stay: BTreeSet<&String> = wanted.intersection(&present).collect();
        info!(
            "Group {}: {} joining, {} leaving, {} staying",
            updated.group_name(),
            join.len(),
            leave.len(),
            stay.len()
        );

        let mut users = Vec::new();
        for id in join.iter().chain(leave.iter()).chain(stay.iter()) {
            let Some(mut u) = all_users.get(*id).cloned() else {
                continue;
            };
            if join.contains(id) {
                u.spec.groups.push(updated.name.clone());
            } else if leave.contains(id) {
                u.spec.groups.retain(|g| g != &updated.name);
            }
            users.push(u);
        }
        let mut all_groups: Vec<UserGroup> = others.into_iter().cloned().collect();
        all_groups.push(updated.clone());
        let plan = self
            .sync
            .plan(users, &all_groups, tree.as_ref().map(|t| &t.root))?;

        let updated = self.registry.create_or_replace(updated).await?;
        self.sync.apply(plan).await?;
        Ok(updated)
    }

    /// Detach every member, then delete the group. If any member fails to
    /// reconcile the group is kept so the request can be resubmitted.
    pub async fn delete_group(&self, meta_name: &str) -> Result<()> {
        let group = self.get_group(meta_name).await?;
        let others: Vec<UserGroup> = self
            .groups()
            .await?
            .into_iter()
            .filter(|g| g.name != group.name)
            .collect();
        let members: Vec<User> = self
            .sync
            .list_users()
            .await?
            .into_iter()
            .filter(|u| u.in_group(&group.name))
            .map(|mut u| {
                u.spec.groups.retain(|g| g != &group.name);
                u
            })
            .collect();
        let tree = self.tree().await?;
        info!("Group {}: detaching {} member(s)", group.group_name(), members.len());
        self.sync
            .sync(members, &others, tree.as_ref().map(|t| &t.root))
            .await?;
        self.registry
            .delete::<UserGroup>(Some(&self.group_namespace), &group.name)
            .await?;
        info!("Group {}: deleted", group.group_name());
        Ok(())
    }

    /// One page of groups sorted by display name, optionally filtered by a
    /// case-insensitive substring of the display name. Pages start at 1.
    pub async fn list_groups(&self, page: usize, limit: usize, name_filter: Option<&str>) -> Result<GroupPage> {
        let page = page.max(1);
        let limit = if limit == 0 { DEFAULT_PAGE_LIMIT } else { limit };
        let needle = name_filter.map(str::to_lowercase).filter(|n| !n.is_empty());

        let mut groups: Vec<UserGroup> = self
            .groups()
            .await?
            .into_iter()
            .filter(|g| match &needle {
                Some(n) => g.group_name().to_lowercase().contains(n),
                None => true,
            })
            .collect();
        groups.sort_by(|a, b| a.group_name().cmp(b.group_name()));

        let total = groups.len();
        let items = groups
            .into_iter()
            .skip((page - 1) * limit)
            .take(limit)
            .collect();
        Ok(GroupPage {
            items,
            total,
            page,
            limit,
        })
    }

    /// Meta name → namespaces reachable through the group, for the given
    /// groups or all of them. The built-in default group is always present.
    pub async fn group_namespace_index(
        &self,
        meta_names: Option<&[String]>,
    ) -> Result<BTreeMap<String, BTreeSet<String>>> {
        let mut out = BTreeMap::new();
        out.insert(
            DEFAULT_GROUP.to_string(),
            BTreeSet::from([DEFAULT_GROUP.to_string()]),
        );
        let tree = self.tree().await?;
        for g in self.groups().await? {
            if let Some(filter) = meta_names {
                if !filter.contains(&g.name) {
                    continue;
                }
            }
            let ns = match &tree {
                Some(t) => index::group_namespaces(&t.root, &g),
                None => BTreeSet::new(),
            };
            out.insert(g.name.clone(), ns);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{fixture, team_tree};

    fn spec(name: &str, quota_names: &[&str]) -> UserGroupSpec {
        UserGroupSpec {
            group_name: name.to_string(),
            quota_names: quota_names.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn ids(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn create_rejects_bad_references() {
        let f = fixture();
        f.trees.create_tree(team_tree(&["ns1"]), "", "").await.unwrap();
        f.add_user("alice").await;

        let err = f.groups.create_group(spec("g1", &["root.ghost"]), &[]).await.unwrap_err();
        assert!(matches!(err, QuotaError::NotFound { kind: "quota node", .. }));

        let err = f
            .groups
            .create_group(spec("g1", &["root.team-a"]), &ids(&["nobody"]))
            .await
            .unwrap_err();
        assert!(matches!(err, QuotaError::NotFound { kind: "user", .. }));

        let err = f.groups.create_group(spec("  ", &[]), &[]).await.unwrap_err();
        assert!(matches!(err, QuotaError::InvalidRequest(_)));

        f.groups.create_group(spec("g1", &["root.team-a"]), &[]).await.unwrap();
        let err = f.groups.create_group(spec("G1", &[]), &[]).await.unwrap_err();
        assert!(matches!(err, QuotaError::Conflict(_)), "meta name collides");
        let err = f.groups.create_group(spec("g2", &["root.team-a"]), &[]).await.unwrap_err();
        assert!(matches!(err, QuotaError::Conflict(_)), "quota already bound");
        assert_eq!(f.gateway.counts(), (0, 0));
    }

    #[tokio::test]
    async fn update_moves_access_between_members() {
        let f = fixture();
        f.trees.create_tree(team_tree(&["ns1"]), "", "").await.unwrap();
        f.add_user("alice").await;
        f.add_user("bob").await;
        let group = f
            .groups
            .create_group(spec("g1", &["root.team-a"]), &ids(&["alice"]))
            .await
            .unwrap();
        f.gateway.reset();

        let updated = f
            .groups
            .update_group(&group.name, spec("g1", &["root.team-a"]), &ids(&["bob"]))
            .await
            .unwrap();
        assert_eq!(updated.name, group.name);
        assert_eq!(f.gateway.counts(), (1, 1));

        let alice = f.user("alice").await;
        assert!(!alice.in_group(&group.name));
        assert!(alice.spec.service_account.role_bindings.is_empty());
        let bob = f.user("bob").await;
        assert!(bob.in_group(&group.name));
        assert_eq!(bob.spec.service_account.role_bindings.len(), 1);
    }

    #[tokio::test]
    async fn missing_group_is_not_found() {
        let f = fixture();
        let err = f.groups.update_group("ghost", spec("ghost", &[]), &[]).await.unwrap_err();
        assert!(matches!(err, QuotaError::NotFound { kind: "user group", .. }));
        let err = f.groups.delete_group("ghost").await.unwrap_err();
        assert!(matches!(err, QuotaError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_detaches_members_first() {
        let f = fixture();
        f.trees.create_tree(team_tree(&["ns1", "ns2"]), "", "").await.unwrap();
        f.add_user("alice").await;
        let group = f
            .groups
            .create_group(spec("g1", &["root.team-a"]), &ids(&["alice"]))
            .await
            .unwrap();
        f.gateway.reset();

        f.groups.delete_group(&group.name).await.unwrap();
        assert_eq!(f.gateway.counts(), (0, 2));
        assert!(f.user("alice").await.spec.groups.is_empty());
        assert!(matches!(
            f.groups.get_group(&group.name).await,
            Err(QuotaError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn failed_detach_keeps_the_group() {
        let f = fixture();
        f.trees.create_tree(team_tree(&["ns1"]), "", "").await.unwrap();
        f.add_user("alice").await;
        let group = f
            .groups
            .create_group(spec("g1", &["root.team-a"]), &ids(&["alice"]))
            .await
            .unwrap();
        f.gateway.fail_for("alice");

        let err = f.groups.delete_group(&group.name).await.unwrap_err();
        assert!(matches!(err, QuotaError::Reconciliation(_)));
        assert!(f.groups.get_group(&group.name).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_role_leaves_no_group_behind() {
        let f = fixture();
        f.trees.create_tree(team_tree(&["ns1"]), "", "").await.unwrap();
        f.add_user("alice").await;
        let mut bad = spec("g1", &["root.team-a"]);
        bad.default_roles = vec!["no-such-role".to_string()];

        let err = f.groups.create_group(bad, &ids(&["alice"])).await.unwrap_err();
        assert!(matches!(err, QuotaError::NotFound { kind: "role template", .. }));
        assert_eq!(f.groups.list_groups(1, 20, None).await.unwrap().total, 0);
        assert!(f.user("alice").await.spec.groups.is_empty());
        assert_eq!(f.gateway.counts(), (0, 0));
    }

    #[tokio::test]
    async fn list_pages_by_display_name() {
        let f = fixture();
        for name in ["charlie", "Alpha", "bravo"] {
            f.groups.create_group(spec(name, &[]), &[]).await.unwrap();
        }

        let first = f.groups.list_groups(0, 2, None).await.unwrap();
        assert_eq!(first.page, 1);
        assert_eq!(first.total, 3);
        let names: Vec<&str> = first.items.iter().map(|g| g.group_name()).collect();
        assert_eq!(names, vec!["Alpha", "bravo"]);

        let second = f.groups.list_groups(2, 2, None).await.unwrap();
        assert_eq!(second.items.len(), 1);

        let filtered = f.groups.list_groups(1, 0, Some("ALP")).await.unwrap();
        assert_eq!(filtered.limit, 20);
        assert_eq!(filtered.total, 1);
    }

    #[tokio::test]
    async fn namespace_index_includes_default_group() {
        let f = fixture();
        f.trees.create_tree(team_tree(&["ns1", "ns2"]), "", "").await.unwrap();
        let g1 = f.groups.create_group(spec("g1", &["root.team-a"]), &[]).await.unwrap();
        f.groups.create_group(spec("g2", &[]), &[]).await.unwrap();

        let all = f.groups.group_namespace_index(None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[DEFAULT_GROUP].contains(DEFAULT_GROUP));
        assert_eq!(all[&g1.name].len(), 2);

        let only = f
            .groups
            .group_namespace_index(Some(&ids(&["g2"])))
            .await
            .unwrap();
        assert_eq!(only.len(), 2);
        assert!(only["g2"].is_empty());
    }
}
