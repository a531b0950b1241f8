use async_trait::async_trait;
use pkg_state::Registry;
use pkg_types::rbac::{Role, RoleBinding, RoleKind, RoleRef, RoleScope, Subject, SubjectKind};
use pkg_types::user::BindingRef;
use tracing::info;

use crate::templates::RoleTemplate;

/// A binding the reconciler wants to exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingDescriptor {
    pub name: String,
    pub role_name: String,
    pub scope: RoleScope,
    pub service_account: String,
    pub service_account_namespace: String,
}

impl BindingDescriptor {
    pub fn to_ref(&self) -> BindingRef {
        BindingRef {
            name: self.name.clone(),
            role_name: self.role_name.clone(),
            namespace: self.scope.namespace().map(str::to_string),
        }
    }

    pub fn to_role_binding(&self) -> RoleBinding {
        let kind = match self.scope {
            RoleScope::Namespace(_) => RoleKind::Role,
            RoleScope::Cluster => RoleKind::ClusterRole,
        };
        RoleBinding {
            name: self.name.clone(),
            namespace: self.scope.namespace().map(str::to_string),
            role_ref: RoleRef {
                kind,
                name: self.role_name.clone(),
            },
            subjects: vec![Subject {
                kind: SubjectKind::ServiceAccount,
                name: self.service_account.clone(),
                namespace: Some(self.service_account_namespace.clone()),
            }],
            resource_version: 0,
            created_at: None,
        }
    }
}

/// Access to the cluster's role and binding objects.
#[async_trait]
pub trait RbacGateway: Send + Sync {
    /// Create the role from `template` unless it already exists in `scope`.
    async fn create_or_get_role(
        &self,
        template: &RoleTemplate,
        name: &str,
        scope: &RoleScope,
    ) -> anyhow::Result<()>;

    async fn create_or_replace_binding(&self, binding: &BindingDescriptor) -> anyhow::Result<()>;

    async fn get_binding(&self, name: &str, scope: &RoleScope) -> anyhow::Result<bool>;

    async fn delete_binding(&self, name: &str, scope: &RoleScope) -> anyhow::Result<()>;
}

/// Gateway that keeps roles and bindings in the registry.
#[derive(Clone)]
pub struct RegistryRbacGateway {
    registry: Registry,
}

impl RegistryRbacGateway {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl RbacGateway for RegistryRbacGateway {
    async fn create_or_get_role(
        &self,
        template: &RoleTemplate,
        name: &str,
        scope: &RoleScope,
    ) -> anyhow::Result<()> {
        if template.cluster != matches!(scope, RoleScope::Cluster) {
            anyhow::bail!("role {} cannot be created in {}", name, scope);
        }
        let existing: Option<Role> = self.registry.get(scope.namespace(), name).await?;
        if existing.is_some() {
            return Ok(());
        }
        let role = Role {
            name: name.to_string(),
            namespace: scope.namespace().map(str::to_string),
            rules: template.rules.clone(),
            resource_version: 0,
            created_at: None,
        };
        self.registry.create_or_replace(role).await?;
        info!("RBAC: created role {} in {}", name, scope);
        Ok(())
    }

    async fn create_or_replace_binding(&self, binding: &BindingDescriptor) -> anyhow::Result<()> {
        self.registry
            .create_or_replace(binding.to_role_binding())
            .await?;
        Ok(())
    }

    async fn get_binding(&self, name: &str, scope: &RoleScope) -> anyhow::Result<bool> {
        let found: Option<RoleBinding> = self.registry.get(scope.namespace(), name).await?;
        Ok(found.is_some())
    }

    async fn delete_binding(&self, name: &str, scope: &RoleScope) -> anyhow::Result<()> {
        self.registry
            .delete::<RoleBinding>(scope.namespace(), name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::RoleTemplates;
    use pkg_state::MemoryStore;
    use std::sync::Arc;

    fn gateway() -> (RegistryRbacGateway, Registry) {
        let registry = Registry::new(Arc::new(MemoryStore::new()));
        (RegistryRbacGateway::new(registry.clone()), registry)
    }

    fn make_binding(ns: Option<&str>) -> BindingDescriptor {
        let scope = RoleScope::from_namespace(ns);
        BindingDescriptor {
            name: pkg_types::rbac::binding_name("alice", "kubeai-researcher-role", &scope),
            role_name: "kubeai-researcher-role".to_string(),
            scope,
            service_account: "alice".to_string(),
            service_account_namespace: "kube-ai".to_string(),
        }
    }

    #[tokio::test]
    async fn role_is_created_once() {
        let (gw, registry) = gateway();
        let templates = RoleTemplates::builtin();
        let template = templates.get("kubeai-researcher-role").unwrap();
        let scope = RoleScope::Namespace("ns1".to_string());

        gw.create_or_get_role(template, "kubeai-researcher-role", &scope)
            .await
            .unwrap();
        gw.create_or_get_role(template, "kubeai-researcher-role", &scope)
            .await
            .unwrap();

        let role: Role = registry
            .get(Some("ns1"), "kubeai-researcher-role")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(role.resource_version, 1, "existing role should not be rewritten");
    }

    #[tokio::test]
    async fn scope_must_match_template() {
        let (gw, _) = gateway();
        let templates = RoleTemplates::builtin();
        let template = templates.get("kubeai-admin-clusterrole").unwrap();
        let result = gw
            .create_or_get_role(
                template,
                "kubeai-admin-clusterrole",
                &RoleScope::Namespace("ns1".to_string()),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn binding_lifecycle() {
        let (gw, _) = gateway();
        let binding = make_binding(Some("ns1"));

        assert!(!gw.get_binding(&binding.name, &binding.scope).await.unwrap());
        gw.create_or_replace_binding(&binding).await.unwrap();
        gw.create_or_replace_binding(&binding).await.unwrap();
        assert!(gw.get_binding(&binding.name, &binding.scope).await.unwrap());

        gw.delete_binding(&binding.name, &binding.scope).await.unwrap();
        assert!(!gw.get_binding(&binding.name, &binding.scope).await.unwrap());
    }

    #[test]
    fn cluster_binding_refs_cluster_role() {
        let rb = make_binding(None).to_role_binding();
        assert_eq!(rb.role_ref.kind, RoleKind::ClusterRole);
        assert!(rb.namespace.is_none());
        assert_eq!(rb.name, "alice:clusterRole:kubeai-researcher-role");
    }
}
