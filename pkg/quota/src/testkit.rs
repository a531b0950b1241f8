//! Fixtures shared by the orchestrator tests.

use async_trait::async_trait;
use pkg_rbac::{BindingDescriptor, RbacGateway, RegistryRbacGateway, RoleGrant, RolePolicy, RoleTemplate, RoleTemplates};
use pkg_state::{MemoryStore, Registry, WorkloadLister};
use pkg_types::pod::{PodPhase, Workload};
use pkg_types::quota::QuotaNode;
use pkg_types::rbac::RoleScope;
use pkg_types::user::User;
use pkg_constants::rbac::RESEARCHER_ROLE;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::group::GroupService;
use crate::reconciler::AccessReconciler;
use crate::safety::SafetyGate;
use crate::sync::PrincipalSync;
use crate::tree::TreeService;

pub const NS: &str = "kube-ai";

/// Registry-backed gateway that counts binding writes and can be told to
/// fail for chosen service accounts.
pub struct RecordingGateway {
    inner: RegistryRbacGateway,
    pub creates: AtomicUsize,
    pub deletes: AtomicUsize,
    failing: Mutex<HashSet<String>>,
}

impl RecordingGateway {
    pub fn reset(&self) {
        self.creates.store(0, Ordering::SeqCst);
        self.deletes.store(0, Ordering::SeqCst);
    }

    pub fn counts(&self) -> (usize, usize) {
        (
            self.creates.load(Ordering::SeqCst),
            self.deletes.load(Ordering::SeqCst),
        )
    }

    pub fn fail_for(&self, service_account: &str) {
        if let Ok(mut f) = self.failing.lock() {
            f.insert(service_account.to_string());
        }
    }

    fn should_fail(&self, service_account: &str) -> bool {
        self.failing
            .lock()
            .map(|f| f.contains(service_account))
            .unwrap_or(false)
    }
}

#[async_trait]
impl RbacGateway for RecordingGateway {
    async fn create_or_get_role(
        &self,
        template: &RoleTemplate,
        name: &str,
        scope: &RoleScope,
    ) -> anyhow::Result<()> {
        self.inner.create_or_get_role(template, name, scope).await
    }

    async fn create_or_replace_binding(&self, binding: &BindingDescriptor) -> anyhow::Result<()> {
        if self.should_fail(&binding.service_account) {
            anyhow::bail!("api server unavailable");
        }
        self.inner.create_or_replace_binding(binding).await?;
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_binding(&self, name: &str, scope: &RoleScope) -> anyhow::Result<bool> {
        self.inner.get_binding(name, scope).await
    }

    async fn delete_binding(&self, name: &str, scope: &RoleScope) -> anyhow::Result<()> {
        let sa = name.split(':').next().unwrap_or_default();
        if self.should_fail(sa) {
            anyhow::bail!("api server unavailable");
        }
        self.inner.delete_binding(name, scope).await?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Workload lister driven by the test.
#[derive(Default)]
pub struct ScriptedLister {
    workloads: Mutex<HashMap<String, Vec<Workload>>>,
}

impl ScriptedLister {
    pub fn run(&self, namespace: &str, pod: &str) {
        if let Ok(mut w) = self.workloads.lock() {
            w.entry(namespace.to_string()).or_default().push(Workload {
                name: pod.to_string(),
                phase: PodPhase::Running,
            });
        }
    }
}

#[async_trait]
impl WorkloadLister for ScriptedLister {
    async fn list_workloads(&self, namespace: &str) -> anyhow::Result<Vec<Workload>> {
        let w = self
            .workloads
            .lock()
            .map_err(|_| anyhow::anyhow!("lister poisoned"))?;
        Ok(w.get(namespace).cloned().unwrap_or_default())
    }
}

pub struct Fixture {
    pub registry: Registry,
    pub gateway: Arc<RecordingGateway>,
    pub lister: Arc<ScriptedLister>,
    pub trees: TreeService,
    pub groups: GroupService,
}

/// Every principal gets only the researcher role, so each namespace
/// accounts for exactly one binding.
pub fn researcher_only() -> RolePolicy {
    RolePolicy {
        base: RoleGrant {
            roles: [RESEARCHER_ROLE.to_string()].into(),
            cluster_roles: Default::default(),
        },
        by_api_role: BTreeMap::new(),
    }
}

pub fn fixture() -> Fixture {
    let registry = Registry::new(Arc::new(MemoryStore::new()));
    let gateway = Arc::new(RecordingGateway {
        inner: RegistryRbacGateway::new(registry.clone()),
        creates: AtomicUsize::new(0),
        deletes: AtomicUsize::new(0),
        failing: Mutex::new(HashSet::new()),
    });
    let lister = Arc::new(ScriptedLister::default());
    let reconciler = AccessReconciler::new(gateway.clone(), Arc::new(RoleTemplates::builtin()));
    let sync = PrincipalSync::new(registry.clone(), reconciler, researcher_only(), NS);
    let gate = SafetyGate::new(lister.clone());
    Fixture {
        trees: TreeService::new(registry.clone(), gate, sync.clone(), NS),
        groups: GroupService::new(registry.clone(), sync, NS, "", ""),
        registry,
        gateway,
        lister,
    }
}

pub fn make_node(name: &str, prefix: Option<&str>, cpu: (&str, &str), namespaces: &[&str]) -> QuotaNode {
    let mut node = QuotaNode::new(name, prefix);
    node.min.insert("cpu".to_string(), cpu.0.to_string());
    node.max.insert("cpu".to_string(), cpu.1.to_string());
    node.namespaces = namespaces.iter().map(|s| s.to_string()).collect();
    node
}

/// `root` over a single leaf `team-a` holding the given namespaces.
pub fn team_tree(namespaces: &[&str]) -> QuotaNode {
    let mut root = make_node("root", None, ("10", "20"), &[]);
    root.children
        .push(make_node("team-a", Some("root"), ("4", "8"), namespaces));
    root
}

impl Fixture {
    pub async fn add_user(&self, id: &str) -> User {
        self.registry
            .create_or_replace(User::new(NS, id, id, vec![]))
            .await
            .unwrap()
    }

    pub async fn user(&self, id: &str) -> User {
        self.registry.get(Some(NS), id).await.unwrap().unwrap()
    }
}
