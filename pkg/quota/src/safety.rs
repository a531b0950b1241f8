//! Namespace safety gate: only idle namespaces may join or leave a quota node.

use pkg_state::WorkloadLister;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{BusyNamespace, QuotaError, Result};

/// Refuses to detach namespaces that still run workloads.
#[derive(Clone)]
pub struct SafetyGate {
    lister: Arc<dyn WorkloadLister>,
}

impl SafetyGate {
    pub fn new(lister: Arc<dyn WorkloadLister>) -> Self {
        Self { lister }
    }

    /// Ok if no namespace has a running workload; otherwise every
    /// namespace with the first running workload found in it.
    pub async fn assert_namespaces_idle<'a>(
        &self,
        namespaces: impl IntoIterator<Item = &'a String>,
    ) -> Result<()> {
        let namespaces: BTreeSet<&String> = namespaces.into_iter().collect();
        let mut busy = Vec::new();
        for ns in namespaces {
            let workloads = self.lister.list_workloads(ns).await?;
            debug!("Safety: ns {} has {} workload(s)", ns, workloads.len());
            if let Some(w) = workloads.iter().find(|w| w.phase.blocks_detach()) {
                info!("Safety: ns {} busy, workload {} is {}", ns, w.name, w.phase);
                busy.push(BusyNamespace {
                    namespace: ns.clone(),
                    workload: w.name.clone(),
                });
            }
        }
        if busy.is_empty() {
            Ok(())
        } else {
            Err(QuotaError::Safety(busy))
        }
    }
}
