use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Pod phase ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Only actively running workloads keep a namespace busy.
    pub fn blocks_detach(&self) -> bool {
        !matches!(
            self,
            PodPhase::Pending | PodPhase::Succeeded | PodPhase::Failed | PodPhase::Unknown
        )
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodPhase::Pending => write!(f, "Pending"),
            PodPhase::Running => write!(f, "Running"),
            PodPhase::Succeeded => write!(f, "Succeeded"),
            PodPhase::Failed => write!(f, "Failed"),
            PodPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

// --- Pod ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    pub phase: PodPhase,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

crate::namespaced_resource!(Pod, "pods");

/// What the safety gate sees of a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub name: String,
    pub phase: PodPhase,
}

impl From<&Pod> for Workload {
    fn from(pod: &Pod) -> Self {
        Self {
            name: pod.name.clone(),
            phase: pod.phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_running_blocks() {
        assert!(PodPhase::Running.blocks_detach());
        assert!(!PodPhase::Pending.blocks_detach());
        assert!(!PodPhase::Unknown.blocks_detach());
        assert!(!PodPhase::Failed.blocks_detach());
        assert!(!PodPhase::Succeeded.blocks_detach());
    }
}
