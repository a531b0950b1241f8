pub mod client;
pub mod kv;
pub mod memory;
pub mod registry;
pub mod workloads;

pub use client::StateStore;
pub use kv::KvStore;
pub use memory::MemoryStore;
pub use registry::Registry;
pub use workloads::{RegistryWorkloadLister, WorkloadLister};
